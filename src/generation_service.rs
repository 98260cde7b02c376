use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::config::GenerationConfig;
use crate::errors::{FailureCause, GenerationError};
use crate::key_rotation::RotationManager;
use crate::llm_providers::GeminiModelResolver;
use crate::models::{
    DEFAULT_ITEM_COUNT, Flashcard, GeneratedContent, GenerationKind, GenerationRequest,
    QuizQuestion,
};
use crate::retry::{RetryController, RetryExecution, RetryPolicy};
use crate::validation::ResponseValidator;

// Import logging macros
use crate::log_llm_operation;

/// Entry point for turning source text into validated study content.
///
/// Cheap to clone; every clone shares the same rotation manager.
#[derive(Clone)]
pub struct GenerationService {
    rotation: Arc<RotationManager>,
    retry: RetryController,
    validator: ResponseValidator,
    request_timeout: Duration,
}

impl GenerationService {
    pub fn new(rotation: Arc<RotationManager>, policy: RetryPolicy, request_timeout: Duration) -> Self {
        Self {
            retry: RetryController::new(policy, rotation.clone()),
            rotation,
            validator: ResponseValidator,
            request_timeout,
        }
    }

    /// Build the Gemini-backed service described by `config`
    pub fn from_config(config: &GenerationConfig) -> anyhow::Result<Self> {
        let resolver = Arc::new(GeminiModelResolver::new(
            Some(config.base_url.clone()),
            config.http_timeout(),
        )?);
        let rotation = Arc::new(RotationManager::new(
            config.key_pool.clone(),
            resolver,
            config.primary_model.clone(),
            config.fallback_model.clone(),
        ));
        Ok(Self::new(rotation, config.retry_policy(), config.request_timeout()))
    }

    pub fn rotation_manager(&self) -> &Arc<RotationManager> {
        &self.rotation
    }

    /// Generate and validate content. Never touches persisted state.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        let started = Instant::now();
        let (text, attempts, rotations) = self.fetch(request).await?;

        let content = self
            .validator
            .validate(&text, request.kind, request.expected_count)
            .inspect_err(|e| log_invalid_format(request.kind, e))?;

        log_llm_operation!(
            success,
            "generate",
            attempts = attempts,
            rotations = rotations,
            duration_ms = started.elapsed().as_millis() as u64
        );

        Ok(content)
    }

    pub async fn generate_flashcards(
        &self,
        text: &str,
        count: Option<usize>,
    ) -> Result<Vec<Flashcard>, GenerationError> {
        let request = GenerationRequest::flashcards(text, count);
        let (raw, _, _) = self.fetch(&request).await?;
        self.validator
            .validate_flashcards(&raw, count)
            .inspect_err(|e| log_invalid_format(request.kind, e))
    }

    pub async fn generate_quiz(
        &self,
        text: &str,
        count: Option<usize>,
    ) -> Result<Vec<QuizQuestion>, GenerationError> {
        let request = GenerationRequest::quiz(text, count);
        let (raw, _, _) = self.fetch(&request).await?;
        self.validator
            .validate_quiz(&raw, count)
            .inspect_err(|e| log_invalid_format(request.kind, e))
    }

    /// Resolve the current handle and run the retry loop, both under the
    /// request deadline. Returns the raw text with attempt and rotation counts.
    async fn fetch(
        &self,
        request: &GenerationRequest,
    ) -> Result<(String, usize, usize), GenerationError> {
        // dropping the future on timeout also cancels a pending lookup or backoff sleep
        let execution = tokio::time::timeout(self.request_timeout, self.run(request))
            .await
            .map_err(|_| {
                GenerationError::failed(
                    FailureCause::TimedOut,
                    &format!("no response within {}s", self.request_timeout.as_secs()),
                )
            })??;

        debug!(
            response_length = execution.text.len(),
            attempts = execution.attempts.len(),
            "Raw LLM response received"
        );

        Ok((execution.text, execution.attempts.len(), execution.rotations))
    }

    async fn run(&self, request: &GenerationRequest) -> Result<RetryExecution, GenerationError> {
        let Some(handle) = self.rotation.current_handle().await else {
            error!(
                kind = ?request.kind,
                pool_size = self.rotation.pool_size(),
                "No usable generation model for the current credential"
            );
            return Err(GenerationError::ModelUnavailable);
        };

        log_llm_operation!(
            start,
            "generate",
            kind = request.kind,
            credential_index = handle.credential_index(),
            model = handle.model_name()
        );

        let prompt = build_prompt(request);
        self.retry.execute(&prompt, handle).await
    }
}

fn log_invalid_format(kind: GenerationKind, error: &GenerationError) {
    if let GenerationError::InvalidFormat { reason, excerpt, .. } = error {
        error!(
            kind = ?kind,
            reason = %reason,
            excerpt = %excerpt,
            "Failed to validate LLM response"
        );
    }
}

/// Full model prompt for a request
pub fn build_prompt(request: &GenerationRequest) -> String {
    let count = request
        .expected_count
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_ITEM_COUNT);
    match request.kind {
        GenerationKind::Flashcards => format!(
            r#"You are an expert teacher creating study flashcards.
Create {count} flashcards from the study material below.

Respond with ONLY a JSON array in this exact format, with no extra commentary:
[
    {{
        "question": "Question text here",
        "answer": "Concise answer here"
    }}
]

Guidelines:
- Each flashcard tests one key concept from the material
- Questions must be answerable from the material alone
- Keep answers short and precise

Study material:
{text}"#,
            count = count,
            text = request.prompt
        ),
        GenerationKind::Quiz => format!(
            r#"You are a university professor writing a multiple-choice quiz.
Create {count} questions from the study material below.

Respond with ONLY a JSON array in this exact format, with no extra commentary:
[
    {{
        "question": "Question text here",
        "options": ["Option 1", "Option 2", "Option 3", "Option 4"],
        "correctAnswer": 0
    }}
]

Guidelines:
- Every question has exactly 4 options WITHOUT letter prefixes (A., B., etc.)
- "correctAnswer" is the zero-based index (0-3) of the correct option
- Distractors should be plausible but clearly wrong
- Test understanding of key concepts, not trivia

Study material:
{text}"#,
            count = count,
            text = request.prompt
        ),
    }
}
