use chrono::Utc;
use std::time::Instant;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::ApiError;
use crate::generation_service::GenerationService;
use crate::models::*;
use crate::pdf_extraction;

// Import logging macros
use crate::{log_service_error, log_service_start, log_service_success};

const SERVICE: &str = "study_service";
pub const MAX_ITEM_COUNT: usize = 50;

/// Where the study material came from
#[derive(Debug, Clone)]
pub struct SourceMaterial {
    pub text: String,
    pub source_name: Option<String>,
    pub title: Option<String>,
}

#[derive(Clone)]
pub struct StudyService {
    db: Database,
    generator: GenerationService,
}

impl StudyService {
    pub fn new(db: Database, generator: GenerationService) -> Self {
        Self { db, generator }
    }

    pub fn generator(&self) -> &GenerationService {
        &self.generator
    }

    /// Read the PDF text, rejecting non-text documents before any generation call
    pub async fn read_pdf(
        &self,
        bytes: Vec<u8>,
        source_name: Option<String>,
        title: Option<String>,
    ) -> Result<SourceMaterial, ApiError> {
        let text = pdf_extraction::extract_text_blocking(bytes).await?;
        Ok(SourceMaterial {
            text,
            source_name,
            title,
        })
    }

    pub async fn create_flashcards(
        &self,
        user_id: &str,
        source: SourceMaterial,
        count: Option<usize>,
    ) -> Result<FlashcardSet, ApiError> {
        let started = Instant::now();
        log_service_start!(SERVICE, "create_flashcards", user_id = user_id);
        validate_request(user_id, &source.text, count)?;

        let cards = self
            .generator
            .generate_flashcards(&source.text, count)
            .await
            .inspect_err(|e| {
                log_service_error!(SERVICE, "create_flashcards", user_id = user_id, error = e);
            })?;

        let set = FlashcardSet {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title: resolve_title(&source, "Flashcards"),
            source_name: source.source_name,
            cards,
            created_at: Utc::now(),
        };
        self.db.save_flashcard_set(&set).await?;

        log_service_success!(
            SERVICE,
            "create_flashcards",
            user_id = user_id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(set)
    }

    pub async fn create_quiz(
        &self,
        user_id: &str,
        source: SourceMaterial,
        count: Option<usize>,
    ) -> Result<Quiz, ApiError> {
        let started = Instant::now();
        log_service_start!(SERVICE, "create_quiz", user_id = user_id);
        validate_request(user_id, &source.text, count)?;

        let questions = self
            .generator
            .generate_quiz(&source.text, count)
            .await
            .inspect_err(|e| {
                log_service_error!(SERVICE, "create_quiz", user_id = user_id, error = e);
            })?;

        let quiz = Quiz {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title: resolve_title(&source, "Quiz"),
            source_name: source.source_name,
            questions,
            created_at: Utc::now(),
        };
        self.db.save_quiz(&quiz).await?;

        log_service_success!(
            SERVICE,
            "create_quiz",
            user_id = user_id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(quiz)
    }

    /// Score a set of answers against the stored quiz and persist the result
    pub async fn submit_quiz_answers(
        &self,
        quiz_id: Uuid,
        request: SubmitQuizRequest,
    ) -> Result<QuizResult, ApiError> {
        if request.user_id.trim().is_empty() {
            return Err(ApiError::ValidationError("user_id is required".to_string()));
        }

        let quiz = self
            .db
            .get_quiz(quiz_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Quiz '{}' not found", quiz_id)))?;

        if request.answers.len() != quiz.questions.len() {
            return Err(ApiError::ValidationError(format!(
                "Expected {} answers, received {}",
                quiz.questions.len(),
                request.answers.len()
            )));
        }

        let answers: Vec<AnswerFeedback> = quiz
            .questions
            .iter()
            .zip(request.answers.iter())
            .enumerate()
            .map(|(question_index, (question, selected))| AnswerFeedback {
                question_index,
                selected: *selected,
                correct_answer: question.correct_answer,
                is_correct: *selected == Some(question.correct_answer),
            })
            .collect();

        let result = QuizResult {
            id: Uuid::new_v4(),
            quiz_id,
            user_id: request.user_id,
            score: answers.iter().filter(|a| a.is_correct).count() as i64,
            total: answers.len() as i64,
            answers,
            completed_at: Utc::now(),
        };
        self.db.save_quiz_result(&result).await?;

        log_service_success!(
            SERVICE,
            "submit_quiz_answers",
            format!("scored {}/{}", result.score, result.total)
        );
        Ok(result)
    }

    pub async fn list_flashcard_sets(&self, user_id: &str) -> Result<Vec<FlashcardSet>, ApiError> {
        Ok(self.db.find_flashcard_sets(user_id).await?)
    }

    pub async fn get_flashcard_set(&self, id: Uuid) -> Result<Option<FlashcardSet>, ApiError> {
        Ok(self.db.get_flashcard_set(id).await?)
    }

    pub async fn list_quizzes(&self, user_id: &str) -> Result<Vec<Quiz>, ApiError> {
        Ok(self.db.find_quizzes(user_id).await?)
    }

    pub async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>, ApiError> {
        Ok(self.db.get_quiz(id).await?)
    }

    pub async fn list_results(&self, user_id: &str) -> Result<Vec<QuizResult>, ApiError> {
        Ok(self.db.find_quiz_results(user_id).await?)
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats, ApiError> {
        Ok(self.db.get_user_stats(user_id).await?)
    }
}

fn validate_request(user_id: &str, text: &str, count: Option<usize>) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::ValidationError("user_id is required".to_string()));
    }
    if text.trim().is_empty() {
        return Err(ApiError::ValidationError("study material text is empty".to_string()));
    }
    match count {
        Some(n) if n == 0 || n > MAX_ITEM_COUNT => Err(ApiError::ValidationError(format!(
            "count must be between 1 and {}",
            MAX_ITEM_COUNT
        ))),
        _ => Ok(()),
    }
}

fn resolve_title(source: &SourceMaterial, kind_label: &str) -> String {
    if let Some(title) = source.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    match source.source_name.as_deref() {
        Some(name) => {
            let stem = name.strip_suffix(".pdf").or_else(|| name.strip_suffix(".PDF")).unwrap_or(name);
            format!("{} - {}", stem, kind_label)
        }
        None => format!("{} {}", kind_label, Utc::now().format("%Y-%m-%d %H:%M")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(title: Option<&str>, source_name: Option<&str>) -> SourceMaterial {
        SourceMaterial {
            text: "material".to_string(),
            source_name: source_name.map(str::to_string),
            title: title.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_title_prefers_explicit_title() {
        assert_eq!(resolve_title(&source(Some("Biology 101"), Some("bio.pdf")), "Quiz"), "Biology 101");
        assert_eq!(resolve_title(&source(Some("  "), Some("bio.pdf")), "Quiz"), "bio - Quiz");
        assert!(resolve_title(&source(None, None), "Flashcards").starts_with("Flashcards "));
    }

    #[test]
    fn test_validate_request_bounds() {
        assert!(validate_request("u1", "text", Some(5)).is_ok());
        assert!(validate_request("u1", "text", None).is_ok());
        assert!(matches!(validate_request("", "text", None), Err(ApiError::ValidationError(_))));
        assert!(matches!(validate_request("u1", "  ", None), Err(ApiError::ValidationError(_))));
        assert!(matches!(validate_request("u1", "text", Some(0)), Err(ApiError::ValidationError(_))));
        assert!(matches!(
            validate_request("u1", "text", Some(MAX_ITEM_COUNT + 1)),
            Err(ApiError::ValidationError(_))
        ));
    }
}
