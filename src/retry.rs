use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::errors::{FailureCause, GenerationError};
use crate::key_rotation::{ModelHandle, RotationError, RotationManager};
use crate::llm_providers::{FailureClass, ProviderError};

// Import logging macros
use crate::log_llm_operation;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_ROTATION_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Calls allowed per credential before giving up
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Pause after switching to a new credential
    pub rotation_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            rotation_pause: DEFAULT_ROTATION_PAUSE,
        }
    }
}

impl RetryPolicy {
    /// `base * 2^failed_attempts`, where `failed_attempts` counts transient
    /// failures on the current credential before this one
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(failed_attempts))
    }
}

#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success(String),
    TransientError(ProviderError),
    QuotaError(ProviderError),
    FatalError(ProviderError),
}

/// One external call made by the retry loop
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub credential_index: usize,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone)]
pub struct RetryExecution {
    pub text: String,
    pub attempts: Vec<GenerationAttempt>,
    pub rotations: usize,
}

/// Runs one generation call with per-credential retry budgets.
///
/// Quota errors hand off to the rotation manager and give the new credential a
/// fresh budget. Transient errors back off exponentially on the same
/// credential and never rotate. Anything else stops immediately.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    rotation: Arc<RotationManager>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, rotation: Arc<RotationManager>) -> Self {
        Self { policy, rotation }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(
        &self,
        prompt: &str,
        initial_handle: ModelHandle,
    ) -> Result<RetryExecution, GenerationError> {
        let mut handle = initial_handle;
        let mut failed_attempts: u32 = 0;
        let mut rotations: usize = 0;
        let mut history: Vec<GenerationAttempt> = Vec::new();

        loop {
            let attempt_number = history.len() as u32 + 1;
            let credential_index = handle.credential_index();

            let (error, class) = match handle.generate_content(prompt).await {
                Ok(text) if !text.trim().is_empty() => {
                    history.push(GenerationAttempt {
                        attempt_number,
                        credential_index,
                        outcome: AttemptOutcome::Success(text.clone()),
                    });
                    return Ok(RetryExecution {
                        text,
                        attempts: history,
                        rotations,
                    });
                }
                Ok(_) => (
                    ProviderError::new(None, "model returned an empty response"),
                    FailureClass::Transient,
                ),
                Err(e) => {
                    let class = e.classify();
                    (e, class)
                }
            };

            let outcome = match class {
                FailureClass::Quota => AttemptOutcome::QuotaError(error.clone()),
                FailureClass::Transient => AttemptOutcome::TransientError(error.clone()),
                FailureClass::Fatal => AttemptOutcome::FatalError(error.clone()),
            };
            history.push(GenerationAttempt {
                attempt_number,
                credential_index,
                outcome,
            });

            match class {
                FailureClass::Quota => {
                    // every credential has already been given its turn in this call
                    if rotations + 1 >= self.rotation.pool_size() {
                        log_llm_operation!(
                            error,
                            "generate",
                            credential_index = credential_index,
                            error = error,
                            retry_count = history.len()
                        );
                        return Err(GenerationError::failed(
                            FailureCause::QuotaExhausted,
                            &error.message,
                        ));
                    }

                    match self.rotation.rotate(&error).await {
                        Ok(next) => {
                            handle = next;
                            failed_attempts = 0;
                            rotations += 1;
                            sleep(self.policy.rotation_pause).await;
                        }
                        Err(rotation_error) => {
                            log_llm_operation!(
                                error,
                                "rotate",
                                credential_index = credential_index,
                                error = rotation_error,
                                retry_count = history.len()
                            );
                            let message = match rotation_error {
                                RotationError::AllKeysExhausted { .. } => rotation_error.to_string(),
                                _ => error.message.clone(),
                            };
                            return Err(GenerationError::failed(
                                FailureCause::QuotaExhausted,
                                &message,
                            ));
                        }
                    }
                }
                FailureClass::Transient => {
                    let delay = self.policy.backoff_delay(failed_attempts);
                    failed_attempts += 1;
                    if failed_attempts >= self.policy.max_attempts {
                        log_llm_operation!(
                            error,
                            "generate",
                            credential_index = credential_index,
                            error = error,
                            retry_count = history.len()
                        );
                        return Err(GenerationError::failed(
                            FailureCause::RetriesExhausted,
                            &error.message,
                        ));
                    }

                    log_llm_operation!(
                        retry,
                        credential_index = credential_index,
                        attempt = failed_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = error
                    );
                    sleep(delay).await;
                }
                FailureClass::Fatal => {
                    debug!(
                        credential_index = credential_index,
                        status = ?error.status,
                        "Non-retryable generation error"
                    );
                    log_llm_operation!(
                        error,
                        "generate",
                        credential_index = credential_index,
                        error = error,
                        retry_count = history.len()
                    );
                    return Err(GenerationError::failed(FailureCause::Fatal, &error.message));
                }
            }
        }
    }
}
