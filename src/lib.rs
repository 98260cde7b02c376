pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod generation_service;
pub mod key_rotation;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod pdf_extraction;
pub mod retry;
pub mod study_service;
pub mod validation;

pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use generation_service::GenerationService;
pub use key_rotation::{KeyPool, ModelHandle, ModelVariant, RotationError, RotationManager};
pub use llm_providers::{
    Credential, FailureClass, GeminiEndpoint, GeminiModelResolver, GenerationEndpoint,
    ModelResolver, ProviderError,
};
pub use models::*;
pub use retry::{RetryController, RetryExecution, RetryPolicy};
pub use study_service::{SourceMaterial, StudyService};
pub use validation::ResponseValidator;
