use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{
    errors::{ApiError, ErrorContext},
    models::*,
    study_service::{SourceMaterial, StudyService},
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Clone)]
pub struct AppState {
    pub study_service: StudyService,
    pub max_upload_bytes: usize,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            details: None,
        }
    }

    pub fn error_with_details(message: String, details: String) -> Self {
        Self {
            details: Some(details),
            ..Self::error(message)
        }
    }
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub key_pool_size: usize,
    pub current_credential_index: usize,
    pub rotation_count: usize,
}

/// Fields accepted by the PDF upload endpoints
struct UploadForm {
    bytes: Vec<u8>,
    file_name: Option<String>,
    count: Option<usize>,
    title: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut bytes = None;
    let mut file_name = None;
    let mut count = None;
    let mut title = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            "count" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                let parsed = raw
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ApiError::ValidationError(format!("invalid count '{}'", raw)))?;
                count = Some(parsed);
            }
            "title" => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            other => debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("missing 'file' field".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }

    Ok(UploadForm {
        bytes,
        file_name,
        count,
        title,
    })
}

pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let rotation = state.study_service.generator().rotation_manager();
    Json(ApiResponse::success(HealthStatus {
        status: "ok",
        key_pool_size: rotation.pool_size(),
        current_credential_index: rotation.current_index(),
        rotation_count: rotation.rotation_count(),
    }))
}

// Flashcard endpoints
pub async fn upload_flashcards(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<FlashcardSet> {
    log_api_start!("upload_flashcards", user_id = user_id);
    let context = || ErrorContext::new("upload_flashcards", "flashcard_set").with_id(&user_id);

    let form = read_upload(multipart)
        .await
        .map_err(|e| e.to_response_with_context(context()))?;
    let source = state
        .study_service
        .read_pdf(form.bytes, form.file_name, form.title)
        .await
        .map_err(|e| e.to_response_with_context(context()))?;

    match state.study_service.create_flashcards(&user_id, source, form.count).await {
        Ok(set) => {
            log_api_success!("upload_flashcards", user_id = user_id, format!("{} cards", set.cards.len()));
            Ok(Json(ApiResponse::success(set)))
        }
        Err(e) => {
            log_api_error!("upload_flashcards", user_id = user_id, error = e, "flashcard generation failed");
            Err(e.to_response_with_context(context()))
        }
    }
}

pub async fn generate_flashcards(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<GenerateFromTextRequest>,
) -> ApiResult<FlashcardSet> {
    log_api_start!("generate_flashcards", user_id = user_id);

    let source = SourceMaterial {
        text: request.text,
        source_name: None,
        title: request.title,
    };

    match state.study_service.create_flashcards(&user_id, source, request.count).await {
        Ok(set) => {
            log_api_success!("generate_flashcards", user_id = user_id, format!("{} cards", set.cards.len()));
            Ok(Json(ApiResponse::success(set)))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("generate_flashcards", "flashcard_set").with_id(&user_id),
        )),
    }
}

pub async fn list_flashcard_sets(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<FlashcardSet>> {
    match state.study_service.list_flashcard_sets(&user_id).await {
        Ok(sets) => {
            log_api_success!("list_flashcard_sets", count = sets.len(), "flashcard sets retrieved");
            Ok(Json(ApiResponse::success(sets)))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("list_flashcard_sets", "flashcard_set").with_id(&user_id),
        )),
    }
}

pub async fn get_flashcard_set(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<FlashcardSet> {
    log_api_start!("get_flashcard_set", resource_id = id);
    let context = || ErrorContext::new("get_flashcard_set", "flashcard_set").with_id(&id.to_string());

    match state.study_service.get_flashcard_set(id).await {
        Ok(Some(set)) => Ok(Json(ApiResponse::success(set))),
        Ok(None) => {
            log_api_warn!("get_flashcard_set", "flashcard set not found");
            Err(ApiError::NotFound(format!("Flashcard set '{}' not found", id))
                .to_response_with_context(context()))
        }
        Err(e) => Err(e.to_response_with_context(context())),
    }
}

// Quiz endpoints
pub async fn upload_quiz(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Quiz> {
    log_api_start!("upload_quiz", user_id = user_id);
    let context = || ErrorContext::new("upload_quiz", "quiz").with_id(&user_id);

    let form = read_upload(multipart)
        .await
        .map_err(|e| e.to_response_with_context(context()))?;
    let source = state
        .study_service
        .read_pdf(form.bytes, form.file_name, form.title)
        .await
        .map_err(|e| e.to_response_with_context(context()))?;

    match state.study_service.create_quiz(&user_id, source, form.count).await {
        Ok(quiz) => {
            log_api_success!("upload_quiz", user_id = user_id, format!("{} questions", quiz.questions.len()));
            Ok(Json(ApiResponse::success(quiz)))
        }
        Err(e) => {
            log_api_error!("upload_quiz", user_id = user_id, error = e, "quiz generation failed");
            Err(e.to_response_with_context(context()))
        }
    }
}

pub async fn generate_quiz(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<GenerateFromTextRequest>,
) -> ApiResult<Quiz> {
    log_api_start!("generate_quiz", user_id = user_id);

    let source = SourceMaterial {
        text: request.text,
        source_name: None,
        title: request.title,
    };

    match state.study_service.create_quiz(&user_id, source, request.count).await {
        Ok(quiz) => {
            log_api_success!("generate_quiz", user_id = user_id, format!("{} questions", quiz.questions.len()));
            Ok(Json(ApiResponse::success(quiz)))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("generate_quiz", "quiz").with_id(&user_id))),
    }
}

pub async fn list_quizzes(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Quiz>> {
    match state.study_service.list_quizzes(&user_id).await {
        Ok(quizzes) => {
            log_api_success!("list_quizzes", count = quizzes.len(), "quizzes retrieved");
            Ok(Json(ApiResponse::success(quizzes)))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("list_quizzes", "quiz").with_id(&user_id))),
    }
}

pub async fn get_quiz(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Quiz> {
    log_api_start!("get_quiz", resource_id = id);
    let context = || ErrorContext::new("get_quiz", "quiz").with_id(&id.to_string());

    match state.study_service.get_quiz(id).await {
        Ok(Some(quiz)) => Ok(Json(ApiResponse::success(quiz))),
        Ok(None) => Err(ApiError::NotFound(format!("Quiz '{}' not found", id)).to_response_with_context(context())),
        Err(e) => Err(e.to_response_with_context(context())),
    }
}

pub async fn submit_quiz(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitQuizRequest>,
) -> ApiResult<QuizResult> {
    log_api_start!("submit_quiz", resource_id = id);

    match state.study_service.submit_quiz_answers(id, request).await {
        Ok(result) => {
            log_api_success!(
                "submit_quiz",
                resource_id = id,
                format!("scored {}/{}", result.score, result.total)
            );
            Ok(Json(ApiResponse::success(result)))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("submit_quiz", "quiz").with_id(&id.to_string()),
        )),
    }
}

// Progress endpoints
pub async fn list_results(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<QuizResult>> {
    match state.study_service.list_results(&user_id).await {
        Ok(results) => Ok(Json(ApiResponse::success(results))),
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("list_results", "quiz_result").with_id(&user_id),
        )),
    }
}

pub async fn get_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<UserStats> {
    match state.study_service.user_stats(&user_id).await {
        Ok(stats) => Ok(Json(ApiResponse::success(stats))),
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("get_user_stats", "user_stats").with_id(&user_id),
        )),
    }
}

pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;

    Router::new()
        .route("/api/health", get(health))

        // Flashcard routes
        .route("/api/users/:user_id/flashcards/upload", post(upload_flashcards))
        .route("/api/users/:user_id/flashcards/generate", post(generate_flashcards))
        .route("/api/users/:user_id/flashcards", get(list_flashcard_sets))
        .route("/api/flashcards/:id", get(get_flashcard_set))

        // Quiz routes
        .route("/api/users/:user_id/quizzes/upload", post(upload_quiz))
        .route("/api/users/:user_id/quizzes/generate", post(generate_quiz))
        .route("/api/users/:user_id/quizzes", get(list_quizzes))
        .route("/api/quizzes/:id", get(get_quiz))
        .route("/api/quizzes/:id/submit", post(submit_quiz))

        // Progress routes
        .route("/api/users/:user_id/results", get(list_results))
        .route("/api/users/:user_id/stats", get(get_user_stats))

        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}
