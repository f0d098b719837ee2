//! JSON HTTP API.
//!
//! Wraps a single [`StudyApp`] behind an async mutex, so requests are
//! handled one at a time.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET` / `DELETE` | `/users/{id}/session` | Read the session / log out |
//! | `POST` | `/users/{id}/onboarding` | Submit the onboarding form |
//! | `GET` / `POST` | `/users/{id}/documents` | List / upload documents (base64 body) |
//! | `POST` | `/users/{id}/index` | Rebuild the index from all uploads |
//! | `POST` | `/users/{id}/slides` | Generate a slide deck |
//! | `GET`  | `/users/{id}/slides/current` | Current slide (`?narration=true`) |
//! | `POST` | `/users/{id}/slides/goto` | Move to an index, or `next` / `previous` |
//! | `GET` / `POST` | `/users/{id}/quiz` | Current questions / generate a quiz |
//! | `POST` | `/users/{id}/quiz/answer` | Record one answer |
//! | `POST` | `/users/{id}/quiz/submit` | Score the quiz |
//! | `POST` | `/users/{id}/mode` | Switch mode |
//! | `POST` | `/users/{id}/chat` | Ask the tutor |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Codes come from [`StudyError::code`]: `unsupported_format`, `bad_request`,
//! `extraction_failed` and `invalid_transition` (400), `not_found` (404),
//! `index_build` (422), `generation` and `llm_unavailable` (502),
//! `session_load` and `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::app::{
    ChatReply, IndexSummary, QuestionView, QuizProgress, SessionView, SlideMove, StudyApp,
};
use crate::config::Config;
use crate::error::StudyError;
use crate::models::{Document, DocumentFormat};
use crate::onboarding::OnboardingForm;
use crate::present::{QuizResult, SlideView};
use crate::session::Mode;

type SharedApp = Arc<Mutex<StudyApp>>;

/// Opens the app from `config` and serves it on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = StudyApp::open(config.clone()).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "study server listening");
    axum::serve(listener, router(app)).await?;

    Ok(())
}

/// Builds the router around `app`.
pub fn router(app: StudyApp) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/users/{id}/session",
            get(handle_session).delete(handle_logout),
        )
        .route("/users/{id}/onboarding", post(handle_onboarding))
        .route(
            "/users/{id}/documents",
            get(handle_list_documents).post(handle_upload),
        )
        .route("/users/{id}/index", post(handle_build_index))
        .route("/users/{id}/slides", post(handle_generate_slides))
        .route("/users/{id}/slides/current", get(handle_current_slide))
        .route("/users/{id}/slides/goto", post(handle_goto_slide))
        .route(
            "/users/{id}/quiz",
            get(handle_quiz_questions).post(handle_generate_quiz),
        )
        .route("/users/{id}/quiz/answer", post(handle_answer))
        .route("/users/{id}/quiz/submit", post(handle_submit_quiz))
        .route("/users/{id}/mode", post(handle_mode))
        .route("/users/{id}/chat", post(handle_chat))
        .layer(cors)
        .with_state(Arc::new(Mutex::new(app)))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StudyError> for AppError {
    fn from(err: StudyError) -> Self {
        let status = match &err {
            StudyError::UnsupportedFormat(_)
            | StudyError::InvalidInput(_)
            | StudyError::Extraction { .. }
            | StudyError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            StudyError::NotFound(_) => StatusCode::NOT_FOUND,
            StudyError::IndexBuild(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StudyError::Generation(_) | StudyError::Llm(_) => StatusCode::BAD_GATEWAY,
            StudyError::SessionLoad { .. } | StudyError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Session ============

async fn handle_session(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
) -> ApiResult<SessionView> {
    let app = app.lock().await;
    Ok(Json(SessionView::from(&app.session(&id).await?)))
}

async fn handle_logout(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    app.lock().await.logout(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_onboarding(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(form): Json<OnboardingForm>,
) -> ApiResult<SessionView> {
    let session = app.lock().await.onboard(&id, &form).await?;
    Ok(Json(SessionView::from(&session)))
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

async fn handle_mode(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(req): Json<ModeRequest>,
) -> ApiResult<SessionView> {
    let mode = Mode::parse(&req.mode)?;
    let session = app.lock().await.select_mode(&id, mode).await?;
    Ok(Json(SessionView::from(&session)))
}

// ============ Documents and index ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    /// Short name, extension or MIME type. Taken from `filename` when absent.
    #[serde(default)]
    format: Option<String>,
    content_base64: String,
}

#[derive(Serialize)]
struct UploadResponse {
    id: String,
    filename: String,
    format: DocumentFormat,
    content_type: &'static str,
    characters: usize,
}

impl From<Document> for UploadResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename,
            format: doc.format,
            content_type: doc.format.mime_type(),
            characters: doc.text.chars().count(),
        }
    }
}

async fn handle_upload(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
    let format = match req.format {
        Some(f) => f,
        None => DocumentFormat::from_filename(&req.filename)?
            .extension()
            .to_string(),
    };

    let doc = app
        .lock()
        .await
        .upload(&id, &req.filename, &format, &bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(doc.into())))
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<String>,
}

async fn handle_list_documents(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
) -> ApiResult<DocumentList> {
    let documents = app.lock().await.uploaded_files(&id)?;
    Ok(Json(DocumentList { documents }))
}

async fn handle_build_index(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
) -> ApiResult<IndexSummary> {
    Ok(Json(app.lock().await.build_index(&id).await?))
}

// ============ Slides ============

#[derive(Deserialize, Default)]
struct SlidesRequest {
    #[serde(default)]
    topic: Option<String>,
}

async fn handle_generate_slides(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(req): Json<SlidesRequest>,
) -> ApiResult<SlideView> {
    let view = app
        .lock()
        .await
        .generate_slides(&id, req.topic.as_deref())
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize, Default)]
struct NarrationQuery {
    #[serde(default)]
    narration: bool,
}

async fn handle_current_slide(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Query(q): Query<NarrationQuery>,
) -> ApiResult<SlideView> {
    Ok(Json(app.lock().await.current_slide(&id, q.narration).await?))
}

#[derive(Deserialize)]
struct GotoRequest {
    #[serde(default)]
    index: Option<usize>,
    /// `next` or `previous`; ignored when `index` is given.
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    narration: bool,
}

async fn handle_goto_slide(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(req): Json<GotoRequest>,
) -> ApiResult<SlideView> {
    let movement = match (req.index, req.direction.as_deref()) {
        (Some(i), _) => SlideMove::To(i),
        (None, Some("next")) => SlideMove::Next,
        (None, Some("previous")) => SlideMove::Previous,
        (None, other) => {
            return Err(bad_request(format!(
                "expected an index or a direction of next/previous, got {:?}",
                other
            )))
        }
    };
    let view = app
        .lock()
        .await
        .goto_slide(&id, movement, req.narration)
        .await?;
    Ok(Json(view))
}

// ============ Quiz ============

#[derive(Deserialize, Default)]
struct QuizRequest {
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Serialize)]
struct QuizResponse {
    questions: Vec<QuestionView>,
}

async fn handle_generate_quiz(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(req): Json<QuizRequest>,
) -> ApiResult<QuizResponse> {
    let questions = app.lock().await.generate_quiz(&id, req.count).await?;
    Ok(Json(QuizResponse { questions }))
}

async fn handle_quiz_questions(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
) -> ApiResult<QuizResponse> {
    let questions = app.lock().await.quiz_questions(&id).await?;
    Ok(Json(QuizResponse { questions }))
}

#[derive(Deserialize)]
struct AnswerRequest {
    number: usize,
    choice: String,
}

async fn handle_answer(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> ApiResult<QuizProgress> {
    let progress = app
        .lock()
        .await
        .answer(&id, req.number, &req.choice)
        .await?;
    Ok(Json(progress))
}

async fn handle_submit_quiz(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
) -> ApiResult<QuizResult> {
    Ok(Json(app.lock().await.submit_quiz(&id).await?))
}

// ============ Chat ============

#[derive(Deserialize)]
struct ChatRequestBody {
    message: String,
}

async fn handle_chat(
    State(app): State<SharedApp>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequestBody>,
) -> ApiResult<ChatReply> {
    Ok(Json(app.lock().await.chat(&id, &req.message).await?))
}
