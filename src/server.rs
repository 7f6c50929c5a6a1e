//! JSON HTTP API over the [`Engine`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/api/apps` | List apps |
//! | `POST`   | `/api/apps` | Create an app: `{ "appId", "name" }` |
//! | `GET`    | `/api/apps/{app_id}` | App details |
//! | `DELETE` | `/api/apps/{app_id}` | Delete an app with its files and index |
//! | `GET`    | `/api/apps/{app_id}/files` | List uploaded files |
//! | `PUT`    | `/api/apps/{app_id}/files/{filename}` | Upload one file (raw body) |
//! | `POST`   | `/api/apps/{app_id}/train` | Rebuild the app's index |
//! | `POST`   | `/api/chat` | Ask a question: `{ "appId", "message" }` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "app_not_ready", "message": "App 'css' is not trained yet. Status: CREATED" } }
//! ```
//!
//! Validation and lifecycle errors are 400, unknown apps 404, conflicting
//! operations (`training_in_progress`, `app_exists`) 409, and embedding,
//! index, or generation failures 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser widgets can
//! call the chat endpoint directly.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::engine::Engine;
use crate::error::Error;
use crate::models::{Answer, AppRecord, DocumentRecord, TrainReport};

/// Build the router with all routes and CORS.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/apps", get(handle_list_apps).post(handle_create_app))
        .route(
            "/api/apps/{app_id}",
            get(handle_get_app).delete(handle_delete_app),
        )
        .route("/api/apps/{app_id}/files", get(handle_list_files))
        .route("/api/apps/{app_id}/files/{filename}", put(handle_upload))
        .route("/api/apps/{app_id}/train", post(handle_train))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .with_state(engine)
}

/// Serve on an already bound listener until the process stops.
pub async fn serve(listener: tokio::net::TcpListener, engine: Arc<Engine>) -> crate::Result<()> {
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

/// Bind `[server].bind` and serve.
pub async fn run_server(engine: Arc<Engine>) -> crate::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    eprintln!("tenant-rag server listening on http://{}", bind_addr);
    serve(listener, engine).await
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
    code: &'static str,
    message: String,
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::AppNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::TrainingInProgress(_) => (StatusCode::CONFLICT, "training_in_progress"),
            Error::AppAlreadyExists(_) => (StatusCode::CONFLICT, "app_exists"),
            Error::AppNotReady { .. } => (StatusCode::BAD_REQUEST, "app_not_ready"),
            Error::NoDocuments(_) => (StatusCode::BAD_REQUEST, "no_documents"),
            Error::InvalidAppId(_) => (StatusCode::BAD_REQUEST, "invalid_app_id"),
            Error::UnsupportedFile(_) => (StatusCode::BAD_REQUEST, "unsupported_file"),
            Error::EmptyMessage => (StatusCode::BAD_REQUEST, "empty_message"),
            Error::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalid_config"),
            Error::EmbeddingUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "embedding_unavailable")
            }
            Error::IndexWriteFailure(_) | Error::IndexRead(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "index_error")
            }
            Error::Decode { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "decode_error"),
            Error::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "generation_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            error!(code, error = %err, "request failed");
        }

        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

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

// ============ Apps ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAppRequest {
    app_id: String,
    #[serde(default)]
    name: String,
}

#[derive(Serialize)]
struct AppsResponse {
    apps: Vec<AppRecord>,
}

async fn handle_list_apps(State(engine): State<Arc<Engine>>) -> ApiResult<Json<AppsResponse>> {
    Ok(Json(AppsResponse {
        apps: engine.list_apps().await?,
    }))
}

async fn handle_create_app(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<CreateAppRequest>,
) -> ApiResult<(StatusCode, Json<AppRecord>)> {
    let app = engine.create_app(&req.app_id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(app)))
}

async fn handle_get_app(
    State(engine): State<Arc<Engine>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<AppRecord>> {
    Ok(Json(engine.get_app(&app_id).await?))
}

async fn handle_delete_app(
    State(engine): State<Arc<Engine>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    engine.delete_app(&app_id).await?;
    Ok(Json(serde_json::json!({ "deleted": app_id.to_ascii_lowercase() })))
}

// ============ Files ============

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<DocumentRecord>,
}

async fn handle_list_files(
    State(engine): State<Arc<Engine>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<FilesResponse>> {
    Ok(Json(FilesResponse {
        files: engine.list_documents(&app_id).await?,
    }))
}

async fn handle_upload(
    State(engine): State<Arc<Engine>>,
    Path((app_id, filename)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<DocumentRecord>)> {
    let record = engine.upload(&app_id, &filename, &body).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// ============ Training ============

async fn handle_train(
    State(engine): State<Arc<Engine>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<TrainReport>> {
    Ok(Json(engine.train(&app_id).await?))
}

// ============ Chat ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    app_id: String,
    message: String,
}

async fn handle_chat(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<Answer>> {
    Ok(Json(engine.chat(&req.app_id, &req.message).await?))
}
