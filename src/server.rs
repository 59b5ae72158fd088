//! HTTP front end for export and import tasks.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/exports` | Start an export (`{"postIds"?: [...], "status"?: "..."}`) |
//! | `GET`  | `/exports/{id}` | Export progress |
//! | `GET`  | `/exports/{id}/download` | Archive bytes of a completed export |
//! | `POST` | `/imports` | Start an import (`{"files": [{"name", "data"}]}`, `data` base64) |
//! | `GET`  | `/imports/{id}` | Import progress and report |
//! | `POST` | `/tasks/{id}/cancel` | Stop a running task after its current post |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "no files uploaded" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use blogport_core::models::TaskProgress;

use crate::config::Config;
use crate::service::{ExportRequest, ImportStarted, TaskService, UploadedFile};

const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Starts the HTTP server on `[server].bind`.
///
/// Unfinished tasks from an earlier run are resumed first. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = TaskService::from_config(config).await?;
    let resumed = service.resume_unfinished().await?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "resumed unfinished tasks");
    }

    let bind_addr = config.server.bind.clone();
    let app = router(service);

    info!(addr = %bind_addr, "listening");
    eprintln!("blogport server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes over an existing [`TaskService`].
pub fn router(service: TaskService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/exports", post(handle_start_export))
        .route("/exports/{id}", get(handle_export_progress))
        .route("/exports/{id}/download", get(handle_download))
        .route("/imports", post(handle_start_import))
        .route("/imports/{id}", get(handle_import_progress))
        .route("/tasks/{id}/cancel", post(handle_cancel))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(service)
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

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

// ============ Exports ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskStarted {
    task_id: String,
}

async fn handle_start_export(
    State(service): State<TaskService>,
    body: Option<Json<ExportRequest>>,
) -> Result<(StatusCode, Json<TaskStarted>), AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let task_id = service.start_export(request).await.map_err(internal)?;
    Ok((StatusCode::ACCEPTED, Json(TaskStarted { task_id })))
}

async fn handle_export_progress(
    State(service): State<TaskService>,
    Path(id): Path<String>,
) -> Result<Json<TaskProgress>, AppError> {
    service
        .export_progress(&id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no export task {}", id)))
}

async fn handle_download(
    State(service): State<TaskService>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let bytes = service
        .download_export(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no downloadable archive for export {}", id)))?;
    let disposition = format!("attachment; filename=\"blog-export-{}.zip\"", id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ============ Imports ============

#[derive(Deserialize)]
struct ImportRequest {
    files: Vec<UploadedPayload>,
}

#[derive(Deserialize)]
struct UploadedPayload {
    name: String,
    /// Base64 (standard alphabet) file contents.
    data: String,
}

async fn handle_start_import(
    State(service): State<TaskService>,
    Json(request): Json<ImportRequest>,
) -> Result<(StatusCode, Json<ImportStarted>), AppError> {
    if request.files.is_empty() {
        return Err(bad_request("no files uploaded"));
    }
    let mut files = Vec::with_capacity(request.files.len());
    for payload in request.files {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.data.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", payload.name, e)))?;
        files.push(UploadedFile {
            name: payload.name,
            bytes,
        });
    }
    // Everything start_import rejects before the task exists is a bad upload.
    let started = service
        .start_import(files)
        .await
        .map_err(|e| bad_request(format!("{:#}", e)))?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

async fn handle_import_progress(
    State(service): State<TaskService>,
    Path(id): Path<String>,
) -> Result<Json<TaskProgress>, AppError> {
    service
        .import_progress(&id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no import task {}", id)))
}

// ============ POST /tasks/{id}/cancel ============

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn handle_cancel(
    State(service): State<TaskService>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    if service.cancel(&id) {
        Ok(Json(CancelResponse { cancelled: true }))
    } else {
        Err(not_found(format!("no running task {}", id)))
    }
}
