use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::service::{ListParams, ServiceError};

/// Create the router with all API routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/archive", post(submit))
        .route("/api/archives", get(list))
        .route("/api/archive/:id", get(detail).delete(delete))
        .route("/api/archive/:id/process", post(reprocess))
        .route("/api/archive/:id/download", get(download))
}

// ========== Errors ==========

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// A [`ServiceError`] rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) | ServiceError::StorageDrift(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self.0 {
            ServiceError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "internal error".to_string()
            }
            ServiceError::StorageDrift(msg) => {
                tracing::warn!("Storage drift: {msg}");
                msg.clone()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub(super) async fn not_found() -> ApiError {
    ApiError(ServiceError::NotFound("not found".to_string()))
}

// ========== API Routes ==========

async fn health(State(state): State<AppState>) -> ApiResult<Response> {
    let report = state.service.health().await?;
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    url: String,
    kind: Option<String>,
}

async fn submit(
    State(state): State<AppState>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) =
        body.map_err(|e| ServiceError::Validation(format!("invalid request body: {}", e.body_text())))?;

    let submission = state.service.submit(&body.url, body.kind.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(submission)).into_response())
}

async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) =
        query.map_err(|e| ServiceError::Validation(format!("invalid query: {}", e.body_text())))?;
    let archives = state.service.list(&params).await?;
    Ok(Json(archives).into_response())
}

async fn detail(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let archive = state.service.get(&id).await?;
    Ok(Json(archive).into_response())
}

async fn reprocess(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let submission = state.service.reprocess(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(submission)).into_response())
}

async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    state.service.delete(&id).await?;
    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let artifact = state.service.download(&id).await?;

    // The file can vanish between the check and the open.
    let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| {
        ServiceError::StorageDrift(format!("artifact for archive {id} could not be opened: {e}"))
    })?;

    let content_type = mime_guess::from_path(&artifact.path)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, artifact.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&artifact.filename),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}
