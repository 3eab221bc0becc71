use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{self, AppState, CreateJobResponse, JobMessage, JobResult};
use crate::storage::StorageError;
use crate::types::{AppError, AppResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/", get(missing_job_id))
        .route("/jobs/{id}", get(get_job))
}

/// POST /jobs - enqueue a job and hand back its id
///
/// The body is decoded by hand so any malformed payload is a plain 400,
/// whatever the content type.
async fn create_job(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<CreateJobResponse>)> {
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("queue client not initialized".to_string()))?;

    let request = models::decode_request(&body)
        .map_err(|_| AppError::InvalidRequest("invalid JSON".to_string()))?;

    let message = JobMessage::new(Uuid::new_v4().to_string(), request);
    let payload = models::encode_message(&message)
        .map_err(|_| AppError::Internal("failed to encode message".to_string()))?;

    let message_id = queue.send(&payload).await.map_err(|e| {
        error!(job_id = %message.id, error = %e, "failed to send message");
        AppError::from(e)
    })?;

    info!(job_id = %message.id, message_id = %message_id, "Job enqueued");
    Ok((StatusCode::CREATED, Json(CreateJobResponse { id: message.id })))
}

/// GET /jobs/ - the id segment is empty
async fn missing_job_id() -> AppError {
    AppError::InvalidRequest("job id required".to_string())
}

/// GET /jobs/{id} - fetch a stored result
///
/// Any storage failure is reported as 404, the same as a missing object.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobResult>> {
    if id.is_empty() {
        return Err(AppError::InvalidRequest("job id required".to_string()));
    }
    let store = state
        .store
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("storage client not initialized".to_string()))?;

    let key = models::result_key(&id);
    let body = store.get(&key).await.map_err(|e| {
        match &e {
            StorageError::NotFound(_) => {}
            // Collapsed into 404 below; the real cause only shows up here.
            other => warn!(key = %key, error = %other, "Result lookup failed"),
        }
        AppError::NotFound("job not found".to_string())
    })?;

    let result = models::decode_result(&body).map_err(|e| {
        error!(key = %key, error = %e, "failed to decode job");
        AppError::Internal("failed to decode job".to_string())
    })?;

    Ok(Json(result))
}
