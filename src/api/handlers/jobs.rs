use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::domain::model::Job;
use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", id)))?;
    Ok(Json(job))
}

/// Zip bundle with the job log and results file.
pub async fn get_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    if state.store.get_job(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("job {} not found", id)));
    }
    let bundle = state
        .store
        .get_artifact(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no artifacts for job {}", id)))?;
    let disposition = format!("attachment; filename=\"{}.zip\"", id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bundle,
    )
        .into_response())
}
