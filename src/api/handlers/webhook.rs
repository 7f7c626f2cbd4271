use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::core::tracker::PushOutcome;
use crate::core::webhook::{
    parse_push, verify_signature, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER,
};
use crate::domain::ports::job_ids;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(crate) fn outcome_body(outcome: PushOutcome) -> Value {
    match outcome {
        PushOutcome::Queued(jobs) => json!({
            "status": "queued",
            "jobs": job_ids(&jobs),
        }),
        PushOutcome::Ignored(reason) => json!({
            "status": "ignored",
            "reason": reason,
        }),
    }
}

/// `POST /webhooks/github`
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if let Some(secret) = state.tracker.webhook_secret() {
        verify_signature(secret, &body, header(&headers, SIGNATURE_HEADER))?;
    }

    let event = header(&headers, EVENT_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", EVENT_HEADER)))?;
    tracing::debug!(
        delivery = header(&headers, DELIVERY_HEADER).unwrap_or("-"),
        "Received '{}' event",
        event
    );

    match event {
        "ping" => Ok((StatusCode::OK, Json(json!({ "status": "pong" })))),
        "push" => {
            let outcome = match parse_push(&body)? {
                Some(push) => state.tracker.handle_push(push).await?,
                None => PushOutcome::Ignored("not a branch update".to_string()),
            };
            Ok((StatusCode::ACCEPTED, Json(outcome_body(outcome))))
        }
        other => Ok((
            StatusCode::ACCEPTED,
            Json(outcome_body(PushOutcome::Ignored(format!(
                "'{}' events are not handled",
                other
            )))),
        )),
    }
}
