use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::core::report::{badge_status, render_svg, shields_endpoint};
use crate::domain::model::ProjectId;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

const DEFAULT_LABEL: &str = "opencorps";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeFormat {
    #[default]
    Svg,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct BadgeQuery {
    pub branch: Option<String>,
    pub workflow: Option<String>,
    #[serde(default)]
    pub format: BadgeFormat,
}

/// `GET /badge/:owner/:repo`. Unknown projects get an `unknown` badge.
pub async fn badge(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<BadgeQuery>,
) -> ApiResult<Response> {
    let id = ProjectId::checked(&owner, &repo)?;
    let latest = match state.store.get_project(&id).await? {
        Some(project) => {
            let branch = query.branch.as_deref().unwrap_or(&project.default_branch);
            state
                .store
                .latest_for_branch(&id, branch, query.workflow.as_deref())
                .await?
        }
        None => Vec::new(),
    };

    let status = badge_status(&latest);
    let label = query.workflow.as_deref().unwrap_or(DEFAULT_LABEL);
    let response = match query.format {
        BadgeFormat::Json => Json(shields_endpoint(label, status)).into_response(),
        BadgeFormat::Svg => (
            [
                (header::CONTENT_TYPE, "image/svg+xml"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            render_svg(label, status.message(), status.color()),
        )
            .into_response(),
    };
    Ok(response)
}
