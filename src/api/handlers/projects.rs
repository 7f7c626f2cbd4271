use super::webhook::outcome_body;
use crate::api::error::{ApiError, ApiResult};
use crate::adapters::github::GithubRepo;
use crate::api::state::AppState;
use crate::core::history;
use crate::core::report::badge_status;
use crate::domain::model::{BadgeStatus, Job, Project, ProjectId};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_JOB_LIMIT: usize = 50;
pub const MAX_JOB_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    /// `owner/repo`
    pub repository: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BuildRequest {
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub status: BadgeStatus,
    pub latest: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct RepoView {
    #[serde(flatten)]
    pub repo: GithubRepo,
    pub registered: bool,
}

pub(crate) async fn require_project(state: &AppState, owner: String, repo: String) -> ApiResult<Project> {
    let id = ProjectId::checked(&owner, &repo)?;
    state
        .store
        .get_project(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project {} not found", id)))
}

pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.store.list_projects().await?))
}

/// `GET /api/v1/repos`: the token user's GitHub repositories.
pub async fn list_repos(State(state): State<AppState>) -> ApiResult<Json<Vec<RepoView>>> {
    let repos = state.tracker.registrable_repos().await?;
    let mut views = Vec::with_capacity(repos.len());
    for repo in repos {
        let registered = match repo.full_name.parse::<ProjectId>() {
            Ok(id) => state.store.get_project(&id).await?.is_some(),
            Err(_) => false,
        };
        views.push(RepoView { repo, registered });
    }
    Ok(Json(views))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let id: ProjectId = request.repository.parse()?;
    let project = state.tracker.register_project(&id).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> ApiResult<Json<ProjectView>> {
    let project = require_project(&state, owner, repo).await?;
    let latest = state
        .store
        .latest_for_branch(&project.id, &project.default_branch, None)
        .await?;
    Ok(Json(ProjectView {
        status: badge_status(&latest),
        project,
        latest,
    }))
}

pub async fn trigger_build(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    request: Option<Json<BuildRequest>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let id = ProjectId::checked(&owner, &repo)?;
    let outcome = state
        .tracker
        .trigger_build(&id, request.branch.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(outcome_body(outcome))))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let project = require_project(&state, owner, repo).await?;
    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
    Ok(Json(state.store.list_jobs(&project.id, limit).await?))
}

pub async fn commit_jobs(
    State(state): State<AppState>,
    Path((owner, repo, sha)): Path<(String, String, String)>,
) -> ApiResult<Json<Vec<Job>>> {
    let project = require_project(&state, owner, repo).await?;
    Ok(Json(state.store.jobs_for_commit(&project.id, &sha).await?))
}

pub async fn history_csv(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> ApiResult<Response> {
    let project = require_project(&state, owner, repo).await?;
    let jobs = state.store.list_jobs(&project.id, usize::MAX).await?;
    let csv = history::history_csv(&jobs)?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
}
