use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route("/repos", get(handlers::list_repos))
        .route("/projects/:owner/:repo", get(handlers::get_project))
        .route("/projects/:owner/:repo/builds", post(handlers::trigger_build))
        .route("/projects/:owner/:repo/jobs", get(handlers::list_jobs))
        .route(
            "/projects/:owner/:repo/commits/:sha",
            get(handlers::commit_jobs),
        )
        .route(
            "/projects/:owner/:repo/history.csv",
            get(handlers::history_csv),
        )
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/artifacts", get(handlers::get_artifacts));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/webhooks/github", post(handlers::github_webhook))
        .route("/badge/:owner/:repo", get(handlers::badge))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
