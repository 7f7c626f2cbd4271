//! Thin wrapper over the parts of the GitHub v3 REST API the tracker needs.

use crate::adapters::http::ApiEndpoint;
use crate::domain::model::CommitState;
use crate::utils::error::{Result, TrackerError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const MAX_DESCRIPTION: usize = 140;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubUser {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubRepo {
    pub full_name: String,
    pub clone_url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
}

fn default_branch() -> String {
    "master".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub state: CommitState,
    pub target_url: Option<String>,
    pub description: String,
    pub context: String,
}

#[derive(Deserialize)]
struct ContentsResponse {
    encoding: String,
    content: String,
}

/// Result of asking GitHub to merge `head` into `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// SHA of the new merge commit.
    Merged(String),
    /// `base` already contains `head`.
    UpToDate,
    Conflict,
    /// `base` or `head` doesn't exist.
    Missing,
}

#[derive(Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug)]
pub struct GithubEndpoint {
    api: ApiEndpoint,
    user: OnceCell<GithubUser>,
}

impl GithubEndpoint {
    pub fn new(api_url: &str, token: Option<String>) -> Self {
        tracing::info!(
            "Created GitHub endpoint for {} ({})",
            api_url,
            if token.is_some() { "authenticated" } else { "anonymous" }
        );
        Self {
            api: ApiEndpoint::new(api_url, GITHUB_ACCEPT, token),
            user: OnceCell::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.api.has_token()
    }

    /// The authenticated user, fetched once.
    pub async fn user(&self) -> Result<&GithubUser> {
        self.user
            .get_or_try_init(|| async {
                let response = self.api.get("/user").await?.expect(&[200])?;
                response.json::<GithubUser>()
            })
            .await
    }

    /// Repositories owned by the authenticated user.
    pub async fn get_repos(&self) -> Result<Vec<GithubRepo>> {
        let login = self.user().await?.login.clone();
        tracing::info!("Fetching repos for {}", login);
        self.api
            .get(&format!("/users/{}/repos?per_page=100", login))
            .await?
            .expect(&[200])?
            .json()
    }

    /// Forks into `organisation`, or the authenticated user when `None`.
    /// GitHub creates the fork asynchronously.
    pub async fn fork(
        &self,
        owner: &str,
        repo: &str,
        organisation: Option<&str>,
    ) -> Result<GithubRepo> {
        let payload = match organisation {
            Some(org) => json!({ "organization": org }),
            None => json!({}),
        };
        let fork: GithubRepo = self
            .api
            .post(&format!("/repos/{}/{}/forks", owner, repo), &payload)
            .await?
            .expect(&[202])?
            .json()?;
        tracing::info!("Forking {}/{} to {}", owner, repo, fork.full_name);
        Ok(fork)
    }

    pub async fn get_repo(&self, owner: &str, repo: &str) -> Result<GithubRepo> {
        self.api
            .get(&format!("/repos/{}/{}", owner, repo))
            .await?
            .expect(&[200])?
            .json()
    }

    /// Decoded file contents at `git_ref`; `None` when the file doesn't exist.
    pub async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>> {
        let response = self
            .api
            .get(&format!(
                "/repos/{}/{}/contents/{}?ref={}",
                owner, repo, path, git_ref
            ))
            .await?;
        if response.status == 404 {
            return Ok(None);
        }

        let contents: ContentsResponse = response.expect(&[200])?.json()?;
        if contents.encoding != "base64" {
            return Err(TrackerError::ValidationError {
                message: format!(
                    "unexpected encoding '{}' for {}/{}/{}",
                    contents.encoding, owner, repo, path
                ),
            });
        }

        let packed: String = contents
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let decoded = STANDARD
            .decode(packed.as_bytes())
            .map_err(|e| TrackerError::ValidationError {
                message: format!("invalid base64 content for {}: {}", path, e),
            })?;
        Ok(Some(decoded))
    }

    /// SHA of the tip of `branch`, `None` if the branch is unknown.
    pub async fn get_head(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<String>> {
        let response = self
            .api
            .get(&format!("/repos/{}/{}/git/refs/heads/{}", owner, repo, branch))
            .await?;
        if response.status != 200 {
            return Ok(None);
        }
        let current: RefResponse = response.json()?;
        Ok(Some(current.object.sha))
    }

    /// Creates or replaces `path` on `branch`, committed as the authenticated user.
    pub async fn commit_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &[u8],
        message: &str,
        branch: &str,
    ) -> Result<()> {
        let resource = format!("/repos/{}/{}/contents/{}", owner, repo, path);
        let current = self
            .api
            .get(&format!("{}?ref={}", resource, branch))
            .await?;
        let existing = if current.status == 404 {
            None
        } else {
            Some(current.expect(&[200])?.json::<ShaResponse>()?.sha)
        };

        let user = self.user().await?;
        let mut payload = json!({
            "path": path,
            "message": message,
            "branch": branch,
            "content": STANDARD.encode(content),
        });
        if let Some(email) = &user.email {
            payload["committer"] = json!({
                "name": user.name.as_deref().unwrap_or(&user.login),
                "email": email,
            });
        }
        if let Some(sha) = &existing {
            payload["sha"] = json!(sha);
        }

        let expected: &[u16] = if existing.is_some() { &[200] } else { &[201] };
        self.api.put(&resource, &payload).await?.expect(expected)?;
        tracing::info!("Committed {} to {}/{}@{}", path, owner, repo, branch);
        Ok(())
    }

    /// Points `branch` at `sha`. Without `force` only fast-forwards succeed.
    pub async fn update_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<()> {
        self.api
            .patch(
                &format!("/repos/{}/{}/git/refs/heads/{}", owner, repo, branch),
                &json!({ "sha": sha, "force": force }),
            )
            .await?
            .expect(&[200])?;
        tracing::info!("Moved {}/{}@{} to {}", owner, repo, branch, sha);
        Ok(())
    }

    pub async fn merge(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
    ) -> Result<MergeOutcome> {
        let response = self
            .api
            .post(
                &format!("/repos/{}/{}/merges", owner, repo),
                &json!({ "base": base, "head": head }),
            )
            .await?;
        let outcome = match response.status {
            201 | 202 => MergeOutcome::Merged(response.json::<ShaResponse>()?.sha),
            204 => MergeOutcome::UpToDate,
            409 => MergeOutcome::Conflict,
            404 => MergeOutcome::Missing,
            status => {
                return Err(TrackerError::HttpStatusError {
                    endpoint: response.label,
                    status,
                    body: response.body,
                })
            }
        };
        tracing::info!("Merge {}/{} {} <- {}: {:?}", owner, repo, base, head, outcome);
        Ok(outcome)
    }

    pub async fn create_webhook(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
        secret: Option<&str>,
    ) -> Result<()> {
        let mut config = json!({
            "url": url,
            "content_type": "json",
        });
        if let Some(secret) = secret {
            config["secret"] = json!(secret);
        }
        let payload = json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": config,
        });

        self.api
            .post(&format!("/repos/{}/{}/hooks", owner, repo), &payload)
            .await?
            .expect(&[201])?;
        tracing::info!("Installed push webhook on {}/{} -> {}", owner, repo, url);
        Ok(())
    }

    pub async fn create_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &StatusUpdate,
    ) -> Result<()> {
        let mut payload = json!({
            "state": status.state,
            "description": truncate(&status.description, MAX_DESCRIPTION),
            "context": status.context,
        });
        if let Some(url) = &status.target_url {
            payload["target_url"] = json!(url);
        }

        self.api
            .post(&format!("/repos/{}/{}/statuses/{}", owner, repo, sha), &payload)
            .await?
            .expect(&[201])?;
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}
