//! GitHub webhook verification and push-event decoding.

use crate::domain::model::{is_commit_sha, Commit, ProjectId, PushEvent};
use crate::utils::error::{Result, TrackerError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

type HmacSha256 = Hmac<Sha256>;

fn signature_error(message: impl Into<String>) -> TrackerError {
    TrackerError::SignatureError {
        message: message.into(),
    }
}

/// `sha256=<hex>` signature GitHub sends for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| signature_error(e.to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks `header` against the HMAC of `body`; comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<()> {
    let header = header.ok_or_else(|| signature_error(format!("missing {}", SIGNATURE_HEADER)))?;
    let digest = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| signature_error("expected a sha256= signature"))?;
    let expected = hex::decode(digest).map_err(|_| signature_error("signature is not hex"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| signature_error(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| signature_error("signature mismatch"))
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
    head_commit: Option<HeadCommitPayload>,
    pusher: Option<PersonPayload>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    full_name: Option<String>,
    owner: OwnerPayload,
    clone_url: String,
    default_branch: Option<String>,
    master_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    login: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeadCommitPayload {
    #[serde(default)]
    message: String,
    timestamp: Option<String>,
    author: Option<PersonPayload>,
}

#[derive(Debug, Deserialize)]
struct PersonPayload {
    name: Option<String>,
    email: Option<String>,
}

impl PersonPayload {
    fn display(&self) -> String {
        match (&self.name, &self.email) {
            (Some(name), Some(email)) => format!("{} <{}>", name, email),
            (Some(name), None) => name.clone(),
            (None, Some(email)) => email.clone(),
            (None, None) => String::new(),
        }
    }
}

fn project_id(repository: &RepositoryPayload) -> Result<ProjectId> {
    let parsed = match &repository.full_name {
        Some(full_name) => full_name.parse(),
        None => {
            let owner = repository
                .owner
                .login
                .as_ref()
                .or(repository.owner.name.as_ref())
                .ok_or_else(|| TrackerError::WebhookError {
                    message: "repository owner missing from payload".to_string(),
                })?;
            ProjectId::checked(owner, &repository.name)
        }
    };
    parsed.map_err(|e| TrackerError::WebhookError {
        message: format!("bad repository in push payload: {}", e),
    })
}

/// Decodes a `push` delivery. Tag pushes and branch deletions yield `None`.
pub fn parse_push(body: &[u8]) -> Result<Option<PushEvent>> {
    let payload: PushPayload =
        serde_json::from_slice(body).map_err(|e| TrackerError::WebhookError {
            message: format!("malformed push payload: {}", e),
        })?;

    let Some(branch) = payload.git_ref.strip_prefix("refs/heads/") else {
        tracing::debug!("Ignoring push to {}", payload.git_ref);
        return Ok(None);
    };
    if payload.deleted || payload.after.chars().all(|c| c == '0') {
        tracing::debug!("Ignoring deletion of {}", branch);
        return Ok(None);
    }

    if !is_commit_sha(&payload.after) {
        return Err(TrackerError::WebhookError {
            message: format!("'{}' is not a commit id", payload.after),
        });
    }

    let project = project_id(&payload.repository)?;
    let head = payload.head_commit;
    let timestamp = head
        .as_ref()
        .and_then(|h| h.timestamp.as_deref())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let author = head
        .as_ref()
        .and_then(|h| h.author.as_ref())
        .map(PersonPayload::display)
        .unwrap_or_default();
    let message = head.map(|h| h.message).unwrap_or_default();

    let repository = payload.repository;
    let default_branch = repository
        .default_branch
        .or(repository.master_branch)
        .unwrap_or_else(|| "master".to_string());

    Ok(Some(PushEvent {
        project,
        clone_url: repository.clone_url,
        default_branch,
        commit: Commit {
            sha: payload.after,
            branch: branch.to_string(),
            message,
            author,
            timestamp,
        },
        pusher: payload.pusher.map(|p| p.display()).unwrap_or_default(),
    }))
}
