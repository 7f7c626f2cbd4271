use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use httpmock::prelude::*;
use httpmock::Method::PATCH;
use opencorps::adapters::github::{GithubEndpoint, MergeOutcome, StatusUpdate};
use opencorps::domain::model::CommitState;
use opencorps::TrackerError;
use serde_json::json;

const SHA: &str = "6dcb09b5b57875f334f61aebed695e2e4193db5e";

#[tokio::test]
async fn test_get_file_decodes_base64_content() {
    let server = MockServer::start_async().await;
    let yaml = "workflows:\n  - name: sim\n    tool: cocotb\n";
    // GitHub wraps base64 content at 60 columns.
    let encoded = STANDARD.encode(yaml);
    let wrapped = format!("{}\n{}", &encoded[..20], &encoded[20..]);

    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/acme/uart/contents/.opencorps.yml")
                .query_param("ref", SHA)
                .header("authorization", "token t0ken")
                .header("accept", "application/vnd.github.v3+json");
            then.status(200).json_body(json!({
                "type": "file",
                "encoding": "base64",
                "content": wrapped,
            }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    let content = github
        .get_file("acme", "uart", ".opencorps.yml", SHA)
        .await
        .unwrap()
        .unwrap();

    mock.assert_async().await;
    assert_eq!(String::from_utf8(content).unwrap(), yaml);
}

#[tokio::test]
async fn test_missing_file_is_none() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart/contents/.opencorps.yml");
            then.status(404).json_body(json!({ "message": "Not Found" }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), None);
    let content = github
        .get_file("acme", "uart", ".opencorps.yml", SHA)
        .await
        .unwrap();
    assert!(content.is_none());
}

#[tokio::test]
async fn test_get_repo_and_head() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart");
            then.status(200).json_body(json!({
                "full_name": "acme/uart",
                "clone_url": "https://github.com/acme/uart.git",
                "default_branch": "main",
                "private": false,
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart/git/refs/heads/main");
            then.status(200).json_body(json!({
                "ref": "refs/heads/main",
                "object": { "sha": SHA, "type": "commit" },
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart/git/refs/heads/gone");
            then.status(404);
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), None);

    let repo = github.get_repo("acme", "uart").await.unwrap();
    assert_eq!(repo.default_branch, "main");
    assert_eq!(repo.clone_url, "https://github.com/acme/uart.git");

    assert_eq!(
        github.get_head("acme", "uart", "main").await.unwrap().as_deref(),
        Some(SHA)
    );
    assert!(github.get_head("acme", "uart", "gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_repo_error_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/private");
            then.status(403).body("forbidden");
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), None);
    let err = github.get_repo("acme", "private").await.unwrap_err();
    match err {
        TrackerError::HttpStatusError { status, .. } => assert_eq!(status, 403),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_create_webhook_and_status() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/repos/acme/uart/hooks")
                .header("content-type", "application/json")
                .json_body(json!({
                    "name": "web",
                    "active": true,
                    "events": ["push"],
                    "config": {
                        "url": "https://ci.example.org/webhooks/github",
                        "content_type": "json",
                        "secret": "s3cret",
                    },
                }));
            then.status(201).json_body(json!({ "id": 1 }));
        })
        .await;
    let status = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/repos/acme/uart/statuses/{}", SHA))
                .json_body(json!({
                    "state": "failure",
                    "description": "failed: 3 of 12 tests",
                    "context": "opencorps/sim",
                    "target_url": "https://ci.example.org/api/v1/jobs/1",
                }));
            then.status(201).json_body(json!({ "id": 2 }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    github
        .create_webhook(
            "acme",
            "uart",
            "https://ci.example.org/webhooks/github",
            Some("s3cret"),
        )
        .await
        .unwrap();
    github
        .create_status(
            "acme",
            "uart",
            SHA,
            &StatusUpdate {
                state: CommitState::Failure,
                target_url: Some("https://ci.example.org/api/v1/jobs/1".to_string()),
                description: "failed: 3 of 12 tests".to_string(),
                context: "opencorps/sim".to_string(),
            },
        )
        .await
        .unwrap();

    hook.assert_async().await;
    status.assert_async().await;
}

#[tokio::test]
async fn test_user_is_fetched_once() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200)
                .json_body(json!({ "login": "opencorps-bot", "name": null, "email": null }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    assert_eq!(github.user().await.unwrap().login, "opencorps-bot");
    assert_eq!(github.user().await.unwrap().login, "opencorps-bot");
    mock.assert_hits_async(1).await;
}

async fn mock_user(server: &MockServer, email: Option<&str>) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/user");
            then.status(200)
                .json_body(json!({ "login": "opencorps-bot", "name": "OpenCorps", "email": email }));
        })
        .await;
}

#[tokio::test]
async fn test_get_repos_of_token_user() {
    let server = MockServer::start_async().await;
    mock_user(&server, None).await;
    let repos = server
        .mock_async(|when, then| {
            when.method(GET).path("/users/opencorps-bot/repos");
            then.status(200).json_body(json!([
                {
                    "full_name": "opencorps-bot/uart",
                    "clone_url": "https://github.com/opencorps-bot/uart.git",
                    "default_branch": "main",
                },
                {
                    "full_name": "opencorps-bot/spi",
                    "clone_url": "https://github.com/opencorps-bot/spi.git",
                    "private": true,
                },
            ]));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    let list = github.get_repos().await.unwrap();

    repos.assert_async().await;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].default_branch, "main");
    assert_eq!(list[1].default_branch, "master");
    assert!(list[1].private);
}

#[tokio::test]
async fn test_fork_into_organisation() {
    let server = MockServer::start_async().await;
    let fork = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/repos/acme/uart/forks")
                .json_body(json!({ "organization": "opencorps" }));
            then.status(202).json_body(json!({
                "full_name": "opencorps/uart",
                "clone_url": "https://github.com/opencorps/uart.git",
                "default_branch": "master",
            }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    let repo = github.fork("acme", "uart", Some("opencorps")).await.unwrap();

    fork.assert_async().await;
    assert_eq!(repo.full_name, "opencorps/uart");
}

#[tokio::test]
async fn test_commit_new_file() {
    let server = MockServer::start_async().await;
    mock_user(&server, Some("bot@opencorps.org")).await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/acme/uart/contents/.opencorps.yml")
                .query_param("ref", "develop");
            then.status(404);
        })
        .await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/repos/acme/uart/contents/.opencorps.yml")
                .json_body(json!({
                    "path": ".opencorps.yml",
                    "message": "Add regression config",
                    "branch": "develop",
                    "content": STANDARD.encode("workflows: []\n"),
                    "committer": { "name": "OpenCorps", "email": "bot@opencorps.org" },
                }));
            then.status(201).json_body(json!({ "content": {} }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    github
        .commit_file(
            "acme",
            "uart",
            ".opencorps.yml",
            b"workflows: []\n",
            "Add regression config",
            "develop",
        )
        .await
        .unwrap();
    put.assert_async().await;
}

#[tokio::test]
async fn test_commit_replaces_existing_file() {
    let server = MockServer::start_async().await;
    mock_user(&server, None).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/acme/uart/contents/README.md");
            then.status(200).json_body(json!({
                "sha": "95b966ae1c166bd92f8ae7d1c313e738c731dfc3",
                "encoding": "base64",
                "content": "",
            }));
        })
        .await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/repos/acme/uart/contents/README.md")
                .json_body_partial(
                    json!({ "sha": "95b966ae1c166bd92f8ae7d1c313e738c731dfc3" }).to_string(),
                );
            then.status(200).json_body(json!({ "content": {} }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    github
        .commit_file("acme", "uart", "README.md", b"# uart\n", "Badge", "master")
        .await
        .unwrap();
    put.assert_async().await;
}

#[tokio::test]
async fn test_update_branch() {
    let server = MockServer::start_async().await;
    let moved = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/repos/acme/uart/git/refs/heads/master")
                .json_body(json!({ "sha": SHA, "force": false }));
            then.status(200).json_body(json!({ "object": { "sha": SHA } }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(PATCH).path("/repos/acme/uart/git/refs/heads/release");
            then.status(422).json_body(json!({ "message": "Update is not a fast forward" }));
        })
        .await;

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    github
        .update_branch("acme", "uart", "master", SHA, false)
        .await
        .unwrap();
    moved.assert_async().await;

    let err = github
        .update_branch("acme", "uart", "release", SHA, false)
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::HttpStatusError { status: 422, .. }));
}

#[tokio::test]
async fn test_merge_outcomes() {
    let server = MockServer::start_async().await;
    for (base, status) in [("master", 201), ("current", 204), ("conflicted", 409), ("gone", 404), ("locked", 403)] {
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/acme/uart/merges")
                    .json_body(json!({ "base": base, "head": SHA }));
                if status == 201 {
                    then.status(201).json_body(json!({ "sha": "1111111111111111111111111111111111111111" }));
                } else {
                    then.status(status);
                }
            })
            .await;
    }

    let github = GithubEndpoint::new(&server.base_url(), Some("t0ken".to_string()));
    assert_eq!(
        github.merge("acme", "uart", SHA, "master").await.unwrap(),
        MergeOutcome::Merged("1111111111111111111111111111111111111111".to_string())
    );
    assert_eq!(
        github.merge("acme", "uart", SHA, "current").await.unwrap(),
        MergeOutcome::UpToDate
    );
    assert_eq!(
        github.merge("acme", "uart", SHA, "conflicted").await.unwrap(),
        MergeOutcome::Conflict
    );
    assert_eq!(
        github.merge("acme", "uart", SHA, "gone").await.unwrap(),
        MergeOutcome::Missing
    );
    assert!(github.merge("acme", "uart", SHA, "locked").await.is_err());
}
