//! GitHub `Provider`/`Reactor` implementation.
//!
//! Signature envelope: HMAC-prefix style (`X-Hub-Signature-256: sha256=<hex>`)
//! over the raw body, with `X-GitHub-Event` and `X-GitHub-Delivery` as the
//! required companion headers (spec §4.3.1, §6.2).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use watcher_core::{
    should_drop, CommentHandle, EventHandler, FilterInput, LastComment, Metadata, NormalizedEvent,
    Provider, ProviderError, ProviderMetadata, Reactor, ReactorError, Resource,
    SignatureEnvelope, SignatureVerifier, WebhookRequest, POLL_ACTION,
};

use crate::http::PlatformHttp;
use crate::normalize::{actor_of, comment_of, RawField};

pub struct GithubConfig {
    pub base_url: String,
    pub token: String,
    pub webhook_secret: Option<String>,
    pub repositories: Vec<String>,
    pub initial_lookback: Duration,
    pub comment_lookback: usize,
    pub bot_identities: Vec<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: String::new(),
            webhook_secret: None,
            repositories: Vec::new(),
            initial_lookback: Duration::from_secs(3600),
            comment_lookback: 5,
            bot_identities: Vec::new(),
        }
    }
}

#[derive(serde::Deserialize)]
struct ApiComment {
    body: String,
    user: ApiUser,
}

#[derive(serde::Deserialize)]
struct ApiUser {
    login: String,
}

pub struct GithubProvider {
    config: GithubConfig,
    http: PlatformHttp,
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl GithubProvider {
    pub fn new(config: GithubConfig) -> Self {
        Self {
            config,
            http: PlatformHttp::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.token)
    }

    async fn list_comments(
        &self,
        repository: &str,
        number: u64,
        limit: usize,
    ) -> Result<Vec<ApiComment>, ProviderError> {
        let url = format!(
            "{}/repos/{repository}/issues/{number}/comments?per_page={limit}",
            self.config.base_url
        );
        let token = self.auth_header();
        self.http
            .send_typed::<Vec<ApiComment>>(|| {
                self.http
                    .client()
                    .get(&url)
                    .header("Authorization", &token)
                    .header("User-Agent", "watcher")
            })
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn list_updated_issues(
        &self,
        repository: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>, ProviderError> {
        let url = format!(
            "{}/repos/{repository}/issues?state=all&sort=updated&direction=desc&since={}",
            self.config.base_url,
            since.to_rfc3339()
        );
        let token = self.auth_header();
        self.http
            .send_typed::<Vec<Value>>(|| {
                self.http
                    .client()
                    .get(&url)
                    .header("Authorization", &token)
                    .header("User-Agent", "watcher")
            })
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }
}

fn normalize_github_event(action: &str, payload: &Value, delivery_id: &str, polled: bool) -> Option<NormalizedEvent> {
    let issue = payload.get("issue").or_else(|| payload.get("pull_request"))?;
    let is_pr = payload.get("pull_request").is_some() || issue.get("pull_request").is_some();
    let repository = payload
        .get("repository")?
        .get("full_name")?
        .as_str()?
        .to_string();
    let number = issue.get("number")?.as_u64()?;
    let native_id = issue.get("id").map(|v| v.to_string()).unwrap_or_default();

    let comment = payload.get("comment").and_then(comment_of);
    let actor = actor_of(payload.get("sender"))?;

    let id = NormalizedEvent::build_id(
        "github",
        &format!("{repository}#{number}"),
        action,
        &native_id,
        delivery_id,
    );

    Some(NormalizedEvent {
        id,
        provider: "github".to_string(),
        kind: if is_pr { "pull_request".into() } else { "issue".into() },
        action: action.to_string(),
        resource: Resource {
            number,
            title: issue.get("title").and_then(RawField::as_str_owned).unwrap_or_default(),
            description: issue.get("body").and_then(RawField::as_str_owned).unwrap_or_default(),
            url: issue.get("html_url").and_then(RawField::as_str_owned).unwrap_or_default(),
            state: issue.get("state").and_then(RawField::as_str_owned).unwrap_or_default(),
            repository,
            author: issue
                .get("user")
                .and_then(|u| u.get("login"))
                .and_then(RawField::as_str_owned),
            assignees: issue
                .get("assignees")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a.get("login").and_then(RawField::as_str_owned))
                        .collect()
                })
                .unwrap_or_default(),
            labels: issue
                .get("labels")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|l| l.get("name").and_then(RawField::as_str_owned))
                        .collect()
                })
                .unwrap_or_default(),
            branch: issue
                .get("head")
                .and_then(|h| h.get("ref"))
                .and_then(RawField::as_str_owned),
            merge_to: issue
                .get("base")
                .and_then(|b| b.get("ref"))
                .and_then(RawField::as_str_owned),
            comment,
        },
        actor,
        metadata: Metadata {
            timestamp: chrono::Utc::now().to_rfc3339(),
            delivery_id: Some(delivery_id.to_string()),
            polled,
            extra: Default::default(),
        },
        raw: payload.clone(),
    })
}

#[async_trait]
impl Provider for GithubProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "github",
            resource_kinds: &["issue", "pull_request"],
        }
    }

    async fn init(&self) -> Result<(), ProviderError> {
        if self.config.webhook_secret.is_none() {
            tracing::warn!(
                "github provider has no webhook secret configured; accepting any request with required headers"
            );
        }
        Ok(())
    }

    async fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), ProviderError> {
        if request.header("X-GitHub-Event").is_none() || request.header("X-GitHub-Delivery").is_none() {
            return Err(ProviderError::Malformed(
                "missing X-GitHub-Event or X-GitHub-Delivery header".into(),
            ));
        }

        let Some(secret) = &self.config.webhook_secret else {
            return Ok(());
        };
        let signature = request
            .header("X-Hub-Signature-256")
            .ok_or_else(|| ProviderError::InvalidSignature("missing X-Hub-Signature-256".into()))?;
        if !SignatureVerifier::verify_hmac(SignatureEnvelope::HmacPrefixed, secret, &request.raw_body, signature) {
            return Err(ProviderError::InvalidSignature("signature mismatch".into()));
        }
        Ok(())
    }

    async fn handle_webhook(&self, request: WebhookRequest, emit: EventHandler) -> Result<(), ProviderError> {
        let event_type = request.header("X-GitHub-Event").unwrap_or("").to_string();
        let delivery_id = request.header("X-GitHub-Delivery").unwrap_or("").to_string();
        let action = request
            .body
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or(event_type.as_str())
            .to_string();

        let Some(event) = normalize_github_event(&action, &request.body, &delivery_id, false) else {
            tracing::debug!(event_type, "unrecognized github webhook payload; ignoring");
            return Ok(());
        };

        let drop = should_drop(FilterInput {
            kind: &event.kind,
            action: &event.action,
            state: &event.resource.state,
            has_recent_human_activity: true,
        });
        if drop {
            return Ok(());
        }

        let reactor: Arc<dyn Reactor> = Arc::new(GithubReactor {
            http: self.http.clone(),
            base_url: self.config.base_url.clone(),
            token: self.auth_header(),
            repository: event.resource.repository.clone(),
            number: event.resource.number,
            bot_identities: self.config.bot_identities.clone(),
        });

        emit(event, reactor).await;
        Ok(())
    }

    async fn poll(&self, emit: EventHandler) -> Result<(), ProviderError> {
        let now = Utc::now();
        for repository in &self.config.repositories {
            let since = {
                let mut cursors = self.cursors.lock().expect("github cursor lock poisoned");
                *cursors.entry(repository.clone()).or_insert_with(|| {
                    now - chrono::Duration::from_std(self.config.initial_lookback).unwrap()
                })
            };

            let items = self.list_updated_issues(repository, since).await?;

            for item in &items {
                let Some(number) = item.get("number").and_then(|v| v.as_u64()) else {
                    continue;
                };
                let is_pr = item.get("pull_request").is_some();

                let has_activity = if is_pr {
                    self.list_comments(repository, number, self.config.comment_lookback)
                        .await
                        .map(|c| !c.is_empty())
                        .unwrap_or(true)
                } else {
                    true
                };

                let mut payload = serde_json::Map::new();
                payload.insert("issue".to_string(), item.clone());
                payload.insert(
                    "repository".to_string(),
                    serde_json::json!({ "full_name": repository }),
                );
                payload.insert(
                    "sender".to_string(),
                    item.get("user").cloned().unwrap_or(Value::Null),
                );
                if is_pr {
                    payload.insert("pull_request".to_string(), item.clone());
                }

                let Some(event) = normalize_github_event(
                    POLL_ACTION,
                    &Value::Object(payload),
                    &format!("poll-{}", now.timestamp()),
                    true,
                ) else {
                    continue;
                };

                let drop = should_drop(FilterInput {
                    kind: &event.kind,
                    action: &event.action,
                    state: &event.resource.state,
                    has_recent_human_activity: has_activity,
                });
                if drop {
                    continue;
                }

                let reactor: Arc<dyn Reactor> = Arc::new(GithubReactor {
                    http: self.http.clone(),
                    base_url: self.config.base_url.clone(),
                    token: self.auth_header(),
                    repository: repository.clone(),
                    number,
                    bot_identities: self.config.bot_identities.clone(),
                });

                emit(event, reactor).await;
            }

            self.cursors
                .lock()
                .expect("github cursor lock poisoned")
                .insert(repository.clone(), now);
        }
        Ok(())
    }

    async fn shutdown(&self) {}
}

/// The only contract the dispatcher uses to interact with GitHub (spec §4.4).
pub struct GithubReactor {
    http: PlatformHttp,
    base_url: String,
    token: String,
    repository: String,
    number: u64,
    pub bot_identities: Vec<String>,
}

#[async_trait]
impl Reactor for GithubReactor {
    async fn last_comment(&self) -> Option<LastComment> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments?per_page=1&sort=created&direction=desc",
            self.base_url, self.repository, self.number
        );
        let token = self.token.clone();
        let result = self
            .http
            .send_typed::<Vec<ApiComment>>(|| {
                self.http
                    .client()
                    .get(&url)
                    .header("Authorization", &token)
                    .header("User-Agent", "watcher")
            })
            .await;
        match result {
            Ok(mut comments) => comments.pop().map(|c| LastComment {
                author: c.user.login,
                body: c.body,
            }),
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch last comment");
                None
            }
        }
    }

    async fn post_comment(&self, body: &str) -> Result<CommentHandle, ReactorError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_url, self.repository, self.number
        );
        let token = self.token.clone();
        let payload = serde_json::json!({ "body": body });
        let response = self
            .http
            .send_json(|| {
                self.http
                    .client()
                    .post(&url)
                    .header("Authorization", &token)
                    .header("User-Agent", "watcher")
                    .json(&payload)
            })
            .await
            .map_err(|e| ReactorError::PostFailed(e.to_string()))?;
        let id = response.get("id").map(|v| v.to_string()).unwrap_or_default();
        Ok(CommentHandle(id))
    }

    fn is_bot_author(&self, candidate: &str) -> bool {
        watcher_core::matches_bot_identity(&self.bot_identities, candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_issue_comment_event() {
        let payload = serde_json::json!({
            "action": "created",
            "issue": {
                "number": 42,
                "title": "Fix it",
                "body": "desc",
                "html_url": "https://github.com/o/r/issues/42",
                "state": "open",
                "id": 99,
                "user": { "login": "alice" },
            },
            "comment": { "body": "please look", "user": { "login": "bob" } },
            "repository": { "full_name": "o/r" },
            "sender": { "login": "bob", "id": 7 },
        });
        let event = normalize_github_event("created", &payload, "d1", false).unwrap();
        assert_eq!(event.kind, "issue");
        assert_eq!(event.resource.repository, "o/r");
        assert_eq!(event.resource.number, 42);
        assert_eq!(event.actor.username, "bob");
        assert_eq!(event.resource.comment.unwrap().body, "please look");
        assert_eq!(event.id, "github:o/r#42:created:99:d1");
    }

    #[test]
    fn missing_issue_and_pull_request_yields_none() {
        let payload = serde_json::json!({ "action": "created" });
        assert!(normalize_github_event("created", &payload, "d1", false).is_none());
    }

    #[test]
    fn pull_request_payload_is_classified_as_pull_request() {
        let payload = serde_json::json!({
            "action": "opened",
            "pull_request": {
                "number": 5,
                "title": "t",
                "body": "d",
                "html_url": "u",
                "state": "open",
                "id": 1,
                "user": { "login": "alice" },
                "head": { "ref": "feature" },
                "base": { "ref": "main" },
            },
            "repository": { "full_name": "o/r" },
            "sender": { "login": "alice" },
        });
        let event = normalize_github_event("opened", &payload, "d2", false).unwrap();
        assert_eq!(event.kind, "pull_request");
        assert_eq!(event.resource.branch.as_deref(), Some("feature"));
        assert_eq!(event.resource.merge_to.as_deref(), Some("main"));
    }
}
