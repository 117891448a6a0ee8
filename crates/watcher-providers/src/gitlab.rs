//! GitLab `Provider`/`Reactor` implementation.
//!
//! Signature envelope: a plain shared token compared against `X-Gitlab-Token`
//! (spec §4.3.1, §6.2) — GitLab webhooks carry no HMAC, only a configured
//! secret token echoed verbatim.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;

use watcher_core::{
    should_drop, CommentHandle, EventHandler, FilterInput, LastComment, Metadata, NormalizedEvent,
    Provider, ProviderError, ProviderMetadata, Reactor, ReactorError, Resource, SignatureVerifier,
    WebhookRequest, POLL_ACTION,
};

use crate::http::PlatformHttp;
use crate::normalize::RawField;

pub struct GitlabConfig {
    pub base_url: String,
    pub token: String,
    pub webhook_secret: Option<String>,
    /// `"namespace/project"`, URL-encoded for the API path at call time.
    pub projects: Vec<String>,
    pub initial_lookback: Duration,
    pub note_lookback: usize,
    pub bot_identities: Vec<String>,
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com/api/v4".to_string(),
            token: String::new(),
            webhook_secret: None,
            projects: Vec::new(),
            initial_lookback: Duration::from_secs(3600),
            note_lookback: 5,
            bot_identities: Vec::new(),
        }
    }
}

#[derive(serde::Deserialize)]
struct ApiNote {
    body: String,
    author: ApiUser,
}

#[derive(serde::Deserialize)]
struct ApiUser {
    username: String,
}

pub struct GitlabProvider {
    config: GitlabConfig,
    http: PlatformHttp,
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl GitlabProvider {
    pub fn new(config: GitlabConfig) -> Self {
        Self {
            config,
            http: PlatformHttp::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn project_path(project: &str) -> String {
        urlencode(project)
    }

    async fn list_notes(&self, project: &str, iid: u64, kind: &str, limit: usize) -> Result<Vec<ApiNote>, ProviderError> {
        let url = format!(
            "{}/projects/{}/{kind}/{iid}/notes?per_page={limit}&order_by=created_at&sort=desc",
            self.config.base_url,
            Self::project_path(project)
        );
        let token = self.config.token.clone();
        self.http
            .send_typed::<Vec<ApiNote>>(|| {
                self.http.client().get(&url).header("PRIVATE-TOKEN", &token)
            })
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn list_updated(&self, project: &str, kind: &str, since: DateTime<Utc>) -> Result<Vec<Value>, ProviderError> {
        let url = format!(
            "{}/projects/{}/{kind}?updated_after={}&order_by=updated_at&sort=desc",
            self.config.base_url,
            Self::project_path(project),
            since.to_rfc3339()
        );
        let token = self.config.token.clone();
        self.http
            .send_typed::<Vec<Value>>(|| {
                self.http.client().get(&url).header("PRIVATE-TOKEN", &token)
            })
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }
}

const PROJECT_PATH_ENCODE_SET: &percent_encoding::AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn urlencode(s: &str) -> String {
    utf8_percent_encode(s, PROJECT_PATH_ENCODE_SET).to_string()
}

/// GitLab's `object_kind` is `"issue"` or `"merge_request"`; the mapped
/// attributes live under `object_attributes` rather than a top-level key
/// named after the kind.
fn normalize_gitlab_event(payload: &Value, polled: bool) -> Option<NormalizedEvent> {
    let object_kind = payload.get("object_kind")?.as_str()?;
    let kind = match object_kind {
        "issue" => "issue",
        "merge_request" => "merge_request",
        "note" => payload
            .get("object_attributes")
            .and_then(|a| a.get("noteable_type"))
            .and_then(|v| v.as_str())
            .map(|t| if t == "MergeRequest" { "merge_request" } else { "issue" })?,
        _ => return None,
    };

    let attrs = payload.get("object_attributes")?;
    let project = payload.get("project")?.get("path_with_namespace")?.as_str()?.to_string();
    let iid = attrs.get("iid")?.as_u64()?;
    let native_id = attrs.get("id").map(|v| v.to_string()).unwrap_or_default();
    let action = attrs
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or(object_kind)
        .to_string();

    let username = payload
        .get("user")
        .and_then(|u| u.get("username"))
        .and_then(|v| v.as_str())?
        .to_string();

    let comment = if object_kind == "note" {
        Some(watcher_core::Comment {
            body: attrs.get("note").and_then(RawField::as_str_owned).unwrap_or_default(),
            author: username.clone(),
            url: attrs.get("url").and_then(RawField::as_str_owned),
        })
    } else {
        None
    };

    let id = NormalizedEvent::build_id(
        "gitlab",
        &format!("{project}#{iid}"),
        &action,
        &native_id,
        &payload
            .get("event_uuid")
            .and_then(|v| v.as_str())
            .unwrap_or("na")
            .to_string(),
    );

    Some(NormalizedEvent {
        id,
        provider: "gitlab".to_string(),
        kind: kind.to_string(),
        action,
        resource: Resource {
            number: iid,
            title: attrs.get("title").and_then(RawField::as_str_owned).unwrap_or_default(),
            description: attrs.get("description").and_then(RawField::as_str_owned).unwrap_or_default(),
            url: attrs.get("url").and_then(RawField::as_str_owned).unwrap_or_default(),
            state: attrs.get("state").and_then(RawField::as_str_owned).unwrap_or_default(),
            repository: project,
            author: Some(username.clone()),
            assignees: Vec::new(),
            labels: payload
                .get("labels")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|l| l.get("title").and_then(RawField::as_str_owned))
                        .collect()
                })
                .unwrap_or_default(),
            branch: attrs.get("source_branch").and_then(RawField::as_str_owned),
            merge_to: attrs.get("target_branch").and_then(RawField::as_str_owned),
            comment,
        },
        actor: watcher_core::Actor {
            username,
            id: None,
        },
        metadata: Metadata {
            timestamp: chrono::Utc::now().to_rfc3339(),
            delivery_id: None,
            polled,
            extra: Default::default(),
        },
        raw: payload.clone(),
    })
}

#[async_trait]
impl Provider for GitlabProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "gitlab",
            resource_kinds: &["issue", "merge_request"],
        }
    }

    async fn init(&self) -> Result<(), ProviderError> {
        if self.config.webhook_secret.is_none() {
            tracing::warn!("gitlab provider has no webhook secret token configured");
        }
        Ok(())
    }

    async fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), ProviderError> {
        let Some(secret) = &self.config.webhook_secret else {
            return Ok(());
        };
        let header = request
            .header("X-Gitlab-Token")
            .ok_or_else(|| ProviderError::InvalidSignature("missing X-Gitlab-Token".into()))?;
        if !SignatureVerifier::verify_token(secret, header) {
            return Err(ProviderError::InvalidSignature("token mismatch".into()));
        }
        Ok(())
    }

    async fn handle_webhook(&self, request: WebhookRequest, emit: EventHandler) -> Result<(), ProviderError> {
        let Some(event) = normalize_gitlab_event(&request.body, false) else {
            tracing::debug!("unrecognized gitlab webhook payload; ignoring");
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

        let reactor: Arc<dyn Reactor> = Arc::new(GitlabReactor {
            http: self.http.clone(),
            base_url: self.config.base_url.clone(),
            token: self.config.token.clone(),
            project: event.resource.repository.clone(),
            iid: event.resource.number,
            kind: if event.kind == "merge_request" { "merge_requests" } else { "issues" }.to_string(),
            bot_identities: self.config.bot_identities.clone(),
        });

        emit(event, reactor).await;
        Ok(())
    }

    async fn poll(&self, emit: EventHandler) -> Result<(), ProviderError> {
        let now = Utc::now();
        for project in &self.config.projects {
            for kind in ["issues", "merge_requests"] {
                let since = {
                    let key = format!("{project}:{kind}");
                    let mut cursors = self.cursors.lock().expect("gitlab cursor lock poisoned");
                    *cursors.entry(key).or_insert_with(|| {
                        now - chrono::Duration::from_std(self.config.initial_lookback).unwrap()
                    })
                };

                let items = self.list_updated(project, kind, since).await?;
                for item in &items {
                    let Some(iid) = item.get("iid").and_then(|v| v.as_u64()) else {
                        continue;
                    };
                    let is_mr = kind == "merge_requests";

                    let has_activity = if is_mr {
                        self.list_notes(project, iid, kind, self.config.note_lookback)
                            .await
                            .map(|c| !c.is_empty())
                            .unwrap_or(true)
                    } else {
                        true
                    };

                    let payload = serde_json::json!({
                        "object_kind": if is_mr { "merge_request" } else { "issue" },
                        "object_attributes": item,
                        "project": { "path_with_namespace": project },
                        "user": { "username": item.get("author").and_then(|a| a.get("username")).cloned().unwrap_or(Value::Null) },
                    });

                    let Some(mut event) = normalize_gitlab_event(&payload, true) else {
                        continue;
                    };
                    event.action = POLL_ACTION.to_string();

                    let drop = should_drop(FilterInput {
                        kind: &event.kind,
                        action: &event.action,
                        state: &event.resource.state,
                        has_recent_human_activity: has_activity,
                    });
                    if drop {
                        continue;
                    }

                    let reactor: Arc<dyn Reactor> = Arc::new(GitlabReactor {
                        http: self.http.clone(),
                        base_url: self.config.base_url.clone(),
                        token: self.config.token.clone(),
                        project: project.clone(),
                        iid,
                        kind: kind.to_string(),
                        bot_identities: self.config.bot_identities.clone(),
                    });

                    emit(event, reactor).await;
                }

                let key = format!("{project}:{kind}");
                self.cursors.lock().expect("gitlab cursor lock poisoned").insert(key, now);
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {}
}

pub struct GitlabReactor {
    http: PlatformHttp,
    base_url: String,
    token: String,
    project: String,
    iid: u64,
    kind: String,
    pub bot_identities: Vec<String>,
}

#[async_trait]
impl Reactor for GitlabReactor {
    async fn last_comment(&self) -> Option<LastComment> {
        let url = format!(
            "{}/projects/{}/{}/{}/notes?per_page=1&order_by=created_at&sort=desc",
            self.base_url,
            GitlabProvider::project_path(&self.project),
            self.kind,
            self.iid
        );
        let token = self.token.clone();
        let result = self
            .http
            .send_typed::<Vec<ApiNote>>(|| self.http.client().get(&url).header("PRIVATE-TOKEN", &token))
            .await;
        match result {
            Ok(mut notes) => notes.pop().map(|n| LastComment {
                author: n.author.username,
                body: n.body,
            }),
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch last gitlab note");
                None
            }
        }
    }

    async fn post_comment(&self, body: &str) -> Result<CommentHandle, ReactorError> {
        let url = format!(
            "{}/projects/{}/{}/{}/notes",
            self.base_url,
            GitlabProvider::project_path(&self.project),
            self.kind,
            self.iid
        );
        let token = self.token.clone();
        let payload = serde_json::json!({ "body": body });
        let response = self
            .http
            .send_json(|| {
                self.http
                    .client()
                    .post(&url)
                    .header("PRIVATE-TOKEN", &token)
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
    fn normalizes_merge_request_note_event() {
        let payload = serde_json::json!({
            "object_kind": "note",
            "object_attributes": {
                "note": "please review",
                "noteable_type": "MergeRequest",
                "id": 5,
                "iid": 3,
                "url": "https://gitlab.example/o/r/-/merge_requests/3#note_5",
                "title": "t",
                "state": "opened",
                "source_branch": "feature",
                "target_branch": "main",
            },
            "project": { "path_with_namespace": "o/r" },
            "user": { "username": "bob" },
        });
        let event = normalize_gitlab_event(&payload, false).unwrap();
        assert_eq!(event.kind, "merge_request");
        assert_eq!(event.resource.comment.unwrap().body, "please review");
        assert_eq!(event.actor.username, "bob");
    }

    #[test]
    fn unknown_object_kind_yields_none() {
        let payload = serde_json::json!({ "object_kind": "pipeline" });
        assert!(normalize_gitlab_event(&payload, false).is_none());
    }

    #[test]
    fn url_encoding_escapes_project_path_slash() {
        assert_eq!(urlencode("o/r"), "o%2Fr");
    }

    #[test]
    fn url_encoding_is_byte_wise_for_non_ascii() {
        assert_eq!(urlencode("caf\u{e9}"), "caf%C3%A9");
    }
}
