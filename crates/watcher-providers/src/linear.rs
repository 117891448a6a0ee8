//! Linear `Provider`/`Reactor` implementation.
//!
//! Signature envelope: bare-hex HMAC-SHA256 over the raw body in the
//! `Linear-Signature` header, no prefix (spec §4.3.1, §6.2). Linear has no
//! REST API; every read and mutation goes through a single GraphQL endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use watcher_core::{
    should_drop, Actor, CommentHandle, EventHandler, FilterInput, LastComment, Metadata,
    NormalizedEvent, Provider, ProviderError, ProviderMetadata, Reactor, ReactorError, Resource,
    SignatureEnvelope, SignatureVerifier, WebhookRequest, POLL_ACTION,
};

use crate::http::PlatformHttp;
use crate::normalize::RawField;

const GRAPHQL_ENDPOINT: &str = "https://api.linear.app/graphql";

pub struct LinearConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    /// Team keys (e.g. `"ENG"`), the Linear analog of a repository container.
    pub teams: Vec<String>,
    pub initial_lookback: Duration,
    pub comment_lookback: usize,
    pub bot_identities: Vec<String>,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            webhook_secret: None,
            teams: Vec::new(),
            initial_lookback: Duration::from_secs(3600),
            comment_lookback: 5,
            bot_identities: Vec::new(),
        }
    }
}

pub struct LinearProvider {
    config: LinearConfig,
    http: PlatformHttp,
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl LinearProvider {
    pub fn new(config: LinearConfig) -> Self {
        Self {
            config,
            http: PlatformHttp::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ProviderError> {
        let key = self.config.api_key.clone();
        let body = serde_json::json!({ "query": query, "variables": variables });
        self.http
            .send_json(|| {
                self.http
                    .client()
                    .post(GRAPHQL_ENDPOINT)
                    .header("Authorization", &key)
                    .json(&body)
            })
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn list_updated_issues(&self, team_key: &str, since: DateTime<Utc>) -> Result<Vec<Value>, ProviderError> {
        let query = r#"
            query($teamKey: String!, $since: DateTimeOrDuration!) {
              issues(filter: { team: { key: { eq: $teamKey } }, updatedAt: { gt: $since } }, orderBy: updatedAt) {
                nodes {
                  id
                  identifier
                  title
                  description
                  url
                  state { name }
                  assignee { name }
                  creator { name }
                  labels { nodes { name } }
                }
              }
            }
        "#;
        let variables = serde_json::json!({ "teamKey": team_key, "since": since.to_rfc3339() });
        let response = self.graphql(query, variables).await?;
        Ok(response
            .get("data")
            .and_then(|d| d.get("issues"))
            .and_then(|i| i.get("nodes"))
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default())
    }

    async fn list_comments(&self, issue_id: &str, limit: usize) -> Result<Vec<LinearComment>, ProviderError> {
        let query = r#"
            query($issueId: String!) {
              issue(id: $issueId) {
                comments(last: 50, orderBy: createdAt) {
                  nodes { body user { name } }
                }
              }
            }
        "#;
        let response = self
            .graphql(query, serde_json::json!({ "issueId": issue_id }))
            .await?;
        let nodes = response
            .get("data")
            .and_then(|d| d.get("issue"))
            .and_then(|i| i.get("comments"))
            .and_then(|c| c.get("nodes"))
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(nodes
            .into_iter()
            .rev()
            .take(limit)
            .filter_map(|n| {
                Some(LinearComment {
                    body: n.get("body")?.as_str()?.to_string(),
                    author: n.get("user").and_then(|u| u.get("name")).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

}

struct LinearComment {
    body: String,
    author: String,
}

fn labels_of(issue: &Value) -> Vec<String> {
    issue
        .get("labels")
        .and_then(|l| l.get("nodes"))
        .and_then(|n| n.as_array())
        .map(|arr| arr.iter().filter_map(|l| l.get("name").and_then(RawField::as_str_owned)).collect())
        .unwrap_or_default()
}

fn issue_to_resource(issue: &Value, comment: Option<watcher_core::Comment>) -> Option<Resource> {
    Some(Resource {
        number: 0,
        title: issue.get("title").and_then(RawField::as_str_owned).unwrap_or_default(),
        description: issue.get("description").and_then(RawField::as_str_owned).unwrap_or_default(),
        url: issue.get("url").and_then(RawField::as_str_owned).unwrap_or_default(),
        state: issue
            .get("state")
            .and_then(|s| s.get("name"))
            .and_then(RawField::as_str_owned)
            .unwrap_or_default(),
        repository: issue.get("identifier").and_then(RawField::as_str_owned)?,
        author: issue.get("creator").and_then(|c| c.get("name")).and_then(RawField::as_str_owned),
        assignees: issue
            .get("assignee")
            .and_then(|a| a.get("name"))
            .and_then(RawField::as_str_owned)
            .into_iter()
            .collect(),
        labels: labels_of(issue),
        branch: None,
        merge_to: None,
        comment,
    })
}

/// Linear's webhook action is `"create"`/`"update"`/`"remove"`; its `type` is
/// `"Issue"` or `"Comment"`. `should_drop`'s `(kind, action, state)` contract
/// wants a stable action vocabulary, so comment creation is remapped to
/// `"commented"` and issue creation to `"opened"`.
fn normalize_linear_event(payload: &Value, polled: bool) -> Option<NormalizedEvent> {
    let action_raw = payload.get("action")?.as_str()?;
    let entity_type = payload.get("type")?.as_str()?;
    let data = payload.get("data")?;

    let (issue, comment, action): (Value, Option<watcher_core::Comment>, String) = match entity_type {
        "Issue" => {
            let action = match action_raw {
                "create" => "opened",
                "remove" => "deleted",
                other => other,
            };
            (data.clone(), None, action.to_string())
        }
        "Comment" => {
            let issue = data.get("issue")?.clone();
            let author = data
                .get("user")
                .and_then(|u| u.get("name"))
                .and_then(RawField::as_str_owned)
                .unwrap_or_default();
            let comment = watcher_core::Comment {
                body: data.get("body").and_then(RawField::as_str_owned).unwrap_or_default(),
                author,
                url: None,
            };
            (issue, Some(comment), "commented".to_string())
        }
        _ => return None,
    };

    let identifier = issue.get("identifier")?.as_str()?.to_string();
    let native_id = issue.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let actor_name = if let Some(c) = &comment {
        c.author.clone()
    } else {
        issue.get("creator").and_then(|c| c.get("name")).and_then(RawField::as_str_owned).unwrap_or_default()
    };

    let id = NormalizedEvent::build_id("linear", &identifier, &action, &native_id, &chrono::Utc::now().timestamp().to_string());
    let resource = issue_to_resource(&issue, comment)?;

    Some(NormalizedEvent {
        id,
        provider: "linear".to_string(),
        kind: "issue".to_string(),
        action,
        resource,
        actor: Actor { username: actor_name, id: None },
        metadata: Metadata {
            timestamp: chrono::Utc::now().to_rfc3339(),
            delivery_id: payload.get("webhookId").and_then(RawField::as_str_owned),
            polled,
            extra: Default::default(),
        },
        raw: payload.clone(),
    })
}

#[async_trait]
impl Provider for LinearProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "linear",
            resource_kinds: &["issue"],
        }
    }

    async fn init(&self) -> Result<(), ProviderError> {
        if self.config.webhook_secret.is_none() {
            tracing::warn!("linear provider has no webhook secret configured");
        }
        Ok(())
    }

    async fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), ProviderError> {
        let Some(secret) = &self.config.webhook_secret else {
            return Ok(());
        };
        let signature = request
            .header("Linear-Signature")
            .ok_or_else(|| ProviderError::InvalidSignature("missing Linear-Signature".into()))?;
        if !SignatureVerifier::verify_hmac(SignatureEnvelope::HmacBareHex, secret, &request.raw_body, signature) {
            return Err(ProviderError::InvalidSignature("signature mismatch".into()));
        }
        Ok(())
    }

    async fn handle_webhook(&self, request: WebhookRequest, emit: EventHandler) -> Result<(), ProviderError> {
        let Some(event) = normalize_linear_event(&request.body, false) else {
            tracing::debug!("unrecognized linear webhook payload; ignoring");
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

        let issue_native_id = request
            .body
            .get("data")
            .and_then(|d| d.get("issue").or(Some(d)))
            .and_then(|i| i.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let reactor: Arc<dyn Reactor> = Arc::new(LinearReactor {
            http: self.http.clone(),
            api_key: self.config.api_key.clone(),
            issue_id: issue_native_id,
            bot_identities: self.config.bot_identities.clone(),
        });

        emit(event, reactor).await;
        Ok(())
    }

    async fn poll(&self, emit: EventHandler) -> Result<(), ProviderError> {
        let now = Utc::now();
        for team in &self.config.teams {
            let since = {
                let mut cursors = self.cursors.lock().expect("linear cursor lock poisoned");
                *cursors.entry(team.clone()).or_insert_with(|| {
                    now - chrono::Duration::from_std(self.config.initial_lookback).unwrap()
                })
            };

            let issues = self.list_updated_issues(team, since).await?;
            for issue in &issues {
                let issue_id = issue.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let has_activity = self
                    .list_comments(&issue_id, self.config.comment_lookback)
                    .await
                    .map(|c| !c.is_empty())
                    .unwrap_or(true);

                let payload = serde_json::json!({
                    "action": "update",
                    "type": "Issue",
                    "data": issue,
                });
                let Some(mut event) = normalize_linear_event(&payload, true) else {
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

                let reactor: Arc<dyn Reactor> = Arc::new(LinearReactor {
                    http: self.http.clone(),
                    api_key: self.config.api_key.clone(),
                    issue_id: issue_id.clone(),
                    bot_identities: self.config.bot_identities.clone(),
                });

                emit(event, reactor).await;
            }

            self.cursors.lock().expect("linear cursor lock poisoned").insert(team.clone(), now);
        }
        Ok(())
    }

    async fn shutdown(&self) {}
}

pub struct LinearReactor {
    http: PlatformHttp,
    api_key: String,
    issue_id: String,
    pub bot_identities: Vec<String>,
}

impl LinearReactor {
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ProviderError> {
        let key = self.api_key.clone();
        let body = serde_json::json!({ "query": query, "variables": variables });
        self.http
            .send_json(|| {
                self.http
                    .client()
                    .post(GRAPHQL_ENDPOINT)
                    .header("Authorization", &key)
                    .json(&body)
            })
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Reactor for LinearReactor {
    async fn last_comment(&self) -> Option<LastComment> {
        let query = r#"
            query($issueId: String!) {
              issue(id: $issueId) {
                comments(last: 1, orderBy: createdAt) {
                  nodes { body user { name } }
                }
              }
            }
        "#;
        let result = self
            .graphql(query, serde_json::json!({ "issueId": self.issue_id }))
            .await;
        match result {
            Ok(response) => {
                let nodes = response
                    .get("data")
                    .and_then(|d| d.get("issue"))
                    .and_then(|i| i.get("comments"))
                    .and_then(|c| c.get("nodes"))
                    .and_then(|v| v.as_array());
                match nodes.and_then(|n| n.last()) {
                    Some(last) => Some(LastComment {
                        author: last.get("user").and_then(|u| u.get("name")).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        body: last.get("body").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    }),
                    None => {
                        tracing::warn!(response = %response, "unexpected linear comments response shape");
                        None
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch last linear comment");
                None
            }
        }
    }

    async fn post_comment(&self, body: &str) -> Result<CommentHandle, ReactorError> {
        let mutation = r#"
            mutation($issueId: String!, $body: String!) {
              commentCreate(input: { issueId: $issueId, body: $body }) {
                success
                comment { id }
              }
            }
        "#;
        let response = self
            .graphql(mutation, serde_json::json!({ "issueId": self.issue_id, "body": body }))
            .await
            .map_err(|e| ReactorError::PostFailed(e.to_string()))?;
        let id = response
            .get("data")
            .and_then(|d| d.get("commentCreate"))
            .and_then(|c| c.get("comment"))
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(CommentHandle(id))
    }

    fn is_bot_author(&self, candidate: &str) -> bool {
        watcher_core::matches_bot_identity(&self.bot_identities, candidate)
    }
}
