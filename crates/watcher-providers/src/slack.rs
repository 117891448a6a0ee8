//! Slack `Provider`/`Reactor` implementation.
//!
//! Signature envelope: the replay-guarded `v0=` scheme over
//! `"v0:{timestamp}:{rawBody}"`, verified against `X-Slack-Signature` and
//! `X-Slack-Request-Timestamp` (spec §4.3.1, §6.2). Slack is messaging, not a
//! code-forge/issue-tracker platform, so actionability additionally requires
//! the inner event type to be `app_mention` (spec §4.3.2, `should_drop_messaging`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use watcher_core::{
    should_drop_messaging, Actor, CommentHandle, Comment, EventHandler, LastComment, Metadata,
    NormalizedEvent, Provider, ProviderError, ProviderMetadata, Reactor, ReactorError, Resource,
    SignatureVerifier, WebhookRequest, POLL_ACTION,
};

use crate::http::PlatformHttp;

const SLACK_API: &str = "https://slack.com/api";

pub struct SlackConfig {
    pub bot_token: String,
    pub signing_secret: Option<String>,
    pub channels: Vec<String>,
    /// Own bot user/app id, used so `is_bot_author` recognizes its own posts
    /// without requiring an explicit `botUsername` entry.
    pub bot_user_id: Option<String>,
    pub initial_lookback: Duration,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            signing_secret: None,
            channels: Vec::new(),
            bot_user_id: None,
            initial_lookback: Duration::from_secs(3600),
        }
    }
}

pub struct SlackProvider {
    config: SlackConfig,
    http: PlatformHttp,
    cursors: Mutex<HashMap<String, f64>>,
}

impl SlackProvider {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            http: PlatformHttp::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    async fn history(&self, channel: &str, oldest: f64) -> Result<Vec<Value>, ProviderError> {
        let url = format!("{SLACK_API}/conversations.history?channel={channel}&oldest={oldest}");
        let token = self.config.bot_token.clone();
        let response = self
            .http
            .send_json(|| self.http.client().get(&url).bearer_auth(&token))
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if response.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(ProviderError::UnexpectedResponse(format!("{response}")));
        }
        Ok(response.get("messages").and_then(|m| m.as_array()).cloned().unwrap_or_default())
    }
}

fn normalize_slack_message(channel: &str, message: &Value, polled: bool) -> Option<NormalizedEvent> {
    let ts = message.get("ts")?.as_str()?.to_string();
    let text = message.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let user = message.get("user").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let id = NormalizedEvent::build_id("slack", channel, "message", &ts, &ts);

    Some(NormalizedEvent {
        id,
        provider: "slack".to_string(),
        kind: "message".to_string(),
        action: if polled { POLL_ACTION.to_string() } else { "message".to_string() },
        resource: Resource {
            number: 0,
            title: String::new(),
            description: String::new(),
            url: String::new(),
            state: "open".to_string(),
            repository: channel.to_string(),
            author: Some(user.clone()),
            assignees: Vec::new(),
            labels: Vec::new(),
            branch: None,
            merge_to: None,
            comment: Some(Comment {
                body: text,
                author: user.clone(),
                url: None,
            }),
        },
        actor: Actor { username: user, id: None },
        metadata: Metadata {
            timestamp: chrono::Utc::now().to_rfc3339(),
            delivery_id: Some(ts),
            polled,
            extra: Default::default(),
        },
        raw: message.clone(),
    })
}

#[async_trait]
impl Provider for SlackProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "slack",
            resource_kinds: &["message"],
        }
    }

    async fn init(&self) -> Result<(), ProviderError> {
        if self.config.signing_secret.is_none() {
            tracing::warn!("slack provider has no signing secret configured");
        }
        Ok(())
    }

    async fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), ProviderError> {
        let Some(secret) = &self.config.signing_secret else {
            return Ok(());
        };
        let timestamp = request
            .header("X-Slack-Request-Timestamp")
            .ok_or_else(|| ProviderError::InvalidSignature("missing X-Slack-Request-Timestamp".into()))?;
        let signature = request
            .header("X-Slack-Signature")
            .ok_or_else(|| ProviderError::InvalidSignature("missing X-Slack-Signature".into()))?;
        let now = Utc::now().timestamp();
        if !SignatureVerifier::verify_replay_guarded(secret, &request.raw_body, timestamp, signature, now) {
            return Err(ProviderError::InvalidSignature("signature mismatch or stale timestamp".into()));
        }
        Ok(())
    }

    async fn handle_webhook(&self, request: WebhookRequest, emit: EventHandler) -> Result<(), ProviderError> {
        if request.body.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
            return Ok(());
        }

        let Some(event) = request.body.get("event") else {
            return Ok(());
        };
        let inner_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if should_drop_messaging(inner_type) {
            return Ok(());
        }

        let channel = event.get("channel").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let Some(normalized) = normalize_slack_message(&channel, event, false) else {
            return Ok(());
        };

        let thread_ts = event
            .get("thread_ts")
            .and_then(|v| v.as_str())
            .or_else(|| event.get("ts").and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string();

        let reactor: Arc<dyn Reactor> = Arc::new(SlackReactor {
            http: self.http.clone(),
            token: self.config.bot_token.clone(),
            channel,
            thread_ts,
            bot_identities: self
                .config
                .bot_user_id
                .clone()
                .into_iter()
                .collect(),
        });

        emit(normalized, reactor).await;
        Ok(())
    }

    async fn poll(&self, emit: EventHandler) -> Result<(), ProviderError> {
        let now = Utc::now().timestamp() as f64;
        for channel in &self.config.channels {
            let oldest = {
                let mut cursors = self.cursors.lock().expect("slack cursor lock poisoned");
                *cursors
                    .entry(channel.clone())
                    .or_insert_with(|| now - self.config.initial_lookback.as_secs_f64())
            };

            let messages = self.history(channel, oldest).await?;
            for message in &messages {
                let Some(event) = normalize_slack_message(channel, message, true) else {
                    continue;
                };
                let ts = message.get("ts").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let reactor: Arc<dyn Reactor> = Arc::new(SlackReactor {
                    http: self.http.clone(),
                    token: self.config.bot_token.clone(),
                    channel: channel.clone(),
                    thread_ts: ts,
                    bot_identities: self.config.bot_user_id.clone().into_iter().collect(),
                });
                emit(event, reactor).await;
            }

            self.cursors.lock().expect("slack cursor lock poisoned").insert(channel.clone(), now);
        }
        Ok(())
    }

    async fn shutdown(&self) {}
}

pub struct SlackReactor {
    http: PlatformHttp,
    token: String,
    channel: String,
    thread_ts: String,
    pub bot_identities: Vec<String>,
}

#[async_trait]
impl Reactor for SlackReactor {
    async fn last_comment(&self) -> Option<LastComment> {
        let url = format!(
            "{SLACK_API}/conversations.replies?channel={}&ts={}&limit=1&latest={}&inclusive=true",
            self.channel, self.thread_ts, self.thread_ts
        );
        let token = self.token.clone();
        let result = self
            .http
            .send_json(|| self.http.client().get(&url).bearer_auth(&token))
            .await;
        match result {
            Ok(response) => {
                let last = response.get("messages").and_then(|v| v.as_array()).and_then(|m| m.last());
                match last {
                    Some(last) => Some(LastComment {
                        author: last.get("user").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        body: last.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    }),
                    None => {
                        tracing::warn!(response = %response, "unexpected conversations.replies response shape");
                        None
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch last slack reply");
                None
            }
        }
    }

    async fn post_comment(&self, body: &str) -> Result<CommentHandle, ReactorError> {
        let token = self.token.clone();
        let payload = serde_json::json!({
            "channel": self.channel,
            "thread_ts": self.thread_ts,
            "text": body,
        });
        let response = self
            .http
            .send_json(|| {
                self.http
                    .client()
                    .post(format!("{SLACK_API}/chat.postMessage"))
                    .bearer_auth(&token)
                    .json(&payload)
            })
            .await
            .map_err(|e| ReactorError::PostFailed(e.to_string()))?;
        if response.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(ReactorError::PostFailed(format!("{response}")));
        }
        let ts = response.get("ts").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok(CommentHandle(ts))
    }

    fn is_bot_author(&self, candidate: &str) -> bool {
        watcher_core::matches_bot_identity(&self.bot_identities, candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_message_event() {
        let message = serde_json::json!({ "ts": "123.45", "text": "hi @bot", "user": "U1" });
        let event = normalize_slack_message("C1", &message, false).unwrap();
        assert_eq!(event.kind, "message");
        assert_eq!(event.resource.repository, "C1");
        assert_eq!(event.resource.comment.unwrap().body, "hi @bot");
    }

    #[test]
    fn non_mention_inner_type_is_dropped() {
        assert!(should_drop_messaging("message"));
    }

    #[test]
    fn app_mention_inner_type_is_kept() {
        assert!(!should_drop_messaging("app_mention"));
    }
}
