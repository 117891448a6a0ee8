//! The common event record produced by every provider (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A note on a resource's conversation thread — an issue/PR comment, an MR
/// note, a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Mandatory and optional resource facts (spec §3 `resource.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub url: String,
    pub state: String,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<Comment>,
}

/// Who caused the event (spec §3 `actor.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Provenance bag (spec §3 `metadata.*`). `timestamp` is ISO-8601; everything
/// else is an extensible string/bool bag so providers can stash
/// platform-specific provenance without widening the core type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    #[serde(default)]
    pub polled: bool,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// The sentinel action used for items surfaced by polling rather than a
/// native webhook delivery (spec §3 `action`).
pub const POLL_ACTION: &str = "poll";

/// The uniform record passed from providers to the dispatcher (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub resource: Resource,
    pub actor: Actor,
    pub metadata: Metadata,
    pub raw: Value,
}

impl NormalizedEvent {
    /// `{provider}:{resource-key}:{action}:{native-id}:{delivery-or-ts}`.
    pub fn build_id(
        provider: &str,
        resource_key: &str,
        action: &str,
        native_id: &str,
        delivery_or_ts: &str,
    ) -> String {
        format!("{provider}:{resource_key}:{action}:{native_id}:{delivery_or_ts}")
    }

    /// Validates the invariants spec §3 requires of every normalized event.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.is_empty() {
            return Err("id must be non-empty");
        }
        if self.provider.is_empty() {
            return Err("provider must be non-empty");
        }
        if self.resource.repository.is_empty() {
            return Err("resource.repository must be non-empty");
        }
        Ok(())
    }

    pub fn is_poll_event(&self) -> bool {
        self.action == POLL_ACTION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NormalizedEvent {
        NormalizedEvent {
            id: "github:o/r:created:9:d1".into(),
            provider: "github".into(),
            kind: "issue".into(),
            action: "created".into(),
            resource: Resource {
                number: 42,
                title: "t".into(),
                description: "d".into(),
                url: "https://example".into(),
                state: "open".into(),
                repository: "o/r".into(),
                author: Some("alice".into()),
                assignees: vec![],
                labels: vec![],
                branch: None,
                merge_to: None,
                comment: Some(Comment {
                    body: "please look".into(),
                    author: "alice".into(),
                    url: None,
                }),
            },
            actor: Actor {
                username: "alice".into(),
                id: None,
            },
            metadata: Metadata {
                timestamp: "2026-07-27T00:00:00Z".into(),
                delivery_id: Some("d1".into()),
                polled: false,
                extra: Default::default(),
            },
            raw: serde_json::json!({}),
        }
    }

    #[test]
    fn valid_event_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_id_fails() {
        let mut e = sample();
        e.id.clear();
        assert!(e.validate().is_err());
    }

    #[test]
    fn empty_repository_fails() {
        let mut e = sample();
        e.resource.repository.clear();
        assert!(e.validate().is_err());
    }

    #[test]
    fn build_id_matches_format() {
        let id = NormalizedEvent::build_id("github", "o/r", "created", "9", "d1");
        assert_eq!(id, "github:o/r:created:9:d1");
    }
}
