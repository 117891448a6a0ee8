//! The per-resource capability the dispatcher uses to inspect and mutate a
//! thread of conversation (spec §4.4).

use async_trait::async_trait;

use crate::error::ReactorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastComment {
    pub author: String,
    pub body: String,
}

/// An opaque handle returned by `post_comment`. Some providers could later
/// `update_comment` with it; this spec's dispatch flow never does (open
/// question in spec §9), so the handle is carried but unused downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentHandle(pub String);

/// One concrete impl per provider, each a thin closure over
/// `{platform client, resource address}`. Never retained past the event
/// handler invocation that created it (spec §3 Reactor lifecycle).
#[async_trait]
pub trait Reactor: Send + Sync {
    /// Returns `None` on retrieval error (logged by the implementation).
    async fn last_comment(&self) -> Option<LastComment>;

    async fn post_comment(&self, body: &str) -> Result<CommentHandle, ReactorError>;

    /// Pure: true if `candidate` is one of the bot's configured identities.
    fn is_bot_author(&self, candidate: &str) -> bool;
}

/// Matches a candidate author string against a configured set of bot
/// identities. Matching is exact, case-sensitive (spec §4.7).
pub fn matches_bot_identity(identities: &[String], candidate: &str) -> bool {
    identities.iter().any(|id| id == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_identity_match_is_exact_case_sensitive() {
        let ids = vec!["watcher-bot".to_string(), "ci-bot".to_string()];
        assert!(matches_bot_identity(&ids, "watcher-bot"));
        assert!(!matches_bot_identity(&ids, "Watcher-Bot"));
        assert!(!matches_bot_identity(&ids, "someone-else"));
    }
}
