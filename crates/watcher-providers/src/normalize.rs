//! Shared JSON field-extraction helpers used by every provider's payload
//! normalization step.

use serde_json::Value;
use watcher_core::{Actor, Comment};

pub trait RawField {
    fn as_str_owned(&self) -> Option<String>;
}

impl RawField for Value {
    fn as_str_owned(&self) -> Option<String> {
        self.as_str().map(|s| s.to_string())
    }
}

/// Builds an `Actor` from a `sender`/`user`/`author` JSON object, trying the
/// field names the code-forge platforms use in turn.
pub fn actor_of(sender: Option<&Value>) -> Option<Actor> {
    let sender = sender?;
    let username = sender
        .get("login")
        .or_else(|| sender.get("username"))
        .or_else(|| sender.get("name"))
        .and_then(|v| v.as_str())?
        .to_string();
    let id = sender.get("id").map(|v| v.to_string());
    Some(Actor { username, id })
}

pub fn comment_of(comment: &Value) -> Option<Comment> {
    let body = comment.get("body").and_then(|v| v.as_str())?.to_string();
    let author = comment
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .or_else(|| comment.get("author").and_then(|v| v.as_str()))
        .unwrap_or_default()
        .to_string();
    let url = comment.get("html_url").and_then(|v| v.as_str()).map(|s| s.to_string());
    Some(Comment { body, author, url })
}
