//! The prompt template engine is out of scope (spec §1): it is treated as a
//! pure function `render(template, event) -> string`. This module owns only
//! the seam — a trait the executor calls through — plus one concrete,
//! minimal implementation (`{{dotted.path}}` substitution against the
//! normalized event's JSON projection) so the crate is usable standalone.

use serde_json::Value;
use watcher_core::NormalizedEvent;

pub trait PromptRenderer: Send + Sync {
    fn render(&self, template: &str, event: &NormalizedEvent) -> String;
}

/// Substitutes `{{a.b.c}}` placeholders by walking the event's JSON
/// projection (`serde_json::to_value`). Unknown paths render as the empty
/// string; this is intentionally the simplest possible pure function, not a
/// general-purpose template language.
#[derive(Default)]
pub struct DottedPathRenderer;

impl PromptRenderer for DottedPathRenderer {
    fn render(&self, template: &str, event: &NormalizedEvent) -> String {
        let Ok(value) = serde_json::to_value(event) else {
            return template.to_string();
        };
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let path = after[..end].trim();
            out.push_str(&lookup(&value, path));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }
}

fn lookup(root: &Value, path: &str) -> String {
    let mut current = root;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watcher_core::{Actor, Metadata, Resource};

    fn sample_event() -> NormalizedEvent {
        NormalizedEvent {
            id: "github:o/r:created:9:d1".into(),
            provider: "github".into(),
            kind: "issue".into(),
            action: "created".into(),
            resource: Resource {
                number: 42,
                title: "Fix the thing".into(),
                description: "d".into(),
                url: "u".into(),
                state: "open".into(),
                repository: "o/r".into(),
                author: Some("alice".into()),
                assignees: vec![],
                labels: vec![],
                branch: None,
                merge_to: None,
                comment: None,
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
    fn substitutes_known_path() {
        let renderer = DottedPathRenderer;
        let out = renderer.render("Please fix: {{resource.title}}", &sample_event());
        assert_eq!(out, "Please fix: Fix the thing");
    }

    #[test]
    fn unknown_path_renders_empty() {
        let renderer = DottedPathRenderer;
        let out = renderer.render("{{resource.nope}}!", &sample_event());
        assert_eq!(out, "!");
    }

    #[test]
    fn template_with_no_placeholders_is_unchanged() {
        let renderer = DottedPathRenderer;
        let out = renderer.render("static prompt", &sample_event());
        assert_eq!(out, "static prompt");
    }
}
