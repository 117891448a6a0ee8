//! Renders a prompt, posts the idempotency-marker comment, spawns the
//! configured external command, and optionally posts a follow-up comment
//! with its output (spec §4.6).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use watcher_core::{CommandConfig, CommandRunner, NormalizedEvent, Reactor, Watcher};

use crate::process;
use crate::template::PromptRenderer;

const SHELL: &str = "/bin/sh";
const STDIN_PREVIEW_LIMIT: usize = 500;
const PROMPT_PREVIEW_LIMIT: usize = 100;

pub struct CommandExecutor {
    config: CommandConfig,
    renderer: Arc<dyn PromptRenderer>,
}

impl CommandExecutor {
    pub fn new(config: CommandConfig, renderer: Arc<dyn PromptRenderer>) -> Self {
        Self { config, renderer }
    }

    /// Per-provider template if configured, else the default. Empty prompt
    /// if neither is configured (spec §4.6 "Template rendering").
    async fn resolve_template(&self, provider: &str) -> Option<String> {
        if let Some(path) = self.config.prompts.get(provider) {
            return tokio::fs::read_to_string(path).await.ok();
        }
        if let Some(text) = &self.config.prompt_template {
            return Some(text.clone());
        }
        if let Some(path) = &self.config.prompt_template_file {
            return tokio::fs::read_to_string(path).await.ok();
        }
        None
    }

    fn build_env(&self, event: &NormalizedEvent, prompt: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("EVENT_ID".to_string(), event.id.clone());
        env.insert("EVENT_SAFE_ID".to_string(), watcher_core::safe_id(&event.id));
        env.insert(
            "EVENT_SHORT_ID".to_string(),
            watcher_core::short_id(
                &event.provider,
                &event.resource.repository,
                event.resource.number,
                &event.id,
            ),
        );
        if !self.config.use_stdin {
            env.insert("PROMPT".to_string(), prompt.to_string());
        }
        env
    }

    fn log_dry_run(&self, command: &str, env: &BTreeMap<String, String>, prompt: &str) {
        let prompt_preview = truncate(prompt, PROMPT_PREVIEW_LIMIT);
        let stdin_preview = if self.config.use_stdin {
            Some(truncate(prompt, STDIN_PREVIEW_LIMIT))
        } else {
            None
        };
        tracing::info!(
            command,
            env_keys = ?env.keys().collect::<Vec<_>>(),
            prompt_preview,
            ?stdin_preview,
            "dry run: command not spawned"
        );
    }

    /// Execution sequence (spec §4.6). Best-effort: every failure is logged
    /// and swallowed so event processing never aborts the watcher.
    async fn run(&self, event: &NormalizedEvent, reactor: Arc<dyn Reactor>) {
        if !self.config.enabled {
            return;
        }

        let display = Watcher::display_string_for(event);

        // Step 2: the idempotency marker, posted regardless of what follows.
        if let Err(err) = reactor
            .post_comment(&format!("Agent is working on {display}"))
            .await
        {
            tracing::error!(error = %err, "failed to post initial acknowledgement comment");
        }

        let Some(command) = &self.config.command else {
            tracing::warn!("command executor enabled but no command configured");
            return;
        };

        let template = self.resolve_template(&event.provider).await;
        let prompt = match template {
            Some(t) => self.renderer.render(&t, event),
            None => String::new(),
        };

        let env = self.build_env(event, &prompt);

        if self.config.dry_run {
            self.log_dry_run(command, &env, &prompt);
            return;
        }

        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(command);
        process::apply_env(&mut cmd, &env);

        let stdin_bytes = self.config.use_stdin.then(|| prompt.as_bytes().to_vec());

        let output = match process::run_command(
            cmd,
            command,
            stdin_bytes.as_deref(),
            None,
        )
        .await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(error = %err, "command execution failed");
                return;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "command exited non-zero; no follow-up comment"
            );
            return;
        }

        if self.config.follow_up && !output.stdout.is_empty() {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if let Err(err) = reactor.post_comment(&stdout).await {
                tracing::error!(error = %err, "failed to post follow-up comment");
            }
        }
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn execute(&self, event: &NormalizedEvent, reactor: Arc<dyn Reactor>) {
        self.run(event, reactor).await;
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::DottedPathRenderer;
    use std::sync::Mutex;
    use watcher_core::{Actor, CommentHandle, LastComment, Metadata, ReactorError, Resource};

    struct RecordingReactor {
        posts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Reactor for RecordingReactor {
        async fn last_comment(&self) -> Option<LastComment> {
            None
        }
        async fn post_comment(&self, body: &str) -> Result<CommentHandle, ReactorError> {
            self.posts.lock().unwrap().push(body.to_string());
            Ok(CommentHandle("h".into()))
        }
        fn is_bot_author(&self, _candidate: &str) -> bool {
            false
        }
    }

    fn sample_event() -> NormalizedEvent {
        NormalizedEvent {
            id: "github:o/r:created:9:d1".into(),
            provider: "github".into(),
            kind: "issue".into(),
            action: "created".into(),
            resource: Resource {
                number: 42,
                title: "Fix it".into(),
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

    #[tokio::test]
    async fn dry_run_posts_marker_but_no_subprocess_output() {
        let mut config = CommandConfig::default();
        config.enabled = true;
        config.dry_run = true;
        config.command = Some("echo should-not-run".to_string());
        let executor = CommandExecutor::new(config, Arc::new(DottedPathRenderer));
        let reactor = Arc::new(RecordingReactor {
            posts: Mutex::new(Vec::new()),
        });
        executor.execute(&sample_event(), reactor.clone()).await;
        let posts = reactor.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0], "Agent is working on o/r#42");
    }

    #[tokio::test]
    async fn disabled_executor_is_a_no_op() {
        let config = CommandConfig::default();
        let executor = CommandExecutor::new(config, Arc::new(DottedPathRenderer));
        let reactor = Arc::new(RecordingReactor {
            posts: Mutex::new(Vec::new()),
        });
        executor.execute(&sample_event(), reactor.clone()).await;
        assert!(reactor.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_command_with_follow_up_posts_stdout() {
        let mut config = CommandConfig::default();
        config.enabled = true;
        config.follow_up = true;
        config.use_stdin = false;
        config.command = Some("echo hello-from-command".to_string());
        let executor = CommandExecutor::new(config, Arc::new(DottedPathRenderer));
        let reactor = Arc::new(RecordingReactor {
            posts: Mutex::new(Vec::new()),
        });
        executor.execute(&sample_event(), reactor.clone()).await;
        let posts = reactor.posts.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0], "Agent is working on o/r#42");
        assert!(posts[1].contains("hello-from-command"));
    }

    #[tokio::test]
    async fn non_zero_exit_skips_follow_up() {
        let mut config = CommandConfig::default();
        config.enabled = true;
        config.follow_up = true;
        config.command = Some("exit 1".to_string());
        let executor = CommandExecutor::new(config, Arc::new(DottedPathRenderer));
        let reactor = Arc::new(RecordingReactor {
            posts: Mutex::new(Vec::new()),
        });
        executor.execute(&sample_event(), reactor.clone()).await;
        let posts = reactor.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
    }

    #[tokio::test]
    async fn use_stdin_true_delivers_prompt_on_stdin() {
        let mut config = CommandConfig::default();
        config.enabled = true;
        config.follow_up = true;
        config.use_stdin = true;
        config.prompt_template = Some("hello-stdin".to_string());
        config.command = Some("cat".to_string());
        let executor = CommandExecutor::new(config, Arc::new(DottedPathRenderer));
        let reactor = Arc::new(RecordingReactor {
            posts: Mutex::new(Vec::new()),
        });
        executor.execute(&sample_event(), reactor.clone()).await;
        let posts = reactor.posts.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1], "hello-stdin");
    }
}
