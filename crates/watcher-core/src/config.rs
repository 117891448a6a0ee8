//! Already-resolved configuration records (spec §1: config loading itself is
//! out of scope; this module only owns the shape, per SPEC_FULL §2).

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::secret::SecretSource;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub secret: SecretSource,
    #[serde(default)]
    pub bot_username: BotUsername,
}

/// `botUsername` may be a single string or a list of strings (spec §4.7).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BotUsername {
    Single(String),
    Many(Vec<String>),
}

impl Default for BotUsername {
    fn default() -> Self {
        BotUsername::Many(Vec::new())
    }
}

impl BotUsername {
    pub fn as_identities(&self) -> Vec<String> {
        match self {
            BotUsername::Single(s) => vec![s.clone()],
            BotUsername::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub auth: Option<AuthConfig>,
    /// Repositories / projects / teams / channels, per provider (spec §4.8).
    pub containers: Vec<String>,
    #[serde(with = "duration_secs_opt")]
    pub polling_interval: Option<Duration>,
    #[serde(with = "duration_secs")]
    pub initial_lookback: Duration,
    #[serde(with = "duration_secs")]
    pub max_error_window: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auth: None,
            containers: Vec::new(),
            polling_interval: None,
            initial_lookback: Duration::from_secs(3600),
            max_error_window: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub enabled: bool,
    pub command: Option<String>,
    pub prompt_template: Option<String>,
    pub prompt_template_file: Option<String>,
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    pub use_stdin: bool,
    pub follow_up: bool,
    pub dry_run: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: None,
            prompt_template: None,
            prompt_template_file: None,
            prompts: HashMap::new(),
            use_stdin: true,
            follow_up: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub base_path: String,
    pub providers: HashMap<String, ProviderConfig>,
    pub command: CommandConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            providers: HashMap::new(),
            command: CommandConfig::default(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_username_single_becomes_one_identity() {
        let bu = BotUsername::Single("watcher-bot".into());
        assert_eq!(bu.as_identities(), vec!["watcher-bot".to_string()]);
    }

    #[test]
    fn bot_username_many_preserves_all() {
        let bu = BotUsername::Many(vec!["a".into(), "b".into()]);
        assert_eq!(bu.as_identities(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn provider_config_default_lookback_is_one_hour() {
        let cfg = ProviderConfig::default();
        assert_eq!(cfg.initial_lookback, Duration::from_secs(3600));
    }

    #[test]
    fn watcher_config_round_trips_through_toml() {
        let toml_str = r#"
            base_path = "/hooks"

            [command]
            enabled = true
            command = "echo hi"

            [providers.github]
            enabled = true
            containers = ["o/r"]
            polling_interval = 60
            initial_lookback = 3600
            max_error_window = 30

            [providers.github.auth]
            bot_username = "watcher-bot"

            [providers.github.auth.secret]
            literal = "shh"
        "#;
        let cfg: WatcherConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.base_path, "/hooks");
        assert!(cfg.providers["github"].enabled);
        assert_eq!(cfg.providers["github"].containers, vec!["o/r".to_string()]);
    }
}
