//! Binary entry point: resolves configuration, builds one provider per
//! enabled platform, wires the `CommandExecutor` and `WebhookServer`, and
//! runs the lifecycle supervisor until a shutdown signal arrives.
//!
//! Configuration loading and signal handling are ambient glue around the
//! core dispatcher, not part of the subsystems it implements — kept as thin
//! as possible here.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use watcher_core::{AuthConfig, ProviderConfig, SecretResolver, Watcher, WatcherConfig};
use watcher_exec::{CommandExecutor, DottedPathRenderer};
use watcher_providers::{
    GithubConfig, GithubProvider, GitlabConfig, GitlabProvider, LinearConfig, LinearProvider,
    SlackConfig, SlackProvider,
};
use watcher_server::{ServerConfig, WebhookServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config_path = std::env::args()
        .nth(1)
        .context("usage: watcher <config.toml>")?;
    let config_text = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file {config_path}"))?;
    let config: WatcherConfig = toml::from_str(&config_text).context("failed to parse config")?;

    let watcher = Arc::new(Watcher::new());
    register_providers(&watcher, &config)?;

    watcher.set_command_runner(Some(Arc::new(CommandExecutor::new(
        config.command.clone(),
        Arc::new(DottedPathRenderer),
    ))));

    let bind_addr: SocketAddr = std::env::var("WATCHER_BIND_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| ServerConfig::default().bind_addr);
    let server = WebhookServer::new(Arc::clone(&watcher), config.base_path.clone(), ServerConfig { bind_addr });
    watcher.set_server(Some(Arc::new(server)));

    watcher.start().await.context("failed to start watcher")?;
    tracing::info!("watcher started");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    watcher.stop().await;

    Ok(())
}

/// Resolves each enabled provider's secrets and registers a concrete
/// `Provider` for it. The generic `auth.secret` configured per provider
/// serves both as the platform API credential and, where the platform
/// requires a distinct webhook-signing secret, that secret too — operators
/// who need them to differ configure two providers' worth of secrets
/// externally (see DESIGN.md).
fn register_providers(watcher: &Arc<Watcher>, config: &WatcherConfig) -> anyhow::Result<()> {
    for (name, provider_config) in &config.providers {
        if !provider_config.enabled {
            continue;
        }
        let bot_identities = bot_identities(provider_config)?;
        let secret = resolve_secret(provider_config)?;

        match name.as_str() {
            "github" => {
                let provider = GithubProvider::new(GithubConfig {
                    token: secret.clone(),
                    webhook_secret: Some(secret),
                    repositories: provider_config.containers.clone(),
                    initial_lookback: provider_config.initial_lookback,
                    bot_identities: bot_identities.clone(),
                    ..GithubConfig::default()
                });
                watcher.register_provider(name.clone(), Arc::new(provider), provider_config.clone(), bot_identities)?;
            }
            "gitlab" => {
                let provider = GitlabProvider::new(GitlabConfig {
                    token: secret.clone(),
                    webhook_secret: Some(secret),
                    projects: provider_config.containers.clone(),
                    initial_lookback: provider_config.initial_lookback,
                    bot_identities: bot_identities.clone(),
                    ..GitlabConfig::default()
                });
                watcher.register_provider(name.clone(), Arc::new(provider), provider_config.clone(), bot_identities)?;
            }
            "linear" => {
                let provider = LinearProvider::new(LinearConfig {
                    api_key: secret.clone(),
                    webhook_secret: Some(secret),
                    teams: provider_config.containers.clone(),
                    initial_lookback: provider_config.initial_lookback,
                    bot_identities: bot_identities.clone(),
                    ..LinearConfig::default()
                });
                watcher.register_provider(name.clone(), Arc::new(provider), provider_config.clone(), bot_identities)?;
            }
            "slack" => {
                let provider = SlackProvider::new(SlackConfig {
                    bot_token: secret.clone(),
                    signing_secret: Some(secret),
                    channels: provider_config.containers.clone(),
                    bot_user_id: bot_identities.first().cloned(),
                    initial_lookback: provider_config.initial_lookback,
                });
                watcher.register_provider(name.clone(), Arc::new(provider), provider_config.clone(), bot_identities)?;
            }
            other => bail!("unknown provider '{other}' in configuration"),
        }
    }
    Ok(())
}

fn bot_identities(provider_config: &ProviderConfig) -> anyhow::Result<Vec<String>> {
    Ok(auth(provider_config)?.bot_username.as_identities())
}

fn resolve_secret(provider_config: &ProviderConfig) -> anyhow::Result<String> {
    Ok(SecretResolver::resolve(&auth(provider_config)?.secret)?)
}

fn auth(provider_config: &ProviderConfig) -> anyhow::Result<&AuthConfig> {
    provider_config
        .auth
        .as_ref()
        .context("enabled provider is missing an [providers.<name>.auth] block")
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
