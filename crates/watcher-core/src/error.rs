use thiserror::Error;

/// Failures that can abort the lifecycle supervisor's start sequence.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("watcher is already started")]
    AlreadyStarted,
    #[error("provider {provider} failed to initialize: {source}")]
    ProviderInit {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error("webhook server failed to start: {0}")]
    ServerInit(#[source] ProviderError),
}

/// `registerProvider`/`unregisterProvider` are only valid while not started
/// (spec §4.8 "Re-entrancy").
#[derive(Debug, Error)]
#[error("provider registry may only be mutated while the watcher is stopped")]
pub struct RegistryMutationError;

/// Errors surfaced by a concrete `Provider` implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing required configuration field: {0}")]
    Config(String),
    #[error("authentication with the platform API failed: {0}")]
    Auth(String),
    #[error("platform API request failed: {0}")]
    Transport(String),
    #[error("platform API returned an unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("webhook signature validation failed: {0}")]
    InvalidSignature(String),
    #[error("webhook payload could not be parsed: {0}")]
    Malformed(String),
}

/// Errors surfaced by a `Reactor` operation.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to post comment: {0}")]
    PostFailed(String),
}

/// Secret resolution failures (`SecretResolver`).
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("environment variable {0} is not set")]
    MissingEnvVar(String),
    #[error("failed to read secret file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
