#![forbid(unsafe_code)]
//! Concrete platform `Provider`/`Reactor` implementations: github, gitlab,
//! linear, slack (spec §4.3.1, §6.2).

mod github;
mod gitlab;
mod http;
mod linear;
mod normalize;
mod slack;

pub use github::{GithubConfig, GithubProvider, GithubReactor};
pub use gitlab::{GitlabConfig, GitlabProvider, GitlabReactor};
pub use http::{HttpError, PlatformHttp};
pub use linear::{LinearConfig, LinearProvider, LinearReactor};
pub use slack::{SlackConfig, SlackProvider, SlackReactor};
