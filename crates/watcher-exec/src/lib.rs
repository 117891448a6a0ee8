#![forbid(unsafe_code)]
//! Subprocess-invoking `CommandExecutor` for the event-watcher dispatcher
//! (spec §4.6).

mod error;
mod executor;
mod process;
mod template;

pub use error::ExecutorError;
pub use executor::CommandExecutor;
pub use template::{DottedPathRenderer, PromptRenderer};
