//! Error taxonomy for the engine.
//!
//! Handlers wrap these in `anyhow` with context; the variants here carry
//! enough detail to tell the user what to fix.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmrError {
    /// A regex-like ignore rule that does not compile.
    #[error("invalid ignore pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: Box<fancy_regex::Error>,
    },

    /// A setting was given a value outside its accepted set.
    #[error("invalid value '{value}' for {option}; accepted values: {accepted}")]
    InvalidOption {
        option: &'static str,
        value: String,
        accepted: &'static str,
    },

    /// The settings file exists but is not valid TOML for our schema.
    #[error("malformed settings file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// The command ran but exited unsuccessfully where output was required.
    #[error("`{command}` failed ({code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A line of `gh gist list` output that does not have the expected shape.
    #[error("unexpected gist listing line: {line:?}")]
    GistLine { line: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TmrError>;
