//! User-defined metric sources declared in JSON files.
//!
//! A plugin directory holds `*.json` files, each with one definition object
//! or an array of them. Every definition names exactly one way to obtain raw
//! text (a command, an HTTP GET or a file read) and a parser that turns the
//! text into a single number. The [`PluginEngine`] runs each definition on
//! its own interval and picks up edits to the directory without a restart.
//!
//! ```json
//! {
//!   "name": "eth0_rx",
//!   "metric": "net_eth0_rx_bytes",
//!   "metric_type": "counter",
//!   "interval_seconds": 30,
//!   "parser": { "mode": "regex", "regex": "eth0:\\s*(\\d+)" },
//!   "command": { "command": ["cat", "/proc/net/dev"] }
//! }
//! ```

mod definition;
mod engine;
mod exec;
mod parser;
mod runtime;


pub use definition::{
    declarations_modified, is_denied_command, load_definitions, CommandSpec, FileSpec, HttpSpec,
    ParserSpec, PluginDefinition, DEFAULT_TIMEOUT, DENIED_COMMANDS,
};
pub use engine::PluginEngine;
pub use parser::ValueParser;
pub use runtime::{PluginRuntime, PluginSource};

use crate::CollectError;
use std::path::PathBuf;

/// Errors raised while loading, validating or running plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A definition failed validation.
    #[error("Plugin {plugin}: {reason}")]
    Invalid { plugin: String, reason: String },

    #[error("Plugin: failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Plugin: failed to parse {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Plugin: {0} is not a directory")]
    NotADirectory(PathBuf),

    /// The command could not be launched or exited unsuccessfully.
    #[error("Plugin: command failed: {0}")]
    Command(String),

    /// Raw output could not be turned into a number.
    #[error("Plugin: cannot parse value: {0}")]
    Value(String),

    #[error(transparent)]
    Collect(#[from] CollectError),
}

impl PluginError {
    pub(crate) fn invalid(plugin: &str, reason: impl Into<String>) -> Self {
        let plugin = if plugin.is_empty() { "<unnamed>" } else { plugin };
        Self::Invalid {
            plugin: plugin.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
