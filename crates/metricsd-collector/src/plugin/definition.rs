use super::{PluginError, Result};
use metricsd_common::{is_valid_metric_name, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Executables a command plugin may not start.
///
/// This only catches obvious mistakes in declaration files. It is not a
/// sandbox: an allowed interpreter such as `sh -c` can still run anything on
/// this list, and the command runs with the agent's own privileges.
pub const DENIED_COMMANDS: &[&str] = &[
    "rm", "sudo", "mv", "cp", "shutdown", "reboot", "halt", "init",
];

/// One declared plugin as written on disk.
///
/// Required fields default to empty values when absent so that validation,
/// not deserialization, reports what is missing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PluginDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub metric_type: String,
    #[serde(default)]
    pub interval_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub parser: ParserSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileSpec>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParserSpec {
    /// `"number"` (the default when empty) or `"regex"`.
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program followed by its arguments. No shell is involved.
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpSpec {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileSpec {
    #[serde(default)]
    pub path: PathBuf,
}

impl PluginDefinition {
    /// Checks everything that can be checked without running the plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.trim().is_empty() {
            return Err(PluginError::invalid(name, "name is required"));
        }
        if self.metric.is_empty() {
            return Err(PluginError::invalid(name, "metric is required"));
        }
        if !is_valid_metric_name(&self.metric) {
            return Err(PluginError::invalid(
                name,
                format!(
                    "metric '{}' must match ^[a-zA-Z_:][a-zA-Z0-9_:]*$",
                    self.metric
                ),
            ));
        }
        self.kind()?;
        if self.interval_seconds <= 0 {
            return Err(PluginError::invalid(
                name,
                "interval_seconds must be positive",
            ));
        }
        if matches!(self.timeout_seconds, Some(t) if t < 0) {
            return Err(PluginError::invalid(
                name,
                "timeout_seconds must not be negative",
            ));
        }

        let sources =
            self.command.is_some() as u8 + self.http.is_some() as u8 + self.file.is_some() as u8;
        match sources {
            0 => {
                return Err(PluginError::invalid(
                    name,
                    "one source must be provided (command/http/file)",
                ))
            }
            1 => {}
            _ => {
                return Err(PluginError::invalid(
                    name,
                    "only one source type is allowed",
                ))
            }
        }

        if let Some(command) = &self.command {
            let Some(program) = command.command.first() else {
                return Err(PluginError::invalid(
                    name,
                    "command source requires a non-empty 'command' array",
                ));
            };
            if program.trim().is_empty() {
                return Err(PluginError::invalid(name, "command program is empty"));
            }
            if is_denied_command(program) {
                return Err(PluginError::invalid(
                    name,
                    format!("command '{program}' is not allowed"),
                ));
            }
        }
        if matches!(&self.http, Some(http) if http.url.trim().is_empty()) {
            return Err(PluginError::invalid(name, "http source requires 'url'"));
        }
        if matches!(&self.file, Some(file) if file.path.as_os_str().is_empty()) {
            return Err(PluginError::invalid(name, "file source requires 'path'"));
        }
        Ok(())
    }

    pub fn kind(&self) -> Result<MetricKind> {
        self.metric_type.parse().map_err(|_| {
            PluginError::invalid(&self.name, "metric_type must be 'gauge' or 'counter'")
        })
    }

    /// Per-execution timeout; absent or zero means [`DEFAULT_TIMEOUT`].
    pub fn timeout(&self) -> Duration {
        match self.timeout_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => DEFAULT_TIMEOUT,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(0) as u64)
    }
}

/// Whether `program` resolves to a denied executable, ignoring any
/// directory prefix, letter case and a trailing `.exe`.
///
/// # Examples
///
/// ```
/// use metricsd_collector::plugin::is_denied_command;
///
/// assert!(is_denied_command("/usr/bin/SUDO"));
/// assert!(!is_denied_command("cat"));
/// ```
pub fn is_denied_command(program: &str) -> bool {
    let base = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(program)
        .to_ascii_lowercase();
    let base = base.strip_suffix(".exe").unwrap_or(&base);
    DENIED_COMMANDS.contains(&base)
}

/// Reads every `*.json` declaration file in `dir` (not recursively), in
/// file-name order.
///
/// A missing directory yields no definitions.
///
/// # Errors
///
/// Fails on the first file that cannot be read or decoded, or when `dir`
/// exists but is not a directory.
pub fn load_definitions(dir: &Path) -> Result<Vec<PluginDefinition>> {
    match std::fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => return Err(PluginError::NotADirectory(dir.to_path_buf())),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                plugins_dir = %dir.display(),
                "Plugins directory not found; skipping plugin loading"
            );
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(PluginError::Read {
                path: dir.to_path_buf(),
                source,
            })
        }
    }

    let mut definitions = Vec::new();
    for path in declaration_files(dir)? {
        let raw = std::fs::read_to_string(&path).map_err(|source| PluginError::Read {
            path: path.clone(),
            source,
        })?;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let decoded = if raw.starts_with('[') {
            serde_json::from_str::<Vec<PluginDefinition>>(raw)
        } else {
            serde_json::from_str::<PluginDefinition>(raw).map(|def| vec![def])
        };
        let decoded = decoded.map_err(|source| PluginError::Decode {
            path: path.clone(),
            source,
        })?;
        definitions.extend(decoded);
    }
    Ok(definitions)
}

/// Newest modification time among `dir` itself and its declaration files.
///
/// Returns `None` if the directory cannot be read.
pub fn declarations_modified(dir: &Path) -> Option<SystemTime> {
    let mut newest = std::fs::metadata(dir).and_then(|m| m.modified()).ok()?;
    for path in declaration_files(dir).ok()? {
        if let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) {
            newest = newest.max(modified);
        }
    }
    Some(newest)
}

fn declaration_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_err = |source| PluginError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
