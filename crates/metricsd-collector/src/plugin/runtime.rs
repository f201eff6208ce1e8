use super::{PluginDefinition, PluginError, Result, ValueParser};
use metricsd_common::{Metric, MetricKind};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Where a plugin's raw text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    /// Program and arguments, executed without a shell.
    Command(Vec<String>),
    Http(String),
    File(PathBuf),
}

/// Schedulable state derived from one validated definition.
///
/// A runtime belongs to exactly one load generation and is rebuilt, never
/// carried over, when the declarations change.
#[derive(Debug)]
pub struct PluginRuntime {
    definition: PluginDefinition,
    source: PluginSource,
    parser: ValueParser,
    kind: MetricKind,
    interval: Duration,
    timeout: Duration,
    metric_key: String,
    next_due: Mutex<Instant>,
}

impl PluginRuntime {
    /// Validates `definition` and prepares it to run, due at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Invalid`] if the definition or its parser is
    /// rejected.
    pub fn build(definition: PluginDefinition, prefix: &str, now: Instant) -> Result<Self> {
        definition.validate()?;
        let kind = definition.kind()?;
        let parser = ValueParser::from_spec(&definition.parser)
            .map_err(|reason| PluginError::invalid(&definition.name, reason))?;

        let source = match (&definition.command, &definition.http, &definition.file) {
            (Some(command), None, None) => PluginSource::Command(command.command.clone()),
            (None, Some(http), None) => PluginSource::Http(http.url.clone()),
            (None, None, Some(file)) => PluginSource::File(file.path.clone()),
            _ => {
                return Err(PluginError::invalid(
                    &definition.name,
                    "exactly one source must be provided",
                ))
            }
        };

        Ok(Self {
            metric_key: format!("{prefix}{}", definition.metric),
            interval: definition.interval(),
            timeout: definition.timeout(),
            source,
            parser,
            kind,
            next_due: Mutex::new(now),
            definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    pub fn source(&self) -> &PluginSource {
        &self.source
    }

    pub fn parser(&self) -> &ValueParser {
        &self.parser
    }

    /// Prefix plus declared metric.
    pub fn metric_key(&self) -> &str {
        &self.metric_key
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn next_due(&self) -> Instant {
        *self.next_due.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// If the runtime is due at `now`, re-arms it for `now + interval` and
    /// returns `true`.
    ///
    /// The next run is measured from `now`, not from the previous due time,
    /// so a stalled agent does not fire a burst of catch-up runs. The price
    /// is that the effective period drifts by up to one orchestrator tick
    /// per run. Claiming and re-arming happen under one lock so concurrent
    /// collections cannot both run the same plugin.
    pub fn try_claim(&self, now: Instant) -> bool {
        let mut next_due = self.next_due.lock().unwrap_or_else(PoisonError::into_inner);
        if now < *next_due {
            return false;
        }
        *next_due = (*next_due).max(now + self.interval);
        true
    }

    /// Builds the metric for one successful execution. The `plugin` label
    /// always overrides a declared label of the same name.
    pub fn metric(&self, value: f64) -> Metric {
        let mut labels = self.definition.labels.clone();
        labels.insert("plugin".to_string(), self.definition.name.clone());
        Metric {
            name: self.metric_key.clone(),
            value,
            kind: self.kind,
            labels,
        }
    }
}
