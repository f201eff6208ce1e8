use super::exec::execute;
use super::{declarations_modified, load_definitions, PluginDefinition, PluginError, PluginRuntime, Result};
use crate::{CollectContext, CollectError, Source};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::join_all;
use metricsd_common::Metric;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// One complete, validated set of runtimes. Never modified after publication.
#[derive(Debug, Default)]
struct Generation {
    runtimes: Vec<PluginRuntime>,
}

#[derive(Debug, Default)]
struct ReloadState {
    /// Watermark of the published generation. Only advanced by a successful
    /// load, so a failed attempt is retried on the next cycle.
    loaded: Option<SystemTime>,
    /// Watermark of the last failed attempt; limits the warning to once per
    /// change.
    failed: Option<SystemTime>,
}

/// Schedules and runs user-defined plugins, reloading them when the
/// declarations directory changes.
///
/// The active runtime set is published through an [`ArcSwap`], so a cycle
/// that has loaded a generation keeps using it even if a reload publishes a
/// new one meanwhile.
pub struct PluginEngine {
    prefix: String,
    directory: Option<PathBuf>,
    generation: ArcSwap<Generation>,
    /// Held for the whole reload so two cycles never rebuild concurrently.
    reload: Mutex<ReloadState>,
    http: reqwest::Client,
}

impl PluginEngine {
    /// Loads every definition under `dir` and enables hot reload.
    ///
    /// # Errors
    ///
    /// Any unreadable or undecodable file, invalid definition or duplicate
    /// name fails the whole load.
    pub fn load(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        let observed = declarations_modified(&dir);
        let definitions = load_definitions(&dir)?;
        let mut engine = Self::from_definitions(prefix, definitions)?;
        engine.directory = Some(dir);
        engine.reload = Mutex::new(ReloadState {
            loaded: observed,
            failed: None,
        });
        Ok(engine)
    }

    /// Builds an engine from in-memory definitions, without hot reload.
    ///
    /// # Errors
    ///
    /// Same validation as [`load`](Self::load).
    pub fn from_definitions(
        prefix: impl Into<String>,
        definitions: Vec<PluginDefinition>,
    ) -> Result<Self> {
        let prefix = prefix.into();
        let now = Instant::now();
        let mut seen = HashSet::new();
        let mut runtimes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if !seen.insert(definition.name.clone()) {
                return Err(PluginError::invalid(
                    &definition.name,
                    "duplicate plugin name",
                ));
            }
            runtimes.push(PluginRuntime::build(definition, &prefix, now)?);
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(CollectError::from)?;

        Ok(Self {
            prefix,
            directory: None,
            generation: ArcSwap::from_pointee(Generation { runtimes }),
            reload: Mutex::new(ReloadState::default()),
            http,
        })
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Names of the active generation, in load order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.generation
            .load()
            .runtimes
            .iter()
            .map(|rt| rt.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.generation.load().runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the runtime set if the declarations changed since the last
    /// successful load. Returns `true` when a new generation was published.
    ///
    /// Unlike [`load`](Self::load) this is lenient: invalid or duplicate
    /// definitions are dropped with a warning, and a directory that fails to
    /// load leaves the current generation in place. The directory scan runs
    /// on the blocking pool.
    pub async fn maybe_reload(&self, now: Instant) -> bool {
        let Some(dir) = self.directory.as_deref() else {
            return false;
        };

        let mut state = self.reload.lock().await;
        let loaded = state.loaded;
        let scan_dir = dir.to_path_buf();
        let scan = tokio::task::spawn_blocking(move || {
            let modified = declarations_modified(&scan_dir)?;
            if loaded.is_some_and(|seen| modified <= seen) {
                return None;
            }
            Some((modified, load_definitions(&scan_dir)))
        })
        .await;

        let (modified, result) = match scan {
            Ok(Some(found)) => found,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(
                    plugins_dir = %dir.display(),
                    error = %e,
                    "Plugin directory scan aborted"
                );
                return false;
            }
        };

        let definitions = match result {
            Ok(definitions) => definitions,
            Err(e) => {
                if state.failed == Some(modified) {
                    tracing::debug!(error = %e, "Plugin declarations still failing to load");
                } else {
                    tracing::warn!(
                        plugins_dir = %dir.display(),
                        error = %e,
                        "Plugin reload failed; keeping previous plugin set"
                    );
                    state.failed = Some(modified);
                }
                return false;
            }
        };
        state.loaded = Some(modified);
        state.failed = None;

        let mut seen = HashSet::new();
        let mut runtimes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if !seen.insert(definition.name.clone()) {
                tracing::warn!(plugin = %definition.name, "Duplicate plugin name dropped on reload");
                continue;
            }
            match PluginRuntime::build(definition, &self.prefix, now) {
                Ok(runtime) => runtimes.push(runtime),
                Err(e) => tracing::warn!(error = %e, "Invalid plugin dropped on reload"),
            }
        }

        tracing::info!(
            plugins_dir = %dir.display(),
            plugin_count = runtimes.len(),
            "Plugins reloaded"
        );
        self.generation.store(Arc::new(Generation { runtimes }));
        true
    }
}

impl std::fmt::Debug for PluginEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEngine")
            .field("prefix", &self.prefix)
            .field("directory", &self.directory)
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

#[async_trait]
impl Source for PluginEngine {
    fn name(&self) -> &str {
        "plugin"
    }

    async fn collect(&self, ctx: &CollectContext) -> crate::Result<Vec<Metric>> {
        let now = Instant::now();
        self.maybe_reload(now).await;

        let generation = self.generation.load_full();
        let due: Vec<&PluginRuntime> = generation
            .runtimes
            .iter()
            .filter(|rt| rt.try_claim(now))
            .collect();
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(
            due.iter()
                .map(|rt| async move { (*rt, execute(rt, &self.http, ctx).await) }),
        )
        .await;

        let mut metrics = Vec::with_capacity(results.len());
        for (runtime, result) in results {
            match result {
                Ok(value) => metrics.push(runtime.metric(value)),
                Err(e) => tracing::warn!(
                    plugin = %runtime.name(),
                    metric = %runtime.metric_key(),
                    error = %e,
                    "Plugin execution failed"
                ),
            }
        }
        tracing::debug!(executed = due.len(), produced = metrics.len(), "Plugins collected");
        Ok(metrics)
    }
}
