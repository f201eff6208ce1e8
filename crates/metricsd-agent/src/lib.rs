//! The metricsd agent: configuration, the collect-and-ship loop and the
//! health listener. The `metricsd` binary wires these together.

pub mod config;
pub mod health;
pub mod orchestrator;

use anyhow::Context;
use config::AgentConfig;
use metricsd_collector::accelerator::AcceleratorSource;
use metricsd_collector::plugin::PluginEngine;
use metricsd_collector::scrape::{EndpointScrapeSource, DEFAULT_SCRAPE_TIMEOUT};
use metricsd_collector::system::{SystemFamilies, SystemSource};
use metricsd_collector::SourceRegistry;

pub use orchestrator::Orchestrator;

/// Registers every source the configuration enables.
///
/// The plugin engine is always registered so that declarations added to an
/// initially empty directory are picked up by hot reload.
///
/// # Errors
///
/// Fails if the plugin directory cannot be loaded or a source cannot be
/// constructed.
pub fn build_registry(config: &AgentConfig) -> anyhow::Result<SourceRegistry> {
    let mut registry = SourceRegistry::new();

    let families = SystemFamilies {
        cpu: config.collector.enable_cpu,
        memory: config.collector.enable_memory,
        disk: config.collector.enable_disk,
        network: config.collector.enable_network,
    };
    if families.any() {
        registry.register(Box::new(SystemSource::new(families)));
        tracing::info!(?families, "System source registered");
    }

    if config.collector.enable_gpu {
        registry.register(Box::new(AcceleratorSource::new()));
        tracing::info!("GPU source registered");
    }

    if !config.endpoints.is_empty() {
        let source = EndpointScrapeSource::new(config.endpoints.clone(), DEFAULT_SCRAPE_TIMEOUT)
            .context("Failed to build endpoint scrape source")?;
        registry.register(Box::new(source));
        tracing::info!(endpoint_count = config.endpoints.len(), "Endpoint scrape source registered");
    }

    let plugins = PluginEngine::load(&config.plugins.directory, &config.plugins.prefix)
        .with_context(|| {
            format!(
                "Failed to load plugin definitions from {}",
                config.plugins.directory.display()
            )
        })?;
    if plugins.is_empty() {
        tracing::info!(plugins_dir = %config.plugins.directory.display(), "No plugins discovered");
    } else {
        tracing::info!(
            plugin_count = plugins.len(),
            plugins_dir = %config.plugins.directory.display(),
            "Plugin engine registered"
        );
    }
    registry.register(Box::new(plugins));

    Ok(registry)
}
