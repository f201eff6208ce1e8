//! Metric sources for the metricsd agent.
//!
//! Each [`Source`] gathers one family of measurements (host counters,
//! accelerators, scraped endpoints, user-defined plugins) and returns them as
//! [`Metric`]s. The [`SourceRegistry`] fans a collection cycle out to every
//! registered source and keeps one failing source from affecting the others.

pub mod accelerator;
pub mod context;
pub mod error;
pub mod exposition;
pub mod plugin;
pub mod registry;
pub mod scrape;
pub mod system;

use async_trait::async_trait;
use metricsd_common::Metric;

pub use context::CollectContext;
pub use error::{CollectError, Result};
pub use registry::SourceRegistry;

/// A producer of metrics, polled once per collection cycle.
///
/// Implementations must bound every blocking operation through the supplied
/// [`CollectContext`] so that a slow target cannot stall the cycle.
#[async_trait]
pub trait Source: Send + Sync {
    /// Returns the source name (e.g. `"system"`, `"plugin"`), used in logs.
    fn name(&self) -> &str;

    /// Gathers the current set of metrics.
    ///
    /// # Errors
    ///
    /// Returns an error when the source as a whole could not produce data.
    /// The registry logs it and carries on with the other sources.
    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<Metric>>;
}
