//! Ordered collection of sources with per-source failure isolation.

use crate::{CollectContext, Source};
use futures::future::join_all;
use metricsd_common::Metric;
use std::time::Instant;

/// Holds every registered [`Source`] in registration order.
///
/// Names are not deduplicated; keeping them distinct is up to the caller.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Box<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Box<dyn Source>) {
        tracing::debug!(source = source.name(), "Source registered");
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Collects from every source concurrently.
    ///
    /// A source that errors or overruns the cycle deadline is logged and left
    /// out. The result is the concatenation of the successful batches in
    /// registration order.
    pub async fn collect_all(&self, ctx: &CollectContext) -> Vec<Metric> {
        let results = join_all(self.sources.iter().map(|source| async move {
            let started = Instant::now();
            let result = ctx
                .within_deadline(source.collect(ctx))
                .await
                .and_then(|inner| inner);
            (source.name(), result, started.elapsed())
        }))
        .await;

        let mut metrics = Vec::new();
        for (name, result, elapsed) in results {
            match result {
                Ok(batch) => {
                    tracing::debug!(
                        source = name,
                        count = batch.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Source collected"
                    );
                    metrics.extend(batch);
                }
                Err(e) => {
                    tracing::warn!(source = name, error = %e, "Collection failed");
                }
            }
        }
        metrics
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.source_names())
            .finish()
    }
}
