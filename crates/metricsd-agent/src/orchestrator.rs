//! The periodic collect-and-ship loop.

use metricsd_collector::{CollectContext, SourceRegistry};
use metricsd_common::{Labels, Metric};
use metricsd_shipper::Shipper;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const HOSTNAME_LABEL: &str = "hostname";

/// Drives collection and shipping on a fixed interval.
///
/// The orchestrator is either running or stopped. Once stopped, by
/// [`stop`](Self::stop) or by the shutdown token passed to
/// [`run`](Self::run), it never runs again.
pub struct Orchestrator {
    registry: SourceRegistry,
    shipper: Arc<dyn Shipper>,
    interval: Duration,
    hostname: String,
    global_labels: Labels,
    stop: CancellationToken,
}

impl Orchestrator {
    /// A `hostname` entry in `global_labels` replaces the detected host name.
    pub fn new(
        registry: SourceRegistry,
        shipper: Arc<dyn Shipper>,
        interval: Duration,
        global_labels: Labels,
    ) -> Self {
        let hostname = global_labels
            .get(HOSTNAME_LABEL)
            .filter(|h| !h.is_empty())
            .cloned()
            .unwrap_or_else(detect_hostname);
        Self {
            registry,
            shipper,
            interval,
            hostname,
            global_labels,
            stop: CancellationToken::new(),
        }
    }

    /// Overrides the host identity label.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Requests the loop to exit after the current cycle.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Runs one cycle immediately, then one per interval, until `shutdown`
    /// fires or [`stop`](Self::stop) is called.
    ///
    /// Cycles never overlap: a cycle that outlasts the interval delays the
    /// next tick instead of queueing a burst.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            hostname = %self.hostname,
            "Orchestrator started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("Orchestrator stopping on shutdown");
                    break;
                }
                () = self.stop.cancelled() => {
                    tracing::info!("Orchestrator stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle(&shutdown).await;
                }
            }
        }
        self.stop.cancel();
    }

    /// Collects from every source, labels the batch and ships it. Returns
    /// the number of metrics shipped; a shipping failure drops the batch.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> usize {
        let started = Instant::now();
        let ctx = CollectContext::new(started + self.interval, shutdown.child_token());

        let mut metrics = self.registry.collect_all(&ctx).await;
        self.enrich(&mut metrics);
        tracing::debug!(
            metric_count = metrics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Metrics collected"
        );

        if let Err(e) = self.shipper.ship(&metrics).await {
            tracing::error!(
                shipper = %self.shipper.name(),
                metric_count = metrics.len(),
                error = %e,
                "Failed to ship metrics; batch dropped"
            );
            return 0;
        }

        tracing::info!(
            metric_count = metrics.len(),
            hostname = %self.hostname,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection cycle completed"
        );
        metrics.len()
    }

    /// Sets `hostname` and the global labels on every metric. Global labels
    /// replace source labels of the same name, except `hostname`.
    pub fn enrich(&self, metrics: &mut [Metric]) {
        for metric in metrics {
            metric
                .labels
                .insert(HOSTNAME_LABEL.to_string(), self.hostname.clone());
            for (key, value) in &self.global_labels {
                if key != HOSTNAME_LABEL {
                    metric.labels.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

fn detect_hostname() -> String {
    match sysinfo::System::host_name() {
        Some(name) if !name.is_empty() => name,
        _ => {
            tracing::warn!("Failed to resolve hostname, using 'unknown'");
            "unknown".to_string()
        }
    }
}
