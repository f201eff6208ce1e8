use crate::{check_status, Result, Shipper};
use async_trait::async_trait;
use metricsd_common::Metric;
use serde::Serialize;

/// Request body of the JSON transport.
#[derive(Debug, Serialize)]
pub struct JsonBatch<'a> {
    /// Unix seconds at ship time.
    pub timestamp: i64,
    pub metrics: Vec<&'a Metric>,
}

impl<'a> JsonBatch<'a> {
    /// Builds a batch, leaving out `NaN` and infinite values, which JSON
    /// numbers cannot carry.
    pub fn new(timestamp: i64, metrics: &'a [Metric]) -> Self {
        let metrics = metrics
            .iter()
            .filter(|metric| {
                let finite = metric.value.is_finite();
                if !finite {
                    tracing::debug!(
                        metric = %metric.name,
                        value = %metric.value,
                        "Non-finite value dropped from JSON batch"
                    );
                }
                finite
            })
            .collect();
        Self { timestamp, metrics }
    }
}

/// POSTs batches as `application/json`.
pub struct JsonShipper {
    client: reqwest::Client,
    endpoint: String,
}

impl JsonShipper {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Shipper for JsonShipper {
    fn name(&self) -> &str {
        "http_json"
    }

    async fn ship(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            tracing::debug!("Empty batch, nothing to ship");
            return Ok(());
        }

        let batch = JsonBatch::new(chrono::Utc::now().timestamp(), metrics);
        if batch.metrics.is_empty() {
            tracing::debug!("No finite values in batch, nothing to ship");
            return Ok(());
        }
        let resp = self.client.post(&self.endpoint).json(&batch).send().await?;
        check_status(resp).await?;

        tracing::debug!(metric_count = batch.metrics.len(), "JSON batch delivered");
        Ok(())
    }
}
