//! Prometheus remote-write (protocol 1.0) encoding and transport.
//!
//! A batch becomes one `WriteRequest`: one `TimeSeries` per distinct metric
//! name and label set, plus counter/gauge metadata per metric family. The
//! protobuf payload is compressed with block-format snappy.

use crate::{check_status, Result, ShipError, Shipper};
use async_trait::async_trait;
use metricsd_common::{Metric, MetricKind};
use prost::Message;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::collections::HashMap;

pub const REMOTE_WRITE_VERSION: &str = "0.1.0";
const NAME_LABEL: &str = "__name__";

#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
    #[prost(message, repeated, tag = "3")]
    pub metadata: Vec<MetricMetadata>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricMetadata {
    #[prost(enumeration = "MetricType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub metric_family_name: String,
    #[prost(string, tag = "4")]
    pub help: String,
    #[prost(string, tag = "5")]
    pub unit: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Unknown = 0,
    Counter = 1,
    Gauge = 2,
}

impl From<MetricKind> for MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter,
            MetricKind::Gauge => Self::Gauge,
        }
    }
}

/// All labels including `__name__`, sorted lexicographically by name.
fn series_labels(metric: &Metric) -> Vec<Label> {
    let mut labels: Vec<Label> = metric
        .labels
        .iter()
        .filter(|(name, _)| name.as_str() != NAME_LABEL)
        .map(|(name, value)| Label {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    labels.push(Label {
        name: NAME_LABEL.to_string(),
        value: metric.name.clone(),
    });
    labels.sort_by(|a, b| a.name.cmp(&b.name));
    labels
}

/// Groups `metrics` into series, all stamped with `timestamp_ms`.
///
/// Each series carries exactly one sample; when the batch repeats a name and
/// label set the last value wins. Series and metadata keep first-seen order.
pub fn encode_write_request(metrics: &[Metric], timestamp_ms: i64) -> WriteRequest {
    let mut timeseries: Vec<TimeSeries> = Vec::new();
    let mut index: HashMap<Vec<Label>, usize> = HashMap::new();
    let mut metadata: Vec<MetricMetadata> = Vec::new();
    let mut families: HashMap<&str, MetricType> = HashMap::new();

    for metric in metrics {
        let sample = Sample {
            value: metric.value,
            timestamp: timestamp_ms,
        };
        let labels = series_labels(metric);
        match index.get(&labels) {
            Some(&i) => {
                tracing::debug!(
                    metric = %metric.name,
                    "Duplicate series in batch, keeping the later sample"
                );
                timeseries[i].samples = vec![sample];
            }
            None => {
                index.insert(labels.clone(), timeseries.len());
                timeseries.push(TimeSeries {
                    labels,
                    samples: vec![sample],
                });
            }
        }

        let kind = MetricType::from(metric.kind);
        if families.insert(metric.name.as_str(), kind).is_none() {
            metadata.push(MetricMetadata {
                r#type: kind as i32,
                metric_family_name: metric.name.clone(),
                help: String::new(),
                unit: String::new(),
            });
        }
    }

    WriteRequest {
        timeseries,
        metadata,
    }
}

/// Serializes and snappy-compresses a request body.
pub fn compress(request: &WriteRequest) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(&request.encode_to_vec())
        .map_err(|e| ShipError::Encode(e.to_string()))
}

pub struct RemoteWriteShipper {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteWriteShipper {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Shipper for RemoteWriteShipper {
    fn name(&self) -> &str {
        "prometheus_remote_write"
    }

    async fn ship(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            tracing::debug!("Empty batch, nothing to ship");
            return Ok(());
        }

        let request = encode_write_request(metrics, chrono::Utc::now().timestamp_millis());
        let series = request.timeseries.len();
        let body = compress(&request)?;
        let bytes = body.len();

        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header(CONTENT_ENCODING, "snappy")
            .header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION)
            .body(body)
            .send()
            .await?;
        check_status(resp).await?;

        tracing::debug!(series, bytes, "Remote write delivered");
        Ok(())
    }
}
