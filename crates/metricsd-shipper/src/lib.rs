//! Transports that deliver collected metric batches to a backend.
//!
//! Two wire formats are supported: Prometheus remote-write
//! ([`remote_write`]) and a plain JSON document ([`json`]). Both run over a
//! `reqwest` client whose TLS settings come from [`TransportSecurity`].

pub mod error;
pub mod json;
pub mod remote_write;
pub mod tls;

use async_trait::async_trait;
use metricsd_common::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use error::{Result, ShipError, TlsError};
pub use json::JsonShipper;
pub use remote_write::RemoteWriteShipper;
pub use tls::TransportSecurity;

pub const DEFAULT_SHIP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) const USER_AGENT: &str = concat!("metricsd/", env!("CARGO_PKG_VERSION"));

/// Sends a batch of metrics somewhere.
#[async_trait]
pub trait Shipper: Send + Sync {
    fn name(&self) -> &str;

    /// Delivers `metrics` as one request. An empty batch is not sent.
    ///
    /// # Errors
    ///
    /// Returns an error on encoding, transport or non-2xx responses. The
    /// caller drops the batch; nothing is retried here.
    async fn ship(&self, metrics: &[Metric]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipperKind {
    PrometheusRemoteWrite,
    HttpJson,
}

impl ShipperKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrometheusRemoteWrite => "prometheus_remote_write",
            Self::HttpJson => "http_json",
        }
    }
}

impl fmt::Display for ShipperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipperKind {
    type Err = ShipError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prometheus_remote_write" => Ok(Self::PrometheusRemoteWrite),
            "http_json" => Ok(Self::HttpJson),
            other => Err(ShipError::UnknownKind(other.to_string())),
        }
    }
}

/// Everything needed to construct a [`Shipper`].
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    pub kind: ShipperKind,
    pub endpoint: String,
    pub timeout: Duration,
    pub security: TransportSecurity,
}

impl ShipperConfig {
    pub fn new(kind: ShipperKind, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            timeout: DEFAULT_SHIP_TIMEOUT,
            security: TransportSecurity::default(),
        }
    }
}

/// Builds the transport selected by `config.kind`.
///
/// # Errors
///
/// Fails if the TLS material cannot be loaded or the HTTP client cannot be
/// constructed.
pub fn build_shipper(config: &ShipperConfig) -> Result<Arc<dyn Shipper>> {
    let client = tls::build_client(&config.security, config.timeout)?;
    let shipper: Arc<dyn Shipper> = match config.kind {
        ShipperKind::PrometheusRemoteWrite => {
            Arc::new(RemoteWriteShipper::new(client, &config.endpoint))
        }
        ShipperKind::HttpJson => Arc::new(JsonShipper::new(client, &config.endpoint)),
    };
    tracing::info!(
        shipper = %config.kind,
        endpoint = %config.endpoint,
        tls = config.security.enabled,
        "Shipper configured"
    );
    Ok(shipper)
}

/// Turns a non-2xx response into [`ShipError::Status`] with a short body
/// excerpt.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > 512 {
        let mut end = 512;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(ShipError::Status {
        status: status.as_u16(),
        body,
    })
}
