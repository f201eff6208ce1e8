use anyhow::{bail, Context};
use metricsd_collector::scrape::ScrapeTarget;
use metricsd_common::Labels;
use metricsd_shipper::{ShipperConfig, ShipperKind, TransportSecurity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/metricsd.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    pub shipper: ShipperSection,
    /// Application endpoints to scrape.
    #[serde(default)]
    pub endpoints: Vec<ScrapeTarget>,
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Added to every metric. A `hostname` entry replaces the detected host
    /// name.
    #[serde(default)]
    pub global_labels: Labels,
}

/// Health listener address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: i64,
    #[serde(default = "default_true")]
    pub enable_cpu: bool,
    #[serde(default = "default_true")]
    pub enable_memory: bool,
    #[serde(default = "default_true")]
    pub enable_disk: bool,
    #[serde(default = "default_true")]
    pub enable_network: bool,
    #[serde(default)]
    pub enable_gpu: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipperSection {
    /// `prometheus_remote_write` or `http_json`.
    #[serde(rename = "type")]
    pub kind: String,
    pub endpoint: String,
    #[serde(default = "default_ship_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub tls: TransportSecurity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "default_plugins_dir")]
    pub directory: PathBuf,
    /// Prepended to every plugin's metric name.
    #[serde(default)]
    pub prefix: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> i64 {
    8080
}

fn default_interval_secs() -> i64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_ship_timeout_secs() -> u64 {
    30
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins.d")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            enable_cpu: true,
            enable_memory: true,
            enable_disk: true,
            enable_network: true,
            enable_gpu: false,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: default_plugins_dir(),
            prefix: String::new(),
        }
    }
}

impl AgentConfig {
    /// Reads `path`, applies `MC_*` environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies overrides from `lookup`, normally the process environment.
    /// Empty values are ignored, as are numbers and booleans that do not
    /// parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = var("MC_SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("MC_SERVER_PORT") {
            match v.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %v, "Ignoring unparseable MC_SERVER_PORT"),
            }
        }
        if let Some(v) = var("MC_COLLECTOR_INTERVAL") {
            match v.trim().parse() {
                Ok(secs) => self.collector.interval_secs = secs,
                Err(_) => tracing::warn!(value = %v, "Ignoring unparseable MC_COLLECTOR_INTERVAL"),
            }
        }
        if let Some(v) = var("MC_SHIPPER_TYPE") {
            self.shipper.kind = v;
        }
        if let Some(v) = var("MC_SHIPPER_ENDPOINT") {
            self.shipper.endpoint = v;
        }
        if let Some(v) = var("MC_TLS_ENABLED") {
            match parse_bool(&v) {
                Some(enabled) => self.shipper.tls.enabled = enabled,
                None => tracing::warn!(value = %v, "Ignoring unparseable MC_TLS_ENABLED"),
            }
        }
        if let Some(v) = var("MC_TLS_CERT_FILE") {
            self.shipper.tls.cert_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("MC_TLS_KEY_FILE") {
            self.shipper.tls.key_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("MC_TLS_CA_FILE") {
            self.shipper.tls.ca_file = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=65535).contains(&self.server.port) {
            bail!("invalid server port: {}", self.server.port);
        }
        if self.collector.interval_secs <= 0 {
            bail!("collector interval must be positive");
        }
        self.shipper_kind()?;
        if self.shipper.endpoint.trim().is_empty() {
            bail!("shipper endpoint is required");
        }
        if self.shipper.timeout_secs == 0 {
            bail!("shipper timeout must be positive");
        }

        let tls = &self.shipper.tls;
        if tls.enabled {
            if tls.cert_file.is_some() != tls.key_file.is_some() {
                bail!("TLS cert_file and key_file must be set together");
            }
            for (field, path) in [
                ("cert_file", &tls.cert_file),
                ("key_file", &tls.key_file),
                ("ca_file", &tls.ca_file),
            ] {
                if let Some(path) = path {
                    if !path.is_file() {
                        bail!("TLS {field} {} does not exist", path.display());
                    }
                }
            }
            metricsd_shipper::tls::protocol_versions(
                tls.min_version.as_deref(),
                tls.max_version.as_deref(),
            )?;
        }

        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() || endpoint.url.trim().is_empty() {
                bail!("every endpoint needs a name and a url");
            }
        }
        Ok(())
    }

    pub fn shipper_kind(&self) -> anyhow::Result<ShipperKind> {
        self.shipper.kind.parse().map_err(|_| {
            anyhow::anyhow!(
                "invalid shipper type: {} (must be 'prometheus_remote_write' or 'http_json')",
                self.shipper.kind
            )
        })
    }

    pub fn shipper_config(&self) -> anyhow::Result<ShipperConfig> {
        Ok(ShipperConfig {
            kind: self.shipper_kind()?,
            endpoint: self.shipper.endpoint.clone(),
            timeout: Duration::from_secs(self.shipper.timeout_secs),
            security: self.shipper.tls.clone(),
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.collector.interval_secs.max(1) as u64)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}
