//! GPU telemetry read from `nvidia-smi`.
//!
//! The query runs as a child process under the collection deadline, so a
//! wedged driver costs one cycle's worth of GPU data and nothing else.

use crate::{CollectContext, CollectError, Result, Source};
use async_trait::async_trait;
use metricsd_common::Metric;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_SMI_BINARY: &str = "nvidia-smi";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Queried fields after `index,name`: `(query field, metric name, scale)`.
const FIELDS: &[(&str, &str, f64)] = &[
    ("utilization.gpu", "system_gpu_utilization_percent", 1.0),
    ("utilization.memory", "system_gpu_memory_utilization_percent", 1.0),
    ("memory.total", "system_gpu_memory_total_bytes", 1024.0 * 1024.0),
    ("memory.used", "system_gpu_memory_used_bytes", 1024.0 * 1024.0),
    ("memory.free", "system_gpu_memory_free_bytes", 1024.0 * 1024.0),
    ("temperature.gpu", "system_gpu_temperature_celsius", 1.0),
    ("power.draw", "system_gpu_power_usage_milliwatts", 1000.0),
    ("fan.speed", "system_gpu_fan_speed_percent", 1.0),
    ("clocks.sm", "system_gpu_clock_sm_mhz", 1.0),
    ("clocks.mem", "system_gpu_clock_memory_mhz", 1.0),
];

pub struct AcceleratorSource {
    binary: PathBuf,
    timeout: Duration,
}

impl AcceleratorSource {
    pub fn new() -> Self {
        Self::with_binary(DEFAULT_SMI_BINARY, DEFAULT_TIMEOUT)
    }

    pub fn with_binary(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn query_arg() -> String {
        let mut fields = vec!["index", "name"];
        fields.extend(FIELDS.iter().map(|(field, _, _)| *field));
        format!("--query-gpu={}", fields.join(","))
    }

    async fn run_query(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg(Self::query_arg())
            .arg("--format=csv,noheader,nounits")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(CollectError::Other(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for AcceleratorSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for AcceleratorSource {
    fn name(&self) -> &str {
        "gpu"
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<Metric>> {
        let stdout = ctx.bounded(self.timeout, self.run_query()).await??;
        parse_query_output(&stdout)
    }
}

/// Parses `--format=csv,noheader,nounits` output into metrics.
///
/// Rows that do not carry every queried column are rejected. Individual
/// values the driver cannot report (`[N/A]`, `[Not Supported]`) are skipped.
pub fn parse_query_output(stdout: &str) -> Result<Vec<Metric>> {
    let mut devices = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        if columns.len() != FIELDS.len() + 2 {
            return Err(CollectError::Parse(format!(
                "expected {} columns, got {}: {line}",
                FIELDS.len() + 2,
                columns.len()
            )));
        }
        devices.push(columns);
    }

    let mut metrics = vec![Metric::gauge("system_gpu_count", devices.len() as f64)];
    for columns in devices {
        let index = columns[0];
        let name = columns[1];
        for ((_, metric, scale), raw) in FIELDS.iter().zip(&columns[2..]) {
            let Ok(value) = raw.parse::<f64>() else {
                tracing::trace!(gpu = index, metric, raw, "GPU field not reported");
                continue;
            };
            metrics.push(
                Metric::gauge(*metric, value * scale)
                    .with_label("gpu", index)
                    .with_label("name", name),
            );
        }
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_GPUS: &str = "\
0, NVIDIA A100-SXM4-40GB, 37, 12, 40960, 1024, 39936, 41, 85.50, [N/A], 1410, 1215
1, NVIDIA A100-SXM4-40GB, 0, 0, 40960, 0, 40960, 30, 52.10, [Not Supported], 210, 1215
";

    #[test]
    fn parses_devices_and_scales_units() {
        let metrics = parse_query_output(TWO_GPUS).unwrap();
        assert_eq!(metrics[0].name, "system_gpu_count");
        assert_eq!(metrics[0].value, 2.0);

        let mem = metrics
            .iter()
            .find(|m| m.name == "system_gpu_memory_used_bytes" && m.labels["gpu"] == "0")
            .unwrap();
        assert_eq!(mem.value, 1024.0 * 1024.0 * 1024.0);
        assert_eq!(mem.labels["name"], "NVIDIA A100-SXM4-40GB");

        let power = metrics
            .iter()
            .find(|m| m.name == "system_gpu_power_usage_milliwatts" && m.labels["gpu"] == "1")
            .unwrap();
        assert!((power.value - 52_100.0).abs() < 1e-6);
    }

    #[test]
    fn unsupported_fields_are_skipped() {
        let metrics = parse_query_output(TWO_GPUS).unwrap();
        assert!(!metrics
            .iter()
            .any(|m| m.name == "system_gpu_fan_speed_percent"));
        // 10 fields per device, fan speed missing on both.
        assert_eq!(metrics.len(), 1 + 9 * 2);
    }

    #[test]
    fn empty_output_reports_zero_devices() {
        let metrics = parse_query_output("\n").unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].value, 0.0);
    }

    #[test]
    fn short_rows_are_rejected() {
        assert!(parse_query_output("0, GPU, 10\n").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let source = AcceleratorSource::with_binary(
            "/nonexistent/nvidia-smi-for-tests",
            Duration::from_secs(1),
        );
        let ctx = CollectContext::with_budget(Duration::from_secs(5));
        assert!(source.collect(&ctx).await.is_err());
    }
}
