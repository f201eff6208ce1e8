use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label set attached to a [`Metric`]. Ordered so that encoded output is
/// deterministic.
pub type Labels = BTreeMap<String, String>;

/// Whether a value is a point-in-time reading or a monotonically increasing
/// total.
///
/// # Examples
///
/// ```
/// use metricsd_common::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(format!("unknown metric type: {s}")),
        }
    }
}

/// A single labeled observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub labels: Labels,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            kind: MetricKind::Gauge,
            labels: Labels::new(),
        }
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            kind: MetricKind::Counter,
            labels: Labels::new(),
        }
    }

    /// Adds (or replaces) one label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels.extend(labels);
        self
    }
}

/// Checks a name against `^[a-zA-Z_:][a-zA-Z0-9_:]*$`.
///
/// # Examples
///
/// ```
/// use metricsd_common::is_valid_metric_name;
///
/// assert!(is_valid_metric_name("http_requests_total"));
/// assert!(is_valid_metric_name(":ns:rate5m"));
/// assert!(!is_valid_metric_name("9lives"));
/// assert!(!is_valid_metric_name("disk.used"));
/// assert!(!is_valid_metric_name(""));
/// ```
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_name_start(c) => chars.all(is_name_char),
        _ => false,
    }
}

/// First character of a metric name.
pub fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

/// Any later character of a metric name.
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Replaces every character that may not appear in a metric name with `_`.
///
/// The result is only guaranteed valid when it is appended to a valid prefix,
/// since a leading digit is left untouched.
pub fn sanitize_name_tail(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect()
}
