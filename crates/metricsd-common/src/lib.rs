//! Shared data model for the metricsd agent.
//!
//! Every source produces [`types::Metric`]s and every transport consumes them.

pub mod types;

pub use types::{is_valid_metric_name, Labels, Metric, MetricKind};
