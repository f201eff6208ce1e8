//! Scrapes application endpoints that expose either the text exposition
//! format or a flat JSON object of numbers.

use crate::exposition::parse_exposition;
use crate::{CollectContext, CollectError, Result, Source};
use async_trait::async_trait;
use futures::future::join_all;
use metricsd_common::types::sanitize_name_tail;
use metricsd_common::Metric;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const ACCEPT_TEXT_OR_JSON: &str = "text/plain, application/json";

/// A named URL to scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub name: String,
    pub url: String,
}

pub struct EndpointScrapeSource {
    targets: Vec<ScrapeTarget>,
    client: reqwest::Client,
    timeout: Duration,
}

impl EndpointScrapeSource {
    pub fn new(targets: Vec<ScrapeTarget>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            targets,
            client,
            timeout,
        })
    }

    pub fn targets(&self) -> &[ScrapeTarget] {
        &self.targets
    }

    async fn scrape(&self, target: &ScrapeTarget) -> Result<Vec<Metric>> {
        let resp = self
            .client
            .get(&target.url)
            .header(ACCEPT, ACCEPT_TEXT_OR_JSON)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CollectError::Status {
                url: target.url.clone(),
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.text().await?;
        parse_body(&target.name, &content_type, &body)
    }
}

#[async_trait]
impl Source for EndpointScrapeSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<Metric>> {
        let results = join_all(self.targets.iter().map(|target| async move {
            let result = ctx
                .bounded(self.timeout, self.scrape(target))
                .await
                .and_then(|inner| inner);
            (target, result)
        }))
        .await;

        let mut metrics = Vec::new();
        for (target, result) in results {
            match result {
                Ok(batch) => metrics.extend(batch),
                Err(e) => tracing::warn!(
                    endpoint = %target.name,
                    url = %target.url,
                    error = %e,
                    "Failed to scrape endpoint"
                ),
            }
        }
        Ok(metrics)
    }
}

/// Interprets a scraped body.
///
/// A declared JSON content type goes straight to the JSON parser. Anything
/// else is tried as exposition text first and falls back to JSON when that
/// yields no samples.
pub fn parse_body(endpoint: &str, content_type: &str, body: &str) -> Result<Vec<Metric>> {
    if content_type.contains("application/json") {
        return parse_json(endpoint, body);
    }

    let metrics = parse_exposition(endpoint, body);
    if !metrics.is_empty() {
        return Ok(metrics);
    }

    parse_json(endpoint, body).map_err(|e| {
        CollectError::Parse(format!(
            "response is neither exposition text nor JSON ({e})"
        ))
    })
}

/// Turns every numeric top-level field into an `app_<key>` gauge.
/// Non-numeric fields are skipped.
pub fn parse_json(endpoint: &str, body: &str) -> Result<Vec<Metric>> {
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(body).map_err(|e| CollectError::Parse(format!("invalid JSON: {e}")))?;

    Ok(object
        .iter()
        .filter_map(|(key, value)| {
            let value = value.as_f64()?;
            Some(
                Metric::gauge(format!("app_{}", sanitize_name_tail(key)), value)
                    .with_label("endpoint", endpoint),
            )
        })
        .collect())
}
