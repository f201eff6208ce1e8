//! Bounded execution of a plugin's source.
//!
//! Every source kind runs under the plugin's own timeout, clipped to the
//! cycle deadline. A command that outlives its timeout is killed when its
//! future is dropped.

use super::{PluginError, PluginRuntime, PluginSource, Result};
use crate::scrape::ACCEPT_TEXT_OR_JSON;
use crate::{CollectContext, CollectError};
use reqwest::header::ACCEPT;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const MAX_OUTPUT_IN_ERROR: usize = 256;

/// Fetches raw text for `runtime` and parses it into a value.
pub(crate) async fn execute(
    runtime: &PluginRuntime,
    http: &reqwest::Client,
    ctx: &CollectContext,
) -> Result<f64> {
    let raw = ctx
        .bounded(runtime.timeout(), fetch(runtime.source(), http, ctx))
        .await??;
    runtime.parser().parse_value(&raw)
}

async fn fetch(source: &PluginSource, http: &reqwest::Client, ctx: &CollectContext) -> Result<String> {
    match source {
        PluginSource::Command(argv) => run_command(argv).await,
        PluginSource::Http(url) => run_http(http, url).await,
        PluginSource::File(path) => run_file(path, ctx).await,
    }
}

/// Runs the argument vector directly and returns stdout followed by stderr.
async fn run_command(argv: &[String]) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PluginError::Command("empty command".to_string()))?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PluginError::Command(format!("failed to launch '{program}': {e}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        let mut excerpt = combined.trim().to_string();
        if excerpt.len() > MAX_OUTPUT_IN_ERROR {
            let mut end = MAX_OUTPUT_IN_ERROR;
            while !excerpt.is_char_boundary(end) {
                end -= 1;
            }
            excerpt.truncate(end);
        }
        return Err(PluginError::Command(format!(
            "'{program}' exited with {}: {excerpt}",
            output.status
        )));
    }
    Ok(combined)
}

async fn run_http(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .header(ACCEPT, ACCEPT_TEXT_OR_JSON)
        .send()
        .await
        .map_err(CollectError::from)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(CollectError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }
    Ok(resp.text().await.map_err(CollectError::from)?)
}

async fn run_file(path: &Path, ctx: &CollectContext) -> Result<String> {
    if ctx.is_cancelled() {
        return Err(CollectError::Cancelled.into());
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PluginError::Read {
            path: path.to_path_buf(),
            source,
        })
}
