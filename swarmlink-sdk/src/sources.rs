//! Proxy and identity list sources.
//!
//! Plain I/O wrappers with no state of their own: a local file or a remote
//! URL, one entry per line, blanks dropped. Parsing the entries into
//! [`crate::ProxyDescriptor`]s is the caller's job so that a bad entry is
//! reported as a configuration error before any session launches.

use anyhow::{Context, Result};
use std::path::Path;

fn split_lines(data: &str) -> Vec<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read non-blank lines from a local file.
pub async fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(split_lines(&data))
}

/// Fetch non-blank lines from a remote list URL.
pub async fn fetch_proxies(url: &str) -> Result<Vec<String>> {
    let body = reqwest::get(url)
        .await
        .with_context(|| format!("fetching proxy list from {url}"))?
        .error_for_status()
        .with_context(|| format!("proxy list request to {url} rejected"))?
        .text()
        .await
        .context("reading proxy list body")?;
    Ok(split_lines(&body))
}
