use std::time::Duration;

use anyhow::{Context, Result};

/// Fetches `url` and returns the body as text.
pub fn fetch_text(url: &str) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let resp = client
        .get(url)
        .send()
        .with_context(|| format!("GET {url} failed"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        return Err(anyhow::anyhow!("GET {} returned status {}", url, status));
    }

    Ok(resp.text()?)
}
