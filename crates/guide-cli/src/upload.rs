use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use guide_engine::imaging::encode_base64;
use reqwest::blocking::Client as HttpClient;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// `POST {base}/goals` for a new goal, `PUT {base}/goals/{id}` to refresh.
pub fn goal_endpoint(base_url: &str, goal_id: Option<&str>) -> (Method, String) {
    let base = base_url.trim_end_matches('/');
    match goal_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => (Method::PUT, format!("{base}/goals/{id}")),
        None => (Method::POST, format!("{base}/goals")),
    }
}

/// Uploads `image_path` and returns the server's JSON response.
pub fn upload_image(
    image_path: &Path,
    base_url: &str,
    goal_id: Option<&str>,
    timeout: Duration,
) -> Result<Value> {
    let bytes = fs::read(image_path)
        .with_context(|| format!("failed to read {}", image_path.display()))?;
    let payload = json!({ "image_base64": encode_base64(&bytes) });
    let (method, url) = goal_endpoint(base_url, goal_id);
    debug!(%method, %url, bytes = bytes.len(), "uploading scene image");

    let http = HttpClient::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;
    let response = http
        .request(method, &url)
        .json(&payload)
        .send()
        .with_context(|| format!("request to {url} failed"))?;
    let status = response.status();
    let body = response.text().context("failed to read response body")?;
    if !status.is_success() {
        bail!("Request failed with status {}: {}", status.as_u16(), body);
    }
    serde_json::from_str(&body).context("server returned invalid JSON")
}
