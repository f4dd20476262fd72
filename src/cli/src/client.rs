//! HTTP client for communicating with the Foreman API server.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// API response wrapper matching the server's ApiResponse format.
#[derive(Debug, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

/// HTTP client for the Foreman API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    ///
    /// The admission identity headers (`X-User-Id`, `X-User-Tier`,
    /// `X-App-Server-Id`, `X-Api-Key-Id`) are picked up from the CLI
    /// configuration and attached to every request.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .default_headers(identity_headers())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a GET request and deserialize the response data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        unwrap_envelope(resp, &url).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        unwrap_envelope(resp, &url).await
    }

    /// Perform a DELETE request and deserialize the response.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;
        unwrap_envelope(resp, &url).await
    }

    /// Perform a raw GET request and return the full JSON value (for the
    /// health endpoint, which does not report errors via HTTP status alone).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

/// Unwrap the server's response envelope, surfacing the error code when the
/// server rejected the request.
async fn unwrap_envelope<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .with_context(|| format!("Failed to read response from {}", url))?;

    let api_resp: ApiResponse<T> = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            anyhow::bail!("API error ({}): {}", status, body)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to parse response from {}", url))
        }
    };

    if api_resp.success {
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
    } else {
        let message = api_resp.error.unwrap_or_else(|| "Unknown error".into());
        match api_resp.error_code {
            Some(code) => Err(anyhow::anyhow!("API error [{}]: {}", code, message)),
            None => Err(anyhow::anyhow!("API error: {}", message)),
        }
    }
}

/// Build the default identity headers from the CLI configuration.
fn identity_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (config_key, header_name) in [
        ("user-id", "x-user-id"),
        ("user-tier", "x-user-tier"),
        ("app-server-id", "x-app-server-id"),
        ("api-key-id", "x-api-key-id"),
    ] {
        if let Some(value) = crate::commands::config::load_value(config_key) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(header_name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
    }
    headers
}
