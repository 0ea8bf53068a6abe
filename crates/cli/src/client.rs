//! API client for the Mirror Boost agent

use anyhow::{Context, Result};
use boost_lib::{HostStats, MirrorLookup, SweepReport};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

/// API client for the agent's `/v1` endpoints
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path, query)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        decode(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path, &[])?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        decode(response).await
    }

    /// All host statistics, sorted by host
    pub async fn list_stats(&self) -> Result<Vec<HostStats>> {
        self.get("v1/stats", &[]).await
    }

    pub async fn host_stats(&self, host: &str) -> Result<HostStats> {
        self.get(&format!("v1/stats/{}", host), &[]).await
    }

    /// Mirror candidates for a resource identified by digest and URL
    pub async fn mirrors(&self, integrity: &str, url: &str) -> Result<MirrorLookup> {
        self.get("v1/mirrors", &[("integrity", integrity), ("url", url)])
            .await
    }

    /// Trigger an expiry sweep on the agent
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.post("v1/sweep", &()).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("API error ({}): {}", status, body);
    }

    response.json().await.context("Failed to parse response")
}
