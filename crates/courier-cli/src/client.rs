//! Courier HTTP Client
//!
//! TigerStyle: HTTP client for the registry API with explicit error handling.

use anyhow::{anyhow, Context, Result};
use courier_server::models::{
    AssignmentResponse, ErrorResponse, HealthResponse, InstanceListResponse,
};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default registry URL
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Default request timeout in seconds
pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Registry API client
#[derive(Clone)]
pub struct CourierClient {
    client: reqwest::Client,
    base_url: String,
}

impl CourierClient {
    /// Create a new client with the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get server health status
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .context("GET /health failed")?;
        self.handle_json(response).await
    }

    /// List registered instances with liveness
    pub async fn list_instances(&self) -> Result<InstanceListResponse> {
        let response = self
            .client
            .get(self.url("/registry/services"))
            .send()
            .await
            .context("GET /registry/services failed")?;
        self.handle_json(response).await
    }

    /// Register an instance; the server answers with an empty body
    pub async fn register(&self, instance_id: &str, address: &str) -> Result<()> {
        let url = self.url(&format!("/registry/service/{}", instance_id));
        let response = self
            .client
            .post(&url)
            .query(&[("address", address)])
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        self.handle_empty(response).await
    }

    /// Resolve a user's sticky assignment
    pub async fn assign(&self, user_id: &str) -> Result<AssignmentResponse> {
        let url = self.url(&format!("/registry/user/{}", user_id));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        self.handle_json(response).await
    }

    /// Evict an instance; returns the eviction report
    pub async fn evict(&self, instance_id: &str) -> Result<serde_json::Value> {
        let url = self.url(&format!("/registry/service/{}", instance_id));
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;
        self.handle_json(response).await
    }

    /// Run a repair pass; returns the reconcile report
    pub async fn reconcile(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(self.url("/registry/reconcile"))
            .send()
            .await
            .context("POST /registry/reconcile failed")?;
        self.handle_json(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn handle_empty(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(server_error(status, &body))
    }

    /// Handle response and deserialize JSON
    async fn handle_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            return Err(server_error(status, &body));
        }

        serde_json::from_str(&body).with_context(|| {
            format!(
                "Failed to parse response: {}",
                body.chars().take(100).collect::<String>()
            )
        })
    }
}

/// Prefer the structured `{code, message}` body when the server sent one
fn server_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) => anyhow!("Server returned {} ({}): {}", status, error.code, error.message),
        Err(_) => anyhow!(
            "Server returned error {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        ),
    }
}
