//! REST client for snapshot and bootstrap requests.
//!
//! A thin wrapper over a pooled `reqwest` client: the pool gives HTTP
//! keep-alive between snapshot requests, the client stack does TLS with
//! hostname verification, and a single deadline covers resolve, connect,
//! handshake, and body. The feed handler keeps at most one request in
//! flight and tags responses with a generation counter so a cancelled
//! request's late completion is dropped instead of observed.

use std::time::Duration;

use anyhow::{Context, Result};

/// Completed HTTP exchange. Non-2xx statuses are returned, not errors;
/// the caller decides whether 429 means "wait" or 500 means "resync".
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    /// `true` for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `true` for the rate-limit statuses (429, plus Binance's 418 ban).
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429 || self.status == 418
    }
}

/// Pooled HTTPS client with a hard per-request deadline.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
}

impl RestClient {
    /// Build a client whose requests are bounded by `timeout` end to end.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// GET `https://{host}:{port}{target}`.
    pub async fn get(&self, host: &str, port: &str, target: &str) -> Result<RestResponse> {
        let url = build_url(host, port, target);
        tracing::debug!(url = %url, "GET");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .with_context(|| format!("GET {url}: failed to read body"))?;

        Ok(RestResponse { status, body })
    }

    /// POST `https://{host}:{port}{target}` with a JSON body (may be empty).
    pub async fn post(
        &self,
        host: &str,
        port: &str,
        target: &str,
        body: &str,
    ) -> Result<RestResponse> {
        let url = build_url(host, port, target);
        tracing::debug!(url = %url, "POST");

        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .with_context(|| format!("POST {url}: failed to read body"))?;

        Ok(RestResponse { status, body })
    }
}

fn build_url(host: &str, port: &str, target: &str) -> String {
    format!("https://{host}:{port}{target}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        assert_eq!(
            build_url("api.binance.com", "443", "/api/v3/depth?symbol=BTCUSDT&limit=400"),
            "https://api.binance.com:443/api/v3/depth?symbol=BTCUSDT&limit=400"
        );
    }

    #[test]
    fn test_response_classification() {
        let ok = RestResponse { status: 200, body: String::new() };
        assert!(ok.is_success() && !ok.is_rate_limited());

        let limited = RestResponse { status: 429, body: String::new() };
        assert!(!limited.is_success() && limited.is_rate_limited());

        let banned = RestResponse { status: 418, body: String::new() };
        assert!(banned.is_rate_limited());

        let server_err = RestResponse { status: 503, body: String::new() };
        assert!(!server_err.is_success() && !server_err.is_rate_limited());
    }

    #[test]
    fn test_client_builds_with_timeout() {
        let client = RestClient::new(Duration::from_secs(5));
        assert!(client.is_ok());
    }
}
