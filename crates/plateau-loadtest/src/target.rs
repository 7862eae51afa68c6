//! Target service client.
//!
//! The harness only needs three calls from the service under test: the
//! session entry point and the cart add/remove endpoints. They sit behind
//! [`CartTarget`] so that runs can be driven against a stub in tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, TargetError};

/// Cart endpoints exercised by the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Add,
    Remove,
}

impl Endpoint {
    /// Path relative to the base URL
    pub fn path(&self, item_id: u32) -> String {
        match self {
            Endpoint::Add => format!("/api/cart/add/{}", item_id),
            Endpoint::Remove => format!("/api/cart/remove/{}", item_id),
        }
    }

    /// Check label recorded for this endpoint
    pub fn check_name(&self, expected_status: u16) -> String {
        match self {
            Endpoint::Add => format!("add to cart status {}", expected_status),
            Endpoint::Remove => format!("remove from cart status {}", expected_status),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Add => write!(f, "add"),
            Endpoint::Remove => write!(f, "remove"),
        }
    }
}

/// Response of the session entry point
#[derive(Debug, Clone, Default)]
pub struct BootstrapResponse {
    pub status: u16,
    /// Every `Set-Cookie` header value, in order
    pub set_cookie: Vec<String>,
}

/// The service under test
#[async_trait]
pub trait CartTarget: Send + Sync {
    /// `GET /`
    async fn bootstrap(&self) -> Result<BootstrapResponse, TargetError>;

    /// Issue a cart request and return the HTTP status
    async fn cart(&self, endpoint: Endpoint, token: &str, item_id: u32)
        -> Result<u16, TargetError>;
}

/// Browser-like headers sent with every request
fn browser_headers() -> HeaderMap {
    const HEADERS: &[(&str, &str)] = &[
        (
            "user-agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ),
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
        ("accept-language", "en-US,en;q=0.5"),
        ("dnt", "1"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "none"),
        ("cache-control", "max-age=0"),
    ];

    let mut headers = HeaderMap::new();
    for (name, value) in HEADERS {
        headers.insert(*name, HeaderValue::from_static(*value));
    }
    headers
}

/// reqwest-backed [`CartTarget`]
#[derive(Debug, Clone)]
pub struct HttpCartTarget {
    client: reqwest::Client,
    base_url: String,
    cookie_name: String,
}

impl HttpCartTarget {
    pub fn new(
        base_url: &str,
        cookie_name: &str,
        timeout: Duration,
        max_idle_per_host: usize,
        accept_invalid_certs: bool,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .default_headers(browser_headers())
            .timeout(timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_name: cookie_name.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CartTarget for HttpCartTarget {
    async fn bootstrap(&self) -> Result<BootstrapResponse, TargetError> {
        let url = format!("{}/", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status().as_u16();
        let set_cookie = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        response.bytes().await?;

        debug!("Bootstrap {} -> {}", url, status);
        Ok(BootstrapResponse { status, set_cookie })
    }

    async fn cart(
        &self,
        endpoint: Endpoint,
        token: &str,
        item_id: u32,
    ) -> Result<u16, TargetError> {
        let url = format!("{}{}", self.base_url, endpoint.path(item_id));
        let request = match endpoint {
            Endpoint::Add => self.client.post(&url),
            Endpoint::Remove => self.client.delete(&url),
        };

        let response = request
            .header(header::COOKIE, format!("{}={}", self.cookie_name, token))
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status().as_u16();
        response.bytes().await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Endpoint::Add.path(3), "/api/cart/add/3");
        assert_eq!(Endpoint::Remove.path(7), "/api/cart/remove/7");
    }

    #[test]
    fn test_check_names() {
        assert_eq!(Endpoint::Add.check_name(200), "add to cart status 200");
        assert_eq!(
            Endpoint::Remove.check_name(200),
            "remove from cart status 200"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let target = HttpCartTarget::new(
            "http://localhost:4000/",
            "jwt_token",
            Duration::from_secs(30),
            16,
            false,
        )
        .unwrap();
        assert_eq!(target.base_url(), "http://localhost:4000");
    }
}
