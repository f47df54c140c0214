//! Transport abstraction over the device's HTTP interface.
//!
//! [`Connection`](super::Connection) only needs one primitive: issue a GET for a path with
//! an already escaped query and hand back the body. Keeping that behind a trait lets tests
//! script device responses entirely in-process, the same way instrument drivers swap their
//! serial port for a mock.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::trace;

/// Issues GET requests against the remote device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `path_and_query` (starting with `/`, query already escaped) and return the body.
    ///
    /// Any network error or non-200 status is a [`SyncError::ConnectionFailure`].
    async fn get(&self, path_and_query: &str) -> SyncResult<String>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `http://192.168.0.42:8080`).
    ///
    /// `timeout` bounds each request; `None` leaves requests unbounded.
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> SyncResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SyncError::connection_with("failed to build HTTP client", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL every request path is appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path_and_query: &str) -> SyncResult<String> {
        let url = format!("{}{}", self.base_url, path_and_query);
        trace!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SyncError::connection_with(format!("request to {url} failed"), e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SyncError::connection(format!(
                "device answered {status} for {url}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SyncError::connection_with(format!("reading body of {url} failed"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let transport = HttpTransport::new("http://10.0.0.5:8080/", None).unwrap();
        assert_eq!(transport.base_url(), "http://10.0.0.5:8080");
    }

    #[tokio::test]
    async fn test_unreachable_device_is_connection_failure() {
        // Port 1 on localhost is not served; the connect fails immediately.
        let transport =
            HttpTransport::new("http://127.0.0.1:1", Some(Duration::from_millis(500))).unwrap();

        let err = transport.get("/control?cmd=start").await.unwrap_err();
        assert!(err.is_connection_failure());
    }
}
