//! Upload transport
//!
//! The drain scheduler talks to the collection endpoint through the
//! [`Transport`] trait, so tests can script failures and capture bodies
//! without a network.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

use super::codec::TransportPayload;

/// One-way delivery of an encoded batch to the collection endpoint.
///
/// A `send` that returns `Err` leaves the batch's transmitted markers
/// uncommitted; the same records are re-selected on the next drain cycle.
pub trait Transport {
    fn send(&self, endpoint: &str, body: &TransportPayload) -> impl Future<Output = Result<()>>;
}

/// HTTP transport posting form-encoded bodies via reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, body: &TransportPayload) -> Result<()> {
        let response = self
            .client
            .post(endpoint)
            .form(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Transport(format!(
                "endpoint error ({}): {}",
                status, error_text
            )))
        }
    }
}
