//! Storage provider client.
//!
//! [`RemoteResourceClient`] is the seam between the core and the network:
//! two authenticated GET operations with typed failures. [`GraphClient`] is
//! the reqwest implementation used by the server and the CLI; tests swap in
//! an in-memory implementation.
//!
//! # Status mapping
//!
//! | HTTP | `get_json` | `get_bytes` |
//! |------|-----------|-------------|
//! | 2xx | parsed JSON | body bytes |
//! | 401 | [`RemoteError::Unauthorized`] | [`RemoteError::Status`] |
//! | 403 | [`RemoteError::Forbidden`] | [`RemoteError::Status`] |
//! | 404 | [`RemoteError::NotFound`] | [`RemoteError::Status`] |
//! | other | [`RemoteError::Status`] | [`RemoteError::Status`] |
//!
//! Connection, timeout and decode problems surface as
//! [`RemoteError::Transport`].

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::GraphConfig;
use crate::credential::Credential;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

/// Authenticated read access to the storage provider.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    /// GET `url` and parse the body as JSON.
    async fn get_json(&self, url: &str, cred: &Credential)
        -> Result<serde_json::Value, RemoteError>;

    /// GET `url` and return the raw body. Every non-2xx answer is
    /// [`RemoteError::Status`].
    async fn get_bytes(&self, url: &str, cred: &Credential) -> Result<Vec<u8>, RemoteError>;
}

/// reqwest-backed [`RemoteResourceClient`].
///
/// Every request carries `Authorization: Bearer {token}`, including content
/// downloads, which follow the provider's redirect to the storage host.
#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
}

impl GraphClient {
    pub fn new(config: &GraphConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("drive-qa/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    async fn send(&self, url: &str, cred: &Credential) -> Result<reqwest::Response, RemoteError> {
        tracing::debug!(url, "provider GET");
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, cred.header_value())
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl RemoteResourceClient for GraphClient {
    async fn get_json(
        &self,
        url: &str,
        cred: &Credential,
    ) -> Result<serde_json::Value, RemoteError> {
        let response = self.send(url, cred).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        match status.as_u16() {
            401 => Err(RemoteError::Unauthorized),
            403 => Err(RemoteError::Forbidden),
            404 => Err(RemoteError::NotFound),
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(RemoteError::Status { status: code, body })
            }
        }
    }

    async fn get_bytes(&self, url: &str, cred: &Credential) -> Result<Vec<u8>, RemoteError> {
        let response = self.send(url, cred).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
