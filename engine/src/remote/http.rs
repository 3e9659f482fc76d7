//! HTTP client for the remote contract.
//!
//! ```text
//! GET    /api/{collection}/sync?since={ts}   -> [Record]
//! POST   /api/{collection}                   <- Record
//! PUT    /api/{collection}/{id}              <- {"payload": ...}
//! DELETE /api/{collection}/{id}
//! GET    /health
//! ```

use super::{RemoteApi, RemoteError};
use crate::error::{ConfigError, NetworkError};
use crate::{Record, Timestamp};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`RemoteApi`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base: Url,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    payload: &'a serde_json::Value,
}

impl HttpRemote {
    /// Client for `base_url` with a 30 second request timeout.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "remote_url",
                value: e.to_string(),
            })?;
        Self::with_client(base_url, client)
    }

    /// Reuse an existing client (shared connection pool, custom TLS).
    pub fn with_client(base_url: &str, client: Client) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: "remote_url",
            value: base_url.to_string(),
        };
        let base = Url::parse(base_url).map_err(|_| invalid())?;
        if base.cannot_be_a_base() {
            return Err(invalid());
        }
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn check(
        &self,
        sent: Result<Response, reqwest::Error>,
        missing_is_rejection: bool,
    ) -> Result<Response, RemoteError> {
        let response = sent.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status.as_u16(), &body, missing_is_rejection);
        tracing::debug!(status = status.as_u16(), error = %err, "remote call failed");
        Err(err)
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        NetworkError::Timeout.into()
    } else {
        NetworkError::Unreachable(err.to_string()).into()
    }
}

/// Map a non-success status to a [`RemoteError`].
///
/// `missing_is_rejection` makes 404 a rejection (update or delete of a record
/// the remote does not know) instead of an invalid request.
pub fn classify_status(status: u16, body: &str, missing_is_rejection: bool) -> RemoteError {
    match status {
        409 | 412 => RemoteError::Rejected {
            server_record: serde_json::from_str(body).ok(),
            reason: format!("remote refused with status {status}"),
        },
        404 if missing_is_rejection => RemoteError::Rejected {
            server_record: None,
            reason: "record does not exist on the remote".into(),
        },
        408 | 429 | 500..=599 => NetworkError::Server(status).into(),
        400..=499 => {
            let reason = if body.trim().is_empty() {
                format!("status {status}")
            } else {
                format!("status {status}: {}", body.trim())
            };
            RemoteError::Invalid(reason)
        }
        _ => NetworkError::Server(status).into(),
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn fetch_changes(
        &self,
        collection: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<Record>, RemoteError> {
        let mut request = self.client.get(self.endpoint(&["api", collection, "sync"]));
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        let response = self.check(request.send().await, false).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Invalid(format!("unreadable pull response: {e}")))
    }

    async fn create(&self, record: &Record) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.endpoint(&["api", &record.collection]))
            .json(record);
        self.check(request.send().await, false).await?;
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RemoteError> {
        let request = self
            .client
            .put(self.endpoint(&["api", collection, id]))
            .json(&UpdateBody { payload });
        self.check(request.send().await, true).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let request = self.client.delete(self.endpoint(&["api", collection, id]));
        self.check(request.send().await, true).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let request = self.client.get(self.endpoint(&["health"]));
        self.check(request.send().await, false).await?;
        Ok(())
    }
}
