//! REST connector shared by the HTTP-backed tools.
//!
//! Each upstream API is reached with a single authenticated GET; the
//! connector maps transport failures and non-success statuses onto
//! `ConnectorError`.

use crate::error::ConnectorError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Request, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

/// Information about a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    /// Unique identifier for this connector.
    pub id: String,
    /// Base URL requests are resolved against.
    pub base_url: String,
}

/// HTTP connector for one upstream API.
#[derive(Debug, Clone)]
pub struct RestConnector {
    client: Client,
    info: ConnectorInfo,
}

impl RestConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(client: Client, id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            info: ConnectorInfo {
                id: id.into(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
        }
    }

    /// Returns information about this connector.
    #[must_use]
    pub fn info(&self) -> &ConnectorInfo {
        &self.info
    }

    /// Builds a GET request for `path` with query parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ProtocolError` if the URL is invalid.
    pub fn build_get(&self, path: &str, query: &[(&str, &str)]) -> Result<Request, ConnectorError> {
        let url = format!("{}/{}", self.info.base_url, path.trim_start_matches('/'));
        self.client
            .get(url)
            .query(query)
            .build()
            .map_err(|e| ConnectorError::ProtocolError {
                reason: e.to_string(),
            })
    }

    /// Executes a GET and returns the response body as text.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectorError` on transport failure or non-success status.
    #[instrument(skip(self, query), fields(connector = %self.info.id))]
    pub async fn get_text(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<String, ConnectorError> {
        let request = self.build_get(path, query)?;
        let response = self.client.execute(request).await.map_err(transport_error)?;

        let status = response.status();
        debug!(status = status.as_u16(), "upstream responded");
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body, retry_after_secs));
        }

        response.text().await.map_err(transport_error)
    }

    /// Executes a GET and decodes the response body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectorError` on transport failure, non-success status,
    /// or an undecodable body.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<JsonValue, ConnectorError> {
        let body = self.get_text(path, query).await?;
        serde_json::from_str(&body).map_err(|e| ConnectorError::ProtocolError {
            reason: e.to_string(),
        })
    }
}

fn transport_error(error: reqwest::Error) -> ConnectorError {
    if error.is_timeout() {
        ConnectorError::Timeout
    } else if error.is_connect() {
        ConnectorError::ConnectionFailed {
            reason: error.to_string(),
        }
    } else {
        ConnectorError::ProtocolError {
            reason: error.to_string(),
        }
    }
}

/// Maps a non-success status onto a connector error.
#[must_use]
pub fn status_error(
    status: StatusCode,
    body: String,
    retry_after_secs: Option<u64>,
) -> ConnectorError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectorError::AuthenticationFailed { reason: body }
        }
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited { retry_after_secs },
        _ => ConnectorError::UpstreamStatus {
            status: status.as_u16(),
            body,
        },
    }
}
