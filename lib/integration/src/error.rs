//! Error types for the integration crate.
//!
//! `ConnectorError` describes what went wrong talking to an upstream API;
//! tools convert it into the `ToolError` the dispatcher understands.

use multichat_ai::ToolError;
use std::fmt;

/// Errors from connector operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Connection to service failed.
    ConnectionFailed { reason: String },
    /// Authentication failed.
    AuthenticationFailed { reason: String },
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid operation parameters.
    InvalidParameters { operation: String, reason: String },
    /// Upstream answered with a non-success status.
    UpstreamStatus { status: u16, body: String },
    /// Protocol error.
    ProtocolError { reason: String },
    /// Timeout waiting for response.
    Timeout,
}

impl ConnectorError {
    /// Converts into the error reported for tool `name`.
    #[must_use]
    pub fn into_tool_error(self, name: &str) -> ToolError {
        match self {
            Self::Timeout => ToolError::Timeout {
                name: name.to_string(),
            },
            Self::InvalidParameters { reason, .. } => ToolError::InvalidInput {
                name: name.to_string(),
                reason,
            },
            other => ToolError::ExecutionFailed {
                name: name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "connection failed: {reason}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "authentication failed: {reason}")
            }
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidParameters { operation, reason } => {
                write!(f, "invalid parameters for '{operation}': {reason}")
            }
            Self::UpstreamStatus { status, body } => {
                write!(f, "upstream returned HTTP {status}: {body}")
            }
            Self::ProtocolError { reason } => {
                write!(f, "protocol error: {reason}")
            }
            Self::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for ConnectorError {}
