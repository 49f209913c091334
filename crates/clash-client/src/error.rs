//! Error types for client calls

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Why a client call produced no data
///
/// Callers decide whether a failed call aborts the larger operation; the
/// clients themselves never panic on a bad response.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP call itself failed or timed out
    #[error("{operation}: request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status
    #[error("{operation}: service returned {status}: {body}")]
    Status {
        operation: String,
        status: StatusCode,
        body: String,
    },

    /// The response body could not be read as the expected shape
    #[error("{operation}: unparseable response: {reason}")]
    Parse { operation: String, reason: String },

    /// The call succeeded but carried nothing usable
    #[error("{operation}: no data in response")]
    NoData { operation: String },

    /// No bearer token could be obtained
    #[error("access token unavailable: {0}")]
    Token(String),
}

impl ClientError {
    pub fn transport(operation: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            operation: operation.to_string(),
            source,
        }
    }

    pub fn parse(operation: &str, reason: impl ToString) -> Self {
        Self::Parse {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn no_data(operation: &str) -> Self {
        Self::NoData {
            operation: operation.to_string(),
        }
    }

    /// Operation the error belongs to, when known
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Transport { operation, .. }
            | Self::Status { operation, .. }
            | Self::Parse { operation, .. }
            | Self::NoData { operation } => Some(operation),
            Self::Token(_) => None,
        }
    }

    /// HTTP status reported by the service, if the call got that far
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}
