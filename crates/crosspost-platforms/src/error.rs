//! Error types for the platform adapters.

use crosspost_scheduler::{AdapterError, PlatformId};
use thiserror::Error;

/// Errors that can occur when talking to a platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Required credentials are not configured.
    #[error("{platform} credentials are missing: {missing}")]
    MissingCredentials {
        platform: PlatformId,
        missing: String,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rate limited.
    #[error("rate limited on {endpoint}{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        endpoint: String,
        retry_after_secs: Option<u64>,
    },

    /// XRPC error from a PDS.
    #[error("XRPC error: {error} - {message}")]
    Xrpc { error: String, message: String },

    /// Non-success response without a structured error body.
    #[error("request failed ({status}): {message}")]
    Api { status: u16, message: String },

    /// Content exceeds the platform's length limit.
    #[error("{platform} allows {limit} characters, content has {length}")]
    ContentTooLong {
        platform: PlatformId,
        length: usize,
        limit: usize,
    },

    /// A stored identifier cannot address a remote post.
    #[error("invalid remote reference: {0}")]
    InvalidReference(String),

    /// A media attachment could not be read from disk.
    #[error("cannot read media {path}: {source}")]
    Media {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl PlatformError {
    /// Check if an error is transient and worth retrying within one send.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::Api { status, .. } => *status >= 500,
            Self::Xrpc { error, .. } => {
                error == "UpstreamFailure"
                    || error == "UpstreamTimeout"
                    || error == "InternalServerError"
                    || error == "ServiceUnavailable"
            }
            _ => false,
        }
    }

    /// Check if an error indicates an expired session token.
    pub fn is_expired_token(&self) -> bool {
        matches!(self, Self::Xrpc { error, .. } if error == "ExpiredToken")
    }

    /// Convert into the engine's error, reporting how many attempts were made.
    pub fn into_adapter_error(self, attempts: u32) -> AdapterError {
        match self {
            Self::MissingCredentials { .. } => AdapterError::Configuration(self.to_string()),
            Self::ContentTooLong { .. } => AdapterError::Validation(self.to_string()),
            other => AdapterError::delivery(other.to_string(), attempts),
        }
    }
}
