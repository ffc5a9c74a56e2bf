//! Error types for Hondana.
//!
//! Uses `thiserror` for structured error definitions that provide
//! clear context about what went wrong.

use thiserror::Error;

/// Main error type for resolving data from an upstream source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The circuit for this host is open; no request was attempted.
    #[error(
        "Requests to {host} are temporarily disabled due to service degradation. Please try again in {retry_after_minutes} minutes."
    )]
    ServiceDegraded {
        host: String,
        retry_after_minutes: u64,
    },

    /// The upstream did not answer within the request timeout.
    #[error("Upstream timed out: {url}")]
    UpstreamTimeout { url: String },

    /// The upstream answered with anything other than 200.
    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamHttp { url: String, status: u16 },

    /// The request could not be sent (connection refused, TLS, body read).
    #[error("Request failed: {0}")]
    Request(String),

    /// A feed chapter has neither a scanlation group nor an uploader.
    #[error("Chapter {chapter_id} is missing a scanlator or user uploader")]
    MissingAttribution { chapter_id: String },

    /// A required field was missing or a payload was malformed.
    #[error("Failed to parse upstream data: {0}")]
    Parse(String),

    /// No adapter is registered under this key.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// The identifier can't be used by this source.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl SourceError {
    /// Returns true for the "upstream unavailable" family.
    ///
    /// Callers may retry these later; the remaining variants are tied to the
    /// request itself and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::ServiceDegraded { .. }
                | SourceError::UpstreamTimeout { .. }
                | SourceError::UpstreamHttp { .. }
                | SourceError::Request(_)
        )
    }

    /// Returns true if the upstream answered 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::UpstreamHttp { status: 404, .. })
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

/// Error type for the URL codecs.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// Input is not valid unpadded URL-safe base64.
    #[error("Invalid base64 input: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// Decoded bytes are not UTF-8.
    #[error("Decoded value is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}
