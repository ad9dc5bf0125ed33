//! Error types for the update pipeline.

use thiserror::Error;

/// Errors that can occur during an update cycle.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Connection, stream or timeout failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Server public key is not in the pin set
    #[error("certificate pin mismatch for {host}")]
    CertificatePinMismatch { host: String },

    /// Server answered with a non-success status code
    #[error("unexpected status code {status}")]
    UnexpectedStatus { status: u16 },

    /// Server answered with an empty body
    #[error("empty response from update server")]
    EmptyResponse,

    /// Metadata is malformed or does not match the required shape
    #[error("metadata parse error: {0}")]
    MetadataParseError(String),

    /// No trusted key validates the metadata signature
    #[error("metadata did not pass signature check")]
    MetadataSignatureInvalid,

    /// No trusted key validates the binary signature
    #[error("update binary did not pass signature check")]
    BinarySignatureInvalid,

    /// Automatic updates are not available on this platform
    #[error("unsupported platform for automatic updates: {0}")]
    UnsupportedPlatform(String),

    /// Writing the native updater manifest or handing it over failed
    #[error("staging error: {0}")]
    StagingError(String),

    /// Version string is not a valid semantic version
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// A configured public key could not be decoded
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// A configured certificate pin could not be decoded
    #[error("invalid certificate pin: {0}")]
    InvalidPin(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The dialog collaborator failed to present a prompt
    #[error("dialog error: {0}")]
    DialogError(String),

    /// The native updater rejected the staged update
    #[error("native updater error: {0}")]
    NativeUpdaterError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Whether the next scheduled interval may retry after this error.
    ///
    /// Nothing is ever retried within the same cycle.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            UpdateError::UnsupportedPlatform(_)
                | UpdateError::InvalidKey(_)
                | UpdateError::InvalidPin(_)
                | UpdateError::ConfigError(_)
        )
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return UpdateError::UnexpectedStatus {
                status: status.as_u16(),
            };
        }
        UpdateError::NetworkError(err.to_string())
    }
}

impl From<semver::Error> for UpdateError {
    fn from(err: semver::Error) -> Self {
        UpdateError::InvalidVersion(err.to_string())
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(err: serde_json::Error) -> Self {
        UpdateError::MetadataParseError(err.to_string())
    }
}
