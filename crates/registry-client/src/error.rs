//! Registry client errors

use thiserror::Error;

/// Errors that can occur when talking to a container registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry answered with a non-success status
    #[error("Registry API error: {status} from {url} - {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
        /// Response body (truncated)
        body: String,
    },

    /// JSON deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Resolved content is neither an index nor a manifest
    #[error("unknown media type: {0}")]
    UnknownMediaType(String),

    /// Image config blob carried no architecture
    #[error("unable to parse architecture from pulled image config for {0}")]
    MissingArchitecture(String),

    /// Fetched bytes do not hash to the descriptor digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest the descriptor declared
        expected: String,
        /// Digest computed from the fetched bytes
        actual: String,
    },

    /// Anonymous token exchange failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Manifest or blob not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl RegistryError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Network failures, throttling and server-side errors are transient.
    /// Malformed content, unknown media types and bad references are data
    /// errors and fail the same way on every attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Authentication(_) => true,
            Self::Serialization(_)
            | Self::InvalidReference(_)
            | Self::UnknownMediaType(_)
            | Self::MissingArchitecture(_)
            | Self::DigestMismatch { .. }
            | Self::NotFound(_) => false,
        }
    }
}
