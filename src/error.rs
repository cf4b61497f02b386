//! Error types for the discovery engine.
//!
//! Strategy-level failures are not errors: they are classified outcomes (see
//! [`crate::health::classifier`]). The types here cover the seams where a
//! real failure can still occur: HTTP transport, configuration, and the
//! file-backed stores.

use thiserror::Error;

/// Transport-level failure of a single HTTP GET.
///
/// Non-2xx statuses are not errors; they come back in
/// [`crate::fetch::FetchedPage::status`].
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read body: {0}")]
    Body(String),
}

impl FetchError {
    /// Connection errors and timeouts count as network trouble; a malformed
    /// URL does not.
    pub fn is_network(&self) -> bool {
        !matches!(self, FetchError::InvalidUrl(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_builder() {
            FetchError::InvalidUrl(e.to_string())
        } else if e.is_body() || e.is_decode() {
            FetchError::Body(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown source: {0}")]
    UnknownSource(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_not_network() {
        assert!(!FetchError::InvalidUrl("nope".into()).is_network());
        assert!(FetchError::Timeout("slow".into()).is_network());
        assert!(FetchError::Connect("refused".into()).is_network());
    }

    #[test]
    fn test_error_messages() {
        let e = StoreError::UnknownSource("abc".into());
        assert_eq!(e.to_string(), "unknown source: abc");
        let e = ConfigError::Invalid("bad".into());
        assert_eq!(e.to_string(), "invalid config: bad");
    }
}
