//! Error types for shipyard-scan

use shipyard_cloud::CloudError;
use thiserror::Error;

/// Errors that abort a scan. Findings are never errors.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid repository reference: {0}")]
    InvalidRepository(String),

    #[error("repository {repo} unavailable: {reason}")]
    RepositoryUnavailable { repo: String, reason: String },

    #[error("repository host returned HTTP {status}: {body}")]
    Host { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pattern {name} failed to compile: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    pub(crate) fn from_host(repo: &str, err: CloudError) -> Self {
        match err {
            CloudError::Api { status, body, .. } => ScanError::Host { status, body },
            other => ScanError::RepositoryUnavailable {
                repo: repo.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for scan operations
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_errors_keep_status_and_body() {
        let err = ScanError::from_host("acme/tools", CloudError::api("list tree", 403, "rate limited"));
        assert!(matches!(err, ScanError::Host { status: 403, .. }));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_missing_repository_is_unavailable() {
        let err = ScanError::from_host("acme/tools", CloudError::NotFound("acme/tools@main".into()));
        let msg = err.to_string();
        assert!(msg.contains("acme/tools unavailable"));
    }
}
