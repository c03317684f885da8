//! Error types for shipyard-cloud

use thiserror::Error;

/// Errors raised by remote service clients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    /// The remote API answered with a non-success status.
    #[error("{operation} failed: HTTP {status}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// Credentials could not be obtained or were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A response body did not have the expected shape.
    #[error("unexpected response from {operation}: {message}")]
    Decode { operation: String, message: String },

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CloudError {
    pub fn api(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        CloudError::Api {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, err: &reqwest::Error) -> Self {
        CloudError::Transport {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    pub fn decode(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CloudError::Decode {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Api { status, .. } => Some(*status),
            CloudError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// 409 Conflict from the remote API.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// 5xx or no response at all.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Transport { .. } => true,
            CloudError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_carries_status_and_body() {
        let err = CloudError::api("create service", 403, "permission denied");
        let msg = err.to_string();
        assert!(msg.contains("create service"));
        assert!(msg.contains("403"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_conflict_and_transient_classification() {
        assert!(CloudError::api("create", 409, "").is_conflict());
        assert!(!CloudError::api("create", 400, "").is_conflict());
        assert!(CloudError::api("get", 503, "").is_transient());
        assert!(!CloudError::Auth("bad key".into()).is_transient());
        assert_eq!(CloudError::NotFound("svc".into()).status(), Some(404));
    }
}
