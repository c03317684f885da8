//! Error taxonomy of the deployment pipeline.

use shipyard_cloud::{BuildStatus, CloudError};
use shipyard_scan::ScanError;

use crate::pipeline::Stage;

/// Errors raised while taking a repository to a running service.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The request cannot be acted on as given.
    #[error("invalid deployment request: {0}")]
    Validation(String),

    /// The build service refused the job.
    #[error("build submission failed: {0}")]
    Build(String),

    /// The build reached a terminal state other than success.
    #[error("build {build_id} ended with status {status} (logs: {log_url})")]
    BuildFailed {
        build_id: String,
        status: BuildStatus,
        log_url: String,
    },

    /// The build was still running when the poll ceiling was reached.
    #[error("build {build_id} still unfinished after {attempts} status checks")]
    BuildTimedOut { build_id: String, attempts: u32 },

    #[error("{0}")]
    Deploy(String),

    #[error("no ready URL for service {service} after {attempts} status checks")]
    UrlUnresolved { service: String, attempts: u32 },

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DeployError {
    /// Pipeline stage this error belongs to, when the variant alone says so.
    /// Remote API errors can happen in any stage and return `None`.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DeployError::Validation(_) | DeployError::Scan(_) | DeployError::Config(_) => {
                Some(Stage::Validating)
            }
            DeployError::Build(_)
            | DeployError::BuildFailed { .. }
            | DeployError::BuildTimedOut { .. } => Some(Stage::Building),
            DeployError::Deploy(_) | DeployError::UrlUnresolved { .. } => Some(Stage::Deploying),
            DeployError::Cloud(_) => None,
        }
    }

    /// HTTP status of the remote call that triggered the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            DeployError::Cloud(err) => err.status(),
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type DeployResult<T> = std::result::Result<T, DeployError>;
