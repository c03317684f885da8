//! Remote build service API (Cloud Build REST).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::TokenCache;
use crate::error::CloudError;
use crate::http;
use crate::CloudResult;

/// One step of a build: a builder image plus its command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl BuildStep {
    pub fn new(image: &str, args: &[&str]) -> Self {
        BuildStep {
            name: image.to_string(),
            entrypoint: None,
            args: args.iter().map(|a| a.to_string()).collect(),
            dir: None,
        }
    }

    /// A `bash -c <script>` step.
    pub fn script(image: &str, script: impl Into<String>) -> Self {
        BuildStep {
            name: image.to_string(),
            entrypoint: Some("bash".to_string()),
            args: vec!["-c".to_string(), script.into()],
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    pub logging: String,
    pub machine_type: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            logging: "CLOUD_LOGGING_ONLY".to_string(),
            machine_type: "E2_MEDIUM".to_string(),
        }
    }
}

/// Build description submitted to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    pub steps: Vec<BuildStep>,
    pub images: Vec<String>,
    pub options: BuildOptions,
    /// Server-side timeout, e.g. `"1200s"`.
    pub timeout: String,
}

/// Closed status vocabulary of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Running,
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl BuildStatus {
    /// Map the service's wire status onto the closed vocabulary.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "WORKING" => BuildStatus::Running,
            "SUCCESS" => BuildStatus::Success,
            "FAILURE" | "INTERNAL_ERROR" => BuildStatus::Failure,
            "TIMEOUT" | "EXPIRED" => BuildStatus::Timeout,
            "CANCELLED" => BuildStatus::Cancelled,
            // QUEUED, PENDING, STATUS_UNKNOWN
            _ => BuildStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildStatus::Queued | BuildStatus::Running)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Timeout => "timeout",
            BuildStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a remote build job. Only ever produced by reading the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: String,
    pub status: BuildStatus,
    pub log_url: Option<String>,
}

#[async_trait]
pub trait BuildService: Send + Sync {
    async fn submit(&self, project: &str, spec: &BuildSpec) -> CloudResult<BuildJob>;

    async fn get_build(&self, project: &str, build_id: &str) -> CloudResult<BuildJob>;
}

pub const CLOUD_BUILD_API_URL: &str = "https://cloudbuild.googleapis.com";

/// Cloud Build v1 client.
pub struct CloudBuildClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl CloudBuildClient {
    pub fn new(tokens: Arc<TokenCache>) -> CloudResult<Self> {
        Self::with_base_url(CLOUD_BUILD_API_URL, tokens)
    }

    pub fn with_base_url(base_url: &str, tokens: Arc<TokenCache>) -> CloudResult<Self> {
        Ok(CloudBuildClient {
            http: http::build_client()?,
            base_url: base_url.to_string(),
            tokens,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBuild {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    log_url: Option<String>,
}

#[derive(Deserialize)]
struct OperationMetadata {
    build: Option<WireBuild>,
}

#[derive(Deserialize)]
struct Operation {
    metadata: Option<OperationMetadata>,
}

fn into_job(operation: &str, build: WireBuild) -> CloudResult<BuildJob> {
    let id = build
        .id
        .ok_or_else(|| CloudError::decode(operation, "no build id returned"))?;
    Ok(BuildJob {
        id,
        status: BuildStatus::from_wire(build.status.as_deref().unwrap_or("QUEUED")),
        log_url: build.log_url,
    })
}

#[async_trait]
impl BuildService for CloudBuildClient {
    async fn submit(&self, project: &str, spec: &BuildSpec) -> CloudResult<BuildJob> {
        let operation = "submit build";
        let token = self.tokens.token().await?;
        let url = http::join(&self.base_url, &format!("v1/projects/{}/builds", project));
        let request = self.http.post(url).bearer_auth(token).json(spec);
        let response = http::send(operation, request).await?;
        let op: Operation = http::read_json(operation, response).await?;
        let build = op
            .metadata
            .and_then(|m| m.build)
            .ok_or_else(|| CloudError::decode(operation, "operation carries no build"))?;
        let job = into_job(operation, build)?;
        debug!(build_id = %job.id, "build accepted");
        Ok(job)
    }

    async fn get_build(&self, project: &str, build_id: &str) -> CloudResult<BuildJob> {
        let operation = "get build status";
        let token = self.tokens.token().await?;
        let url = http::join(
            &self.base_url,
            &format!("v1/projects/{}/builds/{}", project, build_id),
        );
        let response = http::send(operation, self.http.get(url).bearer_auth(token)).await?;
        let build: WireBuild = http::read_json(operation, response).await?;
        into_job(operation, build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_status_mapping() {
        assert_eq!(BuildStatus::from_wire("QUEUED"), BuildStatus::Queued);
        assert_eq!(BuildStatus::from_wire("PENDING"), BuildStatus::Queued);
        assert_eq!(BuildStatus::from_wire("WORKING"), BuildStatus::Running);
        assert_eq!(BuildStatus::from_wire("SUCCESS"), BuildStatus::Success);
        assert_eq!(BuildStatus::from_wire("INTERNAL_ERROR"), BuildStatus::Failure);
        assert_eq!(BuildStatus::from_wire("EXPIRED"), BuildStatus::Timeout);
        assert_eq!(BuildStatus::from_wire("CANCELLED"), BuildStatus::Cancelled);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BuildStatus::Queued.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
        assert!(BuildStatus::Success.is_terminal());
        assert!(BuildStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_build_spec_serializes_camel_case() {
        let spec = BuildSpec {
            steps: vec![BuildStep::script("gcr.io/cloud-builders/gcloud", "ls")],
            images: vec!["gcr.io/p/i:t".to_string()],
            options: BuildOptions::default(),
            timeout: "1200s".to_string(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["options"]["machineType"], "E2_MEDIUM");
        assert_eq!(json["steps"][0]["entrypoint"], "bash");
        assert!(json["steps"][0].get("dir").is_none());
    }

    #[test]
    fn test_operation_without_build_id_is_decode_error() {
        let err = into_job("submit build", WireBuild {
            id: None,
            status: None,
            log_url: None,
        })
        .unwrap_err();
        assert!(matches!(err, CloudError::Decode { .. }));
    }
}
