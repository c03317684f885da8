//! Pipeline configuration.
//!
//! [`ShipyardConfig::from_env`] reads `SHIPYARD_*` variables; every field can
//! also be set through the `with_*` builders, which is what tests do.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipyard_cloud::{
    ChainedTokenSource, GcloudCliTokenSource, MetadataServerTokenSource, StaticTokenSource,
    TokenCache, TokenSource, DEFAULT_TOKEN_TTL,
};
use tracing::debug;

use crate::error::{DeployError, DeployResult};
use crate::request::DeploymentRequest;

pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_IMAGE_REGISTRY: &str = "gcr.io";
pub const DEFAULT_IMAGE_NAMESPACE: &str = "mcp";
pub const DEFAULT_BUILD_TIMEOUT: &str = "1200s";

/// Fixed-interval, bounded polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest time a loop under this policy can wait.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Build status: 10 s x 60.
pub const BUILD_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(10), 60);
/// Service URL and readiness: 10 s x 30.
pub const URL_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(10), 30);
/// Service deletion before a recreate: 5 s x 24.
pub const DELETION_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(5), 24);

/// Settings applied to every published service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefaults {
    pub container_port: u16,
    pub concurrency: u32,
    pub timeout_seconds: u32,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub cpu_request: String,
    pub memory_request: String,
    pub max_scale: u32,
    pub min_scale: u32,
    /// Environment baked into every service; caller values override these.
    pub base_env: BTreeMap<String, String>,
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        let base_env = [
            ("NODE_ENV", "production"),
            ("MCP_TRANSPORT", "http"),
            ("MCP_ENDPOINT", "/mcp"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        ServiceDefaults {
            container_port: 8080,
            concurrency: 100,
            timeout_seconds: 300,
            cpu_limit: "1".to_string(),
            memory_limit: "512Mi".to_string(),
            cpu_request: "100m".to_string(),
            memory_request: "256Mi".to_string(),
            max_scale: 10,
            min_scale: 0,
            base_env,
        }
    }
}

/// Everything the pipeline needs besides the request itself.
#[derive(Clone, Serialize, Deserialize)]
pub struct ShipyardConfig {
    /// Default target project; a request may override it.
    pub project: Option<String>,
    pub region: String,
    pub image_registry: String,
    /// Prefix for image paths, service names and the `app` label.
    pub image_namespace: String,
    /// Enables fallback URL construction when status polling is exhausted.
    pub project_hash: Option<String>,
    #[serde(skip)]
    pub access_token: Option<String>,
    pub token_ttl: Duration,
    #[serde(skip)]
    pub github_token: Option<String>,
    pub build_timeout: String,
    pub max_remote_files: usize,
    pub build_poll: PollPolicy,
    pub url_poll: PollPolicy,
    pub deletion_poll: PollPolicy,
    pub service: ServiceDefaults,
    pub github_api_url: Option<String>,
    pub build_api_url: Option<String>,
    pub run_api_url: Option<String>,
}

impl std::fmt::Debug for ShipyardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShipyardConfig")
            .field("project", &self.project)
            .field("region", &self.region)
            .field("image_registry", &self.image_registry)
            .field("image_namespace", &self.image_namespace)
            .field("project_hash", &self.project_hash)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("build_poll", &self.build_poll)
            .field("url_poll", &self.url_poll)
            .field("deletion_poll", &self.deletion_poll)
            .finish_non_exhaustive()
    }
}

impl Default for ShipyardConfig {
    fn default() -> Self {
        ShipyardConfig {
            project: None,
            region: DEFAULT_REGION.to_string(),
            image_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            image_namespace: DEFAULT_IMAGE_NAMESPACE.to_string(),
            project_hash: None,
            access_token: None,
            token_ttl: DEFAULT_TOKEN_TTL,
            github_token: None,
            build_timeout: DEFAULT_BUILD_TIMEOUT.to_string(),
            max_remote_files: shipyard_scan::analyzer::DEFAULT_MAX_FILES,
            build_poll: BUILD_POLL,
            url_poll: URL_POLL,
            deletion_poll: DELETION_POLL,
            service: ServiceDefaults::default(),
            github_api_url: None,
            build_api_url: None,
            run_api_url: None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ShipyardConfig {
    /// Config targeting `project` in `region`, with every other field defaulted.
    pub fn new(project: &str, region: &str) -> Self {
        ShipyardConfig {
            project: Some(project.to_string()),
            region: region.to_string(),
            ..Default::default()
        }
    }

    /// Read configuration from `SHIPYARD_*` and `GITHUB_TOKEN`.
    pub fn from_env() -> DeployResult<Self> {
        let mut config = ShipyardConfig {
            project: env_var("SHIPYARD_PROJECT"),
            project_hash: env_var("SHIPYARD_PROJECT_HASH"),
            access_token: env_var("SHIPYARD_ACCESS_TOKEN"),
            github_token: env_var("GITHUB_TOKEN"),
            github_api_url: env_var("SHIPYARD_GITHUB_API_URL"),
            build_api_url: env_var("SHIPYARD_BUILD_API_URL"),
            run_api_url: env_var("SHIPYARD_RUN_API_URL"),
            ..Default::default()
        };
        if let Some(region) = env_var("SHIPYARD_REGION") {
            config.region = region;
        }
        if let Some(registry) = env_var("SHIPYARD_IMAGE_REGISTRY") {
            config.image_registry = registry;
        }
        if let Some(namespace) = env_var("SHIPYARD_IMAGE_NAMESPACE") {
            config.image_namespace = namespace;
        }
        if let Some(ttl) = env_var("SHIPYARD_TOKEN_TTL_SECS") {
            let secs: u64 = ttl.parse().map_err(|_| {
                DeployError::Config(format!("SHIPYARD_TOKEN_TTL_SECS is not a number: {}", ttl))
            })?;
            config.token_ttl = Duration::from_secs(secs);
        }
        debug!(?config, "loaded configuration from environment");
        Ok(config)
    }

    pub fn with_project_hash(mut self, hash: &str) -> Self {
        self.project_hash = Some(hash.to_string());
        self
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn with_github_token(mut self, token: &str) -> Self {
        self.github_token = Some(token.to_string());
        self
    }

    pub fn with_image_registry(mut self, registry: &str) -> Self {
        self.image_registry = registry.to_string();
        self
    }

    pub fn with_image_namespace(mut self, namespace: &str) -> Self {
        self.image_namespace = namespace.to_string();
        self
    }

    pub fn with_build_poll(mut self, poll: PollPolicy) -> Self {
        self.build_poll = poll;
        self
    }

    pub fn with_url_poll(mut self, poll: PollPolicy) -> Self {
        self.url_poll = poll;
        self
    }

    pub fn with_deletion_poll(mut self, poll: PollPolicy) -> Self {
        self.deletion_poll = poll;
        self
    }

    pub fn with_service_defaults(mut self, service: ServiceDefaults) -> Self {
        self.service = service;
        self
    }

    /// Project a request deploys into: its own override, else the default.
    pub fn project_for(&self, request: &DeploymentRequest) -> DeployResult<String> {
        request
            .project
            .clone()
            .or_else(|| self.project.clone())
            .ok_or_else(|| {
                DeployError::Config(
                    "no target project: set SHIPYARD_PROJECT or pass one with the request"
                        .to_string(),
                )
            })
    }

    pub fn region_for(&self, request: &DeploymentRequest) -> String {
        request.region.clone().unwrap_or_else(|| self.region.clone())
    }

    /// Bearer token source: a static token if configured, otherwise the
    /// metadata server, otherwise the local `gcloud` CLI.
    pub fn token_source(&self) -> DeployResult<Arc<dyn TokenSource>> {
        if let Some(token) = &self.access_token {
            return Ok(Arc::new(StaticTokenSource::new(token.clone())));
        }
        let metadata = MetadataServerTokenSource::new()?;
        Ok(Arc::new(ChainedTokenSource::new(vec![
            Arc::new(metadata),
            Arc::new(GcloudCliTokenSource),
        ])))
    }

    pub fn token_cache(&self) -> DeployResult<Arc<TokenCache>> {
        Ok(Arc::new(TokenCache::with_ttl(
            self.token_source()?,
            self.token_ttl,
        )))
    }
}
