//! Publishing built images as hosted services.
//!
//! A deployment probes for the service, then creates it or merge-patches it in
//! place. Only a patch the platform refuses as conflicting (409/422) falls
//! back to delete, wait for the deletion, create. The service URL is often
//! missing from the write response, so it is polled for together with the
//! `Ready` condition; a service only counts as deployed once both are seen on
//! the same read.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use shipyard_cloud::hosting::{
    Container, ContainerPort, EnvVar, ObjectMeta, ResourceRequirements, RevisionSpec,
    RevisionTemplate, ServiceSpec, TrafficTarget,
};
use shipyard_cloud::{
    CloudError, HostingPlatform, LogEntry, ServiceResource, ServiceTarget, ALL_USERS,
    INVOKER_ROLE,
};
use tracing::{debug, info, warn};

use crate::config::ShipyardConfig;
use crate::error::{DeployError, DeployResult};
use crate::metrics::METRICS;
use crate::obs;
use crate::request::{normalize, repo_slug, DeploymentRequest, MAX_SERVICE_NAME_LEN};

pub const INGRESS_ANNOTATION: &str = "run.googleapis.com/ingress";
pub const MAX_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/maxScale";
pub const MIN_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/minScale";
pub const CPU_THROTTLING_ANNOTATION: &str = "run.googleapis.com/cpu-throttling";
pub const EXECUTION_ENV_ANNOTATION: &str = "run.googleapis.com/execution-environment";
pub const RESTARTED_AT_ANNOTATION: &str = "shipyard.dev/restartedAt";

/// Reserved by the platform; callers never get to set it.
pub const RESERVED_PORT_VAR: &str = "PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployAction {
    Created,
    Patched,
    Recreated,
}

/// Outcome of granting unauthenticated invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicAccess {
    AlreadyPublic,
    Granted,
    /// The policy could not be read, written or confirmed. Not fatal.
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedService {
    pub service_name: String,
    pub url: String,
    pub image: String,
    pub action: DeployAction,
    pub public_access: PublicAccess,
    /// The URL was constructed and probed rather than reported by the platform.
    pub url_from_fallback: bool,
}

pub struct DeploymentManager {
    platform: Arc<dyn HostingPlatform>,
    config: Arc<ShipyardConfig>,
}

impl DeploymentManager {
    pub fn new(platform: Arc<dyn HostingPlatform>, config: Arc<ShipyardConfig>) -> Self {
        Self { platform, config }
    }

    /// Where `request` deploys to.
    pub fn target_for(&self, request: &DeploymentRequest) -> DeployResult<ServiceTarget> {
        let project = self.config.project_for(request)?;
        let region = self.config.region_for(request);
        let name = request.service_name_with_prefix(&self.config.image_namespace)?;
        Ok(ServiceTarget::new(&project, &region, &name))
    }

    /// Desired service resource running `image`.
    pub fn service_resource(
        &self,
        target: &ServiceTarget,
        request: &DeploymentRequest,
        image: &str,
    ) -> ServiceResource {
        let defaults = &self.config.service;

        let labels = BTreeMap::from([
            ("app".to_string(), label_value(&self.config.image_namespace)),
            ("repository".to_string(), label_value(&repo_slug(&request.repo))),
        ]);
        let annotations = BTreeMap::from([(INGRESS_ANNOTATION.to_string(), "all".to_string())]);
        let template_annotations = BTreeMap::from([
            (MAX_SCALE_ANNOTATION.to_string(), defaults.max_scale.to_string()),
            (MIN_SCALE_ANNOTATION.to_string(), defaults.min_scale.to_string()),
            (CPU_THROTTLING_ANNOTATION.to_string(), "false".to_string()),
            (EXECUTION_ENV_ANNOTATION.to_string(), "gen2".to_string()),
        ]);

        let container = Container {
            image: image.to_string(),
            ports: vec![ContainerPort {
                name: Some("http1".to_string()),
                container_port: defaults.container_port,
            }],
            env: merged_env(&defaults.base_env, &request.env),
            resources: ResourceRequirements {
                limits: BTreeMap::from([
                    ("cpu".to_string(), defaults.cpu_limit.clone()),
                    ("memory".to_string(), defaults.memory_limit.clone()),
                ]),
                requests: BTreeMap::from([
                    ("cpu".to_string(), defaults.cpu_request.clone()),
                    ("memory".to_string(), defaults.memory_request.clone()),
                ]),
            },
        };

        ServiceResource {
            metadata: ObjectMeta {
                name: target.name.clone(),
                namespace: Some(target.project.clone()),
                labels,
                annotations,
            },
            spec: ServiceSpec {
                template: RevisionTemplate {
                    metadata: ObjectMeta {
                        annotations: template_annotations,
                        ..Default::default()
                    },
                    spec: RevisionSpec {
                        container_concurrency: defaults.concurrency,
                        timeout_seconds: defaults.timeout_seconds,
                        containers: vec![container],
                    },
                },
                traffic: vec![TrafficTarget::latest()],
            },
            ..Default::default()
        }
    }

    /// Publish `image` for `request` and wait until it is reachable.
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
        image: &str,
    ) -> DeployResult<DeployedService> {
        let target = self.target_for(request)?;
        let desired = self.service_resource(&target, request, image);

        let (written, action) = self.create_or_update(&target, &desired).await?;
        info!(service = %target, ?action, "service written");

        let (url, url_from_fallback) = self.resolve_url(&target, &written).await?;
        let public_access = self.allow_public_access(&target).await;

        Ok(DeployedService {
            service_name: target.name,
            url,
            image: image.to_string(),
            action,
            public_access,
            url_from_fallback,
        })
    }

    async fn create_or_update(
        &self,
        target: &ServiceTarget,
        desired: &ServiceResource,
    ) -> DeployResult<(ServiceResource, DeployAction)> {
        if self.platform.get_service(target).await?.is_none() {
            match self.platform.create_service(target, desired).await {
                Ok(written) => return Ok((written, DeployAction::Created)),
                Err(err) if err.is_conflict() => {
                    info!(service = %target, "service appeared concurrently, patching instead");
                }
                Err(err) => return Err(err.into()),
            }
        }

        match self.platform.patch_service(target, desired).await {
            Ok(written) => Ok((written, DeployAction::Patched)),
            Err(err) if needs_recreate(&err) => {
                warn!(service = %target, error = %err, "patch refused, recreating service");
                let written = self.recreate(target, desired).await?;
                Ok((written, DeployAction::Recreated))
            }
            Err(CloudError::NotFound(_)) => {
                info!(service = %target, "service vanished before patch, creating");
                let written = self.platform.create_service(target, desired).await?;
                Ok((written, DeployAction::Created))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn recreate(
        &self,
        target: &ServiceTarget,
        desired: &ServiceResource,
    ) -> DeployResult<ServiceResource> {
        self.delete_service(target).await?;
        self.wait_until_deleted(target).await?;
        Ok(self.platform.create_service(target, desired).await?)
    }

    async fn wait_until_deleted(&self, target: &ServiceTarget) -> DeployResult<()> {
        let poll = self.config.deletion_poll;
        for attempt in 1..=poll.max_attempts {
            tokio::time::sleep(poll.interval).await;
            METRICS.inc_status_polls();
            match self.platform.get_service(target).await {
                Ok(None) => return Ok(()),
                Ok(Some(_)) => debug!(service = %target, attempt, "deletion still in progress"),
                Err(err) if err.is_transient() => {
                    warn!(service = %target, attempt, error = %err, "deletion status unavailable")
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(DeployError::Deploy(format!(
            "service {} still present after {} deletion checks",
            target.name, poll.max_attempts
        )))
    }

    /// External URL of a freshly written service, waiting for readiness.
    ///
    /// Returns the URL and whether it came from the constructed fallback.
    pub async fn resolve_url(
        &self,
        target: &ServiceTarget,
        written: &ServiceResource,
    ) -> DeployResult<(String, bool)> {
        if let Some(url) = written.immediate_url().filter(|_| written.is_ready()) {
            obs::emit_url_resolved(&target.name, url, 0, false);
            return Ok((url.to_string(), false));
        }

        let poll = self.config.url_poll;
        let mut seen_url = written.immediate_url().is_some();
        for attempt in 1..=poll.max_attempts {
            tokio::time::sleep(poll.interval).await;
            METRICS.inc_status_polls();

            let observed = match self.platform.get_service(target).await {
                Ok(Some(observed)) => observed,
                Ok(None) => {
                    debug!(service = %target, attempt, "service not visible yet");
                    continue;
                }
                Err(err) if err.is_transient() => {
                    warn!(service = %target, attempt, error = %err, "service status unavailable");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            match (observed.polled_url(), observed.is_ready()) {
                (Some(url), true) => {
                    obs::emit_url_resolved(&target.name, url, attempt, false);
                    return Ok((url.to_string(), false));
                }
                (Some(_), false) => {
                    seen_url = true;
                    debug!(service = %target, attempt, "url assigned, revision not ready");
                }
                (None, _) => debug!(service = %target, attempt, "no url yet"),
            }
        }

        // A URL that never became ready is not worth guessing around.
        if !seen_url {
            if let Some(url) = self.fallback_url(target).await {
                obs::emit_url_resolved(&target.name, &url, poll.max_attempts, true);
                return Ok((url, true));
            }
        }

        Err(DeployError::UrlUnresolved {
            service: target.name.clone(),
            attempts: poll.max_attempts,
        })
    }

    /// `https://{service}-{hash}-{region}.a.run.app`, if a project hash is
    /// configured and the address answers with anything below 500.
    async fn fallback_url(&self, target: &ServiceTarget) -> Option<String> {
        let hash = self.config.project_hash.as_deref()?;
        let url = format!("https://{}-{}-{}.a.run.app", target.name, hash, target.region);
        match self.platform.probe_url(&url).await {
            Ok(status) if status < 500 => {
                info!(service = %target, url = %url, status, "constructed url verified");
                Some(url)
            }
            Ok(status) => {
                warn!(service = %target, url = %url, status, "constructed url answered with a server error");
                None
            }
            Err(err) => {
                warn!(service = %target, url = %url, error = %err, "constructed url unreachable");
                None
            }
        }
    }

    /// Read-modify-write the invoker policy so anyone may call the service,
    /// then re-read it to confirm. Problems are logged, never raised.
    pub async fn allow_public_access(&self, target: &ServiceTarget) -> PublicAccess {
        let mut policy = match self.platform.get_iam_policy(target).await {
            Ok(policy) => policy,
            Err(err) => {
                warn!(service = %target, error = %err, "could not read invoker policy");
                return PublicAccess::Unverified;
            }
        };
        if policy.has_member(INVOKER_ROLE, ALL_USERS) {
            debug!(service = %target, "service already public");
            return PublicAccess::AlreadyPublic;
        }

        policy.grant(INVOKER_ROLE, ALL_USERS);
        if let Err(err) = self.platform.set_iam_policy(target, &policy).await {
            warn!(service = %target, error = %err, "could not grant public invocation");
            return PublicAccess::Unverified;
        }

        match self.platform.get_iam_policy(target).await {
            Ok(written) if written.has_member(INVOKER_ROLE, ALL_USERS) => PublicAccess::Granted,
            Ok(_) => {
                warn!(service = %target, "invoker binding missing after write");
                PublicAccess::Unverified
            }
            Err(err) => {
                warn!(service = %target, error = %err, "could not confirm invoker policy");
                PublicAccess::Unverified
            }
        }
    }

    /// Delete a service. `false` when there was nothing to delete.
    pub async fn delete_service(&self, target: &ServiceTarget) -> DeployResult<bool> {
        match self.platform.delete_service(target).await {
            Ok(()) => {
                info!(service = %target, "service deleted");
                Ok(true)
            }
            Err(CloudError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Roll a new revision of the current spec by touching a template annotation.
    pub async fn restart_service(&self, target: &ServiceTarget) -> DeployResult<ServiceResource> {
        let mut current = self
            .platform
            .get_service(target)
            .await?
            .ok_or_else(|| DeployError::Deploy(format!("service {} does not exist", target.name)))?;
        current.status = None;
        current.spec.template.metadata.annotations.insert(
            RESTARTED_AT_ANNOTATION.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
        let written = self.platform.patch_service(target, &current).await?;
        info!(service = %target, "restart requested");
        Ok(written)
    }

    /// The latest `limit` log entries of an existing service, oldest first.
    pub async fn service_logs(
        &self,
        target: &ServiceTarget,
        limit: usize,
    ) -> DeployResult<Vec<LogEntry>> {
        if self.platform.get_service(target).await?.is_none() {
            return Err(DeployError::Deploy(format!(
                "service {} does not exist",
                target.name
            )));
        }
        let entries = self.platform.service_logs(target, limit).await?;
        debug!(service = %target, entries = entries.len(), "service logs read");
        Ok(entries)
    }
}

fn needs_recreate(err: &CloudError) -> bool {
    matches!(err.status(), Some(409) | Some(422))
}

/// Base environment overlaid with the caller's, minus the reserved port.
fn merged_env(base: &BTreeMap<String, String>, caller: &BTreeMap<String, String>) -> Vec<EnvVar> {
    let mut merged = base.clone();
    for (name, value) in caller {
        if name == RESERVED_PORT_VAR {
            warn!("ignoring caller-supplied {}", RESERVED_PORT_VAR);
            continue;
        }
        merged.insert(name.clone(), value.clone());
    }
    merged.remove(RESERVED_PORT_VAR);
    merged
        .into_iter()
        .map(|(name, value)| EnvVar { name, value })
        .collect()
}

fn label_value(raw: &str) -> String {
    let mut value = normalize(raw);
    value.truncate(MAX_SERVICE_NAME_LEN);
    value.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollPolicy;
    use shipyard_cloud::fakes::MemoryHostingPlatform;
    use shipyard_cloud::RepoRef;
    use std::time::Duration;

    fn config() -> ShipyardConfig {
        ShipyardConfig::new("proj", "us-central1")
            .with_url_poll(PollPolicy::new(Duration::from_secs(10), 30))
            .with_deletion_poll(PollPolicy::new(Duration::from_secs(5), 24))
    }

    fn manager(platform: Arc<MemoryHostingPlatform>, config: ShipyardConfig) -> DeploymentManager {
        DeploymentManager::new(platform, Arc::new(config))
    }

    fn request() -> DeploymentRequest {
        DeploymentRequest::new(RepoRef::new("acme", "tools"), "main")
    }

    #[test]
    fn test_service_resource_carries_platform_settings() {
        let m = manager(Arc::new(MemoryHostingPlatform::new()), config());
        let req = request()
            .with_env("API_URL", "https://api.example.com")
            .with_env("PORT", "9999")
            .with_env("NODE_ENV", "staging");
        let target = m.target_for(&req).unwrap();
        assert_eq!(target.name, "mcp-acme-tools");

        let svc = m.service_resource(&target, &req, "gcr.io/proj/img:1");
        assert_eq!(svc.metadata.labels["repository"], "acme-tools");
        assert_eq!(svc.metadata.annotations[INGRESS_ANNOTATION], "all");
        assert_eq!(svc.spec.template.metadata.annotations[MAX_SCALE_ANNOTATION], "10");
        assert_eq!(svc.spec.template.spec.container_concurrency, 100);
        assert_eq!(svc.spec.template.spec.timeout_seconds, 300);
        assert_eq!(svc.spec.traffic, vec![TrafficTarget::latest()]);

        let container = &svc.spec.template.spec.containers[0];
        assert_eq!(container.ports[0].container_port, 8080);
        assert_eq!(container.resources.limits["memory"], "512Mi");
        assert_eq!(container.resources.requests["cpu"], "100m");

        let env: BTreeMap<_, _> = container
            .env
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        assert!(!env.contains_key("PORT"));
        assert_eq!(env["NODE_ENV"], "staging");
        assert_eq!(env["MCP_TRANSPORT"], "http");
        assert_eq!(env["API_URL"], "https://api.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_duplicate_create_patches() {
        let platform = Arc::new(MemoryHostingPlatform::new());
        let m = manager(platform.clone(), config());

        let first = m.deploy(&request(), "img:1").await.unwrap();
        let second = m.deploy(&request(), "img:2").await.unwrap();

        assert_eq!(first.action, DeployAction::Created);
        assert_eq!(second.action, DeployAction::Patched);
        assert_eq!(first.url, second.url);
        assert_eq!(platform.live_services(), 1);
        assert_eq!(platform.calls().create, 1);
        assert_eq!(platform.calls().patch, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_conflict_is_not_surfaced() {
        let platform = Arc::new(MemoryHostingPlatform::new());
        platform.fail_next_create(CloudError::api("create service", 409, "already exists"));
        let m = manager(platform.clone(), config());

        // 409 on create -> patch -> the service is not actually there -> create.
        let deployed = m.deploy(&request(), "img:1").await.unwrap();
        assert_eq!(deployed.action, DeployAction::Created);
        let calls = platform.calls();
        assert_eq!((calls.create, calls.patch, calls.delete), (2, 1, 0));
        assert_eq!(platform.live_services(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_patch_recreates_after_deletion() {
        let platform = Arc::new(MemoryHostingPlatform::new().with_deletion_lag(2));
        let target = ServiceTarget::new("proj", "us-central1", "mcp-acme-tools");
        platform.insert_service(&target, ServiceResource::default());
        platform.fail_next_patch(CloudError::api("patch service", 422, "field is immutable"));

        let m = manager(platform.clone(), config());
        let deployed = m.deploy(&request(), "img:1").await.unwrap();

        assert_eq!(deployed.action, DeployAction::Recreated);
        let calls = platform.calls();
        assert_eq!(calls.delete, 1);
        assert_eq!(calls.create, 1);
        assert_eq!(platform.live_services(), 1);
        assert_eq!(
            platform.service(&target).unwrap().image(),
            Some("img:1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_patch_errors_surface_with_status() {
        let platform = Arc::new(MemoryHostingPlatform::new());
        let target = ServiceTarget::new("proj", "us-central1", "mcp-acme-tools");
        platform.insert_service(&target, ServiceResource::default());
        platform.fail_next_patch(CloudError::api("patch service", 403, "forbidden"));

        let err = manager(platform.clone(), config())
            .deploy(&request(), "img:1")
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(403));
        assert_eq!(platform.calls().delete, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_found_on_later_poll() {
        let platform = Arc::new(MemoryHostingPlatform::new().with_hidden_polls(1).with_unready_polls(2));
        let m = manager(platform.clone(), config());

        let deployed = m.deploy(&request(), "img:1").await.unwrap();
        assert!(!deployed.url_from_fallback);
        assert_eq!(
            deployed.url,
            MemoryHostingPlatform::url_for(&ServiceTarget::new("proj", "us-central1", "mcp-acme-tools"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_fails_within_ceiling() {
        let platform = Arc::new(MemoryHostingPlatform::new().with_unready_polls(10_000));
        let config = config().with_url_poll(PollPolicy::new(Duration::from_secs(10), 4));
        let m = manager(platform.clone(), config);

        let started = tokio::time::Instant::now();
        let err = m.deploy(&request(), "img:1").await.unwrap_err();
        assert!(matches!(err, DeployError::UrlUnresolved { attempts: 4, .. }));
        assert!(started.elapsed() <= Duration::from_secs(40));
        assert_eq!(platform.calls().probe, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_url_used_only_when_verified() {
        let target = ServiceTarget::new("proj", "us-central1", "mcp-acme-tools");
        let fallback = "https://mcp-acme-tools-abc123-us-central1.a.run.app";

        let platform = Arc::new(MemoryHostingPlatform::new().with_hidden_polls(10_000));
        platform.set_probe_status(fallback, 404);
        let config = config()
            .with_url_poll(PollPolicy::new(Duration::from_secs(10), 3))
            .with_project_hash("abc123");
        let deployed = manager(platform, config.clone())
            .deploy(&request(), "img:1")
            .await
            .unwrap();
        assert!(deployed.url_from_fallback);
        assert_eq!(deployed.url, fallback);

        let platform = Arc::new(MemoryHostingPlatform::new().with_hidden_polls(10_000));
        platform.set_probe_status(fallback, 503);
        let err = manager(platform, config)
            .deploy(&request(), "img:1")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::UrlUnresolved { ref service, .. } if *service == target.name));
    }

    #[tokio::test(start_paused = true)]
    async fn test_public_access_is_idempotent() {
        let platform = Arc::new(MemoryHostingPlatform::new());
        let m = manager(platform.clone(), config());

        let first = m.deploy(&request(), "img:1").await.unwrap();
        let second = m.deploy(&request(), "img:2").await.unwrap();
        assert_eq!(first.public_access, PublicAccess::Granted);
        assert_eq!(second.public_access, PublicAccess::AlreadyPublic);

        let target = m.target_for(&request()).unwrap();
        let policy = platform.policy(&target).unwrap();
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members, vec![ALL_USERS.to_string()]);
        assert_eq!(platform.calls().set_iam, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_write_failure_is_not_fatal() {
        let platform = Arc::new(MemoryHostingPlatform::new());
        platform.fail_iam_writes();
        let deployed = manager(platform, config())
            .deploy(&request(), "img:1")
            .await
            .unwrap();
        assert_eq!(deployed.public_access, PublicAccess::Unverified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_restart() {
        let platform = Arc::new(MemoryHostingPlatform::new());
        let m = manager(platform.clone(), config());
        let target = m.target_for(&request()).unwrap();

        assert!(matches!(m.restart_service(&target).await, Err(DeployError::Deploy(_))));

        m.deploy(&request(), "img:1").await.unwrap();
        let restarted = m.restart_service(&target).await.unwrap();
        assert!(restarted
            .spec
            .template
            .metadata
            .annotations
            .contains_key(RESTARTED_AT_ANNOTATION));
        assert_eq!(restarted.image(), Some("img:1"));

        assert!(m.delete_service(&target).await.unwrap());
        assert!(!m.delete_service(&target).await.unwrap());
        assert_eq!(platform.live_services(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_logs_tail_in_write_order() {
        let platform = Arc::new(MemoryHostingPlatform::new());
        let m = manager(platform.clone(), config());
        let target = m.target_for(&request()).unwrap();

        assert!(matches!(m.service_logs(&target, 10).await, Err(DeployError::Deploy(_))));
        assert_eq!(platform.calls().logs, 0);

        m.deploy(&request(), "img:1").await.unwrap();
        assert!(m.service_logs(&target, 10).await.unwrap().is_empty());

        for line in ["starting", "listening on 8080", "tool call: forecast"] {
            platform.push_log(&target, "INFO", line);
        }
        let tail: Vec<_> = m
            .service_logs(&target, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(tail, vec!["listening on 8080", "tool call: forecast"]);
    }
}
