//! Serverless hosting platform API (Cloud Run, Knative serving v1).
//!
//! The resource types mirror the platform's declarative service document:
//! the desired `spec` written by callers and the observed `status` filled in
//! by the platform. URL and readiness only ever come from `status`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::TokenCache;
use crate::http;
use crate::CloudResult;

/// Role that lets a member call a service's endpoint.
pub const INVOKER_ROLE: &str = "roles/run.invoker";
/// Member matching every caller, authenticated or not.
pub const ALL_USERS: &str = "allUsers";

/// Where a service lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub project: String,
    pub region: String,
    pub name: String,
}

impl ServiceTarget {
    pub fn new(project: &str, region: &str, name: &str) -> Self {
        ServiceTarget {
            project: project.to_string(),
            region: region.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.region, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSpec {
    #[serde(default)]
    pub container_concurrency: u32,
    #[serde(default)]
    pub timeout_seconds: u32,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RevisionSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_revision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TrafficTarget {
    /// All traffic to the newest ready revision.
    pub fn latest() -> Self {
        TrafficTarget {
            percent: Some(100),
            latest_revision: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub template: RevisionTemplate,
    #[serde(default)]
    pub traffic: Vec<TrafficTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Addressable {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub address: Option<Addressable>,
    #[serde(default)]
    pub traffic: Vec<TrafficTarget>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_ready_revision_name: Option<String>,
}

/// A service resource document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
}

impl Default for ServiceResource {
    fn default() -> Self {
        ServiceResource {
            api_version: "serving.knative.dev/v1".to_string(),
            kind: "Service".to_string(),
            metadata: ObjectMeta::default(),
            spec: ServiceSpec::default(),
            status: None,
        }
    }
}

fn non_empty(url: &Option<String>) -> Option<&str> {
    url.as_deref().filter(|u| !u.is_empty())
}

impl ServiceResource {
    /// URL as reported directly by a create/patch response: the top-level
    /// status URL, then the nested address URL.
    pub fn immediate_url(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        non_empty(&status.url)
            .or_else(|| status.address.as_ref().and_then(|a| non_empty(&a.url)))
    }

    /// URL as read back while polling. Also consults the first traffic target.
    pub fn polled_url(&self) -> Option<&str> {
        self.immediate_url().or_else(|| {
            self.status
                .as_ref()
                .and_then(|s| s.traffic.first())
                .and_then(|t| non_empty(&t.url))
        })
    }

    /// The `Ready` condition reports `"True"`.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.kind == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }

    pub fn image(&self) -> Option<&str> {
        self.spec
            .template
            .spec
            .containers
            .first()
            .map(|c| c.image.as_str())
    }
}

/// One role grant in an invocation-access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl IamPolicy {
    pub fn has_member(&self, role: &str, member: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.role == role && b.members.iter().any(|m| m == member))
    }

    /// Add `member` to `role`. Returns `false` when the grant already existed.
    pub fn grant(&mut self, role: &str, member: &str) -> bool {
        if self.has_member(role, member) {
            return false;
        }
        match self.bindings.iter_mut().find(|b| b.role == role) {
            Some(binding) => binding.members.push(member.to_string()),
            None => self.bindings.push(Binding {
                role: role.to_string(),
                members: vec![member.to_string()],
            }),
        }
        true
    }
}

/// One entry of a service's log, in the order it was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339, as reported by the platform.
    pub timestamp: Option<String>,
    pub severity: String,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:<8} {}",
            self.timestamp.as_deref().unwrap_or("-"),
            self.severity,
            self.message
        )
    }
}

/// Largest page the logging API hands out in one call.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Control-plane access to the hosting platform.
///
/// Calls addressing one existing service (patch, delete, IAM) fail with
/// [`CloudError::NotFound`](crate::CloudError::NotFound) when it is missing.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// `None` when no service with that name exists.
    async fn get_service(&self, target: &ServiceTarget) -> CloudResult<Option<ServiceResource>>;

    async fn create_service(
        &self,
        target: &ServiceTarget,
        service: &ServiceResource,
    ) -> CloudResult<ServiceResource>;

    /// Merge-patch an existing service.
    async fn patch_service(
        &self,
        target: &ServiceTarget,
        service: &ServiceResource,
    ) -> CloudResult<ServiceResource>;

    async fn delete_service(&self, target: &ServiceTarget) -> CloudResult<()>;

    async fn get_iam_policy(&self, target: &ServiceTarget) -> CloudResult<IamPolicy>;

    async fn set_iam_policy(
        &self,
        target: &ServiceTarget,
        policy: &IamPolicy,
    ) -> CloudResult<IamPolicy>;

    /// HEAD `url` without credentials and return the response status.
    async fn probe_url(&self, url: &str) -> CloudResult<u16>;

    /// The latest `limit` log entries of a service, oldest first. A service
    /// that never logged, or does not exist, has none.
    async fn service_logs(
        &self,
        target: &ServiceTarget,
        limit: usize,
    ) -> CloudResult<Vec<LogEntry>>;
}

pub const CLOUD_RUN_IAM_URL: &str = "https://run.googleapis.com";
pub const CLOUD_LOGGING_URL: &str = "https://logging.googleapis.com";

/// Cloud Run client speaking the regional Knative API for services and the
/// global v1 API for IAM.
pub struct CloudRunClient {
    http: reqwest::Client,
    tokens: Arc<TokenCache>,
    serving_url: Option<String>,
    iam_url: String,
    logging_url: String,
}

impl CloudRunClient {
    pub fn new(tokens: Arc<TokenCache>) -> CloudResult<Self> {
        Ok(CloudRunClient {
            http: http::build_client()?,
            tokens,
            serving_url: None,
            iam_url: CLOUD_RUN_IAM_URL.to_string(),
            logging_url: CLOUD_LOGGING_URL.to_string(),
        })
    }

    /// Send every call to one base URL instead of the regional endpoints.
    pub fn with_base_url(base_url: &str, tokens: Arc<TokenCache>) -> CloudResult<Self> {
        Ok(CloudRunClient {
            http: http::build_client()?,
            tokens,
            serving_url: Some(base_url.to_string()),
            iam_url: base_url.to_string(),
            logging_url: base_url.to_string(),
        })
    }

    fn services_url(&self, target: &ServiceTarget) -> String {
        let base = match &self.serving_url {
            Some(url) => url.clone(),
            None => format!("https://{}-run.googleapis.com", target.region),
        };
        http::join(
            &base,
            &format!(
                "apis/serving.knative.dev/v1/namespaces/{}/services",
                target.project
            ),
        )
    }

    fn service_url(&self, target: &ServiceTarget) -> String {
        format!("{}/{}", self.services_url(target), target.name)
    }

    fn iam_url(&self, target: &ServiceTarget, verb: &str) -> String {
        http::join(
            &self.iam_url,
            &format!(
                "v1/projects/{}/locations/{}/services/{}:{}",
                target.project, target.region, target.name, verb
            ),
        )
    }
}

#[derive(Serialize)]
struct SetIamPolicyRequest<'a> {
    policy: &'a IamPolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesRequest {
    resource_names: Vec<String>,
    filter: String,
    order_by: &'static str,
    page_size: usize,
}

#[derive(Deserialize)]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<WireLogEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLogEntry {
    timestamp: Option<String>,
    severity: Option<String>,
    text_payload: Option<String>,
    json_payload: Option<serde_json::Value>,
    http_request: Option<WireHttpRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHttpRequest {
    request_method: Option<String>,
    request_url: Option<String>,
    status: Option<u16>,
}

impl From<WireLogEntry> for LogEntry {
    fn from(wire: WireLogEntry) -> Self {
        let message = if let Some(text) = wire.text_payload {
            text
        } else if let Some(json) = wire.json_payload {
            match json.get("message").and_then(|m| m.as_str()) {
                Some(message) => message.to_string(),
                None => json.to_string(),
            }
        } else if let Some(req) = wire.http_request {
            format!(
                "{} {} {}",
                req.request_method.unwrap_or_default(),
                req.request_url.unwrap_or_default(),
                req.status.map(|s| s.to_string()).unwrap_or_default()
            )
            .trim()
            .to_string()
        } else {
            String::new()
        };
        LogEntry {
            timestamp: wire.timestamp,
            severity: wire.severity.unwrap_or_else(|| "DEFAULT".to_string()),
            message,
        }
    }
}

/// Cloud Logging filter selecting one service's revision logs.
fn log_filter(target: &ServiceTarget) -> String {
    format!(
        "resource.type=\"cloud_run_revision\" AND resource.labels.service_name=\"{}\" AND resource.labels.location=\"{}\"",
        target.name, target.region
    )
}

#[async_trait]
impl HostingPlatform for CloudRunClient {
    async fn get_service(&self, target: &ServiceTarget) -> CloudResult<Option<ServiceResource>> {
        let operation = format!("get service {}", target.name);
        let token = self.tokens.token().await?;
        let request = self.http.get(self.service_url(target)).bearer_auth(token);
        let response = http::send(&operation, request).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        http::read_json(&operation, response).await.map(Some)
    }

    async fn create_service(
        &self,
        target: &ServiceTarget,
        service: &ServiceResource,
    ) -> CloudResult<ServiceResource> {
        let operation = format!("create service {}", target.name);
        let token = self.tokens.token().await?;
        let request = self
            .http
            .post(self.services_url(target))
            .bearer_auth(token)
            .json(service);
        let response = http::send(&operation, request).await?;
        http::read_json(&operation, response).await
    }

    async fn patch_service(
        &self,
        target: &ServiceTarget,
        service: &ServiceResource,
    ) -> CloudResult<ServiceResource> {
        let operation = format!("patch service {}", target.name);
        let token = self.tokens.token().await?;
        let body = serde_json::to_vec(service)
            .map_err(|e| crate::error::CloudError::decode(&operation, e))?;
        let request = self
            .http
            .patch(self.service_url(target))
            .bearer_auth(token)
            .header("Content-Type", "application/merge-patch+json")
            .body(body);
        let response = http::send(&operation, request).await?;
        let response = http::reject_not_found(&target.name, response)?;
        http::read_json(&operation, response).await
    }

    async fn delete_service(&self, target: &ServiceTarget) -> CloudResult<()> {
        let operation = format!("delete service {}", target.name);
        let token = self.tokens.token().await?;
        let request = self.http.delete(self.service_url(target)).bearer_auth(token);
        let response = http::send(&operation, request).await?;
        let response = http::reject_not_found(&target.name, response)?;
        http::ensure_success(&operation, response).await?;
        debug!(service = %target.name, "delete accepted");
        Ok(())
    }

    async fn get_iam_policy(&self, target: &ServiceTarget) -> CloudResult<IamPolicy> {
        let operation = format!("get IAM policy of {}", target.name);
        let token = self.tokens.token().await?;
        let request = self
            .http
            .get(self.iam_url(target, "getIamPolicy"))
            .bearer_auth(token);
        let response = http::send(&operation, request).await?;
        let response = http::reject_not_found(&target.name, response)?;
        http::read_json(&operation, response).await
    }

    async fn set_iam_policy(
        &self,
        target: &ServiceTarget,
        policy: &IamPolicy,
    ) -> CloudResult<IamPolicy> {
        let operation = format!("set IAM policy of {}", target.name);
        let token = self.tokens.token().await?;
        let request = self
            .http
            .post(self.iam_url(target, "setIamPolicy"))
            .bearer_auth(token)
            .json(&SetIamPolicyRequest { policy });
        let response = http::send(&operation, request).await?;
        let response = http::reject_not_found(&target.name, response)?;
        http::read_json(&operation, response).await
    }

    async fn probe_url(&self, url: &str) -> CloudResult<u16> {
        let response = http::send("probe service url", self.http.head(url)).await?;
        Ok(response.status().as_u16())
    }

    async fn service_logs(
        &self,
        target: &ServiceTarget,
        limit: usize,
    ) -> CloudResult<Vec<LogEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let operation = format!("read logs of {}", target.name);
        let token = self.tokens.token().await?;
        let body = ListEntriesRequest {
            resource_names: vec![format!("projects/{}", target.project)],
            filter: log_filter(target),
            order_by: "timestamp desc",
            page_size: limit.min(MAX_LOG_ENTRIES),
        };
        let request = self
            .http
            .post(http::join(&self.logging_url, "v2/entries:list"))
            .bearer_auth(token)
            .json(&body);
        let response = http::send(&operation, request).await?;
        let listed: ListEntriesResponse = http::read_json(&operation, response).await?;
        let mut entries: Vec<LogEntry> = listed.entries.into_iter().map(LogEntry::from).collect();
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ServiceResource {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_immediate_url_prefers_status_url_then_address() {
        let svc = parse(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "status": {"address": {"url": "https://addr.example"}}
        }));
        assert_eq!(svc.immediate_url(), Some("https://addr.example"));

        let svc = parse(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "status": {"url": "https://top.example", "address": {"url": "https://addr.example"}}
        }));
        assert_eq!(svc.immediate_url(), Some("https://top.example"));
    }

    #[test]
    fn test_traffic_url_only_counts_when_polling() {
        let svc = parse(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "status": {"url": "", "traffic": [{"percent": 100, "url": "https://traffic.example"}]}
        }));
        assert_eq!(svc.immediate_url(), None);
        assert_eq!(svc.polled_url(), Some("https://traffic.example"));
    }

    #[test]
    fn test_readiness_requires_true_ready_condition() {
        let mut svc = parse(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "status": {"conditions": [
                {"type": "ConfigurationsReady", "status": "True"},
                {"type": "Ready", "status": "Unknown"}
            ]}
        }));
        assert!(!svc.is_ready());

        if let Some(status) = svc.status.as_mut() {
            status.conditions[1].status = "True".to_string();
        }
        assert!(svc.is_ready());
        assert!(!ServiceResource::default().is_ready());
    }

    #[test]
    fn test_grant_is_idempotent() {
        let mut policy = IamPolicy::default();
        assert!(policy.grant(INVOKER_ROLE, ALL_USERS));
        assert!(!policy.grant(INVOKER_ROLE, ALL_USERS));
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members, vec![ALL_USERS.to_string()]);
    }

    #[test]
    fn test_grant_extends_existing_role_binding() {
        let mut policy = IamPolicy {
            bindings: vec![Binding {
                role: INVOKER_ROLE.to_string(),
                members: vec!["user:ops@example.com".to_string()],
            }],
            ..Default::default()
        };
        assert!(policy.grant(INVOKER_ROLE, ALL_USERS));
        assert_eq!(policy.bindings.len(), 1);
        assert!(policy.has_member(INVOKER_ROLE, ALL_USERS));
    }

    #[test]
    fn test_endpoints() {
        let tokens = Arc::new(TokenCache::new(Arc::new(StaticTokenSource::new("t"))));
        let client = CloudRunClient::new(tokens).unwrap();
        let target = ServiceTarget::new("proj", "europe-west1", "svc");
        assert_eq!(
            client.service_url(&target),
            "https://europe-west1-run.googleapis.com/apis/serving.knative.dev/v1/namespaces/proj/services/svc"
        );
        assert_eq!(
            client.iam_url(&target, "setIamPolicy"),
            "https://run.googleapis.com/v1/projects/proj/locations/europe-west1/services/svc:setIamPolicy"
        );
        assert_eq!(
            log_filter(&target),
            r#"resource.type="cloud_run_revision" AND resource.labels.service_name="svc" AND resource.labels.location="europe-west1""#
        );
    }

    #[test]
    fn test_log_entries_take_the_first_payload_present() {
        let listed: ListEntriesResponse = serde_json::from_value(json!({
            "entries": [
                {"timestamp": "2026-10-01T12:00:02Z", "severity": "ERROR", "textPayload": "boom"},
                {"timestamp": "2026-10-01T12:00:01Z", "jsonPayload": {"message": "listening", "port": 8080}},
                {"jsonPayload": {"event": "tick"}},
                {"severity": "INFO", "httpRequest": {"requestMethod": "POST", "requestUrl": "/mcp", "status": 200}}
            ]
        }))
        .unwrap();
        let entries: Vec<LogEntry> = listed.entries.into_iter().map(LogEntry::from).collect();

        assert_eq!(entries[0].message, "boom");
        assert_eq!(entries[0].severity, "ERROR");
        assert_eq!(entries[1].message, "listening");
        assert_eq!(entries[1].severity, "DEFAULT");
        assert_eq!(entries[2].message, r#"{"event":"tick"}"#);
        assert_eq!(entries[3].message, "POST /mcp 200");
        assert_eq!(entries[3].timestamp, None);
        assert_eq!(
            entries[0].to_string(),
            "2026-10-01T12:00:02Z ERROR    boom"
        );
    }

    #[test]
    fn test_empty_log_listing_decodes() {
        let listed: ListEntriesResponse = serde_json::from_value(json!({})).unwrap();
        assert!(listed.entries.is_empty());
    }
}
