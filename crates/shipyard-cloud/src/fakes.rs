//! In-memory fakes for the remote service traits (testing only)
//!
//! Provides `MemoryRepositoryHost`, `ScriptedBuildService`,
//! `MemoryHostingPlatform` and `CountingTokenSource`. Every fake counts the
//! calls it receives so tests can assert on side effects.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::TokenSource;
use crate::build_service::{BuildJob, BuildService, BuildSpec, BuildStatus};
use crate::error::CloudError;
use crate::hosting::{
    Addressable, Condition, HostingPlatform, IamPolicy, LogEntry, ServiceResource,
    ServiceStatus, ServiceTarget, TrafficTarget,
};
use crate::repo_host::{RepoRef, RepositoryHost, RepositoryInfo, TreeEntry};
use crate::CloudResult;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// CountingTokenSource
// ---------------------------------------------------------------------------

/// Mints `"<prefix>-1"`, `"<prefix>-2"`, ... and counts fetches.
#[derive(Debug)]
pub struct CountingTokenSource {
    prefix: String,
    delay: Duration,
    fetches: AtomicUsize,
}

impl CountingTokenSource {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Make every fetch take `delay` (tokio time, so it respects pausing).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn fetch_token(&self) -> CloudResult<String> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("{}-{}", self.prefix, n))
    }
}

// ---------------------------------------------------------------------------
// MemoryRepositoryHost
// ---------------------------------------------------------------------------

type BranchKey = (String, String);

/// Repository host backed by `(repo, branch) -> path -> content`.
#[derive(Debug, Default)]
pub struct MemoryRepositoryHost {
    branches: Mutex<HashMap<BranchKey, BTreeMap<String, String>>>,
    infos: Mutex<HashMap<String, RepositoryInfo>>,
    unreadable: Mutex<Vec<String>>,
    reads: AtomicUsize,
}

impl MemoryRepositoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, repo: &RepoRef, branch: &str, path: &str, content: &str) {
        lock(&self.branches)
            .entry((repo.full_name(), branch.to_string()))
            .or_default()
            .insert(path.to_string(), content.to_string());
    }

    /// Builder form of [`add_file`](Self::add_file).
    pub fn with_file(self, repo: &RepoRef, branch: &str, path: &str, content: &str) -> Self {
        self.add_file(repo, branch, path, content);
        self
    }

    /// Reads of `path` fail with a transport error.
    pub fn fail_reads_of(&self, path: &str) {
        lock(&self.unreadable).push(path.to_string());
    }

    pub fn set_info(&self, info: RepositoryInfo) {
        lock(&self.infos).insert(info.full_name.clone(), info);
    }

    /// Number of `read_file` calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryHost for MemoryRepositoryHost {
    async fn list_tree(&self, repo: &RepoRef, branch: &str) -> CloudResult<Vec<TreeEntry>> {
        let branches = lock(&self.branches);
        let files = branches
            .get(&(repo.full_name(), branch.to_string()))
            .ok_or_else(|| CloudError::NotFound(format!("{}@{}", repo, branch)))?;
        Ok(files
            .iter()
            .map(|(path, content)| TreeEntry::file(path, content.len() as u64))
            .collect())
    }

    async fn read_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
    ) -> CloudResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if lock(&self.unreadable).iter().any(|p| p == path) {
            return Err(CloudError::Transport {
                operation: format!("read {}", path),
                message: "connection reset".to_string(),
            });
        }
        Ok(lock(&self.branches)
            .get(&(repo.full_name(), branch.to_string()))
            .and_then(|files| files.get(path).cloned()))
    }

    async fn repository_info(&self, repo: &RepoRef) -> CloudResult<RepositoryInfo> {
        if let Some(info) = lock(&self.infos).get(&repo.full_name()) {
            return Ok(info.clone());
        }
        let known = lock(&self.branches)
            .keys()
            .any(|(name, _)| *name == repo.full_name());
        if !known {
            return Err(CloudError::NotFound(repo.full_name()));
        }
        Ok(RepositoryInfo {
            full_name: repo.full_name(),
            private: false,
            default_branch: "main".to_string(),
            language: None,
        })
    }

    fn tarball_url(&self, repo: &RepoRef, branch: &str) -> String {
        format!("memory://{}/{}/tarball/{}", repo.owner, repo.name, branch)
    }
}

// ---------------------------------------------------------------------------
// ScriptedBuildService
// ---------------------------------------------------------------------------

/// Build service whose jobs walk through a fixed status script, one entry per
/// status poll. The last entry repeats once the script is exhausted.
#[derive(Debug)]
pub struct ScriptedBuildService {
    script: Vec<BuildStatus>,
    cursors: Mutex<HashMap<String, usize>>,
    submissions: Mutex<Vec<BuildSpec>>,
    reject_with: Mutex<Option<CloudError>>,
    polls: AtomicUsize,
}

impl ScriptedBuildService {
    pub fn new(script: Vec<BuildStatus>) -> Self {
        Self {
            script,
            cursors: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            reject_with: Mutex::new(None),
            polls: AtomicUsize::new(0),
        }
    }

    /// Jobs succeed on the first poll.
    pub fn succeeding() -> Self {
        Self::new(vec![BuildStatus::Success])
    }

    /// The next submission is refused with `err`.
    pub fn reject_next_submission(&self, err: CloudError) {
        *lock(&self.reject_with) = Some(err);
    }

    pub fn submissions(&self) -> Vec<BuildSpec> {
        lock(&self.submissions).clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn log_url(id: &str) -> String {
        format!("https://console.example/cloud-build/builds/{}", id)
    }
}

#[async_trait]
impl BuildService for ScriptedBuildService {
    async fn submit(&self, project: &str, spec: &BuildSpec) -> CloudResult<BuildJob> {
        if let Some(err) = lock(&self.reject_with).take() {
            return Err(err);
        }
        let mut submissions = lock(&self.submissions);
        submissions.push(spec.clone());
        let id = format!("{}-build-{}", project, submissions.len());
        lock(&self.cursors).insert(id.clone(), 0);
        Ok(BuildJob {
            log_url: Some(Self::log_url(&id)),
            id,
            status: BuildStatus::Queued,
        })
    }

    async fn get_build(&self, _project: &str, build_id: &str) -> CloudResult<BuildJob> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut cursors = lock(&self.cursors);
        let cursor = cursors
            .get_mut(build_id)
            .ok_or_else(|| CloudError::NotFound(build_id.to_string()))?;
        let status = self
            .script
            .get(*cursor)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(BuildStatus::Queued);
        *cursor += 1;
        Ok(BuildJob {
            id: build_id.to_string(),
            status,
            log_url: Some(Self::log_url(build_id)),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryHostingPlatform
// ---------------------------------------------------------------------------

/// Call counters of [`MemoryHostingPlatform`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostingCalls {
    pub get: usize,
    pub create: usize,
    pub patch: usize,
    pub delete: usize,
    pub get_iam: usize,
    pub set_iam: usize,
    pub probe: usize,
    pub logs: usize,
}

#[derive(Debug)]
struct StoredService {
    resource: ServiceResource,
    url: String,
    polls_since_write: usize,
    /// Remaining reads that still see the service after a delete.
    deleting: Option<usize>,
}

#[derive(Debug, Default)]
struct HostingState {
    services: HashMap<String, StoredService>,
    policies: HashMap<String, IamPolicy>,
    probes: HashMap<String, u16>,
    logs: HashMap<String, Vec<LogEntry>>,
    calls: HostingCalls,
    patch_failures: Vec<CloudError>,
    create_failures: Vec<CloudError>,
    fail_iam_writes: bool,
}

/// Hosting platform keeping services in memory.
///
/// Provisioning is simulated: after a create or patch, the first
/// `hidden_polls` reads carry no URL, the next `unready_polls` reads carry a
/// URL without a true `Ready` condition, and later reads are ready. With both
/// at zero the write response itself is ready.
#[derive(Debug, Default)]
pub struct MemoryHostingPlatform {
    state: Mutex<HostingState>,
    hidden_polls: usize,
    unready_polls: usize,
    deletion_lag: usize,
}

impl MemoryHostingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hidden_polls(mut self, polls: usize) -> Self {
        self.hidden_polls = polls;
        self
    }

    pub fn with_unready_polls(mut self, polls: usize) -> Self {
        self.unready_polls = polls;
        self
    }

    /// Services stay visible for `polls` reads after being deleted.
    pub fn with_deletion_lag(mut self, polls: usize) -> Self {
        self.deletion_lag = polls;
        self
    }

    /// The URL this fake assigns to a service.
    pub fn url_for(target: &ServiceTarget) -> String {
        format!("https://{}-fake-{}.a.run.app", target.name, target.region)
    }

    /// Seed an existing, ready service.
    pub fn insert_service(&self, target: &ServiceTarget, mut resource: ServiceResource) {
        let url = Self::url_for(target);
        resource.metadata.name = target.name.clone();
        resource.status = Some(ready_status(&url));
        lock(&self.state).services.insert(
            key(target),
            StoredService {
                resource,
                url,
                polls_since_write: usize::MAX,
                deleting: None,
            },
        );
    }

    /// Queue an error for the next patch call.
    pub fn fail_next_patch(&self, err: CloudError) {
        lock(&self.state).patch_failures.push(err);
    }

    /// Queue an error for the next create call.
    pub fn fail_next_create(&self, err: CloudError) {
        lock(&self.state).create_failures.push(err);
    }

    pub fn fail_iam_writes(&self) {
        lock(&self.state).fail_iam_writes = true;
    }

    /// Status returned when `url` is probed. Unknown URLs fail to connect.
    pub fn set_probe_status(&self, url: &str, status: u16) {
        lock(&self.state).probes.insert(url.to_string(), status);
    }

    /// Append a log line to a service, whether or not it exists.
    pub fn push_log(&self, target: &ServiceTarget, severity: &str, message: &str) {
        let mut state = lock(&self.state);
        let entries = state.logs.entry(key(target)).or_default();
        let entry = LogEntry {
            timestamp: Some(format!("2026-01-01T00:00:{:02}Z", entries.len() % 60)),
            severity: severity.to_string(),
            message: message.to_string(),
        };
        entries.push(entry);
    }

    pub fn calls(&self) -> HostingCalls {
        lock(&self.state).calls
    }

    pub fn service(&self, target: &ServiceTarget) -> Option<ServiceResource> {
        lock(&self.state)
            .services
            .get(&key(target))
            .map(|s| s.resource.clone())
    }

    /// Services not deleted (or being deleted).
    pub fn live_services(&self) -> usize {
        lock(&self.state)
            .services
            .values()
            .filter(|s| s.deleting.is_none())
            .count()
    }

    pub fn policy(&self, target: &ServiceTarget) -> Option<IamPolicy> {
        lock(&self.state).policies.get(&key(target)).cloned()
    }

    fn observed(&self, stored: &StoredService) -> ServiceResource {
        let mut resource = stored.resource.clone();
        let polls = stored.polls_since_write;
        let fresh = polls != usize::MAX;
        resource.status = Some(if fresh && self.hidden_polls > 0 && polls <= self.hidden_polls {
            pending_status(None)
        } else if fresh
            && self.unready_polls > 0
            && polls <= self.hidden_polls.saturating_add(self.unready_polls)
        {
            pending_status(Some(&stored.url))
        } else {
            ready_status(&stored.url)
        });
        resource
    }

    fn write(
        &self,
        state: &mut HostingState,
        target: &ServiceTarget,
        service: &ServiceResource,
    ) -> ServiceResource {
        let url = state
            .services
            .get(&key(target))
            .map(|s| s.url.clone())
            .unwrap_or_else(|| Self::url_for(target));
        let mut resource = service.clone();
        resource.metadata.name = target.name.clone();
        resource.status = None;
        let stored = StoredService {
            resource,
            url,
            polls_since_write: 0,
            deleting: None,
        };
        let response = self.observed(&stored);
        state.services.insert(key(target), stored);
        response
    }
}

fn key(target: &ServiceTarget) -> String {
    target.to_string()
}

fn ready_status(url: &str) -> ServiceStatus {
    ServiceStatus {
        url: Some(url.to_string()),
        address: Some(Addressable {
            url: Some(url.to_string()),
        }),
        traffic: vec![TrafficTarget::latest()],
        conditions: vec![Condition {
            kind: "Ready".to_string(),
            status: "True".to_string(),
            message: None,
        }],
        latest_ready_revision_name: None,
    }
}

fn pending_status(url: Option<&str>) -> ServiceStatus {
    ServiceStatus {
        url: url.map(str::to_string),
        conditions: vec![Condition {
            kind: "Ready".to_string(),
            status: "Unknown".to_string(),
            message: Some("revision is being provisioned".to_string()),
        }],
        ..Default::default()
    }
}

#[async_trait]
impl HostingPlatform for MemoryHostingPlatform {
    async fn get_service(&self, target: &ServiceTarget) -> CloudResult<Option<ServiceResource>> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.calls.get += 1;
        let k = key(target);
        let gone = match state.services.get_mut(&k) {
            None => return Ok(None),
            Some(stored) => match stored.deleting {
                Some(0) => true,
                Some(remaining) => {
                    stored.deleting = Some(remaining - 1);
                    false
                }
                None => false,
            },
        };
        if gone {
            state.services.remove(&k);
            return Ok(None);
        }
        Ok(state.services.get_mut(&k).map(|stored| {
            stored.polls_since_write = stored.polls_since_write.saturating_add(1);
            self.observed(stored)
        }))
    }

    async fn create_service(
        &self,
        target: &ServiceTarget,
        service: &ServiceResource,
    ) -> CloudResult<ServiceResource> {
        let mut state = lock(&self.state);
        state.calls.create += 1;
        if !state.create_failures.is_empty() {
            return Err(state.create_failures.remove(0));
        }
        if state.services.contains_key(&key(target)) {
            return Err(CloudError::api(
                format!("create service {}", target.name),
                409,
                "service already exists",
            ));
        }
        Ok(self.write(&mut state, target, service))
    }

    async fn patch_service(
        &self,
        target: &ServiceTarget,
        service: &ServiceResource,
    ) -> CloudResult<ServiceResource> {
        let mut state = lock(&self.state);
        state.calls.patch += 1;
        if !state.patch_failures.is_empty() {
            return Err(state.patch_failures.remove(0));
        }
        match state.services.get(&key(target)) {
            Some(stored) if stored.deleting.is_none() => {}
            _ => return Err(CloudError::NotFound(target.name.clone())),
        }
        Ok(self.write(&mut state, target, service))
    }

    async fn delete_service(&self, target: &ServiceTarget) -> CloudResult<()> {
        let mut state = lock(&self.state);
        state.calls.delete += 1;
        let k = key(target);
        if !state.services.contains_key(&k) {
            return Err(CloudError::NotFound(target.name.clone()));
        }
        if self.deletion_lag > 0 {
            if let Some(stored) = state.services.get_mut(&k) {
                stored.deleting = Some(self.deletion_lag);
            }
        } else {
            state.services.remove(&k);
        }
        state.policies.remove(&k);
        Ok(())
    }

    async fn get_iam_policy(&self, target: &ServiceTarget) -> CloudResult<IamPolicy> {
        let mut state = lock(&self.state);
        state.calls.get_iam += 1;
        let k = key(target);
        if !state.services.contains_key(&k) {
            return Err(CloudError::NotFound(target.name.clone()));
        }
        Ok(state.policies.get(&k).cloned().unwrap_or_else(|| IamPolicy {
            etag: Some("BwYAAAA=".to_string()),
            ..Default::default()
        }))
    }

    async fn set_iam_policy(
        &self,
        target: &ServiceTarget,
        policy: &IamPolicy,
    ) -> CloudResult<IamPolicy> {
        let mut state = lock(&self.state);
        state.calls.set_iam += 1;
        if !state.services.contains_key(&key(target)) {
            return Err(CloudError::NotFound(target.name.clone()));
        }
        if state.fail_iam_writes {
            return Err(CloudError::api(
                format!("set IAM policy of {}", target.name),
                403,
                "caller lacks run.services.setIamPolicy",
            ));
        }
        let mut stored = policy.clone();
        stored.etag = Some(format!("BwY{}", state.calls.set_iam));
        state.policies.insert(key(target), stored.clone());
        Ok(stored)
    }

    async fn probe_url(&self, url: &str) -> CloudResult<u16> {
        let mut state = lock(&self.state);
        state.calls.probe += 1;
        state
            .probes
            .get(url)
            .copied()
            .ok_or_else(|| CloudError::Transport {
                operation: "probe service url".to_string(),
                message: format!("could not resolve {}", url),
            })
    }

    async fn service_logs(
        &self,
        target: &ServiceTarget,
        limit: usize,
    ) -> CloudResult<Vec<LogEntry>> {
        let mut state = lock(&self.state);
        state.calls.logs += 1;
        let entries = state.logs.get(&key(target)).map(Vec::as_slice).unwrap_or_default();
        Ok(entries[entries.len().saturating_sub(limit)..].to_vec())
    }
}
