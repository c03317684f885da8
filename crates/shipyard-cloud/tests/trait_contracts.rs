//! Contract tests for RepositoryHost, BuildService and HostingPlatform.
//!
//! Exercised through trait objects against the in-memory fakes, the same
//! way the pipeline holds them. The hosting contract is also run against the
//! reqwest client pointed at a local stub server.

use std::sync::Arc;
use std::time::Duration;

use shipyard_cloud::fakes::{
    CountingTokenSource, MemoryHostingPlatform, MemoryRepositoryHost, ScriptedBuildService,
};
use shipyard_cloud::{
    BuildService, BuildSpec, BuildStatus, CloudError, CloudRunClient, HostingPlatform, IamPolicy,
    RepoRef, RepositoryHost, ServiceResource, ServiceTarget, StaticTokenSource, TokenCache,
    ALL_USERS, INVOKER_ROLE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn repo() -> RepoRef {
    RepoRef::new("acme", "weather")
}

fn target() -> ServiceTarget {
    ServiceTarget::new("proj", "us-central1", "mcp-acme-weather")
}

fn empty_spec() -> BuildSpec {
    BuildSpec {
        steps: vec![],
        images: vec!["gcr.io/proj/app:1".to_string()],
        options: Default::default(),
        timeout: "1200s".to_string(),
    }
}

// ===========================================================================
// RepositoryHost
// ===========================================================================

#[tokio::test]
async fn host_reads_files_per_branch() {
    let host: Arc<dyn RepositoryHost> = Arc::new(
        MemoryRepositoryHost::new()
            .with_file(&repo(), "main", "package.json", "{}")
            .with_file(&repo(), "dev", "src/index.ts", "export {}"),
    );

    let main: Vec<_> = host
        .list_tree(&repo(), "main")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(main, vec!["package.json".to_string()]);

    assert_eq!(
        host.read_file(&repo(), "dev", "src/index.ts").await.unwrap().as_deref(),
        Some("export {}")
    );
    assert_eq!(host.read_file(&repo(), "dev", "package.json").await.unwrap(), None);
}

#[tokio::test]
async fn host_metadata_for_unknown_repository_is_not_found() {
    let host = MemoryRepositoryHost::new().with_file(&repo(), "main", "README.md", "#");

    let info = host.repository_info(&repo()).await.unwrap();
    assert_eq!(info.full_name, "acme/weather");
    assert_eq!(info.default_branch, "main");
    assert!(!info.private);

    let err = host
        .repository_info(&RepoRef::new("acme", "missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

#[tokio::test]
async fn host_read_failures_are_transient() {
    let host = MemoryRepositoryHost::new().with_file(&repo(), "main", "a.js", "1");
    host.fail_reads_of("a.js");

    let err = host.read_file(&repo(), "main", "a.js").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(host.reads(), 1);
}

#[test]
fn tarball_url_names_repository_and_branch() {
    let host = MemoryRepositoryHost::new();
    let url = host.tarball_url(&repo(), "feature/x");
    assert!(url.contains("acme/weather"));
    assert!(url.ends_with("feature/x"));
}

// ===========================================================================
// BuildService
// ===========================================================================

#[tokio::test]
async fn build_ids_are_distinct_per_submission() {
    let builds: Arc<dyn BuildService> = Arc::new(ScriptedBuildService::succeeding());
    let first = builds.submit("proj", &empty_spec()).await.unwrap();
    let second = builds.submit("proj", &empty_spec()).await.unwrap();

    assert_ne!(first.id, second.id);
    assert!(first.log_url.is_some());
    assert_eq!(
        builds.get_build("proj", &second.id).await.unwrap().status,
        BuildStatus::Success
    );
}

#[tokio::test]
async fn build_status_of_unknown_job_is_not_found() {
    let builds = ScriptedBuildService::succeeding();
    let err = builds.get_build("proj", "nope").await.unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

#[tokio::test]
async fn rejected_submission_is_not_recorded() {
    let builds = ScriptedBuildService::succeeding();
    builds.reject_next_submission(CloudError::api("submit build", 403, "permission denied"));

    let err = builds.submit("proj", &empty_spec()).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(builds.submission_count(), 0);

    builds.submit("proj", &empty_spec()).await.unwrap();
    assert_eq!(builds.submission_count(), 1);
}

#[test]
fn terminal_build_statuses() {
    assert!(!BuildStatus::Queued.is_terminal());
    assert!(!BuildStatus::Running.is_terminal());
    assert!(BuildStatus::Success.is_terminal());
    assert!(BuildStatus::Cancelled.is_terminal());
    assert_eq!(BuildStatus::from_wire("EXPIRED"), BuildStatus::Timeout);
    assert_eq!(BuildStatus::from_wire("STATUS_UNKNOWN"), BuildStatus::Queued);
}

// ===========================================================================
// HostingPlatform
// ===========================================================================

#[tokio::test]
async fn patching_a_missing_service_is_not_found() {
    let platform: Arc<dyn HostingPlatform> = Arc::new(MemoryHostingPlatform::new());
    let err = platform
        .patch_service(&target(), &ServiceResource::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
    assert!(platform.get_service(&target()).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_a_missing_service_is_not_found() {
    let platform = MemoryHostingPlatform::new();
    let err = platform.delete_service(&target()).await.unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

#[tokio::test]
async fn created_service_is_ready_and_addressable() {
    let platform = MemoryHostingPlatform::new();
    let created = platform
        .create_service(&target(), &ServiceResource::default())
        .await
        .unwrap();

    assert!(created.is_ready());
    assert_eq!(
        created.immediate_url(),
        Some(MemoryHostingPlatform::url_for(&target()).as_str())
    );
    assert_eq!(created.metadata.name, target().name);
}

#[tokio::test]
async fn iam_policy_read_modify_write() {
    let platform = MemoryHostingPlatform::new();
    platform.insert_service(&target(), ServiceResource::default());

    let mut policy = platform.get_iam_policy(&target()).await.unwrap();
    assert!(!policy.has_member(INVOKER_ROLE, ALL_USERS));
    assert!(policy.grant(INVOKER_ROLE, ALL_USERS));
    assert!(!policy.grant(INVOKER_ROLE, ALL_USERS));

    let written = platform.set_iam_policy(&target(), &policy).await.unwrap();
    assert_ne!(written.etag, policy.etag);

    let read_back = platform.get_iam_policy(&target()).await.unwrap();
    assert!(read_back.has_member(INVOKER_ROLE, ALL_USERS));
    assert_eq!(read_back.bindings.len(), 1);
}

#[tokio::test]
async fn iam_policy_of_missing_service_is_not_found() {
    let platform = MemoryHostingPlatform::new();
    let err = platform.get_iam_policy(&target()).await.unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

#[tokio::test]
async fn url_check_reports_status_or_transport_error() {
    let platform = MemoryHostingPlatform::new();
    platform.set_probe_status("https://svc.example", 404);

    assert_eq!(platform.probe_url("https://svc.example").await.unwrap(), 404);
    let err = platform.probe_url("https://other.example").await.unwrap_err();
    assert!(matches!(err, CloudError::Transport { .. }));
    assert_eq!(platform.calls().probe, 2);
}

// ---- shared by the fake and the Cloud Run client ----

/// Serve every request on a local port with `status` and a `{}` body.
async fn stub_server(status: u16) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut seen = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    seen.extend_from_slice(&buf[..n]);
                    let Some(end) = seen.windows(4).position(|w| w == b"\r\n\r\n") else {
                        continue;
                    };
                    let head = String::from_utf8_lossy(&seen[..end]).to_lowercase();
                    let body_len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if seen.len() >= end + 4 + body_len {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}",
                    status
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

fn cloud_run_at(base_url: &str) -> Arc<dyn HostingPlatform> {
    let tokens = Arc::new(TokenCache::new(Arc::new(StaticTokenSource::new("t"))));
    Arc::new(CloudRunClient::with_base_url(base_url, tokens).unwrap())
}

#[tokio::test]
async fn missing_service_is_not_found_on_every_platform() {
    let platforms = vec![
        ("memory", Arc::new(MemoryHostingPlatform::new()) as Arc<dyn HostingPlatform>),
        ("cloud run", cloud_run_at(&stub_server(404).await)),
    ];

    for (name, platform) in platforms {
        assert!(platform.get_service(&target()).await.unwrap().is_none(), "{name}: get");
        assert!(
            matches!(
                platform.patch_service(&target(), &ServiceResource::default()).await,
                Err(CloudError::NotFound(ref n)) if n == "mcp-acme-weather"
            ),
            "{name}: patch"
        );
        assert!(
            matches!(platform.delete_service(&target()).await, Err(CloudError::NotFound(_))),
            "{name}: delete"
        );
        assert!(
            matches!(platform.get_iam_policy(&target()).await, Err(CloudError::NotFound(_))),
            "{name}: get IAM"
        );
        assert!(
            matches!(
                platform.set_iam_policy(&target(), &IamPolicy::default()).await,
                Err(CloudError::NotFound(_))
            ),
            "{name}: set IAM"
        );
    }
}

#[tokio::test]
async fn quiet_service_has_no_logs_on_every_platform() {
    let memory = MemoryHostingPlatform::new();
    memory.insert_service(&target(), ServiceResource::default());
    let platforms = vec![
        ("memory", Arc::new(memory) as Arc<dyn HostingPlatform>),
        ("cloud run", cloud_run_at(&stub_server(200).await)),
    ];

    for (name, platform) in platforms {
        assert!(platform.service_logs(&target(), 20).await.unwrap().is_empty(), "{name}");
        assert!(platform.service_logs(&target(), 0).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn other_delete_failures_keep_their_status() {
    let platform = cloud_run_at(&stub_server(500).await);
    let err = platform.delete_service(&target()).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(!matches!(err, CloudError::NotFound(_)));
}

#[tokio::test]
async fn fake_logs_keep_the_latest_entries() {
    let platform = MemoryHostingPlatform::new();
    for n in 0..5 {
        platform.push_log(&target(), "INFO", &format!("line {n}"));
    }
    let logs = platform.service_logs(&target(), 3).await.unwrap();
    let messages: Vec<_> = logs.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    assert_eq!(platform.calls().logs, 1);
}

// ===========================================================================
// TokenCache
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn token_is_refetched_after_ttl() {
    let source = Arc::new(CountingTokenSource::new("tok"));
    let cache = TokenCache::with_ttl(source.clone(), Duration::from_secs(30));

    assert_eq!(cache.token().await.unwrap(), "tok-1");
    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(cache.token().await.unwrap(), "tok-1");
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.token().await.unwrap(), "tok-2");
    assert_eq!(source.fetches(), 2);
}
