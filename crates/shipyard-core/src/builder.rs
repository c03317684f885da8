//! Container image builds on the remote build service.
//!
//! Both strategies start by downloading the branch tarball inside the build,
//! so the build service never talks to the repository host on its own:
//!
//! - managed runtime: a Node container definition is written in the build and
//!   then built, compiling TypeScript first when the project declares it;
//! - custom runtime: the repository's own container definition is built as is.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use shipyard_cloud::{
    BuildJob, BuildService, BuildSpec, BuildStatus, BuildStep, CloudError, RepositoryHost,
};
use shipyard_scan::{Language, Runtime};
use tracing::{info, warn};

use crate::config::ShipyardConfig;
use crate::error::{DeployError, DeployResult};
use crate::metrics::METRICS;
use crate::obs;
use crate::request::{normalize, repo_slug, DeploymentRequest};

const CURL_IMAGE: &str = "gcr.io/cloud-builders/curl";
const GCLOUD_IMAGE: &str = "gcr.io/cloud-builders/gcloud";
const DOCKER_IMAGE: &str = "gcr.io/cloud-builders/docker";

const SOURCE_ARCHIVE: &str = "source.tar.gz";
const DEFAULT_ENTRY_POINT: &str = "server.js";
const DEFAULT_TS_BUILD: &str = "npm run build";

/// An image pushed by a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltImage {
    pub image: String,
    pub build_id: String,
    pub log_url: Option<String>,
}

pub struct ImageBuilder {
    builds: Arc<dyn BuildService>,
    host: Arc<dyn RepositoryHost>,
    config: Arc<ShipyardConfig>,
    /// Millisecond timestamp of the last tag handed out.
    last_tag: AtomicI64,
}

impl ImageBuilder {
    pub fn new(
        builds: Arc<dyn BuildService>,
        host: Arc<dyn RepositoryHost>,
        config: Arc<ShipyardConfig>,
    ) -> Self {
        Self {
            builds,
            host,
            config,
            last_tag: AtomicI64::new(0),
        }
    }

    /// Current time in milliseconds, strictly greater than any earlier tag
    /// from this builder.
    fn next_tag_millis(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut previous = self.last_tag.load(Ordering::SeqCst);
        loop {
            let next = now.max(previous + 1);
            match self.last_tag.compare_exchange(
                previous,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }

    /// `{registry}/{project}/{namespace}-{node|container}/{owner-name}:{millis}-{branch}`
    pub fn image_reference(&self, project: &str, request: &DeploymentRequest) -> String {
        let flavor = if request.runtime_or_default().is_custom() {
            "container"
        } else {
            "node"
        };
        format!(
            "{}/{}/{}-{}/{}:{}-{}",
            self.config.image_registry,
            project,
            normalize(&self.config.image_namespace),
            flavor,
            repo_slug(&request.repo),
            self.next_tag_millis(),
            tag_safe(&request.branch),
        )
    }

    /// The build description for `request`, producing `image`.
    pub fn build_spec(&self, request: &DeploymentRequest, image: &str) -> BuildSpec {
        let mut steps = fetch_source_steps(
            &self.host.tarball_url(&request.repo, &request.branch),
            request.repo_token.as_deref(),
        );

        match request.runtime_or_default() {
            Runtime::Managed {
                language,
                entry_point,
                build_command,
            } => {
                let dockerfile = managed_dockerfile(
                    language,
                    entry_point.as_deref(),
                    build_command.as_deref(),
                    self.config.service.container_port,
                );
                steps.push(BuildStep::script(
                    DOCKER_IMAGE,
                    format!("cat > Dockerfile <<'EOF'\n{}EOF", dockerfile),
                ));
                steps.push(BuildStep::new(DOCKER_IMAGE, &["build", "-t", image, "."]));
            }
            Runtime::Custom {
                dockerfile,
                build_path,
            } => {
                steps.push(BuildStep::new(
                    DOCKER_IMAGE,
                    &["build", "-t", image, "-f", dockerfile.as_str(), build_path.as_str()],
                ));
            }
        }

        BuildSpec {
            steps,
            images: vec![image.to_string()],
            options: Default::default(),
            timeout: self.config.build_timeout.clone(),
        }
    }

    /// Submit a build for `request` and wait for it to finish.
    ///
    /// Every call produces a new tag, so retrying after a failure never
    /// collides with an earlier image.
    pub async fn build(&self, request: &DeploymentRequest) -> DeployResult<BuiltImage> {
        let project = self.config.project_for(request)?;
        let image = self.image_reference(&project, request);
        let spec = self.build_spec(request, &image);

        let job = self
            .builds
            .submit(&project, &spec)
            .await
            .map_err(|e| submission_error(&image, e))?;
        METRICS.inc_builds_submitted();
        obs::emit_build_submitted(&job.id, &image, job.log_url.as_deref());

        let finished = self.wait_for(&project, job).await?;
        info!(build_id = %finished.id, image = %image, "image built");
        Ok(BuiltImage {
            image,
            build_id: finished.id,
            log_url: finished.log_url,
        })
    }

    /// Poll `job` until it reaches a terminal status or the ceiling is hit.
    /// Transient read errors count as an attempt and are not fatal.
    pub async fn wait_for(&self, project: &str, job: BuildJob) -> DeployResult<BuildJob> {
        let poll = self.config.build_poll;
        let mut last = job;

        for attempt in 1..=poll.max_attempts {
            tokio::time::sleep(poll.interval).await;
            METRICS.inc_status_polls();

            let current = match self.builds.get_build(project, &last.id).await {
                Ok(current) => current,
                Err(err) if err.is_transient() => {
                    warn!(build_id = %last.id, attempt, error = %err, "build status unavailable");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            obs::emit_build_polled(&current.id, attempt, &current.status);

            match current.status {
                BuildStatus::Success => return Ok(current),
                BuildStatus::Queued | BuildStatus::Running => {}
                status @ (BuildStatus::Failure | BuildStatus::Timeout | BuildStatus::Cancelled) => {
                    let log_url = current
                        .log_url
                        .clone()
                        .or_else(|| last.log_url.clone())
                        .unwrap_or_else(|| "unavailable".to_string());
                    return Err(DeployError::BuildFailed {
                        build_id: current.id,
                        status,
                        log_url,
                    });
                }
            }
            if current.log_url.is_none() {
                last = BuildJob {
                    log_url: last.log_url,
                    ..current
                };
            } else {
                last = current;
            }
        }

        Err(DeployError::BuildTimedOut {
            build_id: last.id,
            attempts: poll.max_attempts,
        })
    }
}

fn submission_error(image: &str, err: CloudError) -> DeployError {
    match err {
        CloudError::Api { status, body, .. } => {
            DeployError::Build(format!("{} rejected (HTTP {}): {}", image, status, body))
        }
        other => other.into(),
    }
}

/// Docker tags allow `[A-Za-z0-9_.-]`; anything else becomes `-`.
fn tag_safe(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn fetch_source_steps(tarball_url: &str, token: Option<&str>) -> Vec<BuildStep> {
    let auth_header = token.map(|t| format!("Authorization: token {}", t));
    let mut args = vec!["-fsSL"];
    if let Some(header) = auth_header.as_deref() {
        args.extend(["-H", header]);
    }
    args.extend(["-o", SOURCE_ARCHIVE, tarball_url]);

    vec![
        BuildStep::new(CURL_IMAGE, &args),
        BuildStep::script(
            GCLOUD_IMAGE,
            format!(
                "tar -xzf {archive} --strip-components=1 && rm {archive}",
                archive = SOURCE_ARCHIVE
            ),
        ),
    ]
}

/// Container definition for the managed Node runtime. Runs as a non-root user.
pub fn managed_dockerfile(
    language: Language,
    entry_point: Option<&str>,
    build_command: Option<&str>,
    port: u16,
) -> String {
    let compile = match (language, build_command) {
        (_, Some(command)) => Some(command),
        (Language::TypeScript, None) => Some(DEFAULT_TS_BUILD),
        (Language::JavaScript, None) => None,
    };

    let mut lines = vec![
        "FROM node:18-alpine".to_string(),
        "WORKDIR /app".to_string(),
        "RUN addgroup -g 1001 -S app && adduser -S app -u 1001 -G app".to_string(),
        "COPY package*.json ./".to_string(),
        "RUN if [ -f package-lock.json ]; then npm ci; else npm install; fi && npm cache clean --force"
            .to_string(),
        "COPY . .".to_string(),
    ];
    if let Some(command) = compile {
        lines.push(format!("RUN {}", command));
    }
    lines.extend([
        "RUN npm prune --production".to_string(),
        "RUN chown -R app:app /app".to_string(),
        "USER app".to_string(),
        "ENV NODE_ENV=production".to_string(),
        format!("ENV PORT={}", port),
        format!("EXPOSE {}", port),
        format!(
            "CMD [\"node\", \"{}\"]",
            entry_point.unwrap_or(DEFAULT_ENTRY_POINT)
        ),
    ]);

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
