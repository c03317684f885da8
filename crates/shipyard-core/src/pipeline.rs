//! The deployment state machine.
//!
//! ```text
//! Pending -> Validating -> Blocked
//!                       -> Building -> Deploying -> Done
//!            (any of Validating, Building, Deploying) -> Failed
//! ```
//!
//! Stages run strictly in order and none is retried here; the only retries
//! are the bounded polling loops inside the builder and the deployer, so
//! every run ends in `Blocked`, `Done` or `Failed`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shipyard_cloud::{
    BuildService, CloudBuildClient, CloudRunClient, GitHubClient, HostingPlatform, RepositoryHost,
};
use shipyard_scan::{
    DeployConfig, RepositoryAnalyzer, ScanOutcome, SecurityReport, SecurityValidator,
    SourceLocation,
};
use tokio::time::Instant;
use tracing::{error, Instrument};

use crate::builder::ImageBuilder;
use crate::config::ShipyardConfig;
use crate::deployer::DeploymentManager;
use crate::error::{DeployError, DeployResult};
use crate::metrics::METRICS;
use crate::obs::{self, DeploySpan};
use crate::request::DeploymentRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Validating,
    Blocked,
    Building,
    Deploying,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Validating => "validating",
            Stage::Blocked => "blocked",
            Stage::Building => "building",
            Stage::Deploying => "deploying",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Blocked | Stage::Done | Stage::Failed)
    }

    pub fn can_advance_to(&self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Blocked)
                | (Validating, Building)
                | (Validating, Failed)
                | (Building, Deploying)
                | (Building, Failed)
                | (Deploying, Done)
                | (Deploying, Failed)
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result handed back to callers. The security report is present whenever
/// validation ran, including on success, so a blocked run explains itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOutcome {
    pub deployment_id: String,
    pub success: bool,
    pub stage: Stage,
    pub service_url: Option<String>,
    pub service_name: Option<String>,
    pub image: Option<String>,
    pub error: Option<String>,
    pub security_report: Option<SecurityReport>,
    /// Every stage entered, in order, starting with `Pending`.
    pub history: Vec<Stage>,
    pub duration_ms: u64,
}

struct Run {
    id: String,
    stage: Stage,
    history: Vec<Stage>,
    started: Instant,
}

impl Run {
    fn new(id: String) -> Self {
        Run {
            id,
            stage: Stage::Pending,
            history: vec![Stage::Pending],
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {} -> {}",
            self.stage,
            next
        );
        obs::emit_stage_changed(&self.id, self.stage, next);
        self.stage = next;
        self.history.push(next);
    }

    fn finish(self, report: Option<SecurityReport>) -> DeploymentOutcome {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        DeploymentOutcome {
            deployment_id: self.id,
            success: self.stage == Stage::Done,
            stage: self.stage,
            service_url: None,
            service_name: None,
            image: None,
            error: None,
            security_report: report,
            history: self.history,
            duration_ms,
        }
    }
}

pub struct Pipeline {
    validator: SecurityValidator,
    builder: ImageBuilder,
    deployer: DeploymentManager,
    config: Arc<ShipyardConfig>,
}

impl Pipeline {
    pub fn new(
        config: ShipyardConfig,
        host: Arc<dyn RepositoryHost>,
        builds: Arc<dyn BuildService>,
        platform: Arc<dyn HostingPlatform>,
    ) -> DeployResult<Self> {
        let config = Arc::new(config);
        let analyzer =
            RepositoryAnalyzer::new(Arc::clone(&host)).with_max_files(config.max_remote_files);
        Ok(Pipeline {
            validator: SecurityValidator::new(analyzer)?,
            builder: ImageBuilder::new(builds, host, Arc::clone(&config)),
            deployer: DeploymentManager::new(platform, Arc::clone(&config)),
            config,
        })
    }

    /// Pipeline talking to the real services named by `config`.
    pub fn from_config(config: ShipyardConfig) -> DeployResult<Self> {
        let tokens = config.token_cache()?;
        let host = match &config.github_api_url {
            Some(url) => GitHubClient::with_base_url(url, config.github_token.clone())?,
            None => GitHubClient::new(config.github_token.clone())?,
        };
        let builds = match &config.build_api_url {
            Some(url) => CloudBuildClient::with_base_url(url, Arc::clone(&tokens))?,
            None => CloudBuildClient::new(Arc::clone(&tokens))?,
        };
        let platform = match &config.run_api_url {
            Some(url) => CloudRunClient::with_base_url(url, tokens)?,
            None => CloudRunClient::new(tokens)?,
        };
        Self::new(config, Arc::new(host), Arc::new(builds), Arc::new(platform))
    }

    pub fn config(&self) -> &ShipyardConfig {
        &self.config
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    pub fn builder(&self) -> &ImageBuilder {
        &self.builder
    }

    pub fn deployer(&self) -> &DeploymentManager {
        &self.deployer
    }

    /// Security scan only; nothing is built or deployed.
    pub async fn scan(&self, source: &SourceLocation) -> DeployResult<SecurityReport> {
        Ok(self.validator.validate(source).await?)
    }

    /// Take `request` through validation, build and deploy.
    ///
    /// Never returns an error: every failure becomes `success: false` with
    /// the stage-prefixed message in `error`.
    pub async fn run(&self, request: DeploymentRequest) -> DeploymentOutcome {
        let id = uuid::Uuid::new_v4().to_string();
        let span = DeploySpan::new(&id, &request.repo.full_name(), &request.branch);
        self.execute(id, request).instrument(span.span()).await
    }

    async fn execute(&self, id: String, request: DeploymentRequest) -> DeploymentOutcome {
        METRICS.inc_started();
        obs::emit_deploy_started(&id, &request.repo.full_name(), &request.branch);
        let mut run = Run::new(id);

        run.advance(Stage::Validating);
        if let Err(err) = self.deployer.target_for(&request) {
            return self.failed(run, err, None);
        }
        let ScanOutcome { report, analysis } = match self.validator.scan(&request.source()).await {
            Ok(outcome) => outcome,
            Err(err) => return self.failed(run, err.into(), None),
        };

        if report.is_blocked() {
            run.advance(Stage::Blocked);
            METRICS.inc_blocked();
            let blockers = report.summary.blockers;
            obs::emit_deploy_blocked(&run.id, blockers, &report.recommendations);
            let message = format!(
                "{}: deployment blocked by {} blocking security finding(s)",
                Stage::Validating,
                blockers
            );
            return self.finished(run, Some(report), |outcome| outcome.error = Some(message));
        }

        let request = self.with_repository_defaults(request, analysis.deploy_config.as_ref());

        run.advance(Stage::Building);
        let built = match self.builder.build(&request).await {
            Ok(built) => built,
            Err(err) => return self.failed(run, err, Some(report)),
        };

        run.advance(Stage::Deploying);
        let deployed = match self.deployer.deploy(&request, &built.image).await {
            Ok(deployed) => deployed,
            Err(err) => return self.failed(run, err, Some(report)),
        };

        run.advance(Stage::Done);
        METRICS.inc_succeeded();
        self.finished(run, Some(report), |outcome| {
            outcome.service_url = Some(deployed.url);
            outcome.service_name = Some(deployed.service_name);
            outcome.image = Some(built.image);
        })
    }

    /// Fill what the request leaves open from the repository's deploy config
    /// and the configured repository token.
    fn with_repository_defaults(
        &self,
        mut request: DeploymentRequest,
        deploy_config: Option<&DeployConfig>,
    ) -> DeploymentRequest {
        if let Some(deploy_config) = deploy_config {
            if request.runtime.is_none() {
                request.runtime = deploy_config.runtime.clone();
            }
            for (name, value) in &deploy_config.env {
                request
                    .env
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        if request.repo_token.is_none() {
            request.repo_token = self.config.github_token.clone();
        }
        request
    }

    fn failed(
        &self,
        mut run: Run,
        err: DeployError,
        report: Option<SecurityReport>,
    ) -> DeploymentOutcome {
        let stage = err.stage().unwrap_or(run.stage);
        let message = format!("{}: {}", stage, err);
        error!(deployment_id = %run.id, stage = %stage, error = %err, "deployment failed");
        run.advance(Stage::Failed);
        METRICS.inc_failed();
        self.finished(run, report, |outcome| outcome.error = Some(message))
    }

    fn finished(
        &self,
        run: Run,
        report: Option<SecurityReport>,
        fill: impl FnOnce(&mut DeploymentOutcome),
    ) -> DeploymentOutcome {
        let mut outcome = run.finish(report);
        fill(&mut outcome);
        obs::emit_deploy_finished(
            &outcome.deployment_id,
            outcome.stage,
            outcome.success,
            outcome.duration_ms,
            outcome.service_url.as_deref(),
        );
        outcome
    }
}
