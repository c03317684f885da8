//! Structured lifecycle events for deployments.
//!
//! Every event carries an `event` field (`deploy.started`, `build.polled`, ...)
//! so log pipelines can filter on it. [`DeploySpan`] tags everything logged
//! while a deployment runs with its id, repository and branch.

use tracing::{info, warn};

use crate::pipeline::Stage;

/// Span covering one deployment.
pub struct DeploySpan {
    span: tracing::Span,
}

impl DeploySpan {
    pub fn new(deployment_id: &str, repo: &str, branch: &str) -> Self {
        Self {
            span: tracing::info_span!(
                "shipyard.deploy",
                deployment_id = %deployment_id,
                repo = %repo,
                branch = %branch,
            ),
        }
    }

    /// The span, for instrumenting the deployment future.
    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }
}

pub fn emit_deploy_started(deployment_id: &str, repo: &str, branch: &str) {
    info!(event = "deploy.started", deployment_id = %deployment_id, repo = %repo, branch = %branch);
}

pub fn emit_stage_changed(deployment_id: &str, from: Stage, to: Stage) {
    info!(event = "deploy.stage_changed", deployment_id = %deployment_id, from = %from, to = %to);
}

pub fn emit_deploy_blocked(deployment_id: &str, blockers: usize, recommendations: &[String]) {
    warn!(
        event = "deploy.blocked",
        deployment_id = %deployment_id,
        blockers,
        first_recommendation = recommendations.first().map(String::as_str).unwrap_or(""),
    );
}

pub fn emit_deploy_finished(
    deployment_id: &str,
    stage: Stage,
    success: bool,
    duration_ms: u64,
    service_url: Option<&str>,
) {
    info!(
        event = "deploy.finished",
        deployment_id = %deployment_id,
        stage = %stage,
        success,
        duration_ms,
        service_url = service_url.unwrap_or(""),
    );
}

pub fn emit_build_submitted(build_id: &str, image: &str, log_url: Option<&str>) {
    info!(
        event = "build.submitted",
        build_id = %build_id,
        image = %image,
        log_url = log_url.unwrap_or(""),
    );
}

pub fn emit_build_polled(build_id: &str, attempt: u32, status: &dyn std::fmt::Display) {
    info!(event = "build.polled", build_id = %build_id, attempt, status = %status);
}

pub fn emit_url_resolved(service: &str, url: &str, attempts: u32, fallback: bool) {
    info!(
        event = "service.url_resolved",
        service = %service,
        url = %url,
        attempts,
        fallback,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_span_can_instrument() {
        let span = DeploySpan::new("dep-1", "acme/tools", "main");
        let _entered = span.span().entered();
        emit_stage_changed("dep-1", Stage::Pending, Stage::Validating);
    }
}
