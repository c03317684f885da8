//! Shipyard - repository in, running service out
//!
//! The `shipyard` command scans a repository for MCP security issues and
//! deploys it as a serverless service.
//!
//! ## Commands
//!
//! - `scan`: Run the security gate over a hosted or local repository
//! - `deploy`: Validate, build and publish a hosted repository
//! - `delete`: Remove a deployed service
//! - `restart`: Roll a new revision of a deployed service
//! - `logs`: Show the latest log entries of a deployed service

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shipyard_cloud::{GitHubClient, LogEntry, RepoRef, ServiceTarget};
use shipyard_core::metrics::METRICS;
use shipyard_core::{DeploymentOutcome, DeploymentRequest, Pipeline, ShipyardConfig};
use shipyard_scan::{
    summary_line, RepositoryAnalyzer, SecurityReport, SecurityValidator, SourceLocation,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(author = "Shipyard Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scan and deploy MCP servers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a repository without building or deploying it
    Scan {
        /// Local directory, `owner/name`, or a GitHub URL
        target: String,

        /// Branch to scan (hosted repositories only)
        #[arg(short, long, default_value = "main")]
        branch: String,
    },

    /// Validate, build and deploy a hosted repository
    Deploy {
        /// `owner/name` or a GitHub URL
        repo: String,

        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Target project (default: SHIPYARD_PROJECT)
        #[arg(long)]
        project: Option<String>,

        /// Target region (default: SHIPYARD_REGION)
        #[arg(long)]
        region: Option<String>,

        /// Service name (default: derived from the repository)
        #[arg(long)]
        service_name: Option<String>,

        /// Environment variable for the service, as KEY=VALUE (repeatable)
        #[arg(short, long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },

    /// Delete a deployed service
    Delete {
        service: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        region: Option<String>,
    },

    /// Restart a deployed service with its current settings
    Restart {
        service: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        region: Option<String>,
    },

    /// Show the latest log entries of a deployed service
    Logs {
        service: String,

        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    shipyard_core::telemetry::init_tracing(cli.json, level);

    let config = ShipyardConfig::from_env().context("Failed to load configuration")?;

    let result = match cli.command {
        Commands::Scan { target, branch } => cmd_scan(&config, &target, &branch, cli.json).await,
        Commands::Deploy {
            repo,
            branch,
            project,
            region,
            service_name,
            env,
        } => {
            let request = deploy_request(
                &repo,
                &branch,
                project.as_deref(),
                region.as_deref(),
                service_name.as_deref(),
                &env,
            )?;
            cmd_deploy(config, request, cli.json).await
        }
        Commands::Delete {
            service,
            project,
            region,
        } => cmd_delete(config, &service, project.as_deref(), region.as_deref()).await,
        Commands::Restart {
            service,
            project,
            region,
        } => cmd_restart(config, &service, project.as_deref(), region.as_deref()).await,
        Commands::Logs {
            service,
            limit,
            project,
            region,
        } => {
            cmd_logs(
                config,
                &service,
                limit,
                project.as_deref(),
                region.as_deref(),
                cli.json,
            )
            .await
        }
    };

    METRICS.flush();
    result
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn parse_repo(raw: &str) -> Result<RepoRef> {
    RepoRef::parse(raw).with_context(|| format!("'{}' is not a GitHub repository", raw))
}

/// Local directories are scanned in place; anything else must name a
/// hosted repository.
fn scan_source(target: &str, branch: &str) -> Result<SourceLocation> {
    let path = Path::new(target);
    if path.is_dir() {
        return Ok(SourceLocation::Local(path.to_path_buf()));
    }
    Ok(SourceLocation::remote(parse_repo(target)?, branch))
}

fn deploy_request(
    repo: &str,
    branch: &str,
    project: Option<&str>,
    region: Option<&str>,
    service_name: Option<&str>,
    env: &[(String, String)],
) -> Result<DeploymentRequest> {
    let mut request = DeploymentRequest::new(parse_repo(repo)?, branch);
    if let Some(project) = project {
        request = request.with_project(project);
    }
    if let Some(region) = region {
        request = request.with_region(region);
    }
    if let Some(name) = service_name {
        request = request.with_service_name(name);
    }
    for (key, value) in env {
        request = request.with_env(key, value);
    }
    Ok(request)
}

fn service_target(
    config: &ShipyardConfig,
    service: &str,
    project: Option<&str>,
    region: Option<&str>,
) -> Result<ServiceTarget> {
    let project = project
        .map(str::to_string)
        .or_else(|| config.project.clone())
        .context("No target project: pass --project or set SHIPYARD_PROJECT")?;
    let region = region.unwrap_or(&config.region);
    Ok(ServiceTarget::new(&project, region, service))
}

async fn scan_report(config: &ShipyardConfig, source: &SourceLocation) -> Result<SecurityReport> {
    let analyzer = match source {
        SourceLocation::Local(_) => RepositoryAnalyzer::local_only(),
        SourceLocation::Remote { .. } => {
            let host = match &config.github_api_url {
                Some(url) => GitHubClient::with_base_url(url, config.github_token.clone())?,
                None => GitHubClient::new(config.github_token.clone())?,
            };
            RepositoryAnalyzer::new(Arc::new(host)).with_max_files(config.max_remote_files)
        }
    };
    let validator = SecurityValidator::new(analyzer)?;
    let report = validator
        .validate(source)
        .await
        .with_context(|| format!("Failed to scan {}", source.identity()))?;
    Ok(report)
}

async fn cmd_scan(config: &ShipyardConfig, target: &str, branch: &str, json: bool) -> Result<()> {
    let source = scan_source(target, branch)?;
    let report = scan_report(config, &source).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.is_blocked() {
        bail!(
            "{} blocking finding(s) in {}",
            report.summary.blockers,
            report.repository
        );
    }
    Ok(())
}

fn print_report(report: &SecurityReport) {
    println!("{}", summary_line(report));
    for finding in &report.vulnerabilities {
        let location = match finding.line {
            Some(line) => format!("{}:{}", finding.file, line),
            None => finding.file.clone(),
        };
        println!(
            "  [{}] {} ({})",
            finding.severity, finding.title, location
        );
        println!("      fix: {}", finding.fix);
    }
    if !report.recommendations.is_empty() {
        println!();
        for recommendation in &report.recommendations {
            println!("  - {}", recommendation);
        }
    }
}

async fn cmd_deploy(config: ShipyardConfig, request: DeploymentRequest, json: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("Failed to set up the pipeline")?;
    info!(repo = %request.repo, branch = %request.branch, "deploying");

    let outcome = pipeline.run(request).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if !outcome.success {
        bail!(
            "Deployment {} ended in stage '{}'",
            outcome.deployment_id,
            outcome.stage
        );
    }
    Ok(())
}

fn print_outcome(outcome: &DeploymentOutcome) {
    if let Some(report) = &outcome.security_report {
        print_report(report);
        println!();
    }
    match (&outcome.service_url, &outcome.error) {
        (Some(url), _) => {
            println!(
                "Deployed {} in {} ms",
                outcome.service_name.as_deref().unwrap_or("service"),
                outcome.duration_ms
            );
            if let Some(image) = &outcome.image {
                println!("Image: {}", image);
            }
            println!("URL:   {}", url);
        }
        (None, Some(error)) => println!("Deployment failed: {}", error),
        (None, None) => println!("Deployment ended in stage '{}'", outcome.stage),
    }
}

async fn cmd_delete(
    config: ShipyardConfig,
    service: &str,
    project: Option<&str>,
    region: Option<&str>,
) -> Result<()> {
    let target = service_target(&config, service, project, region)?;
    let pipeline = Pipeline::from_config(config).context("Failed to set up the pipeline")?;
    let deleted = pipeline
        .deployer()
        .delete_service(&target)
        .await
        .with_context(|| format!("Failed to delete {}", target))?;
    if deleted {
        println!("Deleted service {}", target);
    } else {
        println!("Service {} does not exist", target);
    }
    Ok(())
}

async fn cmd_restart(
    config: ShipyardConfig,
    service: &str,
    project: Option<&str>,
    region: Option<&str>,
) -> Result<()> {
    let target = service_target(&config, service, project, region)?;
    let pipeline = Pipeline::from_config(config).context("Failed to set up the pipeline")?;
    pipeline
        .deployer()
        .restart_service(&target)
        .await
        .with_context(|| format!("Failed to restart {}", target))?;
    println!("Restart requested for {}", target);
    Ok(())
}

async fn cmd_logs(
    config: ShipyardConfig,
    service: &str,
    limit: usize,
    project: Option<&str>,
    region: Option<&str>,
    json: bool,
) -> Result<()> {
    let target = service_target(&config, service, project, region)?;
    let pipeline = Pipeline::from_config(config).context("Failed to set up the pipeline")?;
    let entries = pipeline
        .deployer()
        .service_logs(&target, limit)
        .await
        .with_context(|| format!("Failed to read logs of {}", target))?;
    if entries.is_empty() && !json {
        println!("No log entries for {}", target);
    }
    for line in render_logs(&entries, json)? {
        println!("{}", line);
    }
    Ok(())
}

fn render_logs(entries: &[LogEntry], json: bool) -> Result<Vec<String>> {
    if json {
        return entries
            .iter()
            .map(|entry| serde_json::to_string(entry).context("Failed to encode log entry"))
            .collect();
    }
    Ok(entries.iter().map(LogEntry::to_string).collect())
}
