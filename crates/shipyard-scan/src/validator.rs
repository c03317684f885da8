//! Security validation: analysis, pattern scan, config checks, verdict.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::analyzer::{FileRecord, RepositoryAnalysis, RepositoryAnalyzer, SourceLocation};
use crate::deploy_config::{ClientIdType, DeployConfig, SameSite};
use crate::error::ScanResult;
use crate::matcher::PatternMatcher;
use crate::patterns::PatternCatalog;
use crate::report::{Category, Score, SecurityReport, SecurityVulnerability, Severity, Summary};

pub const DOCS_BASE_URL: &str = "https://docs.shipyard.dev/security";

pub const NO_ISSUES_RECOMMENDATION: &str =
    "No critical security issues found. Consider adding explicit security configuration.";
const MISSING_CONFIG_RECOMMENDATION: &str =
    "Add a sigyl.yaml or mcp.yaml deployment config with explicit security settings.";
const PLAIN_HTTP_RECOMMENDATION: &str =
    "Use HTTPS for all production connections. Avoid http:// URLs in configuration.";

/// Documentation page for a finding category.
pub fn documentation_url(category: Category) -> String {
    let page = match category {
        Category::TokenPassthrough => "token-passthrough",
        Category::ConfusedDeputy => "confused-deputy",
        Category::SessionHijacking => "session-hijacking",
        Category::MissingValidation => "validation",
        Category::InsecureConfig => "configuration",
    };
    format!("{}/{}", DOCS_BASE_URL, page)
}

fn category_recommendation(category: Category) -> &'static str {
    match category {
        Category::TokenPassthrough => {
            "Critical: remove token passthrough anti-patterns. Validate every token before use."
        }
        Category::SessionHijacking => {
            "Important: implement secure session management. Generate session ids with crypto.randomUUID()."
        }
        Category::ConfusedDeputy => {
            "OAuth: validate redirect URIs and obtain user consent for each client."
        }
        Category::MissingValidation => {
            "Validation: check token audience and expiry, and sanitize user input before it reaches a query."
        }
        Category::InsecureConfig => {
            "Configuration: disable debug output and restrict CORS origins in production."
        }
    }
}

/// Report plus the analysis it was derived from.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub report: SecurityReport,
    pub analysis: RepositoryAnalysis,
}

/// Orchestrates analysis and pattern matching into a [`SecurityReport`].
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    analyzer: RepositoryAnalyzer,
    matcher: PatternMatcher,
    catalog: Arc<PatternCatalog>,
}

impl SecurityValidator {
    /// Validator running the built-in catalog.
    pub fn new(analyzer: RepositoryAnalyzer) -> ScanResult<Self> {
        Self::with_catalog(analyzer, Arc::new(PatternCatalog::builtin()?))
    }

    pub fn with_catalog(analyzer: RepositoryAnalyzer, catalog: Arc<PatternCatalog>) -> ScanResult<Self> {
        Ok(SecurityValidator {
            analyzer,
            matcher: PatternMatcher::new()?,
            catalog,
        })
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    pub fn analyzer(&self) -> &RepositoryAnalyzer {
        &self.analyzer
    }

    /// Produce the report for `source`. Fails only when the repository
    /// cannot be analyzed at all.
    pub async fn validate(&self, source: &SourceLocation) -> ScanResult<SecurityReport> {
        Ok(self.scan(source).await?.report)
    }

    /// Like [`validate`](Self::validate), also returning the analysis.
    pub async fn scan(&self, source: &SourceLocation) -> ScanResult<ScanOutcome> {
        info!(source = %source.identity(), branch = source.branch(), "starting security scan");
        let analysis = self.analyzer.analyze(source).await?;

        let mut vulnerabilities = self.scan_files(&analysis.files);
        if let Some(config) = &analysis.deploy_config {
            vulnerabilities.extend(config_findings(config));
        }

        let report = build_report(
            &source.identity(),
            source.branch(),
            vulnerabilities,
            &analysis,
        );
        log_report(&report);
        Ok(ScanOutcome { report, analysis })
    }

    /// Run the catalog over every file.
    pub fn scan_files(&self, files: &[FileRecord]) -> Vec<SecurityVulnerability> {
        files
            .iter()
            .flat_map(|file| self.matcher.find_matches(file, self.catalog.patterns()))
            .map(|m| SecurityVulnerability {
                category: m.pattern.category,
                severity: m.pattern.severity,
                title: m.pattern.name.clone(),
                description: m.pattern.description.clone(),
                file: m.file,
                line: Some(m.line),
                column: Some(m.column),
                evidence: m.matched,
                fix: m.pattern.fix.clone(),
                documentation: documentation_url(m.pattern.category),
            })
            .collect()
    }
}

fn config_finding(
    config: &DeployConfig,
    category: Category,
    severity: Severity,
    title: &str,
    description: &str,
    evidence: String,
    fix: &str,
) -> SecurityVulnerability {
    SecurityVulnerability {
        category,
        severity,
        title: title.to_string(),
        description: description.to_string(),
        file: config.source_file.clone(),
        line: None,
        column: None,
        evidence,
        fix: fix.to_string(),
        documentation: documentation_url(category),
    }
}

/// Structural checks on a parsed deployment config.
pub fn config_findings(config: &DeployConfig) -> Vec<SecurityVulnerability> {
    let mut found = Vec::new();

    if let Some(security) = &config.security {
        if security.allow_token_passthrough == Some(true) {
            found.push(config_finding(
                config,
                Category::TokenPassthrough,
                Severity::Block,
                "Token Passthrough Enabled in Configuration",
                "The configuration explicitly allows token passthrough.",
                "security.allowTokenPassthrough: true".to_string(),
                "Set security.allowTokenPassthrough: false or remove the setting.",
            ));
        }
        if security.require_token_validation == Some(false) {
            found.push(config_finding(
                config,
                Category::MissingValidation,
                Severity::Warning,
                "Token Validation Disabled",
                "The configuration turns off validation of incoming tokens.",
                "security.requireTokenValidation: false".to_string(),
                "Set security.requireTokenValidation: true.",
            ));
        }
        if let Some(session) = &security.session_config {
            if session.secure == Some(false) {
                found.push(config_finding(
                    config,
                    Category::SessionHijacking,
                    Severity::Error,
                    "Insecure Session Configuration",
                    "Session cookies are sent over plain connections (secure: false).",
                    "security.sessionConfig.secure: false".to_string(),
                    "Set security.sessionConfig.secure: true.",
                ));
            }
            if session.http_only == Some(false) {
                found.push(config_finding(
                    config,
                    Category::SessionHijacking,
                    Severity::Error,
                    "Script-Readable Session Cookies",
                    "Session cookies are readable from scripts (httpOnly: false).",
                    "security.sessionConfig.httpOnly: false".to_string(),
                    "Set security.sessionConfig.httpOnly: true.",
                ));
            }
            if session.same_site == Some(SameSite::None) {
                found.push(config_finding(
                    config,
                    Category::SessionHijacking,
                    Severity::Warning,
                    "Permissive SameSite Cookie Policy",
                    "Session cookies are sent on cross-site requests (sameSite: none).",
                    "security.sessionConfig.sameSite: none".to_string(),
                    "Set security.sessionConfig.sameSite: strict.",
                ));
            }
        }
    }

    if let Some(oauth) = &config.oauth {
        if oauth.client_id_type == Some(ClientIdType::Static) && oauth.redirect_uris.len() > 1 {
            found.push(config_finding(
                config,
                Category::ConfusedDeputy,
                Severity::Warning,
                "Static Client ID with Multiple Redirect URIs",
                "A static client id shared by several redirect URIs may create a confused deputy vulnerability.",
                format!(
                    "clientIdType: static, redirectUris: [{}]",
                    oauth.redirect_uris.join(", ")
                ),
                "Obtain user consent for each redirect URI.",
            ));
        }
    }

    found
}

/// Summary, score and recommendations for a set of findings.
pub fn build_report(
    repository: &str,
    branch: &str,
    vulnerabilities: Vec<SecurityVulnerability>,
    analysis: &RepositoryAnalysis,
) -> SecurityReport {
    let summary = Summary::count(&vulnerabilities);
    let recommendations = recommendations(&vulnerabilities, analysis);
    SecurityReport {
        repository: repository.to_string(),
        branch: branch.to_string(),
        scanned_at: Utc::now(),
        score: summary.score(),
        summary,
        vulnerabilities,
        recommendations,
    }
}

/// Fixed recommendation per non-empty category, in category order.
pub fn recommendations(
    vulnerabilities: &[SecurityVulnerability],
    analysis: &RepositoryAnalysis,
) -> Vec<String> {
    if vulnerabilities.is_empty() {
        return vec![NO_ISSUES_RECOMMENDATION.to_string()];
    }

    let mut out: Vec<String> = Category::ALL
        .iter()
        .filter(|c| vulnerabilities.iter().any(|v| v.category == **c))
        .map(|c| category_recommendation(*c).to_string())
        .collect();
    if !analysis.has_deploy_config {
        out.push(MISSING_CONFIG_RECOMMENDATION.to_string());
    }
    if vulnerabilities.iter().any(|v| v.evidence.contains("http://")) {
        out.push(PLAIN_HTTP_RECOMMENDATION.to_string());
    }
    out
}

/// The deployment gate.
pub fn is_blocked(report: &SecurityReport) -> bool {
    report.is_blocked()
}

/// One-line human-readable verdict.
pub fn summary_line(report: &SecurityReport) -> String {
    let verdict = match report.score {
        Score::Safe => "safe to deploy",
        Score::Warning => "deployable with warnings",
        Score::Blocked => "deployment blocked",
    };
    format!(
        "{}@{}: {} ({} findings: {} blocking, {} errors, {} warnings, {} info)",
        report.repository,
        report.branch,
        verdict,
        report.summary.total,
        report.summary.blockers,
        report.summary.errors,
        report.summary.warnings,
        report.summary.info,
    )
}

fn log_report(report: &SecurityReport) {
    info!(
        repo = %report.repository,
        branch = %report.branch,
        score = %report.score,
        total = report.summary.total,
        blockers = report.summary.blockers,
        errors = report.summary.errors,
        warnings = report.summary.warnings,
        "security scan finished"
    );
    for finding in report.blocking() {
        warn!(
            title = %finding.title,
            file = %finding.file,
            line = ?finding.line,
            "blocking finding"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy_config::{OAuthConfig, Runtime, SecurityConfig, SessionConfig};

    fn config(security: Option<SecurityConfig>, oauth: Option<OAuthConfig>) -> DeployConfig {
        DeployConfig {
            source_file: "sigyl.yaml".into(),
            name: None,
            runtime: Some(Runtime::default()),
            env: Default::default(),
            security,
            oauth,
        }
    }

    #[test]
    fn test_passthrough_flag_blocks() {
        let findings = config_findings(&config(
            Some(SecurityConfig {
                allow_token_passthrough: Some(true),
                ..Default::default()
            }),
            None,
        ));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Block);
        assert_eq!(findings[0].file, "sigyl.yaml");
        assert_eq!(findings[0].documentation, "https://docs.shipyard.dev/security/token-passthrough");
    }

    #[test]
    fn test_cookie_flags() {
        let findings = config_findings(&config(
            Some(SecurityConfig {
                session_config: Some(SessionConfig {
                    secure: Some(false),
                    http_only: Some(false),
                    same_site: Some(SameSite::None),
                }),
                ..Default::default()
            }),
            None,
        ));
        let severities: Vec<_> = findings.iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::Error, Severity::Error, Severity::Warning]);
        assert!(findings.iter().all(|f| f.category == Category::SessionHijacking));
    }

    #[test]
    fn test_static_client_needs_more_than_one_redirect() {
        let oauth = |uris: &[&str]| OAuthConfig {
            client_id_type: Some(ClientIdType::Static),
            redirect_uris: uris.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        };
        assert!(config_findings(&config(None, Some(oauth(&["https://a/cb"])))).is_empty());
        let findings = config_findings(&config(None, Some(oauth(&["https://a/cb", "https://b/cb"]))));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, Category::ConfusedDeputy);
        assert!(findings[0].evidence.contains("https://a/cb, https://b/cb"));
    }

    #[test]
    fn test_recommendations() {
        let analysis = RepositoryAnalysis::default();
        assert_eq!(recommendations(&[], &analysis), vec![NO_ISSUES_RECOMMENDATION.to_string()]);

        let mut finding = config_findings(&config(
            Some(SecurityConfig {
                allow_token_passthrough: Some(true),
                ..Default::default()
            }),
            None,
        ));
        finding[0].evidence = "fetch('http://upstream')".into();
        let recs = recommendations(&finding, &analysis);
        assert_eq!(recs.len(), 3);
        assert!(recs[0].starts_with("Critical"));
        assert_eq!(recs[1], MISSING_CONFIG_RECOMMENDATION);
        assert_eq!(recs[2], PLAIN_HTTP_RECOMMENDATION);
    }

    #[test]
    fn test_is_blocked_tracks_blockers() {
        let analysis = RepositoryAnalysis::default();
        let blocked = build_report(
            "acme/x",
            "main",
            config_findings(&config(
                Some(SecurityConfig {
                    allow_token_passthrough: Some(true),
                    ..Default::default()
                }),
                None,
            )),
            &analysis,
        );
        assert!(is_blocked(&blocked));
        assert_eq!(is_blocked(&blocked), blocked.summary.blockers > 0);
        assert!(summary_line(&blocked).contains("acme/x@main: deployment blocked"));

        let clean = build_report("acme/x", "main", vec![], &analysis);
        assert!(!is_blocked(&clean));
        assert_eq!(clean.score, Score::Safe);
        assert!(summary_line(&clean).contains("0 findings"));
    }
}
