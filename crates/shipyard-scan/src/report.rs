//! Findings, severities and the security report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a finding. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    /// Prevents deployment.
    Block,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Block => "block",
        };
        f.write_str(s)
    }
}

/// Vulnerability class a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TokenPassthrough,
    ConfusedDeputy,
    SessionHijacking,
    MissingValidation,
    InsecureConfig,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::TokenPassthrough,
        Category::ConfusedDeputy,
        Category::SessionHijacking,
        Category::MissingValidation,
        Category::InsecureConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TokenPassthrough => "token_passthrough",
            Category::ConfusedDeputy => "confused_deputy",
            Category::SessionHijacking => "session_hijacking",
            Category::MissingValidation => "missing_validation",
            Category::InsecureConfig => "insecure_config",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityVulnerability {
    pub category: Category,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub evidence: String,
    pub fix: String,
    pub documentation: String,
}

/// Aggregate verdict of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Safe,
    Warning,
    Blocked,
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Score::Safe => "safe",
            Score::Warning => "warning",
            Score::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Finding counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub blockers: usize,
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
}

impl Summary {
    pub fn count(vulnerabilities: &[SecurityVulnerability]) -> Self {
        let mut summary = Summary {
            total: vulnerabilities.len(),
            ..Default::default()
        };
        for v in vulnerabilities {
            match v.severity {
                Severity::Block => summary.blockers += 1,
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => summary.info += 1,
            }
        }
        summary
    }

    /// `blocked` on any blocker, `warning` on any error or more than three
    /// warnings, `safe` otherwise.
    pub fn score(&self) -> Score {
        if self.blockers > 0 {
            Score::Blocked
        } else if self.errors > 0 || self.warnings > 3 {
            Score::Warning
        } else {
            Score::Safe
        }
    }
}

/// Terminal artifact of the validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub repository: String,
    pub branch: String,
    pub scanned_at: DateTime<Utc>,
    pub vulnerabilities: Vec<SecurityVulnerability>,
    pub score: Score,
    pub summary: Summary,
    pub recommendations: Vec<String>,
}

impl SecurityReport {
    /// The deployment gate.
    pub fn is_blocked(&self) -> bool {
        self.score == Score::Blocked
    }

    /// Findings of `block` severity.
    pub fn blocking(&self) -> impl Iterator<Item = &SecurityVulnerability> {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity == Severity::Block)
    }
}
