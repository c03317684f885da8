//! Shipyard Scan: static security scanning and the deployment gate.
//!
//! Layer 1 of the workspace. A [`SecurityValidator`] runs the
//! [`RepositoryAnalyzer`] over a hosted or local repository, applies the
//! [`PatternCatalog`] through the [`PatternMatcher`], checks the parsed
//! deployment config, and folds everything into a [`SecurityReport`] whose
//! score decides whether a deployment may proceed.

pub mod analyzer;
pub mod deploy_config;
pub mod error;
pub mod matcher;
pub mod patterns;
pub mod report;
pub mod validator;

pub use analyzer::{FileRecord, RepositoryAnalysis, RepositoryAnalyzer, SourceLocation};
pub use deploy_config::{DeployConfig, Language, Runtime};
pub use error::{ScanError, ScanResult};
pub use matcher::{PatternMatch, PatternMatcher};
pub use patterns::{PatternCatalog, SecurityPattern};
pub use report::{Category, Score, SecurityReport, SecurityVulnerability, Severity, Summary};
pub use validator::{is_blocked, summary_line, ScanOutcome, SecurityValidator};
