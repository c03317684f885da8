//! The deployment request and the names derived from it.

use std::collections::BTreeMap;

use shipyard_cloud::RepoRef;
use shipyard_scan::{Runtime, SourceLocation};

use crate::error::{DeployError, DeployResult};

/// Longest service name the hosting platform accepts.
pub const MAX_SERVICE_NAME_LEN: usize = 63;

/// One attempt to take a repository branch to a running service.
#[derive(Clone, PartialEq)]
pub struct DeploymentRequest {
    pub repo: RepoRef,
    pub branch: String,
    /// Caller environment; `PORT` is always dropped when the service is written.
    pub env: BTreeMap<String, String>,
    pub project: Option<String>,
    pub region: Option<String>,
    pub service_name: Option<String>,
    /// `None` means: take it from the repository's deploy config.
    pub runtime: Option<Runtime>,
    /// Scoped token the build uses to download the source tarball.
    pub repo_token: Option<String>,
}

impl std::fmt::Debug for DeploymentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentRequest")
            .field("repo", &self.repo.full_name())
            .field("branch", &self.branch)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("project", &self.project)
            .field("region", &self.region)
            .field("service_name", &self.service_name)
            .field("runtime", &self.runtime)
            .field("repo_token", &self.repo_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl DeploymentRequest {
    pub fn new(repo: RepoRef, branch: &str) -> Self {
        DeploymentRequest {
            repo,
            branch: branch.to_string(),
            env: BTreeMap::new(),
            project: None,
            region: None,
            service_name: None,
            runtime: None,
            repo_token: None,
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_repo_token(mut self, token: &str) -> Self {
        self.repo_token = Some(token.to_string());
        self
    }

    pub fn source(&self) -> SourceLocation {
        SourceLocation::remote(self.repo.clone(), &self.branch)
    }

    /// Runtime to build with; the managed Node runtime when nothing declared one.
    pub fn runtime_or_default(&self) -> Runtime {
        self.runtime.clone().unwrap_or_default()
    }

    /// The requested service name, checked, or `{prefix}-{owner}-{name}`.
    pub fn service_name_with_prefix(&self, prefix: &str) -> DeployResult<String> {
        match &self.service_name {
            Some(name) => {
                validate_service_name(name)?;
                Ok(name.clone())
            }
            None => Ok(default_service_name(prefix, &self.repo)),
        }
    }
}

/// Lower-case, with every character outside `[a-z0-9-]` replaced by `-`.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// `owner-name`, normalized.
pub fn repo_slug(repo: &RepoRef) -> String {
    normalize(&format!("{}-{}", repo.owner, repo.name))
}

pub fn default_service_name(prefix: &str, repo: &RepoRef) -> String {
    let mut name = normalize(&format!("{}-{}", prefix, repo_slug(repo)));
    name.truncate(MAX_SERVICE_NAME_LEN);
    let trimmed = name.trim_end_matches('-');
    if trimmed.starts_with(|c: char| c.is_ascii_lowercase()) {
        trimmed.to_string()
    } else {
        format!("s-{}", trimmed)
            .chars()
            .take(MAX_SERVICE_NAME_LEN)
            .collect::<String>()
            .trim_end_matches('-')
            .to_string()
    }
}

/// Lower-case letters, digits and hyphens; starts with a letter; no trailing hyphen.
pub fn validate_service_name(name: &str) -> DeployResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SERVICE_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DeployError::Validation(format!(
            "service name {:?} must be 1-{} lower-case letters, digits or hyphens, start with a letter and not end with a hyphen",
            name, MAX_SERVICE_NAME_LEN
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        let repo = RepoRef::new("Acme", "Weather_Tools");
        assert_eq!(default_service_name("mcp", &repo), "mcp-acme-weather-tools");
    }

    #[test]
    fn test_default_service_name_is_truncated_cleanly() {
        let repo = RepoRef::new("acme", &"x".repeat(80));
        let name = default_service_name("mcp", &repo);
        assert_eq!(name.len(), MAX_SERVICE_NAME_LEN);
        assert!(validate_service_name(&name).is_ok());

        let repo = RepoRef::new("9lives", "tools");
        let name = default_service_name("", &repo);
        assert!(validate_service_name(&name).is_ok());
    }

    #[test]
    fn test_explicit_service_name_is_validated() {
        let repo = RepoRef::new("acme", "tools");
        let request = DeploymentRequest::new(repo.clone(), "main").with_service_name("Tools_Svc");
        assert!(matches!(
            request.service_name_with_prefix("mcp"),
            Err(DeployError::Validation(_))
        ));

        let request = DeploymentRequest::new(repo, "main").with_service_name("tools-svc");
        assert_eq!(request.service_name_with_prefix("mcp").unwrap(), "tools-svc");
    }

    #[test]
    fn test_debug_hides_repo_token_and_env_values() {
        let request = DeploymentRequest::new(RepoRef::new("acme", "tools"), "main")
            .with_env("API_KEY", "hunter2")
            .with_repo_token("ghs_secret");
        let rendered = format!("{:?}", request);
        assert!(rendered.contains("API_KEY"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("ghs_secret"));
    }
}
