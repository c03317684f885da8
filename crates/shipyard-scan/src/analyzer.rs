//! Repository fetching and classification.
//!
//! Both source locations, a hosted repository and a local directory, produce
//! the same [`FileRecord`] shape so everything downstream is location-blind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shipyard_cloud::{EntryKind, RepoRef, RepositoryHost, RepositoryInfo};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::deploy_config::{is_config_file, DeployConfig, CONFIG_FILE_NAMES};
use crate::error::{ScanError, ScanResult};

/// Default number of files fetched from a hosted repository.
pub const DEFAULT_MAX_FILES: usize = 50;

/// Directories never scanned, wherever they appear in a path.
pub const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    ".git",
    "coverage",
    ".nyc_output",
    "vendor",
    "__pycache__",
    "target",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "ts", "jsx", "tsx", "mjs", "cjs", "py", "go", "rs", "json", "yaml", "yml", "toml",
];

/// A fetched file. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Repository-relative path with `/` separators.
    pub path: String,
    pub content: String,
    pub language: String,
    pub size: u64,
}

impl FileRecord {
    pub fn new(path: &str, content: &str) -> Self {
        FileRecord {
            path: path.to_string(),
            content: content.to_string(),
            language: detect_language(path).to_string(),
            size: content.len() as u64,
        }
    }

    fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Where a repository's files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Remote { repo: RepoRef, branch: String },
    Local(PathBuf),
}

impl SourceLocation {
    pub fn remote(repo: RepoRef, branch: &str) -> Self {
        SourceLocation::Remote {
            repo,
            branch: branch.to_string(),
        }
    }

    /// Human-readable identity used in reports.
    pub fn identity(&self) -> String {
        match self {
            SourceLocation::Remote { repo, .. } => repo.full_name(),
            SourceLocation::Local(path) => path.display().to_string(),
        }
    }

    pub fn branch(&self) -> &str {
        match self {
            SourceLocation::Remote { branch, .. } => branch,
            SourceLocation::Local(_) => "local",
        }
    }
}

/// Result of analyzing a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryAnalysis {
    pub files: Vec<FileRecord>,
    /// A root `package.json` is present.
    pub has_manifest: bool,
    /// Some file is a container definition.
    pub has_build_file: bool,
    pub has_deploy_config: bool,
    pub dependencies: Vec<String>,
    pub dev_dependencies: Vec<String>,
    /// `None` when absent or unparseable.
    pub deploy_config: Option<DeployConfig>,
}

impl RepositoryAnalysis {
    /// Classify a set of fetched files.
    pub fn from_files(files: Vec<FileRecord>) -> Self {
        let has_manifest = files.iter().any(|f| f.path == "package.json");
        let has_build_file = files
            .iter()
            .any(|f| f.file_name().to_lowercase().contains("dockerfile"));
        let has_deploy_config = files.iter().any(|f| is_config_file(&f.path));

        let (dependencies, dev_dependencies) = files
            .iter()
            .find(|f| f.path == "package.json")
            .map(|f| manifest_dependencies(&f.content))
            .unwrap_or_default();

        let deploy_config = CONFIG_FILE_NAMES
            .iter()
            .find_map(|name| files.iter().find(|f| f.path == *name))
            .and_then(|f| DeployConfig::parse(&f.path, &f.content));

        RepositoryAnalysis {
            files,
            has_manifest,
            has_build_file,
            has_deploy_config,
            dependencies,
            dev_dependencies,
            deploy_config,
        }
    }
}

fn manifest_dependencies(content: &str) -> (Vec<String>, Vec<String>) {
    let manifest: serde_json::Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "could not parse package.json");
            return (Vec::new(), Vec::new());
        }
    };
    let keys = |field: &str| -> Vec<String> {
        manifest
            .get(field)
            .and_then(|deps| deps.as_object())
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default()
    };
    (keys("dependencies"), keys("devDependencies"))
}

/// Whether `path` lies under an excluded directory.
pub fn is_excluded(path: &str) -> bool {
    let mut components: Vec<&str> = path.split('/').collect();
    components.pop();
    components.iter().any(|c| EXCLUDED_DIRS.contains(c))
}

/// Root-level files that decide how a repository is built and gated. They are
/// always fetched from a hosted repository and do not count toward the cap.
pub fn is_priority_file(path: &str) -> bool {
    if path.contains('/') {
        return false;
    }
    is_config_file(path) || path == "package.json" || path.to_lowercase().contains("dockerfile")
}

/// Inclusion filter: source, manifest, container-definition and config files.
pub fn is_relevant_file(path: &str) -> bool {
    if is_excluded(path) {
        return false;
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    let lower = name.to_lowercase();
    if lower.contains("dockerfile") || lower.starts_with(".env") || lower == "readme.md" {
        return true;
    }
    match lower.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => SOURCE_EXTENSIONS.contains(&ext),
        _ => false,
    }
}

pub fn detect_language(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    if name.contains("dockerfile") {
        return "dockerfile";
    }
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "jsx" => "jsx",
        "tsx" => "tsx",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" => "markdown",
        "py" => "python",
        "go" => "go",
        "rs" => "rust",
        _ => "text",
    }
}

/// Fetches and classifies repository files.
#[derive(Clone)]
pub struct RepositoryAnalyzer {
    host: Option<Arc<dyn RepositoryHost>>,
    max_files: usize,
}

impl std::fmt::Debug for RepositoryAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryAnalyzer")
            .field("remote", &self.host.is_some())
            .field("max_files", &self.max_files)
            .finish()
    }
}

impl RepositoryAnalyzer {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        RepositoryAnalyzer {
            host: Some(host),
            max_files: DEFAULT_MAX_FILES,
        }
    }

    /// An analyzer that can only read local directories.
    pub fn local_only() -> Self {
        RepositoryAnalyzer {
            host: None,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    /// Cap on files fetched from a hosted repository.
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub async fn analyze(&self, source: &SourceLocation) -> ScanResult<RepositoryAnalysis> {
        let files = match source {
            SourceLocation::Remote { repo, branch } => self.fetch_remote(repo, branch).await?,
            SourceLocation::Local(root) => {
                let root = root.clone();
                tokio::task::spawn_blocking(move || read_local(&root))
                    .await
                    .map_err(|e| ScanError::Io(std::io::Error::other(e)))??
            }
        };
        info!(source = %source.identity(), files = files.len(), "repository analyzed");
        Ok(RepositoryAnalysis::from_files(files))
    }

    fn host(&self, repo: &RepoRef) -> ScanResult<&Arc<dyn RepositoryHost>> {
        self.host.as_ref().ok_or_else(|| ScanError::RepositoryUnavailable {
            repo: repo.full_name(),
            reason: "no repository host configured".to_string(),
        })
    }

    async fn fetch_remote(&self, repo: &RepoRef, branch: &str) -> ScanResult<Vec<FileRecord>> {
        let host = self.host(repo)?;
        let tree = host
            .list_tree(repo, branch)
            .await
            .map_err(|e| ScanError::from_host(&repo.full_name(), e))?;

        let (priority, rest): (Vec<_>, Vec<_>) = tree
            .into_iter()
            .filter(|e| e.kind == EntryKind::File && is_relevant_file(&e.path))
            .partition(|e| is_priority_file(&e.path));
        if rest.len() > self.max_files {
            info!(
                repo = %repo,
                relevant = rest.len(),
                limit = self.max_files,
                "fetching only the first files of the repository"
            );
        }

        let mut files = Vec::new();
        for entry in priority.into_iter().chain(rest.into_iter().take(self.max_files)) {
            match host.read_file(repo, branch, &entry.path).await {
                Ok(Some(content)) => {
                    let mut record = FileRecord::new(&entry.path, &content);
                    if entry.size > 0 {
                        record.size = entry.size;
                    }
                    files.push(record);
                }
                Ok(None) => debug!(path = %entry.path, "skipping non-file entry"),
                Err(err) => warn!(path = %entry.path, error = %err, "could not fetch file, skipping"),
            }
        }
        Ok(files)
    }

    pub async fn repository_info(&self, repo: &RepoRef) -> ScanResult<RepositoryInfo> {
        self.host(repo)?
            .repository_info(repo)
            .await
            .map_err(|e| ScanError::from_host(&repo.full_name(), e))
    }

    pub async fn is_public(&self, repo: &RepoRef) -> ScanResult<bool> {
        Ok(!self.repository_info(repo).await?.private)
    }
}

fn read_local(root: &Path) -> ScanResult<Vec<FileRecord>> {
    if !root.is_dir() {
        return Err(ScanError::InvalidRepository(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || !(e.file_type().is_dir() && EXCLUDED_DIRS.iter().any(|d| name == *d))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "could not walk entry, skipping");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !is_relevant_file(&path) {
            continue;
        }
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => files.push(FileRecord::new(&path, &content)),
            Err(err) => warn!(path = %path, error = %err, "could not read file, skipping"),
        }
    }
    Ok(files)
}
