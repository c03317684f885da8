//! Repository host API (GitHub REST).
//!
//! Lists a branch's tree, reads individual files and hands out the tarball
//! URL that build jobs download their source from.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CloudError;
use crate::http;
use crate::CloudResult;

/// `owner/name` identity of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: &str, name: &str) -> Self {
        RepoRef {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    /// Parse `https://github.com/owner/name(.git)`, `git@github.com:owner/name`
    /// or the short `owner/name` form.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim().trim_end_matches('/');
        let (path, allow_trailing) = if let Some(idx) = trimmed.find("github.com") {
            let rest = &trimmed[idx + "github.com".len()..];
            (rest.trim_start_matches(['/', ':']), true)
        } else if trimmed.contains("://") {
            return None;
        } else {
            (trimmed, false)
        };

        let mut parts = path.split('/');
        let owner = parts.next()?.trim();
        let name = parts.next()?.trim().trim_end_matches(".git");
        if !allow_trailing && parts.next().is_some() {
            return None;
        }
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(RepoRef::new(owner, name))
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// One node of a branch's file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl TreeEntry {
    pub fn file(path: &str, size: u64) -> Self {
        TreeEntry {
            path: path.to_string(),
            kind: EntryKind::File,
            size,
        }
    }
}

/// Repository-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub full_name: String,
    pub private: bool,
    pub default_branch: String,
    pub language: Option<String>,
}

/// Read access to a source repository host.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Recursive file listing of `branch`. A missing repository or branch is an error.
    async fn list_tree(&self, repo: &RepoRef, branch: &str) -> CloudResult<Vec<TreeEntry>>;

    /// Text content of one file; `None` when the path is absent or not a file.
    async fn read_file(&self, repo: &RepoRef, branch: &str, path: &str)
        -> CloudResult<Option<String>>;

    async fn repository_info(&self, repo: &RepoRef) -> CloudResult<RepositoryInfo>;

    /// URL of a gzip tarball of `branch`, downloadable with a scoped token.
    fn tarball_url(&self, repo: &RepoRef, branch: &str) -> String;
}

pub const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub REST client.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> CloudResult<Self> {
        Self::with_base_url(GITHUB_API_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: Option<String>) -> CloudResult<Self> {
        Ok(GitHubClient {
            http: http::build_client()?,
            base_url: base_url.to_string(),
            token,
        })
    }

    /// Client authenticated from `GITHUB_TOKEN`, anonymous if unset.
    pub fn from_env() -> CloudResult<Self> {
        Self::new(std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .get(http::join(&self.base_url, path))
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[derive(Deserialize)]
struct GitTree {
    tree: Vec<GitTreeNode>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct GitTreeNode {
    path: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct RepoResponse {
    full_name: String,
    #[serde(default)]
    private: bool,
    default_branch: String,
    #[serde(default)]
    language: Option<String>,
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn list_tree(&self, repo: &RepoRef, branch: &str) -> CloudResult<Vec<TreeEntry>> {
        let operation = format!("list tree of {}@{}", repo, branch);
        let response = http::send(&operation, self.get(&tree_path(repo, branch))).await?;
        let tree: GitTree = http::read_json(&operation, response).await?;
        if tree.truncated {
            info!(repo = %repo, "tree listing truncated by host");
        }

        Ok(tree
            .tree
            .into_iter()
            .map(|node| TreeEntry {
                kind: match node.node_type.as_str() {
                    "blob" => EntryKind::File,
                    "tree" => EntryKind::Directory,
                    _ => EntryKind::Other,
                },
                path: node.path,
                size: node.size,
            })
            .collect())
    }

    async fn read_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
    ) -> CloudResult<Option<String>> {
        let operation = format!("read {}", path);
        let request = self.get(&contents_path(repo, branch, path));
        let response = http::send(&operation, request).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        // Directories come back as JSON arrays.
        let body: serde_json::Value = http::read_json(&operation, response).await?;
        if !body.is_object() {
            return Ok(None);
        }
        let content: ContentResponse =
            serde_json::from_value(body).map_err(|e| CloudError::decode(&operation, e))?;

        match (content.content, content.encoding.as_deref()) {
            (Some(encoded), Some("base64")) => {
                let compact: String = encoded.split_whitespace().collect();
                let bytes = STANDARD
                    .decode(compact)
                    .map_err(|e| CloudError::decode(&operation, e))?;
                debug!(path, bytes = bytes.len(), "fetched file");
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            (Some(raw), _) => Ok(Some(raw)),
            (None, _) => Ok(None),
        }
    }

    async fn repository_info(&self, repo: &RepoRef) -> CloudResult<RepositoryInfo> {
        let operation = format!("get repository {}", repo);
        let response = http::send(&operation, self.get(&repo_path(repo))).await?;
        let info: RepoResponse = http::read_json(&operation, response).await?;
        Ok(RepositoryInfo {
            full_name: info.full_name,
            private: info.private,
            default_branch: info.default_branch,
            language: info.language,
        })
    }

    fn tarball_url(&self, repo: &RepoRef, branch: &str) -> String {
        http::join(
            &self.base_url,
            &format!("{}/tarball/{}", repo_path(repo), encode_path(branch)),
        )
    }
}

fn repo_path(repo: &RepoRef) -> String {
    format!(
        "repos/{}/{}",
        urlencoding::encode(&repo.owner),
        urlencoding::encode(&repo.name)
    )
}

/// The branch is one path segment, so a `/` inside it is encoded.
fn tree_path(repo: &RepoRef, branch: &str) -> String {
    format!(
        "{}/git/trees/{}?recursive=1",
        repo_path(repo),
        urlencoding::encode(branch)
    )
}

fn contents_path(repo: &RepoRef, branch: &str, path: &str) -> String {
    format!(
        "{}/contents/{}?ref={}",
        repo_path(repo),
        encode_path(path),
        urlencoding::encode(branch)
    )
}

/// Percent-encode each segment of a slash-separated path, keeping the slashes.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_url() {
        let repo = RepoRef::parse("https://github.com/acme/weather-mcp").unwrap();
        assert_eq!(repo, RepoRef::new("acme", "weather-mcp"));
    }

    #[test]
    fn test_parse_strips_git_suffix_and_subpaths() {
        let repo = RepoRef::parse("https://github.com/acme/weather-mcp.git").unwrap();
        assert_eq!(repo.name, "weather-mcp");

        let repo = RepoRef::parse("https://github.com/acme/weather-mcp/tree/main/src").unwrap();
        assert_eq!(repo.full_name(), "acme/weather-mcp");
    }

    #[test]
    fn test_parse_ssh_and_short_forms() {
        assert_eq!(
            RepoRef::parse("git@github.com:acme/tools.git"),
            Some(RepoRef::new("acme", "tools"))
        );
        assert_eq!(RepoRef::parse("acme/tools"), Some(RepoRef::new("acme", "tools")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RepoRef::parse("not-a-repo").is_none());
        assert!(RepoRef::parse("https://gitlab.com/acme/tools").is_none());
        assert!(RepoRef::parse("a/b/c").is_none());
        assert!(RepoRef::parse("/tools").is_none());
    }

    #[test]
    fn test_tarball_url() {
        let client = GitHubClient::with_base_url("https://api.github.test/", None).unwrap();
        assert_eq!(
            client.tarball_url(&RepoRef::new("acme", "tools"), "main"),
            "https://api.github.test/repos/acme/tools/tarball/main"
        );
        assert_eq!(
            client.tarball_url(&RepoRef::new("acme", "tools"), "feature/dark mode"),
            "https://api.github.test/repos/acme/tools/tarball/feature/dark%20mode"
        );
    }

    #[test]
    fn test_branch_and_path_are_percent_encoded() {
        let repo = RepoRef::new("acme", "tools");
        assert_eq!(
            tree_path(&repo, "feature/x"),
            "repos/acme/tools/git/trees/feature%2Fx?recursive=1"
        );
        assert_eq!(
            contents_path(&repo, "fix&ref=main", "docs/my notes#1.md"),
            "repos/acme/tools/contents/docs/my%20notes%231.md?ref=fix%26ref%3Dmain"
        );
        assert_eq!(
            contents_path(&repo, "main", "src/index.ts"),
            "repos/acme/tools/contents/src/index.ts?ref=main"
        );
    }
}
