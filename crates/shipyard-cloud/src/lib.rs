//! Shipyard Cloud: the remote services a deployment talks to.
//!
//! Layer 0 of the workspace. Every external collaborator is an
//! `async_trait` seam with a reqwest-backed client and an in-memory fake:
//!
//! - [`RepositoryHost`] / [`GitHubClient`]: file listing, file reads, tarballs
//! - [`BuildService`] / [`CloudBuildClient`]: build submission and status
//! - [`HostingPlatform`] / [`CloudRunClient`]: service resources, IAM and logs
//! - [`TokenCache`]: short-lived, single-flight bearer token cache

pub mod auth;
pub mod build_service;
pub mod error;
pub mod fakes;
pub mod hosting;
mod http;
pub mod repo_host;

pub use auth::{
    ChainedTokenSource, GcloudCliTokenSource, MetadataServerTokenSource, StaticTokenSource,
    TokenCache, TokenSource, DEFAULT_TOKEN_TTL,
};
pub use build_service::{
    BuildJob, BuildOptions, BuildService, BuildSpec, BuildStatus, BuildStep, CloudBuildClient,
};
pub use error::CloudError;
pub use hosting::{
    CloudRunClient, HostingPlatform, IamPolicy, LogEntry, ServiceResource, ServiceTarget,
    ALL_USERS, INVOKER_ROLE,
};
pub use repo_host::{EntryKind, GitHubClient, RepoRef, RepositoryHost, RepositoryInfo, TreeEntry};

/// Result type for remote service operations
pub type CloudResult<T> = std::result::Result<T, CloudError>;
