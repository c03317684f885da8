//! Access tokens for remote API calls.
//!
//! [`TokenCache`] keeps one bearer token for a short window and makes sure
//! only one credential exchange is in flight: concurrent callers await the
//! same pending fetch instead of starting their own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CloudError;
use crate::http;
use crate::CloudResult;

/// Default lifetime of a cached token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30);

/// Anything that can mint a bearer token for the cloud APIs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> CloudResult<String>;
}

/// A fixed token, typically injected through the environment.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self) -> CloudResult<String> {
        if self.token.trim().is_empty() {
            return Err(CloudError::Auth("static access token is empty".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Token from the instance metadata server (workloads running on the platform).
pub struct MetadataServerTokenSource {
    http: reqwest::Client,
    url: String,
}

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

impl MetadataServerTokenSource {
    pub fn new() -> CloudResult<Self> {
        Self::with_url(METADATA_TOKEN_URL)
    }

    pub fn with_url(url: &str) -> CloudResult<Self> {
        Ok(Self {
            http: http::build_client()?,
            url: url.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[async_trait]
impl TokenSource for MetadataServerTokenSource {
    async fn fetch_token(&self) -> CloudResult<String> {
        let request = self.http.get(&self.url).header("Metadata-Flavor", "Google");
        let response = http::send("metadata token", request)
            .await
            .map_err(|e| CloudError::Auth(e.to_string()))?;
        let token: MetadataToken = http::read_json("metadata token", response)
            .await
            .map_err(|e| CloudError::Auth(e.to_string()))?;
        Ok(token.access_token)
    }
}

/// Token printed by the locally installed `gcloud` CLI.
#[derive(Debug, Default, Clone)]
pub struct GcloudCliTokenSource;

#[async_trait]
impl TokenSource for GcloudCliTokenSource {
    async fn fetch_token(&self) -> CloudResult<String> {
        let output = Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| CloudError::Auth(format!("could not run gcloud: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("gcloud auth print-access-token failed: {}", stderr.trim());
            return Err(CloudError::Auth(stderr.trim().to_string()));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(CloudError::Auth("gcloud printed an empty token".to_string()));
        }
        Ok(token)
    }
}

/// Tries each source in order and returns the first token obtained.
pub struct ChainedTokenSource {
    sources: Vec<Arc<dyn TokenSource>>,
}

impl ChainedTokenSource {
    pub fn new(sources: Vec<Arc<dyn TokenSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl TokenSource for ChainedTokenSource {
    async fn fetch_token(&self) -> CloudResult<String> {
        let mut last_error = CloudError::Auth("no token source configured".to_string());
        for source in &self.sources {
            match source.fetch_token().await {
                Ok(token) => return Ok(token),
                Err(err) => {
                    debug!(error = %err, "token source unavailable, trying next");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}

type PendingFetch = Shared<BoxFuture<'static, CloudResult<String>>>;

enum Slot {
    Empty,
    Cached { token: String, expires_at: Instant },
    Fetching { generation: u64, fetch: PendingFetch },
}

struct CacheState {
    slot: Slot,
    generation: u64,
}

/// Short-lived token cache with a single-flight guard.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self::with_ttl(source, DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(source: Arc<dyn TokenSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Mutex::new(CacheState {
                slot: Slot::Empty,
                generation: 0,
            }),
        }
    }

    /// Return a valid token, fetching one if the cached token expired.
    pub async fn token(&self) -> CloudResult<String> {
        let (generation, fetch) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &state.slot {
                Slot::Cached { token, expires_at } if Instant::now() < *expires_at => {
                    return Ok(token.clone());
                }
                Slot::Fetching { generation, fetch } => (*generation, fetch.clone()),
                _ => {
                    state.generation += 1;
                    let generation = state.generation;
                    let source = Arc::clone(&self.source);
                    let fetch = async move { source.fetch_token().await }.boxed().shared();
                    state.slot = Slot::Fetching {
                        generation,
                        fetch: fetch.clone(),
                    };
                    debug!(generation, "fetching access token");
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let still_current = matches!(
            &state.slot,
            Slot::Fetching { generation: g, .. } if *g == generation
        );
        if still_current {
            state.slot = match &result {
                Ok(token) => Slot::Cached {
                    token: token.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
                Err(_) => Slot::Empty,
            };
        }
        result
    }

    /// Drop the cached token so the next call fetches a fresh one.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(state.slot, Slot::Cached { .. }) {
            state.slot = Slot::Empty;
        }
    }
}
