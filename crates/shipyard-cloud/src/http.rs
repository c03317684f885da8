//! Shared request plumbing for the reqwest-backed clients.

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::CloudError;
use crate::CloudResult;

pub(crate) const USER_AGENT: &str = concat!("shipyard/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client() -> CloudResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| CloudError::transport("client setup", &e))
}

/// Send a request, mapping connection failures to [`CloudError::Transport`].
pub(crate) async fn send(operation: &str, request: RequestBuilder) -> CloudResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| CloudError::transport(operation, &e))?;
    debug!(operation, status = response.status().as_u16(), "remote call returned");
    Ok(response)
}

/// Turn a non-2xx response into [`CloudError::Api`] carrying status and body.
pub(crate) async fn ensure_success(operation: &str, response: Response) -> CloudResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CloudError::api(operation, status.as_u16(), body))
}

/// A 404 on a call addressing `resource` becomes [`CloudError::NotFound`].
pub(crate) fn reject_not_found(resource: &str, response: Response) -> CloudResult<Response> {
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(CloudError::NotFound(resource.to_string()));
    }
    Ok(response)
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    operation: &str,
    response: Response,
) -> CloudResult<T> {
    let response = ensure_success(operation, response).await?;
    let text = response
        .text()
        .await
        .map_err(|e| CloudError::transport(operation, &e))?;
    serde_json::from_str(&text).map_err(|e| CloudError::decode(operation, e))
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_normalizes_slashes() {
        assert_eq!(join("https://api.example.com/", "/v1/x"), "https://api.example.com/v1/x");
        assert_eq!(join("https://api.example.com", "v1/x"), "https://api.example.com/v1/x");
    }
}
