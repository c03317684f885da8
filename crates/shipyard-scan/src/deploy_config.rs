//! Deployment config files (`sigyl.yaml`, `mcp.yaml`, `smithery.yaml`).
//!
//! The file is loosely shaped YAML; [`DeployConfig::parse`] turns it into a
//! typed value with the runtime resolved to at most one build strategy.
//! Every setting is read on its own: a value of the wrong type or an unknown
//! runtime drops only that setting, never the security or OAuth sections.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use tracing::warn;

/// Recognized config file names, in lookup order.
pub const CONFIG_FILE_NAMES: &[&str] = &["sigyl.yaml", "sigyl.yml", "mcp.yaml", "smithery.yaml"];

pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_BUILD_PATH: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
}

/// How the image gets built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Runtime {
    /// A container definition is synthesized for a Node project.
    Managed {
        language: Language,
        entry_point: Option<String>,
        build_command: Option<String>,
    },
    /// The repository ships its own container definition.
    Custom { dockerfile: String, build_path: String },
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::Managed {
            language: Language::JavaScript,
            entry_point: None,
            build_command: None,
        }
    }
}

impl Runtime {
    pub fn is_custom(&self) -> bool {
        matches!(self, Runtime::Custom { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(deserialize_with = "lenient_flag")]
    pub secure: Option<bool>,
    #[serde(deserialize_with = "lenient_flag")]
    pub http_only: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub same_site: Option<SameSite>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    #[serde(deserialize_with = "lenient_flag")]
    pub require_token_validation: Option<bool>,
    #[serde(deserialize_with = "lenient_flag")]
    pub allow_token_passthrough: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub session_config: Option<SessionConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientIdType {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OAuthConfig {
    #[serde(deserialize_with = "lenient")]
    pub client_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub client_id_type: Option<ClientIdType>,
    #[serde(deserialize_with = "lenient_list")]
    pub redirect_uris: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub scopes: Vec<String>,
}

/// A parsed deployment config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Path of the file this was read from.
    pub source_file: String,
    pub name: Option<String>,
    /// `None` when the file names a runtime this tool cannot build.
    pub runtime: Option<Runtime>,
    pub env: BTreeMap<String, String>,
    pub security: Option<SecurityConfig>,
    pub oauth: Option<OAuthConfig>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawBuild {
    #[serde(deserialize_with = "lenient")]
    command: Option<String>,
    #[serde(deserialize_with = "lenient")]
    dockerfile: Option<String>,
    #[serde(deserialize_with = "lenient")]
    docker_build_path: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
    #[serde(deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    runtime: Option<String>,
    #[serde(deserialize_with = "lenient")]
    language: Option<Language>,
    #[serde(deserialize_with = "lenient")]
    entry_point: Option<String>,
    #[serde(deserialize_with = "lenient")]
    build: Option<RawBuild>,
    #[serde(deserialize_with = "lenient")]
    env: Option<BTreeMap<String, Value>>,
    #[serde(deserialize_with = "lenient")]
    security: Option<SecurityConfig>,
    #[serde(deserialize_with = "lenient")]
    oauth: Option<OAuthConfig>,
}

/// Any value of the wrong shape becomes `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_yaml::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            warn!(error = %err, "ignoring malformed deployment config setting");
            Ok(None)
        }
    }
}

/// Booleans, also spelled as `"true"`, `"yes"`, `"off"` and the like.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let flag = match &value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => Some(true),
            "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    };
    if flag.is_none() && !value.is_null() {
        warn!(value = ?value, "ignoring non-boolean deployment config flag");
    }
    Ok(flag)
}

/// A list of strings, or a single string standing for a one-element list.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Sequence(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        other => {
            warn!(value = ?other, "ignoring malformed deployment config list");
            Vec::new()
        }
    })
}

impl DeployConfig {
    /// Parse `content`. Only YAML that is not a mapping at all yields `None`;
    /// malformed settings inside it are dropped one by one.
    pub fn parse(source_file: &str, content: &str) -> Option<Self> {
        match serde_yaml::from_str::<RawConfig>(content) {
            Ok(raw) => Some(Self::from_raw(source_file, raw)),
            Err(err) => {
                warn!(file = source_file, error = %err, "could not parse deployment config");
                None
            }
        }
    }

    fn from_raw(source_file: &str, raw: RawConfig) -> Self {
        let build = raw.build.unwrap_or_default();

        let runtime = match raw.runtime.as_deref() {
            None | Some("node") | Some("javascript") | Some("typescript") => {
                let language = raw.language.unwrap_or(match raw.runtime.as_deref() {
                    Some("typescript") => Language::TypeScript,
                    _ => Language::JavaScript,
                });
                Some(Runtime::Managed {
                    language,
                    entry_point: raw.entry_point,
                    build_command: build.command,
                })
            }
            Some("container") => Some(Runtime::Custom {
                dockerfile: build.dockerfile.unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string()),
                build_path: build
                    .docker_build_path
                    .unwrap_or_else(|| DEFAULT_BUILD_PATH.to_string()),
            }),
            Some(other) => {
                warn!(file = source_file, runtime = other, "unknown runtime in deployment config");
                None
            }
        };

        let env = raw
            .env
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key, v)))
            .collect();

        DeployConfig {
            source_file: source_file.to_string(),
            name: raw.name,
            runtime,
            env,
            security: raw.security,
            oauth: raw.oauth,
        }
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whether `path` is a root-level deployment config file.
pub fn is_config_file(path: &str) -> bool {
    CONFIG_FILE_NAMES.contains(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_defaults_to_managed() {
        let cfg = DeployConfig::parse("sigyl.yaml", "name: weather\n").unwrap();
        assert_eq!(cfg.runtime, Some(Runtime::default()));
        assert_eq!(cfg.name.as_deref(), Some("weather"));
    }

    #[test]
    fn test_typescript_runtime() {
        let cfg = DeployConfig::parse(
            "mcp.yaml",
            "runtime: typescript\nentryPoint: dist/index.js\nbuild:\n  command: npm run compile\n",
        )
        .unwrap();
        assert_eq!(
            cfg.runtime,
            Some(Runtime::Managed {
                language: Language::TypeScript,
                entry_point: Some("dist/index.js".into()),
                build_command: Some("npm run compile".into()),
            })
        );
    }

    #[test]
    fn test_container_runtime_with_paths() {
        let cfg = DeployConfig::parse(
            "sigyl.yaml",
            "runtime: container\nbuild:\n  dockerfile: docker/Dockerfile.prod\n  dockerBuildPath: server\n",
        )
        .unwrap();
        assert_eq!(
            cfg.runtime,
            Some(Runtime::Custom {
                dockerfile: "docker/Dockerfile.prod".into(),
                build_path: "server".into(),
            })
        );
        let bare = DeployConfig::parse("sigyl.yaml", "runtime: container\n").unwrap();
        assert_eq!(
            bare.runtime,
            Some(Runtime::Custom {
                dockerfile: "Dockerfile".into(),
                build_path: ".".into(),
            })
        );
    }

    #[test]
    fn test_security_and_oauth_blocks() {
        let cfg = DeployConfig::parse(
            "smithery.yaml",
            "\
security:
  allowTokenPassthrough: true
  sessionConfig:
    secure: false
    sameSite: none
oauth:
  clientIdType: static
  redirectUris: [https://a.example/cb, https://b.example/cb]
env:
  LOG_LEVEL: info
  RETRIES: 3
  VERBOSE: true
",
        )
        .unwrap();
        let security = cfg.security.unwrap();
        assert_eq!(security.allow_token_passthrough, Some(true));
        let session = security.session_config.unwrap();
        assert_eq!(session.secure, Some(false));
        assert_eq!(session.same_site, Some(SameSite::None));
        let oauth = cfg.oauth.unwrap();
        assert_eq!(oauth.client_id_type, Some(ClientIdType::Static));
        assert_eq!(oauth.redirect_uris.len(), 2);
        assert_eq!(cfg.env.get("RETRIES").map(String::as_str), Some("3"));
        assert_eq!(cfg.env.get("VERBOSE").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_unparseable_yaml_degrades_to_none() {
        assert!(DeployConfig::parse("sigyl.yaml", "runtime: [unterminated").is_none());
        assert!(DeployConfig::parse("sigyl.yaml", "- just\n- a list\n").is_none());
    }

    #[test]
    fn test_unknown_runtime_keeps_security_section() {
        let cfg = DeployConfig::parse(
            "sigyl.yaml",
            "runtime: python\nsecurity:\n  allowTokenPassthrough: true\n",
        )
        .unwrap();
        assert_eq!(cfg.runtime, None);
        assert_eq!(cfg.security.unwrap().allow_token_passthrough, Some(true));
    }

    #[test]
    fn test_mistyped_settings_are_dropped_individually() {
        let cfg = DeployConfig::parse(
            "sigyl.yaml",
            "\
runtime: node
language: cobol
security:
  allowTokenPassthrough: \"yes\"
  requireTokenValidation: maybe
  sessionConfig: insecure
oauth:
  clientIdType: static
  redirectUris: https://a.example/cb
env: not-a-map
",
        )
        .unwrap();
        assert_eq!(cfg.runtime, Some(Runtime::default()));
        let security = cfg.security.unwrap();
        assert_eq!(security.allow_token_passthrough, Some(true));
        assert_eq!(security.require_token_validation, None);
        assert_eq!(security.session_config, None);
        let oauth = cfg.oauth.unwrap();
        assert_eq!(oauth.client_id_type, Some(ClientIdType::Static));
        assert_eq!(oauth.redirect_uris, vec!["https://a.example/cb".to_string()]);
        assert!(cfg.env.is_empty());
    }

    #[test]
    fn test_config_file_names() {
        assert!(is_config_file("sigyl.yaml"));
        assert!(is_config_file("smithery.yaml"));
        assert!(!is_config_file("deploy/mcp.yaml"));
    }
}
