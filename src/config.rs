//! config.rs
//!
//! Explicit configuration for the remote search service and the chat model.
//! Values come from the process environment (a `.env` file is loaded first by
//! `main`). Nothing here is global: the structs are built once and handed to
//! the clients that need them.

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_VERSION: &str = "2023-11-01";
pub const DEFAULT_LLM_API_VERSION: &str = "2024-06-01";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection settings for the hosted search service.
#[derive(Clone)]
pub struct SearchConfig {
    /// e.g. https://my-service.search.windows.net (no trailing slash)
    pub endpoint: String,
    pub api_key: String,
    pub index_name: String,
    pub api_version: String,
    /// Per-request timeout applied to every call.
    pub timeout: Duration,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("index_name", &self.index_name)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SearchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = required(&lookup, "SEARCH_SERVICE_ENDPOINT")?;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "SEARCH_SERVICE_ENDPOINT",
                value: endpoint,
                reason: "must start with http:// or https://".into(),
            });
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: required(&lookup, "SEARCH_API_KEY")?,
            index_name: required(&lookup, "SEARCH_INDEX_NAME")?,
            api_version: optional(&lookup, "SEARCH_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            timeout: timeout_secs(&lookup, "SEARCH_TIMEOUT_SECS")?,
        })
    }
}

/// Which chat-completion flavour the endpoint speaks.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmFlavor {
    /// `{endpoint}/chat/completions` with a bearer token.
    OpenAi,
    /// `{endpoint}/openai/deployments/{model}/chat/completions?api-version=..`
    /// with an `api-key` header.
    Azure { api_version: String },
}

#[derive(Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Model name, or deployment name for Azure endpoints.
    pub model: String,
    pub flavor: LlmFlavor,
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("flavor", &self.flavor)
            .finish()
    }
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = required(&lookup, "LLM_ENDPOINT")?
            .trim_end_matches('/')
            .to_string();
        // An explicit api-version means an Azure OpenAI resource.
        let flavor = match optional(&lookup, "LLM_API_VERSION") {
            Some(api_version) => LlmFlavor::Azure { api_version },
            None if endpoint.contains(".openai.azure.com") => LlmFlavor::Azure {
                api_version: DEFAULT_LLM_API_VERSION.to_string(),
            },
            None => LlmFlavor::OpenAi,
        };

        Ok(Self {
            endpoint,
            api_key: required(&lookup, "LLM_API_KEY")?,
            model: required(&lookup, "LLM_MODEL")?,
            flavor,
            timeout: timeout_secs(&lookup, "LLM_TIMEOUT_SECS")?,
        })
    }
}

fn optional<F>(lookup: &F, key: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or(ConfigError::Missing(key))
}

fn timeout_secs<F>(lookup: &F, key: &'static str) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, key) {
        None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::Invalid {
                key,
                value: raw,
                reason: "expected a positive number of seconds".into(),
            }),
            Ok(secs) => Ok(Duration::from_secs(secs)),
        },
    }
}
