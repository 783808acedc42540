//! Gateway configuration.
//!
//! `GatewayConfig` is built once at startup (by the CLI or an embedding
//! application) and then shared read-only by every request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::ModelDescriptor;

/// Default listen address when none is configured.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8899";

/// Header name used for the fallback credential in [`GatewayConfig::headers`].
const AUTHORIZATION: &str = "authorization";

/// Errors raised while building or validating a [`GatewayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The upstream URL could not be parsed.
    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidUpstream { url: String, reason: String },

    /// The upstream URL uses a scheme other than http or https.
    #[error("Unsupported upstream scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    /// The path prefix is malformed.
    #[error("Invalid path prefix '{0}': must start with '/' and must not end with '/'")]
    InvalidPrefix(String),
}

/// Known upstream providers speaking the chat-completion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamPreset {
    /// Volcengine Ark.
    VolcEngine,
    /// Tencent Cloud LKEAP.
    TencentCloud,
}

impl UpstreamPreset {
    /// Base URL of the provider's API.
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::VolcEngine => "https://ark.cn-beijing.volces.com/api/v3",
            Self::TencentCloud => "https://api.lkeap.cloud.tencent.com/api/v1",
        }
    }
}

/// Process-wide gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the standalone server binds to (e.g. `0.0.0.0:8899`).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL of the single upstream service, including its base path.
    pub upstream_url: Url,
    /// Optional prefix every inbound path must carry; stripped before routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Default headers. `Authorization` here is the fallback credential.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Models advertised on `/v1/models`.
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl GatewayConfig {
    /// Create a config pointing at `upstream_url` with default settings.
    pub fn new(upstream_url: &str) -> Result<Self, ConfigError> {
        let config = Self {
            listen_addr: default_listen_addr(),
            upstream_url: parse_upstream(upstream_url)?,
            path_prefix: None,
            headers: HashMap::new(),
            models: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a config for a known provider.
    pub fn for_preset(preset: UpstreamPreset) -> Result<Self, ConfigError> {
        Self::new(preset.base_url())
    }

    /// Set the listen address.
    #[must_use]
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the path prefix. An empty prefix clears it.
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        self.path_prefix = if prefix.is_empty() { None } else { Some(prefix) };
        self.validate()?;
        Ok(self)
    }

    /// Add a default header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the fallback credential as `Authorization: Bearer <token>`.
    #[must_use]
    pub fn with_bearer_token(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    /// Set the advertised model list.
    #[must_use]
    pub fn with_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models = models;
        self
    }

    /// Check the invariants the gateway relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.upstream_url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if self.upstream_url.host_str().is_none() {
            return Err(ConfigError::InvalidUpstream {
                url: self.upstream_url.to_string(),
                reason: "missing host".to_string(),
            });
        }
        if let Some(prefix) = self.path_prefix()
            && (!prefix.starts_with('/') || prefix.ends_with('/'))
        {
            return Err(ConfigError::InvalidPrefix(prefix.to_string()));
        }
        Ok(())
    }

    /// The configured prefix, if set and non-empty.
    pub fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref().filter(|p| !p.is_empty())
    }

    /// The fallback `Authorization` value, if configured and non-empty.
    pub fn default_authorization(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(AUTHORIZATION))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Default headers other than `Authorization`.
    pub fn extra_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

fn parse_upstream(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUpstream {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
