//! CLI bootstrap: the composition root.
//!
//! Merges the configuration file with command-line flags, then builds the
//! interceptor registry and the gateway from the result.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chatgate_core::{GatewayConfig, InterceptorRegistry, ModelDescriptor, UpstreamPreset};
use chatgate_plugins::InterceptorSpec;
use chatgate_proxy::Gateway;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::CliError;
use crate::parser::{Cli, Preset};

/// Contents of a `--config` file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub listen_addr: Option<String>,
    pub upstream_url: Option<String>,
    pub preset: Option<Preset>,
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    #[serde(default)]
    pub interceptors: Vec<InterceptorSpec>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = serde_json::from_str(&raw).map_err(|e| CliError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(file)
    }
}

/// Fully resolved startup settings.
#[derive(Debug)]
pub struct Settings {
    pub config: GatewayConfig,
    pub interceptors: Vec<InterceptorSpec>,
}

/// Merge `file` with `cli`; flags win.
///
/// Upstream precedence: `--upstream`, `--preset`, then the file's
/// `upstream_url` and `preset`, falling back to VolcEngine.
pub fn resolve(cli: &Cli, file: ConfigFile) -> Result<Settings, CliError> {
    let upstream = match (&cli.upstream, cli.preset, file.upstream_url, file.preset) {
        (Some(url), _, _, _) => url.clone(),
        (None, Some(preset), _, _) => UpstreamPreset::from(preset).base_url().to_string(),
        (None, None, Some(url), _) => url,
        (None, None, None, Some(preset)) => UpstreamPreset::from(preset).base_url().to_string(),
        (None, None, None, None) => UpstreamPreset::VolcEngine.base_url().to_string(),
    };

    let mut config = GatewayConfig::new(&upstream)?;
    if let Some(listen) = cli.listen.clone().or(file.listen_addr) {
        config = config.with_listen_addr(listen);
    }
    if let Some(prefix) = cli.prefix.clone().or(file.path_prefix) {
        config = config.with_path_prefix(prefix)?;
    }
    for (name, value) in file.headers {
        config = config.with_header(name, value);
    }
    if let Some(key) = cli.api_key.as_deref().filter(|k| !k.is_empty()) {
        config
            .headers
            .retain(|name, _| !name.eq_ignore_ascii_case("authorization"));
        config = config.with_bearer_token(key);
    }
    if !file.models.is_empty() {
        config = config.with_models(file.models);
    }

    Ok(Settings {
        config,
        interceptors: file.interceptors,
    })
}

/// Build the gateway with every configured interceptor registered in order.
///
/// An interceptor of unknown kind, or whose options are rejected, is skipped.
pub async fn build_gateway(settings: Settings) -> Result<Gateway, CliError> {
    let registry = InterceptorRegistry::new();
    for spec in &settings.interceptors {
        match spec.build() {
            Ok(interceptor) => {
                info!(interceptor = %spec.kind, "Registered interceptor");
                registry.register(interceptor).await;
            }
            Err(e) => {
                warn!(interceptor = %spec.kind, error = %e, "Interceptor not registered");
            }
        }
    }
    Ok(Gateway::with_registry(settings.config, Arc::new(registry))?)
}
