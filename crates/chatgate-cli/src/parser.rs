//! Command-line interface definition.

use std::path::PathBuf;

use chatgate_core::UpstreamPreset;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

/// Chat-completion API gateway.
///
/// Values given here override the configuration file.
#[derive(Debug, Parser)]
#[command(name = "chatgate")]
#[command(about = "Chat-completion API gateway with an interceptor pipeline")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short = 'c', long = "config", env = "CHATGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g. 0.0.0.0:8899)
    #[arg(short = 'l', long = "listen")]
    pub listen: Option<String>,

    /// Upstream base URL, including its API base path
    #[arg(short = 'u', long = "upstream", conflicts_with = "preset")]
    pub upstream: Option<String>,

    /// Known upstream provider
    #[arg(long = "preset", value_enum)]
    pub preset: Option<Preset>,

    /// Path prefix every inbound request must carry
    #[arg(long = "prefix")]
    pub prefix: Option<String>,

    /// Fallback API key sent as a bearer token
    #[arg(long = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Upstream presets selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Volcengine,
    Tencent,
}

impl From<Preset> for UpstreamPreset {
    fn from(preset: Preset) -> Self {
        match preset {
            Preset::Volcengine => Self::VolcEngine,
            Preset::Tencent => Self::TencentCloud,
        }
    }
}
