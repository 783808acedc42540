#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chatgate_core::{Interceptor, InterceptorError};
use serde::Deserialize;

pub mod chat;
pub mod log;
pub mod metrics;
pub mod mock;
pub mod model_map;

pub use chat::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, Usage};
pub use log::LogInterceptor;
pub use metrics::MetricsInterceptor;
pub use mock::{MockInterceptor, MockMode};
pub use model_map::ModelMapInterceptor;

/// Built-in interceptor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptorKind {
    Log,
    ModelMap,
    Mock,
    Metrics,
}

impl InterceptorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::ModelMap => "model_map",
            Self::Mock => "mock",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for InterceptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterceptorKind {
    type Err = InterceptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "model_map" => Ok(Self::ModelMap),
            "mock" => Ok(Self::Mock),
            "metrics" => Ok(Self::Metrics),
            other => Err(InterceptorError::Config(format!(
                "unknown interceptor kind '{other}'"
            ))),
        }
    }
}

/// One entry of a configuration file's `interceptors` list.
///
/// `kind` stays a string so one unknown entry does not reject the whole
/// file; it is checked in [`InterceptorSpec::build`].
#[derive(Debug, Clone, Deserialize)]
pub struct InterceptorSpec {
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl InterceptorSpec {
    /// Resolve the kind, then build and configure the interceptor.
    pub fn build(&self) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        build_interceptor(self.kind.parse()?, &self.options)
    }
}

/// Construct and configure a built-in interceptor.
pub fn build_interceptor(
    kind: InterceptorKind,
    options: &serde_json::Value,
) -> Result<Arc<dyn Interceptor>, InterceptorError> {
    fn configured<I: Interceptor + 'static>(
        mut interceptor: I,
        options: &serde_json::Value,
    ) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        interceptor.configure(options)?;
        Ok(Arc::new(interceptor))
    }

    match kind {
        InterceptorKind::Log => configured(LogInterceptor::new(), options),
        InterceptorKind::ModelMap => configured(ModelMapInterceptor::new(), options),
        InterceptorKind::Mock => configured(MockInterceptor::new(), options),
        InterceptorKind::Metrics => configured(MetricsInterceptor::new(), options),
    }
}
