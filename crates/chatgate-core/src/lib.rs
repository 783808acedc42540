#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

pub mod config;
pub mod interceptor;
pub mod model;
pub mod pipeline;

// Re-export commonly used types for convenience
pub use config::{ConfigError, GatewayConfig, UpstreamPreset};
pub use interceptor::{
    DirectResponse, InterceptedRequest, InterceptedResponse, Interceptor, InterceptorError,
    ResponseBody,
};
pub use model::{ModelDescriptor, ModelList, default_models};
pub use pipeline::{Decision, InterceptorRegistry, PipelineError};
