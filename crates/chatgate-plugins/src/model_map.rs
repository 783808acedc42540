//! Model identifier rewriting.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chatgate_core::{InterceptedRequest, Interceptor, InterceptorError};
use serde::Deserialize;
use tracing::info;

const CHAT_COMPLETIONS: &str = "/chat/completions";

#[derive(Debug, Default, Deserialize)]
struct ModelMapOptions {
    #[serde(default)]
    mappings: HashMap<String, String>,
}

/// Rewrites the `model` field of chat-completion requests.
///
/// Mappings can be added while the gateway is serving.
#[derive(Debug, Default)]
pub struct ModelMapInterceptor {
    mappings: RwLock<HashMap<String, String>>,
}

impl ModelMapInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map requests for `from` to `to`. Replaces any previous mapping for `from`.
    pub fn add_mapping(&self, from: impl Into<String>, to: impl Into<String>) {
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(from.into(), to.into());
    }

    pub fn mapping(&self, from: &str) -> Option<String> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(from)
            .cloned()
    }
}

#[async_trait]
impl Interceptor for ModelMapInterceptor {
    fn name(&self) -> &str {
        "model_map"
    }

    /// Options: `{"mappings": {"from": "to"}}`, merged into existing mappings.
    fn configure(&mut self, options: &serde_json::Value) -> Result<(), InterceptorError> {
        if options.is_null() {
            return Ok(());
        }
        let opts: ModelMapOptions = serde_json::from_value(options.clone())
            .map_err(|e| InterceptorError::Config(e.to_string()))?;
        for (from, to) in opts.mappings {
            self.add_mapping(from, to);
        }
        Ok(())
    }

    async fn before_forward(

        &self,

        request: &mut InterceptedRequest,

    ) -> Result<(), InterceptorError> {
        if !request.path().contains(CHAT_COMPLETIONS) {
            return Ok(());
        }

        let mut body: serde_json::Map<String, serde_json::Value> = request.json()?;
        let Some(model) = body.get("model").and_then(serde_json::Value::as_str) else {
            return Ok(());
        };
        let Some(mapped) = self.mapping(model) else {
            return Ok(());
        };

        info!(from = %model, to = %mapped, "Mapping model");
        body.insert("model".to_string(), serde_json::Value::String(mapped));
        request.set_body(serde_json::to_vec(&body)?);
        Ok(())
    }
}
