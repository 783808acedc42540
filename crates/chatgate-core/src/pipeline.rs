//! Interceptor registry and pipeline execution.
//!
//! The registry is owned by a gateway instance and shared with every request
//! handler. Pipeline runs take the read lock, so any number of requests run
//! their hooks concurrently; registration takes the write lock and may happen
//! while the gateway is serving.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::interceptor::{
    DirectResponse, InterceptedRequest, InterceptedResponse, Interceptor, InterceptorError,
};

/// Outcome of the before-forward phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the (possibly mutated) request to the upstream.
    Continue,
    /// Answer with this payload; the upstream is not contacted.
    DirectResponse(DirectResponse),
}

/// A before-forward hook failed; the request is not forwarded.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct PipelineError {
    /// Name of the interceptor that failed.
    pub interceptor: String,
    #[source]
    pub source: InterceptorError,
}

/// Ordered, append-only list of interceptors.
#[derive(Debug, Default)]
pub struct InterceptorRegistry {
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated in the given order.
    #[must_use]
    pub fn with_interceptors(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: RwLock::new(interceptors),
        }
    }

    /// Append an interceptor. It runs after every interceptor registered before it.
    pub async fn register(&self, interceptor: Arc<dyn Interceptor>) {
        debug!(interceptor = interceptor.name(), "Registering interceptor");
        self.interceptors.write().await.push(interceptor);
    }

    pub async fn len(&self) -> usize {
        self.interceptors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.interceptors.read().await.is_empty()
    }

    /// Names in execution order.
    pub async fn names(&self) -> Vec<String> {
        self.interceptors
            .read()
            .await
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Run every before-forward hook in registration order.
    ///
    /// Stops at the first hook that fails or attaches a direct response.
    pub async fn run_before_forward(
        &self,
        request: &mut InterceptedRequest,
    ) -> Result<Decision, PipelineError> {
        let interceptors = self.interceptors.read().await;
        for interceptor in interceptors.iter() {
            interceptor
                .before_forward(request)
                .await
                .map_err(|source| PipelineError {
                    interceptor: interceptor.name().to_string(),
                    source,
                })?;

            if let Some(direct) = request.take_direct_response() {
                debug!(
                    interceptor = interceptor.name(),
                    status = %direct.status,
                    "Interceptor supplied a direct response"
                );
                return Ok(Decision::DirectResponse(direct));
            }
        }
        Ok(Decision::Continue)
    }

    /// Run every after-response hook in registration order.
    ///
    /// Failures are logged and skipped; the response status is already decided.
    pub async fn run_after_response(
        &self,
        request: &InterceptedRequest,
        response: &mut InterceptedResponse,
    ) {
        let interceptors = self.interceptors.read().await;
        for interceptor in interceptors.iter() {
            if let Err(e) = interceptor.after_response(request, response).await {
                warn!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "After-response hook failed"
                );
            }
        }
    }
}
