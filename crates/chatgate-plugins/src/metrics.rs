//! In-process request and status counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chatgate_core::{InterceptedRequest, InterceptedResponse, Interceptor, InterceptorError};
use tracing::info;

/// Counts requests per `METHOD path` and responses per `status_<code>`.
#[derive(Debug, Default)]
pub struct MetricsInterceptor {
    counts: Mutex<HashMap<String, u64>>,
}

impl MetricsInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn increment(&self, key: String) -> u64 {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// All counters, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn before_forward(

        &self,

        request: &mut InterceptedRequest,

    ) -> Result<(), InterceptorError> {
        let key = format!("{} {}", request.method(), request.path());
        let count = self.increment(key.clone());
        info!(key = %key, count, "Request count");
        Ok(())
    }

    async fn after_response(
        &self,
        _request: &InterceptedRequest,
        response: &mut InterceptedResponse,
    ) -> Result<(), InterceptorError> {
        let key = format!("status_{}", response.status.as_u16());
        let count = self.increment(key.clone());
        info!(key = %key, count, "Response count");
        Ok(())
    }
}
