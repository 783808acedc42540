//! Request/response logging interceptor.

use async_trait::async_trait;
use chatgate_core::{
    InterceptedRequest, InterceptedResponse, Interceptor, InterceptorError, ResponseBody,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogOptions {
    max_body_len: Option<usize>,
}

/// Logs each forwarded request and the response it got.
#[derive(Debug, Default)]
pub struct LogInterceptor {
    /// Bodies longer than this are truncated in the log line.
    max_body_len: Option<usize>,
}

impl LogInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_body_len(mut self, max: usize) -> Self {
        self.max_body_len = Some(max);
        self
    }

    fn render(&self, body: &[u8]) -> String {
        let text = String::from_utf8_lossy(body);
        match self.max_body_len {
            Some(max) if text.chars().count() > max => {
                let cut: String = text.chars().take(max).collect();
                format!("{cut}... ({} bytes)", body.len())
            }
            _ => text.into_owned(),
        }
    }
}

#[async_trait]
impl Interceptor for LogInterceptor {
    fn name(&self) -> &str {
        "log"
    }

    fn configure(&mut self, options: &serde_json::Value) -> Result<(), InterceptorError> {
        if options.is_null() {
            return Ok(());
        }
        let opts: LogOptions = serde_json::from_value(options.clone())
            .map_err(|e| InterceptorError::Config(e.to_string()))?;
        self.max_body_len = opts.max_body_len;
        Ok(())
    }

    async fn before_forward(

        &self,

        request: &mut InterceptedRequest,

    ) -> Result<(), InterceptorError> {
        let url = match request.query() {
            Some(query) => format!("{}?{query}", request.path()),
            None => request.path().to_string(),
        };
        info!(
            method = %request.method(),
            url = %url,
            body = %self.render(request.body()),
            "[Request]"
        );
        Ok(())
    }

    async fn after_response(
        &self,
        _request: &InterceptedRequest,
        response: &mut InterceptedResponse,
    ) -> Result<(), InterceptorError> {
        let body = match &response.body {
            ResponseBody::Buffered(bytes) => self.render(bytes),
            ResponseBody::Frames(frames) => self.render(&frames.concat()),
            ResponseBody::Streaming => "<streaming>".to_string(),
        };
        info!(status = response.status.as_u16(), body = %body, "[Response]");
        Ok(())
    }
}
