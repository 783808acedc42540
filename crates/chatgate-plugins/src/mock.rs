//! Canned chat-completion answers.
//!
//! Each rule pairs a condition on the parsed request with a response
//! generator. The first matching rule wins. In [`MockMode::Direct`] the
//! answer is returned without contacting the upstream; in
//! [`MockMode::Replace`] the request is forwarded and the upstream response
//! is replaced on the way back.

use std::fmt;

use async_trait::async_trait;
use chatgate_core::interceptor::{APPLICATION_JSON, TEXT_EVENT_STREAM};
use chatgate_core::{
    DirectResponse, InterceptedRequest, InterceptedResponse, Interceptor, InterceptorError,
};
use http::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::chat::{ChatRequest, ChatResponse};

/// Request attribute carrying the serialized replacement response.
pub const MOCK_RESPONSE_ATTR: &str = "mock.response";
/// Request attribute recording whether the replacement should be streamed.
pub const MOCK_STREAM_ATTR: &str = "mock.stream";

const CHAT_COMPLETIONS: &str = "/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_PROMPT: &str = "Testing. Just say hi and nothing else.";
const DEFAULT_REPLY: &str = "Hi";

pub type Condition = Box<dyn Fn(&ChatRequest) -> bool + Send + Sync>;
pub type Generator =
    Box<dyn Fn(&ChatRequest) -> Result<ChatResponse, InterceptorError> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Answer without contacting the upstream.
    #[default]
    Direct,
    /// Forward, then replace the upstream response.
    Replace,
}

pub struct MockRule {
    condition: Condition,
    generator: Generator,
    mode: MockMode,
}

impl fmt::Debug for MockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRule")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Rule as written in configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleOptions {
    model: Option<String>,
    last_message: Option<String>,
    last_message_contains: Option<String>,
    reply: String,
    #[serde(default)]
    mode: MockMode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MockOptions {
    #[serde(default)]
    rules: Vec<RuleOptions>,
}

impl RuleOptions {
    fn into_rule(self, position: usize) -> Result<MockRule, InterceptorError> {
        if self.model.is_none()
            && self.last_message.is_none()
            && self.last_message_contains.is_none()
        {
            return Err(InterceptorError::Config(format!(
                "mock rule {position} has no condition"
            )));
        }

        let Self {
            model,
            last_message,
            last_message_contains,
            reply,
            mode,
        } = self;

        let condition: Condition = Box::new(move |req: &ChatRequest| {
            if model.as_ref().is_some_and(|m| *m != req.model) {
                return false;
            }
            let last = req.last_message().filter(|m| m.role == "user");
            if let Some(expected) = &last_message {
                if last.is_none_or(|m| m.content != *expected) {
                    return false;
                }
            }
            if let Some(needle) = &last_message_contains {
                if last.is_none_or(|m| !m.content.contains(needle.as_str())) {
                    return false;
                }
            }
            true
        });
        let generator: Generator =
            Box::new(move |req: &ChatRequest| Ok(ChatResponse::reply(req, reply.clone())));

        Ok(MockRule {
            condition,
            generator,
            mode,
        })
    }
}

/// Answers matching chat-completion requests with canned replies.
#[derive(Debug)]
pub struct MockInterceptor {
    rules: Vec<MockRule>,
}

impl Default for MockInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInterceptor {
    /// A mock with the built-in connectivity-test rule: model `gpt-4o`, at
    /// least two messages, the last being the user prompt
    /// "Testing. Just say hi and nothing else.", answered with "Hi".
    #[must_use]
    pub fn new() -> Self {
        let mut mock = Self::empty();
        mock.add_rule(
            |req| {
                req.model == DEFAULT_MODEL
                    && req.messages.len() >= 2
                    && req
                        .last_message()
                        .is_some_and(|m| m.role == "user" && m.content == DEFAULT_PROMPT)
            },
            |req| Ok(ChatResponse::reply(req, DEFAULT_REPLY)),
        );
        mock
    }

    /// A mock without any rules.
    #[must_use]
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a direct-mode rule.
    pub fn add_rule<C, G>(&mut self, condition: C, generator: G)
    where
        C: Fn(&ChatRequest) -> bool + Send + Sync + 'static,
        G: Fn(&ChatRequest) -> Result<ChatResponse, InterceptorError> + Send + Sync + 'static,
    {
        self.add_rule_with_mode(MockMode::Direct, condition, generator);
    }

    pub fn add_rule_with_mode<C, G>(&mut self, mode: MockMode, condition: C, generator: G)
    where
        C: Fn(&ChatRequest) -> bool + Send + Sync + 'static,
        G: Fn(&ChatRequest) -> Result<ChatResponse, InterceptorError> + Send + Sync + 'static,
    {
        self.rules.push(MockRule {
            condition: Box::new(condition),
            generator: Box::new(generator),
            mode,
        });
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[async_trait]
impl Interceptor for MockInterceptor {
    fn name(&self) -> &str {
        "mock"
    }

    /// Options: `{"rules": [...]}`; rules are appended after existing ones.
    /// Nothing is added unless every rule is valid.
    fn configure(&mut self, options: &serde_json::Value) -> Result<(), InterceptorError> {
        if options.is_null() {
            return Ok(());
        }
        let opts: MockOptions = serde_json::from_value(options.clone())
            .map_err(|e| InterceptorError::Config(e.to_string()))?;
        let rules = opts
            .rules
            .into_iter()
            .enumerate()
            .map(|(i, rule)| rule.into_rule(i))
            .collect::<Result<Vec<_>, _>>()?;
        self.rules.extend(rules);
        Ok(())
    }

    async fn before_forward(

        &self,

        request: &mut InterceptedRequest,

    ) -> Result<(), InterceptorError> {
        if !request.path().contains(CHAT_COMPLETIONS) {
            return Ok(());
        }

        let chat: ChatRequest = match request.json() {
            Ok(chat) => chat,
            Err(e) => {
                debug!(error = %e, "Mock: body is not a chat request, passing through");
                return Ok(());
            }
        };
        debug!(model = %chat.model, messages = chat.messages.len(), "Mock: checking request");

        let Some(rule) = self.rules.iter().find(|rule| (rule.condition)(&chat)) else {
            return Ok(());
        };
        info!(model = %chat.model, mode = ?rule.mode, "Mock: matched request");

        let mut response = (rule.generator)(&chat)?;
        let now = chrono::Utc::now().timestamp();
        response.id = format!("mock-{now}");
        response.object = "chat.completion".to_string();
        response.created = now;
        response.model.clone_from(&chat.model);

        match rule.mode {
            MockMode::Direct if chat.stream => {
                request.respond_directly(DirectResponse::event_stream(response.to_sse_frames()?));
            }
            MockMode::Direct => {
                request.respond_directly(DirectResponse::json(serde_json::to_vec(&response)?));
            }
            MockMode::Replace => {
                request.set_attribute(MOCK_RESPONSE_ATTR, serde_json::to_value(&response)?);
                request.set_attribute(MOCK_STREAM_ATTR, serde_json::Value::Bool(chat.stream));
            }
        }
        Ok(())
    }

    async fn after_response(
        &self,
        request: &InterceptedRequest,
        response: &mut InterceptedResponse,
    ) -> Result<(), InterceptorError> {
        let Some(mock) = request.attribute(MOCK_RESPONSE_ATTR) else {
            return Ok(());
        };
        info!("Mock: intercepting response");

        let chat: ChatResponse = serde_json::from_value(mock.clone())?;
        let streaming = request
            .attribute(MOCK_STREAM_ATTR)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if streaming {
            response.replace_frames(TEXT_EVENT_STREAM, chat.to_sse_frames()?);
        } else {
            response.replace_body(APPLICATION_JSON, serde_json::to_vec(&chat)?);
        }
        response.status = StatusCode::OK;
        Ok(())
    }
}
