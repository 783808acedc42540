//! Chat-completion wire types used by the built-in interceptors.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Terminator of an SSE completion stream.
pub const SSE_DONE: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// The fields of a chat-completion request the interceptors look at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Non-streaming chat-completion response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    /// A single assistant reply to `request`.
    ///
    /// Prompt tokens are counted as the number of request messages and the
    /// reply as one token.
    pub fn reply(request: &ChatRequest, content: impl Into<String>) -> Self {
        let prompt_tokens = request.messages.len();
        Self {
            id: String::new(),
            object: "chat.completion".to_string(),
            created: 0,
            model: request.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::new("assistant", content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens,
                completion_tokens: 1,
                total_tokens: prompt_tokens + 1,
            },
        }
    }

    /// Render as SSE: one `chat.completion.chunk` event per choice, then `[DONE]`.
    pub fn to_sse_frames(&self) -> Result<Vec<Bytes>, serde_json::Error> {
        let mut frames = Vec::with_capacity(self.choices.len() + 1);
        for choice in &self.choices {
            let chunk = serde_json::json!({
                "id": self.id,
                "object": "chat.completion.chunk",
                "created": self.created,
                "model": self.model,
                "choices": [{
                    "index": choice.index,
                    "delta": choice.message,
                    "finish_reason": choice.finish_reason,
                }],
            });
            let json = serde_json::to_string(&chunk)?;
            frames.push(Bytes::from(format!("data: {json}\n\n")));
        }
        frames.push(Bytes::from_static(SSE_DONE.as_bytes()));
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatRequest {
        serde_json::from_str(
            r#"{"model":"gpt-4o","stream":true,"messages":[
                {"role":"system","content":"be brief"},
                {"role":"user","content":"hello"}
            ],"temperature":0.2}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_request_ignores_unknown_fields() {
        let req = request();
        assert!(req.stream);
        assert_eq!(req.last_message().unwrap().content, "hello");
    }

    #[test]
    fn test_reply_usage() {
        let resp = ChatResponse::reply(&request(), "Hi");
        assert_eq!(resp.model, "gpt-4o");
        assert_eq!(resp.usage.prompt_tokens, 2);
        assert_eq!(resp.usage.total_tokens, 3);
        assert_eq!(resp.choices[0].message.role, "assistant");
    }

    #[test]
    fn test_sse_frames() {
        let mut resp = ChatResponse::reply(&request(), "Hi");
        resp.id = "mock-1".into();

        let frames = resp.to_sse_frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], SSE_DONE);

        let first = std::str::from_utf8(&frames[0]).unwrap();
        let payload = first
            .strip_prefix("data: ")
            .and_then(|s| s.strip_suffix("\n\n"))
            .unwrap();
        let chunk: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["id"], "mock-1");
        assert_eq!(chunk["choices"][0]["delta"]["content"], "Hi");
        assert_eq!(chunk["choices"][0]["finish_reason"], "stop");
    }
}
