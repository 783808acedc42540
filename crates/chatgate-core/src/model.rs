//! Model descriptors advertised on the model-listing endpoint.

use serde::{Deserialize, Serialize};

/// A model advertised by the gateway (OpenAI format).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    /// Always `"model"`.
    #[serde(default = "model_object")]
    pub object: String,
    /// Unix timestamp (seconds).
    #[serde(default = "now")]
    pub created: i64,
    pub owned_by: String,
}

fn model_object() -> String {
    "model".to_string()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl ModelDescriptor {
    /// Create a descriptor stamped with the current time.
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: model_object(),
            created: now(),
            owned_by: owned_by.into(),
        }
    }
}

/// Models returned when none are configured.
pub fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gpt-4o", "organization"),
        ModelDescriptor::new("ep-20250208163847-fv7w8", "organization"),
    ]
}

/// Response body of `/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    /// Always `"list"`.
    pub object: String,
    pub data: Vec<ModelDescriptor>,
}

impl ModelList {
    /// Build the listing, falling back to [`default_models`] when `configured` is empty.
    pub fn from_configured(configured: &[ModelDescriptor]) -> Self {
        let data = if configured.is_empty() {
            default_models()
        } else {
            configured.to_vec()
        };
        Self {
            object: "list".to_string(),
            data,
        }
    }
}
