//! Completion Generator (C5) and the typed chat-completion request/response
//! model (§3 "typed request record").
//!
//! Only the observable contract in spec §4.5 matters for conformance; the
//! sampling and content synthesis below are a direct idiomatic translation
//! of `original_source/mock_generator.py`, carried over as the supplemental
//! behavior behind that contract.

mod generator;

pub use generator::{CompletionGenerator, GeneratorConfig};

use serde::{Deserialize, Serialize};

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

/// Incoming `/v1/chat/completions` body, validated at the ingress boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// A message's content is either plain text or a list of parts — mirrors
/// the OpenAI wire shape and `mock_generator.py`'s `isinstance(content, list)`
/// branch.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPart {
    pub text: Option<String>,
    #[serde(flatten)]
    pub other: std::collections::HashMap<String, serde_json::Value>,
}

impl ChatCompletionRequest {
    /// Validate `max_tokens` and `temperature` ranges per §4.6 step 2.
    /// Returns the human-readable reason for a 422 on the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(mt) = self.max_tokens {
            if !(1..=4096).contains(&mt) {
                return Err("max_tokens must be between 1 and 4096".to_string());
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err("temperature must be between 0.0 and 2.0".to_string());
            }
        }
        Ok(())
    }

    pub fn effective_temperature(&self) -> f32 {
        self.temperature.unwrap_or_else(default_temperature)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
}

/// One-shot response shape (§4.5).
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Usage,
}

/// One SSE event in a streaming response.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}
