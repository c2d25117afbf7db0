//! Content provider adapters and the selection policy.
//!
//! One adapter per (capability, vendor) pair, all speaking the normalized
//! request/response types defined here. The [`ProviderRouter`] picks the
//! primary adapter for a capability and falls back to the configured
//! secondary on failure.

mod openai;
mod ovh;
mod router;

pub use openai::OpenAiProvider;
pub use ovh::OvhProvider;
pub use router::ProviderRouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderId;
use crate::context::{NarrativeContext, VisualContext};
use crate::error::{ProviderError, ProviderResult};

/// Message in a chat-style text generation conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Normalized text generation request
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the vendor for a JSON object response where supported.
    pub json_mode: bool,
}

impl TextRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            json_mode: true,
        }
    }

    /// Plain prose completion (story endings).
    pub fn prose(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            json_mode: false,
        }
    }
}

/// Normalized image generation request
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
}

/// Normalized narration request
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
}

/// Structured segment response expected from a text provider.
///
/// Field names match the JSON contract the system prompt demands from the
/// model, so the raw completion deserializes directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentDraft {
    pub segment_text: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub is_end: bool,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub visual_context: Option<VisualContext>,
    #[serde(default)]
    pub narrative_context: Option<NarrativeContext>,
}

impl SegmentDraft {
    /// Parse a draft out of a raw completion.
    ///
    /// Vendors that lack a JSON output mode wrap the object in prose, so the
    /// parser extracts the outermost `{...}` span before deserializing.
    pub fn from_completion(completion: &str) -> ProviderResult<Self> {
        let start = completion.find('{');
        let end = completion.rfind('}');
        let json = match (start, end) {
            (Some(start), Some(end)) if end > start => &completion[start..=end],
            _ => {
                return Err(ProviderError::InvalidResponse {
                    message: "no JSON object in completion".to_string(),
                })
            }
        };

        let draft: SegmentDraft =
            serde_json::from_str(json).map_err(|e| ProviderError::InvalidResponse {
                message: format!("Failed to parse segment draft: {}", e),
            })?;

        draft.into_validated()
    }

    /// Enforce the response shape contract.
    ///
    /// Missing narrative text or a malformed choice list is a hard failure of
    /// the provider attempt, not a partial success. Ending segments always
    /// carry an empty choice list.
    pub fn into_validated(mut self) -> ProviderResult<Self> {
        if self.segment_text.trim().is_empty() {
            return Err(ProviderError::InvalidResponse {
                message: "response missing segmentText".to_string(),
            });
        }

        if self.is_end {
            self.choices.clear();
        } else if self.choices.len() != 3 {
            return Err(ProviderError::InvalidResponse {
                message: format!("expected exactly 3 choices, got {}", self.choices.len()),
            });
        }

        Ok(self)
    }
}

/// Text generation capability
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Vendor identity, used in logs and aggregate errors.
    fn id(&self) -> ProviderId;

    /// Run the request and return the raw completion text.
    async fn complete(&self, request: &TextRequest) -> ProviderResult<String>;
}

/// Image generation capability
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Run the request and return raw image bytes (PNG).
    async fn generate(&self, request: &ImageRequest) -> ProviderResult<Vec<u8>>;
}

/// Narration (text-to-speech) capability
#[async_trait]
pub trait SpeechGenerator: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Run the request and return raw audio bytes (MP3).
    async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<Vec<u8>>;
}
