use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{ImageGenerator, ImageRequest, SpeechGenerator, SpeechRequest, TextGenerator, TextRequest};
use crate::config::{ImageTuning, NarrationTuning, OpenAiConfig, ProviderId, RequestConfig, TextTuning};
use crate::error::{ProviderError, ProviderResult};

/// Adapter for the OpenAI API: chat completions for text, DALL-E for
/// images, and the speech endpoint for narration.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    text_tuning: TextTuning,
    image_tuning: ImageTuning,
    narration_tuning: NarrationTuning,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

impl OpenAiProvider {
    /// Create a new OpenAI adapter
    pub fn new(
        config: &OpenAiConfig,
        request_config: &RequestConfig,
        text_tuning: TextTuning,
        image_tuning: ImageTuning,
        narration_tuning: NarrationTuning,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            text_tuning,
            image_tuning,
            narration_tuning,
            timeout_ms: request_config.timeout_ms,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            ProviderError::Http(e)
        }
    }

    async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl TextGenerator for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Openai
    }

    async fn complete(&self, request: &TextRequest) -> ProviderResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(
            messages = request.messages.len(),
            model = %self.text_tuning.model,
            "Calling OpenAI chat completions"
        );

        let mut body = json!({
            "model": self.text_tuning.model,
            "messages": request.messages,
            "temperature": self.text_tuning.temperature,
            "max_tokens": self.text_tuning.max_tokens,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;

        let completion: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse chat completion: {}", e),
                })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse {
                message: "chat completion returned no content".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl ImageGenerator for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Openai
    }

    async fn generate(&self, request: &ImageRequest) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/v1/images/generations", self.base_url);

        debug!(model = %self.image_tuning.model, "Calling OpenAI image generation");

        let body = json!({
            "model": self.image_tuning.model,
            "prompt": request.prompt,
            "n": 1,
            "size": self.image_tuning.size,
            "quality": "standard",
            "response_format": "b64_json",
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;

        let generation: ImageGenerationResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse image response: {}", e),
                })?;

        let b64 = generation
            .data
            .into_iter()
            .next()
            .and_then(|datum| datum.b64_json)
            .ok_or_else(|| ProviderError::EmptyResponse {
                message: "image response contained no b64_json payload".to_string(),
            })?;

        base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| ProviderError::Decode {
                message: format!("invalid base64 image payload: {}", e),
            })
    }
}

#[async_trait::async_trait]
impl SpeechGenerator for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Openai
    }

    async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/v1/audio/speech", self.base_url);

        debug!(
            voice = %self.narration_tuning.voice,
            chars = request.text.len(),
            "Calling OpenAI speech synthesis"
        );

        let body = json!({
            "model": self.narration_tuning.model,
            "input": request.text,
            "voice": self.narration_tuning.voice,
            "speed": self.narration_tuning.speed,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;

        let bytes = response.bytes().await.map_err(ProviderError::Http)?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyResponse {
                message: "speech response contained no audio bytes".to_string(),
            });
        }

        Ok(bytes.to_vec())
    }
}
