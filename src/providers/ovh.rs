use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{ChatRole, ImageGenerator, ImageRequest, TextGenerator, TextRequest};
use crate::config::{ImageTuning, OvhConfig, ProviderId, RequestConfig, TextTuning};
use crate::error::{ProviderError, ProviderResult};

/// Adapter for OVHcloud AI Endpoints: Qwen text generation and Stable
/// Diffusion XL images. OVH has no narration endpoint.
#[derive(Clone)]
pub struct OvhProvider {
    client: Client,
    text_url: String,
    image_url: String,
    api_token: String,
    text_tuning: TextTuning,
    image_tuning: ImageTuning,
    timeout_ms: u64,
}

/// OVH text endpoints return either a bare object or a one-element batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextGenerationResponse {
    Single(GeneratedText),
    Batch(Vec<GeneratedText>),
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: Option<String>,
}

impl TextGenerationResponse {
    fn into_text(self) -> Option<String> {
        match self {
            TextGenerationResponse::Single(single) => single.generated_text,
            TextGenerationResponse::Batch(batch) => {
                batch.into_iter().next().and_then(|g| g.generated_text)
            }
        }
    }
}

impl OvhProvider {
    /// Create a new OVH adapter
    pub fn new(
        config: &OvhConfig,
        request_config: &RequestConfig,
        text_tuning: TextTuning,
        image_tuning: ImageTuning,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            text_url: config.text_url.trim_end_matches('/').to_string(),
            image_url: config.image_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            text_tuning,
            image_tuning,
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

    /// Flatten chat messages into the single-string prompt the endpoint
    /// expects.
    fn flatten_messages(request: &TextRequest) -> String {
        let mut inputs = String::new();
        for message in &request.messages {
            match message.role {
                ChatRole::System => {
                    inputs.push_str(&message.content);
                    inputs.push_str("\n\n");
                }
                ChatRole::User => {
                    inputs.push_str("User: ");
                    inputs.push_str(&message.content);
                    inputs.push_str("\n\n");
                }
                ChatRole::Assistant => {
                    inputs.push_str("Assistant: ");
                    inputs.push_str(&message.content);
                    inputs.push_str("\n\n");
                }
            }
        }
        inputs.push_str("Assistant:");
        inputs
    }
}

#[async_trait::async_trait]
impl TextGenerator for OvhProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Ovh
    }

    async fn complete(&self, request: &TextRequest) -> ProviderResult<String> {
        let url = format!("{}/api/text_generation", self.text_url);

        debug!(messages = request.messages.len(), "Calling OVH text generation");

        let body = json!({
            "inputs": Self::flatten_messages(request),
            "parameters": {
                "max_new_tokens": self.text_tuning.max_tokens,
                "temperature": self.text_tuning.temperature,
                "top_p": 0.9,
                "repetition_penalty": 1.1,
                "return_full_text": false,
            },
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let generation: TextGenerationResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse text generation response: {}", e),
                })?;

        generation
            .into_text()
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse {
                message: "text generation returned no generated_text".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl ImageGenerator for OvhProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Ovh
    }

    async fn generate(&self, request: &ImageRequest) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/api/text2image", self.image_url);

        debug!("Calling OVH image generation");

        let body = json!({
            "prompt": request.prompt,
            "negative_prompt": self.image_tuning.negative_prompt,
            "num_inference_steps": self.image_tuning.num_inference_steps,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "application/octet-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let bytes = response.bytes().await.map_err(ProviderError::Http)?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyResponse {
                message: "image generation returned no bytes".to_string(),
            });
        }

        Ok(bytes.to_vec())
    }
}
