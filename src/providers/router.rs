use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{
    ImageGenerator, ImageRequest, OpenAiProvider, OvhProvider, SegmentDraft, SpeechGenerator,
    SpeechRequest, TextGenerator, TextRequest,
};
use crate::config::{Config, ProviderId, ProviderPair};
use crate::error::{AllProvidersFailed, AppError, ProviderError, ProviderResult};

/// Primary-then-fallback provider selection for each capability.
///
/// The fallback adapter is never invoked when the primary succeeds, and
/// there is no retry beyond the single primary-to-fallback hop. Both
/// failure reasons travel in the aggregate error.
#[derive(Clone)]
pub struct ProviderRouter {
    openai: Arc<OpenAiProvider>,
    ovh: Arc<OvhProvider>,
    text_pair: ProviderPair,
    image_pair: ProviderPair,
    narration_pair: ProviderPair,
}

impl ProviderRouter {
    /// Build both adapters and validate the routing table.
    ///
    /// A capability routed to a vendor that cannot serve it is a
    /// configuration error at startup, not a runtime surprise.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let openai = Arc::new(
            OpenAiProvider::new(
                &config.openai,
                &config.request,
                config.generation.text_tuning.clone(),
                config.generation.image_tuning.clone(),
                config.generation.narration_tuning.clone(),
            )
            .map_err(AppError::Provider)?,
        );

        let ovh = Arc::new(
            OvhProvider::new(
                &config.ovh,
                &config.request,
                config.generation.text_tuning.clone(),
                config.generation.image_tuning.clone(),
            )
            .map_err(AppError::Provider)?,
        );

        let narration = config.generation.narration;
        for id in [narration.primary, narration.fallback] {
            if id == ProviderId::Ovh {
                return Err(AppError::Config {
                    message: "narration cannot be routed to ovh (no speech endpoint)".to_string(),
                });
            }
        }

        Ok(Self {
            openai,
            ovh,
            text_pair: config.generation.text,
            image_pair: config.generation.image,
            narration_pair: narration,
        })
    }

    fn text_adapter(&self, id: ProviderId) -> &dyn TextGenerator {
        match id {
            ProviderId::Openai => self.openai.as_ref(),
            ProviderId::Ovh => self.ovh.as_ref(),
        }
    }

    fn image_adapter(&self, id: ProviderId) -> &dyn ImageGenerator {
        match id {
            ProviderId::Openai => self.openai.as_ref(),
            ProviderId::Ovh => self.ovh.as_ref(),
        }
    }

    fn speech_adapter(&self, id: ProviderId) -> ProviderResult<&dyn SpeechGenerator> {
        match id {
            ProviderId::Openai => Ok(self.openai.as_ref()),
            ProviderId::Ovh => Err(ProviderError::Unsupported {
                capability: "narration".to_string(),
                provider: id.to_string(),
            }),
        }
    }

    /// Generate text, trying primary then fallback.
    pub async fn generate_text(&self, request: &TextRequest) -> Result<String, AllProvidersFailed> {
        let pair = self.text_pair;

        let primary_error =
            match Self::attempt("text", pair.primary, false, self.text_adapter(pair.primary).complete(request)).await
            {
                Ok(completion) => return Ok(completion),
                Err(e) => e,
            };

        match Self::attempt("text", pair.fallback, true, self.text_adapter(pair.fallback).complete(request)).await {
            Ok(completion) => Ok(completion),
            Err(fallback_error) => Err(Self::aggregate("text", pair, primary_error, fallback_error)),
        }
    }

    /// Generate a structured segment draft, trying primary then fallback.
    ///
    /// Shape validation happens inside each attempt, so a provider that
    /// answers with malformed JSON counts as a failed provider and the
    /// fallback still runs.
    pub async fn generate_segment(
        &self,
        request: &TextRequest,
    ) -> Result<SegmentDraft, AllProvidersFailed> {
        let pair = self.text_pair;

        let primary_error =
            match Self::attempt("text", pair.primary, false, self.segment_call(pair.primary, request))
                .await
            {
                Ok(draft) => return Ok(draft),
                Err(e) => e,
            };

        match Self::attempt("text", pair.fallback, true, self.segment_call(pair.fallback, request))
            .await
        {
            Ok(draft) => Ok(draft),
            Err(fallback_error) => Err(Self::aggregate("text", pair, primary_error, fallback_error)),
        }
    }

    async fn segment_call(
        &self,
        id: ProviderId,
        request: &TextRequest,
    ) -> ProviderResult<SegmentDraft> {
        let completion = self.text_adapter(id).complete(request).await?;
        SegmentDraft::from_completion(&completion)
    }

    /// Generate image bytes, trying primary then fallback.
    pub async fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> Result<Vec<u8>, AllProvidersFailed> {
        let pair = self.image_pair;

        let primary_error =
            match Self::attempt("image", pair.primary, false, self.image_adapter(pair.primary).generate(request)).await
            {
                Ok(bytes) => return Ok(bytes),
                Err(e) => e,
            };

        match Self::attempt("image", pair.fallback, true, self.image_adapter(pair.fallback).generate(request)).await {
            Ok(bytes) => Ok(bytes),
            Err(fallback_error) => {
                Err(Self::aggregate("image", pair, primary_error, fallback_error))
            }
        }
    }

    /// Synthesize narration audio, trying primary then fallback.
    pub async fn synthesize_narration(
        &self,
        request: &SpeechRequest,
    ) -> Result<Vec<u8>, AllProvidersFailed> {
        let pair = self.narration_pair;

        let primary_error = match self.attempt_speech(pair.primary, false, request).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => e,
        };

        match self.attempt_speech(pair.fallback, true, request).await {
            Ok(bytes) => Ok(bytes),
            Err(fallback_error) => Err(Self::aggregate(
                "narration",
                pair,
                primary_error,
                fallback_error,
            )),
        }
    }

    async fn attempt_speech(
        &self,
        id: ProviderId,
        is_fallback: bool,
        request: &SpeechRequest,
    ) -> ProviderResult<Vec<u8>> {
        let adapter = self.speech_adapter(id)?;
        Self::attempt("narration", id, is_fallback, adapter.synthesize(request)).await
    }

    /// Run one adapter call with per-attempt structured logging.
    async fn attempt<T>(
        capability: &str,
        provider: ProviderId,
        is_fallback: bool,
        call: impl std::future::Future<Output = ProviderResult<T>>,
    ) -> ProviderResult<T> {
        info!(
            capability,
            provider = %provider,
            fallback = is_fallback,
            "Attempting provider call"
        );
        let start = Instant::now();

        match call.await {
            Ok(result) => {
                info!(
                    capability,
                    provider = %provider,
                    fallback = is_fallback,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Provider call succeeded"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    capability,
                    provider = %provider,
                    fallback = is_fallback,
                    latency_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Provider call failed"
                );
                Err(e)
            }
        }
    }

    fn aggregate(
        capability: &str,
        pair: ProviderPair,
        primary_error: ProviderError,
        fallback_error: ProviderError,
    ) -> AllProvidersFailed {
        AllProvidersFailed {
            capability: capability.to_string(),
            primary: pair.primary.to_string(),
            primary_error: primary_error.to_string(),
            fallback: pair.fallback.to_string(),
            fallback_error: fallback_error.to_string(),
        }
    }
}
