use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::{media_tasks, EngineCore};
use crate::context::PromptAssembler;
use crate::error::{AppError, AppResult, StorageError};
use crate::events::ChangeEvent;
use crate::prompts::ENDING_IMAGE_PROMPT;
use crate::providers::TextRequest;
use crate::rate_limit::ANONYMOUS_KEY;
use crate::storage::{GenerationStatus, Storage, StorySegment};

/// Input parameters for story completion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishParams {
    /// Story to conclude.
    pub story_id: String,
    /// Requesting user; anonymous when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Skip the ending illustration.
    #[serde(default)]
    pub skip_image: bool,
}

impl FinishParams {
    /// Finish the given story
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            user_id: None,
            skip_image: false,
        }
    }

    /// Skip the ending illustration
    pub fn without_image(mut self) -> Self {
        self.skip_image = true;
        self
    }
}

/// Story completion orchestrator.
///
/// A specialization of segment generation: it runs the same provider
/// policy and persistence path, but concludes the narrative from the full
/// transcript and forces the ending invariant on whatever the provider
/// returned. Providers are not trusted to self-terminate correctly.
#[derive(Clone)]
pub struct FinishEngine {
    core: EngineCore,
}

impl FinishEngine {
    /// Create a new finish engine
    pub fn new(core: EngineCore) -> Self {
        Self { core }
    }

    /// Generate and persist the ending segment, marking the story
    /// completed.
    ///
    /// Invoking this on an already-completed story is refused; there is
    /// never a second ending.
    pub async fn process(&self, params: FinishParams) -> AppResult<StorySegment> {
        let start = Instant::now();

        let limiter_key = params
            .user_id
            .clone()
            .unwrap_or_else(|| ANONYMOUS_KEY.to_string());
        self.core.limiter().check(&limiter_key).await?;

        let story = self
            .core
            .storage()
            .get_story(&params.story_id)
            .await?
            .ok_or_else(|| {
                AppError::Storage(StorageError::StoryNotFound {
                    story_id: params.story_id.clone(),
                })
            })?;

        if story.is_completed {
            return Err(AppError::StoryAlreadyCompleted { story_id: story.id });
        }

        let segments = self.core.storage().get_story_segments(&story.id).await?;
        let latest = segments.last().ok_or_else(|| AppError::Validation {
            field: "storyId".to_string(),
            reason: "story has no segments to conclude".to_string(),
        })?;

        debug!(
            story_id = %story.id,
            segments = segments.len(),
            "Generating story ending"
        );

        let transcript: Vec<&str> = segments.iter().map(|s| s.segment_text.as_str()).collect();
        let messages = PromptAssembler::ending(&story.story_mode, &transcript.join("\n\n"));

        let ending_text = self
            .core
            .router()
            .generate_text(&TextRequest::prose(messages))
            .await?;

        // Defensive overwrite: ending invariant holds regardless of the
        // raw provider output.
        let segment = StorySegment::new(&story.id, ending_text.trim())
            .with_parent(latest.id.clone())
            .with_triggering_choice("End the story")
            .with_image_status(if params.skip_image {
                GenerationStatus::NotStarted
            } else {
                GenerationStatus::Pending
            })
            .as_ending();

        self.core.storage().create_segment(&segment).await?;
        self.core.feed().publish(ChangeEvent::segment_insert(&segment));

        self.core.storage().mark_story_completed(&story.id).await?;
        if let Some(updated) = self.core.storage().get_story(&story.id).await? {
            self.core.feed().publish(ChangeEvent::story_update(&updated));
        }

        if !params.skip_image {
            tokio::spawn(media_tasks::process_image_generation(
                self.core.clone(),
                segment.id.clone(),
                ENDING_IMAGE_PROMPT.to_string(),
            ));
        }

        info!(
            story_id = %story.id,
            segment_id = %segment.id,
            latency_ms = start.elapsed().as_millis() as u64,
            "Story finished with generated ending"
        );

        Ok(segment)
    }
}
