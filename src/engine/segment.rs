use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::{media_tasks, EngineCore};
use crate::context::{ArcStage, NarrativeContext, PromptAssembler, VisualContext, CONTEXT_WINDOW};
use crate::error::{AppError, AppResult, StorageError};
use crate::events::ChangeEvent;
use crate::providers::TextRequest;
use crate::rate_limit::ANONYMOUS_KEY;
use crate::storage::{GenerationStatus, Storage, Story, StorySegment};

/// Longest accepted seed prompt.
const MAX_PROMPT_CHARS: usize = 2000;
/// Longest accepted choice text.
const MAX_CHOICE_CHARS: usize = 200;
/// Story titles are derived from the seed prompt, truncated to this length.
const MAX_TITLE_CHARS: usize = 100;

/// Accepted genre/mode tags.
const VALID_GENRES: &[&str] = &[
    "fantasy",
    "sci-fi",
    "mystery",
    "adventure",
    "horror",
    "romance",
    "thriller",
    "comedy",
    "drama",
    "educational",
    "child-adapted",
    "epic-fantasy",
    "sci-fi-thriller",
    "mystery-detective",
    "romantic-drama",
    "adventure-quest",
    "horror-story",
    "comedy-adventure",
    "historical-journey",
];

/// Input parameters for segment generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateParams {
    /// Seed prompt; required when starting a new story.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Genre/mode tag for a new story.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Existing story to continue; a new story is created when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    /// Current leaf segment the new segment branches from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_segment_id: Option<String>,
    /// The choice the user selected; required for continuations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_text: Option<String>,
    /// Requesting user; anonymous when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Skip illustration generation.
    #[serde(default)]
    pub skip_image: bool,
    /// Skip narration generation.
    #[serde(default)]
    pub skip_audio: bool,
}

impl GenerateParams {
    /// Start a new story from a seed prompt
    pub fn start(prompt: impl Into<String>, genre: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            genre: Some(genre.into()),
            story_id: None,
            parent_segment_id: None,
            choice_text: None,
            user_id: None,
            skip_image: false,
            skip_audio: false,
        }
    }

    /// Continue an existing story from a selected choice
    pub fn choose(
        story_id: impl Into<String>,
        parent_segment_id: impl Into<String>,
        choice_text: impl Into<String>,
    ) -> Self {
        Self {
            prompt: None,
            genre: None,
            story_id: Some(story_id.into()),
            parent_segment_id: Some(parent_segment_id.into()),
            choice_text: Some(choice_text.into()),
            user_id: None,
            skip_image: false,
            skip_audio: false,
        }
    }

    /// Set the requesting user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Skip illustration generation
    pub fn without_image(mut self) -> Self {
        self.skip_image = true;
        self
    }

    /// Skip narration generation
    pub fn without_audio(mut self) -> Self {
        self.skip_audio = true;
        self
    }

    fn validate(&self) -> AppResult<()> {
        if let Some(prompt) = &self.prompt {
            if prompt.trim().is_empty() {
                return Err(AppError::Validation {
                    field: "prompt".to_string(),
                    reason: "cannot be empty".to_string(),
                });
            }
            if prompt.chars().count() > MAX_PROMPT_CHARS {
                return Err(AppError::Validation {
                    field: "prompt".to_string(),
                    reason: format!("cannot exceed {} characters", MAX_PROMPT_CHARS),
                });
            }
        }

        if let Some(choice) = &self.choice_text {
            if choice.chars().count() > MAX_CHOICE_CHARS {
                return Err(AppError::Validation {
                    field: "choiceText".to_string(),
                    reason: format!("cannot exceed {} characters", MAX_CHOICE_CHARS),
                });
            }
        }

        if let Some(genre) = &self.genre {
            if !VALID_GENRES.contains(&genre.as_str()) {
                return Err(AppError::Validation {
                    field: "genre".to_string(),
                    reason: format!("unknown genre '{}'", genre),
                });
            }
        }

        if self.story_id.is_none() && self.prompt.is_none() {
            return Err(AppError::Validation {
                field: "prompt".to_string(),
                reason: "required when starting a new story".to_string(),
            });
        }

        Ok(())
    }
}

/// Segment generation orchestrator.
///
/// Sequences text generation, persistence, and the detached media tasks.
/// The caller's request completes at the durability point: once the text
/// segment row is inserted, image and audio continue in the background and
/// surface through status-field updates.
#[derive(Clone)]
pub struct SegmentEngine {
    core: EngineCore,
}

impl SegmentEngine {
    /// Create a new segment engine
    pub fn new(core: EngineCore) -> Self {
        Self { core }
    }

    /// Process one generation request.
    ///
    /// Text failure aborts the request with no segment row; media failures
    /// never do.
    pub async fn process(&self, params: GenerateParams) -> AppResult<StorySegment> {
        let start = Instant::now();

        params.validate()?;

        // Abuse guard runs before any provider is called.
        let limiter_key = params
            .user_id
            .clone()
            .unwrap_or_else(|| ANONYMOUS_KEY.to_string());
        self.core.limiter().check(&limiter_key).await?;

        let story = self.resolve_story(&params).await?;
        if story.is_completed {
            return Err(AppError::StoryAlreadyCompleted { story_id: story.id });
        }

        let previous = self.core.storage().get_story_segments(&story.id).await?;
        let is_root = previous.is_empty();

        debug!(
            story_id = %story.id,
            prior_segments = previous.len(),
            is_root,
            "Processing segment generation"
        );

        let visual = VisualContext::default();
        let narrative = NarrativeContext {
            summary: if is_root {
                "Beginning of story".to_string()
            } else {
                "Story in progress".to_string()
            },
            current_objective: "Continue the adventure".to_string(),
            arc_stage: ArcStage::for_segment_count(previous.len()),
        };

        let messages = if is_root {
            let prompt = params.prompt.as_deref().ok_or_else(|| AppError::Validation {
                field: "prompt".to_string(),
                reason: "required for the first segment".to_string(),
            })?;
            PromptAssembler::opening(prompt, &story.story_mode)
        } else {
            let choice = params
                .choice_text
                .as_deref()
                .ok_or_else(|| AppError::Validation {
                    field: "choiceText".to_string(),
                    reason: "required when continuing a story".to_string(),
                })?;
            let window: Vec<String> = previous
                .iter()
                .rev()
                .take(CONTEXT_WINDOW)
                .rev()
                .map(|s| s.segment_text.clone())
                .collect();
            PromptAssembler::continuation(choice, &window, &visual, &narrative)
        };

        // Text is the synchronous leg; both providers failing aborts here
        // with no persisted row.
        let draft = self
            .core
            .router()
            .generate_segment(&TextRequest::new(messages))
            .await?;

        let parent_id = if is_root {
            None
        } else {
            Some(
                params
                    .parent_segment_id
                    .clone()
                    .ok_or_else(|| AppError::Validation {
                        field: "parentSegmentId".to_string(),
                        reason: "required when continuing a story".to_string(),
                    })?,
            )
        };

        let mut segment = StorySegment::new(&story.id, &draft.segment_text)
            .with_choices(draft.choices.clone())
            .with_image_status(if params.skip_image {
                GenerationStatus::NotStarted
            } else {
                GenerationStatus::Pending
            })
            .with_audio_status(if params.skip_audio {
                GenerationStatus::NotStarted
            } else {
                GenerationStatus::Pending
            });
        if let Some(parent) = parent_id {
            segment = segment.with_parent(parent);
        }
        if !is_root {
            if let Some(choice) = &params.choice_text {
                segment = segment.with_triggering_choice(choice.clone());
            }
        }
        if draft.is_end {
            segment = segment.as_ending();
        }

        // Durability point: after this insert the segment exists for
        // readers even if every media step fails. A stale parent surfaces
        // here as ParentNotLeaf instead of silently forking the story.
        self.core.storage().create_segment(&segment).await?;
        self.core.feed().publish(ChangeEvent::segment_insert(&segment));

        if segment.is_end {
            self.core.storage().mark_story_completed(&story.id).await?;
            if let Some(updated) = self.core.storage().get_story(&story.id).await? {
                self.core.feed().publish(ChangeEvent::story_update(&updated));
            }
        }

        if !params.skip_image {
            let image_prompt = if draft.image_prompt.trim().is_empty() {
                // The background task records the failure status itself.
                String::new()
            } else {
                let visual_for_image = draft.visual_context.clone().unwrap_or(visual);
                PromptAssembler::enhance_image_prompt(&draft.image_prompt, &visual_for_image)
            };
            tokio::spawn(media_tasks::process_image_generation(
                self.core.clone(),
                segment.id.clone(),
                image_prompt,
            ));
        }

        if !params.skip_audio {
            tokio::spawn(media_tasks::process_audio_generation(
                self.core.clone(),
                segment.id.clone(),
                segment.segment_text.clone(),
            ));
        }

        info!(
            story_id = %segment.story_id,
            segment_id = %segment.id,
            is_root,
            is_end = segment.is_end,
            latency_ms = start.elapsed().as_millis() as u64,
            "Segment generation completed"
        );

        Ok(segment)
    }

    /// Fetch the target story, or create one from the seed prompt.
    async fn resolve_story(&self, params: &GenerateParams) -> AppResult<Story> {
        if let Some(story_id) = &params.story_id {
            return self
                .core
                .storage()
                .get_story(story_id)
                .await?
                .ok_or_else(|| {
                    AppError::Storage(StorageError::StoryNotFound {
                        story_id: story_id.clone(),
                    })
                });
        }

        let prompt = params.prompt.as_deref().unwrap_or_default();
        let title: String = prompt.chars().take(MAX_TITLE_CHARS).collect();
        let mode = params.genre.clone().unwrap_or_else(|| "fantasy".to_string());

        let mut story = Story::new(title.trim(), mode);
        if let Some(user_id) = &params.user_id {
            story = story.with_user(user_id.clone());
        }

        self.core.storage().create_story(&story).await?;
        info!(story_id = %story.id, mode = %story.story_mode, "Created story");

        Ok(story)
    }
}
