//! Storage layer for story persistence.
//!
//! This module provides SQLite-based storage for stories and their
//! branching segment trees, including the media generation status fields
//! the background tasks update in place.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Lifecycle of one background media generation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// The step was not requested.
    #[default]
    NotStarted,
    /// The step was requested but has not begun.
    Pending,
    /// A background task is working on the step.
    InProgress,
    /// The step finished and the content URL is set.
    Completed,
    /// The step failed; the segment stays usable without the media.
    Failed,
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationStatus::NotStarted => write!(f, "not_started"),
            GenerationStatus::Pending => write!(f, "pending"),
            GenerationStatus::InProgress => write!(f, "in_progress"),
            GenerationStatus::Completed => write!(f, "completed"),
            GenerationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_started" => Ok(GenerationStatus::NotStarted),
            "pending" => Ok(GenerationStatus::Pending),
            "in_progress" => Ok(GenerationStatus::InProgress),
            "completed" => Ok(GenerationStatus::Completed),
            "failed" => Ok(GenerationStatus::Failed),
            _ => Err(format!("Unknown generation status: {}", s)),
        }
    }
}

/// One branching narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    /// Unique story identifier.
    pub id: String,
    /// Story title, usually derived from the seed prompt.
    pub title: String,
    /// Genre/mode tag steering generation tone.
    pub story_mode: String,
    /// Owning user, None for anonymous stories.
    pub user_id: Option<String>,
    /// Whether the story is publicly listed.
    pub is_public: bool,
    /// Set exactly when an ending segment is persisted; never unset.
    pub is_completed: bool,
    /// Defaults to the root segment's generated image.
    pub thumbnail_url: Option<String>,
    /// Number of persisted segments.
    pub segment_count: i64,
    /// Optional narration of the whole story.
    pub full_story_audio_url: Option<String>,
    /// Status of the full-story narration.
    pub audio_generation_status: GenerationStatus,
    /// When the story was created.
    pub created_at: DateTime<Utc>,
    /// When the story was published, if ever.
    pub published_at: Option<DateTime<Utc>>,
}

impl Story {
    /// Create a new private, incomplete story
    pub fn new(title: impl Into<String>, story_mode: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            story_mode: story_mode.into(),
            user_id: None,
            is_public: false,
            is_completed: false,
            thumbnail_url: None,
            segment_count: 0,
            full_story_audio_url: None,
            audio_generation_status: GenerationStatus::NotStarted,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    /// Set the owning user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Make the story publicly listed
    pub fn with_public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }
}

/// One node in a story's branching tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorySegment {
    /// Unique segment identifier.
    pub id: String,
    /// Parent story ID.
    pub story_id: String,
    /// Parent segment ID; None marks the root.
    pub parent_segment_id: Option<String>,
    /// Generated narrative text.
    pub segment_text: String,
    /// Ordered choice strings; empty when `is_end` is true.
    pub choices: Vec<String>,
    /// Whether this segment concludes the story.
    pub is_end: bool,
    /// Generated illustration URL, once completed.
    pub image_url: Option<String>,
    /// Illustration generation lifecycle.
    pub image_generation_status: GenerationStatus,
    /// Generated narration URL, once completed.
    pub audio_url: Option<String>,
    /// Narration generation lifecycle.
    pub audio_generation_status: GenerationStatus,
    /// The choice that produced this segment; None for the root.
    pub triggering_choice_text: Option<String>,
    /// Whitespace-delimited word count of `segment_text`.
    pub word_count: i64,
    /// When the segment was created.
    pub created_at: DateTime<Utc>,
}

impl StorySegment {
    /// Create a new root-candidate segment with media steps not requested
    pub fn new(story_id: impl Into<String>, segment_text: impl Into<String>) -> Self {
        let segment_text = segment_text.into();
        let word_count = segment_text.split_whitespace().count() as i64;
        Self {
            id: Uuid::new_v4().to_string(),
            story_id: story_id.into(),
            parent_segment_id: None,
            segment_text,
            choices: Vec::new(),
            is_end: false,
            image_url: None,
            image_generation_status: GenerationStatus::NotStarted,
            audio_url: None,
            audio_generation_status: GenerationStatus::NotStarted,
            triggering_choice_text: None,
            word_count,
            created_at: Utc::now(),
        }
    }

    /// Set the parent segment
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_segment_id = Some(parent_id.into());
        self
    }

    /// Set the choice list
    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    /// Mark as an ending segment; endings never carry choices
    pub fn as_ending(mut self) -> Self {
        self.is_end = true;
        self.choices.clear();
        self
    }

    /// Set the choice text that produced this segment
    pub fn with_triggering_choice(mut self, choice: impl Into<String>) -> Self {
        self.triggering_choice_text = Some(choice.into());
        self
    }

    /// Set the initial image generation status
    pub fn with_image_status(mut self, status: GenerationStatus) -> Self {
        self.image_generation_status = status;
        self
    }

    /// Set the initial audio generation status
    pub fn with_audio_status(mut self, status: GenerationStatus) -> Self {
        self.audio_generation_status = status;
        self
    }
}

/// Storage trait for database operations.
///
/// Segment insertion is conditional: the storage enforces root uniqueness
/// and the parent-is-still-the-leaf check in one transaction, so two
/// concurrent choice submissions cannot silently fork the story.
#[async_trait]
pub trait Storage: Send + Sync {
    // Story operations

    /// Create a new story.
    async fn create_story(&self, story: &Story) -> StorageResult<()>;
    /// Get a story by ID.
    async fn get_story(&self, id: &str) -> StorageResult<Option<Story>>;
    /// Mark a story completed. Never unset.
    async fn mark_story_completed(&self, id: &str) -> StorageResult<()>;
    /// Set the story thumbnail reference.
    async fn update_story_thumbnail(&self, id: &str, thumbnail_url: &str) -> StorageResult<()>;
    /// Delete a story and its segments.
    async fn delete_story(&self, id: &str) -> StorageResult<()>;

    // Segment operations

    /// Insert a segment, enforcing the tree invariants, and bump the parent
    /// story's segment count.
    async fn create_segment(&self, segment: &StorySegment) -> StorageResult<()>;
    /// Get a segment by ID.
    async fn get_segment(&self, id: &str) -> StorageResult<Option<StorySegment>>;
    /// Get all segments of a story ordered by creation time.
    async fn get_story_segments(&self, story_id: &str) -> StorageResult<Vec<StorySegment>>;
    /// Get the most recently created segment of a story.
    async fn get_latest_segment(&self, story_id: &str) -> StorageResult<Option<StorySegment>>;
    /// Update a segment's image URL and status by primary key.
    async fn update_segment_image(
        &self,
        id: &str,
        image_url: Option<&str>,
        status: GenerationStatus,
    ) -> StorageResult<()>;
    /// Update a segment's audio URL and status by primary key.
    async fn update_segment_audio(
        &self,
        id: &str,
        audio_url: Option<&str>,
        status: GenerationStatus,
    ) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_status_round_trip() {
        for status in [
            GenerationStatus::NotStarted,
            GenerationStatus::Pending,
            GenerationStatus::InProgress,
            GenerationStatus::Completed,
            GenerationStatus::Failed,
        ] {
            let parsed: GenerationStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("done".parse::<GenerationStatus>().is_err());
    }

    #[test]
    fn test_segment_word_count() {
        let segment = StorySegment::new("story-1", "one two  three\nfour");
        assert_eq!(segment.word_count, 4);
    }

    #[test]
    fn test_ending_clears_choices() {
        let segment = StorySegment::new("story-1", "The end.")
            .with_choices(vec!["left".to_string(), "right".to_string()])
            .as_ending();
        assert!(segment.is_end);
        assert!(segment.choices.is_empty());
    }

    #[test]
    fn test_story_builder() {
        let story = Story::new("The Lighthouse", "mystery").with_user("user-7");
        assert_eq!(story.story_mode, "mystery");
        assert_eq!(story.user_id.as_deref(), Some("user-7"));
        assert!(!story.is_completed);
        assert_eq!(story.segment_count, 0);
    }
}
