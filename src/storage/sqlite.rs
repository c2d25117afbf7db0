use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{GenerationStatus, Storage, Story, StorySegment};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory storage instance (tests)
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid in-memory database URL: {}", e),
            }
        })?;

        // A single long-lived connection keeps the in-memory database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_story(&self, story: &Story) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stories (
                id, title, story_mode, user_id, is_public, is_completed,
                thumbnail_url, segment_count, full_story_audio_url,
                audio_generation_status, created_at, published_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&story.id)
        .bind(&story.title)
        .bind(&story.story_mode)
        .bind(&story.user_id)
        .bind(story.is_public)
        .bind(story.is_completed)
        .bind(&story.thumbnail_url)
        .bind(story.segment_count)
        .bind(&story.full_story_audio_url)
        .bind(story.audio_generation_status.to_string())
        .bind(story.created_at.to_rfc3339())
        .bind(story.published_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_story(&self, id: &str) -> StorageResult<Option<Story>> {
        let row: Option<StoryRow> = sqlx::query_as(
            r#"
            SELECT id, title, story_mode, user_id, is_public, is_completed,
                   thumbnail_url, segment_count, full_story_audio_url,
                   audio_generation_status, created_at, published_at
            FROM stories
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn mark_story_completed(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("UPDATE stories SET is_completed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StoryNotFound {
                story_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn update_story_thumbnail(&self, id: &str, thumbnail_url: &str) -> StorageResult<()> {
        let result = sqlx::query("UPDATE stories SET thumbnail_url = ? WHERE id = ?")
            .bind(thumbnail_url)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StoryNotFound {
                story_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn delete_story(&self, id: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM story_segments WHERE story_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM stories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_segment(&self, segment: &StorySegment) -> StorageResult<()> {
        let choices = serde_json::to_string(&segment.choices).unwrap_or_else(|_| "[]".to_string());

        let mut tx = self.pool.begin().await?;

        match &segment.parent_segment_id {
            None => {
                let roots: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM story_segments WHERE story_id = ? AND parent_segment_id IS NULL",
                )
                .bind(&segment.story_id)
                .fetch_one(&mut *tx)
                .await?;

                if roots > 0 {
                    return Err(StorageError::RootExists {
                        story_id: segment.story_id.clone(),
                    });
                }
            }
            Some(parent_id) => {
                let parent_story: Option<String> =
                    sqlx::query_scalar("SELECT story_id FROM story_segments WHERE id = ?")
                        .bind(parent_id)
                        .fetch_optional(&mut *tx)
                        .await?;

                if parent_story.as_deref() != Some(segment.story_id.as_str()) {
                    return Err(StorageError::SegmentNotFound {
                        segment_id: parent_id.clone(),
                    });
                }

                // Optimistic leaf check: a parent that already has a child is
                // no longer the story's frontier, so a concurrent choice must
                // not silently fork the tree.
                let children: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM story_segments WHERE parent_segment_id = ?",
                )
                .bind(parent_id)
                .fetch_one(&mut *tx)
                .await?;

                if children > 0 {
                    return Err(StorageError::ParentNotLeaf {
                        segment_id: parent_id.clone(),
                    });
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO story_segments (
                id, story_id, parent_segment_id, segment_text, choices, is_end,
                image_url, image_generation_status, audio_url,
                audio_generation_status, triggering_choice_text, word_count,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&segment.id)
        .bind(&segment.story_id)
        .bind(&segment.parent_segment_id)
        .bind(&segment.segment_text)
        .bind(&choices)
        .bind(segment.is_end)
        .bind(&segment.image_url)
        .bind(segment.image_generation_status.to_string())
        .bind(&segment.audio_url)
        .bind(segment.audio_generation_status.to_string())
        .bind(&segment.triggering_choice_text)
        .bind(segment.word_count)
        .bind(segment.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE stories SET segment_count = segment_count + 1 WHERE id = ?")
            .bind(&segment.story_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_segment(&self, id: &str) -> StorageResult<Option<StorySegment>> {
        let row: Option<SegmentRow> = sqlx::query_as(
            r#"
            SELECT id, story_id, parent_segment_id, segment_text, choices,
                   is_end, image_url, image_generation_status, audio_url,
                   audio_generation_status, triggering_choice_text, word_count,
                   created_at
            FROM story_segments
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_story_segments(&self, story_id: &str) -> StorageResult<Vec<StorySegment>> {
        let rows: Vec<SegmentRow> = sqlx::query_as(
            r#"
            SELECT id, story_id, parent_segment_id, segment_text, choices,
                   is_end, image_url, image_generation_status, audio_url,
                   audio_generation_status, triggering_choice_text, word_count,
                   created_at
            FROM story_segments
            WHERE story_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(story_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn get_latest_segment(&self, story_id: &str) -> StorageResult<Option<StorySegment>> {
        let row: Option<SegmentRow> = sqlx::query_as(
            r#"
            SELECT id, story_id, parent_segment_id, segment_text, choices,
                   is_end, image_url, image_generation_status, audio_url,
                   audio_generation_status, triggering_choice_text, word_count,
                   created_at
            FROM story_segments
            WHERE story_id = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(story_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_segment_image(
        &self,
        id: &str,
        image_url: Option<&str>,
        status: GenerationStatus,
    ) -> StorageResult<()> {
        let result = match image_url {
            Some(url) => {
                sqlx::query(
                    "UPDATE story_segments SET image_url = ?, image_generation_status = ? WHERE id = ?",
                )
                .bind(url)
                .bind(status.to_string())
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE story_segments SET image_generation_status = ? WHERE id = ?")
                    .bind(status.to_string())
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::SegmentNotFound {
                segment_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn update_segment_audio(
        &self,
        id: &str,
        audio_url: Option<&str>,
        status: GenerationStatus,
    ) -> StorageResult<()> {
        let result = match audio_url {
            Some(url) => {
                sqlx::query(
                    "UPDATE story_segments SET audio_url = ?, audio_generation_status = ? WHERE id = ?",
                )
                .bind(url)
                .bind(status.to_string())
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE story_segments SET audio_generation_status = ? WHERE id = ?")
                    .bind(status.to_string())
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::SegmentNotFound {
                segment_id: id.to_string(),
            });
        }

        Ok(())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct StoryRow {
    id: String,
    title: String,
    story_mode: String,
    user_id: Option<String>,
    is_public: bool,
    is_completed: bool,
    thumbnail_url: Option<String>,
    segment_count: i64,
    full_story_audio_url: Option<String>,
    audio_generation_status: String,
    created_at: String,
    published_at: Option<String>,
}

impl From<StoryRow> for Story {
    fn from(row: StoryRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            story_mode: row.story_mode,
            user_id: row.user_id,
            is_public: row.is_public,
            is_completed: row.is_completed,
            thumbnail_url: row.thumbnail_url,
            segment_count: row.segment_count,
            full_story_audio_url: row.full_story_audio_url,
            audio_generation_status: row.audio_generation_status.parse().unwrap_or_default(),
            created_at: parse_timestamp(&row.created_at),
            published_at: row.published_at.as_deref().map(parse_timestamp),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SegmentRow {
    id: String,
    story_id: String,
    parent_segment_id: Option<String>,
    segment_text: String,
    choices: String,
    is_end: bool,
    image_url: Option<String>,
    image_generation_status: String,
    audio_url: Option<String>,
    audio_generation_status: String,
    triggering_choice_text: Option<String>,
    word_count: i64,
    created_at: String,
}

impl From<SegmentRow> for StorySegment {
    fn from(row: SegmentRow) -> Self {
        Self {
            id: row.id,
            story_id: row.story_id,
            parent_segment_id: row.parent_segment_id,
            segment_text: row.segment_text,
            choices: serde_json::from_str(&row.choices).unwrap_or_default(),
            is_end: row.is_end,
            image_url: row.image_url,
            image_generation_status: row.image_generation_status.parse().unwrap_or_default(),
            audio_url: row.audio_url,
            audio_generation_status: row.audio_generation_status.parse().unwrap_or_default(),
            triggering_choice_text: row.triggering_choice_text,
            word_count: row.word_count,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}
