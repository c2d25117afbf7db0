//! End-to-end tests for the generation orchestrators
//!
//! Drives the segment and completion engines against wiremock provider
//! servers and an in-memory SQLite database.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storyloom::config::{
    Config, DatabaseConfig, GenerationConfig, LogFormat, LoggingConfig, MediaConfig, OpenAiConfig,
    OvhConfig, RateLimitConfig, RequestConfig,
};
use storyloom::engine::{
    process_audio_generation, process_image_generation, EngineCore, FinishEngine, FinishParams,
    GenerateParams, SegmentEngine,
};
use storyloom::error::AppError;
use storyloom::events::ChangeFeed;
use storyloom::media::FsMediaStore;
use storyloom::providers::ProviderRouter;
use storyloom::rate_limit::SlidingWindowLimiter;
use storyloom::storage::{GenerationStatus, SqliteStorage, Storage};

struct TestHarness {
    core: EngineCore,
    storage: SqliteStorage,
    segment_engine: SegmentEngine,
    finish_engine: FinishEngine,
    feed: ChangeFeed,
    _media_dir: tempfile::TempDir,
}

fn test_config(openai_url: &str, ovh_url: &str, media_root: PathBuf) -> Config {
    Config {
        openai: OpenAiConfig {
            api_key: "test-key".to_string(),
            base_url: openai_url.to_string(),
        },
        ovh: OvhConfig {
            api_token: "test-token".to_string(),
            text_url: ovh_url.to_string(),
            image_url: ovh_url.to_string(),
        },
        generation: GenerationConfig::default(),
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        media: MediaConfig {
            root: media_root,
            public_base_url: "http://localhost:8080/media".to_string(),
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig { timeout_ms: 5000 },
        rate_limit: RateLimitConfig::default(),
    }
}

async fn harness(openai_url: &str, ovh_url: &str, rate_limit: RateLimitConfig) -> TestHarness {
    let media_dir = tempfile::tempdir().expect("Failed to create media dir");
    let config = test_config(openai_url, ovh_url, media_dir.path().to_path_buf());

    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let router = ProviderRouter::from_config(&config).expect("Failed to build router");
    let media = Arc::new(FsMediaStore::new(&config.media));
    let feed = ChangeFeed::default();
    let limiter = Arc::new(SlidingWindowLimiter::new(rate_limit));

    let core = EngineCore::new(storage.clone(), router, media, feed.clone(), limiter);

    TestHarness {
        segment_engine: SegmentEngine::new(core.clone()),
        finish_engine: FinishEngine::new(core.clone()),
        core,
        storage,
        feed,
        _media_dir: media_dir,
    }
}

fn draft_json(segment_text: &str, is_end: bool) -> String {
    json!({
        "segmentText": segment_text,
        "choices": if is_end { json!([]) } else { json!(["Open the bottle", "Call the coast guard", "Ignore it and go to bed"]) },
        "isEnd": is_end,
        "imagePrompt": "a foggy lighthouse at dusk",
        "visualContext": {"style": "oil painting", "characters": {"Mara": "a weathered keeper"}, "setting": "rocky coast"},
        "narrativeContext": {"summary": "A bottle appears", "currentObjective": "Investigate", "arcStage": "setup"}
    })
    .to_string()
}

/// Mount an OVH text mock answering with the given draft.
async fn mount_text_success(server: &MockServer, segment_text: &str, is_end: bool) {
    Mock::given(method("POST"))
        .and(path("/api/text_generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "generated_text": draft_json(segment_text, is_end)
        })))
        .mount(server)
        .await;
}

#[cfg(test)]
mod generation_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_story_persists_root_segment() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        mount_text_success(&ovh, "The keeper found a bottle.", false).await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let segment = h
            .segment_engine
            .process(
                GenerateParams::start("a lighthouse keeper finds a message in a bottle", "mystery")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        assert!(segment.parent_segment_id.is_none());
        assert_eq!(segment.choices.len(), 3);
        assert!(!segment.is_end);
        assert_eq!(segment.image_generation_status, GenerationStatus::NotStarted);
        assert_eq!(segment.audio_generation_status, GenerationStatus::NotStarted);

        let story = h
            .storage
            .get_story(&segment.story_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(story.story_mode, "mystery");
        assert_eq!(story.segment_count, 1);
        assert!(!story.is_completed);
        assert_eq!(
            story.title,
            "a lighthouse keeper finds a message in a bottle"
        );
    }

    #[tokio::test]
    async fn test_media_statuses_pending_when_requested() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        mount_text_success(&ovh, "The keeper found a bottle.", false).await;
        // Background tasks will hit these; outcomes are checked elsewhere.
        Mock::given(method("POST"))
            .and(path("/api/text2image"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&ovh)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&openai)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&openai)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let segment = h
            .segment_engine
            .process(GenerateParams::start("a prompt", "fantasy"))
            .await
            .unwrap();

        // The caller sees the durability point, not media completion.
        assert_eq!(segment.image_generation_status, GenerationStatus::Pending);
        assert_eq!(segment.audio_generation_status, GenerationStatus::Pending);
    }

    #[tokio::test]
    async fn test_choice_creates_child_segment() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        mount_text_success(&ovh, "The story continues.", false).await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let root = h
            .segment_engine
            .process(
                GenerateParams::start("a prompt", "mystery")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        let child = h
            .segment_engine
            .process(
                GenerateParams::choose(&root.story_id, &root.id, "Open the bottle")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        assert_eq!(child.parent_segment_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(
            child.triggering_choice_text.as_deref(),
            Some("Open the bottle")
        );
        assert_eq!(child.story_id, root.story_id);
    }

    #[tokio::test]
    async fn test_text_failure_leaves_no_segment_row() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/text_generation"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&ovh)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&openai)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let err = h
            .segment_engine
            .process(GenerateParams::start("a prompt", "mystery"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AllProvidersFailed(_)));

        // The auto-created story exists, but no partial segment does.
        let segment_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM story_segments")
            .fetch_one(h.storage.pool())
            .await
            .unwrap();
        assert_eq!(segment_rows, 0);
    }

    #[tokio::test]
    async fn test_natural_ending_completes_story_and_clears_choices() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        // Provider self-terminates with stray choices; they must be dropped.
        Mock::given(method("POST"))
            .and(path("/api/text_generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "generated_text": json!({
                    "segmentText": "And they lived happily ever after.",
                    "choices": ["stray choice", "another"],
                    "isEnd": true,
                    "imagePrompt": "sunset over the sea"
                })
                .to_string()
            })))
            .mount(&ovh)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let segment = h
            .segment_engine
            .process(
                GenerateParams::start("a prompt", "fantasy")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        assert!(segment.is_end);
        assert!(segment.choices.is_empty());

        let story = h
            .storage
            .get_story(&segment.story_id)
            .await
            .unwrap()
            .unwrap();
        assert!(story.is_completed);
    }

    #[tokio::test]
    async fn test_continuing_completed_story_rejected() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        mount_text_success(&ovh, "The end already happened.", true).await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let ending = h
            .segment_engine
            .process(
                GenerateParams::start("a prompt", "fantasy")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        let err = h
            .segment_engine
            .process(
                GenerateParams::choose(&ending.story_id, &ending.id, "keep going")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoryAlreadyCompleted { .. }));
    }

    #[tokio::test]
    async fn test_invalid_genre_rejected_before_any_call() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/text_generation"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&ovh)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let err = h
            .segment_engine
            .process(GenerateParams::start("a prompt", "vaporwave"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}

#[cfg(test)]
mod rate_limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_rejects_before_provider_invocation() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        // Exactly the admitted requests reach the provider.
        Mock::given(method("POST"))
            .and(path("/api/text_generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "generated_text": draft_json("Segment.", false)
            })))
            .expect(2)
            .mount(&ovh)
            .await;

        let h = harness(
            &openai.uri(),
            &ovh.uri(),
            RateLimitConfig {
                max_requests: 2,
                window_secs: 60,
            },
        )
        .await;

        for _ in 0..2 {
            h.segment_engine
                .process(
                    GenerateParams::start("a prompt", "fantasy")
                        .without_image()
                        .without_audio(),
                )
                .await
                .unwrap();
        }

        let err = h
            .segment_engine
            .process(
                GenerateParams::start("a prompt", "fantasy")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_quota_recovers_after_window() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        mount_text_success(&ovh, "Segment.", false).await;

        let h = harness(
            &openai.uri(),
            &ovh.uri(),
            RateLimitConfig {
                max_requests: 1,
                window_secs: 1,
            },
        )
        .await;

        h.segment_engine
            .process(
                GenerateParams::start("a prompt", "fantasy")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        assert!(h
            .segment_engine
            .process(
                GenerateParams::start("a prompt", "fantasy")
                    .without_image()
                    .without_audio(),
            )
            .await
            .is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        h.segment_engine
            .process(
                GenerateParams::start("a prompt", "fantasy")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod media_task_tests {
    use super::*;

    async fn seed_root(h: &TestHarness, ovh: &MockServer) -> storyloom::storage::StorySegment {
        mount_text_success(ovh, "The keeper found a bottle.", false).await;
        h.segment_engine
            .process(
                GenerateParams::start("a prompt", "mystery")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_image_failure_leaves_segment_readable() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/text2image"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&ovh)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&openai)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;
        let root = seed_root(&h, &ovh).await;

        process_image_generation(h.core.clone(), root.id.clone(), "a prompt".to_string()).await;

        let segment = h.storage.get_segment(&root.id).await.unwrap().unwrap();
        assert_eq!(segment.image_generation_status, GenerationStatus::Failed);
        assert!(segment.image_url.is_none());
        assert!(!segment.segment_text.is_empty());
    }

    #[tokio::test]
    async fn test_empty_prompt_records_failure() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;
        let root = seed_root(&h, &ovh).await;

        process_image_generation(h.core.clone(), root.id.clone(), "  ".to_string()).await;

        let segment = h.storage.get_segment(&root.id).await.unwrap().unwrap();
        assert_eq!(segment.image_generation_status, GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn test_root_image_completion_sets_thumbnail() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/text2image"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&ovh)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;
        let root = seed_root(&h, &ovh).await;

        process_image_generation(h.core.clone(), root.id.clone(), "a prompt".to_string()).await;

        let segment = h.storage.get_segment(&root.id).await.unwrap().unwrap();
        assert_eq!(segment.image_generation_status, GenerationStatus::Completed);
        let image_url = segment.image_url.expect("image url set");

        let story = h.storage.get_story(&root.story_id).await.unwrap().unwrap();
        assert_eq!(story.thumbnail_url.as_deref(), Some(image_url.as_str()));
    }

    #[tokio::test]
    async fn test_child_image_completion_leaves_thumbnail_alone() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/text2image"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&ovh)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;
        let root = seed_root(&h, &ovh).await;
        let child = h
            .segment_engine
            .process(
                GenerateParams::choose(&root.story_id, &root.id, "Open the bottle")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        process_image_generation(h.core.clone(), child.id.clone(), "a prompt".to_string()).await;

        let story = h.storage.get_story(&root.story_id).await.unwrap().unwrap();
        assert!(story.thumbnail_url.is_none());
    }

    #[tokio::test]
    async fn test_retry_overwrites_failed_status() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;
        let root = seed_root(&h, &ovh).await;

        // First run fails (no mocks mounted for image endpoints).
        process_image_generation(h.core.clone(), root.id.clone(), "a prompt".to_string()).await;
        let segment = h.storage.get_segment(&root.id).await.unwrap().unwrap();
        assert_eq!(segment.image_generation_status, GenerationStatus::Failed);

        // Retry is a fresh invocation against the same segment id.
        Mock::given(method("POST"))
            .and(path("/api/text2image"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&ovh)
            .await;
        process_image_generation(h.core.clone(), root.id.clone(), "a prompt".to_string()).await;

        let segment = h.storage.get_segment(&root.id).await.unwrap().unwrap();
        assert_eq!(segment.image_generation_status, GenerationStatus::Completed);
        assert!(segment.image_url.is_some());
    }

    #[tokio::test]
    async fn test_audio_completion_attaches_url() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3-bytes".to_vec()))
            .expect(1)
            .mount(&openai)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;
        let root = seed_root(&h, &ovh).await;

        process_audio_generation(h.core.clone(), root.id.clone(), root.segment_text.clone()).await;

        let segment = h.storage.get_segment(&root.id).await.unwrap().unwrap();
        assert_eq!(segment.audio_generation_status, GenerationStatus::Completed);
        assert!(segment.audio_url.is_some());
    }

    #[tokio::test]
    async fn test_status_transitions_published_to_feed() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/text2image"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&ovh)
            .await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;
        let root = seed_root(&h, &ovh).await;

        let mut rx = h.feed.subscribe();
        process_image_generation(h.core.clone(), root.id.clone(), "a prompt".to_string()).await;

        // First the in_progress update, then completed, then the story
        // thumbnail update.
        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(new) = &event.new {
                if let Some(status) = new.get("image_generation_status") {
                    statuses.push(status.as_str().unwrap_or_default().to_string());
                }
            }
        }
        assert!(statuses.contains(&"in_progress".to_string()));
        assert!(statuses.contains(&"completed".to_string()));
    }
}

#[cfg(test)]
mod finish_tests {
    use super::*;

    async fn mount_prose_ending(server: &MockServer, text: &str) {
        Mock::given(method("POST"))
            .and(path("/api/text_generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "generated_text": text
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_finish_produces_guarded_ending() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        mount_text_success(&ovh, "The keeper found a bottle.", false).await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let root = h
            .segment_engine
            .process(
                GenerateParams::start("a prompt", "mystery")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        // Swap the text mock for a prose conclusion.
        ovh.reset().await;
        mount_prose_ending(&ovh, "The mystery was solved, and the light burned on.").await;

        let ending = h
            .finish_engine
            .process(FinishParams::new(&root.story_id).without_image())
            .await
            .unwrap();

        assert!(ending.is_end);
        assert!(ending.choices.is_empty());
        assert_eq!(ending.parent_segment_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(
            ending.triggering_choice_text.as_deref(),
            Some("End the story")
        );
        assert_eq!(
            ending.segment_text,
            "The mystery was solved, and the light burned on."
        );

        let story = h.storage.get_story(&root.story_id).await.unwrap().unwrap();
        assert!(story.is_completed);
    }

    #[tokio::test]
    async fn test_double_finish_rejected() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;
        mount_text_success(&ovh, "The keeper found a bottle.", false).await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let root = h
            .segment_engine
            .process(
                GenerateParams::start("a prompt", "mystery")
                    .without_image()
                    .without_audio(),
            )
            .await
            .unwrap();

        ovh.reset().await;
        mount_prose_ending(&ovh, "It ended.").await;

        h.finish_engine
            .process(FinishParams::new(&root.story_id).without_image())
            .await
            .unwrap();

        let err = h
            .finish_engine
            .process(FinishParams::new(&root.story_id).without_image())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoryAlreadyCompleted { .. }));

        // Still exactly one ending segment.
        let segments = h.storage.get_story_segments(&root.story_id).await.unwrap();
        assert_eq!(segments.iter().filter(|s| s.is_end).count(), 1);
    }

    #[tokio::test]
    async fn test_finish_empty_story_rejected() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let story = storyloom::storage::Story::new("Empty", "fantasy");
        h.storage.create_story(&story).await.unwrap();

        let err = h
            .finish_engine
            .process(FinishParams::new(&story.id).without_image())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_finish_missing_story_rejected() {
        let ovh = MockServer::start().await;
        let openai = MockServer::start().await;

        let h = harness(&openai.uri(), &ovh.uri(), RateLimitConfig::default()).await;

        let err = h
            .finish_engine
            .process(FinishParams::new("no-such-story").without_image())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
