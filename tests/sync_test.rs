//! Tests for the client-side cache reconciliation layer

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use pretty_assertions::assert_eq;

use storyloom::events::{ChangeEvent, ChangeFeed};
use storyloom::storage::{GenerationStatus, SqliteStorage, Storage, Story, StorySegment};
use storyloom::sync::{spawn_reconciliation_burst, ApplyOutcome, StoryCache, StorySync};

async fn seeded_storage() -> (SqliteStorage, Story, StorySegment) {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let story = Story::new("The Lighthouse", "mystery");
    storage.create_story(&story).await.unwrap();
    let segment = StorySegment::new(&story.id, "It began on a foggy night.")
        .with_choices(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        .with_image_status(GenerationStatus::Pending);
    storage.create_segment(&segment).await.unwrap();
    (storage, story, segment)
}

fn completed_image_event(segment: &StorySegment, url: &str) -> ChangeEvent {
    let mut updated = segment.clone();
    updated.image_url = Some(url.to_string());
    updated.image_generation_status = GenerationStatus::Completed;
    ChangeEvent::segment_update(&updated)
}

#[cfg(test)]
mod apply_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_then_update_keeps_single_entry() {
        let (_storage, story, segment) = seeded_storage().await;
        let mut cache = StoryCache::new(&story.id);

        assert_eq!(
            cache.apply_event(&ChangeEvent::segment_insert(&segment)),
            ApplyOutcome::Updated
        );
        assert_eq!(cache.story_segments().len(), 1);

        let event = completed_image_event(&segment, "http://media/img.png");
        assert_eq!(cache.apply_event(&event), ApplyOutcome::ImageCompleted);

        assert_eq!(cache.story_segments().len(), 1);
        let cached = cache.segment(&segment.id).unwrap();
        assert_eq!(cached.image_url.as_deref(), Some("http://media/img.png"));
        assert_eq!(
            cached.image_generation_status,
            GenerationStatus::Completed
        );
        // Both views agree.
        assert_eq!(
            cache.story_segments()[0].image_url,
            cached.image_url.clone()
        );
    }

    #[tokio::test]
    async fn test_applying_same_payload_twice_is_idempotent() {
        let (_storage, story, segment) = seeded_storage().await;
        let mut cache = StoryCache::new(&story.id);
        cache.apply_event(&ChangeEvent::segment_insert(&segment));

        let event = completed_image_event(&segment, "http://media/img.png");
        assert_eq!(cache.apply_event(&event), ApplyOutcome::ImageCompleted);

        // Redundant notification: no-op, no flicker, no duplicates.
        assert_eq!(cache.apply_event(&event), ApplyOutcome::Ignored);
        assert_eq!(cache.story_segments().len(), 1);
        assert_eq!(
            cache
                .segment(&segment.id)
                .unwrap()
                .image_url
                .as_deref(),
            Some("http://media/img.png")
        );
    }

    #[tokio::test]
    async fn test_unchanged_image_url_is_ignored() {
        let (_storage, story, segment) = seeded_storage().await;
        let mut cache = StoryCache::new(&story.id);
        cache.apply_event(&ChangeEvent::segment_insert(&segment));

        // Same URL and statuses as the cached entry.
        assert_eq!(
            cache.apply_event(&ChangeEvent::segment_update(&segment)),
            ApplyOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_other_story_ignored() {
        let (_storage, _story, segment) = seeded_storage().await;
        let mut cache = StoryCache::new("a-different-story");

        assert_eq!(
            cache.apply_event(&ChangeEvent::segment_insert(&segment)),
            ApplyOutcome::Ignored
        );
        assert!(cache.story_segments().is_empty());
    }

    #[tokio::test]
    async fn test_story_table_events_ignored() {
        let (_storage, story, _segment) = seeded_storage().await;
        let mut cache = StoryCache::new(&story.id);

        assert_eq!(
            cache.apply_event(&ChangeEvent::story_update(&story)),
            ApplyOutcome::Ignored
        );
    }
}

#[cfg(test)]
mod reconcile_tests {
    use super::*;

    #[tokio::test]
    async fn test_reconcile_replaces_cache_with_authoritative_state() {
        let (storage, story, segment) = seeded_storage().await;

        let mut cache = StoryCache::new(&story.id);
        assert!(cache.story_segments().is_empty());

        cache.reconcile(&storage).await.unwrap();
        assert_eq!(cache.story_segments().len(), 1);
        assert_eq!(
            cache.segment(&segment.id).unwrap().segment_text,
            "It began on a foggy night."
        );
    }

    #[tokio::test]
    async fn test_story_sync_follows_feed() {
        let (storage, story, segment) = seeded_storage().await;
        let feed = ChangeFeed::default();

        let sync = StorySync::new(&story.id, storage.clone())
            .with_reconcile_delays(vec![Duration::from_millis(5)]);
        let cache = sync.cache();
        let handle = sync.spawn(&feed);

        feed.publish(ChangeEvent::segment_insert(&segment));
        feed.publish(completed_image_event(&segment, "http://media/img.png"));

        // Give the subscriber task a moment to drain the feed.
        tokio::time::sleep(Duration::from_millis(100)).await;

        {
            let cache = cache.lock().await;
            let cached = cache.segment(&segment.id).expect("segment cached");
            // The burst reconciled against the store, which still has the
            // pending status; the authoritative state wins.
            assert_eq!(cached.segment_text, "It began on a foggy night.");
        }

        drop(feed);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconciliation_burst_converges_to_store() {
        let (storage, story, segment) = seeded_storage().await;

        let cache = Arc::new(Mutex::new(StoryCache::new(&story.id)));

        // The store moves on after the notification was delivered.
        storage
            .update_segment_image(
                &segment.id,
                Some("http://media/late.png"),
                GenerationStatus::Completed,
            )
            .await
            .unwrap();

        let handle = spawn_reconciliation_burst(
            Arc::clone(&cache),
            storage.clone(),
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30),
            ],
        );
        handle.await.unwrap();

        let cache = cache.lock().await;
        assert_eq!(
            cache
                .segment(&segment.id)
                .unwrap()
                .image_url
                .as_deref(),
            Some("http://media/late.png")
        );
    }
}
