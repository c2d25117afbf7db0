//! Client-side cache reconciliation.
//!
//! Maintains a local view of one story's segments that converges to the
//! server state from change notifications, without fixed-interval polling.
//! Media completion (especially images, which take seconds) becomes
//! visible by overwriting the cache entry directly rather than
//! invalidating and refetching, and both the per-segment view and the
//! story's segment list stay consistent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::events::{ChangeEvent, ChangeFeed, EventType, TableName};
use crate::storage::{GenerationStatus, SqliteStorage, Storage, StorySegment};

/// Delays of the post-completion reconciliation burst, measured from the
/// completion notification.
///
/// Absorbs eventual-consistency lag between the notification and the
/// durable read path; with a strongly consistent store the extra passes
/// are harmless no-ops.
pub const RECONCILE_DELAYS: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_millis(500),
    Duration::from_millis(1000),
];

/// Result of applying one notification to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Event was for another story, another table, or changed nothing.
    Ignored,
    /// Cache entries were overwritten.
    Updated,
    /// Cache updated and the segment's image just reached `completed`;
    /// the caller should run a reconciliation burst.
    ImageCompleted,
}

/// Local cache of one story's segments.
#[derive(Debug)]
pub struct StoryCache {
    story_id: String,
    /// Per-segment view keyed by segment id.
    segments: HashMap<String, StorySegment>,
    /// The story's segment list view, insertion-ordered.
    story_segments: Vec<StorySegment>,
}

impl StoryCache {
    /// Create an empty cache for a story
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            segments: HashMap::new(),
            story_segments: Vec::new(),
        }
    }

    /// The story this cache tracks.
    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    /// Look up one cached segment.
    pub fn segment(&self, id: &str) -> Option<&StorySegment> {
        self.segments.get(id)
    }

    /// The cached segment list view.
    pub fn story_segments(&self) -> &[StorySegment] {
        &self.story_segments
    }

    /// Apply one change notification.
    ///
    /// Applying the same payload twice is a no-op the second time: the
    /// cache state is compared before anything is overwritten, so
    /// redundant notifications cause no duplicate entries and no flicker.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> ApplyOutcome {
        if event.table != TableName::StorySegments {
            return ApplyOutcome::Ignored;
        }
        if event.story_id() != Some(self.story_id.as_str()) {
            return ApplyOutcome::Ignored;
        }
        let incoming: StorySegment = match event
            .new
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
        {
            Some(segment) => segment,
            None => return ApplyOutcome::Ignored,
        };

        match event.event_type {
            EventType::Delete => {
                if let Some(removed) = self.segments.remove(&incoming.id) {
                    self.story_segments.retain(|s| s.id != removed.id);
                    return ApplyOutcome::Updated;
                }
                ApplyOutcome::Ignored
            }
            EventType::Insert | EventType::Update => self.upsert(incoming),
        }
    }

    fn upsert(&mut self, incoming: StorySegment) -> ApplyOutcome {
        if let Some(cached) = self.segments.get(&incoming.id) {
            if cached.image_url == incoming.image_url
                && cached.image_generation_status == incoming.image_generation_status
                && cached.audio_url == incoming.audio_url
                && cached.audio_generation_status == incoming.audio_generation_status
            {
                return ApplyOutcome::Ignored;
            }
        }

        let image_completed = incoming.image_generation_status == GenerationStatus::Completed
            && incoming.image_url.is_some()
            && self
                .segments
                .get(&incoming.id)
                .map(|cached| cached.image_url != incoming.image_url)
                .unwrap_or(true);

        debug!(
            segment_id = %incoming.id,
            image_status = %incoming.image_generation_status,
            "Overwriting cached segment"
        );

        // Overwrite both views directly; no invalidation round-trip.
        if let Some(entry) = self
            .story_segments
            .iter_mut()
            .find(|s| s.id == incoming.id)
        {
            *entry = incoming.clone();
        } else {
            self.story_segments.push(incoming.clone());
        }
        self.segments.insert(incoming.id.clone(), incoming);

        if image_completed {
            ApplyOutcome::ImageCompleted
        } else {
            ApplyOutcome::Updated
        }
    }

    /// Replace the cache with the authoritative store's state.
    pub async fn reconcile(&mut self, storage: &SqliteStorage) -> StorageResult<()> {
        let segments = storage.get_story_segments(&self.story_id).await?;
        self.segments = segments
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        self.story_segments = segments;
        Ok(())
    }
}

/// Drives a [`StoryCache`] from a change feed.
pub struct StorySync {
    cache: Arc<Mutex<StoryCache>>,
    storage: SqliteStorage,
    reconcile_delays: Vec<Duration>,
}

impl StorySync {
    /// Create a sync layer for one story
    pub fn new(story_id: impl Into<String>, storage: SqliteStorage) -> Self {
        Self {
            cache: Arc::new(Mutex::new(StoryCache::new(story_id))),
            storage,
            reconcile_delays: RECONCILE_DELAYS.to_vec(),
        }
    }

    /// Override the reconciliation burst schedule (tests)
    pub fn with_reconcile_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconcile_delays = delays;
        self
    }

    /// Shared handle to the underlying cache.
    pub fn cache(&self) -> Arc<Mutex<StoryCache>> {
        Arc::clone(&self.cache)
    }

    /// Subscribe to the feed and reconcile until the feed closes.
    pub fn spawn(self, feed: &ChangeFeed) -> JoinHandle<()> {
        let mut rx = feed.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let outcome = self.cache.lock().await.apply_event(&event);
                        if outcome == ApplyOutcome::ImageCompleted {
                            spawn_reconciliation_burst(
                                Arc::clone(&self.cache),
                                self.storage.clone(),
                                self.reconcile_delays.clone(),
                            );
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Sync layer lagged behind the feed, reconciling");
                        if let Err(e) = self.cache.lock().await.reconcile(&self.storage).await {
                            warn!(error = %e, "Reconciliation after lag failed");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Run a short burst of delayed reconciliation passes against the
/// authoritative store.
pub fn spawn_reconciliation_burst(
    cache: Arc<Mutex<StoryCache>>,
    storage: SqliteStorage,
    delays: Vec<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut elapsed = Duration::ZERO;
        for delay in delays {
            tokio::time::sleep(delay.saturating_sub(elapsed)).await;
            elapsed = delay;
            if let Err(e) = cache.lock().await.reconcile(&storage).await {
                warn!(error = %e, "Reconciliation pass failed");
            }
        }
    })
}
