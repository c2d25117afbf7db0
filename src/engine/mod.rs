//! Generation orchestrators.
//!
//! This module provides the [`EngineCore`] struct that centralizes the
//! dependencies shared by the orchestrators (storage, provider router,
//! media store, change feed, rate limiter), plus the segment and
//! completion engines and the background media tasks.

mod finish;
mod media_tasks;
mod segment;

pub use finish::{FinishEngine, FinishParams};
pub use media_tasks::{process_audio_generation, process_image_generation};
pub use segment::{GenerateParams, SegmentEngine};

use std::sync::Arc;

use crate::events::ChangeFeed;
use crate::media::MediaStore;
use crate::providers::ProviderRouter;
use crate::rate_limit::RateLimiter;
use crate::storage::SqliteStorage;

/// Core infrastructure shared by the generation orchestrators.
///
/// Composed into each engine to avoid duplicating these common fields, and
/// cheap to clone into detached background tasks.
#[derive(Clone)]
pub struct EngineCore {
    /// Storage backend for persisting stories and segments.
    storage: SqliteStorage,
    /// Provider selection policy for all capabilities.
    router: ProviderRouter,
    /// Object store for generated media bytes.
    media: Arc<dyn MediaStore>,
    /// Row-change notification feed.
    feed: ChangeFeed,
    /// Per-user generation quota.
    limiter: Arc<dyn RateLimiter>,
}

impl EngineCore {
    /// Create a new engine core with the given dependencies.
    pub fn new(
        storage: SqliteStorage,
        router: ProviderRouter,
        media: Arc<dyn MediaStore>,
        feed: ChangeFeed,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            storage,
            router,
            media,
            feed,
            limiter,
        }
    }

    /// Get a reference to the storage backend.
    #[inline]
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get a reference to the provider router.
    #[inline]
    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Get a reference to the media store.
    #[inline]
    pub fn media(&self) -> &dyn MediaStore {
        self.media.as_ref()
    }

    /// Get a reference to the change feed.
    #[inline]
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Get a reference to the rate limiter.
    #[inline]
    pub fn limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }
}
