//! Server module for RPC protocol handling.
//!
//! This module provides:
//! - JSON-RPC 2.0 server over stdio for the web gateway
//! - Request handlers and routing
//! - Shared application state management

mod handlers;
mod rpc;

pub use handlers::*;
pub use rpc::*;

use std::sync::Arc;

use crate::config::Config;
use crate::engine::{EngineCore, FinishEngine, SegmentEngine};
use crate::events::ChangeFeed;
use crate::media::MediaStore;
use crate::providers::ProviderRouter;
use crate::rate_limit::RateLimiter;
use crate::storage::SqliteStorage;

/// Application state shared across handlers.
///
/// Contains the orchestration engines and the shared resources they are
/// built from.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Row-change notification feed.
    pub feed: ChangeFeed,
    /// Segment generation orchestrator.
    pub segment_engine: SegmentEngine,
    /// Story completion orchestrator.
    pub finish_engine: FinishEngine,
    /// Shared engine dependencies, for background-task entry points.
    pub core: EngineCore,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: Config,
        storage: SqliteStorage,
        router: ProviderRouter,
        media: Arc<dyn MediaStore>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let feed = ChangeFeed::default();
        let core = EngineCore::new(storage.clone(), router, media, feed.clone(), limiter);
        let segment_engine = SegmentEngine::new(core.clone());
        let finish_engine = FinishEngine::new(core.clone());

        Self {
            config,
            storage,
            feed,
            segment_engine,
            finish_engine,
            core,
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
