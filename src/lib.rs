//! # Storyloom Generation Service
//!
//! Backend service for an AI-powered interactive storytelling application:
//! users pick a genre and seed prompt, the service generates narrative
//! segments with illustrations and optional narration, and branches the
//! story through user choices until an ending is reached.
//!
//! ## Features
//!
//! - **Multi-provider pipeline**: text, image, and narration adapters with
//!   primary/fallback selection per capability
//! - **Branching stories**: a persisted segment tree with a single root and
//!   guarded leaf inserts, so concurrent choices cannot fork a story
//! - **Background media**: image and audio generation run detached from the
//!   request, surfacing through status fields and change notifications
//! - **Client sync**: a cache layer that converges on server state from
//!   row-change events without interval polling
//! - **Abuse guard**: per-user sliding-window rate limiting
//!
//! ## Architecture
//!
//! ```text
//! Gateway → RPC Server (stdio) → Engines → Provider Router (HTTP)
//!                    ↓               ↓
//!              SQLite (state)   Media store
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use storyloom::{AppState, Config, RpcServer};
//! use storyloom::media::FsMediaStore;
//! use storyloom::providers::ProviderRouter;
//! use storyloom::rate_limit::SlidingWindowLimiter;
//! use storyloom::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let router = ProviderRouter::from_config(&config)?;
//!     let media = Arc::new(FsMediaStore::new(&config.media));
//!     let limiter = Arc::new(SlidingWindowLimiter::new(config.rate_limit));
//!     let state = Arc::new(AppState::new(config, storage, router, media, limiter));
//!     RpcServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management for the service.
pub mod config;
/// Generation context and prompt assembly.
pub mod context;
/// Generation orchestrators and background media tasks.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// Row-change notification feed.
pub mod events;
/// Durable object storage for generated media.
pub mod media;
/// System prompts for text providers.
pub mod prompts;
/// Content provider adapters and the selection policy.
pub mod providers;
/// Per-user rate limiting.
pub mod rate_limit;
/// RPC server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;
/// Client-side cache reconciliation.
pub mod sync;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, RpcServer, SharedState};
