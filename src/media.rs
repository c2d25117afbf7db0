//! Durable object storage for generated media.
//!
//! Provider adapters hand back raw bytes; the background tasks push them
//! here and persist the returned public URL on the segment row.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::error::MediaResult;

/// Object store for generated media bytes.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store image bytes, returning the public URL.
    async fn put_image(&self, story_id: &str, segment_id: &str, bytes: &[u8])
        -> MediaResult<String>;

    /// Store audio bytes, returning the public URL.
    async fn put_audio(&self, story_id: &str, segment_id: &str, bytes: &[u8])
        -> MediaResult<String>;
}

/// Filesystem-backed media store.
///
/// Objects land under the configured root and are addressed through a
/// public base URL served by the front-end proxy.
#[derive(Clone)]
pub struct FsMediaStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsMediaStore {
    /// Create a new filesystem media store
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            root: config.root.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn put(&self, file_name: &str, bytes: &[u8]) -> MediaResult<String> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.root.join(file_name);
        tokio::fs::write(&path, bytes).await?;

        let url = format!("{}/{}", self.public_base_url, file_name);
        debug!(path = %path.display(), url = %url, "Stored media object");
        Ok(url)
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn put_image(
        &self,
        story_id: &str,
        segment_id: &str,
        bytes: &[u8],
    ) -> MediaResult<String> {
        let file_name = format!(
            "story-{}-segment-{}-{}.png",
            story_id,
            segment_id,
            Uuid::new_v4()
        );
        self.put(&file_name, bytes).await
    }

    async fn put_audio(
        &self,
        story_id: &str,
        segment_id: &str,
        bytes: &[u8],
    ) -> MediaResult<String> {
        let file_name = format!(
            "story-{}-segment-{}-{}.mp3",
            story_id,
            segment_id,
            Uuid::new_v4()
        );
        self.put(&file_name, bytes).await
    }
}
