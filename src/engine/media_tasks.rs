//! Detached media generation tasks.
//!
//! These run after the segment row is durably persisted and never
//! propagate errors: every failure path funnels into a status-field
//! update on the segment so readers see `failed` instead of a crashed
//! task. Retrying is a brand-new invocation against the same segment id,
//! overwriting the status and, on success, the content URL.

use std::time::Instant;
use tracing::{error, info, warn};

use super::EngineCore;
use crate::events::ChangeEvent;
use crate::providers::{ImageRequest, SpeechRequest};
use crate::storage::{GenerationStatus, Storage};

/// Generate, store, and attach an illustration for a persisted segment.
///
/// Completing the root segment's image also writes the story thumbnail.
pub async fn process_image_generation(core: EngineCore, segment_id: String, image_prompt: String) {
    info!(segment_id = %segment_id, "Starting image background task");
    let start = Instant::now();

    if image_prompt.trim().is_empty() {
        record_image_failure(&core, &segment_id, "no image prompt provided").await;
        return;
    }

    if let Err(e) = core
        .storage()
        .update_segment_image(&segment_id, None, GenerationStatus::InProgress)
        .await
    {
        warn!(segment_id = %segment_id, error = %e, "Failed to set image status to in_progress");
    } else {
        publish_segment_update(&core, &segment_id).await;
    }

    let bytes = match core
        .router()
        .generate_image(&ImageRequest {
            prompt: image_prompt,
        })
        .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            record_image_failure(&core, &segment_id, &e.to_string()).await;
            return;
        }
    };

    info!(
        segment_id = %segment_id,
        size = bytes.len(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Image generated, uploading to storage"
    );

    let segment = match core.storage().get_segment(&segment_id).await {
        Ok(Some(segment)) => segment,
        Ok(None) => {
            warn!(segment_id = %segment_id, "Segment vanished before image upload");
            return;
        }
        Err(e) => {
            record_image_failure(&core, &segment_id, &e.to_string()).await;
            return;
        }
    };

    let url = match core
        .media()
        .put_image(&segment.story_id, &segment_id, &bytes)
        .await
    {
        Ok(url) => url,
        Err(e) => {
            record_image_failure(&core, &segment_id, &e.to_string()).await;
            return;
        }
    };

    if let Err(e) = core
        .storage()
        .update_segment_image(&segment_id, Some(&url), GenerationStatus::Completed)
        .await
    {
        error!(segment_id = %segment_id, error = %e, "Failed to attach image URL");
        return;
    }
    publish_segment_update(&core, &segment_id).await;

    // The root segment's illustration doubles as the story thumbnail.
    if segment.parent_segment_id.is_none() {
        match core
            .storage()
            .update_story_thumbnail(&segment.story_id, &url)
            .await
        {
            Ok(()) => {
                publish_story_update(&core, &segment.story_id).await;
                info!(story_id = %segment.story_id, "Story thumbnail updated");
            }
            Err(e) => {
                warn!(story_id = %segment.story_id, error = %e, "Failed to update story thumbnail");
            }
        }
    }

    info!(
        segment_id = %segment_id,
        url = %url,
        total_ms = start.elapsed().as_millis() as u64,
        "Image background task completed"
    );
}

/// Generate, store, and attach narration audio for a persisted segment.
pub async fn process_audio_generation(core: EngineCore, segment_id: String, narration_text: String) {
    info!(segment_id = %segment_id, "Starting audio background task");
    let start = Instant::now();

    if narration_text.trim().is_empty() {
        record_audio_failure(&core, &segment_id, "no narration text").await;
        return;
    }

    if let Err(e) = core
        .storage()
        .update_segment_audio(&segment_id, None, GenerationStatus::InProgress)
        .await
    {
        warn!(segment_id = %segment_id, error = %e, "Failed to set audio status to in_progress");
    } else {
        publish_segment_update(&core, &segment_id).await;
    }

    let bytes = match core
        .router()
        .synthesize_narration(&SpeechRequest {
            text: narration_text,
        })
        .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            record_audio_failure(&core, &segment_id, &e.to_string()).await;
            return;
        }
    };

    let segment = match core.storage().get_segment(&segment_id).await {
        Ok(Some(segment)) => segment,
        Ok(None) => {
            warn!(segment_id = %segment_id, "Segment vanished before audio upload");
            return;
        }
        Err(e) => {
            record_audio_failure(&core, &segment_id, &e.to_string()).await;
            return;
        }
    };

    let url = match core
        .media()
        .put_audio(&segment.story_id, &segment_id, &bytes)
        .await
    {
        Ok(url) => url,
        Err(e) => {
            record_audio_failure(&core, &segment_id, &e.to_string()).await;
            return;
        }
    };

    if let Err(e) = core
        .storage()
        .update_segment_audio(&segment_id, Some(&url), GenerationStatus::Completed)
        .await
    {
        error!(segment_id = %segment_id, error = %e, "Failed to attach audio URL");
        return;
    }
    publish_segment_update(&core, &segment_id).await;

    info!(
        segment_id = %segment_id,
        url = %url,
        total_ms = start.elapsed().as_millis() as u64,
        "Audio background task completed"
    );
}

async fn record_image_failure(core: &EngineCore, segment_id: &str, reason: &str) {
    warn!(segment_id = %segment_id, reason = %reason, "Image generation failed");
    if let Err(e) = core
        .storage()
        .update_segment_image(segment_id, None, GenerationStatus::Failed)
        .await
    {
        error!(segment_id = %segment_id, error = %e, "Failed to record image failure status");
        return;
    }
    publish_segment_update(core, segment_id).await;
}

async fn record_audio_failure(core: &EngineCore, segment_id: &str, reason: &str) {
    warn!(segment_id = %segment_id, reason = %reason, "Audio generation failed");
    if let Err(e) = core
        .storage()
        .update_segment_audio(segment_id, None, GenerationStatus::Failed)
        .await
    {
        error!(segment_id = %segment_id, error = %e, "Failed to record audio failure status");
        return;
    }
    publish_segment_update(core, segment_id).await;
}

async fn publish_segment_update(core: &EngineCore, segment_id: &str) {
    if let Ok(Some(segment)) = core.storage().get_segment(segment_id).await {
        core.feed().publish(ChangeEvent::segment_update(&segment));
    }
}

async fn publish_story_update(core: &EngineCore, story_id: &str) {
    if let Ok(Some(story)) = core.storage().get_story(story_id).await {
        core.feed().publish(ChangeEvent::story_update(&story));
    }
}
