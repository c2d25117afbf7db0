use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SharedState;
use crate::context::{PromptAssembler, VisualContext};
use crate::engine::{process_audio_generation, process_image_generation, FinishParams, GenerateParams};
use crate::error::{RpcError, RpcResult};
use crate::storage::{Storage, Story, StorySegment};

/// Segment shape returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentView {
    pub id: String,
    /// Duplicate of `id`, kept for callers that address segments this way.
    pub segment_id: String,
    pub story_id: String,
    pub text: String,
    pub image_url: String,
    pub choices: Vec<String>,
    pub is_end: bool,
    pub image_generation_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub audio_generation_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_segment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggering_choice_text: Option<String>,
    pub word_count: i64,
    pub created_at: String,
}

impl From<StorySegment> for SegmentView {
    fn from(segment: StorySegment) -> Self {
        Self {
            segment_id: segment.id.clone(),
            id: segment.id,
            story_id: segment.story_id,
            text: segment.segment_text,
            image_url: segment.image_url.unwrap_or_default(),
            choices: segment.choices,
            is_end: segment.is_end,
            image_generation_status: segment.image_generation_status.to_string(),
            audio_url: segment.audio_url,
            audio_generation_status: segment.audio_generation_status.to_string(),
            parent_segment_id: segment.parent_segment_id,
            triggering_choice_text: segment.triggering_choice_text,
            word_count: segment.word_count,
            created_at: segment.created_at.to_rfc3339(),
        }
    }
}

/// Story shape returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryView {
    pub id: String,
    pub title: String,
    pub story_mode: String,
    pub is_public: bool,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub segment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_story_audio_url: Option<String>,
    pub audio_generation_status: String,
    pub created_at: String,
}

impl From<Story> for StoryView {
    fn from(story: Story) -> Self {
        Self {
            id: story.id,
            title: story.title,
            story_mode: story.story_mode,
            is_public: story.is_public,
            is_completed: story.is_completed,
            thumbnail_url: story.thumbnail_url,
            segment_count: story.segment_count,
            full_story_audio_url: story.full_story_audio_url,
            audio_generation_status: story.audio_generation_status.to_string(),
            created_at: story.created_at.to_rfc3339(),
        }
    }
}

/// Route method calls to the appropriate handlers
pub async fn handle_method(
    state: &SharedState,
    method: &str,
    params: Option<Value>,
) -> RpcResult<Value> {
    info!(method = %method, "Routing request");

    match method {
        "story.generate" => handle_generate(state, params).await,
        "story.finish" => handle_finish(state, params).await,
        "story.get" => handle_story_get(state, params).await,
        "story.delete" => handle_story_delete(state, params).await,
        "segment.get" => handle_segment_get(state, params).await,
        "segment.regenerate_image" => handle_regenerate_image(state, params).await,
        "segment.regenerate_audio" => handle_regenerate_audio(state, params).await,
        _ => Err(RpcError::UnknownMethod {
            method: method.to_string(),
        }),
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> RpcResult<T> {
    let params = params.unwrap_or(Value::Object(Default::default()));
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams {
        method: method.to_string(),
        message: e.to_string(),
    })
}

fn success_envelope(key: &str, value: Value) -> Value {
    let mut envelope = serde_json::Map::new();
    envelope.insert("success".to_string(), Value::Bool(true));
    envelope.insert(key.to_string(), value);
    Value::Object(envelope)
}

fn error_envelope(message: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": message.to_string() })
}

/// Handle story.generate
async fn handle_generate(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: GenerateParams = parse_params("story.generate", params)?;

    match state.segment_engine.process(params).await {
        Ok(segment) => Ok(success_envelope(
            "data",
            serde_json::to_value(SegmentView::from(segment))?,
        )),
        Err(e) => Ok(error_envelope(e)),
    }
}

/// Handle story.finish
async fn handle_finish(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: FinishParams = parse_params("story.finish", params)?;

    match state.finish_engine.process(params).await {
        Ok(segment) => Ok(success_envelope(
            "endingSegment",
            serde_json::to_value(SegmentView::from(segment))?,
        )),
        Err(e) => Ok(error_envelope(e)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryGetParams {
    story_id: String,
}

/// Handle story.get
async fn handle_story_get(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: StoryGetParams = parse_params("story.get", params)?;

    let story = match state.storage.get_story(&params.story_id).await {
        Ok(Some(story)) => story,
        Ok(None) => return Ok(error_envelope(format!("Story not found: {}", params.story_id))),
        Err(e) => return Ok(error_envelope(e)),
    };

    let segments = match state.storage.get_story_segments(&params.story_id).await {
        Ok(segments) => segments,
        Err(e) => return Ok(error_envelope(e)),
    };

    let views: Vec<SegmentView> = segments.into_iter().map(SegmentView::from).collect();
    Ok(success_envelope(
        "data",
        json!({
            "story": StoryView::from(story),
            "segments": views,
        }),
    ))
}

/// Handle story.delete
///
/// Removes the story and its entire segment tree; the only path that
/// deletes segments.
async fn handle_story_delete(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: StoryGetParams = parse_params("story.delete", params)?;

    let story = match state.storage.get_story(&params.story_id).await {
        Ok(Some(story)) => story,
        Ok(None) => {
            return Ok(error_envelope(format!(
                "Story not found: {}",
                params.story_id
            )))
        }
        Err(e) => return Ok(error_envelope(e)),
    };

    match state.storage.delete_story(&story.id).await {
        Ok(()) => {
            state
                .feed
                .publish(crate::events::ChangeEvent::story_delete(&story));
            Ok(json!({ "success": true, "message": "Story deleted" }))
        }
        Err(e) => Ok(error_envelope(e)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentGetParams {
    segment_id: String,
}

/// Handle segment.get
async fn handle_segment_get(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: SegmentGetParams = parse_params("segment.get", params)?;

    match state.storage.get_segment(&params.segment_id).await {
        Ok(Some(segment)) => Ok(success_envelope(
            "data",
            serde_json::to_value(SegmentView::from(segment))?,
        )),
        Ok(None) => Ok(error_envelope(format!(
            "Segment not found: {}",
            params.segment_id
        ))),
        Err(e) => Ok(error_envelope(e)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegenerateImageParams {
    segment_id: String,
    image_prompt: String,
}

/// Handle segment.regenerate_image
///
/// A manual retry: re-runs the background image procedure against the
/// same segment id, overwriting the status and, on success, the URL.
async fn handle_regenerate_image(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: RegenerateImageParams = parse_params("segment.regenerate_image", params)?;

    if params.image_prompt.trim().is_empty() {
        return Ok(error_envelope("imagePrompt is required"));
    }

    match state.storage.get_segment(&params.segment_id).await {
        Ok(Some(segment)) => {
            let prompt =
                PromptAssembler::enhance_image_prompt(&params.image_prompt, &VisualContext::default());
            tokio::spawn(process_image_generation(
                state.core.clone(),
                segment.id,
                prompt,
            ));
            Ok(json!({ "success": true, "message": "Image regeneration scheduled" }))
        }
        Ok(None) => Ok(error_envelope(format!(
            "Segment not found: {}",
            params.segment_id
        ))),
        Err(e) => Ok(error_envelope(e)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegenerateAudioParams {
    segment_id: String,
}

/// Handle segment.regenerate_audio
async fn handle_regenerate_audio(state: &SharedState, params: Option<Value>) -> RpcResult<Value> {
    let params: RegenerateAudioParams = parse_params("segment.regenerate_audio", params)?;

    match state.storage.get_segment(&params.segment_id).await {
        Ok(Some(segment)) => {
            tokio::spawn(process_audio_generation(
                state.core.clone(),
                segment.id,
                segment.segment_text,
            ));
            Ok(json!({ "success": true, "message": "Audio regeneration scheduled" }))
        }
        Ok(None) => Ok(error_envelope(format!(
            "Segment not found: {}",
            params.segment_id
        ))),
        Err(e) => Ok(error_envelope(e)),
    }
}
