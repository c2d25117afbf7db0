//! Centralized prompt definitions for the generation pipeline
//!
//! This module contains all system prompts sent to text providers.
//! Centralizing prompts makes them easier to maintain, test, and version.

/// System prompt for segment generation.
///
/// Demands the structured JSON contract that [`crate::providers::SegmentDraft`]
/// deserializes, including refreshed context objects to carry forward.
pub const SEGMENT_SYSTEM_PROMPT: &str = r#"You are a master storyteller AI. Generate immersive story segments in JSON format.

REQUIREMENTS:
- Generate 120-200 words for rich, detailed storytelling
- Create exactly 3 meaningful choices that advance the plot
- Include detailed image descriptions for visual consistency
- DO NOT include choice prompts, transitions, or references to choices within the segmentText
- The segmentText should end naturally as part of the story narrative
- Choices will be presented separately as interactive buttons
- MAINTAIN CONSISTENCY with previous story segments and established characters
- CONTINUE the narrative flow naturally from the previous context

Response format (EXACT JSON):
{
  "segmentText": "A 120-200 word story segment with vivid descriptions that ends naturally without any choice prompts",
  "choices": ["Choice 1", "Choice 2", "Choice 3"],
  "isEnd": false,
  "imagePrompt": "Detailed scene description for image generation consistent with established visual style",
  "visualContext": {"style": "established art style", "characters": {"name": "description"}, "setting": "current location"},
  "narrativeContext": {"summary": "updated story summary", "currentObjective": "next goal", "arcStage": "setup|development|climax|resolution"}
}

Always respond with valid JSON only, no other text."#;

/// System prompt for ending generation.
///
/// Endings are plain prose; the orchestrator forces the end flag and empty
/// choices itself rather than trusting the model to self-terminate.
pub const ENDING_SYSTEM_PROMPT: &str =
    "You are a master storyteller. Generate compelling story content with proper conclusions.";

/// Fallback image prompt used when a conclusion draft arrives without one.
pub const ENDING_IMAGE_PROMPT: &str =
    "Epic conclusion scene, cinematic lighting, fantasy illustration style";
