//! Carried-forward generation context and prompt assembly.
//!
//! Visual and narrative context keep illustrations and plot coherent across
//! segments without resending the full transcript. Both are required-field
//! value structs so a malformed provider response cannot silently drop
//! fields on its way into the next request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::prompts::{ENDING_SYSTEM_PROMPT, SEGMENT_SYSTEM_PROMPT};
use crate::providers::ChatMessage;

/// Number of trailing segments included in a continuation prompt.
///
/// Bounds the payload size; everything older is summarized through the
/// narrative context instead.
pub const CONTEXT_WINDOW: usize = 3;

/// Image prompts are truncated to the tightest vendor limit.
const IMAGE_PROMPT_MAX_CHARS: usize = 4000;

/// Visual continuity state threaded through every generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualContext {
    /// Established art style descriptor.
    #[serde(default)]
    pub style: String,
    /// Character name mapped to its visual description.
    #[serde(default)]
    pub characters: BTreeMap<String, String>,
    /// Current location description.
    #[serde(default)]
    pub setting: String,
}

impl Default for VisualContext {
    fn default() -> Self {
        Self {
            style: "epic fantasy illustration, digital art, cinematic lighting, high detail"
                .to_string(),
            characters: BTreeMap::new(),
            setting: String::new(),
        }
    }
}

/// Narrative continuity state threaded through every generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeContext {
    /// Rolling story summary.
    #[serde(default)]
    pub summary: String,
    /// What the story is currently driving toward.
    #[serde(default)]
    pub current_objective: String,
    /// Coarse narrative-position tag.
    #[serde(default)]
    pub arc_stage: ArcStage,
}

impl Default for NarrativeContext {
    fn default() -> Self {
        Self {
            summary: "Beginning of story".to_string(),
            current_objective: "Continue the adventure".to_string(),
            arc_stage: ArcStage::Setup,
        }
    }
}

/// Coarse narrative-position tag used to steer generation tone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcStage {
    #[default]
    Setup,
    Development,
    Climax,
    Resolution,
}

impl ArcStage {
    /// Heuristic stage for a story with `segment_count` persisted segments.
    pub fn for_segment_count(segment_count: usize) -> Self {
        match segment_count {
            0 => ArcStage::Setup,
            1..=5 => ArcStage::Development,
            _ => ArcStage::Climax,
        }
    }
}

impl std::fmt::Display for ArcStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArcStage::Setup => write!(f, "setup"),
            ArcStage::Development => write!(f, "development"),
            ArcStage::Climax => write!(f, "climax"),
            ArcStage::Resolution => write!(f, "resolution"),
        }
    }
}

impl std::str::FromStr for ArcStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "setup" => Ok(ArcStage::Setup),
            "development" => Ok(ArcStage::Development),
            "climax" => Ok(ArcStage::Climax),
            "resolution" => Ok(ArcStage::Resolution),
            _ => Err(format!("Unknown arc stage: {}", s)),
        }
    }
}

/// Builds outbound text generation payloads from user input and carried
/// context.
pub struct PromptAssembler;

impl PromptAssembler {
    /// Messages for a story's first segment: no prior context exists.
    pub fn opening(prompt: &str, mode: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(SEGMENT_SYSTEM_PROMPT),
            ChatMessage::user(format!("Start a new {} story: \"{}\"", mode, prompt)),
        ]
    }

    /// Messages for a continuation segment.
    ///
    /// `window` holds the trailing segment texts, oldest first, already
    /// bounded to [`CONTEXT_WINDOW`].
    pub fn continuation(
        choice_text: &str,
        window: &[String],
        visual: &VisualContext,
        narrative: &NarrativeContext,
    ) -> Vec<ChatMessage> {
        let mut user_prompt = format!("Continue the story. User chose: \"{}\"", choice_text);

        if !window.is_empty() {
            user_prompt.push_str("\n\nPREVIOUS STORY CONTEXT:\n");
            let context: Vec<String> = window
                .iter()
                .enumerate()
                .map(|(index, text)| format!("Segment {}: {}", index + 1, text))
                .collect();
            user_prompt.push_str(&context.join("\n\n"));
        }

        let characters: Vec<String> = visual
            .characters
            .iter()
            .map(|(name, desc)| format!("{}: {}", name, desc))
            .collect();
        if !characters.is_empty() {
            user_prompt.push_str(&format!(
                "\n\nCHARACTERS TO MAINTAIN: {}",
                characters.join(", ")
            ));
        }
        if !visual.setting.is_empty() {
            user_prompt.push_str(&format!("\nSETTING: {}", visual.setting));
        }
        if !visual.style.is_empty() {
            user_prompt.push_str(&format!("\nART STYLE: {}", visual.style));
        }

        user_prompt.push_str(&format!(
            "\n\nNARRATIVE CONTEXT:\n- Story Summary: {}\n- Current Objective: {}\n- Story Arc Stage: {}",
            narrative.summary, narrative.current_objective, narrative.arc_stage
        ));

        vec![
            ChatMessage::system(SEGMENT_SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ]
    }

    /// Messages for the closing segment: the full transcript plus an
    /// explicit instruction to conclude.
    pub fn ending(mode: &str, transcript: &str) -> Vec<ChatMessage> {
        let user_prompt = format!(
            "Write a satisfying conclusion to this {} story.\n\n\
             Complete story so far:\n{}\n\n\
             Create a proper ending that:\n\
             - Brings the story to a meaningful close\n\
             - Resolves the main conflict or journey\n\
             - Provides closure for the characters\n\
             - Matches the tone and style of the story\n\
             - Is 100-150 words\n\
             - Does NOT include any choices (this is the ending)\n\n\
             Write only the conclusion segment text.",
            mode, transcript
        );

        vec![
            ChatMessage::system(ENDING_SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ]
    }

    /// Augment a raw image prompt with visual continuity descriptors.
    pub fn enhance_image_prompt(prompt: &str, visual: &VisualContext) -> String {
        let mut enhanced = prompt.to_string();

        let characters: Vec<String> = visual
            .characters
            .iter()
            .map(|(name, desc)| format!("{}: {}", name, desc))
            .collect();
        if !characters.is_empty() {
            enhanced = format!("{} - Characters: {}", enhanced, characters.join(", "));
        }

        if !visual.style.is_empty() {
            enhanced = format!("{} - Art style: {}", enhanced, visual.style);
        }

        enhanced = format!(
            "High quality digital illustration, detailed and vibrant: {}. \
             Professional storybook art style, consistent character design.",
            enhanced
        );

        if enhanced.len() > IMAGE_PROMPT_MAX_CHARS {
            enhanced.truncate(IMAGE_PROMPT_MAX_CHARS);
        }

        enhanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arc_stage_heuristic() {
        assert_eq!(ArcStage::for_segment_count(0), ArcStage::Setup);
        assert_eq!(ArcStage::for_segment_count(1), ArcStage::Development);
        assert_eq!(ArcStage::for_segment_count(5), ArcStage::Development);
        assert_eq!(ArcStage::for_segment_count(6), ArcStage::Climax);
    }

    #[test]
    fn test_arc_stage_round_trip() {
        for stage in [
            ArcStage::Setup,
            ArcStage::Development,
            ArcStage::Climax,
            ArcStage::Resolution,
        ] {
            assert_eq!(stage.to_string().parse::<ArcStage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_opening_has_no_context_blocks() {
        let messages = PromptAssembler::opening("a lighthouse keeper", "mystery");
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("Start a new mystery story"));
        assert!(!messages[1].content.contains("PREVIOUS STORY CONTEXT"));
    }

    #[test]
    fn test_continuation_includes_window_and_contexts() {
        let mut visual = VisualContext::default();
        visual
            .characters
            .insert("Mara".to_string(), "a weathered keeper".to_string());
        visual.setting = "rocky coast".to_string();
        let narrative = NarrativeContext {
            summary: "Keeper found a bottle".to_string(),
            current_objective: "Decode the message".to_string(),
            arc_stage: ArcStage::Development,
        };

        let window = vec!["First part.".to_string(), "Second part.".to_string()];
        let messages =
            PromptAssembler::continuation("Open the bottle", &window, &visual, &narrative);

        let user = &messages[1].content;
        assert!(user.contains("User chose: \"Open the bottle\""));
        assert!(user.contains("Segment 1: First part."));
        assert!(user.contains("Segment 2: Second part."));
        assert!(user.contains("Mara: a weathered keeper"));
        assert!(user.contains("SETTING: rocky coast"));
        assert!(user.contains("Story Arc Stage: development"));
    }

    #[test]
    fn test_enhanced_image_prompt_composition() {
        let mut visual = VisualContext::default();
        visual
            .characters
            .insert("Mara".to_string(), "a weathered keeper".to_string());

        let enhanced = PromptAssembler::enhance_image_prompt("a foggy lighthouse", &visual);
        assert!(enhanced.contains("a foggy lighthouse"));
        assert!(enhanced.contains("Characters: Mara: a weathered keeper"));
        assert!(enhanced.contains("Art style:"));
        assert!(enhanced.starts_with("High quality digital illustration"));
    }

    #[test]
    fn test_enhanced_image_prompt_truncated() {
        let visual = VisualContext::default();
        let long_prompt = "x".repeat(5000);
        let enhanced = PromptAssembler::enhance_image_prompt(&long_prompt, &visual);
        assert!(enhanced.len() <= 4000);
    }
}
