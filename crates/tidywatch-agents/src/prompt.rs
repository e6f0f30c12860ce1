//! Prompts sent to vision providers.
//!
//! Bump `PROMPT_VERSION` whenever the preamble changes so performance
//! records can be correlated with prompt revisions.

use coordination::{PrivacyLevel, TaskReply};
use serde_json::{Map, Value};

pub const PROMPT_VERSION: &str = "1.2.0";

/// System preamble shared by image and metadata prompts.
pub const SYSTEM_PREAMBLE: &str = "\
You are a household tidiness assistant. You look at one room (a \"zone\") and \
produce a short, prioritized list of concrete cleaning tasks that would make it \
tidy.

## Rules
- Only list tasks for things you can actually see or infer from the input.
- Each description is one short imperative sentence (\"Put the shoes on the rack\").
- priority: 1 is most urgent, 5 is least.
- estimated_duration is in whole minutes.
- confidence is between 0 and 1.
- If the room is already tidy, return an empty task list.
- Respond with a single JSON object and nothing else.";

/// Suffix appended when blurred regions are present.
const BLURRED_NOTE: &str = "\
Some regions of the image were blurred for privacy. Ignore blurred areas; do \
not guess what they contain.";

/// Prompt for an image request.
pub fn image_prompt(zone: &str, level: PrivacyLevel, blurred_regions: usize, coordinates: bool) -> String {
    let mut prompt = format!("Zone: {zone}\nAnalyze the attached photo of this zone.\n");
    if level == PrivacyLevel::Sanitized && blurred_regions > 0 {
        prompt.push_str(BLURRED_NOTE);
        prompt.push('\n');
    }
    if coordinates {
        prompt.push_str(
            "For each task, include a bbox with x, y, width and height as fractions (0-1) of the frame.\n",
        );
    }
    push_schema(&mut prompt);
    prompt
}

/// Prompt for a metadata-only request; no pixels are sent.
pub fn metadata_prompt(zone: &str, metadata: &Map<String, Value>) -> String {
    let summary = serde_json::to_string_pretty(metadata).unwrap_or_else(|_| "{}".to_string());
    let mut prompt = format!(
        "Zone: {zone}\n\
         No photo is available. Infer likely tasks from this summary of the \
         frame (dimensions, brightness, edge density, estimated object count, \
         dominant colour). Keep the list short and conservative.\n\n\
         ```json\n{summary}\n```\n"
    );
    push_schema(&mut prompt);
    prompt
}

fn push_schema(prompt: &mut String) {
    prompt.push_str("\nReply with JSON matching this schema:\n```json\n");
    prompt.push_str(&TaskReply::schema_json());
    prompt.push_str("\n```\n");
}
