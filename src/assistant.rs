//! Contract for an external text generation service, and parsing of its
//! replies. No client ships here.

use std::collections::HashMap;
use std::error::Error;

use serde_json::Value;
use tracing::{debug, warn};

use crate::timing::STEPS_PER_BAR;

pub const DEFAULT_GENRE: &str = "Melodic Techno";

pub const DEFAULT_ADVICE: &str =
    "Hello producer! Ask me for mixing tips or arrangement ideas.";

/// System instruction for advice requests.
pub const ADVICE_INSTRUCTION: &str = "You are a world-class music producer. \
    Give concise, technical, and inspiring advice.";

/// Step rows keyed by track ordinal.
pub type GeneratedSteps = HashMap<usize, [bool; STEPS_PER_BAR]>;

pub trait PatternGenerator {
    /// Returns the raw reply to a pattern request.
    fn generate_pattern(&self, genre: &str, tracks: usize) -> Result<String, Box<dyn Error>>;

    /// Returns free-form advice for a prompt.
    fn advise(&self, prompt: &str) -> Result<String, Box<dyn Error>>;
}

/// Prompt text for a pattern request.
pub fn pattern_prompt(genre: &str, tracks: usize) -> String {
    format!("Generate a {genre} drum pattern for {tracks} tracks over {STEPS_PER_BAR} steps. \
        Return a JSON object where keys are track indices (0 to {}) \
        and values are arrays of {STEPS_PER_BAR} booleans representing the sequence.",
        tracks.saturating_sub(1))
}

/// Prompt text for an advice request.
pub fn advice_prompt(prompt: &str) -> String {
    format!("{ADVICE_INSTRUCTION}\n\n{}", prompt.trim())
}

/// Remove a surrounding markdown code fence, if present.
fn strip_fence(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else { return s };
    // drop the info string, e.g. "json"
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Validate a pattern reply for a project with `tracks` tracks. Keys must be
/// track ordinals and values must be arrays of 16 booleans. Ordinals past
/// the last track are ignored.
pub fn parse_pattern_response(text: &str, tracks: usize
) -> Result<GeneratedSteps, Box<dyn Error>> {
    let value: Value = serde_json::from_str(strip_fence(text))?;
    let object = value.as_object().ok_or("pattern reply is not an object")?;
    let mut steps = HashMap::new();

    for (key, row) in object {
        let index: usize = key.trim().parse()
            .map_err(|_| format!("invalid track index: {key:?}"))?;
        let row: Vec<bool> = serde_json::from_value(row.clone())
            .map_err(|_| format!("track {index} is not a boolean array"))?;
        let row: [bool; STEPS_PER_BAR] = row.try_into()
            .map_err(|row: Vec<bool>| {
                format!("track {index} has {} steps, expected {STEPS_PER_BAR}", row.len())
            })?;
        if index < tracks {
            steps.insert(index, row);
        } else {
            debug!(index, tracks, "ignoring generated row for missing track");
        }
    }

    Ok(steps)
}

/// Ask `generator` for a pattern and validate the reply.
pub fn request_pattern(generator: &dyn PatternGenerator, genre: &str, tracks: usize
) -> Result<GeneratedSteps, Box<dyn Error>> {
    let reply = generator.generate_pattern(genre, tracks)?;
    parse_pattern_response(&reply, tracks).inspect_err(|e| {
        warn!("rejected pattern reply: {e}");
    })
}
