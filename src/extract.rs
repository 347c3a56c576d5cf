//! Structured-output recovery for free-form generator replies.
//!
//! Generators are asked for pure JSON but routinely wrap it in prose or
//! markdown fences. Recovery runs in three steps:
//!
//! 1. Strip fence markers (```` ``` ```` / ```` ```json ````) but keep any
//!    text on the same line.
//! 2. For every `{`, walk forward with a depth counter that ignores braces
//!    inside string literals, and try a strict parse of each balanced slice.
//!    The first slice that deserializes into the target type wins.
//! 3. In loose mode only, slice from the first `{`/`[` to the last matching
//!    `}`/`]` and try once more.

use serde::de::DeserializeOwned;

use crate::errors::ExtractionError;

/// How much latitude the extractor has when no balanced candidate parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Strict,
    Loose,
}

/// Recover the first value of type `T` embedded in `text`.
pub fn extract_json<T: DeserializeOwned>(text: &str, mode: ExtractMode) -> Result<T, ExtractionError> {
    let stripped = strip_code_fences(text);

    let mut last_schema_error = None;
    for candidate in balanced_objects(&stripped) {
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value) => match serde_json::from_value::<T>(value) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => last_schema_error = Some(e),
            },
            Err(_) => continue,
        }
    }

    if mode == ExtractMode::Loose
        && let Some(slice) = loose_slice(&stripped)
    {
        match serde_json::from_str::<T>(slice) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => last_schema_error = last_schema_error.or(Some(e)),
        }
    }

    Err(match last_schema_error {
        Some(e) => ExtractionError::Schema(e),
        None => ExtractionError::NoCandidate,
    })
}

/// Remove markdown fence markers, keeping any content that shares a line
/// with them. An opening marker takes its language tag with it.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter_map(|line| {
            let mut rest = line;
            let mut fenced = false;
            if let Some(after) = rest.trim_start().strip_prefix(FENCE) {
                rest = after.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || "-_+".contains(c));
                fenced = true;
            }
            if let Some(before) = rest.trim_end().strip_suffix(FENCE) {
                rest = before;
                fenced = true;
            }
            if fenced && rest.trim().is_empty() {
                None
            } else {
                Some(if fenced { rest.trim() } else { line })
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const FENCE: &str = "```";

/// Every balanced `{...}` slice of `text`, ordered by starting position.
///
/// Braces inside JSON string literals (including escaped quotes) do not
/// affect nesting depth.
pub fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|&(_, ch)| ch == '{')
        .filter_map(move |(start, _)| matching_close(text, start).map(|end| &text[start..end]))
}

/// Byte offset one past the `}` that closes the `{` at `start`.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// First `{` or `[` through the last matching closer.
fn loose_slice(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}
