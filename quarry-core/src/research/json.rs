//! Defensive JSON parsing of model output.
//!
//! Models wrap JSON in code fences, surround it with prose, or emit trailing
//! commas and bare keys. `parse_model_json` tries an ordered list of
//! strategies and accepts the first candidate that deserializes into the
//! requested type.

use serde::de::DeserializeOwned;

/// The model output could not be turned into the requested shape.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason} (raw: {preview})")]
pub struct JsonExtractError {
    pub reason: String,
    /// First 200 characters of the raw output.
    pub preview: String,
}

/// A parsing strategy, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    ObjectSpan,
    ArraySpan,
    Repaired,
}

/// Parse model output into `T`, returning the value and the strategy that worked.
pub fn parse_model_json_with_strategy<T: DeserializeOwned>(
    raw: &str,
) -> Result<(T, Strategy), JsonExtractError> {
    let body = strip_code_fences(raw);
    let mut last_error = String::from("empty response");

    let mut attempt = |candidate: &str, strategy: Strategy| -> Option<(T, Strategy)> {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => Some((value, strategy)),
            Err(e) => {
                last_error = e.to_string();
                None
            }
        }
    };

    if body.trim().is_empty() {
        return Err(error(raw, "empty response"));
    }
    if let Some(found) = attempt(body, Strategy::Direct) {
        return Ok(found);
    }
    let object = greedy_span(body, '{', '}');
    if let Some(span) = object
        && let Some(found) = attempt(span, Strategy::ObjectSpan)
    {
        return Ok(found);
    }
    let array = greedy_span(body, '[', ']');
    if let Some(span) = array
        && let Some(found) = attempt(span, Strategy::ArraySpan)
    {
        return Ok(found);
    }
    let repair_target = object.or(array).unwrap_or(body);
    if let Some(found) = attempt(&repair_json(repair_target), Strategy::Repaired) {
        return Ok(found);
    }

    Err(error(raw, &last_error))
}

/// Parse model output into `T` using fences, direct, span, and repair strategies.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, JsonExtractError> {
    parse_model_json_with_strategy(raw).map(|(value, _)| value)
}

fn error(raw: &str, reason: &str) -> JsonExtractError {
    JsonExtractError {
        reason: reason.to_string(),
        preview: preview(raw, 200),
    }
}

/// First `max` characters of `text`, with an ellipsis if cut.
pub fn preview(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max).collect();
        format!("{cut}...")
    }
}

/// Return the contents of the first fenced code block, or the trimmed input.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_ticks = &trimmed[open + 3..];
    // Skip the language tag line ("json", "JSON", ...).
    let content_start = after_ticks.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after_ticks[content_start..];
    match content.find("```") {
        Some(close) => content[..close].trim(),
        None => content.trim(),
    }
}

/// Span from the first `open` to the last `close`, inclusive.
fn greedy_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Light syntax repair: drop trailing commas and quote bare object keys.
///
/// String literals are copied untouched, so commas and colons inside values
/// survive.
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    // Last non-whitespace character emitted outside a string.
    let mut last = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last = Some('"');
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ',' if matches!(next_significant(&chars, i + 1), Some('}' | ']')) => {
                i += 1;
            }
            c if (c.is_ascii_alphabetic() || c == '_') && matches!(last, Some('{' | ',')) => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
                last = chars.get(i - 1).copied();
            }
            c => {
                out.push(c);
                if !c.is_whitespace() {
                    last = Some(c);
                }
                i += 1;
            }
        }
    }
    out
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars.get(from..)?.iter().copied().find(|c| !c.is_whitespace())
}
