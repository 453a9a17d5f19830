//! Tolerant JSON recovery for LLM output.
//!
//! LLM responses are not contract-stable: a model may wrap its JSON in a
//! fenced code block, leave the fence unterminated, or bury the object in
//! a sentence of commentary. This is a core correctness feature of the
//! pipeline, not a fallback hack — every `LlmClient` operation routes its
//! raw response through here before deserializing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_STRICT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());
static FENCED_FLEXIBLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*)").unwrap());

/// Attempts, in order: direct parse, a strictly-terminated fenced block, a
/// flexibly (unterminated) fenced block, the largest brace-balanced
/// substring, the largest bracket-balanced substring. Returns `None` only
/// if none of those yield valid JSON.
pub fn parse_json_safely(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    if let Some(caps) = FENCED_STRICT.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(v);
        }
    }

    if let Some(caps) = FENCED_FLEXIBLE.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(v);
        }
    }

    if let Some(v) = largest_balanced(trimmed, '{', '}') {
        return Some(v);
    }

    if let Some(v) = largest_balanced(trimmed, '[', ']') {
        return Some(v);
    }

    None
}

/// Finds the largest substring of `text` delimited by balanced `open`/
/// `close` characters that parses as JSON, scanning every possible start
/// position so a lone stray bracket in surrounding prose doesn't break the
/// match.
fn largest_balanced(text: &str, open: char, close: char) -> Option<Value> {
    let chars: Vec<char> = text.chars().collect();
    let mut best: Option<(usize, usize)> = None;

    for start in 0..chars.len() {
        if chars[start] != open {
            continue;
        }
        let mut depth = 0i32;
        for end in start..chars.len() {
            match chars[end] {
                c if c == open => depth += 1,
                c if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        let len = end - start;
                        if best.map(|(s, e)| e - s < len).unwrap_or(true) {
                            best = Some((start, end));
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    best.and_then(|(s, e)| {
        let candidate: String = chars[s..=e].iter().collect();
        serde_json::from_str::<Value>(&candidate).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_json() {
        let v = parse_json_safely(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parses_fenced_json_block() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nHope that helps.";
        let v = parse_json_safely(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parses_unterminated_fenced_block() {
        let raw = "```json\n{\"a\": 1}";
        let v = parse_json_safely(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let raw = "Sure, the result is {\"a\": 1, \"b\": [1,2]} as requested.";
        let v = parse_json_safely(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parses_array_when_no_object_present() {
        let raw = "values: [1, 2, 3] done";
        let v = parse_json_safely(raw).unwrap();
        assert_eq!(v, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn returns_none_for_unrecoverable_garbage() {
        assert!(parse_json_safely("this is not json at all").is_none());
    }

    #[test]
    fn prefers_the_largest_balanced_object() {
        let raw = r#"{"small": 1} and also {"bigger": {"nested": true}}"#;
        let v = parse_json_safely(raw).unwrap();
        assert_eq!(v["bigger"]["nested"], true);
    }
}
