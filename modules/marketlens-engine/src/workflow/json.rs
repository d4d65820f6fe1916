//! Resilient JSON recovery from language-model output.
//!
//! Models wrap JSON in prose, code fences, or trailing commentary. The
//! extractor collects every balanced brace span (string-aware), tries the
//! largest first, and keeps shrinking until one parses — optionally
//! requiring at least one expected key.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// All balanced `{...}` or `[...]` spans in the text, largest first.
fn balanced_spans(text: &str, open: char, close: char) -> Vec<&str> {
    let bytes: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut starts: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for &(pos, ch) in &bytes {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => starts.push(pos),
            c if c == close => {
                if let Some(start) = starts.pop() {
                    spans.push((start, pos + close.len_utf8()));
                }
            }
            _ => {}
        }
    }

    spans.sort_by_key(|(start, end)| std::cmp::Reverse(end - start));
    spans
        .into_iter()
        .map(|(start, end)| &text[start..end])
        .collect()
}

/// Extract the largest parsable JSON object from free-form text.
pub fn extract_object<T: DeserializeOwned>(text: &str) -> Option<T> {
    for span in balanced_spans(text, '{', '}') {
        if let Ok(value) = serde_json::from_str::<T>(span) {
            return Some(value);
        }
    }
    None
}

/// Like `extract_object`, but a candidate only qualifies when it contains
/// at least one of the expected top-level keys. Guards against picking up
/// an unrelated object embedded in prose.
pub fn extract_object_with_keys<T: DeserializeOwned>(text: &str, keys: &[&str]) -> Option<T> {
    for span in balanced_spans(text, '{', '}') {
        let Ok(value) = serde_json::from_str::<Value>(span) else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };
        if !keys.iter().any(|k| obj.contains_key(*k)) {
            continue;
        }
        if let Ok(typed) = serde_json::from_value::<T>(value) {
            return Some(typed);
        }
    }
    None
}

/// Extract the largest parsable JSON array of `T` from free-form text.
pub fn extract_array<T: DeserializeOwned>(text: &str) -> Option<Vec<T>> {
    for span in balanced_spans(text, '[', ']') {
        if let Ok(value) = serde_json::from_str::<Vec<T>>(span) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        score: f32,
    }

    #[test]
    fn plain_object_parses() {
        let parsed: Sample = extract_object(r#"{"name": "a", "score": 0.5}"#).unwrap();
        assert_eq!(parsed.name, "a");
    }

    #[test]
    fn object_in_prose_with_code_fence() {
        let text = "분석 결과는 다음과 같습니다.\n```json\n{\"name\": \"삼성전자\", \"score\": 0.9}\n```\n이상입니다.";
        let parsed: Sample = extract_object(text).unwrap();
        assert_eq!(parsed.name, "삼성전자");
        assert_eq!(parsed.score, 0.9);
    }

    #[test]
    fn prose_preamble_object_then_trailing_fence() {
        // The S6 recovery case: preamble, valid object, dangling fence.
        let text = "Here is my analysis: {\"why\": {\"causes\": [\"수요 증가\"], \"analysis\": \"설명\"}} ```";
        let parsed = extract_object_with_keys::<Value>(text, &["why", "how", "what_if", "so_what"]);
        assert!(parsed.is_some());
    }

    #[test]
    fn falls_back_to_smaller_span_when_outer_is_invalid() {
        // Outer braces don't parse; the inner object does.
        let text = "{ broken json {\"name\": \"inner\"} more garbage";
        let parsed: Sample = extract_object(text).unwrap();
        assert_eq!(parsed.name, "inner");
    }

    #[test]
    fn key_filter_rejects_unrelated_objects() {
        let text = r#"{"unrelated": true}"#;
        let parsed = extract_object_with_keys::<Value>(text, &["why", "how"]);
        assert!(parsed.is_none());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_matching() {
        let text = r#"{"name": "has { brace } inside", "score": 1.0}"#;
        let parsed: Sample = extract_object(text).unwrap();
        assert_eq!(parsed.name, "has { brace } inside");
    }

    #[test]
    fn array_extraction() {
        let text = "결과:\n[{\"name\": \"a\"}, {\"name\": \"b\"}]\n끝";
        let parsed: Vec<Sample> = extract_array(text).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn no_json_returns_none() {
        assert!(extract_object::<Sample>("그냥 텍스트입니다").is_none());
        assert!(extract_array::<Sample>("배열 없음").is_none());
    }
}
