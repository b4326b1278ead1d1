//! src/utils/json.rs
//! Hardened extraction of JSON objects from LLM output.
//!
//! Local models wrap their answer in `<think>` blocks, markdown fences, or
//! conversational preamble. Parsing tolerates all of these by locating the
//! first balanced `{...}` outside string literals.

use serde::de::DeserializeOwned;

/// Parse a JSON object out of raw LLM output.
///
/// Strategy order: drop `<think>...</think>` blocks, try a direct parse of
/// the trimmed remainder, then fall back to the first balanced object.
pub fn parse_llm_object<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let without_think = strip_think_blocks(content);
    let trimmed = without_think.trim();

    if let Ok(v) = serde_json::from_str::<T>(trimmed) {
        return Ok(v);
    }

    if let Some(block) = first_balanced_object(trimmed) {
        match serde_json::from_str::<T>(block) {
            Ok(v) => return Ok(v),
            Err(e) => {
                return Err(format!(
                    "extracted JSON object did not match the expected shape: {e}"
                ));
            }
        }
    }

    let mut preview_end = trimmed.len().min(120);
    while !trimmed.is_char_boundary(preview_end) {
        preview_end -= 1;
    }
    Err(format!(
        "no JSON object found in LLM output (starts: {:?})",
        &trimmed[..preview_end]
    ))
}

/// Remove every `<think>...</think>` block. An unclosed tag drops the rest
/// of the text, which is the safe reading for truncated reasoning output.
fn strip_think_blocks(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("<think>") {
        out.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Find the first balanced `{...}` block, ignoring braces inside JSON
/// string literals and escaped characters.
fn first_balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Decision {
        action: String,
    }

    #[test]
    fn test_parse_plain_object() {
        let d: Decision = parse_llm_object(r#"{"action": "skip"}"#).unwrap();
        assert_eq!(d.action, "skip");
    }

    #[test]
    fn test_parse_with_think_preamble() {
        let input = "<think>\nThe session only read files, nothing to record.\n</think>\n{\"action\": \"skip\"}";
        let d: Decision = parse_llm_object(input).unwrap();
        assert_eq!(d.action, "skip");
    }

    #[test]
    fn test_parse_with_code_fence() {
        let input = "```json\n{\"action\": \"confirm_pattern\"}\n```";
        let d: Decision = parse_llm_object(input).unwrap();
        assert_eq!(d.action, "confirm_pattern");
    }

    #[test]
    fn test_parse_with_prose_wrapping() {
        let input = "Here is the decision:\n{\"action\": \"skip\"}\nLet me know if you need more.";
        let d: Decision = parse_llm_object(input).unwrap();
        assert_eq!(d.action, "skip");
    }

    #[test]
    fn test_parse_nested_object() {
        #[derive(Deserialize)]
        struct Outer {
            inner: Decision,
        }
        let input = r#"noise {"inner": {"action": "skip"}} trailing"#;
        let o: Outer = parse_llm_object(input).unwrap();
        assert_eq!(o.inner.action, "skip");
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        #[derive(Deserialize)]
        struct Msg {
            text: String,
        }
        let input = r#"{"text": "use {braces} and \"quotes\" freely"}"#;
        let m: Msg = parse_llm_object(input).unwrap();
        assert_eq!(m.text, r#"use {braces} and "quotes" freely"#);
    }

    #[test]
    fn test_no_object_is_error() {
        assert!(parse_llm_object::<Decision>("I could not decide.").is_err());
    }

    #[test]
    fn test_unclosed_think_drops_rest() {
        assert!(parse_llm_object::<Decision>("<think>{\"action\": \"skip\"}").is_err());
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let result = parse_llm_object::<Decision>(r#"{"verdict": "yes"}"#);
        assert!(result.is_err());
    }
}
