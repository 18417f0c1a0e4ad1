//! Text utilities shared across crates.
//!
//! These are pure functions with no external dependencies.

/// Truncate text to a maximum character count, adding ellipsis if needed.
///
/// Uses Unicode-aware character counting to handle multi-byte characters correctly.
/// Trims whitespace from input and from truncated output before adding ellipsis.
///
/// # Examples
///
/// ```
/// use promptlab_core::truncate;
///
/// assert_eq!(truncate("hello world", 8), "hello...");
/// assert_eq!(truncate("short", 10), "short");
/// ```
pub fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated.trim_end())
    }
}

/// Truncate text with total character count appended.
///
/// Useful for error messages where knowing the full size helps debugging.
///
/// # Examples
///
/// ```
/// use promptlab_core::truncate_with_count;
///
/// let long_text = "a".repeat(500);
/// let result = truncate_with_count(&long_text, 50);
/// assert!(result.ends_with("(500 chars total)"));
/// ```
pub fn truncate_with_count(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars total)", truncated.trim_end(), char_count)
    }
}

/// Remove one layer of Markdown code fence around a model payload.
///
/// Models asked for JSON frequently answer with a fenced block such as
/// ```` ```json\n{...}\n``` ````. This strips the opening fence, an optional
/// language tag on the same line, and the matching closing fence. Text that
/// does not start with a fence is returned trimmed and otherwise unchanged.
/// Only the outermost fence is removed.
///
/// # Examples
///
/// ```
/// use promptlab_core::strip_code_fence;
///
/// assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
/// assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
/// ```
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json", "JSON", ...) when the fence line has one
    let body = match rest.find('\n') {
        Some(newline) if is_info_string(&rest[..newline]) => &rest[newline + 1..],
        None if is_info_string(rest) => "",
        _ => rest,
    };

    let inner = match body.rfind("```") {
        Some(close) => &body[..close],
        None => body,
    };

    // Single-line form: ```json {"a": 1}```
    let inner = inner.trim();
    match inner.split_once(char::is_whitespace) {
        Some((tag, payload)) if tag.eq_ignore_ascii_case("json") && body.find('\n').is_none() => {
            payload.trim()
        }
        _ => inner,
    }
}

fn is_info_string(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && line.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
