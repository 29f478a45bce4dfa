//! Text processing utilities.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
static EPISODE_PREFIX_RE: OnceLock<Regex> = OnceLock::new();
static TRAILING_NUMBER_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

fn episode_prefix_re() -> &'static Regex {
    EPISODE_PREFIX_RE
        .get_or_init(|| Regex::new(r"[Ee][Pp](?:[Ii][Ss][Oo][Dd][Ee])?[_\-]?(\d+)").expect("static regex is valid"))
}

fn trailing_number_re() -> &'static Regex {
    TRAILING_NUMBER_RE.get_or_init(|| Regex::new(r"(\d+)$").expect("static regex is valid"))
}

/// Replace consecutive whitespace (spaces, tabs, newlines) with a single space
/// and trim leading/trailing whitespace.
pub fn normalize_whitespace(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Truncate `s` to at most `max_len` characters (not bytes), appending `"..."`
/// when something was cut. `max_len <= 3` yields only dots.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }

    let cut = s
        .char_indices()
        .nth(max_len - 3)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    format!("{}...", &s[..cut])
}

/// Extract the first JSON object or array from a potentially markdown-wrapped
/// LLM response.
///
/// Tries, in order:
/// 1. ` ```json ... ``` ` fenced code block
/// 2. ` ``` ... ``` ` fenced code block
/// 3. Bare `{...}` or `[...]` delimited by the first `{`/`[` and last `}`/`]`
pub fn extract_json_from_response(s: &str) -> Option<&str> {
    if let Some(inner) = extract_fenced_block(s, "```json") {
        return Some(inner);
    }
    if let Some(inner) = extract_fenced_block(s, "```") {
        return Some(inner);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (s.find(open), s.rfind(close)) {
            if end > start {
                return Some(&s[start..=end]);
            }
        }
    }

    None
}

/// Extract content inside a fenced code block starting with `fence`.
fn extract_fenced_block<'a>(s: &'a str, fence: &str) -> Option<&'a str> {
    let after_fence = s.find(fence)? + fence.len();
    let content_start = after_fence + s[after_fence..].find('\n')? + 1;
    let close = s[content_start..].find("```")?;
    let content = s[content_start..content_start + close].trim();

    (!content.is_empty()).then_some(content)
}

/// Pull the episode index out of a node name.
///
/// Recognises `Episode_3`, `episode-12`, `Ep7`, `EP_2`, and falls back to a
/// trailing number (`clip 9`). Returns `None` when no index is present.
pub fn extract_episode_index(name: &str) -> Option<u64> {
    episode_prefix_re()
        .captures(name)
        .or_else(|| trailing_number_re().captures(name))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}
