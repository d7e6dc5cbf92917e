//! Best-effort URL and step detection for the submission banner. Never fails.

use std::sync::LazyLock;

use regex::Regex;

static URL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"https?://\S+"));
static STEP_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?i)^(\d+[.)]|[-*•]|step|then|click|enter|go to)"));
static NUMBER_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"^\d+[.)]\s*"));
static BULLET_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"^[-*•]\s*"));

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(error) => {
            tracing::warn!(pattern, error = %error, "extraction pattern failed to compile");
            None
        }
    }
}

/// First `http(s)` URL in `text`.
pub fn extract_url(text: &str) -> Option<&str> {
    URL_PATTERN
        .as_ref()?
        .find(text)
        .map(|found| found.as_str())
}

/// Lines that look like user-flow steps, trimmed, in input order.
pub fn extract_steps(text: &str) -> Vec<String> {
    let Some(pattern) = STEP_PATTERN.as_ref() else {
        return Vec::new();
    };

    text.lines()
        .map(str::trim)
        .filter(|line| pattern.is_match(line))
        .map(str::to_string)
        .collect()
}

/// Step text without its list markers: a leading number first, then a bullet.
pub fn step_label(step: &str) -> &str {
    strip_marker(&BULLET_MARKER, strip_marker(&NUMBER_MARKER, step))
}

fn strip_marker<'a>(marker: &LazyLock<Option<Regex>>, text: &'a str) -> &'a str {
    match marker.as_ref().and_then(|marker| marker.find(text)) {
        Some(found) => &text[found.end()..],
        None => text,
    }
}
