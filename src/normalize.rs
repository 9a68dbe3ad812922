//! Text canonicalization applied to every title/body before scoring.

use regex::Regex;
use std::sync::LazyLock;

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\s\S]*?```").expect("code block pattern is valid"));

static URL_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http\S+|www\.\S+").expect("url pattern is valid"));

/// Canonicalize text for lexical comparison.
///
/// Lowercases, drops fenced code blocks and URL-like tokens, turns anything
/// outside `[a-z0-9]` into a separator and collapses runs of whitespace.
/// The output only contains `[a-z0-9 ]` with single inner spaces, so
/// `normalize(normalize(x)) == normalize(x)`.
///
/// Fences are removed before URLs: removing a fence first can join the text
/// around it, and that joined text must still go through URL stripping.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let lowered = text.to_lowercase();
    let without_code = CODE_BLOCK.replace_all(&lowered, "");
    let without_urls = URL_LIKE.replace_all(&without_code, "");

    let cleaned: String = without_urls
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize an optional body, treating `None` like an empty string.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}
