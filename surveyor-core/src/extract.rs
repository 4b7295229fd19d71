//! Tolerant JSON extraction from free-text model output.
//!
//! Model replies are rarely bare JSON. Extraction tries, in order: fenced
//! code blocks, the first balanced `{...}` span, and the whole trimmed text.
//! When nothing deserializes, the caller's neutral default is returned
//! together with the raw text. Extraction never fails.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").ok());

/// Outcome of parsing model text into `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    /// The text contained a value of the expected shape.
    Structured(T),
    /// Nothing parsed; `value` holds neutral defaults.
    Fallback { raw_text: String, value: T },
}

impl<T> Extracted<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Structured(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Structured(value) | Self::Fallback { value, .. } => value,
        }
    }

    /// Raw text when extraction fell back.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::Structured(_) => None,
            Self::Fallback { raw_text, .. } => Some(raw_text),
        }
    }
}

/// Extract `T`, falling back to `T::default()`.
pub fn extract_json<T: DeserializeOwned + Default>(text: &str) -> Extracted<T> {
    extract_json_or(text, T::default)
}

/// Extract `T`, falling back to `fallback()`.
pub fn extract_json_or<T, F>(text: &str, fallback: F) -> Extracted<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    for candidate in candidates(text) {
        if let Ok(value) = serde_json::from_str::<T>(candidate) {
            return Extracted::Structured(value);
        }
    }
    Extracted::Fallback {
        raw_text: text.to_string(),
        value: fallback(),
    }
}

fn candidates(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    if let Some(re) = FENCED_BLOCK.as_ref() {
        out.extend(
            re.captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty()),
        );
    }
    if let Some(span) = balanced_object(text) {
        out.push(span);
    }
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
    out
}

/// First `{...}` span with balanced braces, ignoring braces inside strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
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
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
