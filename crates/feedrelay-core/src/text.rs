use regex::Regex;

use crate::error::CoreError;

/// Default resource link pattern: any http(s) URL up to the next whitespace.
pub const DEFAULT_LINK_PATTERN: &str = r#"https?://[^\s<>"'`]+"#;

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '"', '\''];

/// Lowercases and collapses all whitespace runs into single spaces.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Extracts the first embedded resource link from item text.
///
/// If the pattern defines a capture group, group 1 is the link; otherwise the
/// whole match is. Trailing sentence punctuation is stripped so that
/// `see https://x.io/a.` and `https://x.io/a` yield the same key.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    pattern: Regex,
}

impl LinkExtractor {
    pub fn new(pattern: &str) -> Result<Self, CoreError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn extract(&self, text: &str) -> Option<String> {
        let caps = self.pattern.captures(text)?;
        let raw = caps.get(1).or_else(|| caps.get(0))?.as_str();
        let link = raw.trim_end_matches(TRAILING_PUNCTUATION);
        (!link.is_empty()).then(|| link.to_string())
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_LINK_PATTERN).expect("default link pattern is valid"),
        }
    }
}
