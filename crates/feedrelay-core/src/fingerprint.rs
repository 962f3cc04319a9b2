use std::fmt;

use serde::{Deserialize, Serialize};

use crate::text::{normalize_text, LinkExtractor};
use crate::types::Item;

/// Default number of normalized characters used for text fingerprints.
pub const DEFAULT_PREFIX_LEN: usize = 50;

/// Derived dedup key. Two items with the same fingerprint are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How fingerprints are derived from item content.
#[derive(Debug, Clone)]
pub struct FingerprintRules {
    links: LinkExtractor,
    prefix_len: usize,
}

impl FingerprintRules {
    pub fn new(links: LinkExtractor, prefix_len: usize) -> Self {
        Self {
            links,
            prefix_len: prefix_len.max(1),
        }
    }

    pub fn links(&self) -> &LinkExtractor {
        &self.links
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Link-based key, used by reconciliation and intra-batch dedup.
    pub fn link_of(&self, item: &Item) -> Option<Fingerprint> {
        if item.is_control {
            return None;
        }
        self.links.extract(&item.text).map(Fingerprint)
    }

    /// Full fingerprint: the embedded link if present, else a text prefix.
    pub fn fingerprint(&self, item: &Item) -> Option<Fingerprint> {
        if item.is_control {
            return None;
        }
        if let Some(link) = self.link_of(item) {
            return Some(link);
        }
        let normalized = normalize_text(&item.text);
        if normalized.is_empty() {
            return None;
        }
        Some(Fingerprint(
            normalized.chars().take(self.prefix_len).collect(),
        ))
    }
}

impl Default for FingerprintRules {
    fn default() -> Self {
        Self::new(LinkExtractor::default(), DEFAULT_PREFIX_LEN)
    }
}
