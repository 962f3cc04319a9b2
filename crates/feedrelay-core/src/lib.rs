//! Core feedrelay primitives shared across crates.
//!
//! Includes channel/item types, source references, text normalization,
//! link extraction, content fingerprints, and base errors.

pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod source;
pub mod text;
pub mod types;

pub use error::CoreError;
pub use fingerprint::{Fingerprint, FingerprintRules, DEFAULT_PREFIX_LEN};
pub use source::SourceRef;
pub use text::{normalize_text, LinkExtractor, DEFAULT_LINK_PATTERN};
pub use types::{Attachment, ChannelId, Item, ItemId};
