use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Stable numeric channel identifier assigned by the messaging backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Item identifier. Only meaningful within the channel that issued it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to media attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Backend-specific reference used to download the media.
    pub reference: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl Attachment {
    /// Single path component under which the media may be stored locally.
    ///
    /// Directory parts of `file_name` are discarded. The reference is used
    /// when no usable name remains.
    pub fn local_file_name(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(plain_file_name)
            .or_else(|| plain_file_name(&self.reference))
            .unwrap_or_else(|| "attachment".to_string())
    }
}

fn plain_file_name(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?;
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}

/// Immutable snapshot of one item fetched from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub channel: ChannelId,
    /// Unix seconds at which the backend accepted the item.
    pub timestamp: u64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// Membership changes, pins and other protocol artifacts.
    #[serde(default)]
    pub is_control: bool,
}

impl Item {
    /// Whether the item carries anything worth delivering.
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || self.attachment.is_some()
    }

    /// Whether the item may enter a delivery batch at all.
    pub fn is_deliverable(&self) -> bool {
        !self.is_control && self.has_content()
    }
}

#[cfg(test)]
mod tests {
    use super::{Attachment, ChannelId, Item, ItemId};

    fn item(text: &str, attachment: bool, is_control: bool) -> Item {
        Item {
            id: ItemId(1),
            channel: ChannelId(-1001),
            timestamp: 1_700_000_000,
            text: text.to_string(),
            attachment: attachment.then(|| Attachment {
                reference: "media-1".to_string(),
                file_name: None,
                mime_type: None,
            }),
            is_control,
        }
    }

    #[test]
    fn whitespace_only_text_without_media_has_no_content() {
        assert!(!item("  \n\t", false, false).has_content());
        assert!(item("  \n\t", true, false).has_content());
        assert!(item("hello", false, false).has_content());
    }

    #[test]
    fn control_items_are_never_deliverable() {
        assert!(!item("user joined", false, true).is_deliverable());
        assert!(item("user joined", false, false).is_deliverable());
    }

    #[test]
    fn local_file_name_stays_a_single_component() {
        let named = |name: Option<&str>, reference: &str| Attachment {
            reference: reference.to_string(),
            file_name: name.map(str::to_string),
            mime_type: None,
        };
        assert_eq!(named(Some("clip.mp4"), "r1").local_file_name(), "clip.mp4");
        assert_eq!(
            named(Some("../../escaped.bin"), "r1").local_file_name(),
            "escaped.bin"
        );
        assert_eq!(named(Some("/etc/passwd"), "r1").local_file_name(), "passwd");
        assert_eq!(named(Some(".."), "r1").local_file_name(), "r1");
        assert_eq!(named(Some(""), "r1").local_file_name(), "r1");
        assert_eq!(named(None, "media-7").local_file_name(), "media-7");
        assert_eq!(named(Some(".."), "../").local_file_name(), "attachment");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&item("x", false, false)).expect("encode");
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"channel\":-1001"));
    }
}
