use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::ChannelId;

const LINK_PREFIXES: &[&str] = &[
    "https://t.me/",
    "http://t.me/",
    "https://telegram.me/",
    "http://telegram.me/",
    "t.me/",
    "telegram.me/",
];

/// A configured source, before resolution to a [`ChannelId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceRef {
    /// Numeric id, used as-is without a directory lookup.
    Id(ChannelId),
    /// Public handle, without the leading `@`.
    Handle(String),
    /// Private invite hash, without the leading `+`.
    Invite(String),
}

impl SourceRef {
    /// The string handed to the directory service for resolution.
    pub fn lookup_key(&self) -> String {
        match self {
            SourceRef::Id(id) => id.to_string(),
            SourceRef::Handle(handle) => handle.clone(),
            SourceRef::Invite(hash) => format!("https://t.me/+{hash}"),
        }
    }

    /// Already-known channel id, if no lookup is needed.
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            SourceRef::Id(id) => Some(*id),
            _ => None,
        }
    }
}

impl FromStr for SourceRef {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        // "+digits" is an invite hash, not a signed id.
        if !trimmed.starts_with('+') {
            if let Ok(id) = trimmed.parse::<i64>() {
                return Ok(SourceRef::Id(ChannelId(id)));
            }
        }
        let mut rest = trimmed;
        for prefix in LINK_PREFIXES {
            if let Some(stripped) = rest.strip_prefix(prefix) {
                rest = stripped;
                break;
            }
        }
        let rest = rest.trim_end_matches('/');
        if let Some(hash) = rest
            .strip_prefix('+')
            .or_else(|| rest.strip_prefix("joinchat/"))
        {
            if hash.is_empty() {
                return Err(CoreError::InvalidInput(format!("empty invite hash in {raw:?}")));
            }
            return Ok(SourceRef::Invite(hash.to_string()));
        }
        let handle = rest.strip_prefix('@').unwrap_or(rest);
        if handle.is_empty() || handle.contains(char::is_whitespace) || handle.contains('/') {
            return Err(CoreError::InvalidInput(format!("unrecognized source {raw:?}")));
        }
        Ok(SourceRef::Handle(handle.to_string()))
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Id(id) => write!(f, "{id}"),
            SourceRef::Handle(handle) => write!(f, "@{handle}"),
            SourceRef::Invite(hash) => write!(f, "+{hash}"),
        }
    }
}
