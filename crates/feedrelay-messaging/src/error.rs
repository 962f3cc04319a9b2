use std::time::Duration;

use feedrelay_core::ChannelId;
use thiserror::Error;

/// Failures reported by a messaging backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagingError {
    /// Identifier is unknown or not visible to this session.
    #[error("not found: {0}")]
    NotFound(String),
    /// The session may not read or write this channel.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not a member of channel {0}")]
    NotJoined(ChannelId),
    /// Size, content or permission rejection on send.
    #[error("send rejected: {0}")]
    SendRejected(String),
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    /// Backend I/O or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for MessagingError {
    fn from(err: std::io::Error) -> Self {
        MessagingError::Transport(err.to_string())
    }
}
