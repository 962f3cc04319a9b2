use std::path::{Path, PathBuf};

use feedrelay_core::{ChannelId, Item, ItemId};

use crate::error::MessagingError;

/// One page of channel history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryQuery {
    /// Items with id strictly greater than `after`, oldest first.
    After { after: ItemId, limit: usize },
    /// Items with id strictly less than `before` (newest when `None`), newest first.
    Before { before: Option<ItemId>, limit: usize },
}

/// Messaging backend contract used by the pipeline.
///
/// Session setup is the backend's own concern; by the time a value
/// implementing this trait exists it is ready to serve calls.
#[allow(async_fn_in_trait)]
pub trait MessagingService {
    /// Resolves a handle, invite link or numeric id to a channel id.
    async fn resolve(&self, identifier: &str) -> Result<ChannelId, MessagingError>;

    /// Returns one page of history. Use [`crate::items_since`] or
    /// [`crate::recent_items`] for transparent pagination.
    async fn history(
        &self,
        channel: ChannelId,
        query: HistoryQuery,
    ) -> Result<Vec<Item>, MessagingError>;

    /// Posts text and an optional local file, returning the new item id.
    async fn send(
        &self,
        channel: ChannelId,
        text: &str,
        attachment: Option<&Path>,
    ) -> Result<ItemId, MessagingError>;

    /// Downloads the item's attachment into `dir`, returning the file path.
    async fn download(&self, item: &Item, dir: &Path) -> Result<PathBuf, MessagingError>;

    /// Bulk delete. Not atomic: a failure may leave some ids deleted.
    async fn delete(&self, channel: ChannelId, ids: &[ItemId]) -> Result<(), MessagingError>;

    /// Largest id list accepted by one [`MessagingService::delete`] call.
    fn max_delete_batch(&self) -> usize {
        100
    }
}
