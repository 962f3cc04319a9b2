use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use feedrelay_core::{Attachment, ChannelId, Item, ItemId};

use crate::error::MessagingError;
use crate::service::{HistoryQuery, MessagingService};

#[derive(Debug, Default)]
struct ChannelState {
    items: BTreeMap<ItemId, Item>,
    next_id: i64,
    deleted: Vec<ItemId>,
}

impl ChannelState {
    fn allocate_id(&mut self) -> ItemId {
        self.next_id += 1;
        ItemId(self.next_id)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    names: HashMap<String, ChannelId>,
    channels: HashMap<ChannelId, ChannelState>,
    media: HashMap<String, Vec<u8>>,
    forbidden: HashSet<ChannelId>,
    reject_send_containing: Vec<String>,
    failing_downloads: HashSet<String>,
    fail_deletes: bool,
    clock: u64,
    media_seq: u64,
}

/// In-memory backend for tests and simulations, with failure injection.
#[derive(Debug, Default)]
pub struct InMemoryMessaging {
    state: Mutex<MemoryState>,
    history_calls: AtomicUsize,
}

impl InMemoryMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a channel under `name` and returns its id.
    pub fn add_channel(&self, name: impl Into<String>, id: ChannelId) -> ChannelId {
        let mut state = self.lock();
        state.names.insert(name.into(), id);
        state.channels.entry(id).or_default();
        id
    }

    /// Appends a text item with the given timestamp.
    pub fn push_text(&self, channel: ChannelId, text: &str, timestamp: u64) -> ItemId {
        self.push_item(channel, text, None, timestamp, false)
    }

    /// Appends an item, allocating the next id in the channel.
    pub fn push_item(
        &self,
        channel: ChannelId,
        text: &str,
        attachment: Option<Attachment>,
        timestamp: u64,
        is_control: bool,
    ) -> ItemId {
        let mut state = self.lock();
        let entry = state.channels.entry(channel).or_default();
        let id = entry.allocate_id();
        entry.items.insert(
            id,
            Item {
                id,
                channel,
                timestamp,
                text: text.to_string(),
                attachment,
                is_control,
            },
        );
        id
    }

    /// Inserts an item with an explicit id (ids may be sparse).
    pub fn insert_item(&self, item: Item) {
        let mut state = self.lock();
        let entry = state.channels.entry(item.channel).or_default();
        entry.next_id = entry.next_id.max(item.id.0);
        entry.items.insert(item.id, item);
    }

    /// Stores downloadable media bytes and returns an attachment handle.
    pub fn add_media(&self, file_name: &str, bytes: Vec<u8>) -> Attachment {
        let mut state = self.lock();
        state.media_seq += 1;
        let reference = format!("mem-media-{}", state.media_seq);
        state.media.insert(reference.clone(), bytes);
        Attachment {
            reference,
            file_name: Some(file_name.to_string()),
            mime_type: None,
        }
    }

    /// Makes history reads on `channel` fail with `Forbidden`.
    pub fn forbid(&self, channel: ChannelId) {
        self.lock().forbidden.insert(channel);
    }

    /// Rejects any send whose text contains `needle`.
    pub fn reject_sends_containing(&self, needle: impl Into<String>) {
        self.lock().reject_send_containing.push(needle.into());
    }

    pub fn fail_download(&self, reference: impl Into<String>) {
        self.lock().failing_downloads.insert(reference.into());
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    /// Current items of a channel in ascending id order.
    pub fn items(&self, channel: ChannelId) -> Vec<Item> {
        self.lock()
            .channels
            .get(&channel)
            .map(|c| c.items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids removed from `channel` through [`MessagingService::delete`].
    pub fn deleted(&self, channel: ChannelId) -> Vec<ItemId> {
        self.lock()
            .channels
            .get(&channel)
            .map(|c| c.deleted.clone())
            .unwrap_or_default()
    }

    pub fn media_bytes(&self, reference: &str) -> Option<Vec<u8>> {
        self.lock().media.get(reference).cloned()
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::Relaxed)
    }
}

impl MessagingService for InMemoryMessaging {
    async fn resolve(&self, identifier: &str) -> Result<ChannelId, MessagingError> {
        let state = self.lock();
        if let Some(id) = state.names.get(identifier) {
            return Ok(*id);
        }
        identifier
            .parse::<i64>()
            .ok()
            .map(ChannelId)
            .filter(|id| state.channels.contains_key(id))
            .ok_or_else(|| MessagingError::NotFound(identifier.to_string()))
    }

    async fn history(
        &self,
        channel: ChannelId,
        query: HistoryQuery,
    ) -> Result<Vec<Item>, MessagingError> {
        self.history_calls.fetch_add(1, Ordering::Relaxed);
        let state = self.lock();
        if state.forbidden.contains(&channel) {
            return Err(MessagingError::Forbidden(format!("channel {channel}")));
        }
        let Some(chan) = state.channels.get(&channel) else {
            return Err(MessagingError::NotJoined(channel));
        };
        let page = match query {
            HistoryQuery::After { after, limit } => chan
                .items
                .range(ItemId(after.0.saturating_add(1))..)
                .take(limit)
                .map(|(_, item)| item.clone())
                .collect(),
            HistoryQuery::Before { before, limit } => {
                let upper = before.unwrap_or(ItemId(i64::MAX));
                chan.items
                    .range(..upper)
                    .rev()
                    .take(limit)
                    .map(|(_, item)| item.clone())
                    .collect()
            }
        };
        Ok(page)
    }

    async fn send(
        &self,
        channel: ChannelId,
        text: &str,
        attachment: Option<&Path>,
    ) -> Result<ItemId, MessagingError> {
        let media = match attachment {
            Some(path) => {
                let bytes = std::fs::read(path)?;
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned());
                Some((bytes, file_name))
            }
            None => None,
        };
        let mut state = self.lock();
        if let Some(needle) = state
            .reject_send_containing
            .iter()
            .find(|needle| text.contains(needle.as_str()))
        {
            return Err(MessagingError::SendRejected(format!("content matched {needle:?}")));
        }
        if state.forbidden.contains(&channel) {
            return Err(MessagingError::Forbidden(format!("channel {channel}")));
        }
        if !state.channels.contains_key(&channel) {
            return Err(MessagingError::NotJoined(channel));
        }
        let attachment = media.map(|(bytes, file_name)| {
            state.media_seq += 1;
            let reference = format!("mem-media-{}", state.media_seq);
            state.media.insert(reference.clone(), bytes);
            Attachment {
                reference,
                file_name,
                mime_type: None,
            }
        });
        state.clock += 1;
        let timestamp = state.clock;
        let chan = state.channels.entry(channel).or_default();
        let id = chan.allocate_id();
        chan.items.insert(
            id,
            Item {
                id,
                channel,
                timestamp,
                text: text.to_string(),
                attachment,
                is_control: false,
            },
        );
        Ok(id)
    }

    async fn download(&self, item: &Item, dir: &Path) -> Result<PathBuf, MessagingError> {
        let attachment = item
            .attachment
            .as_ref()
            .ok_or_else(|| MessagingError::DownloadFailed(format!("item {} has no media", item.id)))?;
        let bytes = {
            let state = self.lock();
            if state.failing_downloads.contains(&attachment.reference) {
                return Err(MessagingError::DownloadFailed(attachment.reference.clone()));
            }
            state
                .media
                .get(&attachment.reference)
                .cloned()
                .ok_or_else(|| MessagingError::DownloadFailed(attachment.reference.clone()))?
        };
        let path = dir.join(attachment.local_file_name());
        std::fs::write(&path, bytes)
            .map_err(|err| MessagingError::DownloadFailed(err.to_string()))?;
        Ok(path)
    }

    async fn delete(&self, channel: ChannelId, ids: &[ItemId]) -> Result<(), MessagingError> {
        let mut state = self.lock();
        if state.fail_deletes {
            return Err(MessagingError::DeleteFailed(format!(
                "{} ids in channel {channel}",
                ids.len()
            )));
        }
        let chan = state
            .channels
            .get_mut(&channel)
            .ok_or(MessagingError::NotJoined(channel))?;
        for id in ids {
            if chan.items.remove(id).is_some() {
                chan.deleted.push(*id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryMessaging;
    use crate::service::{HistoryQuery, MessagingService};
    use crate::MessagingError;
    use feedrelay_core::{ChannelId, Item, ItemId};

    #[tokio::test]
    async fn resolve_by_name_or_known_id() {
        let svc = InMemoryMessaging::new();
        svc.add_channel("news", ChannelId(-1001));
        assert_eq!(svc.resolve("news").await, Ok(ChannelId(-1001)));
        assert_eq!(svc.resolve("-1001").await, Ok(ChannelId(-1001)));
        assert!(matches!(
            svc.resolve("missing").await,
            Err(MessagingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn send_round_trips_media_and_assigns_increasing_ids() {
        let svc = InMemoryMessaging::new();
        let dest = svc.add_channel("dest", ChannelId(9));
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("pic.jpg");
        std::fs::write(&file, b"jpeg").expect("write");

        let first = svc.send(dest, "hello", None).await.expect("send text");
        let second = svc.send(dest, "", Some(&file)).await.expect("send media");
        assert!(second > first);

        let items = svc.items(dest);
        let attachment = items[1].attachment.clone().expect("media kept");
        assert_eq!(attachment.file_name.as_deref(), Some("pic.jpg"));
        assert_eq!(svc.media_bytes(&attachment.reference), Some(b"jpeg".to_vec()));
    }

    #[tokio::test]
    async fn rejected_sends_and_failed_deletes_are_reported() {
        let svc = InMemoryMessaging::new();
        let dest = svc.add_channel("dest", ChannelId(9));
        svc.reject_sends_containing("spam");
        assert!(matches!(
            svc.send(dest, "buy spam now", None).await,
            Err(MessagingError::SendRejected(_))
        ));
        let id = svc.send(dest, "fine", None).await.expect("send");
        svc.set_fail_deletes(true);
        assert!(svc.delete(dest, &[id]).await.is_err());
        svc.set_fail_deletes(false);
        svc.delete(dest, &[id]).await.expect("delete");
        assert_eq!(svc.deleted(dest), vec![id]);
        assert!(svc
            .history(dest, HistoryQuery::After { after: ItemId(0), limit: 10 })
            .await
            .expect("history")
            .is_empty());
    }

    #[tokio::test]
    async fn download_ignores_directory_parts_of_file_name() {
        let svc = InMemoryMessaging::new();
        let mut attachment = svc.add_media("clip.mp4", b"video".to_vec());
        attachment.file_name = Some("../../escaped.bin".to_string());
        let item = Item {
            id: ItemId(1),
            channel: ChannelId(1),
            timestamp: 1,
            text: String::new(),
            attachment: Some(attachment),
            is_control: false,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = dir.path().join("downloads/item-x");
        std::fs::create_dir_all(&staging).expect("staging");

        let path = svc.download(&item, &staging).await.expect("download");
        assert_eq!(path, staging.join("escaped.bin"));
        assert_eq!(std::fs::read(&path).expect("read"), b"video");
        assert!(!dir.path().join("escaped.bin").exists());
    }
}
