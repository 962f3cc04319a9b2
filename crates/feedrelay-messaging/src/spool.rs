use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use feedrelay_core::hash::content_digest_hex;
use feedrelay_core::{Attachment, ChannelId, Item, ItemId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::MessagingError;
use crate::service::{HistoryQuery, MessagingService};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryDisk {
    channels: BTreeMap<String, ChannelId>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelDisk {
    next_id: i64,
    items: Vec<Item>,
}

/// On-disk messaging backend rooted at a spool directory.
///
/// ```text
/// <root>/directory.json        name -> channel id
/// <root>/channels/<id>.json    channel history
/// <root>/media/<blake3-hex>    attachment bytes
/// ```
///
/// A channel whose history file is missing is treated as not joined.
#[derive(Debug)]
pub struct SpoolMessaging {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl SpoolMessaging {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, MessagingError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("channels")).await?;
        tokio::fs::create_dir_all(root.join("media")).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn directory_path(&self) -> PathBuf {
        self.root.join("directory.json")
    }

    fn channel_path(&self, channel: ChannelId) -> PathBuf {
        self.root.join("channels").join(format!("{channel}.json"))
    }

    fn media_path(&self, reference: &str) -> PathBuf {
        self.root.join("media").join(reference)
    }

    /// Registers `name` for `id` and creates an empty history if needed.
    pub async fn create_channel(&self, name: &str, id: ChannelId) -> Result<(), MessagingError> {
        let _guard = self.write_lock.lock().await;
        let mut directory: DirectoryDisk = read_json(&self.directory_path())
            .await?
            .unwrap_or_default();
        directory.channels.insert(name.to_string(), id);
        write_json(&self.directory_path(), &directory).await?;
        if read_json::<ChannelDisk>(&self.channel_path(id)).await?.is_none() {
            write_json(&self.channel_path(id), &ChannelDisk::default()).await?;
        }
        Ok(())
    }

    async fn load_channel(&self, channel: ChannelId) -> Result<ChannelDisk, MessagingError> {
        read_json(&self.channel_path(channel))
            .await?
            .ok_or(MessagingError::NotJoined(channel))
    }

    async fn store_media(&self, path: &Path) -> Result<Attachment, MessagingError> {
        let bytes = tokio::fs::read(path).await?;
        let reference = content_digest_hex(&bytes);
        let target = self.media_path(&reference);
        if tokio::fs::metadata(&target).await.is_err() {
            tokio::fs::write(&target, &bytes).await?;
        }
        Ok(Attachment {
            reference,
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            mime_type: None,
        })
    }
}

impl MessagingService for SpoolMessaging {
    async fn resolve(&self, identifier: &str) -> Result<ChannelId, MessagingError> {
        let directory: DirectoryDisk = read_json(&self.directory_path())
            .await?
            .unwrap_or_default();
        if let Some(id) = directory.channels.get(identifier) {
            return Ok(*id);
        }
        if let Ok(raw) = identifier.parse::<i64>() {
            let id = ChannelId(raw);
            if tokio::fs::metadata(self.channel_path(id)).await.is_ok() {
                return Ok(id);
            }
        }
        Err(MessagingError::NotFound(identifier.to_string()))
    }

    async fn history(
        &self,
        channel: ChannelId,
        query: HistoryQuery,
    ) -> Result<Vec<Item>, MessagingError> {
        let mut items = self.load_channel(channel).await?.items;
        items.sort_by_key(|item| item.id);
        let page = match query {
            HistoryQuery::After { after, limit } => items
                .into_iter()
                .filter(|item| item.id > after)
                .take(limit)
                .collect(),
            HistoryQuery::Before { before, limit } => items
                .into_iter()
                .rev()
                .filter(|item| before.map_or(true, |bound| item.id < bound))
                .take(limit)
                .collect(),
        };
        Ok(page)
    }

    async fn send(
        &self,
        channel: ChannelId,
        text: &str,
        attachment: Option<&Path>,
    ) -> Result<ItemId, MessagingError> {
        let attachment = match attachment {
            Some(path) => Some(self.store_media(path).await?),
            None => None,
        };
        if text.trim().is_empty() && attachment.is_none() {
            return Err(MessagingError::SendRejected("empty message".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        let mut disk = self.load_channel(channel).await?;
        disk.next_id = disk
            .next_id
            .max(disk.items.iter().map(|item| item.id.0).max().unwrap_or(0));
        disk.next_id += 1;
        let id = ItemId(disk.next_id);
        disk.items.push(Item {
            id,
            channel,
            timestamp: unix_now(),
            text: text.to_string(),
            attachment,
            is_control: false,
        });
        write_json(&self.channel_path(channel), &disk).await?;
        debug!(channel = %channel, item = %id, "spool appended item");
        Ok(id)
    }

    async fn download(&self, item: &Item, dir: &Path) -> Result<PathBuf, MessagingError> {
        let attachment = item.attachment.as_ref().ok_or_else(|| {
            MessagingError::DownloadFailed(format!("item {} has no media", item.id))
        })?;
        let target = dir.join(attachment.local_file_name());
        tokio::fs::copy(self.media_path(&attachment.reference), &target)
            .await
            .map_err(|err| {
                MessagingError::DownloadFailed(format!("{}: {err}", attachment.reference))
            })?;
        Ok(target)
    }

    async fn delete(&self, channel: ChannelId, ids: &[ItemId]) -> Result<(), MessagingError> {
        let _guard = self.write_lock.lock().await;
        let mut disk = self.load_channel(channel).await?;
        let before = disk.items.len();
        disk.items.retain(|item| !ids.contains(&item.id));
        write_json(&self.channel_path(channel), &disk)
            .await
            .map_err(|err| MessagingError::DeleteFailed(err.to_string()))?;
        debug!(channel = %channel, removed = before - disk.items.len(), "spool deleted items");
        Ok(())
    }
}

async fn read_json<T>(path: &Path) -> Result<Option<T>, MessagingError>
where
    T: for<'de> Deserialize<'de>,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| MessagingError::Transport(format!("{}: {err}", path.display()))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MessagingError> {
    let encoded = serde_json::to_vec_pretty(value)
        .map_err(|err| MessagingError::Transport(err.to_string()))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, encoded).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::SpoolMessaging;
    use crate::service::{HistoryQuery, MessagingService};
    use crate::MessagingError;
    use feedrelay_core::{ChannelId, ItemId};

    #[tokio::test]
    async fn channels_resolve_and_accumulate_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = SpoolMessaging::open(dir.path()).await.expect("open");
        spool
            .create_channel("news", ChannelId(-1001))
            .await
            .expect("create");

        assert_eq!(spool.resolve("news").await, Ok(ChannelId(-1001)));
        assert_eq!(spool.resolve("-1001").await, Ok(ChannelId(-1001)));
        assert!(matches!(
            spool.resolve("other").await,
            Err(MessagingError::NotFound(_))
        ));

        let a = spool.send(ChannelId(-1001), "one", None).await.expect("send");
        let b = spool.send(ChannelId(-1001), "two", None).await.expect("send");
        assert_eq!((a, b), (ItemId(1), ItemId(2)));

        let newest = spool
            .history(
                ChannelId(-1001),
                HistoryQuery::Before {
                    before: None,
                    limit: 1,
                },
            )
            .await
            .expect("history");
        assert_eq!(newest[0].text, "two");
    }

    #[tokio::test]
    async fn media_is_content_addressed_and_downloadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = SpoolMessaging::open(dir.path().join("spool"))
            .await
            .expect("open");
        spool
            .create_channel("dest", ChannelId(5))
            .await
            .expect("create");
        let src = dir.path().join("clip.mp4");
        std::fs::write(&src, b"video-bytes").expect("write");
        spool
            .send(ChannelId(5), "", Some(&src))
            .await
            .expect("send media");

        let items = spool
            .history(
                ChannelId(5),
                HistoryQuery::After {
                    after: ItemId(0),
                    limit: 10,
                },
            )
            .await
            .expect("history");
        let out = tempfile::tempdir().expect("out");
        let path = spool.download(&items[0], out.path()).await.expect("download");
        assert_eq!(std::fs::read(path).expect("read"), b"video-bytes");
    }

    #[tokio::test]
    async fn unknown_channel_is_not_joined_and_empty_send_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = SpoolMessaging::open(dir.path()).await.expect("open");
        assert_eq!(
            spool
                .history(
                    ChannelId(77),
                    HistoryQuery::After {
                        after: ItemId(0),
                        limit: 1
                    }
                )
                .await,
            Err(MessagingError::NotJoined(ChannelId(77)))
        );
        spool
            .create_channel("dest", ChannelId(5))
            .await
            .expect("create");
        assert!(matches!(
            spool.send(ChannelId(5), "  ", None).await,
            Err(MessagingError::SendRejected(_))
        ));
    }

    #[tokio::test]
    async fn download_stays_inside_target_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = SpoolMessaging::open(dir.path().join("spool"))
            .await
            .expect("open");
        spool
            .create_channel("dest", ChannelId(5))
            .await
            .expect("create");
        let src = dir.path().join("doc.pdf");
        std::fs::write(&src, b"pdf").expect("write");
        spool
            .send(ChannelId(5), "", Some(&src))
            .await
            .expect("send media");
        let mut items = spool
            .history(
                ChannelId(5),
                HistoryQuery::After {
                    after: ItemId(0),
                    limit: 10,
                },
            )
            .await
            .expect("history");
        if let Some(attachment) = items[0].attachment.as_mut() {
            attachment.file_name = Some("../../escaped.bin".to_string());
        }

        let staging = dir.path().join("downloads/item-x");
        std::fs::create_dir_all(&staging).expect("staging");
        let path = spool.download(&items[0], &staging).await.expect("download");
        assert_eq!(path, staging.join("escaped.bin"));
        assert!(!dir.path().join("escaped.bin").exists());
    }
}
