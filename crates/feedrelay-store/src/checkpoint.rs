use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use feedrelay_core::{ChannelId, ItemId};
use tracing::warn;

use crate::error::StoreError;
use crate::fsutil::write_atomic;

const CHECKPOINT_EXT: &str = "txt";

/// Per-source cursor: the highest item id ever observed from each channel.
///
/// Each channel is stored in its own `<channel>.txt` file holding a single
/// integer, so a damaged record only affects that channel.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, channel: ChannelId) -> PathBuf {
        self.dir.join(format!("{channel}.{CHECKPOINT_EXT}"))
    }

    /// Last observed id, or `0` when absent or unreadable.
    ///
    /// An unreadable record degrades to a rescan from the beginning rather
    /// than blocking the channel.
    pub fn get(&self, channel: ChannelId) -> ItemId {
        let path = self.path_for(channel);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return ItemId(0),
            Err(err) => {
                warn!(channel = %channel, "checkpoint unreadable at {}: {err}", path.display());
                return ItemId(0);
            }
        };
        match raw.trim().parse::<i64>() {
            Ok(id) if id >= 0 => ItemId(id),
            _ => {
                warn!(channel = %channel, "checkpoint corrupt at {}: {raw:?}", path.display());
                ItemId(0)
            }
        }
    }

    pub fn set(&self, channel: ChannelId, id: ItemId) -> Result<(), StoreError> {
        write_atomic(&self.path_for(channel), id.0.to_string().as_bytes())
    }

    /// Moves the checkpoint forward to `observed`, never backwards.
    ///
    /// Returns the checkpoint value after the call.
    pub fn advance(&self, channel: ChannelId, observed: ItemId) -> Result<ItemId, StoreError> {
        let current = self.get(channel);
        if observed <= current {
            return Ok(current);
        }
        self.set(channel, observed)?;
        Ok(observed)
    }

    /// All readable checkpoints, sorted by channel id.
    pub fn list(&self) -> Result<Vec<(ChannelId, ItemId)>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Read {
            path: self.dir.clone(),
            source,
        })?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CHECKPOINT_EXT) {
                continue;
            }
            let Some(channel) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<i64>().ok())
                .map(ChannelId)
            else {
                continue;
            };
            out.push((channel, self.get(channel)));
        }
        out.sort();
        Ok(out)
    }
}
