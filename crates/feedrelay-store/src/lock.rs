use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::fsutil::unix_now;

/// Informational contents of the lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub run_id: String,
    /// Unix seconds at acquisition.
    pub created_at: u64,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            run_id: hex::encode(rand::random::<[u8; 8]>()),
            created_at: unix_now(),
        }
    }

    /// Seconds since the marker was created.
    pub fn age_secs(&self) -> u64 {
        unix_now().saturating_sub(self.created_at)
    }
}

/// Result of a lock attempt. `AlreadyHeld` is a normal outcome, not an error.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(RunLockGuard),
    AlreadyHeld(Option<LockOwner>),
}

/// Advisory single-run marker at a well-known path.
///
/// Acquisition is one atomic create-if-absent. The marker is removed when the
/// returned guard is released or dropped. A process killed before that leaves
/// the marker behind; it then blocks later runs until removed by hand, unless
/// a staleness window is configured with [`RunLock::with_stale_after`].
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
    stale_after: Option<Duration>,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: None,
        }
    }

    /// Treat markers older than `stale_after` as abandoned. Disabled by default.
    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self) -> Result<LockAttempt, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Lock {
                path: self.path.clone(),
                source,
            })?;
        }
        match self.try_create()? {
            Some(guard) => Ok(LockAttempt::Acquired(guard)),
            None => {
                let holder = self.holder();
                if !self.is_stale(&self.path, holder.as_ref()) {
                    return Ok(LockAttempt::AlreadyHeld(holder));
                }
                if !self.take_over(holder.as_ref())? {
                    return Ok(LockAttempt::AlreadyHeld(self.holder()));
                }
                Ok(match self.try_create()? {
                    Some(guard) => LockAttempt::Acquired(guard),
                    None => LockAttempt::AlreadyHeld(self.holder()),
                })
            }
        }
    }

    /// Moves a stale marker aside so a fresh one can be created.
    ///
    /// The rename is atomic, so only one contender moves any given marker. The
    /// moved file must still be the stale marker that was observed; a live
    /// marker moved by mistake is linked back without overwriting anything.
    fn take_over(&self, observed: Option<&LockOwner>) -> Result<bool, StoreError> {
        let lock_err = |source: std::io::Error| StoreError::Lock {
            path: self.path.clone(),
            source,
        };
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".stale-{}", hex::encode(rand::random::<[u8; 8]>())));
        let aside = PathBuf::from(aside);

        match fs::rename(&self.path, &aside) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(lock_err(source)),
        }
        let moved = fs::read(&aside)
            .ok()
            .and_then(|raw| serde_json::from_slice::<LockOwner>(&raw).ok());
        if moved.as_ref() != observed || !self.is_stale(&aside, moved.as_ref()) {
            debug!("run lock {} changed hands, leaving it", self.path.display());
            match fs::hard_link(&aside, &self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(source) => return Err(lock_err(source)),
            }
            remove_marker(&aside).map_err(lock_err)?;
            return Ok(false);
        }
        warn!(
            "removing stale run lock {} (holder: {:?})",
            self.path.display(),
            observed
        );
        remove_marker(&aside).map_err(lock_err)?;
        Ok(true)
    }

    /// Owner recorded in the current marker, if any and readable.
    pub fn holder(&self) -> Option<LockOwner> {
        let raw = fs::read(&self.path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Whether a marker currently exists.
    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    fn is_stale(&self, marker: &Path, holder: Option<&LockOwner>) -> bool {
        let Some(stale_after) = self.stale_after else {
            return false;
        };
        let age = match holder {
            Some(owner) => owner.age_secs(),
            None => fs::metadata(marker)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        age >= stale_after.as_secs()
    }

    fn try_create(&self) -> Result<Option<RunLockGuard>, StoreError> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(source) => {
                return Err(StoreError::Lock {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let owner = LockOwner::current();
        let guard = RunLockGuard {
            path: self.path.clone(),
            owner,
            released: false,
        };
        // The guard already owns the marker; dropping it on error removes it.
        let encoded = serde_json::to_vec(&guard.owner).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        file.write_all(&encoded)
            .and_then(|()| file.sync_all())
            .map_err(|source| StoreError::Lock {
                path: self.path.clone(),
                source,
            })?;
        debug!(run_id = %guard.owner.run_id, "acquired run lock {}", self.path.display());
        Ok(Some(guard))
    }
}

/// Proof of lock ownership. Removes the marker on release or drop.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    owner: LockOwner,
    released: bool,
}

impl RunLockGuard {
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        remove_marker(&self.path).map_err(|source| StoreError::Lock {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_marker(&self.path) {
            warn!("failed to remove run lock {}: {err}", self.path.display());
        }
    }
}

fn remove_marker(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
