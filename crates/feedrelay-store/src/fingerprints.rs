use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Mutex;

use feedrelay_core::Fingerprint;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::fsutil::write_atomic;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FingerprintCacheDisk {
    fingerprints: Vec<Fingerprint>,
}

#[derive(Debug, Default)]
struct CacheInner {
    set: HashSet<Fingerprint>,
    order: VecDeque<Fingerprint>,
}

impl CacheInner {
    fn insert(&mut self, fp: Fingerprint) -> bool {
        if self.set.contains(&fp) {
            return false;
        }
        self.set.insert(fp.clone());
        self.order.push_back(fp);
        true
    }

    fn trim_oldest(&mut self, max_size: usize) {
        while self.order.len() > max_size {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
    }
}

/// Size-bounded set of fingerprints already delivered or known.
///
/// Insertion order is tracked so that overflow evicts the oldest entries
/// first. Growth inside one run is unbounded; the bound applies when the
/// cache is loaded and persisted, so an in-run claim is never forgotten
/// before the run ends.
#[derive(Debug)]
pub struct FingerprintCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
}

impl FingerprintCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_size: max_size.max(1),
        }
    }

    /// Builds a cache from fingerprints in oldest-first order.
    pub fn from_fingerprints(
        fingerprints: impl IntoIterator<Item = Fingerprint>,
        max_size: usize,
    ) -> Self {
        let cache = Self::new(max_size);
        {
            let mut inner = cache.lock();
            for fp in fingerprints {
                inner.insert(fp);
            }
            inner.trim_oldest(cache.max_size);
        }
        cache
    }

    /// Loads the persisted set; a missing or undecodable file yields an empty cache.
    pub fn load(path: impl AsRef<Path>, max_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::new(max_size)),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        match serde_json::from_slice::<FingerprintCacheDisk>(&bytes) {
            Ok(disk) => Ok(Self::from_fingerprints(disk.fingerprints, max_size)),
            Err(err) => {
                warn!("fingerprint cache at {} is corrupt, starting empty: {err}", path.display());
                Ok(Self::new(max_size))
            }
        }
    }

    /// Writes the newest `max_size` fingerprints, oldest first.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<usize, StoreError> {
        let path = path.as_ref();
        let fingerprints = {
            let inner = self.lock();
            let skip = inner.order.len().saturating_sub(self.max_size);
            inner.order.iter().skip(skip).cloned().collect::<Vec<_>>()
        };
        let written = fingerprints.len();
        let encoded = serde_json::to_vec_pretty(&FingerprintCacheDisk { fingerprints }).map_err(
            |source| StoreError::Encode {
                path: path.to_path_buf(),
                source,
            },
        )?;
        write_atomic(path, &encoded)?;
        Ok(written)
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.lock().set.contains(fp)
    }

    /// Atomic test-and-set: returns `true` only for the caller that inserted `fp`.
    pub fn add(&self, fp: Fingerprint) -> bool {
        self.lock().insert(fp)
    }

    pub fn size(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Current members in insertion order.
    pub fn snapshot(&self) -> Vec<Fingerprint> {
        self.lock().order.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::FingerprintCache;
    use feedrelay_core::Fingerprint;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::new(s)
    }

    #[test]
    fn add_is_test_and_set() {
        let cache = FingerprintCache::new(10);
        assert!(cache.add(fp("a")));
        assert!(!cache.add(fp("a")));
        assert!(cache.contains(&fp("a")));
        assert!(!cache.contains(&fp("b")));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn in_run_growth_is_not_evicted_until_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fingerprints.json");
        let cache = FingerprintCache::new(2);
        for key in ["a", "b", "c", "d"] {
            assert!(cache.add(fp(key)));
        }
        assert!(cache.contains(&fp("a")));
        assert_eq!(cache.persist(&path).expect("persist"), 2);

        let reloaded = FingerprintCache::load(&path, 2).expect("load");
        assert_eq!(reloaded.snapshot(), vec![fp("c"), fp("d")]);
    }

    #[test]
    fn reload_is_subset_of_written_and_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state/fingerprints.json");
        let written: Vec<_> = (0..50).map(|n| fp(&format!("key-{n}"))).collect();
        let cache = FingerprintCache::from_fingerprints(written.clone(), 100);
        cache.persist(&path).expect("persist");

        for max in [1usize, 10, 50, 200] {
            let reloaded = FingerprintCache::load(&path, max).expect("load");
            assert!(reloaded.size() <= max);
            assert!(reloaded.snapshot().iter().all(|f| written.contains(f)));
        }
    }

    #[test]
    fn missing_or_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = FingerprintCache::load(dir.path().join("nope.json"), 5).expect("missing");
        assert!(missing.is_empty());

        let corrupt_path = dir.path().join("bad.json");
        std::fs::write(&corrupt_path, b"{not json").expect("write");
        let corrupt = FingerprintCache::load(&corrupt_path, 5).expect("corrupt");
        assert!(corrupt.is_empty());
    }

    #[test]
    fn concurrent_claims_admit_exactly_one_winner() {
        let cache = Arc::new(FingerprintCache::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|n| cache.add(fp(&format!("shared-{n}"))))
                        .count()
                })
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread joined"))
            .sum();
        assert_eq!(wins, 100);
        assert_eq!(cache.size(), 100);
    }
}
