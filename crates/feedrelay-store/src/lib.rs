//! Flat-file run state for feedrelay.
//!
//! One concern per artifact: a checkpoint file per source channel, one
//! fingerprint cache file, and one lock marker guarding whole runs.

pub mod checkpoint;
pub mod error;
pub mod fingerprints;
pub mod lock;

mod fsutil;

pub use checkpoint::CheckpointStore;
pub use error::StoreError;
pub use fingerprints::FingerprintCache;
pub use lock::{LockAttempt, LockOwner, RunLock, RunLockGuard};
