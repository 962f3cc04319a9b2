//! Forward-and-deduplicate pipeline.
//!
//! One run moves new items from every source channel into the destination:
//!
//! ```text
//! RunLock -> resolve -> reconcile -> fetch -> filter/dedup -> deliver -> commit
//! ```
//!
//! Per-source and per-item failures are contained and reported in
//! [`RunReport`]; only configuration, destination and state-store failures
//! abort a run, and the run lock is released on every path.

pub mod config;
pub mod deliver;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod forwarder;
pub mod reconcile;
pub mod report;
pub mod resolve;

pub use config::{DedupConfig, DedupMode, ForwarderConfig};
pub use error::PipelineError;
pub use filter::{Blacklist, HistoricalSet};
pub use forwarder::Forwarder;
pub use report::{
    DeliveredItem, DeliveryFailure, FailureStage, FilterStats, ReconcileReport, RunOutcome,
    RunReport, SourceFailure, SourceReport,
};
