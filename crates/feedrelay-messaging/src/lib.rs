//! Messaging backend contract consumed by the forwarding pipeline.
//!
//! The pipeline only talks to a backend through [`MessagingService`]. Two
//! backends live here: [`InMemoryMessaging`] for tests and simulations, and
//! [`SpoolMessaging`], an on-disk backend used by the CLI.

pub mod error;
pub mod history;
pub mod memory;
pub mod service;
pub mod spool;

pub use error::MessagingError;
pub use history::{items_since, recent_items};
pub use memory::InMemoryMessaging;
pub use service::{HistoryQuery, MessagingService};
pub use spool::SpoolMessaging;
