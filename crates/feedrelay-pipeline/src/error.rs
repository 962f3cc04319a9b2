use feedrelay_messaging::MessagingError;
use feedrelay_store::StoreError;
use thiserror::Error;

/// Failures that abort a whole run. Everything else lands in the run report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("destination {identifier} unavailable: {source}")]
    Destination {
        identifier: String,
        source: MessagingError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
