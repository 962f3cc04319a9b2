use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Link pattern failed to compile.
    #[error("invalid link pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
