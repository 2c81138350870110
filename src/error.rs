//! Crate-wide error types.

/// Convenience alias used across the crate; most functions simply bubble up
/// `anyhow::Error` with `.context(...)` attached at the call site.
pub type Result<T> = anyhow::Result<T>;

/// Error kinds surfaced to HTTP callers (§7). Internal plumbing mostly deals
/// in `anyhow::Error`; this enum exists at the boundaries that need to map
/// an error to a specific status code or retry behavior.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflicting state: {0}")]
    Conflict(String),
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    #[error("upstream oracle error: {0}")]
    OracleTransient(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
