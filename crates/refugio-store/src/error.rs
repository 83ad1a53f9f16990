use thiserror::Error;

/// Errors surfaced by the storage backends. All of these are local to
/// one operation — nothing here is fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("storage backend: {0}")]
    Backend(String),
}
