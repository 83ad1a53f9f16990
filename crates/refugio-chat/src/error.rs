use refugio_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the chat core. Preconditions (no signed-in user,
/// empty input) fail fast; backend errors pass through as recoverable —
/// retry policy belongs to the caller, not here.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("no authenticated user")]
    NotAuthenticated,

    #[error("message text is empty")]
    EmptyMessage,

    #[error(transparent)]
    Store(#[from] StoreError),
}
