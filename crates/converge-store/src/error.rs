use thiserror::Error;

/// Caller-matchable failures distinct from the catch-all `anyhow::Error`
/// every `Store` method returns at the boundary. Construct with `.into()`
/// where a caller might want to `downcast_ref` rather than match on a
/// formatted string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown intent '{0}'")]
    IntentNotFound(String),
    #[error("queue lock '{0}' is held by another worker")]
    LockHeld(String),
}
