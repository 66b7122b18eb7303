//! Error types for the scheduler.

/// Top-level error type for the scheduler crate.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Key-value store read/write/delete error.
    #[error("store error: {0}")]
    Store(String),

    /// Trigger engine registration error (invalid schedule expression).
    #[error("trigger error: {0}")]
    Trigger(String),

    /// Task configured incorrectly (e.g. started without a schedule).
    #[error("config error: {0}")]
    Config(String),

    /// Job observer error.
    #[error("observer error: {0}")]
    Observer(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SchedulerError>;
