//! Error types for the SyncStack core.

/// Core error type for SyncStack infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum SyncStackError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The emulator definition could not be read or parsed.
    #[error("invalid emulator definition {path}: {source}")]
    Definition {
        /// Path of the definition file.
        path: String,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for SyncStack operations.
pub type SyncStackResult<T> = Result<T, SyncStackError>;
