//! Errors reported by the checked context accessors.
use thiserror::Error;

/// Why a checked operation on a context could not reach its private data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context holds no private data, because it was moved from.
    #[error("context holds no private data")]
    Empty,

    /// The private data is already borrowed, by an overlapping poll or from inside a hook.
    #[error("private data is already borrowed")]
    Busy,
}

/// Result of the checked context accessors.
pub type Result<T> = std::result::Result<T, ContextError>;
