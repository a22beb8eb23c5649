//! Convenience result type alias for DocRelay.

use crate::error::AppError;

/// A specialized `Result` type for DocRelay operations.
pub type AppResult<T> = Result<T, AppError>;
