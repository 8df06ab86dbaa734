//! Result alias and combinators for the benign store outcomes.
//!
//! A reconcile treats some errors as answers rather than failures: a missing
//! object means "already deleted", a duplicate create means "someone else won
//! the race". These combinators turn those answers into values so the
//! remaining errors can still flow through `?`.

use crate::error::Error;

/// The standard Result type for kron operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for store results.
pub trait ResultExt<T> {
    /// `Ok(Some(v))` on success, `Ok(None)` on [`Error::NotFound`], the error otherwise.
    fn found(self) -> Result<Option<T>>;

    /// `Ok(Some(v))` on success, `Ok(None)` on [`Error::AlreadyExists`], the error otherwise.
    fn ignore_already_exists(self) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ignore_already_exists(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_already_exists() => {
                tracing::debug!(error = %e, "Create lost a race, treating as existing");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
