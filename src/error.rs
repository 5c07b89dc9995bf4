//! Error types surfaced by [`crate::Pool::acquire`].
//!
//! Expected outcomes and operational failures are represented here as `Result`
//! values. Programmer errors (a CAS that should have succeeded under its documented
//! precondition did not) panic with a diagnostic instead of being wrapped in this
//! enum.

use thiserror::Error;

/// Failure returned by [`crate::Pool::acquire`].
#[derive(Error, Debug)]
pub enum AcquireError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// No slot became available before the requested deadline.
    #[error("timed out waiting for an available slot")]
    Timeout,

    /// The pool was closed, either before this call started or while it was waiting.
    #[error("pool is closed")]
    Closed,

    /// The allocator failed to produce a value for a newly reserved or recycled slot.
    #[error("allocator failed to create a value")]
    Create(#[source] E),
}
