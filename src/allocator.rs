//! The allocator collaborator: constructs, destroys, and observes pooled values.

/// Produces, observes, and destroys the values a [`crate::Pool`] manages.
///
/// Implementations are expected to be cheap to clone or to live behind a shared
/// reference for the pool's lifetime; the pool calls `create` every time it needs a
/// fresh value, whether for initial growth or to replace a disposed one.
pub trait Allocator<T>: Send + Sync {
    /// The error type `create` may fail with.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce a new value. Called whenever the pool grows or recycles a disposed slot.
    ///
    /// # Errors
    ///
    /// Any error here propagates to the acquiring thread; the slot reserved for this
    /// value is left `Disposed` and recyclable by a later acquire.
    fn create(&self) -> Result<T, Self::Error>;

    /// Called as the pool hands `value` to its claimer, just before `acquire` returns.
    ///
    /// The default implementation does nothing.
    fn on_acquire(&self, value: &T) {
        let _ = value;
    }

    /// Called exactly once when the pool is destroying `value`.
    ///
    /// The default implementation does nothing. Implementations that manage external
    /// resources (sockets, file handles) should release them here.
    fn on_dispose(&self, value: T) {
        drop(value);
    }
}
