//! A thread-caching, lock-light object pool for expensive-to-create resources.
//!
//! This crate provides [`Pool<T, A, V, C>`]: a bounded container that lends reusable
//! values to concurrent workers and recycles them on release. There is no background
//! reaper thread; every lifecycle transition (growth, validation, disposal, shutdown)
//! is driven synchronously by the acquiring or releasing thread itself.
//!
//! # Key design: slot state machine, not a lock per access
//!
//! Unlike a pool guarded end-to-end by a mutex, each slot's state (`Available` /
//! `Claimed` / `Disposed`) is mediated entirely by atomic compare-and-swap. A
//! [`parking_lot::RwLock`] only ever guards the slot *registry* itself, and only while
//! it is growing; normal acquire/release traffic never takes it.
//!
//! 1. A [`crossbeam_queue::SegQueue`] of slots believed available (`live`) and a second
//!    queue of slots whose value has been destroyed and awaits replacement
//!    (`disposed`) hold *hints*, not guarantees — every pop is re-verified with a CAS.
//! 2. Each worker thread caches the last slot it claimed, so a worker that releases and
//!    re-acquires its own connection never touches a shared queue at all.
//! 3. [`PoolGuard`] caches nothing beyond the slot handle it was constructed with; its
//!    `Drop` is the sole release path, so a value can never be returned twice.
//!
//! # Example
//!
//! ```
//! use respool::{Allocator, Pool};
//! use std::time::Duration;
//!
//! struct Counter;
//! impl Allocator<u32> for Counter {
//!     type Error = std::convert::Infallible;
//!     fn create(&self) -> Result<u32, Self::Error> {
//!         Ok(0)
//!     }
//! }
//!
//! let pool = Pool::with_defaults(4, Counter);
//! let mut value = pool.acquire(Duration::from_millis(100)).unwrap();
//! *value += 1;
//! drop(value);
//! ```

mod slot;

/// Exposes the slot state machine to the `loom`-gated concurrency test, which must
/// drive it directly rather than through a whole [`Pool`] to keep the model's state
/// space tractable. Not part of the crate's public API outside a `loom` build.
#[cfg(loom)]
#[doc(hidden)]
pub mod loom_internal {
    pub use crate::slot::Slot;
}

pub mod allocator;
pub mod clock;
pub mod error;
pub mod validation;

pub use allocator::Allocator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AcquireError;
pub use validation::{AllOf, AlwaysValid, MaxIdle, ValidationStrategy};

use crossbeam_queue::SegQueue;
use parking_lot::RwLock;
use slot::{Slot, CLAIMED};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Upper bound on how long a single bounded-wait iteration sleeps, regardless of how
/// much time remains until the caller's deadline. Keeps `acquire` responsive to newly
/// disposed slots and to pool shutdown without a dedicated wakeup channel.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(10);

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

// `thread_local!` lives inside this generic function so each instantiation of
// `cache_for::<T>` gets its own, independently-monomorphized static storage.
fn cache_for<T: Send + 'static>() -> &'static thread::LocalKey<RefCell<HashMap<usize, Arc<Slot<T>>>>> {
    thread_local! {
        static CACHE: RefCell<HashMap<usize, Arc<Slot<T>>>> = RefCell::new(HashMap::new());
    }
    &CACHE
}

fn thread_cache_get<T: Send + 'static>(pool_id: usize) -> Option<Arc<Slot<T>>> {
    cache_for::<T>().with(|c| c.borrow().get(&pool_id).cloned())
}

fn thread_cache_set<T: Send + 'static>(pool_id: usize, slot: Arc<Slot<T>>) {
    cache_for::<T>().with(|c| {
        c.borrow_mut().insert(pool_id, slot);
    });
}

/// A bounded, thread-caching pool of reusable values of type `T`.
///
/// - `A`: the [`Allocator`] that creates, observes, and destroys values.
/// - `V`: the [`ValidationStrategy`] deciding when a value must be replaced.
/// - `C`: the [`Clock`] supplying monotonic milliseconds; defaults to [`SystemClock`].
pub struct Pool<T, A, V = AlwaysValid, C = SystemClock>
where
    T: Send + 'static,
    A: Allocator<T>,
    V: ValidationStrategy<T>,
    C: Clock,
{
    id: usize,
    capacity: usize,
    registry: RwLock<Vec<Arc<Slot<T>>>>,
    live: SegQueue<Arc<Slot<T>>>,
    disposed: SegQueue<Arc<Slot<T>>>,
    high_water_mark: AtomicUsize,
    closed: AtomicBool,
    allocator: A,
    validation: V,
    clock: C,
}

impl<T, A> Pool<T, A, AlwaysValid, SystemClock>
where
    T: Send + 'static,
    A: Allocator<T>,
{
    /// Construct a pool with no validation and the default monotonic clock.
    pub fn with_defaults(capacity: usize, allocator: A) -> Arc<Self> {
        Self::new(capacity, allocator, AlwaysValid, SystemClock::default())
    }
}

impl<T, A, C> Pool<T, A, AlwaysValid, C>
where
    T: Send + 'static,
    A: Allocator<T>,
    C: Clock,
{
    /// Construct a pool with no validation and an explicit clock.
    ///
    /// Useful for tests that need deterministic idle-time control (see
    /// [`ManualClock`]) without also customizing validation.
    pub fn with_clock(capacity: usize, allocator: A, clock: C) -> Arc<Self> {
        Self::new(capacity, allocator, AlwaysValid, clock)
    }
}

impl<T, A, V, C> Pool<T, A, V, C>
where
    T: Send + 'static,
    A: Allocator<T>,
    V: ValidationStrategy<T>,
    C: Clock,
{
    /// Construct a pool with an explicit allocator, validation strategy, and clock.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, allocator: A, validation: V, clock: C) -> Arc<Self> {
        assert!(capacity > 0, "pool capacity must be greater than 0");
        Arc::new(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            registry: RwLock::new(Vec::with_capacity(capacity)),
            live: SegQueue::new(),
            disposed: SegQueue::new(),
            high_water_mark: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            allocator,
            validation,
            clock,
        })
    }

    /// Acquire a value, waiting up to `timeout` for one to become available.
    ///
    /// Tries, in order: this thread's cached slot, any slot already believed
    /// available, a disposed slot awaiting recycling, growing the registry if under
    /// capacity, and finally a bounded wait (capped at 10ms per iteration) until
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Closed`] if the pool is or becomes closed,
    /// [`AcquireError::Timeout`] if no slot became available in time, or
    /// [`AcquireError::Create`] if the allocator failed while (re)populating a slot.
    pub fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PoolGuard<T, A, V, C>, AcquireError<A::Error>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AcquireError::Closed);
        }

        let deadline = self.clock.millis() + timeout.as_millis() as i64;

        if let Some(slot) = thread_cache_get::<T>(self.id) {
            if slot.try_claim() {
                match self.validate_claimed(&slot) {
                    Ok(()) => return Ok(self.finish_acquire(slot)),
                    Err(()) => self.dispose(&slot),
                }
            }
        }

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(AcquireError::Closed);
            }

            if let Some(slot) = self.live.pop() {
                if slot.try_claim() {
                    match self.validate_claimed(&slot) {
                        Ok(()) => return Ok(self.finish_acquire(slot)),
                        Err(()) => {
                            self.dispose(&slot);
                            continue;
                        }
                    }
                }
                continue;
            }

            if let Some(slot) = self.disposed.pop() {
                return match self.allocate_new(&slot, true) {
                    Ok(()) => Ok(self.finish_acquire(slot)),
                    Err(e) => Err(AcquireError::Create(e)),
                };
            }

            if let Some(slot) = self.try_grow() {
                return match self.allocate_new(&slot, false) {
                    Ok(()) => Ok(self.finish_acquire(slot)),
                    Err(e) => Err(AcquireError::Create(e)),
                };
            }

            let now = self.clock.millis();
            let remaining = deadline - now;
            if remaining <= 0 {
                return Err(AcquireError::Timeout);
            }
            thread::sleep(MAX_POLL_INTERVAL.min(Duration::from_millis(remaining as u64)));
        }
    }

    /// Idempotently shut down the pool, disposing every value it currently holds.
    ///
    /// Slots held by an in-flight [`PoolGuard`] are disposed by that guard's own
    /// release once it observes the pool is closed; `close` only claims and disposes
    /// the slots it can claim itself.
    pub fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let registry = self.registry.read();
        let mut still_held = 0;
        for slot in registry.iter() {
            if slot.try_claim() {
                self.dispose(slot);
            } else if slot.state() == CLAIMED {
                still_held += 1;
            }
        }
        if still_held > 0 {
            warn!(
                still_held,
                "pool closed with slots still held by in-flight acquirers; they will be \
                 disposed when released"
            );
        }
    }

    /// Whether [`Pool::close`] has completed its first call.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total number of slots ever allocated (the registry's high-water mark).
    pub fn size(&self) -> usize {
        self.high_water_mark.load(Ordering::Acquire)
    }

    /// Number of slots currently believed available for claim.
    ///
    /// A hint, not a guarantee: entries may have been claimed by another thread by
    /// the time this value is read.
    pub fn available(&self) -> usize {
        self.live.len()
    }

    fn validate_claimed(&self, slot: &Arc<Slot<T>>) -> Result<(), ()> {
        let now = self.clock.millis();
        let idle = now - slot.last_used();
        // SAFETY: we just won `try_claim`, so we exclusively hold this slot, and a
        // slot reachable from the thread-local cache or the live queue always has a
        // value installed.
        let valid = unsafe { self.validation.is_valid(slot.value_ref(), idle) };
        if valid {
            Ok(())
        } else {
            Err(())
        }
    }

    fn finish_acquire(self: &Arc<Self>, slot: Arc<Slot<T>>) -> PoolGuard<T, A, V, C> {
        // SAFETY: caller holds this slot Claimed with a value installed.
        self.allocator.on_acquire(unsafe { slot.value_ref() });
        thread_cache_set(self.id, Arc::clone(&slot));
        PoolGuard {
            pool: Arc::clone(self),
            slot: Some(slot),
        }
    }

    fn try_grow(&self) -> Option<Arc<Slot<T>>> {
        let mut registry = self.registry.write();
        if registry.len() >= self.capacity {
            return None;
        }
        let idx = registry.len();
        let old_size = idx;
        let new_size = idx + 1;
        let now = self.clock.millis();
        let slot = Arc::new(Slot::new_claimed_empty(idx, now));
        registry.push(Arc::clone(&slot));
        self.high_water_mark.store(new_size, Ordering::Release);

        warn!(
            pool_type = std::any::type_name::<T>(),
            old_size,
            new_size,
            capacity = self.capacity,
            "pool exhausted, growing by one slot"
        );

        Some(slot)
    }

    /// Populate `slot` with a freshly created value. `needs_reclaim` is true for a
    /// slot popped off the disposed queue (state `Disposed`, must be re-armed to
    /// `Claimed`) and false for a slot that was just pushed by `try_grow` (already
    /// `Claimed`, never held a value).
    fn allocate_new(&self, slot: &Arc<Slot<T>>, needs_reclaim: bool) -> Result<(), A::Error> {
        if needs_reclaim {
            slot.reclaim_for_allocation(self.clock.millis());
        }
        match self.allocator.create() {
            Ok(value) => {
                // SAFETY: caller holds this slot Claimed, either freshly grown or just
                // reclaimed above, and no other thread can observe it until we return.
                unsafe { slot.set_value(value) };
                Ok(())
            }
            Err(e) => {
                let disposed = slot.try_dispose();
                assert!(
                    disposed,
                    "slot reserved for allocation was not Claimed - internal invariant violated"
                );
                self.disposed.push(Arc::clone(slot));
                Err(e)
            }
        }
    }

    /// Validate-and-release or dispose a previously claimed slot. Called by
    /// [`PoolGuard::drop`].
    fn release(&self, slot: &Arc<Slot<T>>) {
        let now = self.clock.millis();
        slot.touch(now);
        let idle = now - slot.last_used();
        // SAFETY: caller (the guard being dropped) still exclusively holds this slot.
        let valid = unsafe { self.validation.is_valid(slot.value_ref(), idle) };
        if !valid {
            debug!(index = slot.index(), idle, "disposing slot that failed validation on release");
            self.dispose(slot);
            return;
        }

        let released = slot.try_release(now);
        assert!(
            released,
            "release called on a slot not in Claimed state - internal invariant violated"
        );

        if !self.closed.load(Ordering::Acquire) {
            self.live.push(Arc::clone(slot));
        } else if slot.try_claim() {
            // Shutdown raced with this release: the slot was published AVAILABLE a
            // moment ago but close() already finished its sweep. Reclaim and dispose
            // it ourselves; if the CAS above fails, close()'s own sweep (or another
            // concurrent release) already won the claim.
            self.dispose(slot);
        }
    }

    /// Claim-then-dispose a slot already held `Claimed` by the caller.
    fn dispose(&self, slot: &Arc<Slot<T>>) {
        let disposed = slot.try_dispose();
        assert!(
            disposed,
            "dispose called on a slot not in Claimed state - internal invariant violated"
        );
        self.disposed.push(Arc::clone(slot));
        // SAFETY: we just transitioned this slot out of Claimed ourselves, so no
        // other thread can be reading its value concurrently.
        if let Some(value) = unsafe { slot.take_value() } {
            self.allocator.on_dispose(value);
        } else {
            error!(
                index = slot.index(),
                "disposed a slot with no value installed - internal invariant violated"
            );
        }
    }
}

/// Fluent construction of a [`Pool`], defaulting to [`AlwaysValid`] validation and the
/// [`SystemClock`].
pub struct PoolBuilder<T, A, V = AlwaysValid, C = SystemClock> {
    capacity: usize,
    allocator: A,
    validation: V,
    clock: C,
    _value: PhantomData<T>,
}

impl<T, A> PoolBuilder<T, A, AlwaysValid, SystemClock>
where
    T: Send + 'static,
    A: Allocator<T>,
{
    /// Start building a pool of the given capacity using `allocator`.
    pub fn new(capacity: usize, allocator: A) -> Self {
        Self {
            capacity,
            allocator,
            validation: AlwaysValid,
            clock: SystemClock::default(),
            _value: PhantomData,
        }
    }
}

impl<T, A, V, C> PoolBuilder<T, A, V, C>
where
    T: Send + 'static,
    A: Allocator<T>,
    V: ValidationStrategy<T>,
    C: Clock,
{
    /// Override the capacity passed to [`PoolBuilder::new`].
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Replace the validation strategy.
    pub fn validation<V2: ValidationStrategy<T>>(self, validation: V2) -> PoolBuilder<T, A, V2, C> {
        PoolBuilder {
            capacity: self.capacity,
            allocator: self.allocator,
            validation,
            clock: self.clock,
            _value: PhantomData,
        }
    }

    /// Replace the clock.
    pub fn clock<C2: Clock>(self, clock: C2) -> PoolBuilder<T, A, V, C2> {
        PoolBuilder {
            capacity: self.capacity,
            allocator: self.allocator,
            validation: self.validation,
            clock,
            _value: PhantomData,
        }
    }

    /// Finish construction.
    pub fn build(self) -> Arc<Pool<T, A, V, C>> {
        Pool::new(self.capacity, self.allocator, self.validation, self.clock)
    }
}

/// RAII guard for a claimed value.
///
/// Derefs directly to `T`. Returns the value to the pool (validating, releasing, or
/// disposing as appropriate) exactly once, when dropped.
pub struct PoolGuard<T, A, V = AlwaysValid, C = SystemClock>
where
    T: Send + 'static,
    A: Allocator<T>,
    V: ValidationStrategy<T>,
    C: Clock,
{
    pool: Arc<Pool<T, A, V, C>>,
    // Always `Some` until `Drop` runs; an `Option` only so `Drop` can take ownership
    // without violating the destructor's `&mut self` signature.
    slot: Option<Arc<Slot<T>>>,
}

impl<T, A, V, C> Deref for PoolGuard<T, A, V, C>
where
    T: Send + 'static,
    A: Allocator<T>,
    V: ValidationStrategy<T>,
    C: Clock,
{
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard exclusively holds its slot Claimed for its entire
        // lifetime, until Drop releases it.
        unsafe { self.slot.as_ref().expect("guard used after drop").value_ref() }
    }
}

impl<T, A, V, C> DerefMut for PoolGuard<T, A, V, C>
where
    T: Send + 'static,
    A: Allocator<T>,
    V: ValidationStrategy<T>,
    C: Clock,
{
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe { self.slot.as_ref().expect("guard used after drop").value_mut() }
    }
}

impl<T, A, V, C> Drop for PoolGuard<T, A, V, C>
where
    T: Send + 'static,
    A: Allocator<T>,
    V: ValidationStrategy<T>,
    C: Clock,
{
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(&slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicU32;
    use tracing_test::traced_test;

    struct CountingAllocator {
        created: AtomicU32,
        disposed: AtomicU32,
    }

    impl CountingAllocator {
        fn new() -> Self {
            Self {
                created: AtomicU32::new(0),
                disposed: AtomicU32::new(0),
            }
        }
    }

    impl Allocator<u32> for CountingAllocator {
        type Error = Infallible;

        fn create(&self) -> Result<u32, Self::Error> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        fn on_dispose(&self, _value: u32) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn acquire_and_release_recycles_same_slot() {
        let pool = Pool::with_defaults(4, CountingAllocator::new());
        let first = pool.acquire(Duration::from_millis(50)).unwrap();
        let first_value = *first;
        drop(first);
        let second = pool.acquire(Duration::from_millis(50)).unwrap();
        assert_eq!(*second, first_value, "thread-local fast path should reuse the same value");
    }

    #[test]
    fn grows_up_to_capacity_then_times_out() {
        let pool = Pool::with_defaults(2, CountingAllocator::new());
        let a = pool.acquire(Duration::from_millis(50)).unwrap();
        let b = pool.acquire(Duration::from_millis(50)).unwrap();
        let err = pool.acquire(Duration::from_millis(20));
        assert!(matches!(err, Err(AcquireError::Timeout)));
        drop(a);
        drop(b);
    }

    #[test]
    fn invalid_slot_is_disposed_and_replaced() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = Pool::new(2, CountingAllocator::new(), MaxIdle::new(10), Arc::clone(&clock));
        let first = pool.acquire(Duration::from_millis(50)).unwrap();
        let first_value = *first;
        drop(first);
        clock.advance(100);
        let second = pool.acquire(Duration::from_millis(50)).unwrap();
        assert_ne!(
            *second, first_value,
            "slot idle past its max should be disposed and replaced with a fresh value"
        );
    }

    #[test]
    fn close_is_idempotent() {
        let pool = Pool::with_defaults(2, CountingAllocator::new());
        let guard = pool.acquire(Duration::from_millis(50)).unwrap();
        drop(guard);
        pool.close();
        pool.close();
        assert!(pool.is_closed());
    }

    #[test]
    fn acquire_after_close_fails_fast() {
        let pool = Pool::with_defaults(2, CountingAllocator::new());
        pool.close();
        let err = pool.acquire(Duration::from_millis(10));
        assert!(matches!(err, Err(AcquireError::Closed)));
    }

    #[test]
    fn builder_defaults_to_always_valid_and_system_clock() {
        let pool = PoolBuilder::new(2, CountingAllocator::new()).build();
        let first = pool.acquire(Duration::from_millis(50)).unwrap();
        let first_value = *first;
        drop(first);
        let second = pool.acquire(Duration::from_millis(50)).unwrap();
        assert_eq!(
            *second, first_value,
            "no validation strategy supplied should mean every released slot stays valid"
        );
    }

    #[test]
    fn builder_capacity_overrides_constructor_argument() {
        let pool = PoolBuilder::new(1, CountingAllocator::new())
            .capacity(3)
            .build();
        let a = pool.acquire(Duration::from_millis(50)).unwrap();
        let b = pool.acquire(Duration::from_millis(50)).unwrap();
        let c = pool.acquire(Duration::from_millis(50)).unwrap();
        assert_eq!(pool.size(), 3, "capacity() should widen the pool past the constructor's 1");
        drop(a);
        drop(b);
        drop(c);
    }

    #[test]
    #[traced_test]
    fn growth_logs_pool_exhausted() {
        let pool = Pool::with_defaults(1, CountingAllocator::new());
        let _guard = pool.acquire(Duration::from_millis(50)).unwrap();
        assert!(logs_contain("pool exhausted"));
    }

    #[test]
    #[traced_test]
    fn close_with_held_slot_logs_still_held() {
        let pool = Pool::with_defaults(1, CountingAllocator::new());
        let guard = pool.acquire(Duration::from_millis(50)).unwrap();
        pool.close();
        assert!(logs_contain("still held by in-flight acquirers"));
        drop(guard);
    }
}
