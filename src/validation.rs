//! Validation strategies: decide whether a slot's value is still usable before reuse.

/// Decides whether a pooled value may still be handed out.
///
/// Called both when a slot is considered for reuse on `acquire` and when a slot is
/// released, to decide whether to dispose it instead of republishing it.
pub trait ValidationStrategy<T>: Send + Sync {
    /// Returns `true` if `value`, having been idle for `idle_millis`, is still usable.
    fn is_valid(&self, value: &T, idle_millis: i64) -> bool;
}

/// Accepts every value regardless of idle time.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysValid;

impl<T> ValidationStrategy<T> for AlwaysValid {
    fn is_valid(&self, _value: &T, _idle_millis: i64) -> bool {
        true
    }
}

/// Rejects a value once it has been idle longer than a configured bound.
#[derive(Debug, Clone, Copy)]
pub struct MaxIdle {
    max_idle_millis: i64,
}

impl MaxIdle {
    /// Construct a strategy that rejects values idle longer than `max_idle_millis`.
    pub fn new(max_idle_millis: i64) -> Self {
        Self { max_idle_millis }
    }
}

impl<T> ValidationStrategy<T> for MaxIdle {
    fn is_valid(&self, _value: &T, idle_millis: i64) -> bool {
        idle_millis <= self.max_idle_millis
    }
}

/// Requires every wrapped strategy to accept the value.
pub struct AllOf<T> {
    strategies: Vec<Box<dyn ValidationStrategy<T> + Send + Sync>>,
}

impl<T> AllOf<T> {
    /// Construct a combinator requiring all of `strategies` to accept.
    pub fn new(strategies: Vec<Box<dyn ValidationStrategy<T> + Send + Sync>>) -> Self {
        Self { strategies }
    }
}

impl<T> ValidationStrategy<T> for AllOf<T> {
    fn is_valid(&self, value: &T, idle_millis: i64) -> bool {
        self.strategies
            .iter()
            .all(|s| s.is_valid(value, idle_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_valid_accepts_anything() {
        assert!(AlwaysValid.is_valid(&42, i64::MAX));
    }

    #[test]
    fn max_idle_rejects_past_bound() {
        let strategy = MaxIdle::new(30);
        assert!(strategy.is_valid(&(), 30));
        assert!(!strategy.is_valid(&(), 31));
    }

    #[test]
    fn all_of_requires_every_strategy() {
        let combo = AllOf::new(vec![Box::new(MaxIdle::new(50)), Box::new(MaxIdle::new(10))]);
        assert!(combo.is_valid(&(), 5));
        assert!(!combo.is_valid(&(), 20));
    }
}
