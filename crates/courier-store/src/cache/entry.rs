use std::time::{Duration, Instant};

/// A cached value together with the last time anyone used it.
#[derive(Debug, Clone)]
pub(crate) struct Cached<T> {
    value: T,
    last_access: Instant,
}

impl<T> Cached<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            last_access: Instant::now(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mark the entry as used and return it.
    pub fn touch(&mut self) -> &mut T {
        self.last_access = Instant::now();
        &mut self.value
    }

    /// Mutable access that does not count as a use.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_access) > ttl
    }
}
