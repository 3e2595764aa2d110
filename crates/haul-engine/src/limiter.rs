//! Bounded admission for concurrent transfers.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Counting semaphore with a fixed number of slots.
///
/// `acquire` blocks until a slot is free; dropping the returned [`Permit`]
/// frees it and wakes one waiter. Waiters are not served in any
/// particular order.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    slots: Arc<Slots>,
}

struct Slots {
    capacity: usize,
    in_flight: Mutex<usize>,
    freed: Condvar,
}

impl Slots {
    // The counter is only touched with plain arithmetic, so a poisoned lock
    // still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConcurrencyLimiter {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Slots {
                capacity: capacity.max(1),
                in_flight: Mutex::new(0),
                freed: Condvar::new(),
            }),
        }
    }

    /// Reserve a slot, blocking for as long as it takes.
    pub fn acquire(&self) -> Permit {
        let mut in_flight = self.slots.lock();
        while *in_flight >= self.slots.capacity {
            in_flight = self
                .slots
                .freed
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;
        Permit {
            slots: Arc::clone(&self.slots),
        }
    }

    /// Reserve a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut in_flight = self.slots.lock();
        if *in_flight >= self.slots.capacity {
            return None;
        }
        *in_flight += 1;
        Some(Permit {
            slots: Arc::clone(&self.slots),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity
    }

    pub fn in_flight(&self) -> usize {
        *self.slots.lock()
    }
}

/// A reserved slot. Released on drop.
pub struct Permit {
    slots: Arc<Slots>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut in_flight = self.slots.lock();
        *in_flight -= 1;
        self.slots.freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_respects_capacity() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_flight(), 2);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_zero_capacity_admits_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        let _p = limiter.acquire();
        assert!(limiter.try_acquire().is_none());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let limiter = ConcurrencyLimiter::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let permit = limiter.acquire();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _permit = permit;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.in_flight(), 0);
    }
}
