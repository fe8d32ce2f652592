//! Result publication and cancellation shared between workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Cloneable stop flag. Every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// New token, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A cell that accepts one value. The first writer wins; later writes are dropped.
#[derive(Debug)]
pub struct ResultSlot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Default for ResultSlot<T> {
    fn default() -> Self {
        ResultSlot {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` if the slot is empty and wake all waiters.
    ///
    /// Returns whether this call filled the slot.
    pub fn publish(&self, value: T) -> bool {
        let mut guard = self.value.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(value);
        drop(guard);
        self.ready.notify_all();
        true
    }

    /// Whether a value has been published.
    pub fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Wake waiters without publishing, so they re-check their stop conditions.
    pub fn wake(&self) {
        let _guard = self.value.lock();
        self.ready.notify_all();
    }

    /// Block until a value is published or `timeout` elapses.
    ///
    /// Returns whether the slot is filled. Never waits longer than `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.value.lock();
        if guard.is_none() {
            let _ = self.ready.wait_for(&mut guard, timeout);
        }
        guard.is_some()
    }

    /// Remove the published value.
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_first_writer_wins() {
        let slot = ResultSlot::new();
        assert!(!slot.is_filled());
        assert!(slot.publish(1u32));
        assert!(!slot.publish(2u32));
        assert!(slot.is_filled());
        assert_eq!(slot.take(), Some(1));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_wait_timeout_is_bounded() {
        let slot: ResultSlot<u32> = ResultSlot::new();
        let start = Instant::now();
        assert!(!slot.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_wakes_on_publish() {
        let slot = ResultSlot::new();
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(10));
                slot.publish(7u32);
            });
            let start = Instant::now();
            while !slot.wait_timeout(Duration::from_millis(50)) {
                assert!(start.elapsed() < Duration::from_secs(5));
            }
        });
        assert_eq!(slot.take(), Some(7));
    }

    #[test]
    fn test_concurrent_publishers_store_one_value() {
        let slot = ResultSlot::new();
        let winners: usize = thread::scope(|scope| {
            let handles: Vec<_> = (0..8u32)
                .map(|i| {
                    let slot = &slot;
                    scope.spawn(move || slot.publish(i))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(winners, 1);
        assert!(slot.take().is_some());
    }
}
