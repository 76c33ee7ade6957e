//! Global download slot pool.
//!
//! The in-use counter is the one piece of state every task touches; it is
//! reserved with compare-and-swap. Waiters park on a condition variable with a
//! bounded wait so they can observe their task's cancellation token.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::config::clamp_downloads;
use crate::error::EngineError;

/// Longest a waiter sleeps before re-checking its cancellation token.
pub const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct SlotPool {
    limit: AtomicUsize,
    in_use: AtomicUsize,
    lock: Mutex<()>,
    freed: Condvar,
}

impl SlotPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(clamp_downloads(limit)),
            in_use: AtomicUsize::new(0),
            lock: Mutex::new(()),
            freed: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Change the ceiling (clamped to 1..=10). Slots already held above a
    /// lowered ceiling drain naturally; no new slot is granted until then.
    pub fn set_limit(&self, limit: usize) -> usize {
        let limit = clamp_downloads(limit);
        self.limit.store(limit, Ordering::Release);
        self.notify();
        limit
    }

    /// Take one slot if one is free.
    pub fn try_reserve(&self) -> bool {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.limit() {
                return false;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Block until a slot is reserved or `cancel` is set.
    pub fn reserve(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        loop {
            cancel.check()?;
            if self.try_reserve() {
                return Ok(());
            }
            let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            if self.in_use() < self.limit() {
                continue;
            }
            let _ = self
                .freed
                .wait_timeout(guard, WAIT_SLICE)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Return one slot and wake waiters.
    pub fn release(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.notify();
    }

    fn notify(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.freed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn reserve_and_release() {
        let pool = SlotPool::new(2);
        assert!(pool.try_reserve());
        assert!(pool.try_reserve());
        assert!(!pool.try_reserve());
        assert_eq!(pool.in_use(), 2);
        pool.release();
        assert!(pool.try_reserve());
        pool.release();
        pool.release();
        pool.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(SlotPool::new(0).limit(), 1);
        assert_eq!(SlotPool::new(99).limit(), 10);
        let pool = SlotPool::new(3);
        assert_eq!(pool.set_limit(7), 7);
        assert_eq!(pool.limit(), 7);
    }

    #[test]
    fn waiter_gets_slot_when_released() {
        let pool = Arc::new(SlotPool::new(1));
        assert!(pool.try_reserve());
        let releaser = Arc::clone(&pool);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            releaser.release();
        });
        pool.reserve(&CancellationToken::new()).unwrap();
        assert_eq!(pool.in_use(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn waiter_observes_cancellation() {
        let pool = Arc::new(SlotPool::new(1));
        assert!(pool.try_reserve());
        let token = CancellationToken::new();
        let setter = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            setter.cancel();
        });
        let started = Instant::now();
        let err = pool.reserve(&token).unwrap_err();
        assert!(err.is_canceled());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.in_use(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn raising_limit_wakes_waiters() {
        let pool = Arc::new(SlotPool::new(1));
        assert!(pool.try_reserve());
        let raiser = Arc::clone(&pool);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            raiser.set_limit(2);
        });
        pool.reserve(&CancellationToken::new()).unwrap();
        assert_eq!(pool.in_use(), 2);
        handle.join().unwrap();
    }
}
