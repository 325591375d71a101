//! In-flight write tracking for flush coordination

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Counts writes in flight; `wait` blocks until none remain
#[derive(Debug, Default)]
pub struct WriteBarrier {
    in_flight: AtomicUsize,
    lock: Mutex<()>,
    drained: Condvar,
}

impl WriteBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a write about to start
    pub fn acquire(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark a registered write as done; unmatched calls are ignored
    pub fn complete(&self) {
        let prev = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                let _guard = self.lock.lock();
                self.drained.notify_all();
            }
            Ok(_) => {}
            Err(_) => warn!("write completed without a matching acquire"),
        }
    }

    /// Block until every acquired write completed
    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while self.in_flight.load(Ordering::Acquire) > 0 {
            self.drained.wait(&mut guard);
        }
    }

    /// Writes currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Acquire now, complete when the returned guard drops
    pub fn write_scope(&self) -> WriteScope<'_> {
        self.acquire();
        WriteScope { barrier: self }
    }
}

/// Guard returned by [`WriteBarrier::write_scope`]
#[derive(Debug)]
pub struct WriteScope<'a> {
    barrier: &'a WriteBarrier,
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        self.barrier.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_without_writes_returns() {
        let barrier = WriteBarrier::new();
        barrier.wait();
        assert_eq!(barrier.in_flight(), 0);
    }

    #[test]
    fn test_wait_blocks_until_complete() {
        let barrier = Arc::new(WriteBarrier::new());
        barrier.acquire();
        barrier.acquire();

        let done = Arc::new(AtomicBool::new(false));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                barrier.wait();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));
        barrier.complete();
        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));
        barrier.complete();

        waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unmatched_complete_keeps_zero() {
        let barrier = WriteBarrier::new();
        barrier.complete();
        assert_eq!(barrier.in_flight(), 0);
        barrier.wait();

        barrier.acquire();
        barrier.complete();
        barrier.complete();
        assert_eq!(barrier.in_flight(), 0);
        barrier.wait();
    }

    #[test]
    fn test_write_scope() {
        let barrier = WriteBarrier::new();
        {
            let _scope = barrier.write_scope();
            assert_eq!(barrier.in_flight(), 1);
        }
        assert_eq!(barrier.in_flight(), 0);
        barrier.wait();
    }
}
