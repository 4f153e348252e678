use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide count of clients listening for broadcasts.
///
/// The atomic is the only synchronization point: `increment` and `decrement`
/// never block and return the value produced by their own update, so the
/// number carried by a notice always matches the mutation that triggered it.
///
/// The value is signed. A disconnect that is counted twice shows up as a
/// negative reading instead of wrapping around.
#[derive(Debug, Default)]
pub struct PresenceCounter {
    online: AtomicI64,
}

impl PresenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> i64 {
        self.online.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn decrement(&self) -> i64 {
        self.online.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn current(&self) -> i64 {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn returns_value_after_update() {
        let counter = PresenceCounter::new();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn double_counted_disconnect_goes_negative() {
        let counter = PresenceCounter::new();
        assert_eq!(counter.decrement(), -1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let counter = Arc::new(PresenceCounter::new());
        let mut workers = Vec::new();

        for i in 0..200 {
            let counter = Arc::clone(&counter);
            workers.push(thread::spawn(move || {
                if i % 2 == 0 {
                    counter.increment();
                } else {
                    counter.decrement();
                }
            }));
        }

        for worker in workers {
            worker.join().expect("worker thread panicked");
        }

        assert_eq!(counter.current(), 0);
    }
}
