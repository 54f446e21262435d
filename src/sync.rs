use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Monotonic counter semaphore. Submissions signal it after replay and the
/// staging allocator defers frees on its value, so waits always terminate
/// once the signaling submit has run.
#[derive(Debug, Default)]
pub struct TimelineSemaphore {
    value: Mutex<u64>,
    signaled: Condvar,
}

impl TimelineSemaphore {
    pub fn new(initial_value: u64) -> Self {
        Self {
            value: Mutex::new(initial_value),
            signaled: Condvar::new(),
        }
    }

    pub fn current_value(&self) -> u64 {
        *self.value.lock().unwrap()
    }

    /// Raises the counter; values never go backwards.
    pub fn signal(&self, value: u64) {
        let mut current = self.value.lock().unwrap();
        if value > *current {
            *current = value;
            self.signaled.notify_all();
        }
    }

    /// Blocks until the counter reaches `value`.
    pub fn wait(&self, value: u64) {
        let mut current = self.value.lock().unwrap();
        while *current < value {
            current = self.signaled.wait(current).unwrap();
        }
    }

    /// Like [`wait`](Self::wait) with a deadline; returns whether the value
    /// was reached.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> bool {
        let mut current = self.value.lock().unwrap();
        while *current < value {
            let (guard, result) = self.signaled.wait_timeout(current, timeout).unwrap();
            current = guard;
            if result.timed_out() {
                return *current >= value;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_is_monotonic() {
        let sem = TimelineSemaphore::new(5);
        sem.signal(3);
        assert_eq!(sem.current_value(), 5);
        sem.signal(9);
        assert_eq!(sem.current_value(), 9);
    }

    #[test]
    fn wait_unblocks_on_signal_from_other_thread() {
        let sem = Arc::new(TimelineSemaphore::new(0));
        let waiter = {
            let sem = sem.clone();
            std::thread::spawn(move || sem.wait(2))
        };
        sem.signal(1);
        sem.signal(2);
        waiter.join().unwrap();
        assert!(sem.wait_timeout(2, Duration::from_millis(1)));
    }
}
