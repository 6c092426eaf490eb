use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Why [`ShutdownSignal::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Shutdown,
    /// A command is waiting; the poll tick should run now.
    Nudged,
    Elapsed,
}

/// Cancellation flag for a tracking session, plus an early wake-up for
/// queued commands.
///
/// The session sleeps between polls in [`wait`](Self::wait). `trigger()`
/// ends the sleep for good; `nudge()` ends only the current one so a key
/// press is handled without waiting out the poll interval.
pub struct ShutdownSignal {
    shutdown: AtomicBool,
    /// Pending nudge, consumed by the next wait.
    nudged: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            nudged: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn trigger(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Hold the lock so a waiter between its check and its sleep sees the flag
        let _guard = self.nudged.lock();
        self.condvar.notify_all();
    }

    pub fn nudge(&self) {
        if let Ok(mut nudged) = self.nudged.lock() {
            *nudged = true;
        }
        self.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, or less if triggered or nudged.
    ///
    /// A poisoned lock reads as shutdown.
    pub fn wait(&self, duration: Duration) -> Wake {
        if self.is_shutdown() {
            return Wake::Shutdown;
        }
        let Ok(guard) = self.nudged.lock() else {
            return Wake::Shutdown;
        };
        let Ok((mut nudged, _)) = self
            .condvar
            .wait_timeout_while(guard, duration, |nudged| !*nudged && !self.is_shutdown())
        else {
            return Wake::Shutdown;
        };

        if self.is_shutdown() {
            Wake::Shutdown
        } else if std::mem::take(&mut *nudged) {
            Wake::Nudged
        } else {
            Wake::Elapsed
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());
        signal.trigger();
        assert!(signal.is_shutdown());
        assert_eq!(signal.wait(Duration::from_secs(10)), Wake::Shutdown);
    }

    #[test]
    fn test_wait_elapses() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert_eq!(signal.wait(Duration::from_millis(30)), Wake::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_trigger_from_other_thread() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            let start = Instant::now();
            (waiter.wait(Duration::from_secs(10)), start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        signal.trigger();

        let (wake, elapsed) = handle.join().unwrap();
        assert_eq!(wake, Wake::Shutdown);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_nudge_wakes_once() {
        let signal = ShutdownSignal::new();
        signal.nudge();

        let start = Instant::now();
        assert_eq!(signal.wait(Duration::from_secs(10)), Wake::Nudged);
        assert!(start.elapsed() < Duration::from_millis(100));

        // consumed: the next wait runs its full duration
        assert_eq!(signal.wait(Duration::from_millis(20)), Wake::Elapsed);
        assert!(!signal.is_shutdown());
    }

    #[test]
    fn test_trigger_wins_over_nudge() {
        let signal = ShutdownSignal::new();
        signal.nudge();
        signal.trigger();
        assert_eq!(signal.wait(Duration::from_secs(10)), Wake::Shutdown);
    }
}
