//! Background eviction thread with an interruptible sleep.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Result, SystemError};

// ---------------------------------------------------------------------------
// Wait control
// ---------------------------------------------------------------------------

/// A run flag paired with a condition variable.  `wait_for` sleeps until the
/// timeout elapses or `stop` is called, whichever comes first.
#[derive(Debug, Default)]
pub(crate) struct WaitControl {
    running: Mutex<bool>,
    wake: Condvar,
}

impl WaitControl {
    pub fn start(&self) {
        *self.running.lock() = true;
    }

    pub fn stop(&self) {
        let mut running = self.running.lock();
        *running = false;
        self.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Returns `true` if still running after the wait, `false` once stopped.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut running = self.running.lock();
        while *running {
            if self.wake.wait_until(&mut running, deadline).timed_out() {
                break;
            }
        }
        *running
    }
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

/// Runs a pass every `interval` on a dedicated thread until stopped.
/// Both `start` and `stop` are idempotent.
#[derive(Debug, Default)]
pub(crate) struct Sweeper {
    control: Arc<WaitControl>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    /// Spawn the thread.  Returns `Ok(false)` if it was already running.
    pub fn start<F>(&self, interval: Duration, pass: F) -> Result<bool>
    where
        F: Fn() + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(false);
        }

        self.control.start();
        let control = Arc::clone(&self.control);
        let spawned = thread::Builder::new()
            .name("courier-sweeper".into())
            .spawn(move || {
                while control.wait_for(interval) {
                    pass();
                }
            });

        match spawned {
            Ok(h) => {
                debug!(interval_ms = interval.as_millis() as u64, "Cache sweeper started");
                *handle = Some(h);
                Ok(true)
            }
            Err(e) => {
                self.control.stop();
                warn!(error = %e, "Failed to spawn cache sweeper");
                Err(SystemError::OperationNotSupported.into())
            }
        }
    }

    /// Wake the thread and wait for it to exit.  The handle lock is held
    /// throughout, so a concurrent `start` sees either the old thread or none.
    pub fn stop(&self) {
        let mut slot = self.handle.lock();
        let Some(handle) = slot.take() else {
            return;
        };
        self.control.stop();
        if handle.join().is_err() {
            warn!("Cache sweeper panicked");
        }
        debug!("Cache sweeper stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some() && self.control.is_running()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn wait_times_out_while_running() {
        let control = WaitControl::default();
        control.start();
        let started = Instant::now();
        assert!(control.wait_for(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_interrupts_wait() {
        let control = Arc::new(WaitControl::default());
        control.start();

        let waiter = Arc::clone(&control);
        let started = Instant::now();
        let t = thread::spawn(move || waiter.wait_for(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        control.stop();
        assert!(!t.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sweeper_runs_passes_until_stopped() {
        let sweeper = Sweeper::default();
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&passes);

        assert!(sweeper
            .start(Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap());
        assert!(sweeper.is_running());
        // Second start is a no-op.
        assert!(!sweeper.start(Duration::from_millis(5), || {}).unwrap());

        thread::sleep(Duration::from_millis(60));
        sweeper.stop();
        sweeper.stop();
        assert!(!sweeper.is_running());

        let seen = passes.load(Ordering::SeqCst);
        assert!(seen > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(passes.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn racing_start_and_stop_stay_consistent() {
        let sweeper = Arc::new(Sweeper::default());
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let sweeper = Arc::clone(&sweeper);
                thread::spawn(move || {
                    for _ in 0..25 {
                        if i % 2 == 0 {
                            sweeper.start(Duration::from_millis(1), || {}).unwrap();
                        } else {
                            sweeper.stop();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // A stored handle always belongs to a live, running thread.
        assert_eq!(
            sweeper.handle.lock().is_some(),
            sweeper.control.is_running()
        );
        sweeper.stop();
        assert!(sweeper.start(Duration::from_millis(1), || {}).unwrap());
        assert!(sweeper.is_running());
        sweeper.stop();
    }

    #[test]
    fn stop_does_not_wait_out_the_interval() {
        let sweeper = Sweeper::default();
        sweeper.start(Duration::from_secs(60), || {}).unwrap();
        let started = Instant::now();
        sweeper.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
