//! Interruptible periodic background task.
//!
//! Runs a closure on a fixed interval in a named thread. Dropping the task
//! wakes the thread, which exits before its next run; the drop joins it, so
//! after drop no further runs happen.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A background thread invoking a task on a fixed interval.
pub struct PeriodicTask {
    stop: Arc<StopFlag>,
    handle: Option<JoinHandle<()>>,
}

struct StopFlag {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl PeriodicTask {
    /// Spawn the task thread. The first run happens one `interval` after
    /// spawning, not immediately.
    pub fn spawn<F>(name: &str, interval: Duration, task: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(StopFlag {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                {
                    let mut stopped = stop_for_thread.stopped.lock();
                    if *stopped {
                        return;
                    }
                    stop_for_thread.cond.wait_for(&mut stopped, interval);
                    if *stopped {
                        return;
                    }
                }
                // Run outside the lock so stopping never waits for a run.
                task();
            })
            .unwrap_or_else(|e| panic!("failed to spawn periodic task thread: {e}"));
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        *self.stop.stopped.lock() = true;
        self.stop.cond.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("periodic task thread panicked");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
