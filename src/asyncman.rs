//! Background worker shared by pipelined connections.
//!
//! Pending requests are tasks on a single-worker runtime; each completion
//! bumps a generation counter that `wait_any` blocks on.

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use tokio::runtime::{Builder, Handle, Runtime};

/// Upper bound on the connections one `wait_any` call can watch, matching
/// the smallest per-platform wait-object limit.
pub const MAX_WAIT: usize = 64;

/// Owns the worker that advances all pending requests registered with it.
/// Many connections share one manager; it must outlive every registration,
/// so drop it only when no connection is pending.
pub struct AsyncMan {
    runtime: Runtime,
    completions: Arc<Completions>,
}

impl AsyncMan {
    /// # Errors
    ///
    /// Will return `Err` if the worker thread cannot be started
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("s3pipe-worker")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            completions: Arc::new(Completions::default()),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    pub(crate) fn completions(&self) -> Arc<Completions> {
        Arc::clone(&self.completions)
    }
}

/// Completion signal: a generation counter under a mutex plus a condvar.
/// Waiters snapshot the generation, re-scan their connections, then sleep
/// until the generation moves past the snapshot.
#[derive(Debug, Default)]
pub(crate) struct Completions {
    generation: Mutex<u64>,
    signal: Condvar,
}

impl Completions {
    pub(crate) fn generation(&self) -> u64 {
        *self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.signal.notify_all();
    }

    /// Block until the generation advances past `seen` or the deadline
    /// passes. Returns false on timeout.
    pub(crate) fn wait_past(&self, seen: u64, deadline: Instant) -> bool {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while *generation == seen {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let (guard, _timeout) = self
                .signal
                .wait_timeout(generation, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            generation = guard;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wait_past_timeout() {
        let completions = Completions::default();
        let seen = completions.generation();
        let started = Instant::now();
        assert!(!completions.wait_past(seen, started + Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_past_notified() {
        let completions = Arc::new(Completions::default());
        let seen = completions.generation();

        let notifier = Arc::clone(&completions);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            notifier.notify();
        });

        assert!(completions.wait_past(seen, Instant::now() + Duration::from_secs(5)));
        thread.join().unwrap();
    }

    #[test]
    fn test_wait_past_already_advanced() {
        let completions = Completions::default();
        let seen = completions.generation();
        completions.notify();
        // No blocking needed when the generation already moved.
        assert!(completions.wait_past(seen, Instant::now()));
    }
}
