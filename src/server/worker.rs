use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::registry::Instances;
use crate::rpc::PluginEventMessage;

/// How long the worker sleeps between forced re-checks. The audio thread signals the condition
/// variable without taking its mutex (it must not block), so a wakeup can get lost in a narrow
/// race; the heartbeat bounds how stale the queues can get when that happens.
const WAKE_HEARTBEAT: Duration = Duration::from_millis(100);

lazy_static! {
    static ref QUEUE_WORKER: QueueWorker = QueueWorker::new();
}

/// The process-wide worker.
pub fn queue_worker() -> &'static QueueWorker {
    &QUEUE_WORKER
}

/// The single background thread that drains every live instance's outbound ring and fans the
/// events out to that instance's clients.
///
/// The thread exists exactly while clients are connected anywhere in the process: the first
/// connect starts it, the last disconnect stops it. Instances are drained one at a time, so a
/// client's worst-case latency is bounded by the total backlog rather than by scheduling luck.
pub struct QueueWorker {
    thread: Mutex<Option<JoinHandle<()>>>,
    is_ready: AtomicBool,
    stop_requested: AtomicBool,
    wake_mutex: Mutex<()>,
    wake_cv: Condvar,
}

impl QueueWorker {
    fn new() -> Self {
        Self {
            thread: Mutex::new(None),
            is_ready: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake_mutex: Mutex::new(()),
            wake_cv: Condvar::new(),
        }
    }

    /// Spawn the worker thread. Returns `false` if it is already running.
    pub fn start(&'static self) -> bool {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            remote_trace!("Queue worker already running");
            return false;
        }

        self.stop_requested.store(false, Ordering::Release);
        let handle = thread::Builder::new()
            .name(String::from("clap-remote-queue-worker"))
            .spawn(move || self.run())
            .expect("Could not spawn the queue worker thread");
        *thread = Some(handle);

        remote_trace!("Queue worker started");
        true
    }

    /// Request a cooperative stop and join the thread. Returns `false` if it was not running.
    /// The lock is held through the join so a racing `start` waits for the old thread to be gone.
    pub fn stop(&self) -> bool {
        let mut thread = self.thread.lock();
        let handle = match thread.take() {
            Some(handle) => handle,
            None => {
                remote_trace!("Queue worker not running");
                return false;
            }
        };

        self.stop_requested.store(true, Ordering::Release);
        self.wake_cv.notify_one();
        if handle.join().is_err() {
            remote_error!("The queue worker thread panicked");
        }

        remote_trace!("Queue worker stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Wake the worker if it isn't already scheduled to run. Called from the audio and main
    /// threads on every event push; never blocks and never allocates. Returns whether this call
    /// performed the transition (a `false` means a wake was already pending, which is just as
    /// good).
    pub fn try_notify(&self) -> bool {
        if self
            .is_ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        self.wake_cv.notify_one();
        true
    }

    fn run(&self) {
        loop {
            {
                let mut guard = self.wake_mutex.lock();
                while !self.is_ready.load(Ordering::Acquire)
                    && !self.stop_requested.load(Ordering::Acquire)
                {
                    self.wake_cv.wait_for(&mut guard, WAKE_HEARTBEAT);
                }
            }

            if self.stop_requested.load(Ordering::Acquire) {
                return;
            }

            // Clear before draining, so a push that races the drain still queues a wake for the
            // next round
            self.is_ready.store(false, Ordering::Release);

            for shared in Instances::all_shared() {
                while let Some(event) = shared.pop_event() {
                    // One shared message per event; each client's write holds its own reference
                    // and releases it when that write completes
                    let message = Arc::new(PluginEventMessage::from_event(event));
                    for client in shared.clients_snapshot() {
                        client.start_shared_write(&message);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_stop_round_trip() {
        let worker = queue_worker();

        assert!(worker.start());
        assert!(worker.is_running());
        // A second start is refused
        assert!(!worker.start());

        assert!(worker.stop());
        assert!(!worker.is_running());
        // A second stop is refused
        assert!(!worker.stop());

        // The worker can come back after a stop
        assert!(worker.start());
        assert!(worker.stop());
    }

    #[test]
    fn notify_coalesces() {
        // A private instance so this doesn't race the process-wide worker used by other tests
        let worker = QueueWorker::new();

        // Without the thread running the flag just latches; only the first notify transitions it
        assert!(worker.try_notify());
        assert!(!worker.try_notify());
        worker.is_ready.store(false, Ordering::Release);
        assert!(worker.try_notify());
    }
}
