//! Deferred event execution.
//!
//! Flush session callbacks are never run on the I/O completion thread; the
//! manager hands them to an [`EventScheduler`] instead.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};

/// A deferred unit of work.
pub type Event = Box<dyn FnOnce() + Send + 'static>;

/// Runs events off the calling thread.
pub trait EventScheduler: Send + Sync {
    /// Queues `event` for execution. Must not block.
    fn enqueue(&self, event: Event);
}

/// Scheduler backed by one dedicated event thread.
///
/// Events run in the order they were enqueued. Dropping the scheduler runs
/// every queued event and joins the thread.
#[derive(Debug)]
pub struct WorkerScheduler {
    sender: Mutex<Option<Sender<Event>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerScheduler {
    /// Spawns the event thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn new() -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Event>();
        let worker = thread::Builder::new()
            .name("allocmeta-events".into())
            .spawn(move || {
                for event in receiver {
                    event();
                }
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stops accepting events, runs the queued ones and joins the thread.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            // Shut down from one of our own events; the loop ends on its own.
            return;
        }
        if worker.join().is_err() {
            tracing::error!("event thread panicked");
        }
    }
}

impl EventScheduler for WorkerScheduler {
    fn enqueue(&self, event: Event) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) if sender.send(event).is_ok() => {}
            _ => tracing::warn!("event dropped: scheduler is shut down"),
        }
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
