//! Serialization thread.
//!
//! Every command and every marshalled worker result runs as a job on one dedicated thread, in
//! strict FIFO order of submission. The busy counter covers queued plus in-flight jobs.

use crate::config::DispatcherConfig;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, sync_channel, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Job(Job),
    Shutdown,
}

#[derive(Default)]
struct BusyCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

impl BusyCounter {
    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

struct BusyGuard<'a>(&'a BusyCounter);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

pub struct Dispatcher {
    sender: Mutex<Option<Sender<Message>>>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
    busy: Arc<BusyCounter>,
    last_completed: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Dispatcher {
    /// Spawn the serialization thread.
    pub fn start(config: &DispatcherConfig) -> Result<Self, EngineError> {
        let (sender, receiver) = channel::<Message>();
        let busy = Arc::new(BusyCounter::default());
        let last_completed = Arc::new(Mutex::new(None));

        let thread_busy = Arc::clone(&busy);
        let thread_last = Arc::clone(&last_completed);
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                debug!("Serialization thread started");
                for message in receiver {
                    match message {
                        Message::Job(job) => {
                            let _guard = BusyGuard(&thread_busy);
                            if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                                error!(
                                    panic = %panic_message(panic.as_ref()),
                                    "Job panicked on the serialization thread"
                                );
                            }
                            *thread_last.lock() = Some(Utc::now());
                        }
                        Message::Shutdown => break,
                    }
                }
                debug!("Serialization thread stopped");
            })
            .map_err(|e| {
                EngineError::Dispatcher(format!("Failed to spawn serialization thread: {}", e))
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            busy,
            last_completed,
        })
    }

    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queue a job and return immediately.
    pub fn post_event(&self, job: Job) -> Result<(), EngineError> {
        self.try_post(job)
            .map_err(|_| EngineError::Dispatcher("Dispatcher is shut down".to_string()))
    }

    /// Queue a job, handing it back if the queue no longer accepts work.
    pub(crate) fn try_post(&self, job: Job) -> Result<(), Job> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(job);
        };
        self.busy.increment();
        match sender.send(Message::Job(job)) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.busy.decrement();
                match err.0 {
                    Message::Job(job) => Err(job),
                    Message::Shutdown => Err(Box::new(|| {})),
                }
            }
        }
    }

    /// Queue a job and block until it has run.
    ///
    /// # Panics
    ///
    /// Panics when called from the serialization thread, where waiting would deadlock.
    pub fn post_and_wait_event(&self, job: Job) -> Result<(), EngineError> {
        if self.is_dispatch_thread() {
            panic!("post_and_wait called from the serialization thread; this would deadlock");
        }
        let (done_tx, done_rx) = sync_channel::<()>(1);
        self.post_event(Box::new(move || {
            job();
            let _ = done_tx.send(());
        }))?;
        done_rx
            .recv()
            .map_err(|_| EngineError::Dispatcher("Job did not complete".to_string()))
    }

    /// Queued plus in-flight jobs.
    pub fn pending_jobs(&self) -> usize {
        *self.busy.count.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.pending_jobs() > 0
    }

    /// Block until the queue is empty and no job is running.
    pub fn wait_idle(&self) {
        let mut count = self.busy.count.lock();
        while *count > 0 {
            self.busy.idle.wait(&mut count);
        }
    }

    /// UTC time at which the most recent job finished.
    pub fn last_action_completed(&self) -> Option<DateTime<Utc>> {
        *self.last_completed.lock()
    }

    /// Stop accepting jobs, let the queue drain and join the thread.
    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Message::Shutdown);
        }
        if self.is_dispatch_thread() {
            // The last engine reference went away inside a job; the loop exits on its own.
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Serialization thread terminated abnormally");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
