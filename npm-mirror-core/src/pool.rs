//! Fixed-size worker pool draining a shared FIFO queue.
//!
//! Tasks may enqueue further tasks while they run. Quiescence is tracked with
//! an in-flight counter that is incremented on enqueue and decremented when a
//! task finishes, so a parent task always keeps the counter above zero until
//! its children are queued.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Identity of the context executing or reporting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerId {
    /// The thread driving the run.
    Driver,
    /// A pool worker, numbered from zero.
    Worker(usize),
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Driver => write!(f, "driver"),
            WorkerId::Worker(n) => write!(f, "worker-{:02}", n),
        }
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type TaskFn = Box<dyn FnOnce(WorkerId) -> Result<()> + Send + 'static>;

enum Job {
    Run { label: String, task: TaskFn },
    Stop,
}

struct Shared {
    in_flight: Mutex<usize>,
    idle: Condvar,
    stopping: AtomicBool,
    failed: AtomicUsize,
    cancel: CancelToken,
}

impl Shared {
    fn lock_in_flight(&self) -> Result<MutexGuard<'_, usize>> {
        self.in_flight
            .lock()
            .map_err(|e| Error::Pool(format!("in-flight counter poisoned: {}", e)))
    }

    fn finish(&self) {
        // A poisoned counter can only come from a panic while holding the
        // lock, which never happens; recover the guard regardless.
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }

    fn discarding(&self) -> bool {
        self.stopping.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }
}

/// A fixed set of worker threads sharing one unbounded FIFO queue.
pub struct WorkerPool {
    size: usize,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl WorkerPool {
    /// Creates a pool of `size` workers. Nothing runs until [`start`](Self::start).
    pub fn new(size: usize) -> Self {
        Self::with_cancel(size, CancelToken::new())
    }

    /// Creates a pool that discards queued work once `cancel` is tripped.
    pub fn with_cancel(size: usize, cancel: CancelToken) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            size: size.max(1),
            sender,
            receiver,
            shared: Arc::new(Shared {
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
                stopping: AtomicBool::new(false),
                failed: AtomicUsize::new(0),
                cancel,
            }),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            poll_interval: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(200),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Number of tasks that returned an error or panicked.
    pub fn failed_tasks(&self) -> usize {
        self.shared.failed.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    /// Launches the workers. Starting a started pool is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut workers = self
            .workers
            .lock()
            .map_err(|e| Error::Pool(format!("worker list poisoned: {}", e)))?;

        for n in 0..self.size {
            let receiver = self.receiver.clone();
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("npm-mirror-worker-{}", n))
                .spawn(move || worker_loop(WorkerId::Worker(n), receiver, shared))
                .map_err(|e| Error::Pool(format!("failed to spawn worker {}: {}", n, e)))?;
            workers.push(handle);
        }

        debug!(workers = self.size, "worker pool started");
        Ok(())
    }

    /// Appends a task to the queue. Never blocks.
    ///
    /// Callable from the driver or from a running task. Tasks enqueued after
    /// shutdown are dropped.
    pub fn enqueue<F>(&self, label: impl Into<String>, task: F)
    where
        F: FnOnce(WorkerId) -> Result<()> + Send + 'static,
    {
        let label = label.into();
        if self.shared.stopping.load(Ordering::SeqCst) {
            debug!(task = %label, "pool stopped, dropping task");
            return;
        }

        {
            let mut in_flight = self.shared.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            *in_flight += 1;
        }

        let job = Job::Run {
            label,
            task: Box::new(task),
        };
        if self.sender.send(job).is_err() {
            // The pool owns a receiver, so the channel cannot be disconnected.
            self.shared.finish();
        }
    }

    /// Starts the pool if needed and blocks until no task is queued or running.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be started.
    pub fn run_until_idle(&self) -> Result<()> {
        self.start()?;

        let mut in_flight = self.shared.lock_in_flight()?;
        while *in_flight > 0 {
            let (guard, _) = self
                .shared
                .idle
                .wait_timeout(in_flight, self.poll_interval)
                .map_err(|e| Error::Pool(format!("in-flight counter poisoned: {}", e)))?;
            in_flight = guard;

            let queued = self.receiver.len();
            debug!(
                worker = %WorkerId::Driver,
                queued,
                running = in_flight.saturating_sub(queued),
                "waiting for workers"
            );
        }

        Ok(())
    }

    /// Stops every worker. Idempotent.
    ///
    /// Queued tasks that have not started are discarded. Workers still busy
    /// after the grace period are detached.
    pub fn shutdown(&self) {
        if !self.started.load(Ordering::SeqCst)
            || self.shared.stopping.swap(true, Ordering::SeqCst)
        {
            return;
        }

        for _ in 0..self.size {
            let _ = self.sender.send(Job::Stop);
        }

        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(e) => std::mem::take(&mut *e.into_inner()),
        };

        let deadline = Instant::now() + self.shutdown_grace;
        while Instant::now() < deadline && !handles.iter().all(|h| h.is_finished()) {
            thread::sleep(Duration::from_millis(10));
        }

        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                warn!(thread = %name, "worker still busy at shutdown, detaching");
            }
        }

        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: WorkerId, receiver: Receiver<Job>, shared: Arc<Shared>) {
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Stop => break,
            Job::Run { label, task } => {
                if shared.discarding() {
                    debug!(worker = %id, task = %label, "discarding task");
                } else {
                    match panic::catch_unwind(AssertUnwindSafe(|| task(id))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            shared.failed.fetch_add(1, Ordering::SeqCst);
                            error!(worker = %id, task = %label, error = %e, "task failed");
                        }
                        Err(_) => {
                            shared.failed.fetch_add(1, Ordering::SeqCst);
                            error!(worker = %id, task = %label, "task panicked");
                        }
                    }
                }
                shared.finish();
            }
        }
    }
}
