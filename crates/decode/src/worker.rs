//! Worker pool for background decode jobs.
//!
//! Workers pull jobs from a shared queue and push results into a bounded
//! completion channel. The channel capacity is the backpressure point:
//! when the consumer falls behind, workers block on delivery rather than
//! dropping completed work.

use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Callback that executes one job and produces its completion.
///
/// Returning `None` means the job produced nothing to deliver (the job
/// decided to drop itself); no completion is sent in that case.
pub type JobRunner<J, R> = Arc<dyn Fn(J) -> Option<R> + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,

    /// Capacity of the bounded completion channel. Workers block when the
    /// channel is full until the consumer drains it.
    pub completion_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            completion_capacity: 64,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            completion_capacity: 64,
        }
    }

    /// Set the completion channel capacity.
    pub fn with_completion_capacity(mut self, capacity: usize) -> Self {
        self.completion_capacity = capacity.max(1);
        self
    }
}

/// Receiving end of the completion channel.
///
/// Owned by the single consumer thread. Dropping the receiver unblocks any
/// worker waiting to deliver and lets the pool wind down.
pub struct CompletionReceiver<R> {
    rx: mpsc::Receiver<R>,
}

impl<R> CompletionReceiver<R> {
    /// Take one completion if available, without blocking.
    pub fn try_recv(&self) -> Option<R> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for one completion. Test and shutdown helper;
    /// the frame loop should use [`CompletionReceiver::try_recv`].
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<R> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Pool of worker threads executing jobs in the background.
///
/// Jobs are executed in submission order across the pool, but completions
/// may be delivered out of order: consumers must correlate by an id carried
/// in the result, never by arrival order.
///
/// Dropping the pool closes the job queue; workers finish their current job
/// and exit. Threads are detached on drop; use [`WorkerPool::shutdown`] to
/// join them (drop or keep draining the completion receiver first, or a
/// worker blocked on a full channel will never finish).
pub struct WorkerPool<J: Send + 'static> {
    job_tx: Option<mpsc::Sender<J>>,
    workers: Vec<Worker>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn a worker pool and return it with the completion receiver.
    pub fn spawn<R: Send + 'static>(
        config: PoolConfig,
        runner: JobRunner<J, R>,
    ) -> (Self, CompletionReceiver<R>) {
        let (job_tx, job_rx) = mpsc::channel::<J>();
        let (result_tx, result_rx) = mpsc::sync_channel::<R>(config.completion_capacity);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let mut workers = Vec::with_capacity(config.num_workers);

        for id in 0..config.num_workers {
            workers.push(Worker::new(
                id,
                Arc::clone(&job_rx),
                result_tx.clone(),
                runner.clone(),
            ));
        }

        (
            Self {
                job_tx: Some(job_tx),
                workers,
            },
            CompletionReceiver { rx: result_rx },
        )
    }

    /// Submit a job to the pool.
    ///
    /// Non-blocking: the job queue is unbounded, only completion delivery
    /// applies backpressure. Returns `false` if the pool has shut down.
    pub fn submit(&self, job: J) -> bool {
        match &self.job_tx {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Close the job queue and wait for all workers to exit.
    pub fn shutdown(mut self) {
        self.job_tx = None;
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        // Signal only; remaining workers exit once the queue closes and the
        // completion receiver is gone.
        self.job_tx = None;
    }
}

/// A single worker thread.
struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new<J: Send + 'static, R: Send + 'static>(
        id: usize,
        job_rx: Arc<Mutex<mpsc::Receiver<J>>>,
        result_tx: mpsc::SyncSender<R>,
        runner: JobRunner<J, R>,
    ) -> Self {
        let thread = thread::Builder::new()
            .name(format!("medley-decode-{}", id))
            .spawn(move || {
                Self::run(id, job_rx, result_tx, runner);
            })
            .expect("Failed to spawn decode worker thread");

        Self {
            thread: Some(thread),
        }
    }

    /// Main worker loop.
    ///
    /// Lock, receive, unlock immediately so other workers can grab jobs
    /// while this one decodes.
    fn run<J: Send + 'static, R: Send + 'static>(
        id: usize,
        job_rx: Arc<Mutex<mpsc::Receiver<J>>>,
        result_tx: mpsc::SyncSender<R>,
        runner: JobRunner<J, R>,
    ) {
        log::debug!("decode worker {} started", id);
        loop {
            let job = {
                let guard = match job_rx.lock() {
                    Ok(guard) => guard,
                    Err(_) => break,
                };
                guard.recv()
            };

            match job {
                Ok(job) => {
                    if let Some(result) = runner(job) {
                        // Blocks when the completion channel is full; errors
                        // only when the consumer is gone.
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                }
                Err(_) => break,
            }
        }
        log::debug!("decode worker {} exiting", id);
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            thread.join().expect("decode worker thread panicked");
        }
    }
}
