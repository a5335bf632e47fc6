//! Bounded pool of blocking workers.
//!
//! Jobs are queued FIFO and handed out by a single dispatcher task, which
//! waits for a semaphore permit before moving each job onto tokio's blocking
//! thread pool. The number of permits is the pool size, so at most `size`
//! jobs run at once; they may finish in any order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Minimum number of concurrent downloads.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum number of concurrent downloads.
pub const MAX_CONCURRENCY: usize = 8;

/// Default number of concurrent downloads.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Clamp a requested concurrency to the supported range.
#[must_use]
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Default concurrency for this machine: the default, or fewer if the
/// machine has fewer cores.
#[must_use]
pub fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism().map_or(DEFAULT_CONCURRENCY, usize::from);
    clamp_concurrency(cores.min(DEFAULT_CONCURRENCY))
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Decrements the running count when a job ends, even by panic.
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a submitted job's result.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Wait for the job to finish.
    ///
    /// Fails if the job panicked or the pool shut down before running it.
    pub async fn join(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| Error::Pool("job ended without producing a result".to_string()))
    }
}

/// Fixed-size worker pool for blocking jobs.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Job>,
    semaphore: Arc<Semaphore>,
    size: Mutex<usize>,
    running: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs at once (clamped to 1-8).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = clamp_concurrency(size);
        let semaphore = Arc::new(Semaphore::new(size));
        let running = Arc::new(AtomicUsize::new(0));
        let queued = Arc::new(AtomicUsize::new(0));
        let (queue, rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch(
            rx,
            Arc::clone(&semaphore),
            Arc::clone(&running),
            Arc::clone(&queued),
        ));
        info!("Worker pool started with {} workers", size);

        Self {
            queue,
            semaphore,
            size: Mutex::new(size),
            running,
            queued,
        }
    }

    /// Current pool size.
    #[must_use]
    pub fn size(&self) -> usize {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs submitted but not yet started.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Change the pool size (clamped to 1-8). Returns the applied size.
    ///
    /// Growing takes effect immediately. Shrinking retires permits as
    /// running jobs release them, so jobs already running are not affected.
    pub fn resize(&self, requested: usize) -> usize {
        let new_size = clamp_concurrency(requested);
        let mut size = self.size.lock().unwrap_or_else(PoisonError::into_inner);
        let old_size = *size;

        if new_size > old_size {
            self.semaphore.add_permits(new_size - old_size);
        } else if new_size < old_size {
            let excess = old_size - new_size;
            let retired = self.semaphore.forget_permits(excess);
            let remaining = excess - retired;
            if remaining > 0 {
                let semaphore = Arc::clone(&self.semaphore);
                tokio::spawn(async move {
                    match u32::try_from(remaining) {
                        Ok(n) => {
                            if let Ok(permits) = semaphore.acquire_many_owned(n).await {
                                permits.forget();
                            }
                        }
                        Err(e) => warn!("Cannot retire {} permits: {}", remaining, e),
                    }
                });
            }
        }

        if new_size != old_size {
            debug!("Worker pool resized from {} to {}", old_size, new_size);
        }
        *size = new_size;
        new_size
    }

    /// Queue a blocking job.
    pub fn submit<F, T>(&self, job: F) -> Result<JobHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(job());
        });

        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.queue.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Pool("dispatcher has stopped".to_string()));
        }
        Ok(JobHandle { rx })
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Job>,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            warn!("Worker pool semaphore closed; dropping queued jobs");
            break;
        };
        queued.fetch_sub(1, Ordering::SeqCst);
        running.fetch_add(1, Ordering::SeqCst);
        let guard = RunningGuard(Arc::clone(&running));

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _guard = guard;
            job();
        });
    }
    debug!("Worker pool dispatcher stopped");
}
