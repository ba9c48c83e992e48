//! General-purpose background task pool.
//!
//! Runs short fire-and-forget jobs that do not need a render context, mainly
//! reading cached frames back from disk. Render jobs go to the dedicated
//! workers in [`worker`](super::worker) instead: those own decoders and a
//! per-thread render context, and the backend counts them one job at a time.
//! Cache decodes only need a path, so they share this pool and never hold a
//! render worker.
//!
//! Work-stealing deques:
//! - external tasks land in a global injector
//! - each thread drains its own deque, then the injector, then steals
//! - idle threads sleep 1ms between polls
//!
//! Jobs report back through a channel they capture; the pool itself returns
//! nothing. Cancellation is the job's business (check the ticket before doing
//! work), the pool only runs what it was given.
//!
//! Shutdown happens on drop: the flag is raised, threads finish what is
//! queued and exit. A job stuck past the timeout is detached rather than
//! blocking the caller.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of threads running boxed closures.
///
/// Owned by [`RenderBackend`](super::backend::RenderBackend); dropped with it.
///
/// # Example
/// ```ignore
/// let pool = TaskPool::new(2)?;
/// let tx = reports.clone();
/// pool.execute(move || {
///     let result = FrameHashCache::load_cached_frame(&path);
///     let _ = tx.send(result);
/// });
/// ```
pub struct TaskPool {
    injector: Arc<Injector<Job>>,         // Global queue for external tasks
    handles: Vec<thread::JoinHandle<()>>, // Joined (or detached) on drop
    shutdown: Arc<AtomicBool>,            // Raised once, on drop
    /// Queued plus running
    in_flight: Arc<AtomicUsize>,
}

impl TaskPool {
    /// Spawn `num_threads` named threads (`task-N`), at least one.
    ///
    /// # Arguments
    ///
    /// * `num_threads` - Thread count; zero is treated as one
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to spawn a thread. Threads already started
    /// are shut down by the partially built pool's drop.
    pub fn new(num_threads: usize) -> std::io::Result<Self> {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();

        let mut pool = Self { injector, handles: Vec::with_capacity(num_threads), shutdown, in_flight };

        for (id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&pool.injector);
            let shutdown = Arc::clone(&pool.shutdown);
            let in_flight = Arc::clone(&pool.in_flight);
            let stealers = stealers.clone();

            let handle = thread::Builder::new().name(format!("task-{}", id)).spawn(move || {
                trace!("Task thread {} started", id);
                loop {
                    let job = local
                        .pop()
                        .or_else(|| injector.steal_batch_and_pop(&local).success())
                        .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

                    if let Some(job) = job {
                        job();
                        in_flight.fetch_sub(1, Ordering::AcqRel);
                        continue;
                    }
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                trace!("Task thread {} stopped", id);
            })?;
            pool.handles.push(handle);
        }

        trace!("TaskPool initialized: {} threads", num_threads);
        Ok(pool)
    }

    /// Queue `f` on the global injector. Never blocks; FIFO across the pool
    /// is approximate since idle threads steal in batches.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.injector.push(Box::new(f));
    }

    /// Jobs queued or running. Zero means every submitted closure returned.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("TaskPool shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        // Threads exit once the queues are empty; don't hang on a stuck job
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("TaskPool shutdown timeout reached, detaching remaining threads");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("TaskPool: all {} threads stopped", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_runs_all_jobs() {
        let pool = TaskPool::new(3).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.in_flight() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicU32::new(0));
        {
            let pool = TaskPool::new(1).unwrap();
            assert_eq!(pool.threads(), 1);
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
