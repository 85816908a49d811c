//! Generic worker pool with a shared FIFO task queue.
//!
//! N workers block on a mutex + condition variable protected queue.
//! Submission hands back a [`TaskHandle`] that resolves to the task's
//! return value. Shutdown either drains the queue (default) or discards
//! pending work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use cg_common::PipelineError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub num_threads: usize,
    /// Used in thread names and logs.
    pub name: String,
    /// Pin worker i to logical core i mod hardware concurrency.
    pub enable_affinity: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            name: "worker-pool".to_string(),
            enable_affinity: false,
        }
    }
}

/// Pool statistics snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub tasks_submitted: usize,
    pub tasks_completed: usize,
    pub tasks_in_queue: usize,
    pub per_worker_task_count: Vec<usize>,
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    running: AtomicBool,
    tasks_submitted: AtomicUsize,
    tasks_completed: AtomicUsize,
    per_worker: Vec<AtomicUsize>,
}

/// Handle to a submitted task's result.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes. `None` when the pool discarded
    /// the task during shutdown.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking poll.
    pub fn try_wait(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Fixed-size worker pool over a FIFO queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    name: String,
}

impl ThreadPool {
    /// Start the pool. Fails when the OS refuses to create a worker
    /// thread; any workers spawned before the failure are joined.
    pub fn new(config: PoolConfig) -> Result<Self, PipelineError> {
        let num_threads = config.num_threads.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            tasks_submitted: AtomicUsize::new(0),
            tasks_completed: AtomicUsize::new(0),
            per_worker: (0..num_threads).map(|_| AtomicUsize::new(0)).collect(),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let worker_shared = shared.clone();
            let enable_affinity = config.enable_affinity;
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{worker_id}", config.name))
                .spawn(move || {
                    if enable_affinity {
                        pin_to_core(worker_id);
                    }
                    worker_loop(&worker_shared, worker_id);
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(pool = %config.name, worker_id, error = %e, "worker spawn failed");
                    shared.running.store(false, Ordering::Release);
                    shared.available.notify_all();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(PipelineError::WorkerSpawn {
                        pool: config.name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(pool = %config.name, threads = num_threads, "worker pool started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            name: config.name,
        })
    }

    /// Queue a task; its return value arrives through the handle.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, PipelineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(PipelineError::PoolShutDown);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let boxed: Task = Box::new(move || {
            let _ = tx.send(task());
        });

        {
            let mut queue = self.shared.queue.lock();
            if !self.shared.running.load(Ordering::Acquire) {
                return Err(PipelineError::PoolShutDown);
            }
            queue.push_back(boxed);
        }
        self.shared.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();

        Ok(TaskHandle { rx })
    }

    /// Stop the pool. `wait_for_tasks` drains the queue before workers
    /// exit; otherwise pending tasks are discarded.
    pub fn shutdown(&self, wait_for_tasks: bool) {
        {
            let mut queue = self.shared.queue.lock();
            if !self.shared.running.swap(false, Ordering::AcqRel) {
                return; // already shut down
            }
            if !wait_for_tasks {
                let discarded = queue.len();
                queue.clear();
                if discarded > 0 {
                    debug!(pool = %self.name, discarded, "discarded pending tasks");
                }
            }
        }
        self.shared.available.notify_all();

        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
        info!(pool = %self.name, "worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.shared.per_worker.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            tasks_submitted: self.shared.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.shared.tasks_completed.load(Ordering::Relaxed),
            tasks_in_queue: self.shared.queue.lock().len(),
            per_worker_task_count: self
                .shared
                .per_worker
                .iter()
                .map(|count| count.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

fn worker_loop(shared: &Shared, worker_id: usize) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        task();
        shared.per_worker[worker_id].fetch_add(1, Ordering::Relaxed);
        shared.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pin the calling thread to `worker_id mod cores` (Linux only; a no-op
/// elsewhere).
#[cfg(target_os = "linux")]
fn pin_to_core(worker_id: usize) {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let core = worker_id % cores;

    // SAFETY: cpu_set_t is POD; sched_setaffinity reads the set for the
    // calling thread (pid 0) only.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            debug!(core, "sched_setaffinity failed");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_worker_id: usize) {
    debug!("CPU affinity not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn pool(threads: usize) -> ThreadPool {
        ThreadPool::new(PoolConfig {
            num_threads: threads,
            name: "test-pool".to_string(),
            enable_affinity: false,
        })
        .unwrap()
    }

    // ── Submission ───────────────────────────────────────────────

    #[test]
    fn submit_returns_task_value() {
        let pool = pool(2);
        let handle = pool.submit(|| 21 * 2).unwrap();
        assert_eq!(handle.wait(), Some(42));
    }

    #[test]
    fn tasks_run_on_all_workers_eventually() {
        let pool = pool(4);
        let counter = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 64);
        let stats = pool.stats();
        assert_eq!(stats.tasks_submitted, 64);
        assert_eq!(stats.tasks_completed, 64);
        assert_eq!(stats.per_worker_task_count.iter().sum::<usize>(), 64);
    }

    // ── Shutdown ─────────────────────────────────────────────────

    #[test]
    fn drain_shutdown_finishes_queued_work() {
        let pool = pool(1);
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..16 {
            let counter = counter.clone();
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.shutdown(true);
        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = pool(1);
        pool.shutdown(true);
        assert!(matches!(
            pool.submit(|| ()),
            Err(PipelineError::PoolShutDown)
        ));
    }

    #[test]
    fn discard_shutdown_drops_pending_tasks() {
        let pool = pool(1);
        let counter = Arc::new(AtomicU32::new(0));

        // Head task blocks the single worker while the rest pile up.
        let gate = Arc::new(AtomicBool::new(false));
        {
            let gate = gate.clone();
            pool.submit(move || {
                while !gate.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        }
        for _ in 0..8 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        // Release the gate only after shutdown has had time to clear the
        // queue; the blocked worker then exits without touching it.
        let unblock = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                gate.store(true, Ordering::Release);
            })
        };
        pool.shutdown(false);
        unblock.join().unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 0, "pending tasks dropped");
    }

    #[test]
    fn shutdown_twice_is_safe() {
        let pool = pool(2);
        pool.shutdown(true);
        pool.shutdown(true);
        assert!(!pool.is_running());
    }
}
