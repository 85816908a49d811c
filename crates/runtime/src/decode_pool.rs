//! Decode pool — every worker owns a persistent CUDA context.
//!
//! Decoder callbacks and driver calls must run on a thread with a CUDA
//! context current. Each worker here creates a dedicated secondary
//! context at startup, binds it, and never yields it, so decode tasks
//! need no ad-hoc context push/pop. Tasks share one FIFO queue.
//!
//! On hosts without an NVIDIA driver the workers run with no context and
//! tasks receive `None` — the software decode path needs no GPU. A host
//! *with* a driver where context creation fails is a pool-level fault:
//! the worker logs the error and exits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use cg_common::{GpuError, PipelineError};
use cg_gpu::WorkerContext;

/// Decode pool configuration.
#[derive(Clone, Debug)]
pub struct DecodePoolConfig {
    pub num_threads: usize,
    /// CUDA device the workers create their contexts on.
    pub device_id: i32,
}

impl Default for DecodePoolConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            device_id: 0,
        }
    }
}

/// Decode pool statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodePoolStats {
    pub per_worker_decode_count: Vec<usize>,
    pub total_decodes: usize,
    pub tasks_in_queue: usize,
}

/// A decode task; receives the worker's context (None on GPU-less
/// hosts).
pub type DecodeTask = Box<dyn FnOnce(Option<&WorkerContext>) + Send + 'static>;

struct QueuedTask {
    camera_id: String,
    task: DecodeTask,
}

struct Shared {
    queue: Mutex<VecDeque<QueuedTask>>,
    available: Condvar,
    running: AtomicBool,
    per_worker: Vec<AtomicUsize>,
}

/// Pool of decode workers with per-worker GPU contexts.
pub struct DecodePool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DecodePool {
    /// Start the pool. Fails when the OS refuses to create a worker
    /// thread; any workers spawned before the failure are joined.
    pub fn new(config: DecodePoolConfig) -> Result<Self, PipelineError> {
        let num_threads = config.num_threads.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            per_worker: (0..num_threads).map(|_| AtomicUsize::new(0)).collect(),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let worker_shared = shared.clone();
            let device_id = config.device_id;
            let spawned = std::thread::Builder::new()
                .name(format!("decode-{worker_id}"))
                .spawn(move || worker_loop(&worker_shared, worker_id, device_id));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(worker_id, error = %e, "decode worker spawn failed");
                    shared.running.store(false, Ordering::Release);
                    shared.available.notify_all();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(PipelineError::WorkerSpawn {
                        pool: "decode".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            threads = num_threads,
            device_id = config.device_id,
            "decode pool started"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Queue a decode task for `camera_id`.
    pub fn submit_decode_task<F>(&self, camera_id: &str, task: F) -> Result<(), PipelineError>
    where
        F: FnOnce(Option<&WorkerContext>) + Send + 'static,
    {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(PipelineError::PoolShutDown);
        }

        {
            let mut queue = self.shared.queue.lock();
            if !self.shared.running.load(Ordering::Acquire) {
                return Err(PipelineError::PoolShutDown);
            }
            queue.push_back(QueuedTask {
                camera_id: camera_id.to_string(),
                task: Box::new(task),
            });
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Stop the pool; contexts are destroyed after the workers join.
    pub fn shutdown(&self, wait_for_tasks: bool) {
        {
            let mut queue = self.shared.queue.lock();
            if !self.shared.running.swap(false, Ordering::AcqRel) {
                return;
            }
            if !wait_for_tasks {
                queue.clear();
            }
        }
        self.shared.available.notify_all();

        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
        info!("decode pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.shared.per_worker.len()
    }

    pub fn stats(&self) -> DecodePoolStats {
        let per_worker: Vec<usize> = self
            .shared
            .per_worker
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect();
        DecodePoolStats {
            total_decodes: per_worker.iter().sum(),
            per_worker_decode_count: per_worker,
            tasks_in_queue: self.shared.queue.lock().len(),
        }
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

fn worker_loop(shared: &Shared, worker_id: usize, device_id: i32) {
    // The context lives on this stack frame for the worker's lifetime
    // and is dropped (destroyed) when the loop exits — after join during
    // shutdown.
    let context = match WorkerContext::new(device_id) {
        Ok(ctx) => Some(ctx),
        Err(GpuError::DriverUnavailable(reason)) => {
            warn!(
                worker_id,
                reason, "no CUDA driver; decode worker runs CPU-only"
            );
            None
        }
        Err(e) => {
            error!(worker_id, error = %e, "decode worker failed to create CUDA context; exiting");
            return;
        }
    };

    loop {
        let queued = {
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

        tracing::trace!(worker_id, camera_id = %queued.camera_id, "running decode task");
        (queued.task)(context.as_ref());
        shared.per_worker[worker_id].fetch_add(1, Ordering::Relaxed);
    }
}
