//! Network pool — the generic pool plus a camera-to-worker map.
//!
//! RTSP receive loops for all cameras are multiplexed onto this pool's
//! workers. Assignment is advisory: `assign` hands out deterministic,
//! stable round-robin worker indices so the stream manager can spread
//! cameras evenly, but nothing forces a camera's tasks onto "its"
//! worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use cg_common::PipelineError;

use crate::pool::{PoolConfig, PoolStats, TaskHandle, ThreadPool};

/// Worker pool for RTSP receive loops.
pub struct NetworkPool {
    pool: ThreadPool,
    num_threads: usize,
    assignments: Mutex<HashMap<String, usize>>,
    /// Round-robin cursor.
    next_worker: AtomicUsize,
}

impl NetworkPool {
    /// Start the pool; fails when a worker thread cannot be spawned.
    pub fn new(num_threads: usize) -> Result<Self, PipelineError> {
        let num_threads = num_threads.max(1);
        Ok(Self {
            pool: ThreadPool::new(PoolConfig {
                num_threads,
                name: "net".to_string(),
                enable_affinity: false,
            })?,
            num_threads,
            assignments: Mutex::new(HashMap::new()),
            next_worker: AtomicUsize::new(0),
        })
    }

    /// Assign a camera to a worker index. Re-assigning an
    /// already-present camera returns its existing slot.
    pub fn assign(&self, camera_id: &str) -> usize {
        let mut assignments = self.assignments.lock();
        if let Some(&worker) = assignments.get(camera_id) {
            return worker;
        }

        let worker = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.num_threads;
        assignments.insert(camera_id.to_string(), worker);
        debug!(camera_id, worker, "camera assigned to network worker");
        worker
    }

    pub fn unassign(&self, camera_id: &str) {
        self.assignments.lock().remove(camera_id);
    }

    /// Worker index for a camera; 0 when unassigned.
    pub fn assigned_worker(&self, camera_id: &str) -> usize {
        self.assignments.lock().get(camera_id).copied().unwrap_or(0)
    }

    /// Camera count per worker index.
    pub fn cameras_per_worker(&self) -> HashMap<usize, usize> {
        let assignments = self.assignments.lock();
        let mut counts = HashMap::new();
        for &worker in assignments.values() {
            *counts.entry(worker).or_insert(0) += 1;
        }
        counts
    }

    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, PipelineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(task)
    }

    pub fn shutdown(&self, wait_for_tasks: bool) {
        self.pool.shutdown(wait_for_tasks);
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    pub fn thread_count(&self) -> usize {
        self.num_threads
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_assignment() {
        let pool = NetworkPool::new(3).unwrap();
        assert_eq!(pool.assign("cam-0"), 0);
        assert_eq!(pool.assign("cam-1"), 1);
        assert_eq!(pool.assign("cam-2"), 2);
        assert_eq!(pool.assign("cam-3"), 0); // wraps
    }

    #[test]
    fn reassignment_is_stable() {
        let pool = NetworkPool::new(4).unwrap();
        let first = pool.assign("cam-a");
        pool.assign("cam-b");
        pool.assign("cam-c");
        assert_eq!(pool.assign("cam-a"), first);
    }

    #[test]
    fn unassign_frees_the_entry_not_the_slot() {
        let pool = NetworkPool::new(2).unwrap();
        pool.assign("cam-a"); // worker 0
        pool.unassign("cam-a");
        // The round-robin cursor does not rewind.
        assert_eq!(pool.assign("cam-b"), 1);
        assert_eq!(pool.assigned_worker("cam-a"), 0, "default for unknown");
    }

    #[test]
    fn cameras_per_worker_counts() {
        let pool = NetworkPool::new(2).unwrap();
        pool.assign("a");
        pool.assign("b");
        pool.assign("c");

        let counts = pool.cameras_per_worker();
        assert_eq!(counts[&0], 2);
        assert_eq!(counts[&1], 1);
    }

    #[test]
    fn submits_through_to_the_pool() {
        let pool = NetworkPool::new(2).unwrap();
        let handle = pool.submit(|| "done").unwrap();
        assert_eq!(handle.wait(), Some("done"));
    }
}
