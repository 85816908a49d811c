//! `cg-runtime` — queues and worker pools.
//!
//! - [`queue`] — the bounded lock-free SPSC ring buffer that sits
//!   between each camera's receive loop and decode loop.
//! - [`pool`] — a generic FIFO worker pool.
//! - [`network_pool`] — pool specialization with round-robin camera
//!   assignment for RTSP receive loops.
//! - [`decode_pool`] — pool specialization where every worker owns a
//!   persistent CUDA context.

pub mod decode_pool;
pub mod network_pool;
pub mod pool;
pub mod queue;

pub use decode_pool::{DecodePool, DecodePoolConfig, DecodePoolStats};
pub use network_pool::NetworkPool;
pub use pool::{PoolConfig, PoolStats, TaskHandle, ThreadPool};
pub use queue::BoundedQueue;
