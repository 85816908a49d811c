//! `cg-gpu` — CUDA contexts and VRAM accounting.
//!
//! - [`cuda`] — dlopen bindings for the handful of driver primitives the
//!   decode path needs (secondary contexts, pitched allocations, 2-D
//!   copies).
//! - [`context`] — the process-wide primary context singleton and the
//!   per-worker secondary contexts.
//! - [`vram`] — the central VRAM accountant (a ledger; it never
//!   allocates GPU memory itself).

pub mod context;
pub mod cuda;
pub mod vram;

pub use context::{is_gpu_available, primary_context, GpuDeviceInfo, PrimaryContext, WorkerContext};
pub use cuda::{cuda_api, CuContext, CuDevicePtr, CudaApi};
pub use vram::{VramAccountant, VramConfig, VramStats};
