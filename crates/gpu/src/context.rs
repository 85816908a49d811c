//! CUDA context management.
//!
//! One **primary context** exists per process, created lazily on first
//! use and destroyed at process exit. Each decode worker additionally
//! owns a **secondary context** ([`WorkerContext`]) created at worker
//! startup, bound to that thread, and destroyed when the worker stops.
//! Contexts are never shared between workers.

use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute_enum;
use cudarc::driver::CudaContext;
use parking_lot::Mutex;
use tracing::{debug, info};

use cg_common::GpuError;

use crate::cuda::{cuda_api, CuContext, CudaApi};

/// Information about the CUDA device captured at initialization.
#[derive(Clone, Debug)]
pub struct GpuDeviceInfo {
    /// Device ordinal (0-based index).
    pub ordinal: usize,
    /// Human-readable device name.
    pub name: String,
    /// Total VRAM in bytes.
    pub total_memory: u64,
    /// Compute capability (major, minor).
    pub compute_capability: (u32, u32),
}

/// The process-wide primary context plus cached device info.
#[derive(Debug)]
pub struct PrimaryContext {
    ctx: Arc<CudaContext>,
    info: GpuDeviceInfo,
}

impl PrimaryContext {
    fn init(ordinal: usize) -> Result<Self, GpuError> {
        let device_count = CudaContext::device_count()
            .map_err(|e| GpuError::DeviceInit(format!("failed to get device count: {e}")))?;
        if device_count == 0 {
            return Err(GpuError::NoDevices);
        }

        let ctx = CudaContext::new(ordinal)
            .map_err(|e| GpuError::DeviceInit(format!("device {ordinal}: {e}")))?;

        let name = ctx
            .name()
            .map_err(|e| GpuError::DeviceInit(format!("failed to get device name: {e}")))?;

        let total_memory = {
            // SAFETY: cu_device was obtained from CudaContext::new which
            // validated the ordinal.
            let total = unsafe { cudarc::driver::result::device::total_mem(ctx.cu_device()) }
                .map_err(|e| GpuError::DeviceInit(format!("failed to get VRAM: {e}")))?;
            total as u64
        };

        let cc_major = ctx
            .attribute(CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .map_err(|e| GpuError::DeviceInit(format!("compute capability major: {e}")))?;
        let cc_minor = ctx
            .attribute(CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .map_err(|e| GpuError::DeviceInit(format!("compute capability minor: {e}")))?;

        let info = GpuDeviceInfo {
            ordinal,
            name: name.clone(),
            total_memory,
            compute_capability: (cc_major as u32, cc_minor as u32),
        };

        info!(
            device = %name,
            ordinal,
            vram_mb = total_memory / (1024 * 1024),
            cc = format!("{cc_major}.{cc_minor}"),
            "primary CUDA context initialized"
        );

        Ok(Self { ctx, info })
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    /// The underlying cudarc context.
    pub fn context(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    /// Bind the primary context to the calling thread.
    pub fn bind_to_thread(&self) -> Result<(), GpuError> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| GpuError::DeviceInit(format!("bind_to_thread: {e}")))
    }
}

static PRIMARY: Mutex<Option<Arc<PrimaryContext>>> = Mutex::new(None);

/// Initialize-once access to the primary context.
///
/// The first successful initialization is cached for the life of the
/// process; a failed attempt is retried on the next call.
pub fn primary_context() -> Result<Arc<PrimaryContext>, GpuError> {
    let mut guard = PRIMARY.lock();
    if let Some(ctx) = guard.as_ref() {
        return Ok(ctx.clone());
    }
    let ctx = Arc::new(PrimaryContext::init(0)?);
    *guard = Some(ctx.clone());
    Ok(ctx)
}

/// Whether a CUDA device (and therefore the hardware decode path) is
/// available on this host.
pub fn is_gpu_available() -> bool {
    primary_context().is_ok()
}

/// A secondary CUDA context owned by one decode worker.
///
/// Created at worker startup and made current on that thread; the worker
/// never yields it. Destroyed when the worker shuts down.
pub struct WorkerContext {
    api: Arc<CudaApi>,
    ctx: CuContext,
    device_id: i32,
}

// SAFETY: the raw context handle is only made current/destroyed through
// the driver API, which is thread-safe; ownership is unique.
unsafe impl Send for WorkerContext {}

impl WorkerContext {
    /// Create a context on `device_id` and bind it to the calling thread.
    pub fn new(device_id: i32) -> Result<Self, GpuError> {
        let api = cuda_api()?;
        let ctx = api.create_context(device_id)?;
        api.set_current(ctx)?;
        debug!(device_id, "decode worker CUDA context created");
        Ok(Self {
            api,
            ctx,
            device_id,
        })
    }

    /// Raw context handle, for the decoder's push/pop discipline.
    pub fn raw(&self) -> CuContext {
        self.ctx
    }

    pub fn api(&self) -> &Arc<CudaApi> {
        &self.api
    }

    /// Re-bind this context to the calling thread.
    pub fn make_current(&self) -> Result<(), GpuError> {
        self.api.set_current(self.ctx)
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        if let Err(e) = self.api.destroy_context(self.ctx) {
            tracing::error!(device_id = self.device_id, error = %e, "failed to destroy worker context");
        } else {
            debug!(device_id = self.device_id, "decode worker CUDA context destroyed");
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("device_id", &self.device_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_probe_never_panics() {
        // With or without an NVIDIA device this must return cleanly.
        let _ = is_gpu_available();
    }

    #[test]
    fn primary_context_is_idempotent() {
        match (primary_context(), primary_context()) {
            (Ok(a), Ok(b)) => {
                assert!(Arc::ptr_eq(&a, &b), "same context instance each call");
                assert!(!a.device_info().name.is_empty());
            }
            (Err(_), Err(_)) => {} // no GPU on this host
            _ => panic!("initialization flip-flopped between calls"),
        }
    }

    #[test]
    fn worker_context_requires_driver() {
        match WorkerContext::new(0) {
            Ok(ctx) => {
                assert!(!ctx.raw().is_null());
                ctx.make_current().unwrap();
            }
            Err(e) => {
                // No driver — the error must say so.
                assert!(!e.to_string().is_empty());
            }
        }
    }
}
