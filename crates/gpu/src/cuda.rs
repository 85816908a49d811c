//! Raw CUDA driver bindings, loaded at runtime via `libloading`.
//!
//! Only the primitives the decode path actually needs are bound:
//! secondary context create/destroy/bind, context push/pop for
//! off-thread driver calls, pitched device allocations, and 2-D
//! device-to-device copies. Everything else (device enumeration, the
//! primary context) goes through cudarc in [`crate::context`].
//!
//! Loading at runtime keeps the pipeline usable on hosts without an
//! NVIDIA driver — the CPU decode path never touches this module.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::ptr;
use std::sync::{Arc, OnceLock};

use libloading::Library;
use tracing::{debug, info};

use cg_common::GpuError;

/// CUDA driver result code — 0 means success.
pub type CuResult = i32;

pub const CUDA_SUCCESS: CuResult = 0;

/// Opaque CUDA context handle.
pub type CuContext = *mut c_void;

/// CUDA device ordinal handle.
pub type CuDevice = c_int;

/// CUDA device pointer (GPU virtual address).
pub type CuDevicePtr = u64;

/// `CUmemorytype` values from `cuda.h`.
const CU_MEMORYTYPE_DEVICE: c_uint = 2;

/// 2-D copy descriptor. Matches `CUDA_MEMCPY2D` from `cuda.h` — field
/// order and types must not change.
#[repr(C)]
#[derive(Clone)]
pub struct CudaMemcpy2d {
    pub src_x_in_bytes: usize,
    pub src_y: usize,
    pub src_memory_type: c_uint,
    pub src_host: *const c_void,
    pub src_device: CuDevicePtr,
    pub src_array: *mut c_void,
    pub src_pitch: usize,

    pub dst_x_in_bytes: usize,
    pub dst_y: usize,
    pub dst_memory_type: c_uint,
    pub dst_host: *mut c_void,
    pub dst_device: CuDevicePtr,
    pub dst_array: *mut c_void,
    pub dst_pitch: usize,

    pub width_in_bytes: usize,
    pub height: usize,
}

impl Default for CudaMemcpy2d {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid descriptor; pointers become null
        // and the caller fills in the fields that matter.
        unsafe { std::mem::zeroed() }
    }
}

/// Dynamically loaded CUDA driver API subset.
#[allow(non_snake_case)]
pub struct CudaApi {
    /// Keeps the shared library mapped while any symbol is callable.
    _lib: Library,

    cuInit: unsafe extern "C" fn(flags: c_uint) -> CuResult,
    cuDeviceGetCount: unsafe extern "C" fn(count: *mut c_int) -> CuResult,
    cuDeviceGet: unsafe extern "C" fn(device: *mut CuDevice, ordinal: c_int) -> CuResult,
    cuCtxCreate:
        unsafe extern "C" fn(pctx: *mut CuContext, flags: c_uint, dev: CuDevice) -> CuResult,
    cuCtxDestroy: unsafe extern "C" fn(ctx: CuContext) -> CuResult,
    cuCtxSetCurrent: unsafe extern "C" fn(ctx: CuContext) -> CuResult,
    cuCtxPushCurrent: unsafe extern "C" fn(ctx: CuContext) -> CuResult,
    cuCtxPopCurrent: unsafe extern "C" fn(pctx: *mut CuContext) -> CuResult,
    cuMemAllocPitch: unsafe extern "C" fn(
        dptr: *mut CuDevicePtr,
        pitch: *mut usize,
        width_in_bytes: usize,
        height: usize,
        element_size_bytes: c_uint,
    ) -> CuResult,
    cuMemFree: unsafe extern "C" fn(dptr: CuDevicePtr) -> CuResult,
    cuMemcpy2D: unsafe extern "C" fn(copy: *const CudaMemcpy2d) -> CuResult,
    cuGetErrorString: unsafe extern "C" fn(error: CuResult, pstr: *mut *const c_char) -> CuResult,
}

// SAFETY: the driver API is thread-safe by contract; the function
// pointers reference code in the mapped library, which `_lib` keeps
// alive for the lifetime of this struct.
unsafe impl Send for CudaApi {}
unsafe impl Sync for CudaApi {}

impl std::fmt::Debug for CudaApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaApi").field("loaded", &true).finish()
    }
}

macro_rules! load_symbol {
    ($lib:expr, $name:literal) => {
        // SAFETY: the signature comes from the official `cuda.h` for a
        // well-known symbol; a missing symbol is a load error, not UB.
        *unsafe { $lib.get(concat!($name, "\0").as_bytes()) }.map_err(|e| {
            GpuError::DriverUnavailable(format!(concat!($name, ": {}"), e))
        })?
    };
}

impl CudaApi {
    /// Load the CUDA driver library and resolve the symbol table.
    pub fn load() -> Result<Self, GpuError> {
        let lib_name = Self::library_name();
        debug!(library = lib_name, "loading CUDA driver library");

        // SAFETY: loading the system CUDA driver; its initializers only
        // register driver state.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            GpuError::DriverUnavailable(format!(
                "failed to load {lib_name}: {e}. Is the NVIDIA driver installed?"
            ))
        })?;

        let api = Self {
            cuInit: load_symbol!(lib, "cuInit"),
            cuDeviceGetCount: load_symbol!(lib, "cuDeviceGetCount"),
            cuDeviceGet: load_symbol!(lib, "cuDeviceGet"),
            cuCtxCreate: load_symbol!(lib, "cuCtxCreate_v2"),
            cuCtxDestroy: load_symbol!(lib, "cuCtxDestroy_v2"),
            cuCtxSetCurrent: load_symbol!(lib, "cuCtxSetCurrent"),
            cuCtxPushCurrent: load_symbol!(lib, "cuCtxPushCurrent_v2"),
            cuCtxPopCurrent: load_symbol!(lib, "cuCtxPopCurrent_v2"),
            cuMemAllocPitch: load_symbol!(lib, "cuMemAllocPitch_v2"),
            cuMemFree: load_symbol!(lib, "cuMemFree_v2"),
            cuMemcpy2D: load_symbol!(lib, "cuMemcpy2D_v2"),
            cuGetErrorString: load_symbol!(lib, "cuGetErrorString"),
            _lib: lib,
        };

        // SAFETY: cuInit is safe to call repeatedly; flags must be 0.
        check(unsafe { (api.cuInit)(0) }, "cuInit")?;
        info!(library = lib_name, "CUDA driver initialized");
        Ok(api)
    }

    fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "nvcuda.dll"
        } else {
            "libcuda.so.1"
        }
    }

    pub fn device_count(&self) -> Result<i32, GpuError> {
        let mut count: c_int = 0;
        // SAFETY: out-pointer to a valid local.
        check(
            unsafe { (self.cuDeviceGetCount)(&mut count) },
            "cuDeviceGetCount",
        )?;
        Ok(count)
    }

    /// Create a new (secondary) context on `device_id`. The caller owns
    /// the handle and must destroy it via [`CudaApi::destroy_context`].
    pub fn create_context(&self, device_id: i32) -> Result<CuContext, GpuError> {
        let mut device: CuDevice = 0;
        // SAFETY: out-pointer to a valid local; ordinal validated by the
        // driver.
        check(
            unsafe { (self.cuDeviceGet)(&mut device, device_id) },
            "cuDeviceGet",
        )?;

        let mut ctx: CuContext = ptr::null_mut();
        // SAFETY: out-pointer to a valid local; flags 0 = default
        // scheduling.
        check(
            unsafe { (self.cuCtxCreate)(&mut ctx, 0, device) },
            "cuCtxCreate",
        )?;
        Ok(ctx)
    }

    pub fn destroy_context(&self, ctx: CuContext) -> Result<(), GpuError> {
        if ctx.is_null() {
            return Ok(());
        }
        // SAFETY: ctx came from cuCtxCreate and is destroyed exactly once
        // by the owning WorkerContext.
        check(unsafe { (self.cuCtxDestroy)(ctx) }, "cuCtxDestroy")
    }

    /// Bind `ctx` as the calling thread's current context.
    pub fn set_current(&self, ctx: CuContext) -> Result<(), GpuError> {
        // SAFETY: ctx is a live context handle.
        check(unsafe { (self.cuCtxSetCurrent)(ctx) }, "cuCtxSetCurrent")
    }

    /// Push `ctx` onto the calling thread's context stack; the returned
    /// guard pops it on drop. For driver calls made off the decode
    /// worker that owns the context (quality changes, teardown).
    pub fn push_current(&self, ctx: CuContext) -> Result<ContextGuard<'_>, GpuError> {
        // SAFETY: ctx is a live context handle.
        check(unsafe { (self.cuCtxPushCurrent)(ctx) }, "cuCtxPushCurrent")?;
        Ok(ContextGuard { api: self })
    }

    /// Pitched 2-D allocation. Returns (device pointer, pitch in bytes).
    pub fn alloc_pitch(
        &self,
        width_in_bytes: usize,
        height: usize,
    ) -> Result<(CuDevicePtr, usize), GpuError> {
        let mut dptr: CuDevicePtr = 0;
        let mut pitch: usize = 0;
        // SAFETY: out-pointers to valid locals; 16-byte element size
        // satisfies NV12 texel alignment.
        let result =
            unsafe { (self.cuMemAllocPitch)(&mut dptr, &mut pitch, width_in_bytes, height, 16) };
        if result != CUDA_SUCCESS {
            return Err(GpuError::AllocFailed {
                size: width_in_bytes * height,
            });
        }
        Ok((dptr, pitch))
    }

    pub fn free(&self, dptr: CuDevicePtr) -> Result<(), GpuError> {
        if dptr == 0 {
            return Ok(());
        }
        // SAFETY: dptr came from cuMemAllocPitch and is freed once.
        check(unsafe { (self.cuMemFree)(dptr) }, "cuMemFree")
    }

    /// Device-to-device 2-D copy of `width_in_bytes` × `height`.
    pub fn memcpy_2d_device(
        &self,
        src: CuDevicePtr,
        src_pitch: usize,
        dst: CuDevicePtr,
        dst_pitch: usize,
        width_in_bytes: usize,
        height: usize,
    ) -> Result<(), GpuError> {
        let copy = CudaMemcpy2d {
            src_memory_type: CU_MEMORYTYPE_DEVICE,
            src_device: src,
            src_pitch,
            dst_memory_type: CU_MEMORYTYPE_DEVICE,
            dst_device: dst,
            dst_pitch,
            width_in_bytes,
            height,
            ..CudaMemcpy2d::default()
        };
        // SAFETY: the descriptor references live device allocations large
        // enough for the described region (the caller sized them).
        check(unsafe { (self.cuMemcpy2D)(&copy) }, "cuMemcpy2D")
    }

    /// Human-readable driver error string.
    pub fn error_string(&self, code: CuResult) -> String {
        let mut ptr: *const c_char = ptr::null();
        // SAFETY: out-pointer to a valid local; the driver returns a
        // static string.
        let result = unsafe { (self.cuGetErrorString)(code, &mut ptr) };
        if result != CUDA_SUCCESS || ptr.is_null() {
            return format!("CUDA error {code}");
        }
        // SAFETY: the driver guarantees a NUL-terminated static string.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// RAII guard for a pushed context; pops on drop.
pub struct ContextGuard<'a> {
    api: &'a CudaApi,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let mut prev: CuContext = ptr::null_mut();
        // SAFETY: pops the context this guard pushed.
        let result = unsafe { (self.api.cuCtxPopCurrent)(&mut prev) };
        if result != CUDA_SUCCESS {
            tracing::error!(code = result, "cuCtxPopCurrent failed");
        }
    }
}

fn check(result: CuResult, call: &'static str) -> Result<(), GpuError> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(GpuError::Driver { call, code: result })
    }
}

/// Process-wide driver handle. The first successful load is shared; a
/// failed load is cached so hosts without the driver answer quickly.
pub fn cuda_api() -> Result<Arc<CudaApi>, GpuError> {
    static API: OnceLock<Result<Arc<CudaApi>, String>> = OnceLock::new();
    API.get_or_init(|| CudaApi::load().map(Arc::new).map_err(|e| e.to_string()))
        .clone()
        .map_err(GpuError::DriverUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memcpy_descriptor_defaults_to_zero() {
        let copy = CudaMemcpy2d::default();
        assert_eq!(copy.src_device, 0);
        assert_eq!(copy.dst_device, 0);
        assert!(copy.src_host.is_null());
        assert_eq!(copy.width_in_bytes, 0);
    }

    #[test]
    fn check_maps_failure_codes() {
        assert!(check(CUDA_SUCCESS, "cuTest").is_ok());
        let err = check(999, "cuTest").unwrap_err();
        assert!(err.to_string().contains("cuTest"));
        assert!(err.to_string().contains("999"));
    }

    #[test]
    fn load_failure_is_graceful() {
        // On machines without the NVIDIA driver this must be an error,
        // never a panic; with the driver present it must succeed.
        match cuda_api() {
            Ok(api) => {
                let count = api.device_count().unwrap_or(0);
                assert!(count >= 0);
            }
            Err(e) => {
                assert!(matches!(
                    e,
                    GpuError::DriverUnavailable(_) | GpuError::Driver { .. }
                ));
            }
        }
    }
}
