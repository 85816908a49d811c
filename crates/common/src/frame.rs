//! Decoded frame and decoder memory reporting types.

use crate::color::PixelFormat;

/// Reference to GPU device memory backing a hardware-decoded frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GpuSurfaceRef {
    /// CUDA device pointer to the start of the surface (Y plane).
    pub device_ptr: u64,
    /// Row pitch of the surface in bytes.
    pub pitch: u32,
}

/// One decoded video frame.
///
/// Plane addresses are raw `u64` addresses — host memory for the software
/// path, device memory for the hardware path (`surface` is `Some` in that
/// case). Ownership stays with the decoder: the value is only valid until
/// the next call that advances the decoder (`decode`, `reset`,
/// `set_quality`), so consumers must copy what they need and must not
/// cache the frame.
#[derive(Copy, Clone, Debug)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation timestamp, microseconds.
    pub pts: i64,
    /// Decode timestamp, microseconds.
    pub dts: i64,
    pub is_keyframe: bool,
    /// Plane base addresses (Y, U/UV, V). Unused planes are 0.
    pub planes: [u64; 3],
    /// Per-plane row stride in bytes. Unused planes are 0.
    pub pitch: [u32; 3],
    /// Present when the planes live in GPU device memory.
    pub surface: Option<GpuSurfaceRef>,
}

impl DecodedFrame {
    /// Whether the frame's planes reside in GPU device memory.
    pub fn is_gpu_backed(&self) -> bool {
        self.surface.is_some()
    }
}

/// Decoder memory usage snapshot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// VRAM held by the decoder (surface pool), bytes.
    pub gpu_bytes: usize,
    /// Host memory held by the decoder, bytes (estimate).
    pub system_bytes: usize,
    /// Surfaces currently allocated.
    pub surface_pool_size: usize,
    /// Surfaces the current quality level calls for.
    pub surface_pool_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_backing_flag() {
        let mut frame = DecodedFrame {
            width: 1920,
            height: 1080,
            format: PixelFormat::Nv12,
            pts: 0,
            dts: 0,
            is_keyframe: false,
            planes: [0; 3],
            pitch: [0; 3],
            surface: None,
        };
        assert!(!frame.is_gpu_backed());

        frame.surface = Some(GpuSurfaceRef {
            device_ptr: 0x1000_0000,
            pitch: 2048,
        });
        assert!(frame.is_gpu_backed());
    }
}
