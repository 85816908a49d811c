//! Raw FFI bindings for NVIDIA's CUVID (nvcuvid) library.
//!
//! Loaded dynamically at runtime via `libloading`, covering the API
//! surface needed for callback-driven H.264/H.265 decode. Struct layouts
//! match `cuviddec.h` / `nvcuvid.h` — note that several fields are C
//! `unsigned long`, which is 8 bytes on LP64 targets.

use std::ffi::{c_int, c_ulong, c_void};
use std::sync::{Arc, OnceLock};

use libloading::Library;
use tracing::{debug, info};

use cg_common::{CodecError, VideoCodec};

/// CUVID result code — 0 means success.
pub type CuResult = i32;

pub const CUDA_SUCCESS: CuResult = 0;

/// Opaque NVDEC decoder handle.
pub type CuVideoDecoder = *mut c_void;

/// Opaque CUVID parser handle.
pub type CuVideoParser = *mut c_void;

/// CUDA device pointer.
pub type CuDevicePtr = u64;

// ---------------------------------------------------------------------------
// Enums (cuviddec.h)
// ---------------------------------------------------------------------------

/// `cudaVideoCodec`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoCodec {
    H264 = 4,
    Hevc = 8,
}

impl CudaVideoCodec {
    pub fn from_codec(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::H264 => Self::H264,
            VideoCodec::H265 => Self::Hevc,
        }
    }
}

/// `cudaVideoSurfaceFormat`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoSurfaceFormat {
    Nv12 = 0,
}

/// `cudaVideoDeinterlaceMode`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoDeinterlaceMode {
    Weave = 0,
    Bob = 1,
    Adaptive = 2,
}

/// `cudaVideoChromaFormat`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoChromaFormat {
    Monochrome = 0,
    Yuv420 = 1,
    Yuv422 = 2,
    Yuv444 = 3,
}

/// `cudaVideoCreateFlags`: use dedicated NVDEC hardware through CUVID.
pub const CUDA_VIDEO_CREATE_PREFER_CUVID: c_ulong = 4;

/// Flags for [`CuvidSourceDataPacket`].
pub mod packet_flags {
    use std::ffi::c_ulong;

    /// End of stream; flushes the decode pipeline.
    pub const CUVID_PKT_ENDOFSTREAM: c_ulong = 0x01;
    /// The packet timestamp is valid.
    pub const CUVID_PKT_TIMESTAMP: c_ulong = 0x02;
    /// Bitstream discontinuity (seek/reset).
    pub const CUVID_PKT_DISCONTINUITY: c_ulong = 0x04;
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// `CUVIDEOFORMAT` — delivered by the sequence callback.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct CuVideoFormat {
    pub codec: c_int,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub progressive_sequence: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// Minimum decode surfaces the parser needs.
    pub min_num_decode_surfaces: u8,
    pub coded_width: u32,
    pub coded_height: u32,
    pub display_area_left: i32,
    pub display_area_top: i32,
    pub display_area_right: i32,
    pub display_area_bottom: i32,
    pub chroma_format: c_int,
    pub bitrate: u32,
    pub display_aspect_ratio_x: i32,
    pub display_aspect_ratio_y: i32,
    pub video_signal_description: u32,
    pub seqhdr_data_length: u32,
}

impl Default for CuVideoFormat {
    fn default() -> Self {
        // SAFETY: all-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

/// `CUVIDDECODECREATEINFO` — decoder creation parameters.
#[repr(C)]
#[derive(Clone)]
pub struct CuvidDecodeCreateInfo {
    pub width: c_ulong,
    pub height: c_ulong,
    pub num_decode_surfaces: c_ulong,
    pub codec_type: CudaVideoCodec,
    pub chroma_format: CudaVideoChromaFormat,
    pub creation_flags: c_ulong,
    pub bit_depth_minus8: c_ulong,
    pub intra_decode_only: c_ulong,
    pub max_width: c_ulong,
    pub max_height: c_ulong,
    pub reserved1: c_ulong,

    pub display_left: i16,
    pub display_top: i16,
    pub display_right: i16,
    pub display_bottom: i16,

    pub output_format: CudaVideoSurfaceFormat,
    pub deinterlace_mode: CudaVideoDeinterlaceMode,
    pub target_width: c_ulong,
    pub target_height: c_ulong,
    pub num_output_surfaces: c_ulong,
    /// Context lock; null — the decoder handles its own locking.
    pub vid_lock: *mut c_void,

    pub target_rect_left: i16,
    pub target_rect_top: i16,
    pub target_rect_right: i16,
    pub target_rect_bottom: i16,

    pub enable_histogram: c_ulong,
    pub reserved2: [c_ulong; 4],
}

// SAFETY: POD struct; the vid_lock pointer is only read by the driver.
unsafe impl Send for CuvidDecodeCreateInfo {}

impl Default for CuvidDecodeCreateInfo {
    fn default() -> Self {
        // SAFETY: all-zeros is valid; pointers become null. The enum
        // zero values (H264 would be 4) are overwritten by every caller.
        unsafe { std::mem::zeroed() }
    }
}

/// `CUVIDPICPARAMS` (leading fields) — filled by the parser and passed
/// straight back to `cuvidDecodePicture`. Only the header fields are
/// declared; the codec-specific union is opaque to us and the struct is
/// only ever handled behind the parser's own pointer.
#[repr(C)]
pub struct CuvidPicParams {
    pub pic_width_in_mbs: c_int,
    pub frame_height_in_mbs: c_int,
    pub curr_pic_idx: c_int,
    pub field_pic_flag: c_int,
    pub bottom_field_flag: c_int,
    pub second_field: c_int,
    pub bitstream_data_len: u32,
    pub bitstream_data: *const u8,
    pub num_slices: u32,
    pub slice_data_offsets: *const u32,
    pub ref_pic_flag: c_int,
    /// Nonzero for intra pictures — the hardware path's keyframe signal.
    pub intra_pic_flag: c_int,
    pub reserved: [u32; 30],
}

/// `CUVIDPARSERDISPINFO` — one displayable picture.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct CuvidParserDispInfo {
    pub picture_index: c_int,
    pub progressive_frame: c_int,
    pub top_field_first: c_int,
    pub repeat_first_field: c_int,
    pub timestamp: i64,
}

/// `CUVIDPROCPARAMS` — frame mapping parameters.
#[repr(C)]
#[derive(Clone)]
pub struct CuvidProcParams {
    pub progressive_frame: c_int,
    pub second_field: c_int,
    pub top_field_first: c_int,
    pub unpaired_field: c_int,
    pub reserved_flags: u32,
    pub reserved_zero: u32,
    pub raw_input_dptr: u64,
    pub raw_input_pitch: u32,
    pub raw_input_format: u32,
    pub raw_output_dptr: u64,
    pub raw_output_pitch: u32,
    pub reserved1: u32,
    pub output_stream: *mut c_void,
    pub reserved: [u32; 46],
    pub histogram_dptr: *mut u64,
    pub reserved2: [*mut c_void; 1],
}

impl Default for CuvidProcParams {
    fn default() -> Self {
        // SAFETY: all-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

/// `CUVIDSOURCEDATAPACKET` — one buffer fed to the parser.
#[repr(C)]
pub struct CuvidSourceDataPacket {
    pub flags: c_ulong,
    pub payload_size: c_ulong,
    pub payload: *const u8,
    pub timestamp: i64,
}

// SAFETY: the payload pointer only needs to outlive the synchronous
// cuvidParseVideoData call; callers borrow it from a live slice.
unsafe impl Send for CuvidSourceDataPacket {}

// ---------------------------------------------------------------------------
// Parser callbacks and creation parameters
// ---------------------------------------------------------------------------

/// Sequence callback — returns the decode-surface count the caller will
/// provide, or 0 on failure.
pub type SequenceCallback =
    unsafe extern "C" fn(user_data: *mut c_void, format: *mut CuVideoFormat) -> i32;

/// Decode callback — 1 on success, 0 on failure.
pub type DecodeCallback =
    unsafe extern "C" fn(user_data: *mut c_void, pic_params: *mut CuvidPicParams) -> i32;

/// Display callback — 1 on success, 0 on failure. `disp_info` is null at
/// end-of-stream.
pub type DisplayCallback =
    unsafe extern "C" fn(user_data: *mut c_void, disp_info: *mut CuvidParserDispInfo) -> i32;

/// `CUVIDPARSERPARAMS`.
#[repr(C)]
pub struct CuvidParserParams {
    pub codec_type: CudaVideoCodec,
    pub max_num_decode_surfaces: u32,
    /// Timestamp clock rate; 0 keeps input units.
    pub clock_rate: u32,
    /// Error threshold (0..100, 0 = strict).
    pub error_threshold: u32,
    /// Max frame reordering delay (1 = low latency).
    pub max_display_delay: u32,
    pub reserved1: [u32; 5],
    pub user_data: *mut c_void,
    pub sequence_callback: Option<SequenceCallback>,
    pub decode_picture: Option<DecodeCallback>,
    pub display_picture: Option<DisplayCallback>,
    pub get_operating_point: Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> i32>,
    pub get_sei_message: Option<unsafe extern "C" fn(*mut c_void, *mut c_void) -> i32>,
    pub reserved2: [*mut c_void; 5],
    pub ext_video_info: *mut c_void,
}

// SAFETY: raw pointers are only read during parser creation/callbacks;
// the owning session keeps user_data valid for the parser's lifetime.
unsafe impl Send for CuvidParserParams {}

impl Default for CuvidParserParams {
    fn default() -> Self {
        // SAFETY: all-zeros is valid — callbacks become None, pointers
        // null. codec_type is overwritten by every caller.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// Dynamic library wrapper
// ---------------------------------------------------------------------------

macro_rules! load_symbol {
    ($lib:expr, $name:literal) => {
        // SAFETY: signatures follow the official nvcuvid headers for
        // well-known symbols; a missing symbol is a load error.
        *unsafe { $lib.get(concat!($name, "\0").as_bytes()) }
            .map_err(|e| format!(concat!($name, ": {}"), e))?
    };
}

/// Dynamically loaded nvcuvid library with typed function pointers.
#[allow(non_snake_case)]
pub struct CuvidLibrary {
    /// Must outlive every use of the symbols below.
    _lib: Library,

    pub cuvidCreateVideoParser:
        unsafe extern "C" fn(parser: *mut CuVideoParser, params: *mut CuvidParserParams) -> CuResult,
    pub cuvidParseVideoData:
        unsafe extern "C" fn(parser: CuVideoParser, packet: *mut CuvidSourceDataPacket) -> CuResult,
    pub cuvidDestroyVideoParser: unsafe extern "C" fn(parser: CuVideoParser) -> CuResult,

    pub cuvidCreateDecoder: unsafe extern "C" fn(
        decoder: *mut CuVideoDecoder,
        params: *mut CuvidDecodeCreateInfo,
    ) -> CuResult,
    pub cuvidDestroyDecoder: unsafe extern "C" fn(decoder: CuVideoDecoder) -> CuResult,
    pub cuvidDecodePicture:
        unsafe extern "C" fn(decoder: CuVideoDecoder, params: *mut CuvidPicParams) -> CuResult,
    pub cuvidMapVideoFrame64: unsafe extern "C" fn(
        decoder: CuVideoDecoder,
        pic_idx: c_int,
        dev_ptr: *mut CuDevicePtr,
        pitch: *mut u32,
        params: *mut CuvidProcParams,
    ) -> CuResult,
    pub cuvidUnmapVideoFrame64:
        unsafe extern "C" fn(decoder: CuVideoDecoder, dev_ptr: CuDevicePtr) -> CuResult,
}

// SAFETY: the function pointers reference driver code, thread-safe by
// the NVDEC API contract; `_lib` keeps the library mapped.
unsafe impl Send for CuvidLibrary {}
unsafe impl Sync for CuvidLibrary {}

impl std::fmt::Debug for CuvidLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CuvidLibrary").field("loaded", &true).finish()
    }
}

impl CuvidLibrary {
    /// Load nvcuvid from the system path.
    pub fn load() -> Result<Self, String> {
        let lib_name = Self::library_name();
        debug!(library = lib_name, "loading NVDEC library");

        // SAFETY: loading the well-known NVIDIA decode library.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            format!("failed to load {lib_name}: {e}. Is the NVIDIA driver installed?")
        })?;

        let this = Self {
            cuvidCreateVideoParser: load_symbol!(lib, "cuvidCreateVideoParser"),
            cuvidParseVideoData: load_symbol!(lib, "cuvidParseVideoData"),
            cuvidDestroyVideoParser: load_symbol!(lib, "cuvidDestroyVideoParser"),
            cuvidCreateDecoder: load_symbol!(lib, "cuvidCreateDecoder"),
            cuvidDestroyDecoder: load_symbol!(lib, "cuvidDestroyDecoder"),
            cuvidDecodePicture: load_symbol!(lib, "cuvidDecodePicture"),
            cuvidMapVideoFrame64: load_symbol!(lib, "cuvidMapVideoFrame64"),
            cuvidUnmapVideoFrame64: load_symbol!(lib, "cuvidUnmapVideoFrame64"),
            _lib: lib,
        };

        info!(library = lib_name, "NVDEC library loaded");
        Ok(this)
    }

    fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "nvcuvid.dll"
        } else {
            "libnvcuvid.so.1"
        }
    }
}

/// Process-wide nvcuvid handle; load failures are cached.
pub fn cuvid_library() -> Result<Arc<CuvidLibrary>, CodecError> {
    static LIB: OnceLock<Result<Arc<CuvidLibrary>, String>> = OnceLock::new();
    LIB.get_or_init(|| CuvidLibrary::load().map(Arc::new))
        .clone()
        .map_err(CodecError::HardwareUnavailable)
}

/// Map a CUVID result to a readable failure string.
pub fn check_cuvid(result: CuResult, call: &'static str) -> Result<(), String> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(format!("{call} failed with error code {result}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_mapping() {
        assert_eq!(
            CudaVideoCodec::from_codec(VideoCodec::H264),
            CudaVideoCodec::H264
        );
        assert_eq!(
            CudaVideoCodec::from_codec(VideoCodec::H265),
            CudaVideoCodec::Hevc
        );
    }

    #[test]
    fn default_structs_are_zeroed() {
        let info = CuvidDecodeCreateInfo::default();
        assert_eq!(info.width, 0);
        assert!(info.vid_lock.is_null());

        let params = CuvidParserParams::default();
        assert!(params.sequence_callback.is_none());
        assert!(params.user_data.is_null());

        let format = CuVideoFormat::default();
        assert_eq!(format.coded_width, 0);
    }

    #[test]
    fn check_result_reporting() {
        assert!(check_cuvid(CUDA_SUCCESS, "cuvidTest").is_ok());
        let err = check_cuvid(100, "cuvidTest").unwrap_err();
        assert!(err.contains("cuvidTest"));
        assert!(err.contains("100"));
    }

    #[test]
    fn library_load_is_graceful() {
        // With or without the NVIDIA stack this must not panic.
        let _ = cuvid_library();
    }

    #[test]
    fn pic_params_intra_flag_offset() {
        // intra_pic_flag must sit at byte 60 to match cuviddec.h.
        assert_eq!(std::mem::offset_of!(CuvidPicParams, intra_pic_flag), 60);
        assert_eq!(std::mem::offset_of!(CuvidPicParams, bitstream_data), 32);
    }
}
