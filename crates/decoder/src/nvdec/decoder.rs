//! The NVDEC decoder implementation.

use std::collections::VecDeque;
use std::ffi::{c_ulong, c_void};
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use cg_common::{
    CodecError, DecodedFrame, DecoderConfig, GpuSurfaceRef, MemoryStats, PixelFormat, StreamQuality,
};
use cg_gpu::{cuda_api, CuContext, CudaApi};

use super::ffi::{
    check_cuvid, cuvid_library, packet_flags, CuVideoDecoder, CuVideoFormat, CuVideoParser,
    CudaVideoChromaFormat, CudaVideoCodec, CudaVideoDeinterlaceMode, CudaVideoSurfaceFormat,
    CuvidDecodeCreateInfo, CuvidLibrary, CuvidParserDispInfo, CuvidParserParams, CuvidPicParams,
    CuvidSourceDataPacket, CUDA_SUCCESS, CUDA_VIDEO_CREATE_PREFER_CUVID,
};
use crate::decoder::{DecodeStatus, Decoder};

/// Upper bound on parser picture indices (DPB slots).
const MAX_PICTURE_INDICES: usize = 32;

/// One surface in the camera's pre-allocated pool.
struct Surface {
    device_ptr: u64,
    pitch: usize,
    in_use: bool,
}

/// A decoded frame waiting in the queue, by pool index.
struct FrameInfo {
    surface_index: usize,
    pts: i64,
    is_keyframe: bool,
}

/// Failure recorded by a parser callback, examined after
/// `cuvidParseVideoData` returns.
enum CallbackError {
    OutOfMemory,
    Failure(String),
}

/// State shared between the decoder and the parser callbacks.
///
/// One mutex guards surfaces, the frame queue, and the decoder handle —
/// the display callback runs on the decoding thread while `get_frame`
/// and `set_quality` may run on another.
struct DecoderState {
    lib: Arc<CuvidLibrary>,
    cuda: Arc<CudaApi>,
    decoder: CuVideoDecoder,
    /// The decoder's own CUDA context, pushed around driver calls made
    /// off the decode worker (quality changes, teardown). Inside parser
    /// callbacks the worker's context is already current.
    context: CuContext,
    quality: StreamQuality,
    max_width: u32,
    max_height: u32,
    surfaces: Vec<Surface>,
    surface_bytes: usize,
    frame_queue: VecDeque<FrameInfo>,
    /// Surface loaned out by the last `get_frame`, reclaimed on the next
    /// call.
    emitted_surface: Option<usize>,
    coded_width: u32,
    coded_height: u32,
    target_width: u32,
    target_height: u32,
    /// Intra flag per parser picture index, written by the decode
    /// callback and consumed by the display callback.
    intra_flags: [bool; MAX_PICTURE_INDICES],
    frames_decoded: u64,
    frames_dropped: u64,
    last_error: Option<CallbackError>,
}

// SAFETY: the raw decoder and context handles are only used under the
// mutex; the driver API itself is thread-safe.
unsafe impl Send for DecoderState {}

impl DecoderState {
    /// (Re)create the hardware decoder for a new sequence format and
    /// allocate the surface pool. Runs inside the sequence callback with
    /// the worker's context current.
    fn create_decoder(&mut self, format: &CuVideoFormat) -> Result<(), CallbackError> {
        self.destroy_decoder();
        self.free_surfaces();

        let display_width = (format.display_area_right - format.display_area_left).max(0) as u32;
        let display_height = (format.display_area_bottom - format.display_area_top).max(0) as u32;
        self.target_width = if display_width > 0 {
            display_width
        } else {
            format.coded_width
        };
        self.target_height = if display_height > 0 {
            display_height
        } else {
            format.coded_height
        };

        let chroma_format = match format.chroma_format {
            0 => CudaVideoChromaFormat::Monochrome,
            2 => CudaVideoChromaFormat::Yuv422,
            3 => CudaVideoChromaFormat::Yuv444,
            _ => CudaVideoChromaFormat::Yuv420,
        };

        let mut create_info = CuvidDecodeCreateInfo {
            width: format.coded_width as c_ulong,
            height: format.coded_height as c_ulong,
            num_decode_surfaces: self.quality.surface_pool_size() as c_ulong,
            codec_type: match format.codec {
                8 => CudaVideoCodec::Hevc,
                _ => CudaVideoCodec::H264,
            },
            chroma_format,
            creation_flags: CUDA_VIDEO_CREATE_PREFER_CUVID,
            bit_depth_minus8: c_ulong::from(format.bit_depth_luma_minus8),
            max_width: self.max_width as c_ulong,
            max_height: self.max_height as c_ulong,
            display_left: format.display_area_left as i16,
            display_top: format.display_area_top as i16,
            display_right: format.display_area_right as i16,
            display_bottom: format.display_area_bottom as i16,
            output_format: CudaVideoSurfaceFormat::Nv12,
            deinterlace_mode: CudaVideoDeinterlaceMode::Adaptive,
            target_width: self.target_width as c_ulong,
            target_height: self.target_height as c_ulong,
            // Double buffering for mapped display surfaces.
            num_output_surfaces: 2,
            ..CuvidDecodeCreateInfo::default()
        };

        // SAFETY: create_info is fully initialized; the driver writes the
        // decoder handle out-param. The worker's context is current.
        let result = unsafe { (self.lib.cuvidCreateDecoder)(&mut self.decoder, &mut create_info) };
        if result != CUDA_SUCCESS {
            self.decoder = ptr::null_mut();
            return Err(CallbackError::Failure(format!(
                "cuvidCreateDecoder failed with error code {result}"
            )));
        }

        self.coded_width = format.coded_width;
        self.coded_height = format.coded_height;

        if let Err(e) = self.allocate_surfaces() {
            self.destroy_decoder();
            return Err(e);
        }

        info!(
            coded = format!("{}x{}", format.coded_width, format.coded_height),
            target = format!("{}x{}", self.target_width, self.target_height),
            surfaces = self.surfaces.len(),
            quality = self.quality.label(),
            "NVDEC decoder created"
        );
        Ok(())
    }

    /// Allocate the quality-mapped surface pool: pitched 2-D buffers of
    /// 1.5 × target_height rows (Y + half-height interleaved UV).
    fn allocate_surfaces(&mut self) -> Result<(), CallbackError> {
        let count = self.quality.surface_pool_size();
        let width = self.target_width as usize;
        let rows = self.target_height as usize + self.target_height as usize / 2;

        for _ in 0..count {
            match self.cuda.alloc_pitch(width, rows) {
                Ok((device_ptr, pitch)) => {
                    self.surface_bytes += pitch * rows;
                    self.surfaces.push(Surface {
                        device_ptr,
                        pitch,
                        in_use: false,
                    });
                }
                Err(e) => {
                    warn!(
                        allocated = self.surfaces.len(),
                        requested = count,
                        error = %e,
                        "surface allocation failed; rolling back"
                    );
                    self.free_surfaces();
                    return Err(CallbackError::OutOfMemory);
                }
            }
        }
        Ok(())
    }

    /// Free the pool in reverse allocation order.
    fn free_surfaces(&mut self) {
        while let Some(surface) = self.surfaces.pop() {
            if let Err(e) = self.cuda.free(surface.device_ptr) {
                error!(error = %e, "failed to free decode surface");
            }
        }
        self.surface_bytes = 0;
        self.frame_queue.clear();
        self.emitted_surface = None;
    }

    fn destroy_decoder(&mut self) {
        if self.decoder.is_null() {
            return;
        }
        // SAFETY: the handle came from cuvidCreateDecoder and is
        // destroyed exactly once.
        let result = unsafe { (self.lib.cuvidDestroyDecoder)(self.decoder) };
        if result != CUDA_SUCCESS {
            warn!(code = result, "cuvidDestroyDecoder failed");
        }
        self.decoder = ptr::null_mut();
    }

}

// ---------------------------------------------------------------------------
// Parser callbacks (extern "C")
// ---------------------------------------------------------------------------

/// Sequence callback: first frame or format change. Returns the surface
/// pool size, or 0 on failure.
///
/// # Safety
/// Invoked by the CUVID parser from within `cuvidParseVideoData`;
/// `user_data` is the decoder's `Box<Mutex<DecoderState>>`, valid for
/// the parser's lifetime. `format` is valid for the callback's duration.
unsafe extern "C" fn sequence_callback(user_data: *mut c_void, format: *mut CuVideoFormat) -> i32 {
    let state = &*(user_data as *const Mutex<DecoderState>);
    let mut state = state.lock();
    let format = &*format;

    debug!(
        width = format.coded_width,
        height = format.coded_height,
        bit_depth = format.bit_depth_luma_minus8 + 8,
        min_surfaces = format.min_num_decode_surfaces,
        "sequence callback"
    );

    let format_changed = state.coded_width != format.coded_width
        || state.coded_height != format.coded_height;

    if state.decoder.is_null() || format_changed {
        if let Err(e) = state.create_decoder(format) {
            if let CallbackError::Failure(ref reason) = e {
                error!(reason, "hardware decoder creation failed");
            }
            state.last_error = Some(e);
            return 0;
        }
    }

    state.quality.surface_pool_size() as i32
}

/// Decode callback: submit one parsed picture to the hardware.
///
/// # Safety
/// Invoked by the CUVID parser; `user_data` as above, `pic_params` is
/// valid for the callback's duration.
unsafe extern "C" fn decode_callback(user_data: *mut c_void, pic_params: *mut CuvidPicParams) -> i32 {
    let state = &*(user_data as *const Mutex<DecoderState>);
    let mut state = state.lock();

    if state.decoder.is_null() {
        state.last_error = Some(CallbackError::Failure(
            "decode callback before decoder creation".to_string(),
        ));
        return 0;
    }

    // Remember whether this picture is intra-coded; the display callback
    // turns that into the frame's keyframe flag.
    let params = &*pic_params;
    let pic_idx = params.curr_pic_idx;
    if (0..MAX_PICTURE_INDICES as i32).contains(&pic_idx) {
        state.intra_flags[pic_idx as usize] = params.intra_pic_flag != 0;
    }

    // SAFETY: decoder handle is live; pic_params comes from the parser.
    let result = (state.lib.cuvidDecodePicture)(state.decoder, pic_params);
    if result != CUDA_SUCCESS {
        state.last_error = Some(CallbackError::Failure(format!(
            "cuvidDecodePicture failed with error code {result}"
        )));
        return 0;
    }

    state.frames_decoded += 1;
    1
}

/// Display callback: map the decoded picture, copy it into a free pool
/// surface, and queue it. A full pool drops the frame.
///
/// # Safety
/// Invoked by the CUVID parser; `disp_info` is null on flush/EOS.
unsafe extern "C" fn display_callback(
    user_data: *mut c_void,
    disp_info: *mut CuvidParserDispInfo,
) -> i32 {
    if disp_info.is_null() {
        // End-of-stream / flush marker.
        return 1;
    }

    let state = &*(user_data as *const Mutex<DecoderState>);
    let mut state = state.lock();
    let info = &*disp_info;

    if state.decoder.is_null() {
        return 0;
    }

    let mut mapped_ptr: u64 = 0;
    let mut mapped_pitch: u32 = 0;
    let mut proc_params = super::ffi::CuvidProcParams {
        progressive_frame: info.progressive_frame,
        top_field_first: info.top_field_first,
        ..super::ffi::CuvidProcParams::default()
    };

    // SAFETY: decoder and picture index come from the parser; out-params
    // are valid locals. The decoding thread's context is current.
    let result = (state.lib.cuvidMapVideoFrame64)(
        state.decoder,
        info.picture_index,
        &mut mapped_ptr,
        &mut mapped_pitch,
        &mut proc_params,
    );
    if result != CUDA_SUCCESS {
        state.last_error = Some(CallbackError::Failure(format!(
            "cuvidMapVideoFrame64 failed with error code {result}"
        )));
        return 0;
    }

    let width = state.target_width as usize;
    let height = state.target_height as usize;

    match state.surfaces.iter().position(|s| !s.in_use) {
        Some(index) => {
            let dst_ptr = state.surfaces[index].device_ptr;
            let dst_pitch = state.surfaces[index].pitch;
            let src_pitch = mapped_pitch as usize;

            // Y plane, then the interleaved UV plane at half height.
            let copied = state
                .cuda
                .memcpy_2d_device(mapped_ptr, src_pitch, dst_ptr, dst_pitch, width, height)
                .and_then(|_| {
                    state.cuda.memcpy_2d_device(
                        mapped_ptr + (src_pitch * height) as u64,
                        src_pitch,
                        dst_ptr + (dst_pitch * height) as u64,
                        dst_pitch,
                        width,
                        height / 2,
                    )
                });

            match copied {
                Ok(()) => {
                    let is_keyframe = (0..MAX_PICTURE_INDICES as i32)
                        .contains(&info.picture_index)
                        && state.intra_flags[info.picture_index as usize];
                    state.surfaces[index].in_use = true;
                    state.frame_queue.push_back(FrameInfo {
                        surface_index: index,
                        pts: info.timestamp,
                        is_keyframe,
                    });
                }
                Err(e) => {
                    error!(error = %e, "surface copy failed; frame discarded");
                }
            }
        }
        None => {
            state.frames_dropped += 1;
            debug!(
                dropped = state.frames_dropped,
                "no free surface; frame dropped"
            );
        }
    }

    // SAFETY: unmapping the pointer mapped above.
    let result = (state.lib.cuvidUnmapVideoFrame64)(state.decoder, mapped_ptr);
    if result != CUDA_SUCCESS {
        warn!(code = result, "cuvidUnmapVideoFrame64 failed");
    }

    1
}

// ---------------------------------------------------------------------------
// NvdecDecoder
// ---------------------------------------------------------------------------

/// GPU-backed decoder with a per-camera surface pool.
///
/// Frames returned by [`get_frame`] point into pool surfaces in device
/// memory; each loaned surface is reclaimed on the next `get_frame`,
/// `reset`, or quality change.
///
/// [`get_frame`]: Decoder::get_frame
pub struct NvdecDecoder {
    parser: CuVideoParser,
    /// Boxed so the callbacks' user_data pointer stays stable.
    state: Box<Mutex<DecoderState>>,
    lib: Arc<CuvidLibrary>,
    config: DecoderConfig,
    initialized: bool,
}

// SAFETY: the parser handle is only used through &mut self; shared state
// sits behind the mutex.
unsafe impl Send for NvdecDecoder {}

impl NvdecDecoder {
    /// Create an uninitialized decoder. Fails when the nvcuvid or CUDA
    /// driver libraries are unavailable.
    pub fn new() -> Result<Self, CodecError> {
        let lib = cuvid_library()?;
        let cuda = cuda_api().map_err(CodecError::Gpu)?;

        let state = Box::new(Mutex::new(DecoderState {
            lib: lib.clone(),
            cuda,
            decoder: ptr::null_mut(),
            context: ptr::null_mut(),
            quality: StreamQuality::default(),
            max_width: 0,
            max_height: 0,
            surfaces: Vec::new(),
            surface_bytes: 0,
            frame_queue: VecDeque::new(),
            emitted_surface: None,
            coded_width: 0,
            coded_height: 0,
            target_width: 0,
            target_height: 0,
            intra_flags: [false; MAX_PICTURE_INDICES],
            frames_decoded: 0,
            frames_dropped: 0,
            last_error: None,
        }));

        Ok(Self {
            parser: ptr::null_mut(),
            state,
            lib,
            config: DecoderConfig::default(),
            initialized: false,
        })
    }

    fn destroy_parser(&mut self) {
        if self.parser.is_null() {
            return;
        }
        // SAFETY: handle from cuvidCreateVideoParser; after this no more
        // callbacks fire.
        let result = unsafe { (self.lib.cuvidDestroyVideoParser)(self.parser) };
        if result != CUDA_SUCCESS {
            warn!(code = result, "cuvidDestroyVideoParser failed");
        }
        self.parser = ptr::null_mut();
    }

    /// Frames discarded because no pool surface was free.
    pub fn frames_dropped(&self) -> u64 {
        self.state.lock().frames_dropped
    }
}

impl std::fmt::Debug for NvdecDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NvdecDecoder")
            .field("codec", &self.config.codec)
            .field("quality", &state.quality)
            .field("decoder_ready", &!state.decoder.is_null())
            .field("surfaces", &state.surfaces.len())
            .field("queued_frames", &state.frame_queue.len())
            .field("frames_decoded", &state.frames_decoded)
            .field("frames_dropped", &state.frames_dropped)
            .finish()
    }
}

impl Decoder for NvdecDecoder {
    fn initialize(&mut self, config: &DecoderConfig) -> Result<(), CodecError> {
        if self.initialized {
            self.reset();
            self.destroy_parser();
        }

        self.config = config.clone();
        {
            let mut state = self.state.lock();
            state.quality = config.quality;
            state.max_width = config.max_width;
            state.max_height = config.max_height;

            // The decoder's own context, for driver calls made off the
            // decode worker. Device 0 — the same device the primary
            // context and the decode pool's default target.
            if state.context.is_null() {
                let context = state.cuda.create_context(0).map_err(CodecError::Gpu)?;
                state.context = context;
            }
        }

        let state_ptr: *const Mutex<DecoderState> = &*self.state;
        let mut params = CuvidParserParams {
            codec_type: CudaVideoCodec::from_codec(config.codec),
            max_num_decode_surfaces: config.quality.surface_pool_size() as u32,
            clock_rate: 0,
            error_threshold: 0,
            // One frame of reordering keeps latency low.
            max_display_delay: 1,
            user_data: state_ptr as *mut c_void,
            sequence_callback: Some(sequence_callback),
            decode_picture: Some(decode_callback),
            display_picture: Some(display_callback),
            ..CuvidParserParams::default()
        };

        let mut parser: CuVideoParser = ptr::null_mut();
        // SAFETY: params is fully initialized; user_data points into the
        // Box owned by self, stable for the parser's lifetime.
        let result = unsafe { (self.lib.cuvidCreateVideoParser)(&mut parser, &mut params) };
        check_cuvid(result, "cuvidCreateVideoParser").map_err(CodecError::Init)?;

        self.parser = parser;
        self.initialized = true;

        info!(
            codec = config.codec.display_name(),
            quality = config.quality.label(),
            surfaces = config.quality.surface_pool_size(),
            max = format!("{}x{}", config.max_width, config.max_height),
            sub_stream = config.is_sub_stream,
            "NVDEC parser created"
        );
        Ok(())
    }

    /// Push one Annex-B buffer through the parser. Must run on a thread
    /// whose CUDA context is current (a decode-pool worker).
    fn decode(&mut self, data: &[u8], pts: i64) -> DecodeStatus {
        if !self.initialized {
            return DecodeStatus::DecoderFailure("decoder not initialized".to_string());
        }

        self.state.lock().last_error = None;

        let mut packet = CuvidSourceDataPacket {
            flags: packet_flags::CUVID_PKT_TIMESTAMP,
            payload_size: data.len() as c_ulong,
            payload: data.as_ptr(),
            timestamp: pts,
        };

        // SAFETY: the parser handle is live; the payload pointer stays
        // valid for this synchronous call.
        let result = unsafe { (self.lib.cuvidParseVideoData)(self.parser, &mut packet) };
        if result != CUDA_SUCCESS {
            return DecodeStatus::DecoderFailure(format!(
                "cuvidParseVideoData failed with error code {result}"
            ));
        }

        match self.state.lock().last_error.take() {
            None => DecodeStatus::Success,
            Some(CallbackError::OutOfMemory) => DecodeStatus::OutOfMemory,
            Some(CallbackError::Failure(reason)) => DecodeStatus::DecoderFailure(reason),
        }
    }

    fn get_frame(&mut self) -> Option<DecodedFrame> {
        let mut state = self.state.lock();

        // Reclaim the surface loaned out by the previous call; the
        // consumer must not have retained that frame.
        if let Some(index) = state.emitted_surface.take() {
            if let Some(surface) = state.surfaces.get_mut(index) {
                surface.in_use = false;
            }
        }

        let frame_info = state.frame_queue.pop_front()?;
        let surface = state.surfaces.get(frame_info.surface_index)?;

        let pitch = surface.pitch as u32;
        let y_plane = surface.device_ptr;
        let uv_plane = surface.device_ptr + u64::from(pitch) * u64::from(state.target_height);

        let frame = DecodedFrame {
            width: state.target_width,
            height: state.target_height,
            format: PixelFormat::Nv12,
            pts: frame_info.pts,
            dts: frame_info.pts,
            is_keyframe: frame_info.is_keyframe,
            planes: [y_plane, uv_plane, 0],
            pitch: [pitch, pitch, 0],
            surface: Some(GpuSurfaceRef {
                device_ptr: y_plane,
                pitch,
            }),
        };

        state.emitted_surface = Some(frame_info.surface_index);
        Some(frame)
    }

    /// Re-allocate the surface pool for the new level, under the frame
    /// mutex. Parser and decoder stay up; frames from the prior pool are
    /// discarded. The driver work runs under the decoder's own pushed
    /// context, so this is safe from any thread.
    fn set_quality(&mut self, quality: StreamQuality) {
        self.config.quality = quality;

        let mut state = self.state.lock();
        if state.quality == quality {
            return;
        }

        debug!(
            from = state.quality.label(),
            to = quality.label(),
            "re-allocating surface pool for quality change"
        );
        state.quality = quality;

        if state.decoder.is_null() {
            // No sequence seen yet — the pool will be sized from the new
            // level when the hardware decoder is created.
            return;
        }

        let cuda = state.cuda.clone();
        match cuda.push_current(state.context) {
            Ok(_current) => {
                state.free_surfaces();
                if let Err(e) = state.allocate_surfaces() {
                    state.last_error = Some(e);
                }
            }
            Err(e) => {
                error!(error = %e, "cannot bind decoder context for quality change");
            }
        }
    }

    fn memory_usage(&self) -> MemoryStats {
        let state = self.state.lock();
        MemoryStats {
            gpu_bytes: state.surface_bytes,
            system_bytes: std::mem::size_of::<DecoderState>(),
            surface_pool_size: state.surfaces.len(),
            surface_pool_capacity: state.quality.surface_pool_size(),
        }
    }

    /// Send end-of-stream through the parser, flushing buffered frames
    /// into the queue. Decode-thread only.
    fn flush(&mut self) {
        if self.parser.is_null() {
            return;
        }

        let mut packet = CuvidSourceDataPacket {
            flags: packet_flags::CUVID_PKT_ENDOFSTREAM,
            payload_size: 0,
            payload: ptr::null(),
            timestamp: 0,
        };
        // SAFETY: a null payload with the EOS flag is the documented
        // flush signal.
        let result = unsafe { (self.lib.cuvidParseVideoData)(self.parser, &mut packet) };
        if result != CUDA_SUCCESS {
            warn!(code = result, "flush parse failed");
        }
    }

    fn reset(&mut self) {
        let mut state = self.state.lock();
        let discarded = state.frame_queue.len();
        state.frame_queue.clear();
        state.emitted_surface = None;
        for surface in &mut state.surfaces {
            surface.in_use = false;
        }
        state.frames_decoded = 0;
        state.last_error = None;
        if discarded > 0 {
            debug!(discarded, "reset discarded queued frames");
        }
    }

    fn config(&self) -> &DecoderConfig {
        &self.config
    }

    fn is_hardware_accelerated(&self) -> bool {
        true
    }
}

impl Drop for NvdecDecoder {
    fn drop(&mut self) {
        // Parser first — destroying it guarantees no further callbacks
        // reference the decoder or surfaces.
        self.destroy_parser();

        let mut state = self.state.lock();
        if state.context.is_null() {
            return; // never initialized; nothing on the device
        }

        // Teardown can run on threads without a context current (the
        // stream manager), so push the decoder's own for the duration.
        let cuda = state.cuda.clone();
        match cuda.push_current(state.context) {
            Ok(_current) => {
                state.free_surfaces();
                state.destroy_decoder();
            }
            Err(e) => {
                error!(error = %e, "no CUDA context for decoder teardown; leaking surfaces");
            }
        }

        if let Err(e) = cuda.destroy_context(state.context) {
            error!(error = %e, "failed to destroy decoder context");
        }
        state.context = ptr::null_mut();

        info!(
            frames_decoded = state.frames_decoded,
            frames_dropped = state.frames_dropped,
            "NVDEC decoder destroyed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_without_nvidia_fails_cleanly() {
        // On GPU-less hosts new() must error, never panic; with a GPU it
        // must produce an uninitialized decoder.
        match NvdecDecoder::new() {
            Ok(decoder) => {
                assert!(decoder.is_hardware_accelerated());
                assert_eq!(decoder.memory_usage().surface_pool_size, 0);
                assert_eq!(decoder.frames_dropped(), 0);
            }
            Err(e) => {
                assert!(matches!(
                    e,
                    CodecError::HardwareUnavailable(_) | CodecError::Gpu(_)
                ));
            }
        }
    }

    #[test]
    fn decode_before_initialize_is_decoder_failure() {
        let Ok(mut decoder) = NvdecDecoder::new() else {
            return; // no NVIDIA stack on this host
        };
        let status = decoder.decode(&[0, 0, 0, 1, 0x65], 0);
        assert!(matches!(status, DecodeStatus::DecoderFailure(_)));
    }

    #[test]
    fn quality_change_before_first_sequence_is_bookkeeping_only() {
        let Ok(mut decoder) = NvdecDecoder::new() else {
            return;
        };

        // No sequence callback has created a hardware decoder yet, so
        // there is no pool to re-allocate — but the level latches and
        // the reported capacity follows it immediately.
        decoder.set_quality(StreamQuality::Fullscreen);
        assert_eq!(decoder.config().quality, StreamQuality::Fullscreen);
        assert_eq!(decoder.memory_usage().surface_pool_size, 0);
        assert_eq!(
            decoder.memory_usage().surface_pool_capacity,
            StreamQuality::Fullscreen.surface_pool_size()
        );

        // Setting the same level twice is equivalent to setting it once.
        decoder.set_quality(StreamQuality::Fullscreen);
        assert_eq!(
            decoder.memory_usage().surface_pool_capacity,
            StreamQuality::Fullscreen.surface_pool_size()
        );
    }
}
