//! Software decoder over ffmpeg's libavcodec.
//!
//! The CPU fallback decodes one packet at a time: each `decode` sends a
//! packet and attempts a single frame receive. The context is tuned for
//! low latency — two slice threads, `LOW_DELAY`, `FLAG2_FAST` — and
//! sized to the configured maximum resolution.

use ffmpeg_next as ffmpeg;
use tracing::{debug, info, warn};

use cg_common::{
    CodecError, DecodedFrame, DecoderConfig, MemoryStats, PixelFormat, StreamQuality, VideoCodec,
};

use crate::decoder::{DecodeStatus, Decoder};

/// CPU decoder (software fallback).
pub struct CpuDecoder {
    config: DecoderConfig,
    decoder: Option<ffmpeg::decoder::Video>,
    frame: ffmpeg::frame::Video,
    /// One-slot latch so the same frame is never delivered twice.
    frame_available: bool,
    frames_decoded: u64,
    initialized: bool,
}

// SAFETY: the codec context and frame are owned exclusively by this
// decoder and only touched through &mut self; libavcodec contexts have
// no thread affinity, only a no-concurrent-use requirement.
unsafe impl Send for CpuDecoder {}

impl Default for CpuDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDecoder {
    pub fn new() -> Self {
        Self {
            config: DecoderConfig::default(),
            decoder: None,
            frame: ffmpeg::frame::Video::empty(),
            frame_available: false,
            frames_decoded: 0,
            initialized: false,
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl std::fmt::Debug for CpuDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuDecoder")
            .field("codec", &self.config.codec)
            .field("initialized", &self.initialized)
            .field("frames_decoded", &self.frames_decoded)
            .field("frame_available", &self.frame_available)
            .finish()
    }
}

impl Decoder for CpuDecoder {
    fn initialize(&mut self, config: &DecoderConfig) -> Result<(), CodecError> {
        if self.initialized {
            self.reset();
        }

        self.config = config.clone();

        ffmpeg::init().map_err(|e| CodecError::Init(format!("ffmpeg init: {e}")))?;

        let codec_id = match config.codec {
            VideoCodec::H264 => ffmpeg::codec::Id::H264,
            VideoCodec::H265 => ffmpeg::codec::Id::HEVC,
        };
        let codec =
            ffmpeg::decoder::find(codec_id).ok_or(CodecError::CodecNotFound(config.codec))?;

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);

        // Low-latency tuning and the resolution ceiling go through the
        // raw context; the safe wrapper does not expose these knobs.
        // SAFETY: the context was just allocated and is exclusively ours.
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).thread_count = 2;
            (*raw).thread_type = ffmpeg::ffi::FF_THREAD_SLICE as i32;
            (*raw).flags |= ffmpeg::ffi::AV_CODEC_FLAG_LOW_DELAY as i32;
            (*raw).flags2 |= ffmpeg::ffi::AV_CODEC_FLAG2_FAST as i32;
            (*raw).coded_width = config.max_width as i32;
            (*raw).coded_height = config.max_height as i32;
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| CodecError::Init(format!("failed to open codec: {e}")))?;

        self.decoder = Some(decoder);
        self.frame_available = false;
        self.frames_decoded = 0;
        self.initialized = true;

        info!(
            codec = config.codec.display_name(),
            max = format!("{}x{}", config.max_width, config.max_height),
            "software decoder initialized"
        );
        Ok(())
    }

    fn decode(&mut self, data: &[u8], pts: i64) -> DecodeStatus {
        use ffmpeg::util::error::EAGAIN;

        let Some(decoder) = self.decoder.as_mut() else {
            return DecodeStatus::DecoderFailure("decoder not initialized".to_string());
        };

        let mut packet = ffmpeg::Packet::copy(data);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(pts));

        match decoder.send_packet(&packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno: EAGAIN }) => return DecodeStatus::NeedMoreData,
            Err(ffmpeg::Error::Eof) => return DecodeStatus::Success,
            Err(e) => return DecodeStatus::InvalidData(format!("send_packet: {e}")),
        }

        match decoder.receive_frame(&mut self.frame) {
            Ok(()) => {
                self.frame_available = true;
                self.frames_decoded += 1;
                DecodeStatus::Success
            }
            Err(ffmpeg::Error::Other { errno: EAGAIN }) => DecodeStatus::NeedMoreData,
            Err(ffmpeg::Error::Eof) => DecodeStatus::Success,
            Err(e) => DecodeStatus::DecoderFailure(format!("receive_frame: {e}")),
        }
    }

    fn get_frame(&mut self) -> Option<DecodedFrame> {
        if !self.frame_available {
            return None;
        }

        let (format, planes) = match self.frame.format() {
            ffmpeg::format::Pixel::YUV420P => (PixelFormat::Yuv420p, 3),
            ffmpeg::format::Pixel::NV12 => (PixelFormat::Nv12, 2),
            other => {
                warn!(format = ?other, "unsupported decoded pixel format");
                return None;
            }
        };

        let mut frame = DecodedFrame {
            width: self.frame.width(),
            height: self.frame.height(),
            format,
            pts: self.frame.pts().unwrap_or(0),
            dts: self.frame.pts().unwrap_or(0),
            is_keyframe: self.frame.is_key(),
            planes: [0; 3],
            pitch: [0; 3],
            surface: None,
        };
        for plane in 0..planes {
            frame.planes[plane] = self.frame.data(plane).as_ptr() as u64;
            frame.pitch[plane] = self.frame.stride(plane) as u32;
        }

        // Consume the latch so this frame is delivered exactly once.
        self.frame_available = false;
        Some(frame)
    }

    /// Quality changes only retarget the configuration — the software
    /// path has no surface pool to resize.
    fn set_quality(&mut self, quality: StreamQuality) {
        if self.config.quality != quality {
            debug!(
                from = self.config.quality.label(),
                to = quality.label(),
                "software decoder quality updated"
            );
            self.config.quality = quality;
        }
    }

    fn memory_usage(&self) -> MemoryStats {
        MemoryStats {
            gpu_bytes: 0,
            // One YUV 4:2:0 frame at the configured ceiling.
            system_bytes: self.config.max_width as usize * self.config.max_height as usize * 3 / 2,
            surface_pool_size: 1,
            surface_pool_capacity: 1,
        }
    }

    fn flush(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.frame_available = false;
    }

    fn reset(&mut self) {
        self.flush();
        self.frames_decoded = 0;
    }

    fn config(&self) -> &DecoderConfig {
        &self.config
    }

    fn is_hardware_accelerated(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_common::NalUnitType;

    fn initialized_decoder() -> Option<CpuDecoder> {
        let mut decoder = CpuDecoder::new();
        let config = DecoderConfig {
            codec: VideoCodec::H264,
            quality: StreamQuality::Grid,
            max_width: 640,
            max_height: 360,
            prefer_hardware: false,
            is_sub_stream: true,
        };
        // An ffmpeg build without the H.264 decoder is a host problem,
        // not a test failure.
        decoder.initialize(&config).ok()?;
        Some(decoder)
    }

    #[test]
    fn decode_before_initialize_fails() {
        let mut decoder = CpuDecoder::new();
        let status = decoder.decode(&[0, 0, 0, 1, 0x65], 0);
        assert!(matches!(status, DecodeStatus::DecoderFailure(_)));
    }

    #[test]
    fn initialize_reports_codec() {
        let Some(decoder) = initialized_decoder() else {
            return;
        };
        assert!(!decoder.is_hardware_accelerated());
        assert_eq!(decoder.config().codec, VideoCodec::H264);
        assert_eq!(decoder.frames_decoded(), 0);
    }

    #[test]
    fn parameter_sets_do_not_produce_frames() {
        let Some(mut decoder) = initialized_decoder() else {
            return;
        };

        // A bare SPS cannot produce a picture; the decoder asks for more
        // data (or reports bad input), but must not yield a frame.
        let sps = [0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0xA6, 0x80];
        assert_eq!(NalUnitType::from_h264_header(sps[4]), NalUnitType::Sps);

        let _ = decoder.decode(&sps, 0);
        assert!(decoder.get_frame().is_none());
    }

    #[test]
    fn quality_change_is_config_only() {
        let Some(mut decoder) = initialized_decoder() else {
            return;
        };
        let before = decoder.memory_usage();
        decoder.set_quality(StreamQuality::Fullscreen);
        let after = decoder.memory_usage();

        assert_eq!(decoder.config().quality, StreamQuality::Fullscreen);
        assert_eq!(before.surface_pool_capacity, after.surface_pool_capacity);
        assert_eq!(before.system_bytes, after.system_bytes);
    }

    #[test]
    fn memory_estimate_is_yuv420_frame_size() {
        let Some(decoder) = initialized_decoder() else {
            return;
        };
        assert_eq!(decoder.memory_usage().system_bytes, 640 * 360 * 3 / 2);
        assert_eq!(decoder.memory_usage().gpu_bytes, 0);
    }

    #[test]
    fn reset_clears_counters_and_latch() {
        let Some(mut decoder) = initialized_decoder() else {
            return;
        };
        decoder.reset();
        assert_eq!(decoder.frames_decoded(), 0);
        assert!(decoder.get_frame().is_none());
    }
}
