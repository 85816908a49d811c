//! Configuration structs for decoders, cameras, and the pipeline.

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;
use crate::quality::StreamQuality;

/// Decoder configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub codec: VideoCodec,
    /// Initial quality level; drives surface-pool size and target fps.
    pub quality: StreamQuality,
    /// Sizing ceiling for the decoder and its surfaces.
    pub max_width: u32,
    pub max_height: u32,
    /// Auto-select the GPU path when available.
    pub prefer_hardware: bool,
    /// Marks a sub-resolution stream (e.g. 640×360 grid feed).
    pub is_sub_stream: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            quality: StreamQuality::Grid,
            max_width: 1920,
            max_height: 1080,
            prefer_hardware: true,
            is_sub_stream: false,
        }
    }
}

/// Per-camera configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Unique camera identifier.
    pub id: String,
    pub rtsp_url: String,
    pub username: String,
    pub password: String,
    pub quality: StreamQuality,
    /// Whether the network loop requests reconnection on terminal errors.
    pub auto_reconnect: bool,
    /// Capacity of the per-camera packet queue (rounded up to a power of
    /// two).
    pub packet_queue_size: usize,
}

impl CameraConfig {
    pub fn new(id: impl Into<String>, rtsp_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rtsp_url: rtsp_url.into(),
            username: String::new(),
            password: String::new(),
            quality: StreamQuality::Grid,
            auto_reconnect: true,
            packet_queue_size: 60,
        }
    }
}

/// Pipeline-wide configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// RTSP-reading workers.
    pub network_threads: usize,
    /// Decode workers, each owning a persistent GPU context.
    pub decode_threads: usize,
    /// CUDA device index for decode contexts.
    pub gpu_device_id: i32,
    /// Default per-camera packet queue capacity.
    pub packet_queue_size: usize,
    /// VRAM accountant ceiling.
    pub max_gpu_memory_bytes: usize,
    /// Log when VRAM utilization exceeds 90%.
    pub enable_memory_warnings: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            network_threads: 8,
            decode_threads: 4,
            gpu_device_id: 0,
            packet_queue_size: 60,
            max_gpu_memory_bytes: 3 * 1024 * 1024 * 1024,
            enable_memory_warnings: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_defaults() {
        let cfg = DecoderConfig::default();
        assert_eq!(cfg.codec, VideoCodec::H264);
        assert_eq!(cfg.quality, StreamQuality::Grid);
        assert_eq!((cfg.max_width, cfg.max_height), (1920, 1080));
        assert!(cfg.prefer_hardware);
        assert!(!cfg.is_sub_stream);
    }

    #[test]
    fn pipeline_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.network_threads, 8);
        assert_eq!(cfg.decode_threads, 4);
        assert_eq!(cfg.gpu_device_id, 0);
        assert_eq!(cfg.packet_queue_size, 60);
        assert_eq!(cfg.max_gpu_memory_bytes, 3 * 1024 * 1024 * 1024);
    }

    #[test]
    fn camera_config_builder() {
        let cfg = CameraConfig::new("cam-01", "rtsp://example/stream");
        assert_eq!(cfg.id, "cam-01");
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.packet_queue_size, 60);
    }
}
