//! The decoder contract and the factory that picks an implementation.

use tracing::{info, warn};

use cg_common::{CodecError, DecodedFrame, DecoderConfig, MemoryStats, StreamQuality};

use crate::cpu::CpuDecoder;
use crate::nvdec::{cuvid_library, NvdecDecoder};

/// Outcome of feeding one buffer to a decoder.
///
/// These are per-packet statuses, not errors: the decode loop logs the
/// failures and continues with the next packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Input accepted; a frame may be available via `get_frame`.
    Success,
    /// Normal back-pressure — supply more input.
    NeedMoreData,
    /// Malformed or rejected packet; discarded, the stream continues.
    InvalidData(String),
    /// The underlying codec refused valid-looking input.
    DecoderFailure(String),
    /// Surface allocation failed; partial allocations were rolled back.
    OutOfMemory,
}

impl DecodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Success | Self::NeedMoreData)
    }
}

/// Uniform decode API over the hardware and software paths.
///
/// Thread contract: `decode` and `flush` are called by one thread (a
/// decode-pool worker, whose CUDA context is current for the hardware
/// path); `get_frame` may be called from another — the implementations
/// guard their frame state accordingly.
pub trait Decoder: Send {
    /// Prepare the decoder. May be called again to re-configure.
    fn initialize(&mut self, config: &DecoderConfig) -> Result<(), CodecError>;

    /// Feed one encoded Annex-B buffer with its presentation timestamp
    /// (microseconds). The timestamp is carried through to the frames it
    /// produces.
    fn decode(&mut self, data: &[u8], pts: i64) -> DecodeStatus;

    /// The oldest decoded frame, if any. The returned value is only
    /// valid until the next call that advances the decoder.
    fn get_frame(&mut self) -> Option<DecodedFrame>;

    /// Change the quality level (hardware: re-sizes the surface pool;
    /// software: configuration only).
    fn set_quality(&mut self, quality: StreamQuality);

    fn memory_usage(&self) -> MemoryStats;

    /// Drain buffered frames (end-of-stream signal).
    fn flush(&mut self);

    /// Clear queued frames and surface bookkeeping.
    fn reset(&mut self);

    fn config(&self) -> &DecoderConfig;

    fn is_hardware_accelerated(&self) -> bool;
}

/// Whether the NVDEC path can work on this host (nvcuvid loads and a
/// CUDA device exists).
pub fn is_nvdec_available() -> bool {
    cuvid_library().is_ok() && cg_gpu::is_gpu_available()
}

/// Build and initialize a decoder for `config`: NVDEC when preferred and
/// available, otherwise the software fallback.
pub fn create_decoder(config: &DecoderConfig) -> Result<Box<dyn Decoder>, CodecError> {
    if config.prefer_hardware && is_nvdec_available() {
        match NvdecDecoder::new().and_then(|mut decoder| {
            decoder.initialize(config)?;
            Ok(decoder)
        }) {
            Ok(decoder) => {
                info!(codec = config.codec.display_name(), "using NVDEC decoder");
                return Ok(Box::new(decoder));
            }
            Err(e) => {
                warn!(error = %e, "NVDEC decoder unavailable; falling back to software");
            }
        }
    }

    let mut decoder = CpuDecoder::new();
    decoder.initialize(config)?;
    info!(codec = config.codec.display_name(), "using software decoder");
    Ok(Box::new(decoder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_common::VideoCodec;

    #[test]
    fn status_classification() {
        assert!(DecodeStatus::Success.is_success());
        assert!(!DecodeStatus::Success.is_error());
        assert!(!DecodeStatus::NeedMoreData.is_error());
        assert!(DecodeStatus::InvalidData("bad".into()).is_error());
        assert!(DecodeStatus::DecoderFailure("dead".into()).is_error());
        assert!(DecodeStatus::OutOfMemory.is_error());
    }

    #[test]
    fn availability_probe_never_panics() {
        let _ = is_nvdec_available();
    }

    #[test]
    fn factory_falls_back_to_software() {
        let config = DecoderConfig {
            codec: VideoCodec::H264,
            prefer_hardware: false,
            ..DecoderConfig::default()
        };
        // Skip on hosts whose ffmpeg build lacks H.264.
        let Ok(decoder) = create_decoder(&config) else {
            return;
        };
        assert!(!decoder.is_hardware_accelerated());
        assert_eq!(decoder.config().codec, VideoCodec::H264);
    }

    #[test]
    fn factory_respects_hardware_preference() {
        let config = DecoderConfig::default();
        let Ok(decoder) = create_decoder(&config) else {
            return;
        };
        if decoder.is_hardware_accelerated() {
            assert!(is_nvdec_available());
        }
    }
}
