//! Central error types for the pipeline (thiserror-based).

use thiserror::Error;

use crate::codec::VideoCodec;

/// GPU driver / context errors.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("CUDA driver library unavailable: {0}")]
    DriverUnavailable(String),

    #[error("{call} failed with CUDA error {code}")]
    Driver { call: &'static str, code: i32 },

    #[error("no CUDA devices found")]
    NoDevices,

    #[error("GPU device initialization failed: {0}")]
    DeviceInit(String),

    #[error("GPU allocation of {size} bytes failed")]
    AllocFailed { size: usize },
}

/// RTSP / network errors.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("failed to open RTSP stream: {0}")]
    Open(String),

    #[error("no video stream in RTSP source")]
    NoVideoStream,

    #[error("not connected")]
    NotConnected,

    /// Non-recoverable read error; triggers reconnect or the Error state.
    #[error("terminal read error: {0}")]
    Terminal(String),
}

/// Decoder construction / teardown errors.
///
/// Per-packet decode outcomes are not errors — they travel as
/// `DecodeStatus` values on the hot path.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("no {0:?} decoder available")]
    CodecNotFound(VideoCodec),

    #[error("decoder initialization failed: {0}")]
    Init(String),

    #[error("hardware decode unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

/// Stream-manager / pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline not initialized")]
    NotInitialized,

    #[error("camera {0} already registered")]
    DuplicateCamera(String),

    #[error("camera {0} not found")]
    UnknownCamera(String),

    #[error("camera {id} failed to start: {reason}")]
    CameraStart { id: String, reason: String },

    #[error("worker pool is shut down")]
    PoolShutDown,

    #[error("failed to spawn {pool} worker: {reason}")]
    WorkerSpawn { pool: String, reason: String },
}

/// Top-level pipeline error.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Convenience Result type for pipeline operations.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_conversion_chain() {
        let gpu = GpuError::NoDevices;
        let codec: CodecError = gpu.into();
        let top: StreamError = codec.into();
        assert!(matches!(top, StreamError::Codec(CodecError::Gpu(_))));
    }

    #[test]
    fn messages_name_the_subject() {
        let err = PipelineError::DuplicateCamera("cam-7".into());
        assert!(err.to_string().contains("cam-7"));
    }
}
