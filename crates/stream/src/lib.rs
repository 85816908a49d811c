//! `cg-stream` — per-camera streams and the multi-camera pipeline.
//!
//! - [`camera`] — one camera's state machine: RTSP client, decoder, and
//!   the packet queue between them.
//! - [`manager`] — the camera registry; binds receive/decode loops onto
//!   the worker pools and dispatches decoded frames.
//! - [`pipeline`] — top-level construction and teardown in dependency
//!   order.

pub mod camera;
pub mod manager;
pub mod pipeline;

pub use camera::{CameraStats, CameraStream, StreamState};
pub use manager::{FrameCallback, GlobalStats, StreamManager};
pub use pipeline::{PipelineStats, StreamPipeline};
