//! `cg-common` — Shared types, traits, and errors for the CamGrid pipeline.
//!
//! This crate is the foundation every other pipeline crate depends on.
//! It defines the core abstractions:
//!
//! - **Codecs & formats**: [`VideoCodec`], [`PixelFormat`]
//! - **Quality model**: [`StreamQuality`] and its fps / surface-pool mapping
//! - **Data flow**: [`NalUnit`], [`StreamPacket`], [`DecodedFrame`]
//! - **Configuration**: [`DecoderConfig`], [`CameraConfig`], [`PipelineConfig`]
//! - **Errors**: [`GpuError`], [`NetError`], [`CodecError`], [`PipelineError`]
//!   (thiserror-based)

pub mod codec;
pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod packet;
pub mod quality;
pub mod stats;

// Re-export commonly used items at crate root
pub use codec::VideoCodec;
pub use color::PixelFormat;
pub use config::{CameraConfig, DecoderConfig, PipelineConfig};
pub use error::{CodecError, GpuError, NetError, PipelineError, StreamError, StreamResult};
pub use frame::{DecodedFrame, GpuSurfaceRef, MemoryStats};
pub use packet::{NalUnit, NalUnitType, PpsInfo, SpsInfo, StreamPacket};
pub use quality::StreamQuality;
pub use stats::NetworkStats;
