//! `cg-decoder` — video decoders behind one contract.
//!
//! Two implementations share the [`Decoder`] trait:
//!
//! - [`nvdec::NvdecDecoder`] — GPU-backed, surface-pool based, driven by
//!   the CUVID callback parser. Output frames stay in device memory.
//! - [`cpu::CpuDecoder`] — software fallback over ffmpeg's libavcodec,
//!   one frame at a time in host memory.
//!
//! [`create_decoder`] picks the hardware path when the config prefers it
//! and the host has a usable NVIDIA stack, falling back to software.

pub mod cpu;
pub mod decoder;
pub mod nvdec;

pub use cpu::CpuDecoder;
pub use decoder::{create_decoder, is_nvdec_available, DecodeStatus, Decoder};
pub use nvdec::NvdecDecoder;
