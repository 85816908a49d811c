//! `cg-net` — RTSP ingest and H.264/H.265 bitstream handling.
//!
//! The network layer turns an RTSP URL into a stream of classified,
//! timestamped [`NalUnit`](cg_common::NalUnit)s:
//!
//! - [`bitstream`] — Annex-B start-code scanning and NAL extraction.
//! - [`h264`] — bit-level SPS/PPS parsing (Exp-Golomb).
//! - [`rtp`] — RTP depacketization with FU-A reassembly.
//! - [`rtsp`] — the RTSP client built on ffmpeg's libavformat.

pub mod bitstream;
pub mod h264;
pub mod rtp;
pub mod rtsp;

pub use bitstream::BitstreamParser;
pub use rtp::{RtpDepacketizer, RtpPacket};
pub use rtsp::{ConnectionState, RtspClient, RtspConfig, TransportType};
