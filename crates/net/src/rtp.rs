//! RTP depacketization for H.264.
//!
//! Converts RTP payloads into complete NAL units:
//!
//! - single-NAL-unit packets (types 1–23) pass through with a start code
//!   prepended;
//! - FU-A fragments (type 28) are reassembled — the original NAL header
//!   is rebuilt from the FU indicator's upper three bits and the FU
//!   header's type bits;
//! - sequence-number gaps abort an in-flight fragment and count as loss;
//!   out-of-order packets are dropped.

use std::collections::VecDeque;

use cg_common::{NalUnit, NalUnitType};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// One RTP packet as handed in by the transport.
#[derive(Clone, Debug, Default)]
pub struct RtpPacket {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    pub marker: bool,
    pub payload: Vec<u8>,
    /// Local receive time, microseconds.
    pub receive_time: i64,
}

/// Depacketizer statistics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DepacketizerStats {
    pub packets_processed: u64,
    pub nal_units_extracted: u64,
    pub fragmented_nal_units: u64,
    pub packets_lost: u64,
    pub packets_out_of_order: u64,
}

struct DepacketizerState {
    units: VecDeque<NalUnit>,
    fragment_buffer: Vec<u8>,
    fragment_timestamp: u32,
    fragment_in_progress: bool,
    last_sequence_number: u16,
    first_packet: bool,
    stats: DepacketizerStats,
}

/// Thread-safe RTP → NAL unit converter.
pub struct RtpDepacketizer {
    state: Mutex<DepacketizerState>,
}

impl Default for RtpDepacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpDepacketizer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DepacketizerState {
                units: VecDeque::new(),
                fragment_buffer: Vec::with_capacity(256 * 1024),
                fragment_timestamp: 0,
                fragment_in_progress: false,
                last_sequence_number: 0,
                first_packet: true,
                stats: DepacketizerStats::default(),
            }),
        }
    }

    /// Feed one RTP packet. Returns false when the packet is empty,
    /// out of order, or of an unsupported payload layout.
    pub fn add_packet(&self, packet: &RtpPacket) -> bool {
        let mut state = self.state.lock();

        if packet.payload.is_empty() {
            return false;
        }

        // Sequence tracking: gaps count as loss and invalidate any
        // fragment being assembled; packets from the past are dropped.
        if !state.first_packet {
            let expected = state.last_sequence_number.wrapping_add(1);
            if packet.sequence_number != expected {
                let gap = packet.sequence_number.wrapping_sub(expected);
                if gap < 0x8000 {
                    state.stats.packets_lost += u64::from(gap);
                    if state.fragment_in_progress {
                        debug!(gap, "packet loss aborts in-flight FU-A fragment");
                        state.fragment_buffer.clear();
                        state.fragment_in_progress = false;
                    }
                } else {
                    state.stats.packets_out_of_order += 1;
                    return false;
                }
            }
        }
        state.last_sequence_number = packet.sequence_number;
        state.first_packet = false;
        state.stats.packets_processed += 1;

        let header = packet.payload[0];
        match header & 0x1F {
            1..=23 => state.push_single(&packet.payload, packet.timestamp),
            28 => state.push_fragment(&packet.payload, packet.timestamp),
            other => {
                warn!(nal_type = other, "unsupported RTP payload NAL type");
                false
            }
        }
    }

    /// Pop the oldest complete NAL unit.
    pub fn pop_nal_unit(&self) -> Option<NalUnit> {
        self.state.lock().units.pop_front()
    }

    pub fn has_nal_units(&self) -> bool {
        !self.state.lock().units.is_empty()
    }

    pub fn nal_unit_count(&self) -> usize {
        self.state.lock().units.len()
    }

    /// Drop queued units and any partial fragment; keeps statistics.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.units.clear();
        state.fragment_buffer.clear();
        state.fragment_in_progress = false;
        state.first_packet = true;
    }

    pub fn stats(&self) -> DepacketizerStats {
        self.state.lock().stats
    }
}

impl DepacketizerState {
    /// Single NAL unit packet: prepend a start code and queue it.
    fn push_single(&mut self, payload: &[u8], timestamp: u32) -> bool {
        if self.fragment_in_progress {
            // A single NAL while a fragment is open means the tail of the
            // fragment never arrived.
            debug!("single NAL interrupts FU-A reassembly; fragment dropped");
            self.fragment_buffer.clear();
            self.fragment_in_progress = false;
        }

        let nal_type = NalUnitType::from_h264_header(payload[0]);
        self.units.push_back(NalUnit::with_start_code(
            nal_type,
            payload,
            i64::from(timestamp),
        ));
        self.stats.nal_units_extracted += 1;
        true
    }

    /// FU-A fragment: indicator byte, FU header (S/E bits + type), then a
    /// slice of the original NAL payload.
    fn push_fragment(&mut self, payload: &[u8], timestamp: u32) -> bool {
        if payload.len() < 2 {
            return false;
        }

        let fu_indicator = payload[0];
        let fu_header = payload[1];
        let start_bit = fu_header & 0x80 != 0;
        let end_bit = fu_header & 0x40 != 0;

        if start_bit {
            if self.fragment_in_progress {
                debug!("new FU-A start before previous fragment completed");
                self.fragment_buffer.clear();
            }
            self.fragment_in_progress = true;
            self.fragment_timestamp = timestamp;

            // Rebuild the NAL header the fragmentation removed.
            let nal_header = (fu_indicator & 0xE0) | (fu_header & 0x1F);
            self.fragment_buffer.clear();
            self.fragment_buffer
                .extend_from_slice(&[0x00, 0x00, 0x00, 0x01, nal_header]);
            self.fragment_buffer.extend_from_slice(&payload[2..]);
        } else if self.fragment_in_progress {
            if timestamp != self.fragment_timestamp {
                debug!(
                    expected = self.fragment_timestamp,
                    got = timestamp,
                    "FU-A timestamp mismatch; fragment dropped"
                );
                self.fragment_buffer.clear();
                self.fragment_in_progress = false;
                return false;
            }
            self.fragment_buffer.extend_from_slice(&payload[2..]);
        } else {
            // Middle/end fragment without a start — stale tail of a
            // fragment we already abandoned.
            return false;
        }

        if end_bit && self.fragment_in_progress {
            self.complete_fragment();
        }
        true
    }

    fn complete_fragment(&mut self) {
        let header = self.fragment_buffer[4];
        let nal_type = NalUnitType::from_h264_header(header);
        let pts = i64::from(self.fragment_timestamp);

        self.units.push_back(NalUnit {
            nal_type,
            data: std::mem::take(&mut self.fragment_buffer),
            pts,
            dts: pts,
            is_keyframe: nal_type.is_keyframe_type(),
            sps: None,
        });
        self.fragment_buffer = Vec::with_capacity(256 * 1024);
        self.fragment_in_progress = false;
        self.stats.nal_units_extracted += 1;
        self.stats.fragmented_nal_units += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16, timestamp: u32, payload: &[u8]) -> RtpPacket {
        RtpPacket {
            sequence_number: seq,
            timestamp,
            payload: payload.to_vec(),
            ..RtpPacket::default()
        }
    }

    // ── Single NAL units ─────────────────────────────────────────

    #[test]
    fn single_nal_passthrough() {
        let depack = RtpDepacketizer::new();
        assert!(depack.add_packet(&packet(1, 1000, &[0x67, 0x42, 0x00])));

        let nal = depack.pop_nal_unit().unwrap();
        assert_eq!(nal.nal_type, NalUnitType::Sps);
        assert_eq!(&nal.data[..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&nal.data[4..], &[0x67, 0x42, 0x00]);
        assert_eq!(nal.pts, 1000);
        assert!(nal.is_keyframe);
    }

    #[test]
    fn empty_payload_rejected() {
        let depack = RtpDepacketizer::new();
        assert!(!depack.add_packet(&packet(1, 0, &[])));
    }

    // ── FU-A reassembly ──────────────────────────────────────────

    /// Build an FU-A payload fragmenting an IDR NAL (type 5, refidc 3).
    fn fu_a(start: bool, end: bool, body: &[u8]) -> Vec<u8> {
        let fu_indicator = 0x60 | 28; // refidc from original header | type 28
        let mut fu_header = 5u8; // fragmented NAL type: IDR
        if start {
            fu_header |= 0x80;
        }
        if end {
            fu_header |= 0x40;
        }
        let mut payload = vec![fu_indicator, fu_header];
        payload.extend_from_slice(body);
        payload
    }

    #[test]
    fn fu_a_three_fragment_reassembly() {
        let depack = RtpDepacketizer::new();
        assert!(depack.add_packet(&packet(10, 5000, &fu_a(true, false, &[0xAA, 0xBB]))));
        assert!(depack.add_packet(&packet(11, 5000, &fu_a(false, false, &[0xCC]))));
        assert!(depack.add_packet(&packet(12, 5000, &fu_a(false, true, &[0xDD, 0xEE]))));

        assert_eq!(depack.nal_unit_count(), 1, "exactly one unit reassembled");
        let nal = depack.pop_nal_unit().unwrap();

        // Rebuilt header: (0x7C & 0xE0) | (header & 0x1F) = 0x65 (IDR).
        assert_eq!(nal.data[4], 0x65);
        assert_eq!(nal.nal_type, NalUnitType::Idr);
        assert!(nal.is_keyframe);
        assert_eq!(&nal.data[5..], &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        assert_eq!(nal.pts, 5000);

        assert_eq!(depack.stats().fragmented_nal_units, 1);
    }

    #[test]
    fn fu_a_timestamp_mismatch_drops_fragment() {
        let depack = RtpDepacketizer::new();
        depack.add_packet(&packet(1, 5000, &fu_a(true, false, &[0xAA])));
        assert!(!depack.add_packet(&packet(2, 6000, &fu_a(false, true, &[0xBB]))));
        assert_eq!(depack.nal_unit_count(), 0);
    }

    #[test]
    fn fu_a_tail_without_start_is_dropped() {
        let depack = RtpDepacketizer::new();
        assert!(!depack.add_packet(&packet(1, 5000, &fu_a(false, true, &[0xAA]))));
        assert_eq!(depack.nal_unit_count(), 0);
    }

    // ── Sequence tracking ────────────────────────────────────────

    #[test]
    fn gap_counts_lost_packets() {
        let depack = RtpDepacketizer::new();
        depack.add_packet(&packet(10, 0, &[0x41, 0x01]));
        depack.add_packet(&packet(14, 0, &[0x41, 0x02])); // 11,12,13 lost
        assert_eq!(depack.stats().packets_lost, 3);
    }

    #[test]
    fn gap_aborts_fragment() {
        let depack = RtpDepacketizer::new();
        depack.add_packet(&packet(1, 5000, &fu_a(true, false, &[0xAA])));
        // Sequence jump: the end fragment after a gap must not complete
        // the unit (its start was invalidated).
        depack.add_packet(&packet(5, 5000, &fu_a(false, true, &[0xBB])));
        assert_eq!(depack.nal_unit_count(), 0);
    }

    #[test]
    fn out_of_order_packet_dropped() {
        let depack = RtpDepacketizer::new();
        depack.add_packet(&packet(10, 0, &[0x41, 0x01]));
        assert!(!depack.add_packet(&packet(9, 0, &[0x41, 0x02])));
        assert_eq!(depack.stats().packets_out_of_order, 1);
    }

    #[test]
    fn sequence_wraparound_is_not_loss() {
        let depack = RtpDepacketizer::new();
        depack.add_packet(&packet(u16::MAX, 0, &[0x41, 0x01]));
        depack.add_packet(&packet(0, 0, &[0x41, 0x02]));
        assert_eq!(depack.stats().packets_lost, 0);
        assert_eq!(depack.nal_unit_count(), 2);
    }

    #[test]
    fn reset_clears_units_but_keeps_stats() {
        let depack = RtpDepacketizer::new();
        depack.add_packet(&packet(1, 0, &[0x41, 0x01]));
        depack.reset();
        assert_eq!(depack.nal_unit_count(), 0);
        assert_eq!(depack.stats().packets_processed, 1);
    }
}
