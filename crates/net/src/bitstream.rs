//! Annex-B bitstream splitting.
//!
//! The RTSP layer hands us H.264/H.265 byte-stream payloads that may pack
//! several NAL units per buffer. This parser locates start codes, slices
//! the buffer into individual units (start code included), classifies
//! them, and queues them for the caller.

use std::collections::VecDeque;

use cg_common::{NalUnit, NalUnitType, VideoCodec};

use crate::h264;

/// Positions of every Annex-B start code in `data`.
///
/// At each offset the 4-byte `00 00 00 01` pattern is tried before the
/// 3-byte `00 00 01` pattern, and the scan continues past each match.
pub fn find_start_codes(data: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    if data.len() < 3 {
        return positions;
    }

    let mut i = 0;
    while i + 2 < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0x00, 0x00, 0x00, 0x01] {
            positions.push(i);
            i += 4;
        } else if data[i..i + 3] == [0x00, 0x00, 0x01] {
            positions.push(i);
            i += 3;
        } else {
            i += 1;
        }
    }

    positions
}

/// Splits encoded buffers into classified NAL units.
pub struct BitstreamParser {
    codec: VideoCodec,
    units: VecDeque<NalUnit>,
}

impl BitstreamParser {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            units: VecDeque::new(),
        }
    }

    /// Parse one encoded buffer. Each start-code separator yields exactly
    /// one NAL unit; buffers without any start code are discarded.
    /// Returns the number of units extracted.
    pub fn parse_packet(&mut self, data: &[u8], pts: i64) -> usize {
        let starts = find_start_codes(data);
        if starts.is_empty() {
            return 0;
        }

        let mut count = 0;
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(data.len());
            if let Some(nal) = self.extract(&data[start..end], pts) {
                self.units.push_back(nal);
                count += 1;
            }
        }

        count
    }

    /// Pop the oldest queued NAL unit.
    pub fn pop_nal_unit(&mut self) -> Option<NalUnit> {
        self.units.pop_front()
    }

    pub fn has_nal_units(&self) -> bool {
        !self.units.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.units.len()
    }

    /// Drop all queued units.
    pub fn reset(&mut self) {
        self.units.clear();
    }

    /// Build a NAL unit from one start-code-delimited slice.
    ///
    /// A malformed header classifies as `Unspecified` and the unit is
    /// dropped by the caller via `None`.
    fn extract(&self, data: &[u8], pts: i64) -> Option<NalUnit> {
        let payload = h264::skip_start_code(data)?;
        let header = *payload.first()?;

        let nal_type = NalUnitType::from_header(header, self.codec);
        if nal_type == NalUnitType::Unspecified {
            return None;
        }

        let mut nal = NalUnit {
            nal_type,
            data: data.to_vec(),
            pts,
            dts: pts,
            is_keyframe: nal_type.is_keyframe_type(),
            sps: None,
        };

        if nal_type == NalUnitType::Sps {
            nal.sps = h264::parse_sps(data);
        }

        Some(nal)
    }
}
