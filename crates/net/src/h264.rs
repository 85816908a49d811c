//! Bit-level H.264 parameter-set parsing.
//!
//! The SPS carries the coded resolution and (optionally) the frame rate;
//! the PPS carries the entropy-coding mode. Both are parsed with a
//! bounds-checked bit reader and Exp-Golomb decoding. The reader never
//! reads past the provided bytes — exhausted input yields zero bits,
//! matching how truncated parameter sets degrade in practice.

use cg_common::{NalUnitType, PpsInfo, SpsInfo};
use tracing::debug;

/// H.264 profiles that carry the extended chroma/bit-depth block in the
/// SPS (profile_idc values per ITU-T H.264 §7.3.2.1.1).
const HIGH_PROFILES: [u32; 9] = [100, 110, 122, 244, 44, 83, 86, 118, 128];

// ---------------------------------------------------------------------------
// Bit reader
// ---------------------------------------------------------------------------

/// MSB-first bit reader over a byte slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// Read up to 32 bits. Bits past the end of the input read as the
    /// value accumulated so far (effectively zero-padded).
    pub fn read_bits(&mut self, num_bits: u32) -> u32 {
        let mut result = 0u32;
        for _ in 0..num_bits {
            let Some(&byte) = self.data.get(self.byte_pos) else {
                return result;
            };
            let bit = (byte >> (7 - self.bit_pos)) & 1;
            result = (result << 1) | u32::from(bit);

            self.bit_pos += 1;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }
        result
    }

    /// Read an unsigned Exp-Golomb code: count leading zeros L, then
    /// value = 2^L − 1 + read(L).
    pub fn read_ue(&mut self) -> u32 {
        let mut leading_zeros = 0u32;
        while self.has_more_data() && self.read_bits(1) == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return 0; // invalid code
            }
        }

        if leading_zeros == 0 {
            return 0;
        }

        (1u32 << leading_zeros) - 1 + self.read_bits(leading_zeros)
    }

    /// Read a signed Exp-Golomb code: even u maps to −u/2, odd to (u+1)/2.
    pub fn read_se(&mut self) -> i32 {
        let code = self.read_ue();
        if code % 2 == 0 {
            -((code / 2) as i32)
        } else {
            ((code + 1) / 2) as i32
        }
    }

    pub fn has_more_data(&self) -> bool {
        self.byte_pos < self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Start-code helpers
// ---------------------------------------------------------------------------

/// Whether the buffer begins with a 3- or 4-byte Annex-B start code.
pub fn has_start_code(data: &[u8]) -> bool {
    match data {
        [0x00, 0x00, 0x00, 0x01, ..] => true,
        [0x00, 0x00, 0x01, ..] => true,
        _ => false,
    }
}

/// Strip a leading start code, returning the NAL header and payload.
/// Returns `None` when no start code is present.
pub fn skip_start_code(data: &[u8]) -> Option<&[u8]> {
    match data {
        [0x00, 0x00, 0x00, 0x01, rest @ ..] => Some(rest),
        [0x00, 0x00, 0x01, rest @ ..] => Some(rest),
        _ => None,
    }
}

/// NAL type from a buffer that may or may not carry a start code.
pub fn nal_type(data: &[u8]) -> NalUnitType {
    let nal = skip_start_code(data).unwrap_or(data);
    match nal.first() {
        Some(&header) => NalUnitType::from_h264_header(header),
        None => NalUnitType::Unspecified,
    }
}

/// Keyframe classification: IDR, SPS, or PPS.
pub fn is_keyframe(data: &[u8]) -> bool {
    nal_type(data).is_keyframe_type()
}

// ---------------------------------------------------------------------------
// SPS / PPS parsing
// ---------------------------------------------------------------------------

/// Parse an SPS NAL unit (with or without start code) into resolution,
/// frame rate, and profile info. Returns `None` when the buffer is not an
/// SPS or is too short to carry one.
pub fn parse_sps(data: &[u8]) -> Option<SpsInfo> {
    if data.len() < 4 {
        return None;
    }

    let nal = skip_start_code(data).unwrap_or(data);
    if nal.is_empty() || nal[0] & 0x1F != NalUnitType::Sps.as_u8() {
        return None;
    }

    let mut reader = BitReader::new(&nal[1..]);
    let mut sps = SpsInfo::default();

    sps.profile = reader.read_bits(8) as u8;
    reader.read_bits(8); // constraint flags + reserved
    sps.level = reader.read_bits(8) as u8;
    reader.read_ue(); // sps_id

    if HIGH_PROFILES.contains(&u32::from(sps.profile)) {
        let chroma_format_idc = reader.read_ue();
        if chroma_format_idc == 3 {
            reader.read_bits(1); // separate_colour_plane_flag
        }
        reader.read_ue(); // bit_depth_luma_minus8
        reader.read_ue(); // bit_depth_chroma_minus8
        reader.read_bits(1); // qpprime_y_zero_transform_bypass_flag

        if reader.read_bits(1) == 1 {
            // seq_scaling_matrix_present_flag: skip the scaling lists
            for i in 0..8 {
                if reader.read_bits(1) == 1 {
                    let entries = if i < 6 { 16 } else { 64 };
                    for _ in 0..entries {
                        reader.read_se();
                    }
                }
            }
        }
    }

    reader.read_ue(); // log2_max_frame_num_minus4

    let pic_order_cnt_type = reader.read_ue();
    if pic_order_cnt_type == 0 {
        reader.read_ue(); // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        reader.read_bits(1); // delta_pic_order_always_zero_flag
        reader.read_se(); // offset_for_non_ref_pic
        reader.read_se(); // offset_for_top_to_bottom_field
        // num_ref_frames_in_pic_order_cnt_cycle is capped at 255 by the
        // standard; the clamp keeps garbage input from spinning.
        let cycle_len = reader.read_ue().min(255);
        for _ in 0..cycle_len {
            reader.read_se(); // offset_for_ref_frame
        }
    }

    reader.read_ue(); // num_ref_frames
    reader.read_bits(1); // gaps_in_frame_num_value_allowed_flag

    // Resolution: macroblock grid, 16px units
    let pic_width_in_mbs_minus1 = reader.read_ue();
    let pic_height_in_map_units_minus1 = reader.read_ue();
    sps.width = pic_width_in_mbs_minus1.saturating_add(1).saturating_mul(16);
    sps.height = pic_height_in_map_units_minus1
        .saturating_add(1)
        .saturating_mul(16);

    let frame_mbs_only_flag = reader.read_bits(1);
    sps.interlaced = frame_mbs_only_flag == 0;
    if frame_mbs_only_flag == 0 {
        // Map units are field pairs; double before cropping.
        sps.height = sps.height.saturating_mul(2);
        reader.read_bits(1); // mb_adaptive_frame_field_flag
    }

    reader.read_bits(1); // direct_8x8_inference_flag

    if reader.read_bits(1) == 1 {
        // frame_cropping_flag (offsets in chroma units; 4:2:0 assumed)
        let left = reader.read_ue();
        let right = reader.read_ue();
        let top = reader.read_ue();
        let bottom = reader.read_ue();
        sps.width = sps
            .width
            .saturating_sub(left.saturating_add(right).saturating_mul(2));
        sps.height = sps
            .height
            .saturating_sub(top.saturating_add(bottom).saturating_mul(2));
    }

    if reader.read_bits(1) == 1 {
        // vui_parameters_present_flag
        parse_vui(&mut reader, &mut sps);
    }

    if sps.framerate == 0 {
        sps.framerate = 25; // common default when VUI timing is absent
    }

    debug!(
        width = sps.width,
        height = sps.height,
        fps = sps.framerate,
        profile = sps.profile,
        level = sps.level,
        interlaced = sps.interlaced,
        "parsed SPS"
    );

    Some(sps)
}

/// Walk the VUI block far enough to reach the timing info.
fn parse_vui(reader: &mut BitReader<'_>, sps: &mut SpsInfo) {
    if reader.read_bits(1) == 1 {
        // aspect_ratio_info_present_flag
        let aspect_ratio_idc = reader.read_bits(8);
        if aspect_ratio_idc == 255 {
            // Extended_SAR
            reader.read_bits(16); // sar_width
            reader.read_bits(16); // sar_height
        }
    }

    if reader.read_bits(1) == 1 {
        // overscan_info_present_flag
        reader.read_bits(1);
    }

    if reader.read_bits(1) == 1 {
        // video_signal_type_present_flag
        reader.read_bits(3); // video_format
        reader.read_bits(1); // video_full_range_flag
        if reader.read_bits(1) == 1 {
            // colour_description_present_flag
            reader.read_bits(24); // primaries, transfer, matrix
        }
    }

    if reader.read_bits(1) == 1 {
        // chroma_loc_info_present_flag
        reader.read_ue();
        reader.read_ue();
    }

    if reader.read_bits(1) == 1 {
        // timing_info_present_flag
        let num_units_in_tick = reader.read_bits(32);
        let time_scale = reader.read_bits(32);
        if num_units_in_tick > 0 {
            sps.framerate = time_scale / (2 * num_units_in_tick);
        }
    }
}

/// Parse a PPS NAL unit (with or without start code).
pub fn parse_pps(data: &[u8]) -> Option<PpsInfo> {
    if data.len() < 2 {
        return None;
    }

    let nal = skip_start_code(data).unwrap_or(data);
    if nal.is_empty() || nal[0] & 0x1F != NalUnitType::Pps.as_u8() {
        return None;
    }

    let mut reader = BitReader::new(&nal[1..]);
    Some(PpsInfo {
        pps_id: reader.read_ue(),
        sps_id: reader.read_ue(),
        entropy_coding_mode: reader.read_bits(1) == 1,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ── Bit writer (test helper) ─────────────────────────────────

    /// MSB-first bit writer used to synthesize parameter sets.
    struct BitWriter {
        bytes: Vec<u8>,
        bit_pos: u32,
    }

    impl BitWriter {
        fn new() -> Self {
            Self {
                bytes: Vec::new(),
                bit_pos: 0,
            }
        }

        fn write_bit(&mut self, bit: u32) {
            if self.bit_pos == 0 {
                self.bytes.push(0);
            }
            if bit != 0 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - self.bit_pos);
            }
            self.bit_pos = (self.bit_pos + 1) % 8;
        }

        fn write_bits(&mut self, value: u32, num_bits: u32) {
            for i in (0..num_bits).rev() {
                self.write_bit((value >> i) & 1);
            }
        }

        fn write_ue(&mut self, value: u32) {
            let code = value + 1;
            let len = 32 - code.leading_zeros();
            self.write_bits(0, len - 1);
            self.write_bits(code, len);
        }

        fn finish(mut self) -> Vec<u8> {
            // rbsp_stop_one_bit + alignment
            self.write_bit(1);
            while self.bit_pos != 0 {
                self.write_bit(0);
            }
            self.bytes
        }
    }

    /// Synthesize a baseline-profile SPS for the given macroblock grid
    /// and cropping, without VUI.
    fn make_sps(
        width_mbs: u32,
        height_map_units: u32,
        frame_mbs_only: bool,
        crop: Option<(u32, u32, u32, u32)>,
    ) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(66, 8); // profile_idc: baseline
        w.write_bits(0, 8); // constraint flags
        w.write_bits(30, 8); // level_idc
        w.write_ue(0); // sps_id
        w.write_ue(0); // log2_max_frame_num_minus4
        w.write_ue(2); // pic_order_cnt_type (no dependent fields)
        w.write_ue(1); // num_ref_frames
        w.write_bits(0, 1); // gaps_in_frame_num_value_allowed_flag
        w.write_ue(width_mbs - 1); // pic_width_in_mbs_minus1
        w.write_ue(height_map_units - 1); // pic_height_in_map_units_minus1
        w.write_bits(u32::from(frame_mbs_only), 1);
        if !frame_mbs_only {
            w.write_bits(0, 1); // mb_adaptive_frame_field_flag
        }
        w.write_bits(1, 1); // direct_8x8_inference_flag
        match crop {
            Some((left, right, top, bottom)) => {
                w.write_bits(1, 1);
                w.write_ue(left);
                w.write_ue(right);
                w.write_ue(top);
                w.write_ue(bottom);
            }
            None => w.write_bits(0, 1),
        }
        w.write_bits(0, 1); // vui_parameters_present_flag

        let mut nal = vec![0x00, 0x00, 0x00, 0x01, 0x67];
        nal.extend(w.finish());
        nal
    }

    // ── Bit reader ───────────────────────────────────────────────

    #[test]
    fn read_bits_msb_first() {
        let mut r = BitReader::new(&[0b1010_1100, 0b0101_0000]);
        assert_eq!(r.read_bits(3), 0b101);
        assert_eq!(r.read_bits(5), 0b01100);
        assert_eq!(r.read_bits(4), 0b0101);
    }

    #[test]
    fn read_bits_past_end_is_zero() {
        let mut r = BitReader::new(&[0x00]);
        assert_eq!(r.read_bits(8), 0);
        assert_eq!(r.read_bits(32), 0);
        assert!(!r.has_more_data());
    }

    #[test]
    fn exp_golomb_unsigned() {
        // 1 -> 0; 010 -> 1; 011 -> 2; 00100 -> 3
        let mut r = BitReader::new(&[0b1_010_011_0, 0b0100_0000]);
        assert_eq!(r.read_ue(), 0);
        assert_eq!(r.read_ue(), 1);
        assert_eq!(r.read_ue(), 2);
        assert_eq!(r.read_ue(), 3);
    }

    #[test]
    fn exp_golomb_signed() {
        // ue 0,1,2,3,4 -> se 0,1,-1,2,-2
        let mut w = BitWriter::new();
        for v in 0..5 {
            w.write_ue(v);
        }
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_se(), 0);
        assert_eq!(r.read_se(), 1);
        assert_eq!(r.read_se(), -1);
        assert_eq!(r.read_se(), 2);
        assert_eq!(r.read_se(), -2);
    }

    // ── Start codes ──────────────────────────────────────────────

    #[test]
    fn start_code_detection() {
        assert!(has_start_code(&[0x00, 0x00, 0x01, 0x67]));
        assert!(has_start_code(&[0x00, 0x00, 0x00, 0x01, 0x67]));
        assert!(!has_start_code(&[0x00, 0x01, 0x67]));
        assert!(!has_start_code(&[0x67]));
    }

    #[test]
    fn start_code_skipping() {
        assert_eq!(
            skip_start_code(&[0x00, 0x00, 0x01, 0x67, 0x42]),
            Some(&[0x67, 0x42][..])
        );
        assert_eq!(
            skip_start_code(&[0x00, 0x00, 0x00, 0x01, 0x68]),
            Some(&[0x68][..])
        );
        assert_eq!(skip_start_code(&[0x67, 0x42]), None);
    }

    // ── SPS ──────────────────────────────────────────────────────

    #[test]
    fn sps_1920x1080_baseline() {
        // 120×68 macroblocks = 1920×1088, cropped 8 rows at the bottom.
        let sps_nal = make_sps(120, 68, true, Some((0, 0, 0, 4)));
        let sps = parse_sps(&sps_nal).expect("valid SPS");
        assert_eq!(sps.width, 1920);
        assert_eq!(sps.height, 1080);
        assert_eq!(sps.profile, 66);
        assert_eq!(sps.level, 30);
        assert!(!sps.interlaced);
        assert_eq!(sps.framerate, 25, "default fps without VUI timing");
    }

    #[test]
    fn sps_dimensions_are_macroblock_multiples_before_cropping() {
        let sps_nal = make_sps(40, 23, true, None);
        let sps = parse_sps(&sps_nal).unwrap();
        assert_eq!(sps.width % 16, 0);
        assert_eq!(sps.height % 16, 0);
        assert_eq!((sps.width, sps.height), (640, 368));
    }

    #[test]
    fn sps_interlaced_doubles_height_before_cropping() {
        // frame_mbs_only_flag = 0: 34 map units become 34*16*2 = 1088 rows.
        let sps_nal = make_sps(120, 34, false, Some((0, 0, 0, 4)));
        let sps = parse_sps(&sps_nal).unwrap();
        assert!(sps.interlaced);
        assert_eq!(sps.height, 1080);
    }

    #[test]
    fn sps_rejects_wrong_nal_type() {
        let pps = [0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80];
        assert!(parse_sps(&pps).is_none());
    }

    #[test]
    fn sps_survives_truncation() {
        let sps_nal = make_sps(120, 68, true, None);
        // Whatever prefix we hand it, the parser must not panic.
        for len in 0..sps_nal.len() {
            let _ = parse_sps(&sps_nal[..len]);
        }
    }

    // ── PPS ──────────────────────────────────────────────────────

    #[test]
    fn pps_fields() {
        let mut w = BitWriter::new();
        w.write_ue(0); // pps_id
        w.write_ue(0); // sps_id
        w.write_bits(1, 1); // entropy_coding_mode_flag: CABAC
        let mut nal = vec![0x00, 0x00, 0x00, 0x01, 0x68];
        nal.extend(w.finish());

        let pps = parse_pps(&nal).expect("valid PPS");
        assert_eq!(pps.pps_id, 0);
        assert_eq!(pps.sps_id, 0);
        assert!(pps.entropy_coding_mode);
    }

    #[test]
    fn pps_rejects_sps() {
        let sps_nal = make_sps(8, 8, true, None);
        assert!(parse_pps(&sps_nal).is_none());
    }
}
