//! NAL units and per-camera stream packets.

use crate::codec::VideoCodec;

/// NAL unit classification.
///
/// H.264 types come from the low five bits of the NAL header byte; the
/// HEVC variants coexist in the same enum because a camera registry can
/// mix both codecs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NalUnitType {
    #[default]
    Unspecified,
    /// Non-IDR coded slice.
    Slice,
    DataPartitionA,
    DataPartitionB,
    DataPartitionC,
    /// IDR picture (keyframe).
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    EndSequence,
    EndStream,
    Filler,
    /// RTP fragmentation unit A.
    FuA,
    /// RTP fragmentation unit B.
    FuB,
    HevcIdrWRadl,
    HevcIdrNLp,
    HevcVps,
    HevcSps,
    HevcPps,
    Other(u8),
}

impl NalUnitType {
    /// Classify an H.264 NAL header byte (type = bits 0–4).
    pub fn from_h264_header(header: u8) -> Self {
        match header & 0x1F {
            0 => Self::Unspecified,
            1 => Self::Slice,
            2 => Self::DataPartitionA,
            3 => Self::DataPartitionB,
            4 => Self::DataPartitionC,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndSequence,
            11 => Self::EndStream,
            12 => Self::Filler,
            28 => Self::FuA,
            29 => Self::FuB,
            other => Self::Other(other),
        }
    }

    /// Classify an H.265 NAL header byte (type = bits 1–6 of the first
    /// header byte).
    pub fn from_hevc_header(header: u8) -> Self {
        match (header >> 1) & 0x3F {
            19 => Self::HevcIdrWRadl,
            20 => Self::HevcIdrNLp,
            32 => Self::HevcVps,
            33 => Self::HevcSps,
            34 => Self::HevcPps,
            other => Self::Other(other),
        }
    }

    /// Classify a NAL header byte for the given codec.
    pub fn from_header(header: u8, codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::H264 => Self::from_h264_header(header),
            VideoCodec::H265 => Self::from_hevc_header(header),
        }
    }

    /// Raw H.264 type value, where applicable.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Slice => 1,
            Self::DataPartitionA => 2,
            Self::DataPartitionB => 3,
            Self::DataPartitionC => 4,
            Self::Idr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndSequence => 10,
            Self::EndStream => 11,
            Self::Filler => 12,
            Self::FuA => 28,
            Self::FuB => 29,
            Self::HevcIdrWRadl => 19,
            Self::HevcIdrNLp => 20,
            Self::HevcVps => 32,
            Self::HevcSps => 33,
            Self::HevcPps => 34,
            Self::Other(v) => v,
        }
    }

    /// Whether a unit of this type starts (or is required to decode) a
    /// keyframe: IDR, SPS, or PPS, plus the HEVC equivalents.
    pub fn is_keyframe_type(self) -> bool {
        matches!(
            self,
            Self::Idr
                | Self::Sps
                | Self::Pps
                | Self::HevcIdrWRadl
                | Self::HevcIdrNLp
                | Self::HevcVps
                | Self::HevcSps
                | Self::HevcPps
        )
    }
}

/// Resolution and timing information parsed from an SPS.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second from VUI timing info; 25 when absent.
    pub framerate: u32,
    pub profile: u8,
    pub level: u8,
    pub interlaced: bool,
}

/// Fields parsed from a PPS.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PpsInfo {
    pub pps_id: u32,
    pub sps_id: u32,
    /// CABAC (true) vs CAVLC (false).
    pub entropy_coding_mode: bool,
}

/// One NAL unit with metadata.
///
/// `data` always begins with a 3- or 4-byte Annex-B start code.
#[derive(Clone, Debug)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    pub data: Vec<u8>,
    /// Presentation timestamp, microseconds.
    pub pts: i64,
    /// Decode timestamp, microseconds.
    pub dts: i64,
    pub is_keyframe: bool,
    /// Present when this unit is an SPS that parsed successfully.
    pub sps: Option<SpsInfo>,
}

impl NalUnit {
    /// Build a unit from payload bytes with the given classification,
    /// prefixing a 4-byte start code.
    pub fn with_start_code(nal_type: NalUnitType, payload: &[u8], pts: i64) -> Self {
        let mut data = Vec::with_capacity(payload.len() + 4);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        data.extend_from_slice(payload);
        Self {
            nal_type,
            data,
            pts,
            dts: pts,
            is_keyframe: nal_type.is_keyframe_type(),
            sps: None,
        }
    }
}

/// Entry on a camera's bounded packet queue, between the network receive
/// loop and the decode loop.
#[derive(Clone, Debug, Default)]
pub struct StreamPacket {
    /// Annex-B bytes of one NAL unit.
    pub data: Vec<u8>,
    /// Presentation timestamp, microseconds.
    pub pts: i64,
    pub is_keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_classification() {
        assert_eq!(NalUnitType::from_h264_header(0x67), NalUnitType::Sps);
        assert_eq!(NalUnitType::from_h264_header(0x68), NalUnitType::Pps);
        assert_eq!(NalUnitType::from_h264_header(0x65), NalUnitType::Idr);
        assert_eq!(NalUnitType::from_h264_header(0x41), NalUnitType::Slice);
        assert_eq!(NalUnitType::from_h264_header(0x7C), NalUnitType::FuA);
    }

    #[test]
    fn hevc_classification() {
        // (33 << 1) = 0x42 -> HEVC SPS
        assert_eq!(NalUnitType::from_hevc_header(0x42), NalUnitType::HevcSps);
        assert_eq!(NalUnitType::from_hevc_header(0x40), NalUnitType::HevcVps);
        assert_eq!(NalUnitType::from_hevc_header(0x44), NalUnitType::HevcPps);
    }

    #[test]
    fn keyframe_types() {
        assert!(NalUnitType::Idr.is_keyframe_type());
        assert!(NalUnitType::Sps.is_keyframe_type());
        assert!(NalUnitType::Pps.is_keyframe_type());
        assert!(!NalUnitType::Slice.is_keyframe_type());
        assert!(!NalUnitType::Sei.is_keyframe_type());
    }

    #[test]
    fn start_code_prefixing() {
        let nal = NalUnit::with_start_code(NalUnitType::Sps, &[0x67, 0x42, 0x00], 1234);
        assert_eq!(&nal.data[..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&nal.data[4..], &[0x67, 0x42, 0x00]);
        assert!(nal.is_keyframe);
        assert_eq!(nal.pts, 1234);
        assert_eq!(nal.dts, 1234);
    }
}
