//! Pixel formats for decoded frames.

use serde::{Deserialize, Serialize};

/// Pixel layout of a decoded frame.
///
/// Hardware decode produces [`PixelFormat::Nv12`]; the software path
/// produces [`PixelFormat::Yuv420p`] or [`PixelFormat::Nv12`] depending on
/// what the codec emits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Y plane + interleaved UV plane at half vertical resolution.
    Nv12,
    /// Planar YUV 4:2:0 (separate Y, U, V planes).
    Yuv420p,
    /// 32-bit RGBA.
    Rgba,
    #[default]
    Unknown,
}

impl PixelFormat {
    /// Number of planes this format carries.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::Yuv420p => 3,
            Self::Rgba => 1,
            Self::Unknown => 0,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(self, Self::Nv12 | Self::Yuv420p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_counts() {
        assert_eq!(PixelFormat::Nv12.plane_count(), 2);
        assert_eq!(PixelFormat::Yuv420p.plane_count(), 3);
        assert_eq!(PixelFormat::Rgba.plane_count(), 1);
    }
}
