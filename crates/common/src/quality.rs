//! Adaptive stream quality levels.
//!
//! Every camera runs at one of five quality levels. Each level maps
//! deterministically to a target frame rate and a decode surface-pool
//! size; these two functions are the single source of truth — decoder,
//! VRAM accountant, and stream manager all derive their sizing from here.

use serde::{Deserialize, Serialize};

/// Quality level of a camera stream, ordered from cheapest to richest.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum StreamQuality {
    /// Keyframes only; the camera stays connected but barely decodes.
    Paused,
    /// Small preview tile.
    Thumbnail,
    /// Multi-camera grid view.
    #[default]
    Grid,
    /// Single camera focused in a larger viewport.
    Focused,
    /// Full-screen playback.
    Fullscreen,
}

impl StreamQuality {
    /// Target decode frame rate for this level.
    pub fn target_fps(self) -> u32 {
        match self {
            Self::Paused => 1,
            Self::Thumbnail => 5,
            Self::Grid => 10,
            Self::Focused => 15,
            Self::Fullscreen => 30,
        }
    }

    /// Number of decode surfaces the hardware decoder pre-allocates at
    /// this level.
    pub fn surface_pool_size(self) -> usize {
        match self {
            Self::Paused => 2,
            Self::Thumbnail => 4,
            Self::Grid => 4,
            Self::Focused => 8,
            Self::Fullscreen => 12,
        }
    }

    /// Uppercase label for logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Paused => "PAUSED",
            Self::Thumbnail => "THUMBNAIL",
            Self::Grid => "GRID",
            Self::Focused => "FOCUSED",
            Self::Fullscreen => "FULLSCREEN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [StreamQuality; 5] = [
        StreamQuality::Paused,
        StreamQuality::Thumbnail,
        StreamQuality::Grid,
        StreamQuality::Focused,
        StreamQuality::Fullscreen,
    ];

    #[test]
    fn fps_mapping() {
        let fps: Vec<u32> = ALL.iter().map(|q| q.target_fps()).collect();
        assert_eq!(fps, [1, 5, 10, 15, 30]);
    }

    #[test]
    fn pool_mapping() {
        let pools: Vec<usize> = ALL.iter().map(|q| q.surface_pool_size()).collect();
        assert_eq!(pools, [2, 4, 4, 8, 12]);
    }

    #[test]
    fn levels_are_ordered() {
        for pair in ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn richer_levels_never_shrink_resources() {
        for pair in ALL.windows(2) {
            assert!(pair[0].target_fps() <= pair[1].target_fps());
            assert!(pair[0].surface_pool_size() <= pair[1].surface_pool_size());
        }
    }
}
