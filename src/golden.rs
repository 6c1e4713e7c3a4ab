//! Golden values for the canonical quad-tile test image
//!
//! `quad-tile.jpg.tiff` is a JPEG-compressed, 2x2-subsampled YCbCr TIFF split
//! into 128x128 tiles. Tile 9 is the one at pixel column 128, row 256.

/// Bytes per YCbCr cluster with 2x2 subsampling: four luma samples, Cb, Cr
pub const CLUSTER_SIZE: usize = 6;

/// Bytes per pixel in converted RGB output
pub const CHANNELS_IN_PIXEL: usize = 3;

/// Tile width and height in pixels
pub const TILE_DIM: u32 = 128;

/// Pixels in one tile
pub const TILE_PIXELS: usize = (TILE_DIM * TILE_DIM) as usize;

/// Clusters in one raw 2x2-subsampled tile
pub const TILE_CLUSTERS: usize = 64 * 64;

/// Tile read in raw and RGB mode
pub const RAW_TILE_NUMBER: u32 = 9;

/// Pixel origin of the tile read as packed RGBA (same tile as [`RAW_TILE_NUMBER`])
pub const RGBA_TILE_ORIGIN: (u32, u32) = (TILE_DIM, 2 * TILE_DIM);

/// Subsampling factors the test image must declare
pub const EXPECTED_SUBSAMPLING: (u16, u16) = (2, 2);

/// Raw bytes of one YCbCr cluster
pub type ClusterData = [u8; CLUSTER_SIZE];

/// Expected contents of one cluster in a raw tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterExpectation {
    /// Cluster index within the tile (byte offset is `cluster * CLUSTER_SIZE`)
    pub cluster: u32,
    /// Exact bytes
    pub data: ClusterData,
}

/// Inclusive bounds for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRange {
    pub min: u8,
    pub max: u8,
}

impl ChannelRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    /// Returns true if `value` lies within the bounds
    #[inline]
    pub fn contains(self, value: u8) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Acceptable per-channel ranges for one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLimits {
    pub red: ChannelRange,
    pub green: ChannelRange,
    pub blue: ChannelRange,
    pub alpha: ChannelRange,
}

impl ChannelLimits {
    /// Build limits from `[min, max]` pairs in R, G, B, A order
    pub const fn from_pairs(pairs: [[u8; 2]; 4]) -> Self {
        Self {
            red: ChannelRange::new(pairs[0][0], pairs[0][1]),
            green: ChannelRange::new(pairs[1][0], pairs[1][1]),
            blue: ChannelRange::new(pairs[2][0], pairs[2][1]),
            alpha: ChannelRange::new(pairs[3][0], pairs[3][1]),
        }
    }
}

/// Expected channel ranges at one pixel index of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelExpectation {
    /// Row-major pixel index, top row first
    pub pixel: u32,
    pub limits: ChannelLimits,
}

/// Clusters of tile 9 decoded in raw mode
pub static CLUSTERS: [ClusterExpectation; 3] = [
    ClusterExpectation {
        cluster: 0,
        data: [0, 0, 2, 0, 138, 139],
    },
    ClusterExpectation {
        cluster: 64,
        data: [0, 0, 9, 6, 134, 119],
    },
    ClusterExpectation {
        cluster: 128,
        data: [44, 40, 63, 59, 230, 95],
    },
];

/// Pixels of tile 9 in RGB mode, and of the same tile read as packed RGBA
pub static LIMITS: [PixelExpectation; 3] = [
    PixelExpectation {
        pixel: 0,
        limits: ChannelLimits::from_pairs([[15, 18], [0, 0], [18, 41], [255, 255]]),
    },
    PixelExpectation {
        pixel: 64,
        limits: ChannelLimits::from_pairs([[0, 0], [0, 0], [0, 2], [255, 255]]),
    },
    PixelExpectation {
        pixel: 512,
        limits: ChannelLimits::from_pairs([[5, 6], [34, 36], [182, 196], [255, 255]]),
    },
];
