//! Content checks on decoded tile buffers
//!
//! All checks bound-check before indexing and report [`CheckError::Overrun`]
//! instead of reading past the buffer.

use log::error;
use rgb::{Rgb, Rgba};

use crate::error::CheckError;
use crate::golden::{CHANNELS_IN_PIXEL, CLUSTER_SIZE, ChannelLimits, ClusterData, TILE_DIM};

/// Join bytes with tabs for diagnostics
fn tab_join(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join("\t")
}

/// Compare one raw YCbCr cluster byte-for-byte
pub fn check_cluster(
    cluster: u32,
    buffer: &[u8],
    expected: &ClusterData,
) -> Result<(), CheckError> {
    let start = cluster as usize * CLUSTER_SIZE;
    let end = start + CLUSTER_SIZE;
    let target = buffer.get(start..end).ok_or(CheckError::Overrun {
        needed: end,
        len: buffer.len(),
    })?;

    if target == expected {
        return Ok(());
    }

    Err(CheckError::Mismatch(format!(
        "Cluster {cluster} did not match expected results.\nExpect:\t{}\nGot:\t{}",
        tab_join(expected),
        tab_join(target)
    )))
}

/// Check one pixel of an interleaved RGB buffer against channel bounds.
/// The alpha range is ignored.
pub fn check_rgb_pixel(
    pixel: u32,
    limits: &ChannelLimits,
    buffer: &[u8],
) -> Result<(), CheckError> {
    let start = pixel as usize * CHANNELS_IN_PIXEL;
    let end = start + CHANNELS_IN_PIXEL;
    let rgb = buffer.get(start..end).ok_or(CheckError::Overrun {
        needed: end,
        len: buffer.len(),
    })?;
    let px = Rgb::new(rgb[0], rgb[1], rgb[2]);

    if limits.red.contains(px.r) && limits.green.contains(px.g) && limits.blue.contains(px.b) {
        return Ok(());
    }

    Err(CheckError::Mismatch(format!(
        "Pixel {pixel} did not match expected results.\n\
         Got R={} (expected {}..{}), G={} (expected {}..{}), B={} (expected {}..{})",
        px.r,
        limits.red.min,
        limits.red.max,
        px.g,
        limits.green.min,
        limits.green.max,
        px.b,
        limits.blue.min,
        limits.blue.max,
    )))
}

/// Map a top-down row-major pixel index onto a raster stored bottom row first.
///
/// `physical = index % width + (rows - 1 - index / width) * width`. Returns
/// `None` if the index lies below the last row.
#[inline]
pub fn flip_row_index(index: u32, width: u32, rows: u32) -> Option<u32> {
    if width == 0 {
        return None;
    }
    let row = index / width;
    let flipped = rows.checked_sub(1)?.checked_sub(row)?;
    Some(index % width + flipped * width)
}

/// Pack a pixel the way libtiff's RGBA readers do: R in the low byte, A high
#[inline]
pub fn pack_abgr(px: Rgba<u8>) -> u32 {
    u32::from_le_bytes([px.r, px.g, px.b, px.a])
}

/// Inverse of [`pack_abgr`]
#[inline]
pub fn unpack_abgr(word: u32) -> Rgba<u8> {
    let [r, g, b, a] = word.to_le_bytes();
    Rgba { r, g, b, a }
}

/// Check one pixel of a packed, bottom-up 128x128 RGBA tile
pub fn check_rgba_pixel(
    pixel: u32,
    limits: &ChannelLimits,
    buffer: &[u32],
) -> Result<(), CheckError> {
    let overrun = |needed: u32| CheckError::Overrun {
        needed: needed as usize + 1,
        len: buffer.len(),
    };
    let adjusted = flip_row_index(pixel, TILE_DIM, TILE_DIM).ok_or_else(|| overrun(pixel))?;
    let &word = buffer
        .get(adjusted as usize)
        .ok_or_else(|| overrun(adjusted))?;
    let px = unpack_abgr(word);

    if limits.red.contains(px.r)
        && limits.green.contains(px.g)
        && limits.blue.contains(px.b)
        && limits.alpha.contains(px.a)
    {
        return Ok(());
    }

    Err(CheckError::Mismatch(format!(
        "Pixel {pixel} did not match expected results.\n\
         Got R={} (expected {}..{}), G={} (expected {}..{}), \
         B={} (expected {}..{}), A={} (expected {}..{})",
        px.r,
        limits.red.min,
        limits.red.max,
        px.g,
        limits.green.min,
        limits.green.max,
        px.b,
        limits.blue.min,
        limits.blue.max,
        px.a,
        limits.alpha.min,
        limits.alpha.max,
    )))
}

/// Accumulates content-check results without short-circuiting
#[derive(Debug, Default, Clone)]
pub struct Batch {
    checked: usize,
    failed: Vec<String>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one check result, logging it under `name` if it failed
    pub fn record(
        &mut self,
        name: impl Into<String>,
        result: Result<(), CheckError>,
    ) -> &mut Self {
        self.checked += 1;
        if let Err(e) = result {
            let name = name.into();
            error!("{name} failed:\n{e}");
            self.failed.push(name);
        }
        self
    }

    /// Fold another batch into this one
    pub fn merge(&mut self, other: Batch) {
        self.checked += other.checked;
        self.failed.extend(other.failed);
    }

    pub fn checked(&self) -> usize {
        self.checked
    }

    /// Names of the checks that failed, in the order they ran
    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    pub fn into_failed(self) -> Vec<String> {
        self.failed
    }

    /// True if nothing recorded so far failed
    pub fn passed(&self) -> bool {
        self.failed.is_empty()
    }
}
