//! The verification sequence
//!
//! Structural failures (open, tag, size, mode switch, decode, close, transport)
//! abort immediately through `?`. Content checks run as batches that always
//! complete, log every failure, and only then decide whether to abort.

use std::path::PathBuf;

use log::debug;
use whereat::at;

use crate::api::{Handle, TiffApi, jpeg_color_mode, tag};
use crate::check::{Batch, check_cluster, check_rgb_pixel, check_rgba_pixel};
use crate::config::VerifierConfig;
use crate::error::{Error, Result};
use crate::golden::{
    CHANNELS_IN_PIXEL, CLUSTER_SIZE, ClusterExpectation, EXPECTED_SUBSAMPLING, PixelExpectation,
    TILE_CLUSTERS, TILE_PIXELS,
};

/// Counts of content checks that ran during a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Raw clusters compared
    pub clusters: usize,
    /// RGB and RGBA pixels compared
    pub pixels: usize,
}

/// Run every cluster expectation against a raw tile
pub fn check_clusters(buffer: &[u8], expectations: &[ClusterExpectation]) -> Batch {
    let mut batch = Batch::new();
    for e in expectations {
        batch.record(
            format!("CheckCluster {}", e.cluster),
            check_cluster(e.cluster, buffer, &e.data),
        );
    }
    batch
}

/// Run every pixel expectation against an interleaved RGB tile
pub fn check_rgb_pixels(buffer: &[u8], expectations: &[PixelExpectation]) -> Batch {
    let mut batch = Batch::new();
    for e in expectations {
        batch.record(
            format!("CheckRgbPixel {}", e.pixel),
            check_rgb_pixel(e.pixel, &e.limits, buffer),
        );
    }
    batch
}

/// Run every pixel expectation against a packed, bottom-up RGBA tile
pub fn check_rgba_pixels(buffer: &[u32], expectations: &[PixelExpectation]) -> Batch {
    let mut batch = Batch::new();
    for e in expectations {
        batch.record(
            format!("CheckRgbaPixel {}", e.pixel),
            check_rgba_pixel(e.pixel, &e.limits, buffer),
        );
    }
    batch
}

/// Drives one verification run through a [`TiffApi`]
pub struct TileVerifier<'a, A: TiffApi + ?Sized> {
    api: &'a mut A,
    config: &'a VerifierConfig,
}

impl<'a, A: TiffApi + ?Sized> TileVerifier<'a, A> {
    pub fn new(api: &'a mut A, config: &'a VerifierConfig) -> Self {
        Self { api, config }
    }

    fn path(&self) -> PathBuf {
        self.config.source.clone()
    }

    fn open(&mut self) -> Result<Handle> {
        let path = self.path();
        let handle = self.api.open(&path, "r")?;
        if handle.is_null() {
            return Err(at(Error::OpenFailed { path }));
        }
        debug!("opened {} as {handle:?}", path.display());
        Ok(handle)
    }

    fn close(&mut self, handle: Handle) -> Result<()> {
        if !self.api.close(handle)? {
            return Err(at(Error::CloseFailed { path: self.path() }));
        }
        Ok(())
    }

    fn expect_subsampling(&mut self, handle: Handle) -> Result<()> {
        let found = self.api.get_field_pair(handle, tag::YCBCR_SUBSAMPLING)?;
        if found != Some(EXPECTED_SUBSAMPLING) {
            return Err(at(Error::TagMismatch { found }));
        }
        Ok(())
    }

    fn expect_tile_size(&mut self, handle: Handle, expected: usize) -> Result<usize> {
        let actual = self.api.tile_size(handle)?;
        if actual != expected as i64 {
            return Err(at(Error::SizeMismatch {
                expected: expected as i64,
                actual,
            }));
        }
        Ok(expected)
    }

    fn read_tile(&mut self, handle: Handle, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let read = self
            .api
            .read_encoded_tile(handle, self.config.raw_tile, &mut buffer)?;
        if read != size as i64 {
            return Err(at(Error::DecodeSizeMismatch {
                expected: size as i64,
                actual: read,
            }));
        }
        Ok(buffer)
    }

    /// Run the whole sequence
    pub fn run(&mut self) -> Result<Summary> {
        let tif = self.open()?;
        self.expect_subsampling(tif)?;

        // Decompressed but still subsampled
        let size = self.expect_tile_size(tif, CLUSTER_SIZE * TILE_CLUSTERS)?;
        let raw = self.read_tile(tif, size)?;
        let clusters = check_clusters(&raw, &self.config.clusters);
        drop(raw);
        if !clusters.passed() {
            return Err(at(Error::ContentMismatch {
                what: "One or more clusters failed the check",
                failed: clusters.into_failed(),
            }));
        }
        debug!("{} cluster(s) matched", clusters.checked());

        if !self
            .api
            .set_field_u32(tif, tag::JPEG_COLOR_MODE, jpeg_color_mode::RGB)?
        {
            return Err(at(Error::ModeRejected));
        }

        let size = self.expect_tile_size(tif, CHANNELS_IN_PIXEL * TILE_PIXELS)?;
        let rgb = self.read_tile(tif, size)?;
        let mut pixels = check_rgb_pixels(&rgb, &self.config.limits);
        drop(rgb);

        self.close(tif)?;

        let tif = self.open()?;
        let mut raster = vec![0u32; TILE_PIXELS];
        let (x, y) = self.config.rgba_origin;
        if !self.api.read_rgba_tile(tif, x, y, &mut raster)? {
            return Err(at(Error::DecodeFailed));
        }
        pixels.merge(check_rgba_pixels(&raster, &self.config.limits));
        drop(raster);

        self.close(tif)?;

        if !pixels.passed() {
            return Err(at(Error::ContentMismatch {
                what: "wrong encoding",
                failed: pixels.into_failed(),
            }));
        }
        debug!("{} pixel check(s) passed", pixels.checked());

        Ok(Summary {
            clusters: clusters.checked(),
            pixels: pixels.checked(),
        })
    }
}
