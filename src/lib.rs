//! # tilecheck
//!
//! Golden-value verification of TIFF tile decoding behind an isolation
//! boundary.
//!
//! The verifier opens a JPEG-compressed, 2x2-subsampled YCbCr test image
//! through a [`TiffApi`] proxy and decodes the same tile three ways:
//!
//! - raw, still subsampled, compared cluster by cluster against exact bytes
//! - converted to RGB, compared pixel by pixel against channel ranges
//! - as a packed, bottom-up RGBA raster, compared against the same ranges
//!
//! Structural problems (a file that will not open, a wrong tag, a wrong tile
//! size, a failed close) abort the run at once. Content mismatches are all
//! checked and logged before the run fails.
//!
//! ## Quick Start
//!
//! ```no_run
//! let image = tilecheck::image_path_in("/src/libtiff".as_ref());
//! match tilecheck::verify(&image) {
//!     Ok(summary) => println!("{} clusters, {} pixels ok", summary.clusters, summary.pixels),
//!     Err(e) => eprintln!("verification failed: {e}"),
//! }
//! ```
//!
//! ## Custom backends
//!
//! Any decoder can be verified by implementing [`TiffApi`] and wrapping it in
//! a [`Sandbox`]:
//!
//! ```no_run
//! use tilecheck::{Sandbox, SandboxPolicy, TiffCrateBackend, VerifierConfig, verify_with};
//!
//! let config = VerifierConfig::new("/data/quad-tile.jpg.tiff");
//! let mut sandbox = Sandbox::new(
//!     TiffCrateBackend::new(),
//!     SandboxPolicy::for_file(config.source()),
//! );
//! verify_with(&mut sandbox, &config).unwrap();
//! ```

pub mod api;
mod backend;
pub mod check;
mod chroma;
mod config;
mod error;
#[cfg(test)]
mod fixtures;
pub mod golden;
mod jpeg;
mod sandbox;
mod tile;
mod verify;

use std::path::Path;

pub use api::{Handle, TiffApi, TransportError};
pub use backend::TiffCrateBackend;
pub use config::{TEST_IMAGE_NAME, VerifierConfig, image_path_in, project_root_from};
pub use error::{CheckError, Error, Result};
pub use sandbox::{Sandbox, SandboxPolicy};
pub use verify::{Summary, TileVerifier, check_clusters, check_rgb_pixels, check_rgba_pixels};

/// Verify `path` against the canonical golden values using the built-in
/// `tiff` backend, sandboxed to that one file
pub fn verify(path: &Path) -> Result<Summary> {
    // The sandbox admits absolute paths without `..` only
    let path = path
        .canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf());
    let config = VerifierConfig::new(&path);
    let mut sandbox = Sandbox::new(TiffCrateBackend::new(), SandboxPolicy::for_file(&path));
    verify_with(&mut sandbox, &config)
}

/// Verify with a caller-supplied backend and configuration
pub fn verify_with<A: TiffApi + ?Sized>(api: &mut A, config: &VerifierConfig) -> Result<Summary> {
    TileVerifier::new(api, config).run()
}
