//! Call surface of the isolation boundary
//!
//! The verifier only ever talks to a decoding backend through [`TiffApi`].
//! The methods mirror the narrow proxy a sandboxed TIFF library exposes:
//! backend-level failures come back as values (a null [`Handle`], a `false`
//! status, a negative byte count), while [`TransportError`] means the call
//! itself did not complete.

use std::path::{Path, PathBuf};

/// TIFF tag numbers used by the verifier
pub mod tag {
    /// YCbCrSubSampling (two SHORTs: horizontal, vertical)
    pub const YCBCR_SUBSAMPLING: u32 = 530;
    /// JPEG codec pseudo-tag selecting raw YCbCr or converted RGB output
    pub const JPEG_COLOR_MODE: u32 = 65538;
}

/// Values accepted by [`tag::JPEG_COLOR_MODE`]
pub mod jpeg_color_mode {
    /// Hand out decompressed but still subsampled YCbCr
    pub const RAW: u32 = 0;
    /// Convert YCbCr to interleaved RGB inside the codec
    pub const RGB: u32 = 1;
}

/// Opaque reference to an open image on the far side of the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

impl Handle {
    /// The handle returned when an open fails
    pub const NULL: Self = Self(0);

    /// Returns true if this is the null handle
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// Failure of the boundary itself, as opposed to a backend-level failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The boundary policy does not allow this file to be opened
    #[error("access to {} denied by sandbox policy", .0.display())]
    PathDenied(PathBuf),

    /// The backend panicked while servicing a call
    #[error("backend panicked in {call}: {message}")]
    BackendPanicked {
        /// Name of the proxied call
        call: &'static str,
        /// Panic payload, if it was a string
        message: String,
    },

    /// An earlier failure tore the backend down
    #[error("backend is no longer running")]
    Terminated,
}

/// Proxy interface to a TIFF decoding backend
///
/// Implementations are expected to behave like libtiff's tile API: tile sizes
/// are reported for the current decode mode, edge tiles are padded to the full
/// tile size, and packed RGBA rasters are stored bottom row first.
pub trait TiffApi {
    /// Open `path` with a libtiff-style mode string. Returns [`Handle::NULL`]
    /// if the backend could not open or parse the file.
    fn open(&mut self, path: &Path, mode: &str) -> Result<Handle, TransportError>;

    /// Release a handle. Returns `false` if the backend reported an error.
    fn close(&mut self, handle: Handle) -> Result<bool, TransportError>;

    /// Read a tag holding two SHORT values
    fn get_field_pair(
        &mut self,
        handle: Handle,
        tag: u32,
    ) -> Result<Option<(u16, u16)>, TransportError>;

    /// Size in bytes of one decoded tile under the current decode mode, or a
    /// negative value if the image is not tiled
    fn tile_size(&mut self, handle: Handle) -> Result<i64, TransportError>;

    /// Set a tag or pseudo-tag taking one integer. Returns `false` if rejected.
    fn set_field_u32(&mut self, handle: Handle, tag: u32, value: u32)
    -> Result<bool, TransportError>;

    /// Decode tile `tile` into `buf`, writing at most `buf.len()` bytes.
    /// Returns the number of bytes written, or -1 on failure.
    fn read_encoded_tile(
        &mut self,
        handle: Handle,
        tile: u32,
        buf: &mut [u8],
    ) -> Result<i64, TransportError>;

    /// Decode the tile containing pixel `(x, y)` into packed ABGR words,
    /// bottom row first. `buf` must hold one full tile. Returns `false` on
    /// failure.
    fn read_rgba_tile(
        &mut self,
        handle: Handle,
        x: u32,
        y: u32,
        buf: &mut [u32],
    ) -> Result<bool, TransportError>;
}
