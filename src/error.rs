//! Error types for tilecheck

use std::path::PathBuf;

use crate::api::TransportError;

/// Error type for a verification run
///
/// Every variant except [`Error::ContentMismatch`] is structural: it aborts the
/// run at the step that produced it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The backend returned a null handle
    #[error("Could not open {}", path.display())]
    OpenFailed {
        /// File that was requested
        path: PathBuf,
    },

    /// The YCbCr subsampling tag was absent or not 2x2
    #[error("Could not retrieve subsampling tag (got {found:?}, expected (2, 2))")]
    TagMismatch {
        /// Horizontal and vertical factors reported by the backend
        found: Option<(u16, u16)>,
    },

    /// The backend reported a tile size other than the one this mode requires
    #[error("Unexpected TileSize {actual}. Expected {expected} bytes")]
    SizeMismatch {
        /// Required tile size in bytes
        expected: i64,
        /// Tile size reported by the backend
        actual: i64,
    },

    /// A tile read returned a different byte count than requested
    #[error("Did not get expected result code from read_encoded_tile(): {actual} instead of {expected}")]
    DecodeSizeMismatch {
        /// Bytes requested
        expected: i64,
        /// Bytes (or error code) returned
        actual: i64,
    },

    /// The backend refused to switch the JPEG color mode
    #[error("The JPEGCOLORMODE tag cannot be changed")]
    ModeRejected,

    /// The packed RGBA tile read reported failure
    #[error("read_rgba_tile() returned failure code")]
    DecodeFailed,

    /// One or more content checks in a batch failed
    #[error("{what}: {}", failed.join(", "))]
    ContentMismatch {
        /// Batch summary
        what: &'static str,
        /// Names of the failing checks
        failed: Vec<String>,
    },

    /// The backend reported a failure while closing a handle
    #[error("Could not close handle for {}", path.display())]
    CloseFailed {
        /// File the handle belonged to
        path: PathBuf,
    },

    /// The call never reached the backend or did not return from it
    #[error("Isolation boundary error: {0}")]
    Transport(#[from] TransportError),
}

// Two-hop conversion for ? operator: TransportError → At<Error>
impl From<TransportError> for whereat::At<Error> {
    #[track_caller]
    fn from(e: TransportError) -> Self {
        whereat::At::from(Error::from(e))
    }
}

/// Failure of a single content check
///
/// These never abort a run on their own; the caller logs them and folds them
/// into a batch result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// The indexed region lies past the end of the buffer
    #[error("Buffer overrun")]
    Overrun {
        /// Elements needed to cover the indexed region
        needed: usize,
        /// Elements actually present
        len: usize,
    },

    /// The values were readable but outside expectation
    #[error("{0}")]
    Mismatch(String),
}

/// Result type for tilecheck operations with location tracking
pub type Result<T, E = whereat::At<Error>> = core::result::Result<T, E>;
