//! Decoding backend built on the `tiff` crate
//!
//! Behaves like libtiff's tile API as far as the verifier needs it. Tile
//! sizes depend on the JPEG color mode. Raw reads of subsampled YCbCr images
//! hand out the stored clusters; JPEG tiles are decoded to their component
//! planes for that and never pass through RGB. Edge tiles are padded, and
//! packed RGBA rasters are stored bottom row first.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, error};
use tiff::ColorType;
use tiff::decoder::{ChunkType, Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::api::{Handle, TiffApi, TransportError, jpeg_color_mode, tag};
use crate::check::pack_abgr;
use crate::chroma::{cluster_tile_size, pack_clusters, unpack_clusters, ycbcr_to_rgb_converter};
use crate::jpeg::{self, JpegError};
use crate::tile::{SampleLayout, TilePixels};

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_JPEG: u16 = 7;
const PHOTOMETRIC_YCBCR: u16 = 6;

/// Failures inside the backend. These never cross the boundary; they are
/// logged and reported as a null handle, `false` or `-1`.
#[derive(Debug, thiserror::Error)]
enum BackendError {
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Color conversion error: {0}")]
    ColorConversion(#[from] yuv::Error),

    #[error("JPEG error: {0}")]
    Jpeg(#[from] JpegError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown handle {0:?}")]
    BadHandle(Handle),

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Invalid(&'static str),
}

type BackendResult<T> = Result<T, BackendError>;

/// Image structure read once at open time
#[derive(Debug, Clone, Copy)]
struct Layout {
    width: u32,
    height: u32,
    tiled: bool,
    tile_width: u32,
    tile_length: u32,
    compression: u16,
    photometric: u16,
    /// Decoded sample layout, `None` if not 8-bit or not understood
    samples: Option<SampleLayout>,
    subsampling: Option<(u16, u16)>,
}

impl Layout {
    fn tiles_across(&self) -> u32 {
        self.width.div_ceil(self.tile_width.max(1))
    }

    fn tile_count(&self) -> u32 {
        self.tiles_across() * self.height.div_ceil(self.tile_length.max(1))
    }

    fn is_ycbcr(&self) -> bool {
        self.photometric == PHOTOMETRIC_YCBCR
    }

    fn is_jpeg(&self) -> bool {
        self.compression == COMPRESSION_JPEG
    }
}

struct Session {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    layout: Layout,
    color_mode: u32,
    /// Offset and byte count of each stored tile
    chunks: Vec<(u64, u64)>,
    jpeg_tables: Option<Vec<u8>>,
}

impl Session {
    fn open(path: &Path) -> BackendResult<Self> {
        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        let (width, height) = decoder.dimensions()?;
        let tiled = matches!(decoder.get_chunk_type(), ChunkType::Tile);
        let (tile_width, tile_length) = decoder.chunk_dimensions();
        let compression = decoder
            .find_tag_unsigned::<u16>(Tag::Compression)?
            .unwrap_or(1);
        let photometric = decoder
            .find_tag_unsigned::<u16>(Tag::PhotometricInterpretation)?
            .unwrap_or(0);
        let subsampling_tag = Tag::from_u16_exhaustive(tag::YCBCR_SUBSAMPLING as u16);
        let subsampling = match decoder.find_tag(subsampling_tag)? {
            Some(value) => match value.into_u16_vec()?.as_slice() {
                &[h, v] => Some((h, v)),
                _ => return Err(BackendError::Invalid("malformed YCbCrSubSampling tag")),
            },
            // TIFF default for YCbCr images
            None if photometric == PHOTOMETRIC_YCBCR => Some((2, 2)),
            None => None,
        };

        // The JPEG codec converts YCbCr to RGB while decoding. Uncompressed
        // YCbCr is expanded from its stored clusters instead.
        let samples = match decoder.colortype()? {
            ColorType::Gray(8) => Some(SampleLayout::Gray),
            ColorType::GrayA(8) => Some(SampleLayout::GrayAlpha),
            ColorType::RGB(8) => Some(SampleLayout::Rgb),
            ColorType::RGBA(8) => Some(SampleLayout::Rgba),
            ColorType::YCbCr(8) if compression == COMPRESSION_JPEG => Some(SampleLayout::Rgb),
            _ => None,
        };

        let offsets = decoder
            .find_tag_unsigned_vec::<u64>(Tag::TileOffsets)?
            .unwrap_or_default();
        let byte_counts = decoder
            .find_tag_unsigned_vec::<u64>(Tag::TileByteCounts)?
            .unwrap_or_default();
        let chunks = offsets.into_iter().zip(byte_counts).collect();
        let jpeg_tables = decoder
            .find_tag(Tag::JPEGTables)?
            .map(|v| v.into_u8_vec())
            .transpose()?;

        let layout = Layout {
            width,
            height,
            tiled,
            tile_width,
            tile_length,
            compression,
            photometric,
            samples,
            subsampling,
        };
        debug!("opened {}: {layout:?}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            layout,
            color_mode: jpeg_color_mode::RAW,
            chunks,
            jpeg_tables,
        })
    }

    /// Raw mode on a subsampled YCbCr image hands out packed clusters
    fn raw_clusters(&self) -> Option<(usize, usize)> {
        let layout = &self.layout;
        if !layout.is_ycbcr() || self.color_mode == jpeg_color_mode::RGB {
            return None;
        }
        layout.subsampling.map(|(h, v)| (h as usize, v as usize))
    }

    fn tile_size(&self) -> i64 {
        let layout = &self.layout;
        if !layout.tiled {
            return -1;
        }
        let (w, l) = (layout.tile_width as usize, layout.tile_length as usize);
        let size = match (self.raw_clusters(), layout.samples) {
            (Some((h, v)), _) => cluster_tile_size(w, l, h, v),
            (None, Some(samples)) => w * l * samples.samples(),
            (None, None) => return -1,
        };
        size as i64
    }

    fn check_tile(&self, tile: u32) -> BackendResult<()> {
        if !self.layout.tiled {
            return Err(BackendError::Invalid("image is not tiled"));
        }
        if tile >= self.layout.tile_count() {
            return Err(BackendError::Invalid("tile number out of range"));
        }
        Ok(())
    }

    /// Bytes of one tile exactly as stored in the file
    fn stored_tile(&self, tile: u32) -> BackendResult<Vec<u8>> {
        let &(offset, len) = self
            .chunks
            .get(tile as usize)
            .ok_or(BackendError::Invalid("tile has no offset"))?;
        let mut file = File::open(&self.path)?;
        if offset.saturating_add(len) > file.metadata()?.len() {
            return Err(BackendError::Invalid("tile extends past the end of the file"));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0; len as usize];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Clusters of one raw tile with `h`x`v` subsampling
    fn raw_tile(&self, tile: u32, (h, v): (usize, usize)) -> BackendResult<Vec<u8>> {
        self.check_tile(tile)?;
        let stored = self.stored_tile(tile)?;
        match self.layout.compression {
            COMPRESSION_NONE => Ok(stored),
            COMPRESSION_JPEG => {
                let planes = jpeg::decode_planes(self.jpeg_tables.as_deref(), &stored)?;
                let factors: Vec<_> = planes.iter().map(|p| (p.h, p.v)).collect();
                if factors != [(h, v), (1, 1), (1, 1)] {
                    return Err(BackendError::Invalid(
                        "JPEG sampling factors disagree with YCbCrSubSampling",
                    ));
                }
                let (w, l) = (self.layout.tile_width, self.layout.tile_length);
                Ok(pack_clusters(&planes, w as usize, l as usize))
            }
            _ => Err(BackendError::Unsupported("raw YCbCr reads of this compression")),
        }
    }

    /// Decode one tile and pad it to the full tile size
    fn decode_tile(&mut self, tile: u32) -> BackendResult<TilePixels> {
        self.check_tile(tile)?;
        let layout = self.layout;
        let (tw, tl) = (layout.tile_width as usize, layout.tile_length as usize);
        if layout.is_ycbcr() && !layout.is_jpeg() {
            let (h, v) = layout.subsampling.unwrap_or((1, 1));
            return unpack_clusters(&self.stored_tile(tile)?, tw, tl, h as usize, v as usize)
                .map(TilePixels::YCbCr8)
                .ok_or(BackendError::Invalid("stored tile shorter than its clusters"));
        }
        let samples = layout
            .samples
            .ok_or(BackendError::Unsupported("only 8-bit gray, RGB and YCbCr images"))?;

        let (dw, dh) = self.decoder.chunk_data_dimensions(tile);
        let data = match self.decoder.read_chunk(tile)? {
            DecodingResult::U8(data) => data,
            _ => return Err(BackendError::Unsupported("non 8-bit sample data")),
        };

        TilePixels::from_samples(samples, &data, (dw as usize, dh as usize), (tw, tl))
            .ok_or(BackendError::Invalid("decoded tile shorter than its dimensions"))
    }

    fn read_encoded_tile(&mut self, tile: u32, buf: &mut [u8]) -> BackendResult<usize> {
        let bytes = match self.raw_clusters() {
            Some(factors) => self.raw_tile(tile, factors)?,
            None => self.decode_tile(tile)?.to_bytes(),
        };
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn read_rgba_tile(&mut self, x: u32, y: u32, buf: &mut [u32]) -> BackendResult<()> {
        let layout = self.layout;
        if layout.tile_width == 0 || layout.tile_length == 0 {
            return Err(BackendError::Invalid("image is not tiled"));
        }
        if x % layout.tile_width != 0 || y % layout.tile_length != 0 {
            return Err(BackendError::Invalid(
                "row/col passed to read_rgba_tile not on tile boundary",
            ));
        }
        let (tw, tl) = (layout.tile_width as usize, layout.tile_length as usize);
        if buf.len() < tw * tl {
            return Err(BackendError::Invalid("raster smaller than one tile"));
        }
        if x >= layout.width || y >= layout.height {
            return Err(BackendError::Invalid("tile origin outside the image"));
        }

        let tile = (y / layout.tile_length) * layout.tiles_across() + x / layout.tile_width;
        let conv = ycbcr_to_rgb_converter()?;
        let rgba = self.decode_tile(tile)?.to_rgba(&conv);

        // Top row of the tile goes to the last row of the raster
        for (dst, src) in buf[..tw * tl].chunks_exact_mut(tw).rev().zip(rgba.rows()) {
            for (word, &px) in dst.iter_mut().zip(src) {
                *word = pack_abgr(px);
            }
        }
        Ok(())
    }
}

/// [`TiffApi`] implementation backed by the pure Rust `tiff` decoder
#[derive(Default)]
pub struct TiffCrateBackend {
    sessions: Vec<Option<Session>>,
}

impl TiffCrateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_some()).count()
    }

    fn session(&mut self, handle: Handle) -> BackendResult<&mut Session> {
        let index = handle
            .0
            .checked_sub(1)
            .ok_or(BackendError::BadHandle(handle))?;
        self.sessions
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(BackendError::BadHandle(handle))
    }
}

/// Log a backend failure and turn it into the sentinel the API promises
fn report<T>(call: &str, result: BackendResult<T>, sentinel: T) -> T {
    result.unwrap_or_else(|e| {
        error!("{call}: {e}");
        sentinel
    })
}

impl TiffApi for TiffCrateBackend {
    fn open(&mut self, path: &Path, mode: &str) -> Result<Handle, TransportError> {
        if mode != "r" {
            error!("open: {}: unsupported mode {mode:?}", path.display());
            return Ok(Handle::NULL);
        }
        let session = match Session::open(path) {
            Ok(session) => session,
            Err(e) => {
                error!("open: {}: {e}", path.display());
                return Ok(Handle::NULL);
            }
        };
        let slot = match self.sessions.iter().position(Option::is_none) {
            Some(slot) => {
                self.sessions[slot] = Some(session);
                slot
            }
            None => {
                self.sessions.push(Some(session));
                self.sessions.len() - 1
            }
        };
        Ok(Handle(slot as u64 + 1))
    }

    fn close(&mut self, handle: Handle) -> Result<bool, TransportError> {
        let result = self
            .session(handle)
            .map(|s| debug!("closing {}", s.path.display()));
        if result.is_ok() {
            self.sessions[handle.0 as usize - 1] = None;
        }
        Ok(report("close", result.map(|()| true), false))
    }

    fn get_field_pair(
        &mut self,
        handle: Handle,
        field: u32,
    ) -> Result<Option<(u16, u16)>, TransportError> {
        let result = self.session(handle).map(|s| match field {
            tag::YCBCR_SUBSAMPLING => s.layout.subsampling,
            _ => None,
        });
        Ok(report("get_field_pair", result, None))
    }

    fn tile_size(&mut self, handle: Handle) -> Result<i64, TransportError> {
        let result = self.session(handle).map(|s| s.tile_size());
        Ok(report("tile_size", result, -1))
    }

    fn set_field_u32(
        &mut self,
        handle: Handle,
        field: u32,
        value: u32,
    ) -> Result<bool, TransportError> {
        let result = self.session(handle).and_then(|s| {
            if field != tag::JPEG_COLOR_MODE {
                return Err(BackendError::Unsupported("tag is not settable on a read handle"));
            }
            if !s.layout.is_jpeg() {
                return Err(BackendError::Invalid("JPEGCOLORMODE requires a JPEG-compressed image"));
            }
            if value != jpeg_color_mode::RAW && value != jpeg_color_mode::RGB {
                return Err(BackendError::Invalid("unknown JPEGCOLORMODE value"));
            }
            s.color_mode = value;
            Ok(true)
        });
        Ok(report("set_field_u32", result, false))
    }

    fn read_encoded_tile(
        &mut self,
        handle: Handle,
        tile: u32,
        buf: &mut [u8],
    ) -> Result<i64, TransportError> {
        let result = self
            .session(handle)
            .and_then(|s| s.read_encoded_tile(tile, buf))
            .map(|n| n as i64);
        Ok(report("read_encoded_tile", result, -1))
    }

    fn read_rgba_tile(
        &mut self,
        handle: Handle,
        x: u32,
        y: u32,
        buf: &mut [u32],
    ) -> Result<bool, TransportError> {
        let result = self
            .session(handle)
            .and_then(|s| s.read_rgba_tile(x, y, buf))
            .map(|()| true);
        Ok(report("read_rgba_tile", result, false))
    }
}
