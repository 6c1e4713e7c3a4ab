//! Decoded tile samples, padded to the full tile size

use bytemuck::Pod;
use imgref::ImgVec;
use rgb::{Rgb, Rgba};
use yuv::convert::RGBConvert;

use crate::chroma::{YCbCr, ycbcr_to_rgb};

/// Sample layout of a decoded 8-bit tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl SampleLayout {
    /// Bytes per pixel
    pub fn samples(self) -> usize {
        match self {
            SampleLayout::Gray => 1,
            SampleLayout::GrayAlpha => 2,
            SampleLayout::Rgb => 3,
            SampleLayout::Rgba => 4,
        }
    }
}

/// One decoded tile
#[derive(Debug)]
#[non_exhaustive]
pub enum TilePixels {
    Gray8(ImgVec<u8>),
    GrayAlpha8(ImgVec<[u8; 2]>),
    Rgb8(ImgVec<Rgb<u8>>),
    Rgba8(ImgVec<Rgba<u8>>),
    /// Full resolution, expanded from stored clusters
    YCbCr8(ImgVec<YCbCr>),
}

/// Copy `data_width` x `data_height` pixels into a zeroed `width` x `height` image
fn padded<T: Pod + Default>(
    data: &[u8],
    data_width: usize,
    data_height: usize,
    width: usize,
    height: usize,
) -> Option<ImgVec<T>> {
    let src: &[T] = bytemuck::try_cast_slice(data).ok()?;
    let (dw, dh) = (data_width.min(width), data_height.min(height));
    if data_width == 0 || src.len() < data_width * dh {
        return None;
    }

    let mut out = vec![T::default(); width * height];
    for (y, row) in src.chunks_exact(data_width).take(dh).enumerate() {
        out[y * width..y * width + dw].copy_from_slice(&row[..dw]);
    }
    Some(ImgVec::new(out, width, height))
}

impl TilePixels {
    /// Wrap interleaved samples of a (possibly partial) tile.
    ///
    /// Returns `None` if `data` is too short for the declared data size.
    pub fn from_samples(
        layout: SampleLayout,
        data: &[u8],
        data_size: (usize, usize),
        tile_size: (usize, usize),
    ) -> Option<Self> {
        let (dw, dh) = data_size;
        let (w, h) = tile_size;
        Some(match layout {
            SampleLayout::Gray => TilePixels::Gray8(padded(data, dw, dh, w, h)?),
            SampleLayout::GrayAlpha => TilePixels::GrayAlpha8(padded(data, dw, dh, w, h)?),
            SampleLayout::Rgb => TilePixels::Rgb8(padded(data, dw, dh, w, h)?),
            SampleLayout::Rgba => TilePixels::Rgba8(padded(data, dw, dh, w, h)?),
        })
    }

    pub fn width(&self) -> usize {
        match self {
            TilePixels::Gray8(img) => img.width(),
            TilePixels::GrayAlpha8(img) => img.width(),
            TilePixels::Rgb8(img) => img.width(),
            TilePixels::Rgba8(img) => img.width(),
            TilePixels::YCbCr8(img) => img.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            TilePixels::Gray8(img) => img.height(),
            TilePixels::GrayAlpha8(img) => img.height(),
            TilePixels::Rgb8(img) => img.height(),
            TilePixels::Rgba8(img) => img.height(),
            TilePixels::YCbCr8(img) => img.height(),
        }
    }

    /// Interleaved bytes in the tile's own layout
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TilePixels::Gray8(img) => img.buf().to_vec(),
            TilePixels::GrayAlpha8(img) => bytemuck::cast_slice(img.buf()).to_vec(),
            TilePixels::Rgb8(img) => bytemuck::cast_slice(img.buf()).to_vec(),
            TilePixels::Rgba8(img) => bytemuck::cast_slice(img.buf()).to_vec(),
            TilePixels::YCbCr8(img) => bytemuck::cast_slice(img.buf()).to_vec(),
        }
    }

    /// RGBA with straight alpha; opaque layouts get alpha 255
    pub fn to_rgba(&self, conv: &RGBConvert<u8>) -> ImgVec<Rgba<u8>> {
        let opaque = |px: Rgb<u8>| Rgba {
            r: px.r,
            g: px.g,
            b: px.b,
            a: 255,
        };
        let out: Vec<Rgba<u8>> = match self {
            TilePixels::Gray8(img) => img.buf().iter().map(|&g| opaque(Rgb::new(g, g, g))).collect(),
            TilePixels::GrayAlpha8(img) => img
                .buf()
                .iter()
                .map(|&[g, a]| Rgba { r: g, g, b: g, a })
                .collect(),
            TilePixels::Rgb8(img) => img.buf().iter().map(|&px| opaque(px)).collect(),
            TilePixels::Rgba8(img) => img.buf().to_vec(),
            TilePixels::YCbCr8(img) => img
                .buf()
                .iter()
                .map(|&s| opaque(ycbcr_to_rgb(conv, s)))
                .collect(),
        };
        ImgVec::new(out, self.width(), self.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chroma::ycbcr_to_rgb_converter;

    #[test]
    fn test_partial_tile_is_padded_with_zeros() {
        // 2x2 data in a 3x3 tile
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let tile = TilePixels::from_samples(SampleLayout::Rgb, &data, (2, 2), (3, 3)).unwrap();
        assert_eq!((tile.width(), tile.height()), (3, 3));
        assert_eq!(
            tile.to_bytes(),
            vec![
                1, 2, 3, 4, 5, 6, 0, 0, 0, //
                7, 8, 9, 10, 11, 12, 0, 0, 0, //
                0, 0, 0, 0, 0, 0, 0, 0, 0,
            ]
        );
    }

    #[test]
    fn test_short_data_is_rejected() {
        let data = [0u8; 11];
        assert!(TilePixels::from_samples(SampleLayout::Rgb, &data, (2, 2), (2, 2)).is_none());
        assert!(TilePixels::from_samples(SampleLayout::Gray, &data, (4, 3), (4, 4)).is_none());
    }

    #[test]
    fn test_to_rgba_is_opaque_for_rgb_and_gray() {
        let conv = ycbcr_to_rgb_converter().unwrap();
        let rgb = TilePixels::from_samples(SampleLayout::Rgb, &[10, 20, 30], (1, 1), (1, 1)).unwrap();
        assert_eq!(rgb.to_rgba(&conv).buf()[0], Rgba { r: 10, g: 20, b: 30, a: 255 });

        let gray = TilePixels::from_samples(SampleLayout::GrayAlpha, &[77, 9], (1, 1), (1, 1)).unwrap();
        assert_eq!(gray.to_rgba(&conv).buf()[0], Rgba { r: 77, g: 77, b: 77, a: 9 });
    }

    #[test]
    fn test_ycbcr_to_rgba_converts_each_pixel() {
        let conv = ycbcr_to_rgb_converter().unwrap();
        let img = ImgVec::new(vec![[90u8, 128, 128], [200, 128, 128]], 2, 1);
        let rgba = TilePixels::YCbCr8(img).to_rgba(&conv);
        for (px, y) in rgba.buf().iter().zip([90i16, 200]) {
            assert_eq!(px.a, 255);
            assert!((px.r as i16 - y).abs() <= 1 && (px.b as i16 - y).abs() <= 1, "{px:?}");
        }
    }
}
