//! YCbCr conversion and chroma subsampling for raw tile output
//!
//! A raw YCbCr tile with `h`x`v` subsampling is a sequence of clusters in
//! row-major block order. Each cluster holds the `h * v` luma samples of its
//! block (row by row) followed by one Cb and one Cr sample.

use imgref::ImgVec;
use rgb::Rgb;
use yuv::YUV;
use yuv::color::{MatrixCoefficients, Range};
use yuv::convert::RGBConvert;

use crate::jpeg::Plane;

/// Interleaved Y, Cb, Cr samples of one pixel
pub type YCbCr = [u8; 3];

/// Converter for full-range BT.601 YCbCr, the JPEG/TIFF default
pub fn ycbcr_to_rgb_converter() -> Result<RGBConvert<u8>, yuv::Error> {
    RGBConvert::<u8>::new(Range::Full, MatrixCoefficients::BT601)
}

/// Convert one YCbCr sample triple to RGB
#[inline]
pub fn ycbcr_to_rgb(conv: &RGBConvert<u8>, [y, u, v]: YCbCr) -> Rgb<u8> {
    conv.to_rgb(YUV { y, u, v })
}

/// Bytes of one raw tile: `ceil(w / h) * ceil(l / v)` clusters of `h * v + 2`
pub fn cluster_tile_size(width: usize, length: usize, h: usize, v: usize) -> usize {
    if h == 0 || v == 0 {
        return 0;
    }
    width.div_ceil(h) * length.div_ceil(v) * (h * v + 2)
}

/// Interleave stored component planes into clusters covering a
/// `width` x `length` tile.
///
/// Each cluster takes `p.h * p.v` samples from every plane in order, so
/// 2x2-subsampled YCbCr yields four luma samples, then Cb, then Cr.
/// Coordinates past a plane's edge repeat its last column or row.
pub fn pack_clusters(planes: &[Plane], width: usize, length: usize) -> Vec<u8> {
    let h_max = planes.iter().map(|p| p.h).max().unwrap_or(0);
    let v_max = planes.iter().map(|p| p.v).max().unwrap_or(0);
    if h_max == 0 || v_max == 0 || planes.iter().any(|p| p.samples.width() == 0 || p.samples.height() == 0) {
        return Vec::new();
    }
    let across = width.div_ceil(h_max);
    let down = length.div_ceil(v_max);
    let per_cluster: usize = planes.iter().map(|p| p.h * p.v).sum();

    let mut out = Vec::with_capacity(across * down * per_cluster);
    for cy in 0..down {
        for cx in 0..across {
            for plane in planes {
                let img = &plane.samples;
                for dy in 0..plane.v {
                    let y = (cy * plane.v + dy).min(img.height() - 1);
                    for dx in 0..plane.h {
                        let x = (cx * plane.h + dx).min(img.width() - 1);
                        out.push(img[(x, y)]);
                    }
                }
            }
        }
    }
    out
}

/// Expand stored clusters to full-resolution YCbCr, replicating each
/// cluster's chroma over its block. Returns `None` if `data` is short.
pub fn unpack_clusters(
    data: &[u8],
    width: usize,
    length: usize,
    h: usize,
    v: usize,
) -> Option<ImgVec<YCbCr>> {
    if data.len() < cluster_tile_size(width, length, h, v) || h == 0 || v == 0 {
        return None;
    }
    let mut out = vec![[0u8; 3]; width * length];
    let across = width.div_ceil(h);
    for (n, cluster) in data.chunks_exact(h * v + 2).take(across * length.div_ceil(v)).enumerate() {
        let (bx, by) = ((n % across) * h, (n / across) * v);
        let (luma, chroma) = cluster.split_at(h * v);
        for dy in 0..v {
            for dx in 0..h {
                let (x, y) = (bx + dx, by + dy);
                if x < width && y < length {
                    out[y * width + x] = [luma[dy * h + dx], chroma[0], chroma[1]];
                }
            }
        }
    }
    Some(ImgVec::new(out, width, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(h: usize, v: usize, width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Plane {
        let buf = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Plane {
            h,
            v,
            samples: ImgVec::new(buf, width, height),
        }
    }

    #[test]
    fn test_gray_axis_converts_to_gray() {
        let conv = ycbcr_to_rgb_converter().unwrap();
        for y in [0u8, 77, 128, 255] {
            let px = ycbcr_to_rgb(&conv, [y, 128, 128]);
            for c in [px.r, px.g, px.b] {
                assert!((c as i16 - y as i16).abs() <= 1, "{y} -> {px:?}");
            }
        }
    }

    #[test]
    fn test_cluster_tile_size() {
        assert_eq!(cluster_tile_size(128, 128, 2, 2), 6 * 64 * 64);
        assert_eq!(cluster_tile_size(128, 128, 2, 1), 4 * 64 * 128);
        assert_eq!(cluster_tile_size(5, 3, 2, 2), 3 * 2 * 6);
        assert_eq!(cluster_tile_size(128, 128, 0, 2), 0);
    }

    #[test]
    fn test_pack_clusters_keeps_stored_chroma() {
        let levels = [[0u8, 16], [200, 255]];
        let planes = [
            plane(2, 2, 16, 16, |x, y| levels[y / 8][x / 8]),
            plane(1, 1, 8, 8, |x, _| 130 + x as u8),
            plane(1, 1, 8, 8, |_, y| 90 - y as u8),
        ];
        let packed = pack_clusters(&planes, 16, 16);
        assert_eq!(packed.len(), cluster_tile_size(16, 16, 2, 2));

        let cluster = |cx: usize, cy: usize| &packed[(cy * 8 + cx) * 6..(cy * 8 + cx + 1) * 6];
        assert_eq!(cluster(0, 0), &[0, 0, 0, 0, 130, 90]);
        assert_eq!(cluster(4, 0), &[16, 16, 16, 16, 134, 90]);
        assert_eq!(cluster(3, 4), &[200, 200, 200, 200, 133, 86]);
        assert_eq!(cluster(7, 7), &[255, 255, 255, 255, 137, 83]);
    }

    #[test]
    fn test_pack_clusters_luma_order_within_block() {
        let planes = [
            plane(2, 2, 4, 2, |x, y| (y * 4 + x) as u8),
            plane(1, 1, 2, 1, |x, _| 100 + x as u8),
            plane(1, 1, 2, 1, |x, _| 200 + x as u8),
        ];
        assert_eq!(
            pack_clusters(&planes, 4, 2),
            vec![0, 1, 4, 5, 100, 200, 2, 3, 6, 7, 101, 201]
        );
    }

    #[test]
    fn test_pack_clusters_clamps_to_plane_edges() {
        let planes = [
            plane(2, 2, 2, 2, |x, y| (y * 2 + x) as u8),
            plane(1, 1, 1, 1, |_, _| 50),
            plane(1, 1, 1, 1, |_, _| 60),
        ];
        assert_eq!(
            pack_clusters(&planes, 4, 2),
            vec![0, 1, 2, 3, 50, 60, 1, 1, 3, 3, 50, 60]
        );
        assert!(pack_clusters(&[], 4, 2).is_empty());
    }

    #[test]
    fn test_unpack_clusters_replicates_chroma() {
        let data = [1u8, 2, 3, 4, 101, 201, 5, 6, 7, 8, 5, 10];
        let img = unpack_clusters(&data, 4, 2, 2, 2).unwrap();
        assert_eq!(
            img.buf(),
            &[
                [1, 101, 201],
                [2, 101, 201],
                [5, 5, 10],
                [6, 5, 10],
                [3, 101, 201],
                [4, 101, 201],
                [7, 5, 10],
                [8, 5, 10],
            ]
        );
    }

    #[test]
    fn test_unpack_clusters_crops_edge_blocks() {
        let data = [9u8, 9, 9, 9, 50, 60, 9, 9, 9, 9, 50, 60];
        let img = unpack_clusters(&data, 3, 1, 2, 2).unwrap();
        assert_eq!(img.buf(), &[[9, 50, 60]; 3]);
        assert!(unpack_clusters(&data[..11], 3, 1, 2, 2).is_none());
    }
}
