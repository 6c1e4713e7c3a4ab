//! Synthetic JPEG streams and tiled TIFF files for tests

use std::path::PathBuf;

/// Bit-level writer for entropy-coded data, with byte stuffing
#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    count: u32,
}

impl BitWriter {
    fn put(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.acc = (self.acc << 1) | ((value >> i) & 1);
            self.count += 1;
            if self.count == 8 {
                self.push_byte();
            }
        }
    }

    fn push_byte(&mut self) {
        let byte = self.acc as u8;
        self.out.push(byte);
        if byte == 0xFF {
            self.out.push(0x00);
        }
        self.acc = 0;
        self.count = 0;
    }

    /// Pad the last byte with 1-bits
    fn flush(&mut self) {
        if self.count > 0 {
            self.put(0xFF, 8 - self.count);
        }
    }
}

fn segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&(body.len() as u16 + 2).to_be_bytes());
    out.extend_from_slice(body);
}

/// Abbreviated table stream, as stored in TIFF's `JPEGTables`.
///
/// Quantization table 0 is all ones. DC table 0 gives category `c` the
/// 4-bit code `c`. AC table 0 holds only end-of-block, coded as `0`.
pub fn jpeg_tables() -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    let mut dqt = vec![0x00];
    dqt.extend_from_slice(&[1u8; 64]);
    segment(&mut out, 0xDB, &dqt);

    let mut dc = vec![0x00];
    let mut counts = [0u8; 16];
    counts[3] = 12;
    dc.extend_from_slice(&counts);
    dc.extend(0u8..12);
    segment(&mut out, 0xC4, &dc);

    let mut ac = vec![0x10];
    let mut counts = [0u8; 16];
    counts[0] = 1;
    ac.extend_from_slice(&counts);
    ac.push(0x00);
    segment(&mut out, 0xC4, &ac);

    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// An image of flat 8x8 blocks, coded against [`jpeg_tables`]
pub struct JpegImage {
    pub width: u16,
    pub height: u16,
    /// Sampling factors per component
    pub factors: Vec<(u8, u8)>,
    pub restart_interval: u16,
    /// Block levels of each MCU, component by component, blocks row by row
    pub mcus: Vec<Vec<u8>>,
}

impl JpegImage {
    /// Encode without tables, the way TIFF tiles are stored
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        if self.restart_interval > 0 {
            segment(&mut out, 0xDD, &self.restart_interval.to_be_bytes());
        }

        let mut sof = vec![8];
        sof.extend_from_slice(&self.height.to_be_bytes());
        sof.extend_from_slice(&self.width.to_be_bytes());
        sof.push(self.factors.len() as u8);
        for (i, &(h, v)) in self.factors.iter().enumerate() {
            sof.extend_from_slice(&[i as u8 + 1, h << 4 | v, 0]);
        }
        segment(&mut out, 0xC0, &sof);

        let mut sos = vec![self.factors.len() as u8];
        for i in 0..self.factors.len() {
            sos.extend_from_slice(&[i as u8 + 1, 0x00]);
        }
        sos.extend_from_slice(&[0, 63, 0]);
        segment(&mut out, 0xDA, &sos);

        // A lone component is coded one block per MCU
        let blocks: Vec<usize> = match self.factors.as_slice() {
            [_] => vec![1],
            factors => factors.iter().map(|&(h, v)| (h * v) as usize).collect(),
        };

        let mut bits = BitWriter::default();
        let mut predictors = vec![0i32; self.factors.len()];
        for (n, levels) in self.mcus.iter().enumerate() {
            if self.restart_interval > 0 && n > 0 && n % self.restart_interval as usize == 0 {
                bits.flush();
                let rst = 0xD0 + ((n / self.restart_interval as usize - 1) % 8) as u8;
                bits.out.extend_from_slice(&[0xFF, rst]);
                predictors.iter_mut().for_each(|p| *p = 0);
            }
            let mut levels = levels.iter();
            for (c, &count) in blocks.iter().enumerate() {
                for &level in levels.by_ref().take(count) {
                    let dc = 8 * (level as i32 - 128);
                    let diff = dc - predictors[c];
                    predictors[c] = dc;
                    let category = 32 - diff.unsigned_abs().leading_zeros();
                    bits.put(category, 4);
                    let magnitude = if diff < 0 { diff + (1 << category) - 1 } else { diff };
                    bits.put(magnitude as u32, category);
                    // End of block
                    bits.put(0, 1);
                }
            }
        }
        bits.flush();
        out.extend_from_slice(&bits.out);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }
}

/// A TIFF field value
pub enum Field {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Undefined(Vec<u8>),
}

impl Field {
    fn kind(&self) -> (u16, usize) {
        match self {
            Field::Short(v) => (3, v.len()),
            Field::Long(v) => (4, v.len()),
            Field::Undefined(v) => (7, v.len()),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            Field::Short(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Field::Long(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Field::Undefined(v) => v.clone(),
        }
    }
}

/// Little-endian TIFF with one tiled image. Tile offsets and byte counts are
/// filled in from `tiles`.
pub fn tiled_tiff(mut fields: Vec<(u16, Field)>, tiles: &[Vec<u8>]) -> Vec<u8> {
    fields.push((324, Field::Long(vec![0; tiles.len()])));
    fields.push((325, Field::Long(tiles.iter().map(|t| t.len() as u32).collect())));
    fields.sort_by_key(|(tag, _)| *tag);

    let ifd_end = 8 + 2 + 12 * fields.len() + 4;
    let out_of_line: usize = fields
        .iter()
        .map(|(_, f)| f.bytes().len())
        .filter(|&n| n > 4)
        .map(|n| n + n % 2)
        .sum();
    let mut offset = (ifd_end + out_of_line) as u32;
    let offsets: Vec<u32> = tiles
        .iter()
        .map(|t| {
            let at = offset;
            offset += t.len() as u32;
            at
        })
        .collect();
    for (tag, field) in &mut fields {
        if *tag == 324 {
            *field = Field::Long(offsets.clone());
        }
    }

    let mut out = b"II".to_vec();
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&(fields.len() as u16).to_le_bytes());

    let mut extra = Vec::new();
    for (tag, field) in &fields {
        let (kind, count) = field.kind();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&(count as u32).to_le_bytes());
        let mut bytes = field.bytes();
        if bytes.len() > 4 {
            out.extend_from_slice(&((ifd_end + extra.len()) as u32).to_le_bytes());
            if bytes.len() % 2 == 1 {
                bytes.push(0);
            }
            extra.extend_from_slice(&bytes);
        } else {
            bytes.resize(4, 0);
            out.extend_from_slice(&bytes);
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&extra);
    for tile in tiles {
        out.extend_from_slice(tile);
    }
    out
}

/// Write `bytes` to a per-process temporary file
pub fn write_temp(name: &str, bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("tilecheck-{}-{name}", std::process::id()));
    std::fs::write(&path, bytes).unwrap();
    path
}
