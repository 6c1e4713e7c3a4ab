//! Baseline JPEG decoding to component planes
//!
//! Raw-mode tile reads hand out the samples exactly as the codec stores them,
//! before chroma upsampling and color conversion. Only what TIFF JPEG tiles use
//! is supported: 8-bit Huffman-coded sequential frames, one scan holding every
//! component, and optional restart intervals. The inverse DCT is the accurate
//! integer transform (libjpeg's `JDCT_ISLOW`).

use imgref::ImgVec;

/// Errors while decoding a JPEG stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JpegError {
    #[error("unexpected end of JPEG data")]
    Truncated,

    #[error("invalid JPEG data: {0}")]
    Invalid(&'static str),

    #[error("unsupported JPEG feature: {0}")]
    Unsupported(&'static str),
}

type Result<T> = core::result::Result<T, JpegError>;

/// One component at its stored resolution
#[derive(Debug, Clone)]
pub struct Plane {
    /// Horizontal sampling factor
    pub h: usize,
    /// Vertical sampling factor
    pub v: usize,
    /// Samples, padded to whole blocks
    pub samples: ImgVec<u8>,
}

/// Natural-order index of each zigzag position
const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const SOF1: u8 = 0xC1;
const DHT: u8 = 0xC4;
const SOS: u8 = 0xDA;
const DQT: u8 = 0xDB;
const DRI: u8 = 0xDD;

fn is_rst(marker: u8) -> bool {
    (0xD0..=0xD7).contains(&marker)
}

/// Reads entropy-coded bits, undoing byte stuffing. Hitting a marker stops
/// consumption; further bits read as zero.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    count: u32,
    marker: Option<u8>,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            count: 0,
            marker: None,
        }
    }

    fn fill(&mut self) {
        while self.count <= 24 {
            let byte = match (self.marker, self.data.get(self.pos)) {
                (Some(_), _) | (None, None) => 0,
                (None, Some(&0xFF)) => match self.data.get(self.pos + 1) {
                    Some(0x00) => {
                        self.pos += 2;
                        0xFF
                    }
                    Some(&m) => {
                        self.marker = Some(m);
                        0
                    }
                    None => 0,
                },
                (None, Some(&b)) => {
                    self.pos += 1;
                    b
                }
            };
            self.acc |= (byte as u32) << (24 - self.count);
            self.count += 8;
        }
    }

    fn bit(&mut self) -> u32 {
        self.bits(1)
    }

    /// Read `n` bits (at most 16) as an unsigned value
    fn bits(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        if self.count < n {
            self.fill();
        }
        let value = self.acc >> (32 - n);
        self.acc <<= n;
        self.count -= n;
        value
    }

    /// Drop buffered bits and step over the next restart marker
    fn restart(&mut self) -> Result<()> {
        self.acc = 0;
        self.count = 0;
        if self.marker.is_none() {
            while self.data.get(self.pos) == Some(&0xFF) && self.data.get(self.pos + 1) == Some(&0xFF)
            {
                self.pos += 1;
            }
            if self.data.get(self.pos) == Some(&0xFF) {
                self.marker = self.data.get(self.pos + 1).copied();
            }
        }
        match self.marker.take() {
            Some(m) if is_rst(m) => {
                self.pos += 2;
                Ok(())
            }
            _ => Err(JpegError::Invalid("missing restart marker")),
        }
    }

    /// Offset of the marker that ended the entropy-coded segment
    fn end(&self) -> usize {
        let mut p = self.pos;
        while p + 1 < self.data.len() {
            let next = self.data[p + 1];
            if self.data[p] == 0xFF && next != 0x00 && next != 0xFF && !is_rst(next) {
                return p;
            }
            p += 1;
        }
        self.data.len()
    }
}

/// Canonical Huffman table (ITU T.81 F.2.2.3)
#[derive(Debug, Clone)]
struct Huffman {
    maxcode: [i32; 17],
    mincode: [i32; 17],
    valptr: [i32; 17],
    values: Vec<u8>,
}

impl Huffman {
    fn new(counts: &[u8; 16], values: Vec<u8>) -> Result<Self> {
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total != values.len() || total > 256 {
            return Err(JpegError::Invalid("Huffman table size"));
        }
        let mut table = Self {
            maxcode: [-1; 17],
            mincode: [0; 17],
            valptr: [0; 17],
            values,
        };
        let mut code = 0i32;
        let mut k = 0i32;
        for len in 1..=16 {
            let n = counts[len - 1] as i32;
            if n > 0 {
                table.valptr[len] = k;
                table.mincode[len] = code;
                code += n;
                k += n;
                table.maxcode[len] = code - 1;
            }
            if code > 1 << len {
                return Err(JpegError::Invalid("Huffman code lengths overflow"));
            }
            code <<= 1;
        }
        Ok(table)
    }

    fn decode(&self, bits: &mut BitReader<'_>) -> Result<u8> {
        let mut code = 0i32;
        for len in 1..=16 {
            code = (code << 1) | bits.bit() as i32;
            if code <= self.maxcode[len] {
                let index = self.valptr[len] + code - self.mincode[len];
                return self
                    .values
                    .get(index as usize)
                    .copied()
                    .ok_or(JpegError::Invalid("bad Huffman code"));
            }
        }
        Err(JpegError::Invalid("bad Huffman code"))
    }
}

/// Sign-extend a `t`-bit magnitude (ITU T.81 F.2.2.1)
#[inline]
fn extend(v: u32, t: u32) -> i32 {
    if t == 0 {
        return 0;
    }
    let v = v as i32;
    if v < 1 << (t - 1) { v - (1 << t) + 1 } else { v }
}

const CONST_BITS: i32 = 13;
const PASS1_BITS: i32 = 2;
const FIX_0_298631336: i32 = 2446;
const FIX_0_390180644: i32 = 3196;
const FIX_0_541196100: i32 = 4433;
const FIX_0_765366865: i32 = 6270;
const FIX_0_899976223: i32 = 7373;
const FIX_1_175875602: i32 = 9633;
const FIX_1_501321110: i32 = 12299;
const FIX_1_847759065: i32 = 15137;
const FIX_1_961570560: i32 = 16069;
const FIX_2_053119869: i32 = 16819;
const FIX_2_562915447: i32 = 20995;
const FIX_3_072711026: i32 = 25172;

#[inline]
fn descale(x: i32, n: i32) -> i32 {
    (x + (1 << (n - 1))) >> n
}

/// One 8-point pass, scaled by `2^CONST_BITS`
fn idct8_1d(s: [i32; 8]) -> [i32; 8] {
    // Even part
    let z1 = (s[2] + s[6]) * FIX_0_541196100;
    let tmp2 = z1 - s[6] * FIX_1_847759065;
    let tmp3 = z1 + s[2] * FIX_0_765366865;
    let tmp0 = (s[0] + s[4]) << CONST_BITS;
    let tmp1 = (s[0] - s[4]) << CONST_BITS;
    let tmp10 = tmp0 + tmp3;
    let tmp13 = tmp0 - tmp3;
    let tmp11 = tmp1 + tmp2;
    let tmp12 = tmp1 - tmp2;

    // Odd part
    let (o0, o1, o2, o3) = (s[7], s[5], s[3], s[1]);
    let z1 = (o0 + o3) * -FIX_0_899976223;
    let z2 = (o1 + o2) * -FIX_2_562915447;
    let z5 = (o0 + o2 + o1 + o3) * FIX_1_175875602;
    let z3 = (o0 + o2) * -FIX_1_961570560 + z5;
    let z4 = (o1 + o3) * -FIX_0_390180644 + z5;
    let o0 = o0 * FIX_0_298631336 + z1 + z3;
    let o1 = o1 * FIX_2_053119869 + z2 + z4;
    let o2 = o2 * FIX_3_072711026 + z2 + z3;
    let o3 = o3 * FIX_1_501321110 + z1 + z4;

    [
        tmp10 + o3,
        tmp11 + o2,
        tmp12 + o1,
        tmp13 + o0,
        tmp13 - o0,
        tmp12 - o1,
        tmp11 - o2,
        tmp10 - o3,
    ]
}

/// Accurate integer inverse DCT of dequantized coefficients in natural order.
/// Writes an 8x8 block of level-shifted samples to `out` with row `stride`.
pub fn idct_islow(coef: &[i32; 64], out: &mut [u8], stride: usize) {
    let mut ws = [0i32; 64];
    for col in 0..8 {
        let column = std::array::from_fn(|row| coef[row * 8 + col]);
        for (row, v) in idct8_1d(column).into_iter().enumerate() {
            ws[row * 8 + col] = descale(v, CONST_BITS - PASS1_BITS);
        }
    }
    for row in 0..8 {
        let line = std::array::from_fn(|col| ws[row * 8 + col]);
        let dst = &mut out[row * stride..row * stride + 8];
        for (px, v) in dst.iter_mut().zip(idct8_1d(line)) {
            *px = (descale(v, CONST_BITS + PASS1_BITS + 3) + 128).clamp(0, 255) as u8;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameComponent {
    id: u8,
    h: usize,
    v: usize,
    quant: usize,
}

#[derive(Debug, Clone)]
struct Frame {
    width: usize,
    height: usize,
    components: Vec<FrameComponent>,
}

#[derive(Debug, Default)]
struct PlaneDecoder {
    quant: [Option<[u16; 64]>; 4],
    dc: [Option<Huffman>; 4],
    ac: [Option<Huffman>; 4],
    restart_interval: usize,
    frame: Option<Frame>,
    planes: Option<Vec<Plane>>,
}

fn be16(b: &[u8], at: usize) -> Result<usize> {
    match b.get(at..at + 2) {
        Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo]) as usize),
        _ => Err(JpegError::Truncated),
    }
}

impl PlaneDecoder {
    /// Walk the marker segments of one stream (a table stream or an image)
    fn read_stream(&mut self, data: &[u8]) -> Result<()> {
        if !data.starts_with(&[0xFF, SOI]) {
            return Err(JpegError::Invalid("missing SOI marker"));
        }
        let mut pos = 2;
        loop {
            let Some(&b) = data.get(pos) else {
                return Ok(());
            };
            if b != 0xFF {
                return Err(JpegError::Invalid("expected a marker"));
            }
            while data.get(pos) == Some(&0xFF) {
                pos += 1;
            }
            let marker = *data.get(pos).ok_or(JpegError::Truncated)?;
            pos += 1;

            match marker {
                EOI => return Ok(()),
                SOI => return Err(JpegError::Invalid("nested SOI marker")),
                m if is_rst(m) => continue,
                _ => {}
            }

            let len = be16(data, pos)?;
            if len < 2 {
                return Err(JpegError::Invalid("segment length"));
            }
            let segment = data.get(pos + 2..pos + len).ok_or(JpegError::Truncated)?;
            pos += len;

            match marker {
                DQT => self.read_dqt(segment)?,
                DHT => self.read_dht(segment)?,
                DRI => self.restart_interval = be16(segment, 0)?,
                SOF0 | SOF1 => self.read_sof(segment)?,
                0xC2 | 0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                    return Err(JpegError::Unsupported("only Huffman-coded sequential frames"));
                }
                SOS => pos += self.read_scan(segment, &data[pos..])?,
                // APPn, COM and friends
                _ => {}
            }
        }
    }

    fn read_dqt(&mut self, mut s: &[u8]) -> Result<()> {
        while let Some(&pq_tq) = s.first() {
            let id = (pq_tq & 0x0F) as usize;
            let wide = match pq_tq >> 4 {
                0 => false,
                1 => true,
                _ => return Err(JpegError::Invalid("quantization table precision")),
            };
            if id > 3 {
                return Err(JpegError::Invalid("quantization table id"));
            }
            let n = if wide { 128 } else { 64 };
            let body = s.get(1..1 + n).ok_or(JpegError::Truncated)?;
            let mut table = [0u16; 64];
            for (k, &natural) in ZIGZAG.iter().enumerate() {
                table[natural] = if wide {
                    u16::from_be_bytes([body[2 * k], body[2 * k + 1]])
                } else {
                    body[k] as u16
                };
            }
            self.quant[id] = Some(table);
            s = &s[1 + n..];
        }
        Ok(())
    }

    fn read_dht(&mut self, mut s: &[u8]) -> Result<()> {
        while let Some(&tc_th) = s.first() {
            let (class, id) = ((tc_th >> 4) as usize, (tc_th & 0x0F) as usize);
            if class > 1 || id > 3 {
                return Err(JpegError::Invalid("Huffman table class or id"));
            }
            let mut counts = [0u8; 16];
            counts.copy_from_slice(s.get(1..17).ok_or(JpegError::Truncated)?);
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let values = s.get(17..17 + total).ok_or(JpegError::Truncated)?.to_vec();
            let table = Huffman::new(&counts, values)?;
            if class == 0 {
                self.dc[id] = Some(table);
            } else {
                self.ac[id] = Some(table);
            }
            s = &s[17 + total..];
        }
        Ok(())
    }

    fn read_sof(&mut self, s: &[u8]) -> Result<()> {
        if self.frame.is_some() {
            return Err(JpegError::Invalid("more than one frame"));
        }
        if *s.first().ok_or(JpegError::Truncated)? != 8 {
            return Err(JpegError::Unsupported("only 8-bit samples"));
        }
        let height = be16(s, 1)?;
        let width = be16(s, 3)?;
        if height == 0 {
            return Err(JpegError::Unsupported("height defined by DNL"));
        }
        if width == 0 {
            return Err(JpegError::Invalid("zero width"));
        }
        let count = *s.get(5).ok_or(JpegError::Truncated)? as usize;
        if !(1..=4).contains(&count) {
            return Err(JpegError::Invalid("component count"));
        }
        let specs = s.get(6..6 + 3 * count).ok_or(JpegError::Truncated)?;
        let components = specs
            .chunks_exact(3)
            .map(|c| {
                let (h, v) = ((c[1] >> 4) as usize, (c[1] & 0x0F) as usize);
                if !(1..=4).contains(&h) || !(1..=4).contains(&v) || c[2] > 3 {
                    return Err(JpegError::Invalid("component parameters"));
                }
                Ok(FrameComponent {
                    id: c[0],
                    h,
                    v,
                    quant: c[2] as usize,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.frame = Some(Frame {
            width,
            height,
            components,
        });
        Ok(())
    }

    /// Decode one scan. Returns the length of its entropy-coded data.
    fn read_scan(&mut self, s: &[u8], entropy: &[u8]) -> Result<usize> {
        let frame = self
            .frame
            .as_ref()
            .ok_or(JpegError::Invalid("scan before frame header"))?;
        if self.planes.is_some() {
            return Err(JpegError::Unsupported("more than one scan"));
        }
        let count = *s.first().ok_or(JpegError::Truncated)? as usize;
        if count != frame.components.len() {
            return Err(JpegError::Unsupported("components split across scans"));
        }
        let specs = s.get(1..1 + 2 * count).ok_or(JpegError::Truncated)?;
        match s.get(1 + 2 * count..4 + 2 * count) {
            Some(&[0, 63, 0]) => {}
            Some(_) => return Err(JpegError::Unsupported("progressive scan parameters")),
            None => return Err(JpegError::Truncated),
        }

        struct ScanComponent<'t> {
            index: usize,
            dc: &'t Huffman,
            ac: &'t Huffman,
            quant: &'t [u16; 64],
        }
        let scan = specs
            .chunks_exact(2)
            .map(|c| {
                let index = frame
                    .components
                    .iter()
                    .position(|fc| fc.id == c[0])
                    .ok_or(JpegError::Invalid("scan names an unknown component"))?;
                let (td, ta) = ((c[1] >> 4) as usize, (c[1] & 0x0F) as usize);
                let missing = JpegError::Invalid("scan uses an undefined table");
                Ok(ScanComponent {
                    index,
                    dc: self.dc.get(td).and_then(Option::as_ref).ok_or(missing.clone())?,
                    ac: self.ac.get(ta).and_then(Option::as_ref).ok_or(missing.clone())?,
                    quant: self.quant[frame.components[index].quant]
                        .as_ref()
                        .ok_or(missing)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // A lone component is coded block by block, ignoring its factors
        let single = count == 1;
        let h_max = frame.components.iter().map(|c| c.h).max().unwrap_or(1);
        let v_max = frame.components.iter().map(|c| c.v).max().unwrap_or(1);
        let (mcus_x, mcus_y) = if single {
            let c = frame.components[0];
            (
                (frame.width * c.h).div_ceil(h_max).div_ceil(8),
                (frame.height * c.v).div_ceil(v_max).div_ceil(8),
            )
        } else {
            (
                frame.width.div_ceil(8 * h_max),
                frame.height.div_ceil(8 * v_max),
            )
        };
        let factors: Vec<(usize, usize)> = frame
            .components
            .iter()
            .map(|c| if single { (1, 1) } else { (c.h, c.v) })
            .collect();

        let mut buffers: Vec<(usize, Vec<u8>)> = factors
            .iter()
            .map(|&(h, v)| {
                let width = mcus_x * h * 8;
                (width, vec![0u8; width * mcus_y * v * 8])
            })
            .collect();

        let mut bits = BitReader::new(entropy);
        let mut predictors = [0i32; 4];
        let mut coef = [0i32; 64];
        for mcu in 0..mcus_x * mcus_y {
            if self.restart_interval > 0 && mcu > 0 && mcu % self.restart_interval == 0 {
                bits.restart()?;
                predictors = [0; 4];
            }
            let (mx, my) = (mcu % mcus_x, mcu / mcus_x);
            for (slot, sc) in scan.iter().enumerate() {
                let (h, v) = factors[sc.index];
                for by in 0..v {
                    for bx in 0..h {
                        decode_block(&mut bits, sc, &mut predictors[slot], &mut coef)?;
                        let (stride, buf) = &mut buffers[sc.index];
                        let x = (mx * h + bx) * 8;
                        let y = (my * v + by) * 8;
                        idct_islow(&coef, &mut buf[y * *stride + x..], *stride);
                    }
                }
            }
        }

        fn decode_block(
            bits: &mut BitReader<'_>,
            sc: &ScanComponent<'_>,
            predictor: &mut i32,
            coef: &mut [i32; 64],
        ) -> Result<()> {
            *coef = [0; 64];
            let t = sc.dc.decode(bits)? as u32;
            if t > 11 {
                return Err(JpegError::Invalid("DC difference category"));
            }
            *predictor += extend(bits.bits(t), t);
            coef[0] = *predictor * sc.quant[0] as i32;

            let mut k = 1;
            while k < 64 {
                let rs = sc.ac.decode(bits)?;
                let (run, size) = ((rs >> 4) as usize, (rs & 0x0F) as u32);
                if size == 0 {
                    if run == 15 {
                        k += 16;
                        continue;
                    }
                    break;
                }
                k += run;
                if k > 63 {
                    return Err(JpegError::Invalid("AC coefficient index"));
                }
                let z = ZIGZAG[k];
                coef[z] = extend(bits.bits(size), size) * sc.quant[z] as i32;
                k += 1;
            }
            Ok(())
        }

        let consumed = bits.end();
        self.planes = Some(
            buffers
                .into_iter()
                .zip(factors)
                .map(|((width, buf), (h, v))| {
                    let height = buf.len() / width;
                    Plane {
                        h,
                        v,
                        samples: ImgVec::new(buf, width, height),
                    }
                })
                .collect(),
        );
        Ok(consumed)
    }
}

/// Decode a JPEG stream to its component planes without upsampling.
///
/// `tables` is an abbreviated tables-only stream (TIFF's
/// `JPEGTables`) read before `data`.
pub fn decode_planes(tables: Option<&[u8]>, data: &[u8]) -> Result<Vec<Plane>> {
    let mut decoder = PlaneDecoder::default();
    if let Some(tables) = tables {
        decoder.read_stream(tables)?;
    }
    decoder.read_stream(data)?;
    decoder
        .planes
        .ok_or(JpegError::Invalid("no scan in JPEG data"))
}
