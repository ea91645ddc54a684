//! Stream filter chains
//!
//! Decoding for the general-purpose PDF filters (Flate, LZW, ASCIIHex,
//! ASCII85, RunLength), undoing of PNG/TIFF row predictors, and deflate
//! encoding. Image-native filters (DCT, JPX, JBIG2, CCITTFax) are
//! recognized but never decoded here.

use std::io::{Read, Write};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{Dictionary, Document, Object, Stream};
use crate::error::{Error, Result};
use crate::pdf::graph;

/// Strongest deflate level
pub const BEST_COMPRESSION: u32 = 9;

/// One entry of a stream's `/Filter` chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Flate,
    Lzw,
    AsciiHex,
    Ascii85,
    RunLength,
    Dct,
    Jpx,
    Jbig2,
    CcittFax,
    Crypt,
    Other(String),
}

impl Filter {
    /// Parse a filter name, accepting the inline-image abbreviations
    pub fn from_name(name: &[u8]) -> Self {
        match name {
            b"FlateDecode" | b"Fl" => Filter::Flate,
            b"LZWDecode" | b"LZW" => Filter::Lzw,
            b"ASCIIHexDecode" | b"AHx" => Filter::AsciiHex,
            b"ASCII85Decode" | b"A85" => Filter::Ascii85,
            b"RunLengthDecode" | b"RL" => Filter::RunLength,
            b"DCTDecode" | b"DCT" => Filter::Dct,
            b"JPXDecode" => Filter::Jpx,
            b"JBIG2Decode" => Filter::Jbig2,
            b"CCITTFaxDecode" | b"CCF" => Filter::CcittFax,
            b"Crypt" => Filter::Crypt,
            other => Filter::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    /// The filter's PDF name
    pub fn name(&self) -> &str {
        match self {
            Filter::Flate => "FlateDecode",
            Filter::Lzw => "LZWDecode",
            Filter::AsciiHex => "ASCIIHexDecode",
            Filter::Ascii85 => "ASCII85Decode",
            Filter::RunLength => "RunLengthDecode",
            Filter::Dct => "DCTDecode",
            Filter::Jpx => "JPXDecode",
            Filter::Jbig2 => "JBIG2Decode",
            Filter::CcittFax => "CCITTFaxDecode",
            Filter::Crypt => "Crypt",
            Filter::Other(name) => name.as_str(),
        }
    }

    /// Filters whose output is already a specialized image encoding
    pub fn is_image_native(&self) -> bool {
        matches!(self, Filter::Dct | Filter::Jpx | Filter::Jbig2 | Filter::CcittFax)
    }

    /// Filters this module can decode
    pub fn is_invertible(&self) -> bool {
        matches!(
            self,
            Filter::Flate | Filter::Lzw | Filter::AsciiHex | Filter::Ascii85 | Filter::RunLength
        )
    }
}

/// The stream's filter chain in application order (outermost first)
pub fn filter_chain(doc: &Document, dict: &Dictionary) -> Vec<Filter> {
    match graph::get(doc, dict, b"Filter") {
        Some(Object::Name(name)) => vec![Filter::from_name(name)],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match graph::resolve(doc, item) {
                Some(Object::Name(name)) => Some(Filter::from_name(name)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode parameters aligned with `filter_chain`
pub fn decode_params(doc: &Document, dict: &Dictionary, count: usize) -> Vec<Option<Dictionary>> {
    let params = graph::get(doc, dict, b"DecodeParms").or_else(|| graph::get(doc, dict, b"DP"));
    let mut out = match params {
        Some(Object::Dictionary(d)) => vec![Some(d.clone())],
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| match graph::resolve(doc, item) {
                Some(Object::Dictionary(d)) => Some(d.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    out.resize(count, None);
    out
}

/// Decode every filter in the chain, undoing predictors after each one.
///
/// Fails with `UnsupportedFilter` on the first filter that cannot be inverted.
pub fn decode_stream(doc: &Document, stream: &Stream) -> Result<Vec<u8>> {
    let filters = filter_chain(doc, &stream.dict);
    let params = decode_params(doc, &stream.dict, filters.len());
    let mut data = stream.content.clone();
    for (filter, param) in filters.iter().zip(params.iter()) {
        data = decode_filter(filter, &data, param.as_ref())?;
        if let Some(predictor) = param.as_ref().and_then(|p| Predictor::from_params(doc, p)) {
            data = undo_predictor(&data, &predictor)?;
        }
    }
    Ok(data)
}

/// Decode the filter chain without undoing predictors.
///
/// Returns the data and the decode parameters of the last filter so the
/// caller can apply its predictor once it knows the sample layout.
pub fn decode_stream_raw(doc: &Document, stream: &Stream) -> Result<(Vec<u8>, Option<Dictionary>)> {
    let filters = filter_chain(doc, &stream.dict);
    let mut params = decode_params(doc, &stream.dict, filters.len());
    let mut data = stream.content.clone();
    for (filter, param) in filters.iter().zip(params.iter()) {
        data = decode_filter(filter, &data, param.as_ref())?;
    }
    Ok((data, params.pop().flatten()))
}

/// Decode one filter
pub fn decode_filter(filter: &Filter, data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    match filter {
        Filter::Flate => inflate(data),
        Filter::Lzw => {
            let early_change = params
                .and_then(|p| p.get(b"EarlyChange").ok())
                .and_then(graph::number)
                .map_or(true, |v| v != 0.0);
            lzw_decode(data, early_change)
        }
        Filter::AsciiHex => ascii_hex_decode(data),
        Filter::Ascii85 => ascii85_decode(data),
        Filter::RunLength => Ok(run_length_decode(data)),
        other => Err(Error::UnsupportedFilter(other.name().to_string())),
    }
}

/// Inflate zlib data. Truncated or corrupt data is an error.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Decode(format!("FlateDecode: {}", e)))?;
    Ok(out)
}

/// Deflate with a zlib header at `level` (0-9)
pub fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn lzw_decode(data: &[u8], early_change: bool) -> Result<Vec<u8>> {
    let mut decoder = if early_change {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    } else {
        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
    };
    decoder
        .decode(data)
        .map_err(|e| Error::Decode(format!("LZWDecode: {:?}", e)))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn is_pdf_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0C | 0x00)
}

fn ascii_hex_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;
    for &b in data {
        if b == b'>' {
            break;
        }
        if is_pdf_whitespace(b) {
            continue;
        }
        let nibble = hex_value(b)
            .ok_or_else(|| Error::Decode(format!("ASCIIHexDecode: invalid byte 0x{:02x}", b)))?;
        match high.take() {
            Some(h) => out.push(h << 4 | nibble),
            None => high = Some(nibble),
        }
    }
    // An odd final digit is padded with 0
    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

fn ascii85_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut len = 0;
    let body = data.strip_prefix(b"<~").unwrap_or(data);

    for &b in body {
        match b {
            b'~' => break,
            b'z' if len == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[len] = b - b'!';
                len += 1;
                if len == 5 {
                    out.extend_from_slice(&ascii85_group(&group));
                    len = 0;
                }
            }
            b if is_pdf_whitespace(b) => {}
            other => {
                return Err(Error::Decode(format!(
                    "ASCII85Decode: invalid byte 0x{:02x}",
                    other
                )))
            }
        }
    }

    if len == 1 {
        return Err(Error::Decode("ASCII85Decode: dangling final byte".to_string()));
    }
    if len > 1 {
        for slot in group.iter_mut().skip(len) {
            *slot = b'u' - b'!';
        }
        out.extend_from_slice(&ascii85_group(&group)[..len - 1]);
    }
    Ok(out)
}

fn ascii85_group(group: &[u8; 5]) -> [u8; 4] {
    let value = group
        .iter()
        .fold(0u64, |acc, &digit| acc * 85 + u64::from(digit));
    (value.min(u64::from(u32::MAX)) as u32).to_be_bytes()
}

fn run_length_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        let length = data[i];
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let end = (i + length as usize + 1).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                if let Some(&b) = data.get(i) {
                    out.extend(std::iter::repeat(b).take(257 - length as usize));
                }
                i += 1;
            }
        }
    }
    out
}

/// Row-prediction parameters from a `/DecodeParms` dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predictor {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Predictor {
    /// Read the predictor entries; `None` when no prediction is applied
    pub fn from_params(doc: &Document, params: &Dictionary) -> Option<Self> {
        let predictor = graph::get_integer(doc, params, b"Predictor").unwrap_or(1);
        if predictor <= 1 {
            return None;
        }
        let field = |key: &[u8], default: i64| {
            graph::get_integer(doc, params, key)
                .filter(|v| *v > 0)
                .unwrap_or(default) as usize
        };
        Some(Self {
            predictor,
            colors: field(b"Colors", 1),
            bits_per_component: field(b"BitsPerComponent", 8),
            columns: field(b"Columns", 1),
        })
    }

    /// Bytes in one row of samples, excluding any PNG tag byte
    pub fn row_stride(&self) -> usize {
        (self.colors * self.bits_per_component * self.columns + 7) / 8
    }

    /// Bytes per complete pixel, at least 1
    pub fn bytes_per_pixel(&self) -> usize {
        ((self.colors * self.bits_per_component + 7) / 8).max(1)
    }
}

/// Reconstruct rows encoded with a TIFF (2) or PNG (10-15) predictor
pub fn undo_predictor(data: &[u8], predictor: &Predictor) -> Result<Vec<u8>> {
    match predictor.predictor {
        2 => undo_tiff_predictor(data, predictor),
        10..=15 => Ok(undo_png_predictor(data, predictor)),
        other => Err(Error::Decode(format!("unknown predictor {}", other))),
    }
}

fn undo_tiff_predictor(data: &[u8], predictor: &Predictor) -> Result<Vec<u8>> {
    if predictor.bits_per_component != 8 {
        return Err(Error::Decode(format!(
            "TIFF predictor with {} bits per component",
            predictor.bits_per_component
        )));
    }
    let stride = predictor.row_stride();
    let bpp = predictor.bytes_per_pixel();
    let mut out = data.to_vec();
    for row in out.chunks_mut(stride) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    Ok(out)
}

fn undo_png_predictor(data: &[u8], predictor: &Predictor) -> Vec<u8> {
    let stride = predictor.row_stride();
    let bpp = predictor.bytes_per_pixel();
    let mut out = Vec::with_capacity(data.len());
    let mut previous = vec![0u8; stride];

    for encoded in data.chunks(stride + 1) {
        let (tag, bytes) = match encoded.split_first() {
            Some(split) => split,
            None => break,
        };
        let mut row = vec![0u8; stride];
        row[..bytes.len()].copy_from_slice(bytes);

        for i in 0..stride {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            row[i] = match tag {
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                _ => row[i],
            };
        }
        out.extend_from_slice(&row[..bytes.len()]);
        previous = row;
    }
    out
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_flate_roundtrip() {
        let data = b"BT /F1 12 Tf (Hello) Tj ET".repeat(20);
        let packed = deflate(&data, BEST_COMPRESSION).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(inflate(&packed).unwrap(), data);
    }

    #[test]
    fn test_inflate_rejects_garbage() {
        assert!(inflate(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_ascii_hex_odd_digit_and_whitespace() {
        assert_eq!(ascii_hex_decode(b"48 65\n6C6C6F7>").unwrap(), b"Hello\x70");
    }

    #[test]
    fn test_ascii85_known_value() {
        // "Man " encodes to "9jqo^"
        assert_eq!(ascii85_decode(b"9jqo^~>").unwrap(), b"Man ");
        assert_eq!(ascii85_decode(b"z~>").unwrap(), vec![0, 0, 0, 0]);
        // Partial final group
        assert_eq!(ascii85_decode(b"9jqo~>").unwrap(), b"Man");
    }

    #[test]
    fn test_run_length() {
        let encoded = [2, b'a', b'b', b'c', 254, b'x', 128];
        assert_eq!(run_length_decode(&encoded), b"abcxxx");
    }

    #[test]
    fn test_png_up_predictor() {
        let predictor = Predictor { predictor: 12, colors: 1, bits_per_component: 8, columns: 3 };
        // Row 1: None [1,2,3]; Row 2: Up [1,1,1] -> [2,3,4]
        let encoded = [0, 1, 2, 3, 2, 1, 1, 1];
        assert_eq!(undo_predictor(&encoded, &predictor).unwrap(), vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_and_paeth_predictor() {
        let predictor = Predictor { predictor: 15, colors: 2, bits_per_component: 8, columns: 2 };
        // Sub: second pixel adds the first pixel's bytes
        let encoded = [1, 10, 20, 1, 1, 4, 0, 0, 0, 0];
        let decoded = undo_predictor(&encoded, &predictor).unwrap();
        assert_eq!(&decoded[..4], &[10, 20, 11, 21]);
        // Paeth on zero deltas with left = 0 picks up
        assert_eq!(&decoded[4..], &[10, 20, 11, 21]);
    }

    #[test]
    fn test_tiff_predictor() {
        let predictor = Predictor { predictor: 2, colors: 1, bits_per_component: 8, columns: 4 };
        assert_eq!(undo_predictor(&[5, 1, 1, 1], &predictor).unwrap(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_decode_stream_applies_chain_and_predictor() {
        let doc = Document::with_version("1.5");
        let rows = [2u8, 1, 1, 1, 2, 1, 1, 1];
        let packed = deflate(&rows, 6).unwrap();
        let stream = Stream::new(
            dictionary! {
                "Filter" => "FlateDecode",
                "DecodeParms" => dictionary! { "Predictor" => 12, "Columns" => 3 },
            },
            packed,
        );
        assert_eq!(decode_stream(&doc, &stream).unwrap(), vec![1, 1, 1, 2, 2, 2]);

        let (raw, params) = decode_stream_raw(&doc, &stream).unwrap();
        assert_eq!(raw, rows.to_vec());
        assert!(params.is_some());
    }

    #[test]
    fn test_unsupported_filter_is_error() {
        let doc = Document::with_version("1.5");
        let stream = Stream::new(dictionary! { "Filter" => "DCTDecode" }, vec![0xFF, 0xD8]);
        assert!(matches!(decode_stream(&doc, &stream), Err(Error::UnsupportedFilter(_))));
    }

    #[test]
    fn test_filter_chain_array() {
        let doc = Document::with_version("1.5");
        let dict = dictionary! {
            "Filter" => vec![Object::Name(b"ASCII85Decode".to_vec()), Object::Name(b"FlateDecode".to_vec())],
        };
        assert_eq!(filter_chain(&doc, &dict), vec![Filter::Ascii85, Filter::Flate]);
    }
}
