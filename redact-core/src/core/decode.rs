//! Stream decoding.
//!
//! Content streams and cross-reference streams arrive behind filter chains.
//! FlateDecode (with the optional PNG predictor), LZWDecode, ASCII85Decode
//! and ASCIIHexDecode are supported; anything else is reported as
//! unsupported so the caller can skip the page rather than crash.

use super::error::{RedactError, RedactResult};
use super::parser::{Dict, PdfObject};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Decodes a FlateDecode (zlib/deflate) compressed stream.
///
/// Tries zlib framing first, then raw deflate: some producers omit the
/// zlib header.
pub fn decode_flate(compressed: &[u8]) -> RedactResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(zlib_err) => {
            use flate2::read::DeflateDecoder;
            out.clear();
            let mut raw = DeflateDecoder::new(compressed);
            match raw.read_to_end(&mut out) {
                Ok(_) => Ok(out),
                Err(deflate_err) => Err(RedactError::stream_error(format!(
                    "FlateDecode failed: zlib ({}), raw deflate ({})",
                    zlib_err, deflate_err
                ))),
            }
        }
    }
}

/// Decodes an LZWDecode stream.
///
/// `early_change` is the PDF /EarlyChange parameter (default 1): whether
/// the code width switches one code early, as in TIFF.
pub fn decode_lzw(compressed: &[u8], early_change: bool) -> RedactResult<Vec<u8>> {
    let mut decoder = if early_change {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    } else {
        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
    };
    let mut out = Vec::new();
    let result = decoder.into_stream(&mut out).decode_all(compressed);
    match result.status {
        Ok(_) => Ok(out),
        Err(e) => Err(RedactError::stream_error(format!("LZWDecode failed: {}", e))),
    }
}

/// Decodes an ASCII85Decode stream.
pub fn decode_ascii85(data: &[u8]) -> RedactResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut group = [0u32; 5];
    let mut count = 0usize;
    let mut i = 0usize;

    // Optional <~ prefix
    if data.len() >= 2 && &data[0..2] == b"<~" {
        i = 2;
    }

    while i < data.len() {
        let b = data[i];
        i += 1;
        match b {
            b'~' => break, // ~> terminator
            b'z' if count == 0 => {
                out.extend_from_slice(&[0, 0, 0, 0]);
            }
            b'!'..=b'u' => {
                group[count] = (b - b'!') as u32;
                count += 1;
                if count == 5 {
                    let mut value = 0u32;
                    for &digit in &group {
                        value = value
                            .checked_mul(85)
                            .and_then(|v| v.checked_add(digit))
                            .ok_or_else(|| {
                                RedactError::stream_error("ASCII85 group overflow")
                            })?;
                    }
                    out.extend_from_slice(&value.to_be_bytes());
                    count = 0;
                }
            }
            c if c.is_ascii_whitespace() || c == 0 => {}
            other => {
                return Err(RedactError::stream_error(format!(
                    "invalid ASCII85 byte 0x{:02X}",
                    other
                )));
            }
        }
    }

    // Partial final group: pad with 'u' and keep count-1 bytes
    if count > 0 {
        if count == 1 {
            return Err(RedactError::stream_error("truncated ASCII85 group"));
        }
        let mut value = 0u32;
        for idx in 0..5 {
            let digit = if idx < count { group[idx] } else { 84 };
            value = value
                .checked_mul(85)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| RedactError::stream_error("ASCII85 group overflow"))?;
        }
        let bytes = value.to_be_bytes();
        out.extend_from_slice(&bytes[..count - 1]);
    }

    Ok(out)
}

/// Decodes an ASCIIHexDecode stream.
pub fn decode_ascii_hex(data: &[u8]) -> RedactResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut high: Option<u8> = None;
    for &b in data {
        match b {
            b'>' => break,
            c if (c as char).is_ascii_hexdigit() => {
                // The guard guarantees the digit parses
                let digit = (c as char).to_digit(16).unwrap_or(0) as u8;
                match high.take() {
                    Some(h) => out.push((h << 4) | digit),
                    None => high = Some(digit),
                }
            }
            c if c.is_ascii_whitespace() || c == 0 => {}
            other => {
                return Err(RedactError::stream_error(format!(
                    "invalid ASCIIHex byte 0x{:02X}",
                    other
                )));
            }
        }
    }
    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

/// Reverses PNG row prediction (DecodeParms /Predictor >= 10).
pub fn decode_png_predictor(
    data: &[u8],
    colors: usize,
    bits_per_component: usize,
    columns: usize,
) -> RedactResult<Vec<u8>> {
    let bpp = ((colors * bits_per_component) as f64 / 8.0).ceil().max(1.0) as usize;
    let row_len = (columns * colors * bits_per_component).div_ceil(8);
    let stride = row_len + 1; // one predictor tag byte per row
    if stride == 1 {
        return Err(RedactError::stream_error("PNG predictor with zero columns"));
    }

    let mut out = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_len];
    let mut offset = 0;

    while offset + 1 <= data.len() {
        let tag = data[offset];
        let row_end = (offset + stride).min(data.len());
        let row = &data[offset + 1..row_end];
        let mut decoded = row.to_vec();

        match tag {
            0 => {}
            1 => {
                for i in bpp..decoded.len() {
                    decoded[i] = decoded[i].wrapping_add(decoded[i - bpp]);
                }
            }
            2 => {
                for i in 0..decoded.len() {
                    decoded[i] = decoded[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                for i in 0..decoded.len() {
                    let left = if i >= bpp { decoded[i - bpp] as u16 } else { 0 };
                    let up = prev_row[i] as u16;
                    decoded[i] = decoded[i].wrapping_add(((left + up) / 2) as u8);
                }
            }
            4 => {
                for i in 0..decoded.len() {
                    let left = if i >= bpp { decoded[i - bpp] as i16 } else { 0 };
                    let up = prev_row[i] as i16;
                    let up_left = if i >= bpp { prev_row[i - bpp] as i16 } else { 0 };
                    let p = left + up - up_left;
                    let pa = (p - left).abs();
                    let pb = (p - up).abs();
                    let pc = (p - up_left).abs();
                    let predictor = if pa <= pb && pa <= pc {
                        left
                    } else if pb <= pc {
                        up
                    } else {
                        up_left
                    };
                    decoded[i] = decoded[i].wrapping_add(predictor as u8);
                }
            }
            other => {
                return Err(RedactError::stream_error(format!(
                    "unknown PNG predictor tag {}",
                    other
                )));
            }
        }

        out.extend_from_slice(&decoded);
        prev_row.clear();
        prev_row.extend_from_slice(&decoded);
        prev_row.resize(row_len, 0);
        offset += stride;
    }

    Ok(out)
}

fn predictor_pass(data: Vec<u8>, parms: Option<&Dict>) -> RedactResult<Vec<u8>> {
    let Some(parms) = parms else {
        return Ok(data);
    };
    let predictor = parms
        .get("Predictor")
        .and_then(PdfObject::as_integer)
        .unwrap_or(1);
    if predictor < 10 {
        // 1 = none, 2 = TIFF (not produced by the encoders we accept)
        return Ok(data);
    }
    let colors = parms
        .get("Colors")
        .and_then(PdfObject::as_integer)
        .unwrap_or(1) as usize;
    let bpc = parms
        .get("BitsPerComponent")
        .and_then(PdfObject::as_integer)
        .unwrap_or(8) as usize;
    let columns = parms
        .get("Columns")
        .and_then(PdfObject::as_integer)
        .unwrap_or(1) as usize;
    decode_png_predictor(&data, colors, bpc, columns)
}

fn apply_filter(data: Vec<u8>, name: &str, parms: Option<&Dict>) -> RedactResult<Vec<u8>> {
    match name {
        "FlateDecode" | "Fl" => predictor_pass(decode_flate(&data)?, parms),
        "LZWDecode" | "LZW" => {
            let early = parms
                .and_then(|p| p.get("EarlyChange"))
                .and_then(PdfObject::as_integer)
                .unwrap_or(1)
                != 0;
            predictor_pass(decode_lzw(&data, early)?, parms)
        }
        "ASCII85Decode" | "A85" => decode_ascii85(&data),
        "ASCIIHexDecode" | "AHx" => decode_ascii_hex(&data),
        other => Err(RedactError::Unsupported {
            feature: format!("stream filter /{}", other),
        }),
    }
}

/// Decodes a stream's raw bytes according to its /Filter and /DecodeParms.
///
/// Filter chains are applied left to right; /DecodeParms may be a single
/// dictionary or an array parallel to the filter array.
pub fn decode_stream_dict(dict: &Dict, raw: &[u8]) -> RedactResult<Vec<u8>> {
    let filter = match dict.get("Filter") {
        None => return Ok(raw.to_vec()),
        Some(f) => f,
    };
    let parms_obj = dict.get("DecodeParms").or_else(|| dict.get("DP"));

    let filters: Vec<&str> = match filter {
        PdfObject::Name(n) => vec![n.as_str()],
        PdfObject::Array(items) => items.iter().filter_map(PdfObject::as_name).collect(),
        _ => {
            return Err(RedactError::stream_error("malformed /Filter entry"));
        }
    };

    let parms_for = |i: usize| -> Option<&Dict> {
        match parms_obj {
            Some(PdfObject::Dictionary(d)) if i == 0 => Some(d),
            Some(PdfObject::Array(items)) => items.get(i).and_then(PdfObject::as_dict),
            _ => None,
        }
    };

    let mut data = raw.to_vec();
    for (i, name) in filters.iter().enumerate() {
        data = apply_filter(data, name, parms_for(i))?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flate_compress(data: &[u8]) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_flate_roundtrip() {
        let original = b"Hello, PDF world! This is test data.";
        let compressed = flate_compress(original);
        assert_eq!(decode_flate(&compressed).unwrap(), original);
    }

    #[test]
    fn test_lzw_roundtrip() {
        let original = b"ababababababababab lzw lzw lzw";
        let mut encoder =
            weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
        let compressed = encoder.encode(original).unwrap();
        assert_eq!(decode_lzw(&compressed, true).unwrap(), original);
    }

    #[test]
    fn test_ascii_hex() {
        assert_eq!(decode_ascii_hex(b"48 65 6C 6C 6F>").unwrap(), b"Hello");
        // Odd digit count pads with zero
        assert_eq!(decode_ascii_hex(b"7>").unwrap(), vec![0x70]);
    }

    #[test]
    fn test_ascii85() {
        // "Man " encodes to 9jqo^ in ASCII85
        assert_eq!(decode_ascii85(b"9jqo^~>").unwrap(), b"Man ");
        // z shortcut for four zero bytes
        assert_eq!(decode_ascii85(b"z~>").unwrap(), vec![0, 0, 0, 0]);
        // Partial group
        assert_eq!(decode_ascii85(b"9jqo~>").unwrap(), b"Man");
    }

    #[test]
    fn test_png_predictor_up() {
        // Two rows of 3 bytes, predictor 2 (Up)
        let data = vec![
            2, 10, 20, 30, // row 0: up from zeros
            2, 1, 1, 1, // row 1: up from row 0
        ];
        let out = decode_png_predictor(&data, 1, 8, 3).unwrap();
        assert_eq!(hex::encode(&out), "0a141e0b151f");
    }

    #[test]
    fn test_decode_stream_dict_chain() {
        let original = b"stream payload";
        let compressed = flate_compress(original);
        let mut dict = Dict::default();
        dict.insert(
            "Filter".to_string(),
            PdfObject::Name("FlateDecode".to_string()),
        );
        assert_eq!(decode_stream_dict(&dict, &compressed).unwrap(), original);
    }

    #[test]
    fn test_decode_stream_dict_no_filter() {
        let dict = Dict::default();
        assert_eq!(decode_stream_dict(&dict, b"raw").unwrap(), b"raw");
    }

    #[test]
    fn test_unsupported_filter() {
        let mut dict = Dict::default();
        dict.insert(
            "Filter".to_string(),
            PdfObject::Name("JBIG2Decode".to_string()),
        );
        assert!(matches!(
            decode_stream_dict(&dict, b"x"),
            Err(RedactError::Unsupported { .. })
        ));
    }
}
