//! Full-rewrite PDF writer.
//!
//! Redacted output must not contain the original bytes, so the writer
//! produces a complete document: every live object is re-serialized
//! (object streams and xref streams are dissolved - their members were
//! already fetched as direct objects), replaced content streams are
//! substituted, removed objects become free slots, and a classic xref
//! table plus trailer close the file.
//!
//! Output is byte-deterministic: objects are written in numeric order and
//! dictionary keys in lexicographic order.

use super::document::PdfDocument;
use super::error::RedactResult;
use super::parser::{ObjRef, PdfObject};
use crate::content::serializer::format_number;
use rustc_hash::{FxHashMap, FxHashSet};

/// Binary comment line marking the file as 8-bit data.
const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

/// Writes the document with `replacements` substituted and `removals`
/// freed. Returns the complete output bytes.
pub fn write_document(
    doc: &mut PdfDocument,
    replacements: &FxHashMap<u32, PdfObject>,
    removals: &FxHashSet<u32>,
) -> RedactResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("%PDF-{}\n", doc.version()).as_bytes());
    out.extend_from_slice(BINARY_MARKER);

    let mut size = doc.xref().len() as u32;
    for &num in replacements.keys() {
        size = size.max(num + 1);
    }
    size = size.max(1);

    let mut written: Vec<(u32, u32, u64)> = Vec::new(); // (num, generation, offset)

    for num in 1..size {
        if removals.contains(&num) {
            continue;
        }

        let (object, generation) = match replacements.get(&num) {
            Some(replacement) => (replacement.clone(), entry_generation(doc, num)),
            None => {
                let Some(entry) = doc.xref().entry(num) else {
                    continue;
                };
                if entry.is_free() {
                    continue;
                }
                let generation = entry_generation(doc, num);
                let Ok(fetched) = doc.xref_mut().fetch(num, generation) else {
                    continue;
                };
                let object = (*fetched).clone();
                if is_structural_stream(&object) || object.is_null() {
                    continue;
                }
                (object, generation)
            }
        };

        written.push((num, generation, out.len() as u64));
        out.extend_from_slice(format!("{} {} obj\n", num, generation).as_bytes());
        serialize_object(&object, &mut out);
        out.extend_from_slice(b"\nendobj\n");
    }

    // Classic xref table, one contiguous section
    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    let offsets: FxHashMap<u32, (u32, u64)> = written
        .iter()
        .map(|&(num, generation, offset)| (num, (generation, offset)))
        .collect();
    out.extend_from_slice(b"0000000000 65535 f \n");
    for num in 1..size {
        match offsets.get(&num) {
            Some(&(generation, offset)) => {
                out.extend_from_slice(
                    format!("{:010} {:05} n \n", offset, generation).as_bytes(),
                );
            }
            None => {
                out.extend_from_slice(b"0000000000 65535 f \n");
            }
        }
    }

    // Trailer: carry Root/Info/ID over, drop xref-stream bookkeeping
    let mut trailer: Vec<(String, PdfObject)> = doc
        .trailer()
        .iter()
        .filter(|(key, _)| {
            !matches!(
                key.as_str(),
                "Prev" | "XRefStm" | "Type" | "W" | "Index" | "Filter" | "DecodeParms"
                    | "Length" | "Size"
            )
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    trailer.push(("Size".to_string(), PdfObject::Number(size as f64)));
    trailer.sort_by(|a, b| a.0.cmp(&b.0));

    out.extend_from_slice(b"trailer\n<< ");
    for (key, value) in &trailer {
        write_name(key, &mut out);
        out.push(b' ');
        serialize_object(value, &mut out);
        out.push(b' ');
    }
    out.extend_from_slice(b">>\n");
    out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

    Ok(out)
}

fn entry_generation(doc: &PdfDocument, num: u32) -> u32 {
    match doc.xref().entry(num) {
        Some(super::xref::XRefEntry::Uncompressed { generation, .. }) => *generation,
        Some(super::xref::XRefEntry::Free { generation, .. }) => *generation,
        _ => 0,
    }
}

/// Object streams and xref streams must not survive a rewrite: their
/// members are written directly and the table replaces the stream.
fn is_structural_stream(object: &PdfObject) -> bool {
    matches!(
        object.as_dict().and_then(|d| d.get("Type")).and_then(PdfObject::as_name),
        Some("ObjStm") | Some("XRef")
    )
}

/// Serializes one object, dictionaries with sorted keys.
pub fn serialize_object(object: &PdfObject, out: &mut Vec<u8>) {
    match object {
        PdfObject::Null => out.extend_from_slice(b"null"),
        PdfObject::Boolean(true) => out.extend_from_slice(b"true"),
        PdfObject::Boolean(false) => out.extend_from_slice(b"false"),
        PdfObject::Number(n) => write_number(*n, out),
        PdfObject::String(bytes) => write_literal_string(bytes, out),
        PdfObject::HexString(bytes) => {
            out.push(b'<');
            for b in bytes {
                out.extend_from_slice(format!("{:02X}", b).as_bytes());
            }
            out.push(b'>');
        }
        PdfObject::Name(name) => write_name(name, out),
        PdfObject::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                serialize_object(item, out);
            }
            out.push(b']');
        }
        PdfObject::Dictionary(dict) => {
            write_dict_body(dict.iter(), out);
        }
        PdfObject::Stream { dict, raw } => {
            // /Length always reflects the actual payload
            let mut pairs: Vec<(String, PdfObject)> = dict
                .iter()
                .filter(|(k, _)| k.as_str() != "Length")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            pairs.push(("Length".to_string(), PdfObject::Number(raw.len() as f64)));
            write_dict_body(pairs.iter().map(|(k, v)| (k, v)), out);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(raw);
            out.extend_from_slice(b"\nendstream");
        }
        PdfObject::Ref(ObjRef { num, generation }) => {
            out.extend_from_slice(format!("{} {} R", num, generation).as_bytes());
        }
    }
}

fn write_dict_body<'a, I>(entries: I, out: &mut Vec<u8>)
where
    I: Iterator<Item = (&'a String, &'a PdfObject)>,
{
    let mut pairs: Vec<(&String, &PdfObject)> = entries.collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    out.extend_from_slice(b"<< ");
    for (key, value) in pairs {
        write_name(key, out);
        out.push(b' ');
        serialize_object(value, out);
        out.push(b' ');
    }
    out.extend_from_slice(b">>");
}

fn write_number(n: f64, out: &mut Vec<u8>) {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        out.extend_from_slice(format!("{}", n as i64).as_bytes());
    } else {
        out.extend_from_slice(format_number(n).as_bytes());
    }
}

fn write_name(name: &str, out: &mut Vec<u8>) {
    out.push(b'/');
    for &b in name.as_bytes() {
        let special = b"()<>[]{}/%#".contains(&b);
        if b <= b' ' || b > b'~' || special {
            out.extend_from_slice(format!("#{:02X}", b).as_bytes());
        } else {
            out.push(b);
        }
    }
}

fn write_literal_string(bytes: &[u8], out: &mut Vec<u8>) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' => out.extend_from_slice(b"\\("),
            b')' => out.extend_from_slice(b"\\)"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            other => out.push(other),
        }
    }
    out.push(b')');
}
