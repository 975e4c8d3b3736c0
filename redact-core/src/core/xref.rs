//! Cross-reference table handling.
//!
//! Maps object numbers to their locations: classic `xref` tables with
//! `/Prev` chains, xref streams (PDF 1.5+), hybrid files (`/XRefStm`), and
//! object streams (`/ObjStm`). When the tail of the file is damaged a
//! bounded recovery scan rebuilds the table from `N G obj` headers.

use super::decode::decode_stream_dict;
use super::error::{RedactError, RedactResult};
use super::lexer::Lexer;
use super::parser::{find_keyword, Dict, ObjRef, Parser, PdfObject};
use super::stream::Stream;
use lru::LruCache;
use rustc_hash::{FxHashSet, FxHasher};
use std::hash::BuildHasherDefault;
use std::num::NonZeroUsize;
use std::rc::Rc;

/// How far from the end of the file `startxref` is searched for.
const STARTXREF_WINDOW: usize = 2048;

/// Bounded object cache size: enough for typical documents while keeping
/// memory predictable.
const OBJECT_CACHE_CAPACITY: usize = 1000;

/// Cross-reference table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free entry - object number is available for reuse
    Free { next_free: u64, generation: u32 },

    /// Object stored uncompressed at a byte offset
    Uncompressed { offset: u64, generation: u32 },

    /// Object stored inside an object stream
    Compressed { obj_stream_num: u32, index: u32 },
}

impl XRefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }
}

/// Cross-reference table plus object fetch for one document.
pub struct XRef {
    stream: Stream,
    entries: Vec<Option<XRefEntry>>,
    trailer: Dict,
    cache: LruCache<u32, Rc<PdfObject>, BuildHasherDefault<FxHasher>>,
}

impl XRef {
    /// Parses the cross-reference data of a whole file.
    pub fn parse(stream: Stream) -> RedactResult<Self> {
        let mut xref = XRef {
            stream,
            entries: Vec::new(),
            trailer: Dict::default(),
            cache: LruCache::with_hasher(
                NonZeroUsize::new(OBJECT_CACHE_CAPACITY).unwrap(),
                BuildHasherDefault::<FxHasher>::default(),
            ),
        };

        match xref.parse_chain() {
            Ok(()) if xref.trailer.contains_key("Root") => Ok(xref),
            _ => {
                xref.entries.clear();
                xref.trailer.clear();
                xref.recover_by_scan()?;
                Ok(xref)
            }
        }
    }

    fn parse_chain(&mut self) -> RedactResult<()> {
        let start = self.find_startxref()?;
        let mut queue = vec![start];
        let mut seen: FxHashSet<usize> = FxHashSet::default();

        while let Some(offset) = queue.pop() {
            if !seen.insert(offset) {
                continue;
            }
            let section = self.parse_section(offset)?;
            if self.trailer.is_empty() {
                self.trailer = section.trailer.clone();
            }
            if let Some(prev) = section.prev {
                queue.push(prev);
            }
            if let Some(stm) = section.xref_stm {
                queue.push(stm);
            }
        }
        Ok(())
    }

    fn find_startxref(&self) -> RedactResult<usize> {
        let bytes = self.stream.bytes();
        let tail_begin = bytes.len().saturating_sub(STARTXREF_WINDOW);
        let tail = &bytes[tail_begin..];
        let mut found = None;
        let mut from = 0;
        while let Some(pos) = find_keyword(tail, from, b"startxref") {
            found = Some(tail_begin + pos);
            from = pos + 1;
        }
        let keyword_pos =
            found.ok_or_else(|| RedactError::xref_error("missing startxref"))?;
        let mut parser = Parser::at(self.stream.clone(), keyword_pos)?;
        parser.expect_command("startxref")?;
        let offset = parser.read_uint()? as usize;
        if offset >= bytes.len() {
            return Err(RedactError::xref_error("startxref points past end of file"));
        }
        Ok(offset)
    }

    fn parse_section(&mut self, offset: usize) -> RedactResult<Section> {
        let mut parser = Parser::at(self.stream.clone(), offset)?;
        if parser.take_command("xref") {
            self.parse_table(&mut parser)
        } else {
            self.parse_xref_stream(&mut parser)
        }
    }

    /// Classic `xref` table: subsections of `start count` followed by
    /// 20-byte entries, then `trailer << ... >>`.
    fn parse_table(&mut self, parser: &mut Parser) -> RedactResult<Section> {
        loop {
            if parser.take_command("trailer") {
                break;
            }
            let start = parser.read_uint()?;
            let count = parser.read_uint()?;
            for i in 0..count {
                let num = start + i;
                let field1 = parser.read_uint()? as u64;
                let field2 = parser.read_uint()?;
                let entry = if parser.take_command("n") {
                    XRefEntry::Uncompressed {
                        offset: field1,
                        generation: field2,
                    }
                } else if parser.take_command("f") {
                    XRefEntry::Free {
                        next_free: field1,
                        generation: field2,
                    }
                } else {
                    return Err(RedactError::xref_error(format!(
                        "bad xref entry type for object {}",
                        num
                    )));
                };
                self.set_entry(num, entry);
            }
        }

        let trailer_obj = parser.get_object()?;
        let trailer = match trailer_obj {
            PdfObject::Dictionary(d) => d,
            _ => return Err(RedactError::xref_error("trailer is not a dictionary")),
        };
        let prev = trailer
            .get("Prev")
            .and_then(PdfObject::as_integer)
            .map(|v| v as usize);
        let xref_stm = trailer
            .get("XRefStm")
            .and_then(PdfObject::as_integer)
            .map(|v| v as usize);
        Ok(Section {
            trailer,
            prev,
            xref_stm,
        })
    }

    /// XRef stream (PDF 1.5+): `N G obj << /Type /XRef /W ... >> stream`.
    fn parse_xref_stream(&mut self, parser: &mut Parser) -> RedactResult<Section> {
        let pos = parser.pos();
        let _num = parser.read_uint()?;
        let _generation = parser.read_uint()?;
        parser.expect_command("obj")?;
        let obj = parser.get_object()?;
        let dict = match obj {
            PdfObject::Dictionary(d) => d,
            _ => {
                return Err(RedactError::parse_failure(
                    pos,
                    "xref stream object is not a dictionary",
                ));
            }
        };
        if !parser.take_command("stream") {
            return Err(RedactError::parse_failure(pos, "xref stream has no payload"));
        }
        let length = dict
            .get("Length")
            .and_then(PdfObject::as_integer)
            .map(|v| v as usize);
        let raw = parser.read_stream_data(length)?;
        let data = decode_stream_dict(&dict, &raw)?;

        let w: Vec<usize> = dict
            .get("W")
            .and_then(PdfObject::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(PdfObject::as_integer)
                    .map(|v| v as usize)
                    .collect()
            })
            .unwrap_or_default();
        if w.len() < 3 {
            return Err(RedactError::xref_error("xref stream /W must have 3 fields"));
        }
        let size = dict
            .get("Size")
            .and_then(PdfObject::as_integer)
            .unwrap_or(0) as u32;
        let index: Vec<u32> = dict
            .get("Index")
            .and_then(PdfObject::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(PdfObject::as_integer)
                    .map(|v| v as u32)
                    .collect()
            })
            .unwrap_or_else(|| vec![0, size]);

        let row_len = w[0] + w[1] + w[2];
        if row_len == 0 {
            return Err(RedactError::xref_error("xref stream with zero-width rows"));
        }

        let mut cursor = 0usize;
        for pair in index.chunks(2) {
            if pair.len() < 2 {
                break;
            }
            let (start, count) = (pair[0], pair[1]);
            for i in 0..count {
                if cursor + row_len > data.len() {
                    break;
                }
                let row = &data[cursor..cursor + row_len];
                cursor += row_len;

                let read_field = |begin: usize, width: usize| -> u64 {
                    let mut value = 0u64;
                    for &b in &row[begin..begin + width] {
                        value = (value << 8) | b as u64;
                    }
                    value
                };
                // A zero-width type field defaults to type 1
                let entry_type = if w[0] == 0 { 1 } else { read_field(0, w[0]) };
                let f2 = read_field(w[0], w[1]);
                let f3 = read_field(w[0] + w[1], w[2]);

                let entry = match entry_type {
                    0 => XRefEntry::Free {
                        next_free: f2,
                        generation: f3 as u32,
                    },
                    1 => XRefEntry::Uncompressed {
                        offset: f2,
                        generation: f3 as u32,
                    },
                    2 => XRefEntry::Compressed {
                        obj_stream_num: f2 as u32,
                        index: f3 as u32,
                    },
                    _ => continue, // reserved types are ignored
                };
                self.set_entry(start + i, entry);
            }
        }

        let prev = dict
            .get("Prev")
            .and_then(PdfObject::as_integer)
            .map(|v| v as usize);
        Ok(Section {
            trailer: dict,
            prev,
            xref_stm: None,
        })
    }

    /// Records an entry unless a newer section already claimed the number.
    ///
    /// Hybrid-reference files list object-stream members as free in the
    /// classic table; the /XRefStm section may upgrade such a slot to a
    /// compressed entry.
    fn set_entry(&mut self, num: u32, entry: XRefEntry) {
        let idx = num as usize;
        if idx >= self.entries.len() {
            self.entries.resize(idx + 1, None);
        }
        match &self.entries[idx] {
            None => self.entries[idx] = Some(entry),
            Some(XRefEntry::Free { .. }) if matches!(entry, XRefEntry::Compressed { .. }) => {
                self.entries[idx] = Some(entry);
            }
            Some(_) => {}
        }
    }

    /// Rebuilds the table by scanning for `N G obj` headers.
    ///
    /// Later definitions of the same object number win, matching how
    /// readers treat appended updates.
    fn recover_by_scan(&mut self) -> RedactResult<()> {
        let backing = self.stream.backing();
        let bytes: &[u8] = backing.as_slice();
        let mut from = 0usize;
        while let Some(pos) = find_keyword(bytes, from, b"obj") {
            from = pos + 3;
            // `obj` must stand alone
            if pos + 3 < bytes.len() {
                let after = bytes[pos + 3];
                if !Lexer::is_whitespace(after as i32) && !Lexer::is_delimiter(after as i32) {
                    continue;
                }
            }
            if let Some((num, generation, header_start)) = parse_obj_header_backwards(bytes, pos) {
                let idx = num as usize;
                if idx >= self.entries.len() {
                    self.entries.resize(idx + 1, None);
                }
                self.entries[idx] = Some(XRefEntry::Uncompressed {
                    offset: header_start as u64,
                    generation,
                });
            }
        }

        if self.entries.is_empty() {
            return Err(RedactError::xref_error(
                "no indirect objects found during recovery scan",
            ));
        }

        // Use the last trailer dictionary if one survives
        let mut trailer_from = 0usize;
        let mut last_trailer = None;
        while let Some(pos) = find_keyword(bytes, trailer_from, b"trailer") {
            trailer_from = pos + 7;
            if let Ok(mut parser) = Parser::at(self.stream.clone(), pos + 7) {
                if let Ok(PdfObject::Dictionary(d)) = parser.get_object() {
                    last_trailer = Some(d);
                }
            }
        }
        if let Some(trailer) = last_trailer {
            self.trailer = trailer;
        }

        if !self.trailer.contains_key("Root") {
            // Find the catalog directly
            let numbers: Vec<u32> = (0..self.entries.len() as u32)
                .filter(|n| self.entries[*n as usize].is_some())
                .collect();
            for num in numbers {
                if let Ok(obj) = self.fetch(num, 0) {
                    if let Some(dict) = obj.as_dict() {
                        if dict.get("Type").and_then(PdfObject::as_name) == Some("Catalog") {
                            self.trailer.insert(
                                "Root".to_string(),
                                PdfObject::Ref(ObjRef { num, generation: 0 }),
                            );
                            break;
                        }
                    }
                }
            }
        }
        self.trailer.insert(
            "Size".to_string(),
            PdfObject::Number(self.entries.len() as f64),
        );
        if self.trailer.contains_key("Root") {
            Ok(())
        } else {
            Err(RedactError::xref_error("recovery scan found no catalog"))
        }
    }

    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Number of object slots (highest object number + 1).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, num: u32) -> Option<&XRefEntry> {
        self.entries.get(num as usize).and_then(|e| e.as_ref())
    }

    /// Fetches an indirect object by number.
    ///
    /// Missing and free entries yield `Null`, matching reader behavior.
    pub fn fetch(&mut self, num: u32, generation: u32) -> RedactResult<Rc<PdfObject>> {
        if let Some(cached) = self.cache.get(&num) {
            return Ok(Rc::clone(cached));
        }

        let entry = match self.entry(num) {
            Some(e) => e.clone(),
            None => return Ok(Rc::new(PdfObject::Null)),
        };

        let object = match entry {
            XRefEntry::Free { .. } => PdfObject::Null,
            XRefEntry::Uncompressed { offset, .. } => {
                self.fetch_uncompressed(num, generation, offset as usize)?
            }
            XRefEntry::Compressed {
                obj_stream_num,
                index,
            } => self.fetch_compressed(obj_stream_num, index)?,
        };

        let rc = Rc::new(object);
        self.cache.put(num, Rc::clone(&rc));
        Ok(rc)
    }

    /// Dereferences `obj` if it is a reference; clones otherwise.
    pub fn resolve(&mut self, obj: &PdfObject) -> RedactResult<PdfObject> {
        match obj {
            PdfObject::Ref(r) => Ok((*self.fetch(r.num, r.generation)?).clone()),
            other => Ok(other.clone()),
        }
    }

    /// Resolves `dict[key]`, following one level of indirection.
    pub fn resolve_dict_entry(&mut self, dict: &Dict, key: &str) -> RedactResult<PdfObject> {
        match dict.get(key) {
            Some(obj) => self.resolve(obj),
            None => Ok(PdfObject::Null),
        }
    }

    fn fetch_uncompressed(
        &mut self,
        num: u32,
        _generation: u32,
        offset: usize,
    ) -> RedactResult<PdfObject> {
        let mut parser = Parser::at(self.stream.clone(), offset)?;
        let header_num = parser.read_uint()?;
        let _header_generation = parser.read_uint()?;
        parser.expect_command("obj")?;
        if header_num != num {
            return Err(RedactError::xref_error(format!(
                "object header mismatch: wanted {}, found {}",
                num, header_num
            )));
        }
        let obj = parser.get_object()?;
        if !parser.take_command("stream") {
            return Ok(obj);
        }

        let dict = match obj {
            PdfObject::Dictionary(d) => d,
            other => {
                return Err(RedactError::InvalidObject {
                    expected: "stream dictionary".to_string(),
                    found: format!("{:?}", other),
                });
            }
        };
        let length = match dict.get("Length") {
            Some(PdfObject::Number(n)) => Some(*n as usize),
            Some(PdfObject::Ref(r)) => self
                .fetch(r.num, r.generation)?
                .as_integer()
                .map(|v| v as usize),
            _ => None,
        };
        let raw = parser.read_stream_data(length)?;
        Ok(PdfObject::Stream { dict, raw })
    }

    fn fetch_compressed(&mut self, obj_stream_num: u32, index: u32) -> RedactResult<PdfObject> {
        let container = self.fetch(obj_stream_num, 0)?;
        let (dict, raw) = match &*container {
            PdfObject::Stream { dict, raw } => (dict, raw),
            _ => {
                return Err(RedactError::xref_error(format!(
                    "object stream {} is not a stream",
                    obj_stream_num
                )));
            }
        };
        let n = dict.get("N").and_then(PdfObject::as_integer).unwrap_or(0) as usize;
        let first = dict
            .get("First")
            .and_then(PdfObject::as_integer)
            .unwrap_or(0) as usize;
        let data = decode_stream_dict(dict, raw)?;

        let mut header = Parser::new(Lexer::new(Stream::from_bytes(data.clone())));
        let mut offsets = Vec::with_capacity(n);
        for _ in 0..n {
            let obj_num = header.read_uint()?;
            let rel_offset = header.read_uint()? as usize;
            offsets.push((obj_num, rel_offset));
        }
        let (_, rel_offset) = *offsets.get(index as usize).ok_or_else(|| {
            RedactError::xref_error(format!(
                "object stream {} has no member {}",
                obj_stream_num, index
            ))
        })?;

        let mut parser = Parser::at(Stream::from_bytes(data), first + rel_offset)?;
        parser.get_object()
    }
}

struct Section {
    trailer: Dict,
    prev: Option<usize>,
    xref_stm: Option<usize>,
}

/// Walks backwards from an `obj` keyword to read `N G`, returning
/// `(num, generation, header_start)`.
fn parse_obj_header_backwards(bytes: &[u8], obj_pos: usize) -> Option<(u32, u32, usize)> {
    let mut i = obj_pos;
    let skip_ws_back = |i: &mut usize| {
        while *i > 0 && Lexer::is_whitespace(bytes[*i - 1] as i32) {
            *i -= 1;
        }
    };
    let read_digits_back = |i: &mut usize| -> Option<(u64, usize)> {
        let end = *i;
        while *i > 0 && bytes[*i - 1].is_ascii_digit() {
            *i -= 1;
        }
        if *i == end {
            return None;
        }
        let text = std::str::from_utf8(&bytes[*i..end]).ok()?;
        Some((text.parse().ok()?, *i))
    };

    skip_ws_back(&mut i);
    let (generation, _) = read_digits_back(&mut i)?;
    skip_ws_back(&mut i);
    let (num, start) = read_digits_back(&mut i)?;
    // Header must start at the line start or after whitespace
    if start > 0 {
        let before = bytes[start - 1];
        if !Lexer::is_whitespace(before as i32) && !Lexer::is_delimiter(before as i32) {
            return None;
        }
    }
    if num > u32::MAX as u64 || generation > u32::MAX as u64 {
        return None;
    }
    Some((num as u32, generation as u32, start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_pdf() -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let obj1_offset = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2_offset = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref_offset = pdf.len();
        pdf.extend_from_slice(b"xref\n0 3\n");
        pdf.extend_from_slice(b"0000000000 65535 f \n");
        pdf.extend_from_slice(format!("{:010} 00000 n \n", obj1_offset).as_bytes());
        pdf.extend_from_slice(format!("{:010} 00000 n \n", obj2_offset).as_bytes());
        pdf.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
        pdf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        pdf
    }

    #[test]
    fn test_parse_classic_table() {
        let mut xref = XRef::parse(Stream::from_bytes(simple_pdf())).unwrap();
        assert_eq!(xref.len(), 3);
        assert!(xref.entry(0).unwrap().is_free());

        let root = xref.trailer().get("Root").unwrap().as_ref().unwrap();
        let catalog = xref.fetch(root.num, root.generation).unwrap();
        let dict = catalog.as_dict().unwrap();
        assert_eq!(dict.get("Type").unwrap().as_name(), Some("Catalog"));
    }

    #[test]
    fn test_fetch_caches() {
        let mut xref = XRef::parse(Stream::from_bytes(simple_pdf())).unwrap();
        let a = xref.fetch(1, 0).unwrap();
        let b = xref.fetch(1, 0).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_recovery_scan_when_tail_damaged() {
        let mut pdf = simple_pdf();
        // Destroy the startxref offset
        let len = pdf.len();
        pdf.truncate(len - 30);
        pdf.extend_from_slice(b"startxref\n999999\n%%EOF\n");

        let mut xref = XRef::parse(Stream::from_bytes(pdf)).unwrap();
        let root = xref.trailer().get("Root").unwrap().as_ref().unwrap();
        let catalog = xref.fetch(root.num, root.generation).unwrap();
        assert_eq!(
            catalog.as_dict().unwrap().get("Type").unwrap().as_name(),
            Some("Catalog")
        );
    }

    #[test]
    fn test_missing_object_is_null() {
        let mut xref = XRef::parse(Stream::from_bytes(simple_pdf())).unwrap();
        assert_eq!(*xref.fetch(99, 0).unwrap(), PdfObject::Null);
    }

    #[test]
    fn test_xref_stream() {
        // Build a minimal PDF 1.5 file with an xref stream
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.5\n");
        let obj1_offset = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2_offset = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref_offset = pdf.len();

        // W [1 4 1]; entries for objects 0..=3
        let mut rows: Vec<u8> = Vec::new();
        let mut push_row = |t: u8, f2: u32, f3: u8| {
            rows.push(t);
            rows.extend_from_slice(&f2.to_be_bytes());
            rows.push(f3);
        };
        push_row(0, 0, 255);
        push_row(1, obj1_offset as u32, 0);
        push_row(1, obj2_offset as u32, 0);
        push_row(1, xref_offset as u32, 0);

        pdf.extend_from_slice(
            format!(
                "3 0 obj\n<< /Type /XRef /Size 4 /W [1 4 1] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&rows);
        pdf.extend_from_slice(b"\nendstream\nendobj\n");
        pdf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        let mut xref = XRef::parse(Stream::from_bytes(pdf)).unwrap();
        assert_eq!(xref.len(), 4);
        let catalog = xref.fetch(1, 0).unwrap();
        assert_eq!(
            catalog.as_dict().unwrap().get("Type").unwrap().as_name(),
            Some("Catalog")
        );
    }
}
