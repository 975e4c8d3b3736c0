//! PDF object model and object parser.
//!
//! [`PdfObject`] is the full set of PDF primitives; [`Parser`] builds them
//! from lexer tokens. Indirect references (`N G R`) are recognized by
//! speculative lookahead with rewind, which keeps the lexer from ever
//! tokenizing the binary payload that follows a `stream` keyword.

use super::error::{RedactError, RedactResult};
use super::lexer::{Lexer, Token};
use super::stream::Stream;
use rustc_hash::FxHashMap;

/// Dictionary type used across the crate.
pub type Dict = FxHashMap<String, PdfObject>;

/// Indirect object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub num: u32,
    pub generation: u32,
}

/// PDF primitive objects.
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Null,
    Boolean(bool),
    /// Integers and reals
    Number(f64),
    /// Literal string bytes
    String(Vec<u8>),
    /// Hex string bytes
    HexString(Vec<u8>),
    Name(String),
    Array(Vec<PdfObject>),
    Dictionary(Dict),
    /// Stream object: dictionary plus raw (still encoded) data
    Stream { dict: Dict, raw: Vec<u8> },
    /// Indirect reference `N G R`
    Ref(ObjRef),
}

impl PdfObject {
    pub fn is_null(&self) -> bool {
        matches!(self, PdfObject::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PdfObject::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PdfObject::Number(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PdfObject::Name(n) => Some(n.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PdfObject]> {
        match self {
            PdfObject::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    /// Dictionary view: plain dictionaries and stream dictionaries both.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<ObjRef> {
        match self {
            PdfObject::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// String bytes from either string flavor.
    pub fn as_string_bytes(&self) -> Option<&[u8]> {
        match self {
            PdfObject::String(b) | PdfObject::HexString(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

/// Fetches `dict[key]`, returning `None` for absent keys.
pub fn dict_get<'a>(dict: &'a Dict, key: &str) -> Option<&'a PdfObject> {
    dict.get(key)
}

/// PDF object parser with rewindable lookahead.
pub struct Parser {
    lexer: Lexer,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Self {
        Parser { lexer }
    }

    /// Builds a parser over a stream positioned at `offset`.
    pub fn at(stream: Stream, offset: usize) -> RedactResult<Self> {
        let mut lexer = Lexer::new(stream);
        lexer.seek(offset)?;
        Ok(Parser { lexer })
    }

    /// Byte offset of the next token.
    pub fn pos(&mut self) -> usize {
        self.lexer.skip_to_token()
    }

    pub fn lexer_mut(&mut self) -> &mut Lexer {
        &mut self.lexer
    }

    /// Parses the next object.
    pub fn get_object(&mut self) -> RedactResult<PdfObject> {
        let tok = self.lexer.get_token()?;
        self.object_from_token(tok)
    }

    fn object_from_token(&mut self, tok: Token) -> RedactResult<PdfObject> {
        match tok {
            Token::Null => Ok(PdfObject::Null),
            Token::Boolean(b) => Ok(PdfObject::Boolean(b)),
            Token::String(s) => Ok(PdfObject::String(s)),
            Token::HexString(s) => Ok(PdfObject::HexString(s)),
            Token::Name(n) => Ok(PdfObject::Name(n)),
            Token::ArrayStart => self.parse_array(),
            Token::DictStart => self.parse_dictionary(),
            Token::Number(n) => {
                if n >= 0.0 && n.fract() == 0.0 {
                    if let Some(generation) = self.try_reference_tail() {
                        return Ok(PdfObject::Ref(ObjRef {
                            num: n as u32,
                            generation,
                        }));
                    }
                }
                Ok(PdfObject::Number(n))
            }
            Token::Eof => Err(RedactError::UnexpectedEndOfStream),
            Token::ArrayEnd | Token::DictEnd => Err(RedactError::InvalidObject {
                expected: "object".to_string(),
                found: "closing delimiter".to_string(),
            }),
            Token::Command(cmd) => Err(RedactError::InvalidObject {
                expected: "object".to_string(),
                found: format!("keyword '{}'", cmd),
            }),
        }
    }

    /// After an integer, checks for `G R` completing an indirect reference.
    /// Rewinds on any mismatch.
    fn try_reference_tail(&mut self) -> Option<u32> {
        let save = self.lexer.pos();
        let second = self.lexer.get_token();
        if let Ok(Token::Number(g)) = second {
            if g >= 0.0 && g.fract() == 0.0 {
                let save2 = self.lexer.pos();
                if let Ok(Token::Command(cmd)) = self.lexer.get_token() {
                    if cmd == "R" {
                        return Some(g as u32);
                    }
                }
                let _ = self.lexer.seek(save2);
                let _ = self.lexer.seek(save);
                return None;
            }
        }
        let _ = self.lexer.seek(save);
        None
    }

    fn parse_array(&mut self) -> RedactResult<PdfObject> {
        let mut items = Vec::new();
        loop {
            let tok = self.lexer.get_token()?;
            match tok {
                Token::ArrayEnd => return Ok(PdfObject::Array(items)),
                Token::Eof => return Err(RedactError::UnexpectedEndOfStream),
                other => items.push(self.object_from_token(other)?),
            }
        }
    }

    fn parse_dictionary(&mut self) -> RedactResult<PdfObject> {
        let mut dict = Dict::default();
        loop {
            let tok = self.lexer.get_token()?;
            match tok {
                Token::DictEnd => return Ok(PdfObject::Dictionary(dict)),
                Token::Name(key) => {
                    let value = self.get_object()?;
                    dict.insert(key, value);
                }
                Token::Eof => return Err(RedactError::UnexpectedEndOfStream),
                other => {
                    // Keys must be names; skip one junk token and continue
                    let _ = other;
                }
            }
        }
    }

    /// If the next token is the given keyword, consumes it.
    pub fn take_command(&mut self, name: &str) -> bool {
        let save = self.lexer.pos();
        match self.lexer.get_token() {
            Ok(Token::Command(cmd)) if cmd == name => true,
            _ => {
                let _ = self.lexer.seek(save);
                false
            }
        }
    }

    /// Consumes the given keyword or fails.
    pub fn expect_command(&mut self, name: &str) -> RedactResult<()> {
        let pos = self.lexer.skip_to_token();
        if self.take_command(name) {
            Ok(())
        } else {
            Err(RedactError::parse_failure(
                pos,
                format!("expected keyword '{}'", name),
            ))
        }
    }

    /// Reads a non-negative integer token.
    pub fn read_uint(&mut self) -> RedactResult<u32> {
        let pos = self.lexer.skip_to_token();
        match self.lexer.get_token()? {
            Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as u32),
            other => Err(RedactError::parse_failure(
                pos,
                format!("expected unsigned integer, found {:?}", other),
            )),
        }
    }

    /// Reads the raw payload of a stream object.
    ///
    /// Must be called right after the `stream` keyword was consumed. When
    /// `length` is known the payload is sliced directly; otherwise (or when
    /// the `endstream` keyword is not where /Length says it should be) the
    /// payload is recovered by scanning for `endstream`.
    pub fn read_stream_data(&mut self, length: Option<usize>) -> RedactResult<Vec<u8>> {
        let bytes_len = self.lexer.bytes().len();
        // Skip the single EOL after the `stream` keyword
        let mut data_start = self.lexer.pos();
        {
            let bytes = self.lexer.bytes();
            if data_start < bytes.len() && bytes[data_start] == b'\r' {
                data_start += 1;
            }
            if data_start < bytes.len() && bytes[data_start] == b'\n' {
                data_start += 1;
            }
        }

        if let Some(len) = length {
            if data_start + len <= bytes_len {
                let raw = {
                    let bytes = self.lexer.bytes();
                    bytes[data_start..data_start + len].to_vec()
                };
                self.lexer.seek(data_start + len)?;
                if self.take_command("endstream") {
                    return Ok(raw);
                }
                // /Length lied; fall through to the scan
            }
        }

        let end = {
            let bytes = self.lexer.bytes();
            find_keyword(bytes, data_start, b"endstream").ok_or_else(|| {
                RedactError::parse_failure(data_start, "unterminated stream object")
            })?
        };
        let mut data_end = end;
        {
            let bytes = self.lexer.bytes();
            // Trim the EOL that separates data from `endstream`
            if data_end > data_start && bytes[data_end - 1] == b'\n' {
                data_end -= 1;
            }
            if data_end > data_start && bytes[data_end - 1] == b'\r' {
                data_end -= 1;
            }
        }
        let raw = self.lexer.bytes()[data_start..data_end].to_vec();
        self.lexer.seek(end + b"endstream".len())?;
        Ok(raw)
    }
}

/// Finds the next occurrence of `keyword` at or after `from`.
pub fn find_keyword(bytes: &[u8], from: usize, keyword: &[u8]) -> Option<usize> {
    if keyword.is_empty() || bytes.len() < keyword.len() {
        return None;
    }
    let mut i = from;
    while i + keyword.len() <= bytes.len() {
        if &bytes[i..i + keyword.len()] == keyword {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser_for(input: &[u8]) -> Parser {
        Parser::new(Lexer::new(Stream::from_bytes(input.to_vec())))
    }

    #[test]
    fn test_simple_objects() {
        let mut p = parser_for(b"null true 3.25 /Name (str) <414243>");
        assert_eq!(p.get_object().unwrap(), PdfObject::Null);
        assert_eq!(p.get_object().unwrap(), PdfObject::Boolean(true));
        assert_eq!(p.get_object().unwrap(), PdfObject::Number(3.25));
        assert_eq!(p.get_object().unwrap(), PdfObject::Name("Name".to_string()));
        assert_eq!(p.get_object().unwrap(), PdfObject::String(b"str".to_vec()));
        assert_eq!(
            p.get_object().unwrap(),
            PdfObject::HexString(b"ABC".to_vec())
        );
    }

    #[test]
    fn test_array() {
        let mut p = parser_for(b"[1 2 [3 /X] (s)]");
        let obj = p.get_object().unwrap();
        let arr = obj.as_array().unwrap();
        assert_eq!(arr.len(), 4);
        assert_eq!(arr[2].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_dictionary() {
        let mut p = parser_for(b"<< /Type /Page /Count 3 /Kids [4 0 R] >>");
        let obj = p.get_object().unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Type").unwrap().as_name(), Some("Page"));
        assert_eq!(dict.get("Count").unwrap().as_integer(), Some(3));
        let kids = dict.get("Kids").unwrap().as_array().unwrap();
        assert_eq!(
            kids[0].as_ref(),
            Some(ObjRef {
                num: 4,
                generation: 0
            })
        );
    }

    #[test]
    fn test_indirect_reference_lookahead() {
        let mut p = parser_for(b"12 0 R 5 7");
        assert_eq!(
            p.get_object().unwrap(),
            PdfObject::Ref(ObjRef {
                num: 12,
                generation: 0
            })
        );
        // "5 7" must stay two separate numbers
        assert_eq!(p.get_object().unwrap(), PdfObject::Number(5.0));
        assert_eq!(p.get_object().unwrap(), PdfObject::Number(7.0));
    }

    #[test]
    fn test_object_header_reads() {
        let mut p = parser_for(b"12 0 obj << /A 1 >> endobj");
        assert_eq!(p.read_uint().unwrap(), 12);
        assert_eq!(p.read_uint().unwrap(), 0);
        p.expect_command("obj").unwrap();
        let obj = p.get_object().unwrap();
        assert!(obj.as_dict().is_some());
        assert!(p.take_command("endobj"));
    }

    #[test]
    fn test_stream_payload_with_length() {
        let body = b"<< /Length 5 >>\nstream\nHELLO\nendstream";
        let mut p = parser_for(body);
        let obj = p.get_object().unwrap();
        assert!(obj.as_dict().is_some());
        assert!(p.take_command("stream"));
        let raw = p.read_stream_data(Some(5)).unwrap();
        assert_eq!(raw, b"HELLO");
    }

    #[test]
    fn test_stream_payload_recovered_by_scan() {
        let body = b"<< /Length 99 >>\nstream\r\nDATA BYTES\nendstream";
        let mut p = parser_for(body);
        p.get_object().unwrap();
        assert!(p.take_command("stream"));
        let raw = p.read_stream_data(Some(99)).unwrap();
        assert_eq!(raw, b"DATA BYTES");
    }

    #[test]
    fn test_find_keyword() {
        assert_eq!(find_keyword(b"xx endstream", 0, b"endstream"), Some(3));
        assert_eq!(find_keyword(b"short", 0, b"endstream"), None);
    }
}
