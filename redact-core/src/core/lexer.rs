//! PDF tokenizer.
//!
//! Turns a byte stream into tokens: numbers, literal and hex strings, names,
//! operator keywords and the array/dictionary delimiters. Used both for
//! file-level object parsing and for content-stream interpretation.
//!
//! The lexer keeps one character of lookahead and tracks the byte offset of
//! that character, so callers can record exact operand/operator spans and
//! re-emit kept operations verbatim.

use super::error::{RedactError, RedactResult};
use super::stream::Stream;

/// Tokens produced by [`Lexer::get_token`].
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of input
    Eof,
    /// Boolean keyword (`true` / `false`)
    Boolean(bool),
    /// `null` keyword
    Null,
    /// Numeric value (integers and reals)
    Number(f64),
    /// Literal string `( ... )`, unescaped bytes
    String(Vec<u8>),
    /// Hex string `< ... >`, decoded bytes
    HexString(Vec<u8>),
    /// Name `/Name`, decoded (`#xx` expanded)
    Name(String),
    /// Operator keyword (`q`, `BT`, `Tj`, `obj`, ...)
    Command(String),
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
}

const EOF_CHAR: i32 = -1;

/// PDF lexer over an in-memory [`Stream`].
pub struct Lexer {
    stream: Stream,
    /// One character of lookahead, -1 at end of input.
    current: i32,
    /// Offset of `current` relative to the stream view.
    cur_pos: usize,
    str_buf: Vec<u8>,
}

impl Lexer {
    pub fn new(mut stream: Stream) -> Self {
        let (current, cur_pos) = match stream.get_byte() {
            Ok(b) => (b as i32, 0),
            Err(_) => (EOF_CHAR, stream.len()),
        };
        Lexer {
            stream,
            current,
            cur_pos,
            str_buf: Vec::new(),
        }
    }

    fn next_char(&mut self) -> i32 {
        match self.stream.get_byte() {
            Ok(b) => {
                self.cur_pos += 1;
                self.current = b as i32;
            }
            Err(_) => {
                self.cur_pos = self.stream.len();
                self.current = EOF_CHAR;
            }
        }
        self.current
    }

    fn peek_char(&self) -> i32 {
        match self.stream.peek_byte() {
            Ok(b) => b as i32,
            Err(_) => EOF_CHAR,
        }
    }

    /// PDF whitespace: NUL, TAB, LF, FF, CR, SPACE.
    pub fn is_whitespace(ch: i32) -> bool {
        matches!(ch, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
    }

    /// PDF delimiters: ( ) < > [ ] { } / %
    pub fn is_delimiter(ch: i32) -> bool {
        matches!(
            ch,
            0x28 | 0x29 | 0x3C | 0x3E | 0x5B | 0x5D | 0x7B | 0x7D | 0x2F | 0x25
        )
    }

    fn is_special(ch: i32) -> bool {
        Self::is_whitespace(ch) || Self::is_delimiter(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        let mut comment = false;
        loop {
            let ch = self.current;
            if ch < 0 {
                break;
            }
            if comment {
                if ch == 0x0A || ch == 0x0D {
                    comment = false;
                }
            } else if ch == 0x25 {
                comment = true;
            } else if !Self::is_whitespace(ch) {
                break;
            }
            self.next_char();
        }
    }

    /// Skips whitespace and comments and returns the offset of the next
    /// token's first byte (or end of input).
    pub fn skip_to_token(&mut self) -> usize {
        self.skip_whitespace_and_comments();
        self.cur_pos
    }

    /// Offset of the lookahead character: one past the end of the most
    /// recently returned token.
    pub fn pos(&self) -> usize {
        self.cur_pos
    }

    /// Repositions the lexer at `pos` and refills the lookahead.
    pub fn seek(&mut self, pos: usize) -> RedactResult<()> {
        self.stream.set_pos(pos)?;
        self.cur_pos = pos;
        self.current = match self.stream.get_byte() {
            Ok(b) => b as i32,
            Err(_) => {
                self.cur_pos = self.stream.len();
                EOF_CHAR
            }
        };
        Ok(())
    }

    /// Reads `n` raw bytes starting at the lookahead character.
    pub fn read_raw(&mut self, n: usize) -> RedactResult<Vec<u8>> {
        let start = self.cur_pos;
        let bytes = self.stream.bytes();
        if start + n > bytes.len() {
            return Err(RedactError::UnexpectedEndOfStream);
        }
        let out = bytes[start..start + n].to_vec();
        self.seek(start + n)?;
        Ok(out)
    }

    /// The underlying byte slice (whole view, independent of the cursor).
    pub fn bytes(&self) -> &[u8] {
        self.stream.bytes()
    }

    /// Gets the next token.
    pub fn get_token(&mut self) -> RedactResult<Token> {
        self.skip_whitespace_and_comments();
        let ch = self.current;

        if ch < 0 {
            return Ok(Token::Eof);
        }

        match ch {
            // Numbers: 0-9, +, -, .
            0x30..=0x39 | 0x2B | 0x2D | 0x2E => self.get_number(),

            // Literal string
            0x28 => self.get_string(),

            // Name
            0x2F => self.get_name(),

            0x5B => {
                self.next_char();
                Ok(Token::ArrayStart)
            }
            0x5D => {
                self.next_char();
                Ok(Token::ArrayEnd)
            }

            // Hex string or dict start
            0x3C => {
                if self.next_char() == 0x3C {
                    self.next_char();
                    Ok(Token::DictStart)
                } else {
                    self.get_hex_string()
                }
            }

            0x3E => {
                if self.next_char() == 0x3E {
                    self.next_char();
                    Ok(Token::DictEnd)
                } else {
                    Err(RedactError::parse_failure(
                        self.cur_pos,
                        "lone '>' outside hex string",
                    ))
                }
            }

            // PostScript procedure braces show up in Type 4 functions;
            // surfaced as one-character commands.
            0x7B => {
                self.next_char();
                Ok(Token::Command("{".to_string()))
            }
            0x7D => {
                self.next_char();
                Ok(Token::Command("}".to_string()))
            }

            0x29 => {
                self.next_char();
                Err(RedactError::parse_failure(
                    self.cur_pos,
                    "unbalanced ')'",
                ))
            }

            _ => self.get_command(),
        }
    }

    fn get_number(&mut self) -> RedactResult<Token> {
        let mut buf = String::new();
        let mut ch = self.current;
        let mut seen_digit = false;
        let mut seen_dot = false;

        if ch == 0x2B || ch == 0x2D {
            if ch == 0x2D {
                buf.push('-');
            }
            ch = self.next_char();
            // Tolerate a doubled sign the way Adobe does
            if ch == 0x2D {
                ch = self.next_char();
            }
        }

        loop {
            match ch {
                0x30..=0x39 => {
                    seen_digit = true;
                    buf.push(ch as u8 as char);
                }
                0x2E if !seen_dot => {
                    seen_dot = true;
                    buf.push('.');
                }
                _ => break,
            }
            ch = self.next_char();
        }

        if !seen_digit {
            // Bare sign or dot followed by a delimiter: treat as zero,
            // consistent with Adobe Reader.
            if Self::is_special(ch) || ch < 0 {
                return Ok(Token::Number(0.0));
            }
            return Err(RedactError::parse_failure(
                self.cur_pos,
                format!("invalid number near byte value {}", ch),
            ));
        }

        if seen_dot && buf.ends_with('.') {
            buf.push('0');
        }
        let value: f64 = buf
            .parse()
            .map_err(|_| RedactError::parse_failure(self.cur_pos, "unparseable number"))?;
        Ok(Token::Number(value))
    }

    fn get_string(&mut self) -> RedactResult<Token> {
        let mut num_paren = 1;
        self.str_buf.clear();

        let mut ch = self.next_char(); // consume '('
        loop {
            match ch {
                EOF_CHAR => {
                    // Unterminated string: recover with what we have
                    break;
                }
                0x28 => {
                    num_paren += 1;
                    self.str_buf.push(b'(');
                    ch = self.next_char();
                }
                0x29 => {
                    num_paren -= 1;
                    if num_paren == 0 {
                        self.next_char();
                        break;
                    }
                    self.str_buf.push(b')');
                    ch = self.next_char();
                }
                0x5C => {
                    ch = self.next_char();
                    match ch {
                        EOF_CHAR => break,
                        0x6E => {
                            self.str_buf.push(b'\n');
                            ch = self.next_char();
                        }
                        0x72 => {
                            self.str_buf.push(b'\r');
                            ch = self.next_char();
                        }
                        0x74 => {
                            self.str_buf.push(b'\t');
                            ch = self.next_char();
                        }
                        0x62 => {
                            self.str_buf.push(0x08);
                            ch = self.next_char();
                        }
                        0x66 => {
                            self.str_buf.push(0x0C);
                            ch = self.next_char();
                        }
                        // Escaped line break: line continuation
                        0x0A => {
                            ch = self.next_char();
                        }
                        0x0D => {
                            ch = self.next_char();
                            if ch == 0x0A {
                                ch = self.next_char();
                            }
                        }
                        // Octal escape: up to three digits
                        0x30..=0x37 => {
                            let mut value = (ch - 0x30) as u32;
                            ch = self.next_char();
                            for _ in 0..2 {
                                if (0x30..=0x37).contains(&ch) {
                                    value = value * 8 + (ch - 0x30) as u32;
                                    ch = self.next_char();
                                } else {
                                    break;
                                }
                            }
                            self.str_buf.push((value & 0xFF) as u8);
                        }
                        other => {
                            self.str_buf.push(other as u8);
                            ch = self.next_char();
                        }
                    }
                }
                // Unescaped CR / CRLF normalize to LF
                0x0D => {
                    self.str_buf.push(b'\n');
                    ch = self.next_char();
                    if ch == 0x0A {
                        ch = self.next_char();
                    }
                }
                other => {
                    self.str_buf.push(other as u8);
                    ch = self.next_char();
                }
            }
        }

        Ok(Token::String(self.str_buf.clone()))
    }

    fn get_hex_string(&mut self) -> RedactResult<Token> {
        self.str_buf.clear();
        let mut digits: Vec<u8> = Vec::new();
        let mut ch = self.current;
        loop {
            match ch {
                EOF_CHAR => break,
                0x3E => {
                    self.next_char();
                    break;
                }
                c if Self::is_whitespace(c) => {
                    ch = self.next_char();
                }
                c => {
                    let hex = (c as u8 as char).to_digit(16);
                    match hex {
                        Some(d) => digits.push(d as u8),
                        None => {
                            // Skip garbage inside hex strings (lenient,
                            // like most readers)
                        }
                    }
                    ch = self.next_char();
                }
            }
        }
        // Odd digit count: final digit is the high nibble of a trailing 0
        if digits.len() % 2 == 1 {
            digits.push(0);
        }
        for pair in digits.chunks(2) {
            self.str_buf.push((pair[0] << 4) | pair[1]);
        }
        Ok(Token::HexString(self.str_buf.clone()))
    }

    fn get_name(&mut self) -> RedactResult<Token> {
        let mut name = Vec::new();
        let mut ch = self.next_char(); // consume '/'
        while ch >= 0 && !Self::is_special(ch) {
            if ch == 0x23 {
                // #xx hex escape
                let hi = self.next_char();
                let lo = self.peek_char();
                let hex = (hi as u8 as char)
                    .to_digit(16)
                    .zip((lo as u8 as char).to_digit(16));
                match hex {
                    Some((h, l)) => {
                        self.next_char(); // consume lo
                        name.push(((h << 4) | l) as u8);
                        ch = self.next_char();
                    }
                    None => {
                        // Not a valid escape: keep the '#' literally
                        name.push(b'#');
                        ch = hi;
                    }
                }
            } else {
                name.push(ch as u8);
                ch = self.next_char();
            }
        }
        Ok(Token::Name(String::from_utf8_lossy(&name).into_owned()))
    }

    fn get_command(&mut self) -> RedactResult<Token> {
        let mut cmd = String::new();
        let mut ch = self.current;
        while ch >= 0 && !Self::is_special(ch) {
            cmd.push(ch as u8 as char);
            ch = self.next_char();
        }
        if cmd.is_empty() {
            // A character we have no rule for; consume so we make progress.
            self.next_char();
            return Err(RedactError::parse_failure(
                self.cur_pos,
                format!("illegal character {}", ch),
            ));
        }
        Ok(match cmd.as_str() {
            "true" => Token::Boolean(true),
            "false" => Token::Boolean(false),
            "null" => Token::Null,
            _ => Token::Command(cmd),
        })
    }
}
