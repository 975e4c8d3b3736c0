//! Content-stream interpretation.
//!
//! A single forward pass over a page's operator sequence, producing the
//! typed [`Operation`] stream. Graphics state is tracked while parsing and
//! discarded afterwards: every paint-producing operation leaves here with
//! its device-space bounding box already computed.
//!
//! `Do` operators naming Form XObjects are resolved in place (C4): the
//! child stream is parsed under the composed matrix and its operations are
//! carried on the invocation, so a partially redacted form can later be
//! re-emitted inline.

use super::graphics_state::{Color, GraphicsStack};
use super::ops::*;
use crate::coords::{transform_rect, BBox, Matrix, PageGeometry, Rect};
use crate::core::decode::decode_stream_dict;
use crate::core::error::{RedactError, RedactResult};
use crate::core::font::Font;
use crate::core::lexer::{Lexer, Token};
use crate::core::parser::{Dict, ObjRef, PdfObject};
use crate::core::stream::Stream;
use crate::core::xref::XRef;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;

/// Default limit on nested Form XObjects.
pub const DEFAULT_XOBJECT_DEPTH: u32 = 16;

/// How many tokens past a candidate `EI` must lex cleanly before the
/// candidate is accepted.
const EI_VALIDATE_TOKENS: usize = 8;

/// Cancellation is polled roughly this often, in operations.
const CANCEL_POLL_INTERVAL: u64 = 1000;

/// Parser options.
#[derive(Debug, Clone)]
pub struct ContentParserOptions {
    pub max_xobject_depth: u32,
}

impl Default for ContentParserOptions {
    fn default() -> Self {
        ContentParserOptions {
            max_xobject_depth: DEFAULT_XOBJECT_DEPTH,
        }
    }
}

/// Anomalies recovered during parsing; reported, never fatal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseWarnings {
    pub lexical_errors: u32,
    /// Operand groups abandoned without an operator
    pub dropped_operators: u32,
    pub state_underflows: u32,
    pub unknown_fonts: Vec<String>,
}

/// Result of parsing one content stream.
#[derive(Debug, Clone)]
pub struct ParsedContent {
    pub ops: Vec<Operation>,
    pub warnings: ParseWarnings,
}

/// Parses a page's (already decoded and concatenated) content bytes.
pub fn parse_content(
    content: &[u8],
    resources: &Dict,
    page: &PageGeometry,
    xref: &mut XRef,
    options: &ContentParserOptions,
    cancel: Option<&dyn Fn() -> bool>,
) -> RedactResult<ParsedContent> {
    let mut interp = Interpreter {
        xref,
        options,
        cancel,
        ops_seen: 0,
        warnings: ParseWarnings::default(),
        font_cache: FxHashMap::default(),
    };
    let mut gs = GraphicsStack::new(page.base_matrix());
    let mut ops = Vec::new();
    let mut active: Vec<ObjRef> = Vec::new();
    interp.parse_stream(content, resources, &mut gs, 0, &mut active, &mut ops)?;
    interp.warnings.state_underflows = gs.underflows;
    Ok(ParsedContent {
        ops,
        warnings: interp.warnings,
    })
}

struct Interpreter<'a, 'b> {
    xref: &'a mut XRef,
    options: &'b ContentParserOptions,
    cancel: Option<&'b dyn Fn() -> bool>,
    ops_seen: u64,
    warnings: ParseWarnings,
    /// Fonts keyed by their indirect object id, shared across nesting
    font_cache: FxHashMap<ObjRef, Rc<Font>>,
}

impl Interpreter<'_, '_> {
    fn parse_stream(
        &mut self,
        content: &[u8],
        resources: &Dict,
        gs: &mut GraphicsStack,
        depth: u32,
        active: &mut Vec<ObjRef>,
        out: &mut Vec<Operation>,
    ) -> RedactResult<()> {
        let mut lexer = Lexer::new(Stream::from_bytes(content.to_vec()));
        let mut operands: SmallVec<[PdfObject; 8]> = SmallVec::new();
        let mut op_span_start: Option<usize> = None;

        // Path under construction
        let mut path: Vec<PathSeg> = Vec::new();
        let mut path_span_start: Option<usize> = None;
        let mut pending_clip: Option<ClipRule> = None;

        loop {
            let token_start = lexer.skip_to_token();
            let token = match lexer.get_token() {
                Ok(t) => t,
                Err(_) => {
                    // Lexical anomaly: count it, abandon pending operands,
                    // continue at the next token boundary.
                    self.warnings.lexical_errors += 1;
                    operands.clear();
                    op_span_start = None;
                    continue;
                }
            };

            match token {
                Token::Eof => {
                    if !operands.is_empty() {
                        self.warnings.dropped_operators += 1;
                    }
                    break;
                }
                Token::Command(cmd) => {
                    let span_start = op_span_start.take().unwrap_or(token_start);
                    self.ops_seen += 1;
                    if self.ops_seen % CANCEL_POLL_INTERVAL == 0 {
                        if let Some(cancel) = self.cancel {
                            if cancel() {
                                return Err(RedactError::Cancelled);
                            }
                        }
                    }
                    let ctx = OpContext {
                        content,
                        span_start,
                        resources,
                        depth,
                    };
                    self.dispatch(
                        &cmd,
                        &mut operands,
                        &mut lexer,
                        ctx,
                        gs,
                        &mut path,
                        &mut path_span_start,
                        &mut pending_clip,
                        active,
                        out,
                    )?;
                    operands.clear();
                }
                other => {
                    if op_span_start.is_none() {
                        op_span_start = Some(token_start);
                    }
                    match self.operand_from_token(other, &mut lexer) {
                        Ok(obj) => operands.push(obj),
                        Err(_) => {
                            self.warnings.lexical_errors += 1;
                            operands.clear();
                            op_span_start = None;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds an operand object; content streams have no indirect refs.
    fn operand_from_token(&mut self, token: Token, lexer: &mut Lexer) -> RedactResult<PdfObject> {
        match token {
            Token::Null => Ok(PdfObject::Null),
            Token::Boolean(b) => Ok(PdfObject::Boolean(b)),
            Token::Number(n) => Ok(PdfObject::Number(n)),
            Token::String(s) => Ok(PdfObject::String(s)),
            Token::HexString(s) => Ok(PdfObject::HexString(s)),
            Token::Name(n) => Ok(PdfObject::Name(n)),
            Token::ArrayStart => {
                let mut items = Vec::new();
                loop {
                    match lexer.get_token()? {
                        Token::ArrayEnd => break,
                        Token::Eof => return Err(RedactError::UnexpectedEndOfStream),
                        tok => items.push(self.operand_from_token(tok, lexer)?),
                    }
                }
                Ok(PdfObject::Array(items))
            }
            Token::DictStart => {
                let mut dict = Dict::default();
                loop {
                    match lexer.get_token()? {
                        Token::DictEnd => break,
                        Token::Name(key) => {
                            let tok = lexer.get_token()?;
                            let value = self.operand_from_token(tok, lexer)?;
                            dict.insert(key, value);
                        }
                        Token::Eof => return Err(RedactError::UnexpectedEndOfStream),
                        _ => {}
                    }
                }
                Ok(PdfObject::Dictionary(dict))
            }
            other => Err(RedactError::InvalidObject {
                expected: "operand".to_string(),
                found: format!("{:?}", other),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        cmd: &str,
        operands: &mut SmallVec<[PdfObject; 8]>,
        lexer: &mut Lexer,
        ctx: OpContext<'_>,
        gs: &mut GraphicsStack,
        path: &mut Vec<PathSeg>,
        path_span_start: &mut Option<usize>,
        pending_clip: &mut Option<ClipRule>,
        active: &mut Vec<ObjRef>,
        out: &mut Vec<Operation>,
    ) -> RedactResult<()> {
        let raw_to = |lexer: &Lexer, from: usize| ctx.content[from..lexer.pos()].to_vec();
        let nums = numeric_operands(operands);

        match cmd {
            // --- graphics state ---
            "q" => {
                gs.push();
                out.push(state_op(StateKind::Save, raw_to(lexer, ctx.span_start)));
            }
            "Q" => {
                gs.pop();
                out.push(state_op(StateKind::Restore, raw_to(lexer, ctx.span_start)));
            }
            "cm" => {
                if nums.len() >= 6 {
                    let m = Matrix([nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]]);
                    gs.current_mut().concat_ctm(&m);
                    out.push(state_op(
                        StateKind::Transform(m),
                        raw_to(lexer, ctx.span_start),
                    ));
                } else {
                    out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
                }
            }

            // --- text objects and positioning ---
            "BT" => {
                gs.current_mut().begin_text();
                out.push(state_op(StateKind::BeginText, raw_to(lexer, ctx.span_start)));
            }
            "ET" => {
                gs.current_mut().end_text();
                out.push(state_op(StateKind::EndText, raw_to(lexer, ctx.span_start)));
            }
            "Td" | "TD" => {
                let (tx, ty) = (num(&nums, 0), num(&nums, 1));
                if cmd == "TD" {
                    gs.current_mut().text.leading = -ty;
                }
                gs.current_mut().translate_text_line(tx, ty);
                out.push(state_op(
                    StateKind::MoveText {
                        tx,
                        ty,
                        set_leading: cmd == "TD",
                    },
                    raw_to(lexer, ctx.span_start),
                ));
            }
            "Tm" => {
                if nums.len() >= 6 {
                    let m = Matrix([nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]]);
                    gs.current_mut().set_text_matrix(m);
                    out.push(state_op(
                        StateKind::SetTextMatrix(m),
                        raw_to(lexer, ctx.span_start),
                    ));
                } else {
                    out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
                }
            }
            "T*" => {
                gs.current_mut().next_text_line();
                out.push(state_op(StateKind::NextLine, raw_to(lexer, ctx.span_start)));
            }
            "TL" => {
                gs.current_mut().text.leading = num(&nums, 0);
                out.push(state_op(
                    StateKind::SetLeading(num(&nums, 0)),
                    raw_to(lexer, ctx.span_start),
                ));
            }
            "Tf" => {
                let name = operands
                    .first()
                    .and_then(PdfObject::as_name)
                    .unwrap_or("")
                    .to_string();
                let size = num(&nums, 0);
                let font = self.load_font(ctx.resources, &name);
                let text = &mut gs.current_mut().text;
                text.font = Some(font);
                text.font_name = Some(name.clone());
                text.font_size = size;
                out.push(state_op(
                    StateKind::SetFont { name, size },
                    raw_to(lexer, ctx.span_start),
                ));
            }
            "Tc" => {
                gs.current_mut().text.char_spacing = num(&nums, 0);
                out.push(state_op(
                    StateKind::SetCharSpacing(num(&nums, 0)),
                    raw_to(lexer, ctx.span_start),
                ));
            }
            "Tw" => {
                gs.current_mut().text.word_spacing = num(&nums, 0);
                out.push(state_op(
                    StateKind::SetWordSpacing(num(&nums, 0)),
                    raw_to(lexer, ctx.span_start),
                ));
            }
            "Tz" => {
                gs.current_mut().text.horizontal_scale = num(&nums, 0);
                out.push(state_op(
                    StateKind::SetHScale(num(&nums, 0)),
                    raw_to(lexer, ctx.span_start),
                ));
            }
            "Ts" => {
                gs.current_mut().text.rise = num(&nums, 0);
                out.push(state_op(
                    StateKind::SetRise(num(&nums, 0)),
                    raw_to(lexer, ctx.span_start),
                ));
            }
            "Tr" => {
                gs.current_mut().text.render_mode = num(&nums, 0) as i32;
                out.push(state_op(
                    StateKind::SetRenderMode(num(&nums, 0) as i32),
                    raw_to(lexer, ctx.span_start),
                ));
            }

            // --- text showing ---
            "Tj" | "'" | "\"" => {
                let (string_idx, spacing_args) = if cmd == "\"" {
                    let aw = num(&nums, 0);
                    let ac = num(&nums, 1);
                    let text = &mut gs.current_mut().text;
                    text.word_spacing = aw;
                    text.char_spacing = ac;
                    (2, Some((aw, ac)))
                } else {
                    (0, None)
                };
                if cmd != "Tj" {
                    gs.current_mut().next_text_line();
                }
                let kind = match cmd {
                    "Tj" => TextShowKind::Tj,
                    "'" => TextShowKind::NextLineShow,
                    _ => TextShowKind::NextLineSetSpacingShow,
                };
                let items: Vec<TjItem> = operands
                    .get(string_idx)
                    .map(|obj| match obj {
                        PdfObject::String(b) => vec![TjItem::Text {
                            bytes: b.clone(),
                            hex: false,
                        }],
                        PdfObject::HexString(b) => vec![TjItem::Text {
                            bytes: b.clone(),
                            hex: true,
                        }],
                        _ => Vec::new(),
                    })
                    .unwrap_or_default();
                let op = self.build_text_show(kind, spacing_args, items, gs, raw_to(lexer, ctx.span_start));
                out.push(Operation::TextShow(op));
            }
            "TJ" => {
                let items: Vec<TjItem> = operands
                    .first()
                    .and_then(PdfObject::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|item| match item {
                                PdfObject::String(b) => Some(TjItem::Text {
                                    bytes: b.clone(),
                                    hex: false,
                                }),
                                PdfObject::HexString(b) => Some(TjItem::Text {
                                    bytes: b.clone(),
                                    hex: true,
                                }),
                                PdfObject::Number(n) => Some(TjItem::Adjust(*n)),
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let op = self.build_text_show(
                    TextShowKind::TJArray,
                    None,
                    items,
                    gs,
                    raw_to(lexer, ctx.span_start),
                );
                out.push(Operation::TextShow(op));
            }

            // --- path construction ---
            "m" | "l" | "c" | "v" | "y" | "re" | "h" => {
                if path.is_empty() && path_span_start.is_none() {
                    *path_span_start = Some(ctx.span_start);
                }
                match cmd {
                    "m" => path.push(PathSeg::MoveTo(num(&nums, 0), num(&nums, 1))),
                    "l" => path.push(PathSeg::LineTo(num(&nums, 0), num(&nums, 1))),
                    "c" => path.push(PathSeg::CurveTo(
                        num(&nums, 0),
                        num(&nums, 1),
                        num(&nums, 2),
                        num(&nums, 3),
                        num(&nums, 4),
                        num(&nums, 5),
                    )),
                    "v" => path.push(PathSeg::CurveV(
                        num(&nums, 0),
                        num(&nums, 1),
                        num(&nums, 2),
                        num(&nums, 3),
                    )),
                    "y" => path.push(PathSeg::CurveY(
                        num(&nums, 0),
                        num(&nums, 1),
                        num(&nums, 2),
                        num(&nums, 3),
                    )),
                    "re" => path.push(PathSeg::Rect(
                        num(&nums, 0),
                        num(&nums, 1),
                        num(&nums, 2),
                        num(&nums, 3),
                    )),
                    _ => path.push(PathSeg::Close),
                }
            }
            "W" => *pending_clip = Some(ClipRule::NonZero),
            "W*" => *pending_clip = Some(ClipRule::EvenOdd),

            // --- path painting ---
            "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" | "n" => {
                let paint = match cmd {
                    "S" | "s" => PaintMode::Stroke,
                    "f" | "F" | "f*" => PaintMode::Fill,
                    "n" => PaintMode::None,
                    _ => PaintMode::FillStroke,
                };
                let start = path_span_start.take().unwrap_or(ctx.span_start);
                let bbox = path_bbox(path, &gs.current().ctm);
                out.push(Operation::Path(PathPaintOp {
                    segments: std::mem::take(path),
                    paint,
                    clip: pending_clip.take(),
                    fill_color: gs.current().fill_color,
                    bbox,
                    raw: raw_to(lexer, start),
                }));
            }

            // --- color ---
            "g" => {
                gs.current_mut().fill_color = Color::Gray(num(&nums, 0));
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }
            "rg" => {
                gs.current_mut().fill_color =
                    Color::Rgb(num(&nums, 0), num(&nums, 1), num(&nums, 2));
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }
            "k" => {
                gs.current_mut().fill_color =
                    Color::Cmyk(num(&nums, 0), num(&nums, 1), num(&nums, 2), num(&nums, 3));
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }
            "sc" | "scn" => {
                // Interpret plain numeric components; patterns keep black
                match nums.len() {
                    1 => gs.current_mut().fill_color = Color::Gray(nums[0]),
                    3 => gs.current_mut().fill_color = Color::Rgb(nums[0], nums[1], nums[2]),
                    4 => {
                        gs.current_mut().fill_color =
                            Color::Cmyk(nums[0], nums[1], nums[2], nums[3])
                    }
                    _ => {}
                }
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }
            "G" => {
                gs.current_mut().stroke_color = Color::Gray(num(&nums, 0));
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }
            "RG" => {
                gs.current_mut().stroke_color =
                    Color::Rgb(num(&nums, 0), num(&nums, 1), num(&nums, 2));
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }
            "K" => {
                gs.current_mut().stroke_color =
                    Color::Cmyk(num(&nums, 0), num(&nums, 1), num(&nums, 2), num(&nums, 3));
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }

            // --- remaining state operators, preserved verbatim ---
            "w" | "J" | "j" | "M" | "d" | "ri" | "i" | "gs" | "cs" | "CS" | "SC" | "SCN"
            | "MP" | "DP" | "BMC" | "BDC" | "EMC" | "BX" | "EX" | "d0" | "d1" => {
                out.push(state_op(StateKind::Other, raw_to(lexer, ctx.span_start)));
            }

            // --- inline images ---
            "BI" => {
                let op = self.parse_inline_image(lexer, &ctx, gs)?;
                out.push(Operation::InlineImage(op));
            }

            // --- XObjects ---
            "Do" => {
                let name = operands
                    .first()
                    .and_then(PdfObject::as_name)
                    .unwrap_or("")
                    .to_string();
                let op = self.invoke_xobject(name, lexer, &ctx, gs, active)?;
                out.push(op);
            }

            // --- shading: paints the current clip region; geometry is
            // not derivable from the operand, keep it untouched ---
            "sh" => {
                out.push(Operation::Opaque(OpaqueOp {
                    raw: raw_to(lexer, ctx.span_start),
                    bbox: None,
                }));
            }

            // --- anything else is preserved verbatim ---
            _ => {
                out.push(Operation::Opaque(OpaqueOp {
                    raw: raw_to(lexer, ctx.span_start),
                    bbox: None,
                }));
            }
        }
        Ok(())
    }

    /// Builds a text-show operation, advancing the text matrix glyph by
    /// glyph and recording each glyph's geometry.
    fn build_text_show(
        &mut self,
        kind: TextShowKind,
        spacing_args: Option<(f64, f64)>,
        items: Vec<TjItem>,
        gs: &mut GraphicsStack,
        raw: Vec<u8>,
    ) -> TextShowOp {
        let font = gs
            .current()
            .text
            .font
            .clone()
            .unwrap_or_else(|| Rc::new(Font::fallback()));
        let font_name = gs
            .current()
            .text
            .font_name
            .clone()
            .unwrap_or_else(|| "".to_string());
        let font_size = gs.current().text.font_size;
        let tm_start = gs.current().text.matrix;

        let mut glyphs = Vec::new();
        let mut bbox = BBox::EMPTY;

        for (item_idx, item) in items.iter().enumerate() {
            match item {
                TjItem::Adjust(n) => {
                    let state = gs.current_mut();
                    let th = state.text.horizontal_scale / 100.0;
                    let tx = -n / 1000.0 * state.text.font_size * th;
                    state.advance_text(tx);
                }
                TjItem::Text { bytes, .. } => {
                    for code in font.decode(bytes) {
                        let state = gs.current();
                        let tm_before = state.text.matrix;
                        let trm = state.text_render_matrix();
                        let w0 = font.width_1000(code.code) / 1000.0;
                        let glyph_rect = Rect::new(
                            0.0,
                            font.descent / 1000.0,
                            w0.max(0.0),
                            (font.ascent - font.descent) / 1000.0,
                        );
                        let glyph_bbox = transform_rect(&trm, &glyph_rect);

                        let th = state.text.horizontal_scale / 100.0;
                        let mut advance = w0 * state.text.font_size + state.text.char_spacing;
                        if font.applies_word_spacing(&code) {
                            advance += state.text.word_spacing;
                        }
                        let advance = advance * th;

                        bbox = bbox.union(&glyph_bbox);
                        glyphs.push(Glyph {
                            code: code.code,
                            unicode: font.unicode(code.code),
                            bbox: glyph_bbox,
                            tm: tm_before,
                            advance,
                            item: item_idx,
                            byte_offset: code.offset,
                            byte_len: code.len,
                        });
                        gs.current_mut().advance_text(advance);
                    }
                }
            }
        }

        TextShowOp {
            kind,
            font_name,
            font_size,
            spacing_args,
            items,
            glyphs,
            bbox,
            tm_start,
            tm_end: gs.current().text.matrix,
            reliable_metrics: font.has_metrics,
            raw,
        }
    }

    /// `BI ... ID <data> EI`: captures the whole block opaquely.
    ///
    /// The end of the binary payload is found greedy-then-validate: the
    /// earliest delimited `EI` whose tail still lexes cleanly wins. An
    /// encoder that embeds such a sequence inside image data defeats this;
    /// a known limitation shared with every operator-level reader.
    fn parse_inline_image(
        &mut self,
        lexer: &mut Lexer,
        ctx: &OpContext<'_>,
        gs: &GraphicsStack,
    ) -> RedactResult<InlineImageOp> {
        // Key/value pairs up to ID
        loop {
            let pos = lexer.skip_to_token();
            match lexer.get_token() {
                Ok(Token::Command(cmd)) if cmd == "ID" => break,
                Ok(Token::Eof) => {
                    return Err(RedactError::parse_failure(pos, "BI without ID"));
                }
                Ok(_) => {}
                Err(_) => self.warnings.lexical_errors += 1,
            }
        }

        // Exactly one whitespace byte separates ID from the data
        let bytes = ctx.content;
        let mut data_start = lexer.pos();
        if data_start < bytes.len() && Lexer::is_whitespace(bytes[data_start] as i32) {
            data_start += 1;
        }

        let (_, end) = find_inline_image_end(bytes, data_start).ok_or_else(|| {
            RedactError::parse_failure(data_start, "inline image without EI")
        })?;
        lexer.seek(end)?;

        let bbox = transform_rect(&gs.current().ctm, &Rect::new(0.0, 0.0, 1.0, 1.0));
        Ok(InlineImageOp {
            bbox,
            raw: bytes[ctx.span_start..end].to_vec(),
        })
    }

    fn invoke_xobject(
        &mut self,
        name: String,
        lexer: &mut Lexer,
        ctx: &OpContext<'_>,
        gs: &mut GraphicsStack,
        active: &mut Vec<ObjRef>,
    ) -> RedactResult<Operation> {
        let raw = ctx.content[ctx.span_start..lexer.pos()].to_vec();

        // Resolve /XObject <name> from the resources in scope
        let xobjects = self.xref.resolve_dict_entry(ctx.resources, "XObject")?;
        let entry = xobjects.as_dict().and_then(|d| d.get(&name)).cloned();
        let Some(entry) = entry else {
            // Unknown name: nothing to bound, preserve the invocation
            return Ok(Operation::Opaque(OpaqueOp { raw, bbox: None }));
        };

        let object = entry.as_ref();
        let resolved = self.xref.resolve(&entry)?;
        let (dict, data) = match &resolved {
            PdfObject::Stream { dict, raw: stream_raw } => (dict.clone(), stream_raw.clone()),
            _ => return Ok(Operation::Opaque(OpaqueOp { raw, bbox: None })),
        };

        let subtype = dict.get("Subtype").and_then(PdfObject::as_name);
        match subtype {
            Some("Image") => {
                let bbox = transform_rect(&gs.current().ctm, &Rect::new(0.0, 0.0, 1.0, 1.0));
                Ok(Operation::XObject(XObjectOp {
                    name,
                    kind: XObjectKind::Image,
                    bbox,
                    object,
                    raw,
                }))
            }
            Some("Form") => {
                if ctx.depth + 1 > self.options.max_xobject_depth {
                    return Err(RedactError::XObjectRecursionLimit {
                        limit: self.options.max_xobject_depth,
                    });
                }
                if let Some(id) = object {
                    if active.contains(&id) {
                        return Err(RedactError::XObjectCycle { name });
                    }
                    active.push(id);
                }

                let matrix = dict
                    .get("Matrix")
                    .and_then(PdfObject::as_array)
                    .and_then(matrix_from_array)
                    .unwrap_or(Matrix::IDENTITY);

                gs.push();
                gs.current_mut().concat_ctm(&matrix);

                // The /BBox bounds everything the form can paint
                let form_bbox = dict
                    .get("BBox")
                    .and_then(PdfObject::as_array)
                    .and_then(rect_from_bbox_array)
                    .map(|r| transform_rect(&gs.current().ctm, &r));

                let child_resources = match self.xref.resolve_dict_entry(&dict, "Resources")? {
                    PdfObject::Dictionary(d) => d,
                    _ => ctx.resources.clone(),
                };
                let decoded = decode_stream_dict(&dict, &data)?;

                let mut children = Vec::new();
                let result = self.parse_stream(
                    &decoded,
                    &child_resources,
                    gs,
                    ctx.depth + 1,
                    active,
                    &mut children,
                );
                gs.pop();
                if object.is_some() {
                    active.pop();
                }
                result?;

                let bbox = match form_bbox {
                    Some(b) if b.is_finite() => b,
                    _ => children
                        .iter()
                        .filter_map(Operation::bbox)
                        .fold(BBox::EMPTY, |acc, b| acc.union(b)),
                };

                Ok(Operation::XObject(XObjectOp {
                    name,
                    kind: XObjectKind::Form {
                        matrix,
                        children,
                        resources: child_resources,
                    },
                    bbox,
                    object,
                    raw,
                }))
            }
            _ => Ok(Operation::Opaque(OpaqueOp { raw, bbox: None })),
        }
    }

    /// Loads a font by resource name, with fallback for unknown names.
    fn load_font(&mut self, resources: &Dict, name: &str) -> Rc<Font> {
        let fonts = match self.xref.resolve_dict_entry(resources, "Font") {
            Ok(PdfObject::Dictionary(d)) => d,
            _ => {
                self.note_unknown_font(name);
                return Rc::new(Font::fallback());
            }
        };
        let Some(entry) = fonts.get(name) else {
            self.note_unknown_font(name);
            return Rc::new(Font::fallback());
        };

        if let Some(id) = entry.as_ref() {
            if let Some(cached) = self.font_cache.get(&id) {
                return Rc::clone(cached);
            }
        }

        let resolved = match self.xref.resolve(entry) {
            Ok(obj) => obj,
            Err(_) => {
                self.note_unknown_font(name);
                return Rc::new(Font::fallback());
            }
        };
        let font = match resolved.as_dict() {
            Some(dict) => match Font::from_dict(dict, self.xref) {
                Ok(f) => Rc::new(f),
                Err(_) => {
                    self.note_unknown_font(name);
                    Rc::new(Font::fallback())
                }
            },
            None => {
                self.note_unknown_font(name);
                Rc::new(Font::fallback())
            }
        };
        if let Some(id) = entry.as_ref() {
            self.font_cache.insert(id, Rc::clone(&font));
        }
        font
    }

    fn note_unknown_font(&mut self, name: &str) {
        if !self.warnings.unknown_fonts.iter().any(|n| n == name) {
            self.warnings.unknown_fonts.push(name.to_string());
        }
    }
}

struct OpContext<'a> {
    content: &'a [u8],
    span_start: usize,
    resources: &'a Dict,
    depth: u32,
}

fn state_op(kind: StateKind, raw: Vec<u8>) -> Operation {
    Operation::State(StateOp { kind, raw })
}

fn numeric_operands(operands: &[PdfObject]) -> SmallVec<[f64; 8]> {
    operands
        .iter()
        .filter_map(PdfObject::as_number)
        .collect()
}

fn num(nums: &[f64], idx: usize) -> f64 {
    nums.get(idx).copied().unwrap_or(0.0)
}

fn matrix_from_array(arr: &[PdfObject]) -> Option<Matrix> {
    if arr.len() < 6 {
        return None;
    }
    let mut m = [0.0; 6];
    for (i, slot) in m.iter_mut().enumerate() {
        *slot = arr[i].as_number()?;
    }
    Some(Matrix(m))
}

fn rect_from_bbox_array(arr: &[PdfObject]) -> Option<Rect> {
    if arr.len() < 4 {
        return None;
    }
    let x0 = arr[0].as_number()?;
    let y0 = arr[1].as_number()?;
    let x1 = arr[2].as_number()?;
    let y1 = arr[3].as_number()?;
    Some(Rect::new(
        x0.min(x1),
        y0.min(y1),
        (x1 - x0).abs(),
        (y1 - y0).abs(),
    ))
}

/// Device-space bbox of a subpath under the CTM; control points are
/// included, which over-approximates curves safely.
fn path_bbox(path: &[PathSeg], ctm: &Matrix) -> BBox {
    let mut bbox = BBox::EMPTY;
    let mut add = |x: f64, y: f64| {
        let (dx, dy) = ctm.apply(x, y);
        if dx.is_finite() && dy.is_finite() {
            bbox.add_point(dx, dy);
        }
    };
    for seg in path {
        match *seg {
            PathSeg::MoveTo(x, y) | PathSeg::LineTo(x, y) => add(x, y),
            PathSeg::CurveTo(x1, y1, x2, y2, x3, y3) => {
                add(x1, y1);
                add(x2, y2);
                add(x3, y3);
            }
            PathSeg::CurveV(x2, y2, x3, y3) | PathSeg::CurveY(x2, y2, x3, y3) => {
                add(x2, y2);
                add(x3, y3);
            }
            PathSeg::Rect(x, y, w, h) => {
                add(x, y);
                add(x + w, y + h);
                add(x, y + h);
                add(x + w, y);
            }
            PathSeg::Close => {}
        }
    }
    bbox
}

/// Finds the end of inline-image data: the earliest standalone `EI` whose
/// tail lexes cleanly. Returns `(ei_index, end_after_ei)`.
fn find_inline_image_end(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 2 <= bytes.len() {
        if bytes[i] == b'E' && bytes[i + 1] == b'I' {
            let preceded_ok = i == from || i > 0 && Lexer::is_whitespace(bytes[i - 1] as i32);
            let followed_ok = i + 2 == bytes.len()
                || Lexer::is_whitespace(bytes[i + 2] as i32)
                || Lexer::is_delimiter(bytes[i + 2] as i32);
            if preceded_ok && followed_ok && tail_lexes_cleanly(&bytes[i + 2..]) {
                return Some((i, i + 2));
            }
        }
        i += 1;
    }
    None
}

fn tail_lexes_cleanly(tail: &[u8]) -> bool {
    let mut lexer = Lexer::new(Stream::from_bytes(tail.to_vec()));
    for _ in 0..EI_VALIDATE_TOKENS {
        match lexer.get_token() {
            Ok(Token::Eof) => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_page() -> PageGeometry {
        PageGeometry::new(0.0, 0.0, 612.0, 792.0, 0).unwrap()
    }

    fn test_xref() -> XRef {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let obj1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2 = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref_offset = pdf.len();
        pdf.extend_from_slice(b"xref\n0 3\n0000000000 65535 f \n");
        pdf.extend_from_slice(format!("{:010} 00000 n \n", obj1).as_bytes());
        pdf.extend_from_slice(format!("{:010} 00000 n \n", obj2).as_bytes());
        pdf.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
        pdf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        XRef::parse(Stream::from_bytes(pdf)).unwrap()
    }

    fn helvetica_resources() -> Dict {
        let mut font = Dict::default();
        font.insert("Type".to_string(), PdfObject::Name("Font".to_string()));
        font.insert("Subtype".to_string(), PdfObject::Name("Type1".to_string()));
        font.insert(
            "BaseFont".to_string(),
            PdfObject::Name("Helvetica".to_string()),
        );
        let mut fonts = Dict::default();
        fonts.insert("F1".to_string(), PdfObject::Dictionary(font));
        let mut resources = Dict::default();
        resources.insert("Font".to_string(), PdfObject::Dictionary(fonts));
        resources
    }

    fn parse(content: &str, resources: &Dict) -> ParsedContent {
        let mut xref = test_xref();
        parse_content(
            content.as_bytes(),
            resources,
            &test_page(),
            &mut xref,
            &ContentParserOptions::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_rect_fill_bbox_is_flipped_to_device() {
        let parsed = parse("72 100 100 50 re f", &Dict::default());
        assert_eq!(parsed.ops.len(), 1);
        let Operation::Path(op) = &parsed.ops[0] else {
            panic!("expected path op");
        };
        assert_eq!(op.paint, PaintMode::Fill);
        // User (72,100)-(172,150) maps to device y in [792-150, 792-100]
        assert!((op.bbox.x0 - 72.0).abs() < 1e-9);
        assert!((op.bbox.x1 - 172.0).abs() < 1e-9);
        assert!((op.bbox.y0 - 642.0).abs() < 1e-9);
        assert!((op.bbox.y1 - 692.0).abs() < 1e-9);
        assert_eq!(op.raw, b"72 100 100 50 re f");
    }

    #[test]
    fn test_state_ops_tracked_and_kept() {
        let parsed = parse("q 2 0 0 2 0 0 cm 10 10 5 5 re f Q", &Dict::default());
        assert_eq!(parsed.ops.len(), 4);
        assert!(matches!(
            &parsed.ops[0],
            Operation::State(StateOp {
                kind: StateKind::Save,
                ..
            })
        ));
        let Operation::Path(op) = &parsed.ops[2] else {
            panic!("expected path op");
        };
        // The 2x scale applies before the flip: (10,10)-(15,15) doubled
        assert!((op.bbox.x0 - 20.0).abs() < 1e-9);
        assert!((op.bbox.x1 - 30.0).abs() < 1e-9);
        assert!((op.bbox.y0 - (792.0 - 30.0)).abs() < 1e-9);
    }

    #[test]
    fn test_glyph_positions_for_simple_tj() {
        let resources = helvetica_resources();
        let parsed = parse("BT /F1 12 Tf 72 100 Td (AB) Tj ET", &resources);
        let Some(Operation::TextShow(op)) = parsed
            .ops
            .iter()
            .find(|op| matches!(op, Operation::TextShow(_)))
        else {
            panic!("expected text op");
        };
        assert_eq!(op.glyphs.len(), 2);
        assert!(op.reliable_metrics);
        // First glyph starts at user x=72; A is 667/1000 * 12 = 8.004 wide
        let a = &op.glyphs[0];
        assert!((a.bbox.x0 - 72.0).abs() < 1e-6);
        assert!((a.bbox.x1 - 80.004).abs() < 1e-6);
        // Baseline y=100: ascent 718 -> device y0 = 792 - (100 + 8.616)
        assert!((a.bbox.y0 - (792.0 - 100.0 - 0.718 * 12.0)).abs() < 1e-6);
        assert!((a.bbox.y1 - (792.0 - 100.0 + 0.207 * 12.0)).abs() < 1e-6);
        // Second glyph advanced by A's width
        let b = &op.glyphs[1];
        assert!((b.bbox.x0 - 80.004).abs() < 1e-6);
        assert_eq!(b.byte_offset, 1);
        assert_eq!(b.byte_len, 1);
    }

    #[test]
    fn test_tj_array_adjustment_moves_next_glyph() {
        let resources = helvetica_resources();
        let parsed = parse("BT /F1 10 Tf 0 0 Td [(A) -1000 (B)] TJ ET", &resources);
        let Some(Operation::TextShow(op)) = parsed
            .ops
            .iter()
            .find(|op| matches!(op, Operation::TextShow(_)))
        else {
            panic!("expected text op");
        };
        assert_eq!(op.glyphs.len(), 2);
        let a_end = op.glyphs[0].bbox.x1;
        let b_start = op.glyphs[1].bbox.x0;
        // -1000/1000 * 10 = 10pt extra gap
        assert!((b_start - a_end - 10.0).abs() < 1e-6);
        // Items preserved for slicing
        assert_eq!(op.items.len(), 3);
        assert_eq!(op.glyphs[1].item, 2);
    }

    #[test]
    fn test_word_spacing_applies_to_spaces() {
        let resources = helvetica_resources();
        let parsed = parse("BT /F1 10 Tf 5 Tw 0 0 Td (a a) Tj ET", &resources);
        let Some(Operation::TextShow(op)) = parsed
            .ops
            .iter()
            .find(|op| matches!(op, Operation::TextShow(_)))
        else {
            panic!("expected text op");
        };
        // space advance = 278/1000*10 + 5
        assert!((op.glyphs[1].advance - 7.78).abs() < 1e-9);
        assert!((op.glyphs[0].advance - 5.56).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_font_fallback_flagged() {
        let parsed = parse("BT /Nope 12 Tf (hi) Tj ET", &Dict::default());
        assert_eq!(parsed.warnings.unknown_fonts, vec!["Nope".to_string()]);
        let Some(Operation::TextShow(op)) = parsed
            .ops
            .iter()
            .find(|op| matches!(op, Operation::TextShow(_)))
        else {
            panic!("expected text op");
        };
        assert!(!op.reliable_metrics);
    }

    #[test]
    fn test_inline_image_captured_whole() {
        let content = "q 100 0 0 100 50 50 cm BI /W 2 /H 2 /BPC 8 /CS /G ID \x01\x02\x03\x04 EI Q";
        let parsed = parse(content, &Dict::default());
        let Some(Operation::InlineImage(op)) = parsed
            .ops
            .iter()
            .find(|op| matches!(op, Operation::InlineImage(_)))
        else {
            panic!("expected inline image");
        };
        assert!(op.raw.starts_with(b"BI"));
        assert!(op.raw.ends_with(b"EI"));
        // Unit square under cm: user (50,50)-(150,150) -> device flipped
        assert!((op.bbox.x0 - 50.0).abs() < 1e-9);
        assert!((op.bbox.x1 - 150.0).abs() < 1e-9);
        assert!((op.bbox.y0 - (792.0 - 150.0)).abs() < 1e-9);
        // The q/Q around it still arrive as state ops
        assert!(matches!(parsed.ops.last(), Some(Operation::State(_))));
    }

    #[test]
    fn test_unknown_operator_preserved_opaque() {
        let parsed = parse("1 2 3 zzz 10 10 5 5 re f", &Dict::default());
        let Operation::Opaque(op) = &parsed.ops[0] else {
            panic!("expected opaque op");
        };
        assert_eq!(op.raw, b"1 2 3 zzz");
        assert!(op.bbox.is_none());
        assert!(matches!(&parsed.ops[1], Operation::Path(_)));
    }

    #[test]
    fn test_q_underflow_reported() {
        let parsed = parse("Q Q q", &Dict::default());
        assert_eq!(parsed.warnings.state_underflows, 2);
        assert_eq!(parsed.ops.len(), 3);
    }

    #[test]
    fn test_form_xobject_flattened() {
        let mut xref = test_xref();
        // Form painting a rect at (10, 10)-(30, 20) in form space
        let mut form_dict = Dict::default();
        form_dict.insert("Type".to_string(), PdfObject::Name("XObject".to_string()));
        form_dict.insert("Subtype".to_string(), PdfObject::Name("Form".to_string()));
        form_dict.insert(
            "BBox".to_string(),
            PdfObject::Array(vec![
                PdfObject::Number(0.0),
                PdfObject::Number(0.0),
                PdfObject::Number(100.0),
                PdfObject::Number(100.0),
            ]),
        );
        let form = PdfObject::Stream {
            dict: form_dict,
            raw: b"10 10 20 10 re f".to_vec(),
        };
        let mut xobjects = Dict::default();
        xobjects.insert("Form1".to_string(), form);
        let mut resources = Dict::default();
        resources.insert("XObject".to_string(), PdfObject::Dictionary(xobjects));

        let parsed = parse_content(
            b"q 1 0 0 1 100 200 cm /Form1 Do Q",
            &resources,
            &test_page(),
            &mut xref,
            &ContentParserOptions::default(),
            None,
        )
        .unwrap();

        let Some(Operation::XObject(op)) = parsed
            .ops
            .iter()
            .find(|op| matches!(op, Operation::XObject(_)))
        else {
            panic!("expected xobject op");
        };
        let XObjectKind::Form { children, .. } = &op.kind else {
            panic!("expected form kind");
        };
        assert_eq!(children.len(), 1);
        let Operation::Path(child) = &children[0] else {
            panic!("expected child path");
        };
        // Child rect translated by the cm: user (110,210)-(130,220)
        assert!((child.bbox.x0 - 110.0).abs() < 1e-9);
        assert!((child.bbox.x1 - 130.0).abs() < 1e-9);
        assert!((child.bbox.y0 - (792.0 - 220.0)).abs() < 1e-9);
    }

    #[test]
    fn test_xobject_depth_limit() {
        let mut xref = test_xref();
        // A form that invokes itself by name, with itself in scope
        let mut form_dict = Dict::default();
        form_dict.insert("Subtype".to_string(), PdfObject::Name("Form".to_string()));
        let form = PdfObject::Stream {
            dict: form_dict,
            raw: b"/F Do".to_vec(),
        };
        let mut xobjects = Dict::default();
        xobjects.insert("F".to_string(), form);
        let mut resources = Dict::default();
        resources.insert("XObject".to_string(), PdfObject::Dictionary(xobjects));

        let err = parse_content(
            b"/F Do",
            &resources,
            &test_page(),
            &mut xref,
            &ContentParserOptions {
                max_xobject_depth: 4,
            },
            None,
        )
        .unwrap_err();
        assert_eq!(err, RedactError::XObjectRecursionLimit { limit: 4 });
    }

    #[test]
    fn test_ei_inside_data_skipped_when_tail_garbage() {
        // The first "EI" is followed by bytes that do not lex; the real
        // one terminates the image.
        let mut content = b"BI /W 1 /H 1 ID ".to_vec();
        content.extend_from_slice(b"\x00EI \x01)\x02\x03 ");
        content.extend_from_slice(b"EI\nq Q");
        let parsed = parse(std::str::from_utf8(&content).unwrap_or("BI ID  EI q Q"), &Dict::default());
        // Safer: drive the raw helper directly
        let (ei, _) = find_inline_image_end(&content, 16).unwrap();
        assert!(ei > 18, "must skip the embedded EI candidate");
        let _ = parsed;
    }

    #[test]
    fn test_cancellation() {
        let mut xref = test_xref();
        let content = "q Q ".repeat(2000);
        let cancel = || true;
        let err = parse_content(
            content.as_bytes(),
            &Dict::default(),
            &test_page(),
            &mut xref,
            &ContentParserOptions::default(),
            Some(&cancel),
        )
        .unwrap_err();
        assert_eq!(err, RedactError::Cancelled);
    }
}
