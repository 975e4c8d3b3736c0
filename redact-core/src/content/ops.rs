//! Typed content-stream operations.
//!
//! The parser turns the raw operator sequence into these variants; the
//! filter matches on them exhaustively and the serializer re-emits them.
//! Every paint-producing variant carries its device-space bounding box,
//! computed while the graphics state was live, so downstream stages never
//! need the state again. Adding an operator kind means adding a variant
//! here and handling it in both places.

use super::graphics_state::Color;
use crate::coords::{BBox, Matrix};
use crate::core::parser::ObjRef;

/// Path painting style chosen by the terminating operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintMode {
    /// `f` / `F` / `f*`
    Fill,
    /// `S` / `s`
    Stroke,
    /// `B` / `B*` / `b` / `b*`
    FillStroke,
    /// `n` - no painting (path used for clipping or discarded)
    None,
}

/// Clipping rule attached to a path by `W` / `W*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipRule {
    NonZero,
    EvenOdd,
}

/// One path segment, in content-stream user-space coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSeg {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    /// `c`: two control points and an endpoint
    CurveTo(f64, f64, f64, f64, f64, f64),
    /// `v`: current point doubles as the first control point
    CurveV(f64, f64, f64, f64),
    /// `y`: endpoint doubles as the second control point
    CurveY(f64, f64, f64, f64),
    Rect(f64, f64, f64, f64),
    Close,
}

/// State-only operators: always kept, re-emitted verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum StateKind {
    /// `q`
    Save,
    /// `Q`
    Restore,
    /// `BT`
    BeginText,
    /// `ET`
    EndText,
    /// `Td` / `TD`
    MoveText { tx: f64, ty: f64, set_leading: bool },
    /// `Tm`
    SetTextMatrix(Matrix),
    /// `T*`
    NextLine,
    /// `TL`
    SetLeading(f64),
    /// `Tf`
    SetFont { name: String, size: f64 },
    /// `Tc`
    SetCharSpacing(f64),
    /// `Tw`
    SetWordSpacing(f64),
    /// `Tz`
    SetHScale(f64),
    /// `Ts`
    SetRise(f64),
    /// `Tr`
    SetRenderMode(i32),
    /// `cm`
    Transform(Matrix),
    /// Colors, line parameters, rendering intent, marked content,
    /// compatibility sections - preserved without interpretation beyond
    /// what bbox computation needs.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateOp {
    pub kind: StateKind,
    /// Operand + operator bytes exactly as they appeared
    pub raw: Vec<u8>,
}

/// A completed path: construction segments plus the painting decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPaintOp {
    pub segments: Vec<PathSeg>,
    pub paint: PaintMode,
    pub clip: Option<ClipRule>,
    pub fill_color: Color,
    pub bbox: BBox,
    pub raw: Vec<u8>,
}

/// Which text-showing operator produced a [`TextShowOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextShowKind {
    /// `Tj`
    Tj,
    /// `TJ`
    TJArray,
    /// `'`
    NextLineShow,
    /// `"`
    NextLineSetSpacingShow,
}

/// One element of a `TJ` array (a plain `Tj` has a single `Text` item).
#[derive(Debug, Clone, PartialEq)]
pub enum TjItem {
    Text { bytes: Vec<u8>, hex: bool },
    /// Positioning adjustment in thousandths of text space
    Adjust(f64),
}

/// One positioned glyph.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    /// Character code (byte value or CID)
    pub code: u32,
    /// Best-effort unicode, for reports and extraction
    pub unicode: Option<char>,
    /// Device-space bounding box
    pub bbox: BBox,
    /// Text matrix in effect at this glyph's origin
    pub tm: Matrix,
    /// Baseline displacement this glyph applies to the text matrix
    /// (text-space units, spacing and horizontal scale included)
    pub advance: f64,
    /// Index of the operand item the glyph's bytes live in
    pub item: usize,
    /// Byte span inside that item
    pub byte_offset: usize,
    pub byte_len: usize,
}

impl Glyph {
    pub fn center(&self) -> (f64, f64) {
        self.bbox.center()
    }
}

/// A text-showing operation with per-glyph geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct TextShowOp {
    pub kind: TextShowKind,
    pub font_name: String,
    pub font_size: f64,
    /// `"` spacing operands `(aw, ac)`
    pub spacing_args: Option<(f64, f64)>,
    pub items: Vec<TjItem>,
    pub glyphs: Vec<Glyph>,
    /// Union of the glyph boxes
    pub bbox: BBox,
    /// Text matrix at operation start (after any implicit line move)
    pub tm_start: Matrix,
    /// Text matrix after the whole operation
    pub tm_end: Matrix,
    /// False when glyphs were positioned with fallback metrics, which
    /// forces conservative whole-op redaction on any bbox intersection
    pub reliable_metrics: bool,
    pub raw: Vec<u8>,
}

/// An inline image (`BI ... ID ... EI`), captured opaquely.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImageOp {
    pub bbox: BBox,
    /// The complete `BI...EI` byte block
    pub raw: Vec<u8>,
}

/// What a `Do` operand named.
#[derive(Debug, Clone, PartialEq)]
pub enum XObjectKind {
    Image,
    Form {
        matrix: Matrix,
        /// Child operations resolved into parent device space
        children: Vec<Operation>,
        /// The form's effective resources; needed when the body is
        /// inlined into the parent stream
        resources: crate::core::parser::Dict,
    },
}

/// A `Do` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct XObjectOp {
    pub name: String,
    pub kind: XObjectKind,
    pub bbox: BBox,
    /// Object id of the XObject stream, when it was an indirect object
    pub object: Option<ObjRef>,
    pub raw: Vec<u8>,
}

/// An operator the core does not interpret; preserved verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueOp {
    pub raw: Vec<u8>,
    /// Geometry when it could still be bounded, else `None` (always kept)
    pub bbox: Option<BBox>,
}

/// A parsed content-stream operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    State(StateOp),
    Path(PathPaintOp),
    TextShow(TextShowOp),
    InlineImage(InlineImageOp),
    XObject(XObjectOp),
    Opaque(OpaqueOp),
}

impl Operation {
    /// Device-space bbox for paint-producing operations.
    pub fn bbox(&self) -> Option<&BBox> {
        match self {
            Operation::State(_) => None,
            Operation::Path(op) => Some(&op.bbox),
            Operation::TextShow(op) => Some(&op.bbox),
            Operation::InlineImage(op) => Some(&op.bbox),
            Operation::XObject(op) => Some(&op.bbox),
            Operation::Opaque(op) => op.bbox.as_ref(),
        }
    }

    /// Raw bytes as they appeared in the source stream.
    pub fn raw(&self) -> &[u8] {
        match self {
            Operation::State(op) => &op.raw,
            Operation::Path(op) => &op.raw,
            Operation::TextShow(op) => &op.raw,
            Operation::InlineImage(op) => &op.raw,
            Operation::XObject(op) => &op.raw,
            Operation::Opaque(op) => &op.raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_accessor() {
        let state = Operation::State(StateOp {
            kind: StateKind::Save,
            raw: b"q".to_vec(),
        });
        assert!(state.bbox().is_none());

        let image = Operation::InlineImage(InlineImageOp {
            bbox: BBox {
                x0: 0.0,
                y0: 0.0,
                x1: 10.0,
                y1: 10.0,
            },
            raw: Vec::new(),
        });
        assert_eq!(image.bbox().unwrap().x1, 10.0);
    }

    #[test]
    fn test_raw_accessor() {
        let op = Operation::Opaque(OpaqueOp {
            raw: b"/GS1 gs".to_vec(),
            bbox: None,
        });
        assert_eq!(op.raw(), b"/GS1 gs");
    }
}
