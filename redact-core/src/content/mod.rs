pub mod content_parser;
pub mod filter;
pub mod graphics_state;
pub mod ops;
pub mod serializer;

pub use content_parser::{parse_content, ContentParserOptions, ParseWarnings, ParsedContent};
pub use filter::{filter_operations, FilterStats, FilteredOp};
pub use graphics_state::{Color, GraphicsStack, GraphicsState, TextState};
pub use ops::{
    Glyph, InlineImageOp, Operation, OpaqueOp, PaintMode, PathPaintOp, PathSeg, StateKind,
    StateOp, TextShowKind, TextShowOp, TjItem, XObjectKind, XObjectOp,
};
pub use serializer::{format_number, serialize_content};
