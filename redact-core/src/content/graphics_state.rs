//! Graphics state tracking for content-stream interpretation.
//!
//! The parser owns one [`GraphicsStack`]; operations only ever see the
//! device-space bounding boxes computed from it, never the state itself.
//! The stack tolerates unbalanced `q`/`Q` (reported, never fatal).

use crate::coords::Matrix;
use crate::core::font::Font;
use std::rc::Rc;

/// Fill/stroke color in one of the device color spaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Color {
    Gray(f64),
    Rgb(f64, f64, f64),
    Cmyk(f64, f64, f64, f64),
}

impl Color {
    pub fn black() -> Self {
        Color::Gray(0.0)
    }

    /// Approximate RGB components in 0..=1.
    pub fn to_rgb(&self) -> (f64, f64, f64) {
        match *self {
            Color::Gray(g) => (g, g, g),
            Color::Rgb(r, g, b) => (r, g, b),
            Color::Cmyk(c, m, y, k) => (
                (1.0 - c) * (1.0 - k),
                (1.0 - m) * (1.0 - k),
                (1.0 - y) * (1.0 - k),
            ),
        }
    }

    /// Whether this paints opaque black (every channel at most 0.05);
    /// the verifier's criterion for a redaction cover.
    pub fn is_black(&self) -> bool {
        let (r, g, b) = self.to_rgb();
        r <= 0.05 && g <= 0.05 && b <= 0.05
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::black()
    }
}

/// Text-object state: matrices live between `BT` and `ET`, parameters
/// persist across text objects.
#[derive(Debug, Clone)]
pub struct TextState {
    pub matrix: Matrix,
    pub line_matrix: Matrix,
    pub font: Option<Rc<Font>>,
    pub font_name: Option<String>,
    pub font_size: f64,
    pub char_spacing: f64,
    pub word_spacing: f64,
    /// Tz value in percent (default 100)
    pub horizontal_scale: f64,
    pub leading: f64,
    pub rise: f64,
    pub render_mode: i32,
    /// Inside a BT...ET object
    pub active: bool,
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            font: None,
            font_name: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 100.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
            active: false,
        }
    }
}

/// One frame of graphics state.
#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub fill_color: Color,
    pub stroke_color: Color,
    pub text: TextState,
}

impl GraphicsState {
    /// Fresh state with the given base transform as CTM.
    pub fn with_base(base: Matrix) -> Self {
        GraphicsState {
            ctm: base,
            fill_color: Color::black(),
            stroke_color: Color::black(),
            text: TextState::default(),
        }
    }

    /// `cm`: concatenate onto the CTM (operand applied first).
    pub fn concat_ctm(&mut self, m: &Matrix) {
        self.ctm = m.then(&self.ctm);
    }

    /// `BT`: both text matrices become the identity.
    pub fn begin_text(&mut self) {
        self.text.active = true;
        self.text.matrix = Matrix::IDENTITY;
        self.text.line_matrix = Matrix::IDENTITY;
    }

    /// `ET`: matrices are no longer meaningful.
    pub fn end_text(&mut self) {
        self.text.active = false;
    }

    /// `Tm`
    pub fn set_text_matrix(&mut self, m: Matrix) {
        self.text.matrix = m;
        self.text.line_matrix = m;
    }

    /// `Td` / `TD` (leading handled by the caller)
    pub fn translate_text_line(&mut self, tx: f64, ty: f64) {
        let moved = Matrix::translation(tx, ty).then(&self.text.line_matrix);
        self.text.line_matrix = moved;
        self.text.matrix = moved;
    }

    /// `T*`
    pub fn next_text_line(&mut self) {
        self.translate_text_line(0.0, -self.text.leading);
    }

    /// Glyph advance: shifts the text matrix along the baseline.
    pub fn advance_text(&mut self, tx: f64) {
        self.text.matrix = Matrix::translation(tx, 0.0).then(&self.text.matrix);
    }

    /// Full text render transform: parameters x Tm x CTM.
    pub fn text_render_matrix(&self) -> Matrix {
        let th = self.text.horizontal_scale / 100.0;
        let params = Matrix([
            self.text.font_size * th,
            0.0,
            0.0,
            self.text.font_size,
            0.0,
            self.text.rise,
        ]);
        params.then(&self.text.matrix).then(&self.ctm)
    }
}

/// Save/restore stack with a current frame.
#[derive(Debug, Clone)]
pub struct GraphicsStack {
    current: GraphicsState,
    saved: Vec<GraphicsState>,
    /// `Q` operators with nothing to restore
    pub underflows: u32,
}

impl GraphicsStack {
    pub fn new(base: Matrix) -> Self {
        GraphicsStack {
            current: GraphicsState::with_base(base),
            saved: Vec::new(),
            underflows: 0,
        }
    }

    pub fn current(&self) -> &GraphicsState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut GraphicsState {
        &mut self.current
    }

    /// `q`
    pub fn push(&mut self) {
        self.saved.push(self.current.clone());
    }

    /// `Q`: restores the saved frame; an orphan restore keeps the current
    /// frame and is counted.
    pub fn pop(&mut self) {
        match self.saved.pop() {
            Some(state) => self.current = state,
            None => self.underflows += 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}
