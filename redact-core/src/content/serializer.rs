//! Content-stream re-emission.
//!
//! Kept operations are written back from their recorded bytes, so an
//! untouched stream round-trips verbatim. Split text operations are the
//! interesting case: each kept glyph run is repositioned with a synthetic
//! `Td` solved against the tracked text line matrix, and string operands
//! are sliced from the original bytes at glyph boundaries - never
//! re-encoded. Graphics-state balance is enforced (orphan `Q` elided,
//! missing `Q` appended), and the opaque redaction rectangles are painted
//! last, in the stream's native coordinate space.

use super::filter::FilteredOp;
use super::ops::*;
use crate::coords::{DeviceRect, Matrix, PageGeometry};

/// Linear systems flatter than this solve via an absolute `Tm` instead.
const DEGENERATE_DET: f64 = 1e-12;

/// Serializes a filtered operation stream back into content-stream bytes.
pub fn serialize_content(
    ops: &[FilteredOp],
    rects: &[DeviceRect],
    page: &PageGeometry,
    draw_black_box: bool,
) -> Vec<u8> {
    let mut emitter = Emitter {
        out: Vec::new(),
        q_depth: 0,
        text: TextTracker::new(),
    };
    emitter.emit_all(ops);

    // Close any q the source never closed, so the boxes paint in the
    // stream's base state.
    while emitter.q_depth > 0 {
        emitter.push_line(b"Q");
        emitter.q_depth -= 1;
    }

    if draw_black_box {
        let inverse = page.inverse_base_matrix();
        for rect in rects {
            emitter.emit_black_box(rect, &inverse);
        }
    }

    emitter.out
}

/// Formats a number with at most six fractional digits, trailing zeros
/// trimmed.
pub fn format_number(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 {
        return "0".to_string();
    }
    let mut s = format!("{:.6}", rounded);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}

/// Text positioning state while emitting.
///
/// `orig_tlm` is the line matrix the ORIGINAL stream has at this point;
/// `actual_tlm` is the line matrix of the stream being emitted. They
/// diverge (`dirty`) once a synthetic `Td` repositions a run, and are
/// reconciled before any operator that depends on the line matrix.
struct TextTracker {
    orig_tlm: Matrix,
    actual_tlm: Matrix,
    leading: f64,
    dirty: bool,
}

impl TextTracker {
    fn new() -> Self {
        TextTracker {
            orig_tlm: Matrix::IDENTITY,
            actual_tlm: Matrix::IDENTITY,
            leading: 0.0,
            dirty: false,
        }
    }

    fn reset(&mut self) {
        self.orig_tlm = Matrix::IDENTITY;
        self.actual_tlm = Matrix::IDENTITY;
        self.dirty = false;
    }
}

struct Emitter {
    out: Vec<u8>,
    q_depth: i32,
    text: TextTracker,
}

impl Emitter {
    fn push_line(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
        self.out.push(b'\n');
    }

    fn emit_all(&mut self, ops: &[FilteredOp]) {
        for op in ops {
            match op {
                FilteredOp::Keep(operation) => self.emit_kept(operation),
                FilteredOp::ClipOnly(path) => self.emit_clip_only(path),
                FilteredOp::TextRuns { op, keep } => self.emit_text_runs(op, keep),
                FilteredOp::Flattened { op, body } => self.emit_flattened(op, body),
            }
        }
    }

    fn emit_kept(&mut self, operation: &Operation) {
        match operation {
            Operation::State(state) => self.emit_state(state),
            Operation::TextShow(text) => self.emit_kept_text(text),
            other => self.push_line(other.raw()),
        }
    }

    fn emit_state(&mut self, state: &StateOp) {
        match &state.kind {
            StateKind::Save => {
                self.q_depth += 1;
                self.push_line(&state.raw);
            }
            StateKind::Restore => {
                if self.q_depth == 0 {
                    // Orphan restore: elide
                    return;
                }
                self.q_depth -= 1;
                self.push_line(&state.raw);
            }
            StateKind::BeginText => {
                self.text.reset();
                self.push_line(&state.raw);
            }
            StateKind::EndText => {
                self.text.dirty = false;
                self.push_line(&state.raw);
            }
            StateKind::MoveText { tx, ty, set_leading } => {
                self.reconcile_line_matrix();
                if *set_leading {
                    self.text.leading = -ty;
                }
                let moved = Matrix::translation(*tx, *ty).then(&self.text.orig_tlm);
                self.text.orig_tlm = moved;
                self.text.actual_tlm = moved;
                self.push_line(&state.raw);
            }
            StateKind::SetTextMatrix(m) => {
                self.text.orig_tlm = *m;
                self.text.actual_tlm = *m;
                self.text.dirty = false;
                self.push_line(&state.raw);
            }
            StateKind::NextLine => {
                self.reconcile_line_matrix();
                let moved =
                    Matrix::translation(0.0, -self.text.leading).then(&self.text.orig_tlm);
                self.text.orig_tlm = moved;
                self.text.actual_tlm = moved;
                self.push_line(&state.raw);
            }
            StateKind::SetLeading(leading) => {
                self.text.leading = *leading;
                self.push_line(&state.raw);
            }
            _ => self.push_line(&state.raw),
        }
    }

    /// Whole text operation kept: may still need repositioning when an
    /// earlier operation in the same text object was split.
    fn emit_kept_text(&mut self, text: &TextShowOp) {
        match text.kind {
            TextShowKind::NextLineShow | TextShowKind::NextLineSetSpacingShow => {
                self.reconcile_line_matrix();
                let moved =
                    Matrix::translation(0.0, -self.text.leading).then(&self.text.orig_tlm);
                self.text.orig_tlm = moved;
                self.text.actual_tlm = moved;
                self.push_line(&text.raw);
            }
            _ => {
                if self.text.dirty && !text.glyphs.is_empty() {
                    self.emit_move_to(text.tm_start);
                }
                self.push_line(&text.raw);
            }
        }
    }

    /// If the emitted stream's line matrix has drifted from the original,
    /// bring it back with a synthetic `Td`.
    fn reconcile_line_matrix(&mut self) {
        if !self.text.dirty {
            return;
        }
        let target = self.text.orig_tlm;
        self.emit_move_to(target);
        self.text.actual_tlm = target;
        self.text.dirty = false;
    }

    /// Emits a `Td` (or `Tm` fallback) that places both text matrices at
    /// `target`, starting from `actual_tlm`.
    fn emit_move_to(&mut self, target: Matrix) {
        let [a, b, c, d, e, f] = self.text.actual_tlm.0;
        let [.., gx, gy] = target.0;
        let det = a * d - b * c;
        if det.abs() < DEGENERATE_DET {
            let line = format!(
                "{} {} {} {} {} {} Tm",
                format_number(target.0[0]),
                format_number(target.0[1]),
                format_number(target.0[2]),
                format_number(target.0[3]),
                format_number(target.0[4]),
                format_number(target.0[5]),
            );
            self.push_line(line.as_bytes());
        } else {
            let dx = gx - e;
            let dy = gy - f;
            let tx = (dx * d - dy * c) / det;
            let ty = (dy * a - dx * b) / det;
            let line = format!("{} {} Td", format_number(tx), format_number(ty));
            self.push_line(line.as_bytes());
        }
        self.text.actual_tlm = target;
        self.text.dirty = true;
    }

    /// A split text operation: emit the surviving glyph runs.
    fn emit_text_runs(&mut self, op: &TextShowOp, keep: &[bool]) {
        // Replicate the implicit line move of ' and " first.
        match op.kind {
            TextShowKind::NextLineShow => {
                self.reconcile_line_matrix();
                self.advance_line();
            }
            TextShowKind::NextLineSetSpacingShow => {
                self.reconcile_line_matrix();
                if let Some((aw, ac)) = op.spacing_args {
                    let line = format!(
                        "{} Tw {} Tc",
                        format_number(aw),
                        format_number(ac)
                    );
                    self.push_line(line.as_bytes());
                }
                self.advance_line();
            }
            _ => {}
        }

        let mut i = 0;
        let mut first_run = true;
        while i < keep.len() {
            if !keep[i] {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < keep.len() && keep[i] {
                i += 1;
            }
            let run = &op.glyphs[run_start..i];

            // A run that begins the operation with no prior drift needs no
            // repositioning; every other run does.
            let needs_move = !(first_run && run_start == 0 && !self.text.dirty);
            if needs_move {
                self.emit_move_to(run[0].tm);
            }
            self.emit_run(op, run);
            first_run = false;
        }

        // The emitted stream's matrices no longer match the original op's
        // end state; later dependents reconcile on demand.
        self.text.dirty = true;
    }

    fn advance_line(&mut self) {
        self.push_line(b"T*");
        let moved = Matrix::translation(0.0, -self.text.leading).then(&self.text.orig_tlm);
        self.text.orig_tlm = moved;
        self.text.actual_tlm = moved;
        self.text.dirty = false;
    }

    /// Emits one kept glyph run, slicing operands at glyph boundaries.
    fn emit_run(&mut self, op: &TextShowOp, run: &[Glyph]) {
        #[derive(Debug)]
        enum Part {
            Slice { item: usize, start: usize, end: usize },
            Adjust(f64),
        }

        let mut parts: Vec<Part> = Vec::new();
        let mut prev: Option<&Glyph> = None;
        for glyph in run {
            if let Some(p) = prev {
                // Keep the positioning adjustments that sat between these
                // two glyphs in the original array.
                if glyph.item > p.item {
                    for idx in (p.item + 1)..glyph.item {
                        if let TjItem::Adjust(n) = &op.items[idx] {
                            parts.push(Part::Adjust(*n));
                        }
                    }
                }
            }
            let merged = match (parts.last_mut(), prev) {
                (Some(Part::Slice { item, end, .. }), Some(p))
                    if *item == glyph.item
                        && p.byte_offset + p.byte_len == glyph.byte_offset
                        && *end == glyph.byte_offset =>
                {
                    *end = glyph.byte_offset + glyph.byte_len;
                    true
                }
                _ => false,
            };
            if !merged {
                parts.push(Part::Slice {
                    item: glyph.item,
                    start: glyph.byte_offset,
                    end: glyph.byte_offset + glyph.byte_len,
                });
            }
            prev = Some(glyph);
        }

        let item_bytes = |item: usize, start: usize, end: usize| -> (&[u8], bool) {
            match &op.items[item] {
                TjItem::Text { bytes, hex } => (&bytes[start..end], *hex),
                TjItem::Adjust(_) => (&[], false),
            }
        };

        let single_slice = parts.len() == 1 && matches!(parts[0], Part::Slice { .. });
        let mut line: Vec<u8> = Vec::new();
        if single_slice {
            let Part::Slice { item, start, end } = &parts[0] else {
                unreachable!();
            };
            let (bytes, hex) = item_bytes(*item, *start, *end);
            write_string_operand(&mut line, bytes, hex);
            line.extend_from_slice(b" Tj");
        } else {
            line.push(b'[');
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    line.push(b' ');
                }
                match part {
                    Part::Slice { item, start, end } => {
                        let (bytes, hex) = item_bytes(*item, *start, *end);
                        write_string_operand(&mut line, bytes, hex);
                    }
                    Part::Adjust(n) => {
                        line.extend_from_slice(format_number(*n).as_bytes());
                    }
                }
            }
            line.extend_from_slice(b"] TJ");
        }
        self.push_line(&line);
    }

    /// A path that must keep clipping but paint nothing.
    fn emit_clip_only(&mut self, path: &PathPaintOp) {
        let mut line: Vec<u8> = Vec::new();
        for seg in &path.segments {
            write_segment(&mut line, seg);
        }
        match path.clip {
            Some(ClipRule::EvenOdd) => line.extend_from_slice(b"W* n"),
            _ => line.extend_from_slice(b"W n"),
        }
        self.push_line(&line);
    }

    /// A partially redacted form: its filtered body replaces the `Do`,
    /// bracketed by the invocation state.
    fn emit_flattened(&mut self, op: &XObjectOp, body: &[FilteredOp]) {
        let XObjectKind::Form { matrix, .. } = &op.kind else {
            return;
        };
        self.push_line(b"q");
        if *matrix != Matrix::IDENTITY {
            let m = matrix.0;
            let line = format!(
                "{} {} {} {} {} {} cm",
                format_number(m[0]),
                format_number(m[1]),
                format_number(m[2]),
                format_number(m[3]),
                format_number(m[4]),
                format_number(m[5]),
            );
            self.push_line(line.as_bytes());
        }

        // The form body is a self-contained stream: emit it with its own
        // balance and text tracking.
        let mut inner = Emitter {
            out: Vec::new(),
            q_depth: 0,
            text: TextTracker::new(),
        };
        inner.emit_all(body);
        while inner.q_depth > 0 {
            inner.push_line(b"Q");
            inner.q_depth -= 1;
        }
        self.out.extend_from_slice(&inner.out);

        self.push_line(b"Q");
    }

    /// `q 0 0 0 rg x y w h re f Q` in content-space coordinates.
    fn emit_black_box(&mut self, rect: &DeviceRect, inverse: &Matrix) {
        let bbox = crate::coords::transform_rect(inverse, &rect.0);
        let line = format!(
            "q 0 0 0 rg {} {} {} {} re f Q",
            format_number(bbox.x0),
            format_number(bbox.y0),
            format_number(bbox.width()),
            format_number(bbox.height()),
        );
        self.push_line(line.as_bytes());
    }
}

fn write_segment(out: &mut Vec<u8>, seg: &PathSeg) {
    let mut push_nums = |nums: &[f64], op: &str| {
        for n in nums {
            out.extend_from_slice(format_number(*n).as_bytes());
            out.push(b' ');
        }
        out.extend_from_slice(op.as_bytes());
        out.push(b' ');
    };
    match *seg {
        PathSeg::MoveTo(x, y) => push_nums(&[x, y], "m"),
        PathSeg::LineTo(x, y) => push_nums(&[x, y], "l"),
        PathSeg::CurveTo(x1, y1, x2, y2, x3, y3) => push_nums(&[x1, y1, x2, y2, x3, y3], "c"),
        PathSeg::CurveV(x2, y2, x3, y3) => push_nums(&[x2, y2, x3, y3], "v"),
        PathSeg::CurveY(x1, y1, x3, y3) => push_nums(&[x1, y1, x3, y3], "y"),
        PathSeg::Rect(x, y, w, h) => push_nums(&[x, y, w, h], "re"),
        PathSeg::Close => push_nums(&[], "h"),
    }
}

/// Writes a string operand from raw bytes: hex strings stay hex, literal
/// strings escape only what the format requires.
fn write_string_operand(out: &mut Vec<u8>, bytes: &[u8], hex: bool) {
    if hex {
        out.push(b'<');
        for b in bytes {
            out.extend_from_slice(format!("{:02X}", b).as_bytes());
        }
        out.push(b'>');
        return;
    }
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
