//! The glyph-level filter.
//!
//! Walks a parsed operation stream against a set of device-space redaction
//! rectangles and decides, operation by operation and glyph by glyph, what
//! survives. The tie-break for text is the glyph center: a glyph is
//! redacted exactly when its center lies inside the closure of some
//! rectangle, so a selection drawn between two words redacts neither.

use super::ops::*;
use crate::coords::DeviceRect;

/// Substantial-overlap threshold for images.
const IMAGE_OVERLAP_RATIO: f64 = 0.5;

/// A filtered operation, ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum FilteredOp {
    /// Kept unchanged; re-emitted from its recorded bytes.
    Keep(Operation),
    /// A painting path that also established a clip: the paint is removed
    /// but the clip must survive.
    ClipOnly(PathPaintOp),
    /// A text-show operation with some glyphs redacted; `keep[i]` says
    /// whether glyph `i` survives.
    TextRuns { op: TextShowOp, keep: Vec<bool> },
    /// A form invocation whose body intersected a rectangle: the filtered
    /// body replaces the `Do`.
    Flattened {
        op: XObjectOp,
        body: Vec<FilteredOp>,
    },
}

/// Tally of what the filter removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub ops_dropped: u32,
    pub glyphs_dropped: u32,
    pub text_ops_split: u32,
    pub images_dropped: u32,
    pub xobjects_flattened: u32,
}

impl FilterStats {
    fn add(&mut self, other: &FilterStats) {
        self.ops_dropped += other.ops_dropped;
        self.glyphs_dropped += other.glyphs_dropped;
        self.text_ops_split += other.text_ops_split;
        self.images_dropped += other.images_dropped;
        self.xobjects_flattened += other.xobjects_flattened;
    }

    /// Whether anything at all was removed or rewritten.
    pub fn changed(&self) -> bool {
        self.ops_dropped > 0
            || self.glyphs_dropped > 0
            || self.text_ops_split > 0
            || self.images_dropped > 0
            || self.xobjects_flattened > 0
    }
}

/// Filters an operation stream against redaction rectangles.
///
/// Deterministic: the same operations and rectangles produce the same
/// output. Rectangle order never matters - every test is against each
/// rectangle independently, so overlapping rectangles behave as a union.
pub fn filter_operations(
    ops: Vec<Operation>,
    rects: &[DeviceRect],
) -> (Vec<FilteredOp>, FilterStats) {
    let mut out = Vec::with_capacity(ops.len());
    let mut stats = FilterStats::default();

    for op in ops {
        match op {
            Operation::State(_) => out.push(FilteredOp::Keep(op)),

            Operation::Path(path) => {
                let hit = rects.iter().any(|r| path.bbox.intersects(r));
                if !hit {
                    out.push(FilteredOp::Keep(Operation::Path(path)));
                } else if path.clip.is_some() {
                    stats.ops_dropped += 1;
                    out.push(FilteredOp::ClipOnly(path));
                } else {
                    stats.ops_dropped += 1;
                }
            }

            Operation::TextShow(text) => {
                filter_text(text, rects, &mut out, &mut stats);
            }

            Operation::InlineImage(image) => {
                if image_redacted(&image.bbox, rects) {
                    stats.ops_dropped += 1;
                    stats.images_dropped += 1;
                } else {
                    out.push(FilteredOp::Keep(Operation::InlineImage(image)));
                }
            }

            Operation::XObject(xobject) => {
                let form_children = match &xobject.kind {
                    XObjectKind::Image => None,
                    XObjectKind::Form { children, .. } => Some(children.clone()),
                };
                match form_children {
                    None => {
                        if image_redacted(&xobject.bbox, rects) {
                            stats.ops_dropped += 1;
                            stats.images_dropped += 1;
                        } else {
                            out.push(FilteredOp::Keep(Operation::XObject(xobject)));
                        }
                    }
                    Some(children) => {
                        // Fast path: nothing inside the form is touched
                        let (body, child_stats) = filter_operations(children, rects);
                        if !child_stats.changed() {
                            out.push(FilteredOp::Keep(Operation::XObject(xobject)));
                        } else {
                            stats.add(&child_stats);
                            stats.xobjects_flattened += 1;
                            out.push(FilteredOp::Flattened { op: xobject, body });
                        }
                    }
                }
            }

            Operation::Opaque(opaque) => {
                let hit = opaque
                    .bbox
                    .as_ref()
                    .is_some_and(|b| rects.iter().any(|r| b.intersects(r)));
                if hit {
                    stats.ops_dropped += 1;
                } else {
                    out.push(FilteredOp::Keep(Operation::Opaque(opaque)));
                }
            }
        }
    }

    (out, stats)
}

fn filter_text(
    text: TextShowOp,
    rects: &[DeviceRect],
    out: &mut Vec<FilteredOp>,
    stats: &mut FilterStats,
) {
    if text.glyphs.is_empty() {
        out.push(FilteredOp::Keep(Operation::TextShow(text)));
        return;
    }

    // No usable metrics: glyph centers are guesses, so any overall
    // intersection redacts the whole operation.
    if !text.reliable_metrics {
        if rects.iter().any(|r| text.bbox.intersects(r)) {
            stats.ops_dropped += 1;
            stats.glyphs_dropped += text.glyphs.len() as u32;
            stats.text_ops_split += 1;
            let glyph_count = text.glyphs.len();
            out.push(FilteredOp::TextRuns {
                op: text,
                keep: vec![false; glyph_count],
            });
        } else {
            out.push(FilteredOp::Keep(Operation::TextShow(text)));
        }
        return;
    }

    let keep: Vec<bool> = text
        .glyphs
        .iter()
        .map(|glyph| {
            let (cx, cy) = glyph.center();
            !rects.iter().any(|r| r.contains(cx, cy))
        })
        .collect();

    if keep.iter().all(|&k| k) {
        out.push(FilteredOp::Keep(Operation::TextShow(text)));
        return;
    }

    stats.glyphs_dropped += keep.iter().filter(|&&k| !k).count() as u32;
    stats.text_ops_split += 1;
    out.push(FilteredOp::TextRuns { op: text, keep });
}

/// Whether an image bbox is redacted: wholly contained in some rectangle,
/// or overlapping at least half its area with one.
fn image_redacted(bbox: &crate::coords::BBox, rects: &[DeviceRect]) -> bool {
    let area = bbox.area();
    rects.iter().any(|rect| {
        let overlap = bbox.intersection_area(rect);
        if area <= 0.0 {
            return overlap > 0.0 || bbox.intersects(rect);
        }
        overlap >= IMAGE_OVERLAP_RATIO * area
    })
}
