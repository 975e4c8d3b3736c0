//! Post-write verification.
//!
//! Re-opens the emitted bytes and re-parses every touched page, asserting
//! the redaction post-conditions:
//!
//! - P1: no surviving glyph center inside any plan rectangle
//! - P2: no surviving image or XObject fragment substantially inside one
//! - P3: exactly one opaque black fill covering each rectangle
//! - P4: the output opens as a well-formed document with every planned
//!   page reachable
//!
//! Violations are reported, never repaired: the caller decides whether a
//! leaky file ships.

use super::plan::RedactionPlan;
use crate::content::content_parser::{parse_content, ContentParserOptions};
use crate::content::ops::{Operation, PaintMode, XObjectKind};
use crate::coords::{DeviceRect, Rect};
use crate::core::document::PdfDocument;
use crate::core::error::RedactResult;

/// Overlap ratio above which a surviving image counts as a leak.
const IMAGE_LEAK_RATIO: f64 = 0.5;

/// Tolerance for the P3 coverage test, in points.
const COVER_TOLERANCE: f64 = 0.5;

/// One verification failure.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Leak {
    pub page: u32,
    pub rect: Rect,
    pub detail: String,
}

/// Verifies the written output against the plan.
pub fn verify_output(output: &[u8], plan: &RedactionPlan) -> RedactResult<Vec<Leak>> {
    let mut doc = PdfDocument::open(output.to_vec())?; // P4: must open
    let mut leaks = Vec::new();

    for index in plan.page_indices() {
        if index as usize >= doc.page_count() {
            leaks.push(Leak {
                page: index,
                rect: Rect::new(0.0, 0.0, 0.0, 0.0),
                detail: "page not reachable in output".to_string(),
            });
            continue;
        }
        let page = doc.get_page(index as usize)?;
        let geometry = page.geometry()?;
        let rects = plan.device_rects(index, &geometry)?;
        if rects.is_empty() {
            continue;
        }

        let content = page.content_bytes(doc.xref_mut())?;
        let parsed = parse_content(
            &content,
            page.resources(),
            &geometry,
            doc.xref_mut(),
            &ContentParserOptions {
                max_xobject_depth: plan.max_xobject_depth,
            },
            None,
        )?;

        let mut covers = vec![0u32; rects.len()];
        scan_ops(&parsed.ops, &rects, index, &mut leaks, &mut covers);

        if plan.draw_black_box {
            // One cover per rectangle is emitted; overlapping plan
            // rectangles legitimately cover each other, so only a missing
            // cover is a violation.
            for (i, count) in covers.iter().enumerate() {
                if *count == 0 {
                    leaks.push(Leak {
                        page: index,
                        rect: rects[i].0,
                        detail: "no opaque cover over rectangle".to_string(),
                    });
                }
            }
        }
    }
    Ok(leaks)
}

fn scan_ops(
    ops: &[Operation],
    rects: &[DeviceRect],
    page: u32,
    leaks: &mut Vec<Leak>,
    covers: &mut [u32],
) {
    for op in ops {
        match op {
            Operation::TextShow(text) => {
                for glyph in &text.glyphs {
                    let (cx, cy) = glyph.center();
                    for rect in rects {
                        if rect.contains(cx, cy) {
                            leaks.push(Leak {
                                page,
                                rect: rect.0,
                                detail: format!(
                                    "glyph {:?} (code {}) survives at ({:.2}, {:.2})",
                                    glyph.unicode.unwrap_or('?'),
                                    glyph.code,
                                    cx,
                                    cy
                                ),
                            });
                        }
                    }
                }
            }
            Operation::InlineImage(image) => {
                check_image_bbox(&image.bbox, rects, page, "inline image", leaks);
            }
            Operation::XObject(xobject) => match &xobject.kind {
                XObjectKind::Image => {
                    check_image_bbox(&xobject.bbox, rects, page, "image XObject", leaks);
                }
                XObjectKind::Form { children, .. } => {
                    scan_ops(children, rects, page, leaks, covers);
                }
            },
            Operation::Path(path) => {
                if path.paint == PaintMode::Fill && path.fill_color.is_black() {
                    for (i, rect) in rects.iter().enumerate() {
                        if path.bbox.covers(rect, COVER_TOLERANCE) {
                            covers[i] += 1;
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn check_image_bbox(
    bbox: &crate::coords::BBox,
    rects: &[DeviceRect],
    page: u32,
    what: &str,
    leaks: &mut Vec<Leak>,
) {
    let area = bbox.area();
    for rect in rects {
        let overlap = bbox.intersection_area(rect);
        let substantial = if area > 0.0 {
            overlap >= IMAGE_LEAK_RATIO * area
        } else {
            overlap > 0.0
        };
        if substantial {
            leaks.push(Leak {
                page,
                rect: rect.0,
                detail: format!("{} survives inside rectangle", what),
            });
        }
    }
}
