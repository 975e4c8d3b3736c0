//! End-to-end redaction scenarios.

mod test_utils;

use pdf_redact_core::content::ops::{Operation, PaintMode};
use pdf_redact_core::coords::Rect;
use pdf_redact_core::redaction::{
    redact_bytes, PageRedaction, PageStatus, RedactOptions, RedactionPlan,
};
use std::sync::Arc;
use test_utils::*;

fn plan_one(index: u32, rect: Rect) -> RedactionPlan {
    RedactionPlan::new(vec![PageRedaction {
        index,
        rectangles: vec![rect],
        dpi_hint: 72.0,
    }])
}

fn run(pdf: Vec<u8>, plan: &RedactionPlan) -> (Vec<u8>, pdf_redact_core::RedactReport) {
    redact_bytes(Arc::new(pdf), plan, &RedactOptions::default()).expect("redaction must run")
}

/// S1: a rectangle tightly around "FIRST" removes only that word.
#[test]
fn s1_first_word_redacted() {
    let pdf = build_pdf(&[TestPage::new(
        "BT /F1 12 Tf 72 100 Td (FIRST MIDDLE LAST) Tj ET",
    )]);
    // FIRST spans user x 72..106.67 at baseline 100 -> device y ~683..695
    let rect = Rect::new(71.0, 683.0, 36.5, 12.0);
    let (out, report) = run(pdf, &plan_one(0, rect));
    assert!(report.success, "{:?}", report);

    let text = extract_all_text(&out);
    assert!(!text.contains("FIRST"), "leaked: {}", text);
    assert!(text.contains("MIDDLE"), "lost: {}", text);
    assert!(text.contains("LAST"), "lost: {}", text);

    // The black box stays over FIRST and does not reach MIDDLE
    let boxes = black_fill_boxes(&out, 0);
    assert_eq!(boxes.len(), 1);
    assert!(boxes[0].1 <= 108.5, "box reaches into MIDDLE: {:?}", boxes);
}

/// S2: a rectangle in the inter-word gap redacts nothing but still
/// paints its cover.
#[test]
fn s2_gap_selection_redacts_nothing() {
    let pdf = build_pdf(&[TestPage::new(
        "BT /F1 12 Tf 72 100 Td (ALPHA BETA GAMMA) Tj ET",
    )]);
    // Gap between ALPHA (ends 111.35) and BETA (starts 114.68); the space
    // glyph center sits at ~113.0, outside this rectangle
    let rect = Rect::new(111.5, 683.0, 1.2, 12.0);
    let (out, report) = run(pdf, &plan_one(0, rect));
    assert!(report.success, "{:?}", report);
    assert!(matches!(
        report.per_page[0].status,
        PageStatus::Untouched
    ));

    let text = extract_all_text(&out);
    for word in ["ALPHA", "BETA", "GAMMA"] {
        assert!(text.contains(word), "lost {}: {}", word, text);
    }
    assert_eq!(black_fill_boxes(&out, 0).len(), 1);
}

/// S3: redaction in visual coordinates on a rotated page.
#[test]
fn s3_rotated_page() {
    let page = TestPage::new(
        "BT /F1 12 Tf 100 100 Td (KEEP) Tj ET BT /F1 12 Tf 400 300 Td (REDACT) Tj ET",
    )
    .with_rotation(90);
    let pdf = build_pdf(&[page]);
    // User (400, 300) appears at visual (300, 400) on the rotated page
    let rect = Rect::new(295.0, 398.0, 16.0, 54.0);
    let (out, report) = run(pdf, &plan_one(0, rect));
    assert!(report.success, "{:?}", report);

    let text = extract_all_text(&out);
    assert!(!text.contains("REDACT"), "leaked: {}", text);
    assert!(text.contains("KEEP"), "lost: {}", text);
}

/// S4: a page whose whole content lives in a Form XObject.
#[test]
fn s4_form_xobject_flattened() {
    let form = TestForm::new(
        "BT /F1 12 Tf 72 700 Td (INSIDE) Tj ET BT /F1 12 Tf 300 100 Td (OUTSIDE) Tj ET",
        [0.0, 0.0, 612.0, 792.0],
    );
    let page = TestPage::new("q 1 0 0 1 0 0 cm /Form1 Do Q").with_form(form);
    let pdf = build_pdf(&[page]);
    // INSIDE is at user (72, 700) -> device y ~83..95
    let rect = Rect::new(70.0, 82.0, 45.0, 14.0);
    let (out, report) = run(pdf, &plan_one(0, rect));
    assert!(report.success, "{:?}", report);

    let text = extract_all_text(&out);
    assert!(!text.contains("INSIDE"), "leaked: {}", text);
    assert!(text.contains("OUTSIDE"), "lost: {}", text);

    // No residual invocation of the unmodified form
    let content = page_content(&out, 0);
    let content_text = String::from_utf8_lossy(&content);
    assert!(!content_text.contains("Do"), "residual Do: {}", content_text);
    // The form's bytes are gone from the file entirely
    assert!(
        !out.windows(b"(INSIDE)".len()).any(|w| w == b"(INSIDE)"),
        "form stream with redacted text still present"
    );
}

/// S5: an inline image substantially inside the rectangle disappears
/// as a whole BI..EI block.
#[test]
fn s5_inline_image_removed() {
    let pdf = build_pdf(&[TestPage::new(
        "BT /F1 12 Tf 300 700 Td (KEEP) Tj ET\nq 100 0 0 100 50 50 cm BI /W 1 /H 1 /BPC 8 /CS /G ID A EI Q",
    )]);
    // Image covers user (50,50)-(150,150) -> device (50,642)-(150,742)
    let rect = Rect::new(40.0, 632.0, 120.0, 120.0);
    let (out, report) = run(pdf, &plan_one(0, rect));
    assert!(report.success, "{:?}", report);

    let content = page_content(&out, 0);
    let content_text = String::from_utf8_lossy(&content);
    assert!(!content_text.contains("BI"), "image block: {}", content_text);
    assert!(extract_all_text(&out).contains("KEEP"));
    assert_eq!(black_fill_boxes(&out, 0).len(), 1);
}

/// S6: untouched pages keep byte-identical stream data.
#[test]
fn s6_other_pages_untouched() {
    let contents = [
        "BT /F1 12 Tf 72 700 Td (PAGE ONE) Tj ET",
        "BT /F1 12 Tf 72 700 Td (PAGE TWO SECRET) Tj ET",
        "BT /F1 12 Tf 72 700 Td (PAGE THREE) Tj ET",
    ];
    let pdf = build_pdf(&[
        TestPage::new(contents[0]),
        TestPage::new(contents[1]),
        TestPage::new(contents[2]),
    ]);
    // "SECRET" on page two: PAGE TWO is 9 glyphs wide before it
    let glyphs = page_glyph_centers(&pdf, 1);
    let secret_start = glyphs[9].1; // first glyph of SECRET
    let rect = Rect::new(secret_start - 2.0, 82.0, 60.0, 14.0);

    let (out, report) = run(pdf.clone(), &plan_one(1, rect));
    assert!(report.success, "{:?}", report);

    assert_eq!(page_content(&out, 0), contents[0].as_bytes());
    assert_eq!(page_content(&out, 2), contents[2].as_bytes());

    let text = extract_all_text(&out);
    assert!(!text.contains("SECRET"), "leaked: {}", text);
    for kept in ["PAGE ONE", "PAGE THREE"] {
        assert!(text.contains(kept), "lost {}: {}", kept, text);
    }
}

/// Invariants 4 and 5: glyph-level containment and non-intrusion.
#[test]
fn surviving_glyphs_match_input_positions() {
    let pdf = build_pdf(&[TestPage::new(
        "BT /F1 12 Tf 72 100 Td (FIRST MIDDLE LAST) Tj ET",
    )]);
    let rect = Rect::new(71.0, 683.0, 36.5, 12.0);
    let input_glyphs = page_glyph_centers(&pdf, 0);
    let (out, _) = run(pdf, &plan_one(0, rect));
    let output_glyphs = page_glyph_centers(&out, 0);

    let inside = |cx: f64, cy: f64| {
        cx >= 71.0 && cx <= 107.5 && cy >= 683.0 && cy <= 695.0
    };

    // Containment: nothing survives inside the rectangle
    for &(code, cx, cy) in &output_glyphs {
        assert!(!inside(cx, cy), "glyph {} survives at ({}, {})", code, cx, cy);
    }

    // Non-intrusion: every outside glyph survives at its old position
    for &(code, cx, cy) in &input_glyphs {
        if inside(cx, cy) {
            continue;
        }
        let found = output_glyphs.iter().any(|&(c, x, y)| {
            c == code && (x - cx).abs() < 1e-3 && (y - cy).abs() < 1e-3
        });
        assert!(found, "glyph {} at ({}, {}) moved or vanished", code, cx, cy);
    }
}

/// Determinism across sequential and parallel mode.
#[test]
fn parallel_mode_is_byte_identical() {
    let pdf = build_pdf(&[
        TestPage::new("BT /F1 12 Tf 72 700 Td (AAA SECRET) Tj ET"),
        TestPage::new("BT /F1 12 Tf 72 700 Td (BBB SECRET) Tj ET"),
        TestPage::new("BT /F1 12 Tf 72 700 Td (CCC SECRET) Tj ET"),
    ]);
    let plan = RedactionPlan::new(
        (0..3)
            .map(|index| PageRedaction {
                index,
                rectangles: vec![Rect::new(95.0, 82.0, 60.0, 14.0)],
                dpi_hint: 72.0,
            })
            .collect(),
    );
    let (seq, _) = redact_bytes(
        Arc::new(pdf.clone()),
        &plan,
        &RedactOptions {
            parallel: false,
            cancel: None,
        },
    )
    .unwrap();
    let (par, _) = redact_bytes(
        Arc::new(pdf),
        &plan,
        &RedactOptions {
            parallel: true,
            cancel: None,
        },
    )
    .unwrap();
    assert_eq!(seq, par);
}

/// FlateDecode content streams decode transparently and the rewritten
/// stream is emitted uncompressed.
#[test]
fn flate_compressed_content_stream() {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let content = "BT /F1 12 Tf 72 100 Td (SECRET ok) Tj ET";
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    // Assemble by hand: same layout as build_pdf but with a filter
    let mut pdf = Vec::new();
    pdf.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    let mut push_obj = |pdf: &mut Vec<u8>, offsets: &mut Vec<usize>, body: &[u8]| {
        offsets.push(pdf.len());
        pdf.extend_from_slice(body);
    };
    push_obj(
        &mut pdf,
        &mut offsets,
        b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n",
    );
    push_obj(
        &mut pdf,
        &mut offsets,
        b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n",
    );
    push_obj(
        &mut pdf,
        &mut offsets,
        b"3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>\nendobj\n",
    );
    let mut stream_obj = format!(
        "4 0 obj\n<< /Length {} /Filter /FlateDecode >>\nstream\n",
        compressed.len()
    )
    .into_bytes();
    stream_obj.extend_from_slice(&compressed);
    stream_obj.extend_from_slice(b"\nendstream\nendobj\n");
    push_obj(&mut pdf, &mut offsets, &stream_obj);
    push_obj(
        &mut pdf,
        &mut offsets,
        b"5 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>\nendobj\n",
    );
    let xref_offset = pdf.len();
    pdf.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
    for off in &offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    pdf.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R >>\n");
    pdf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

    let rect = Rect::new(70.0, 680.0, 48.0, 20.0);
    let (out, report) = run(pdf, &plan_one(0, rect));
    assert!(report.success, "{:?}", report);
    let text = extract_all_text(&out);
    assert!(!text.contains("SECRET"), "leaked: {}", text);
    assert!(text.contains("ok"));
}

/// Black-box coverage: the cover is an opaque black fill spanning the
/// rectangle (checked structurally; rasterization is the caller's side).
#[test]
fn black_box_covers_rectangle() {
    let pdf = build_pdf(&[TestPage::new("BT /F1 12 Tf 72 100 Td (SECRET) Tj ET")]);
    let rect = Rect::new(70.0, 680.0, 60.0, 20.0);
    let (out, _) = run(pdf, &plan_one(0, rect));
    let boxes = black_fill_boxes(&out, 0);
    assert_eq!(boxes.len(), 1);
    let (x0, x1, y0, y1) = (boxes[0].0, boxes[0].1, boxes[0].2, boxes[0].3);
    assert!(x0 <= 70.1 && x1 >= 129.9 && y0 <= 680.1 && y1 >= 699.9);
}

/// Device-space bboxes of black fill operations on a page.
fn black_fill_boxes(bytes: &[u8], index: usize) -> Vec<(f64, f64, f64, f64)> {
    page_operations(bytes, index)
        .iter()
        .filter_map(|op| match op {
            Operation::Path(path)
                if path.paint == PaintMode::Fill && path.fill_color.is_black() =>
            {
                Some((path.bbox.x0, path.bbox.x1, path.bbox.y0, path.bbox.y1))
            }
            _ => None,
        })
        .collect()
}
