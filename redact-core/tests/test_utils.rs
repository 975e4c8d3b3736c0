//! Shared helpers for integration tests: a small in-memory PDF builder
//! and extraction utilities built on the crate's own parser.

#![allow(dead_code)]

use pdf_redact_core::content::content_parser::{parse_content, ContentParserOptions};
use pdf_redact_core::content::ops::Operation;
use pdf_redact_core::core::PdfDocument;

/// One page of a synthetic document.
#[derive(Debug, Clone)]
pub struct TestPage {
    pub content: String,
    pub media_box: [f64; 4],
    pub rotate: i64,
    /// Form XObjects available as `/Form1`, `/Form2`, … in order
    pub forms: Vec<TestForm>,
}

impl TestPage {
    pub fn new(content: &str) -> Self {
        TestPage {
            content: content.to_string(),
            media_box: [0.0, 0.0, 612.0, 792.0],
            rotate: 0,
            forms: Vec::new(),
        }
    }

    pub fn with_rotation(mut self, rotate: i64) -> Self {
        self.rotate = rotate;
        self
    }

    pub fn with_form(mut self, form: TestForm) -> Self {
        self.forms.push(form);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TestForm {
    pub content: String,
    pub bbox: [f64; 4],
    pub matrix: Option<[f64; 6]>,
}

impl TestForm {
    pub fn new(content: &str, bbox: [f64; 4]) -> Self {
        TestForm {
            content: content.to_string(),
            bbox,
            matrix: None,
        }
    }
}

/// Builds a complete classic-xref PDF with a shared Helvetica `/F1`.
pub fn build_pdf(pages: &[TestPage]) -> Vec<u8> {
    // Object numbering: 1 catalog, 2 pages, 3 font, then per page:
    // page dict, content stream, then its forms.
    let font_num = 3u32;
    let mut next = 4u32;
    let mut page_nums = Vec::new();
    let mut content_nums = Vec::new();
    let mut form_nums: Vec<Vec<u32>> = Vec::new();
    for page in pages {
        page_nums.push(next);
        content_nums.push(next + 1);
        next += 2;
        let mut forms = Vec::new();
        for _ in &page.forms {
            forms.push(next);
            next += 1;
        }
        form_nums.push(forms);
    }

    let mut bodies: Vec<(u32, Vec<u8>)> = Vec::new();
    bodies.push((
        1,
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
    ));
    let kids = page_nums
        .iter()
        .map(|n| format!("{} 0 R", n))
        .collect::<Vec<_>>()
        .join(" ");
    bodies.push((
        2,
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids,
            pages.len()
        )
        .into_bytes(),
    ));
    bodies.push((
        font_num,
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    ));

    for (i, page) in pages.iter().enumerate() {
        let mut xobject_entries = String::new();
        for (k, _) in page.forms.iter().enumerate() {
            xobject_entries.push_str(&format!(" /Form{} {} 0 R", k + 1, form_nums[i][k]));
        }
        let xobjects = if xobject_entries.is_empty() {
            String::new()
        } else {
            format!(" /XObject <<{} >>", xobject_entries)
        };
        let [x0, y0, x1, y1] = page.media_box;
        bodies.push((
            page_nums[i],
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [{} {} {} {}] /Rotate {} /Contents {} 0 R /Resources << /Font << /F1 {} 0 R >>{} >> >>",
                x0, y0, x1, y1, page.rotate, content_nums[i], font_num, xobjects
            )
            .into_bytes(),
        ));
        bodies.push((
            content_nums[i],
            stream_body(page.content.as_bytes()),
        ));
        for (k, form) in page.forms.iter().enumerate() {
            let matrix = match form.matrix {
                Some([a, b, c, d, e, f]) => {
                    format!(" /Matrix [{} {} {} {} {} {}]", a, b, c, d, e, f)
                }
                None => String::new(),
            };
            let [fx0, fy0, fx1, fy1] = form.bbox;
            let dict = format!(
                "<< /Type /XObject /Subtype /Form /BBox [{} {} {} {}]{} /Resources << /Font << /F1 {} 0 R >> >> /Length {} >>",
                fx0, fy0, fx1, fy1, matrix, font_num, form.content.len()
            );
            let mut body = dict.into_bytes();
            body.extend_from_slice(b"\nstream\n");
            body.extend_from_slice(form.content.as_bytes());
            body.extend_from_slice(b"\nendstream");
            bodies.push((form_nums[i][k], body));
        }
    }

    let mut pdf = Vec::new();
    pdf.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets: Vec<(u32, usize)> = Vec::new();
    for (num, body) in &bodies {
        offsets.push((*num, pdf.len()));
        pdf.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    }

    let size = next;
    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for num in 1..size {
        match offsets.iter().find(|(n, _)| *n == num) {
            Some((_, off)) => {
                pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes())
            }
            None => pdf.extend_from_slice(b"0000000000 65535 f \n"),
        }
    }
    pdf.extend_from_slice(format!("trailer\n<< /Size {} /Root 1 0 R >>\n", size).as_bytes());
    pdf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    pdf
}

fn stream_body(content: &[u8]) -> Vec<u8> {
    let mut body = format!("<< /Length {} >>", content.len()).into_bytes();
    body.extend_from_slice(b"\nstream\n");
    body.extend_from_slice(content);
    body.extend_from_slice(b"\nendstream");
    body
}

/// Concatenated text of every page.
pub fn extract_all_text(bytes: &[u8]) -> String {
    let mut doc = PdfDocument::open(bytes.to_vec()).expect("output must open");
    let mut out = String::new();
    for index in 0..doc.page_count() {
        let page = doc.get_page(index).unwrap();
        for item in page.extract_text(doc.xref_mut()).unwrap() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&item.text);
        }
    }
    out
}

/// Decoded content bytes of one page.
pub fn page_content(bytes: &[u8], index: usize) -> Vec<u8> {
    let mut doc = PdfDocument::open(bytes.to_vec()).expect("document must open");
    let page = doc.get_page(index).unwrap();
    page.content_bytes(doc.xref_mut()).unwrap()
}

/// Fully parsed operations of one page (device-space geometry).
pub fn page_operations(bytes: &[u8], index: usize) -> Vec<Operation> {
    let mut doc = PdfDocument::open(bytes.to_vec()).expect("document must open");
    let page = doc.get_page(index).unwrap();
    let content = page.content_bytes(doc.xref_mut()).unwrap();
    let geometry = page.geometry().unwrap();
    let parsed = parse_content(
        &content,
        page.resources(),
        &geometry,
        doc.xref_mut(),
        &ContentParserOptions::default(),
        None,
    )
    .unwrap();
    parsed.ops
}

/// Every glyph on a page as `(code, center_x, center_y)` in device space,
/// including glyphs inside form XObjects.
pub fn page_glyph_centers(bytes: &[u8], index: usize) -> Vec<(u32, f64, f64)> {
    fn walk(ops: &[Operation], out: &mut Vec<(u32, f64, f64)>) {
        for op in ops {
            match op {
                Operation::TextShow(text) => {
                    for glyph in &text.glyphs {
                        let (cx, cy) = glyph.center();
                        out.push((glyph.code, cx, cy));
                    }
                }
                Operation::XObject(xop) => {
                    if let pdf_redact_core::content::ops::XObjectKind::Form { children, .. } =
                        &xop.kind
                    {
                        walk(children, out);
                    }
                }
                _ => {}
            }
        }
    }
    let ops = page_operations(bytes, index);
    let mut out = Vec::new();
    walk(&ops, &mut out);
    out
}
