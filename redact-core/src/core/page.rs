//! Page model.
//!
//! A [`Page`] carries everything the redaction pipeline needs from the
//! page tree: MediaBox, rotation and resources (inheritance through
//! `/Pages` nodes already applied), the content-stream references, and the
//! decoded content bytes. Multiple content streams are concatenated with a
//! single whitespace byte, matching how readers execute them.

use super::decode::decode_stream_dict;
use super::error::RedactResult;
use super::parser::{Dict, ObjRef, PdfObject};
use super::xref::XRef;
use crate::content::content_parser::{parse_content, ContentParserOptions};
use crate::content::ops::{Operation, XObjectKind};
use crate::coords::PageGeometry;

/// A positioned piece of extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub font_name: Option<String>,
    pub font_size: f64,
    /// Device-space position of the first glyph (left edge, baseline area)
    pub x: f64,
    pub y: f64,
}

/// One page, fully resolved.
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,
    dict: Dict,
    page_ref: Option<ObjRef>,
    media_box: [f64; 4],
    rotation: i64,
    resources: Dict,
}

impl Page {
    pub fn new(
        index: usize,
        dict: Dict,
        page_ref: Option<ObjRef>,
        media_box: [f64; 4],
        rotation: i64,
        resources: Dict,
    ) -> Self {
        Page {
            index,
            dict,
            page_ref,
            media_box,
            rotation,
            resources,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dict(&self) -> &Dict {
        &self.dict
    }

    pub fn reference(&self) -> Option<ObjRef> {
        self.page_ref
    }

    /// `[x0 y0 x1 y1]`, normalized so x0 <= x1 and y0 <= y1.
    pub fn media_box(&self) -> [f64; 4] {
        let [x0, y0, x1, y1] = self.media_box;
        [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
    }

    pub fn rotation(&self) -> i64 {
        self.rotation
    }

    pub fn resources(&self) -> &Dict {
        &self.resources
    }

    /// Page geometry for coordinate reconciliation.
    pub fn geometry(&self) -> RedactResult<PageGeometry> {
        let [x0, y0, x1, y1] = self.media_box();
        PageGeometry::new(x0, y0, x1 - x0, y1 - y0, self.rotation)
    }

    /// Object ids of the page's content streams, in execution order.
    pub fn content_refs(&self, xref: &mut XRef) -> RedactResult<Vec<ObjRef>> {
        let mut refs = Vec::new();
        match self.dict.get("Contents") {
            None => {}
            Some(PdfObject::Ref(r)) => {
                // A reference to either a stream or an array of streams
                match &*xref.fetch(r.num, r.generation)? {
                    PdfObject::Array(items) => {
                        refs.extend(items.iter().filter_map(PdfObject::as_ref));
                    }
                    _ => refs.push(*r),
                }
            }
            Some(PdfObject::Array(items)) => {
                refs.extend(items.iter().filter_map(PdfObject::as_ref));
            }
            Some(_) => {}
        }
        Ok(refs)
    }

    /// Decoded content bytes, streams joined with one whitespace byte.
    pub fn content_bytes(&self, xref: &mut XRef) -> RedactResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut first = true;

        let mut append = |obj: &PdfObject, out: &mut Vec<u8>, first: &mut bool| -> RedactResult<()> {
            if let PdfObject::Stream { dict, raw } = obj {
                let decoded = decode_stream_dict(dict, raw)?;
                if !*first {
                    out.push(b'\n');
                }
                out.extend_from_slice(&decoded);
                *first = false;
            }
            Ok(())
        };

        for r in self.content_refs(xref)? {
            let obj = xref.fetch(r.num, r.generation)?;
            append(&obj, &mut out, &mut first)?;
        }
        // Direct (non-reference) stream, tolerated even though the spec
        // requires an indirect object here
        if let Some(obj @ PdfObject::Stream { .. }) = self.dict.get("Contents") {
            append(obj, &mut out, &mut first)?;
        }
        Ok(out)
    }

    /// Extracts positioned text by interpreting the content stream.
    pub fn extract_text(&self, xref: &mut XRef) -> RedactResult<Vec<TextItem>> {
        let content = self.content_bytes(xref)?;
        let geometry = self.geometry()?;
        let parsed = parse_content(
            &content,
            &self.resources,
            &geometry,
            xref,
            &ContentParserOptions::default(),
            None,
        )?;
        let mut items = Vec::new();
        collect_text(&parsed.ops, &mut items);
        Ok(items)
    }
}

fn collect_text(ops: &[Operation], items: &mut Vec<TextItem>) {
    for op in ops {
        match op {
            Operation::TextShow(text) => {
                if text.glyphs.is_empty() {
                    continue;
                }
                let string: String = text.glyphs.iter().filter_map(|g| g.unicode).collect();
                let first = &text.glyphs[0];
                items.push(TextItem {
                    text: string,
                    font_name: if text.font_name.is_empty() {
                        None
                    } else {
                        Some(text.font_name.clone())
                    },
                    font_size: text.font_size,
                    x: first.bbox.x0,
                    y: first.bbox.y1,
                });
            }
            Operation::XObject(xobject) => {
                if let XObjectKind::Form { children, .. } = &xobject.kind {
                    collect_text(children, items);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::Stream;

    fn doc_with_page(content: &str) -> (XRef, Page) {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let obj1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2 = pdf.len();
        pdf.extend_from_slice(
            b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n",
        );
        let obj3 = pdf.len();
        pdf.extend_from_slice(
            b"3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>\nendobj\n",
        );
        let obj4 = pdf.len();
        pdf.extend_from_slice(
            format!(
                "4 0 obj\n<< /Length {} >>\nstream\n{}\nendstream\nendobj\n",
                content.len(),
                content
            )
            .as_bytes(),
        );
        let xref_offset = pdf.len();
        pdf.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
        for off in [obj1, obj2, obj3, obj4] {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        pdf.extend_from_slice(b"trailer\n<< /Size 5 /Root 1 0 R >>\n");
        pdf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        let mut xref = XRef::parse(Stream::from_bytes(pdf)).unwrap();
        let page_dict = (*xref.fetch(3, 0).unwrap()).clone();
        let dict = match page_dict {
            PdfObject::Dictionary(d) => d,
            _ => panic!("page is not a dict"),
        };
        let page = Page::new(
            0,
            dict,
            Some(ObjRef {
                num: 3,
                generation: 0,
            }),
            [0.0, 0.0, 612.0, 792.0],
            0,
            Dict::default(),
        );
        (xref, page)
    }

    #[test]
    fn test_content_bytes() {
        let (mut xref, page) = doc_with_page("BT (hi) Tj ET");
        assert_eq!(page.content_bytes(&mut xref).unwrap(), b"BT (hi) Tj ET");
        assert_eq!(
            page.content_refs(&mut xref).unwrap(),
            vec![ObjRef {
                num: 4,
                generation: 0
            }]
        );
    }

    #[test]
    fn test_geometry_normalizes_media_box() {
        let page = Page::new(0, Dict::default(), None, [612.0, 792.0, 0.0, 0.0], 90, Dict::default());
        let geometry = page.geometry().unwrap();
        assert_eq!(geometry.width, 612.0);
        assert_eq!(geometry.height, 792.0);
        assert_eq!(geometry.rotation, 90);
    }

    #[test]
    fn test_extract_text_positions() {
        let (mut xref, page) = doc_with_page("BT /F1 12 Tf 72 100 Td (Hi) Tj ET");
        let items = page.extract_text(&mut xref).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "Hi");
        assert_eq!(items[0].font_size, 12.0);
        assert!((items[0].x - 72.0).abs() < 1e-6);
    }
}
