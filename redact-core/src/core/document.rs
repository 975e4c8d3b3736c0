//! Document model.
//!
//! Opens a PDF from owned bytes, resolves the page tree (with attribute
//! inheritance), and hands out [`Page`]s. The document owns the xref and
//! its object cache; everything dies with the `redact` call that created
//! it - no state is keyed by file path.

use super::error::{RedactError, RedactResult};
use super::page::Page;
use super::parser::{Dict, ObjRef, PdfObject};
use super::stream::Stream;
use super::xref::XRef;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Fallback version when the header is unreadable.
const DEFAULT_VERSION: &str = "1.7";

/// Attributes inheritable through the page tree.
#[derive(Debug, Clone, Default)]
struct Inherited {
    media_box: Option<[f64; 4]>,
    rotate: Option<i64>,
    resources: Option<Dict>,
}

#[derive(Debug, Clone)]
struct PageSlot {
    dict: Dict,
    page_ref: Option<ObjRef>,
    inherited: Inherited,
}

/// An opened PDF document.
pub struct PdfDocument {
    xref: XRef,
    pages: Vec<PageSlot>,
    version: String,
}

impl PdfDocument {
    /// Opens a document from owned bytes.
    pub fn open(bytes: Vec<u8>) -> RedactResult<Self> {
        Self::open_shared(Arc::new(bytes))
    }

    /// Opens a document over shared bytes (parallel page workers reuse the
    /// same allocation).
    pub fn open_shared(bytes: Arc<Vec<u8>>) -> RedactResult<Self> {
        let header_version = parse_header_version(&bytes);
        let stream = Stream::new(bytes);
        let mut xref = XRef::parse(stream)?;

        if xref.trailer().contains_key("Encrypt") {
            return Err(RedactError::Unsupported {
                feature: "encrypted documents".to_string(),
            });
        }

        // The catalog may override the header version
        let version = {
            let root = xref
                .trailer()
                .get("Root")
                .and_then(PdfObject::as_ref)
                .ok_or_else(|| RedactError::xref_error("trailer has no /Root"))?;
            let catalog = xref.fetch(root.num, root.generation)?;
            let catalog_version = catalog
                .as_dict()
                .and_then(|d| d.get("Version"))
                .and_then(PdfObject::as_name)
                .map(str::to_string);
            catalog_version
                .or(header_version)
                .unwrap_or_else(|| DEFAULT_VERSION.to_string())
        };

        let pages = collect_pages(&mut xref)?;

        Ok(PdfDocument {
            xref,
            pages,
            version,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The declared PDF version, e.g. `"1.4"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn xref(&self) -> &XRef {
        &self.xref
    }

    pub fn xref_mut(&mut self) -> &mut XRef {
        &mut self.xref
    }

    pub fn trailer(&self) -> &Dict {
        self.xref.trailer()
    }

    /// Builds the fully resolved page at `index`.
    pub fn get_page(&mut self, index: usize) -> RedactResult<Page> {
        let slot = self
            .pages
            .get(index)
            .cloned()
            .ok_or_else(|| RedactError::page_error(format!("no page {}", index)))?;

        let media_box = match slot.inherited.media_box {
            Some(mb) => mb,
            None => [0.0, 0.0, 612.0, 792.0], // US Letter fallback
        };
        let rotation = slot.inherited.rotate.unwrap_or(0);
        let resources = slot.inherited.resources.clone().unwrap_or_default();

        Ok(Page::new(
            index,
            slot.dict,
            slot.page_ref,
            media_box,
            rotation,
            resources,
        ))
    }
}

fn parse_header_version(bytes: &[u8]) -> Option<String> {
    // %PDF-x.y possibly preceded by junk in the first kilobyte
    let window = &bytes[..bytes.len().min(1024)];
    let pos = super::parser::find_keyword(window, 0, b"%PDF-")?;
    let tail = &window[pos + 5..];
    let end = tail
        .iter()
        .position(|b| !(b.is_ascii_digit() || *b == b'.'))
        .unwrap_or(tail.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Walks the page tree in order, carrying inherited attributes.
fn collect_pages(xref: &mut XRef) -> RedactResult<Vec<PageSlot>> {
    let root = xref
        .trailer()
        .get("Root")
        .and_then(PdfObject::as_ref)
        .ok_or_else(|| RedactError::xref_error("trailer has no /Root"))?;
    let catalog = xref.fetch(root.num, root.generation)?;
    let pages_obj = catalog
        .as_dict()
        .and_then(|d| d.get("Pages"))
        .cloned()
        .ok_or_else(|| RedactError::page_error("catalog has no /Pages"))?;

    let mut pages = Vec::new();
    let mut visited = FxHashSet::default();
    walk(
        xref,
        &pages_obj,
        Inherited::default(),
        &mut visited,
        &mut pages,
        0,
    )?;
    Ok(pages)
}

fn walk(
    xref: &mut XRef,
    node_obj: &PdfObject,
    inherited: Inherited,
    visited: &mut FxHashSet<ObjRef>,
    pages: &mut Vec<PageSlot>,
    depth: u32,
) -> RedactResult<()> {
    if depth > 64 {
        return Err(RedactError::page_error("page tree too deep"));
    }
    let node_ref = node_obj.as_ref();
    if let Some(r) = node_ref {
        if !visited.insert(r) {
            return Err(RedactError::page_error("page tree cycle"));
        }
    }

    let node = xref.resolve(node_obj)?;
    let Some(dict) = node.as_dict() else {
        return Ok(()); // tolerate junk kids
    };
    let dict = dict.clone();

    let mut next = inherited;
    if let Some(mb) = media_box_from(xref, &dict)? {
        next.media_box = Some(mb);
    }
    if let Some(PdfObject::Number(r)) = dict.get("Rotate") {
        next.rotate = Some(*r as i64);
    } else if let Some(PdfObject::Ref(_)) = dict.get("Rotate") {
        if let PdfObject::Number(r) = xref.resolve_dict_entry(&dict, "Rotate")? {
            next.rotate = Some(r as i64);
        }
    }
    if let PdfObject::Dictionary(res) = xref.resolve_dict_entry(&dict, "Resources")? {
        next.resources = Some(res);
    }

    match dict.get("Type").and_then(PdfObject::as_name) {
        Some("Page") => {
            pages.push(PageSlot {
                dict,
                page_ref: node_ref,
                inherited: next,
            });
        }
        _ => {
            // Pages node (or missing /Type, treated as a tree node)
            let kids = xref.resolve_dict_entry(&dict, "Kids")?;
            if let Some(kids) = kids.as_array() {
                let kids: Vec<PdfObject> = kids.to_vec();
                for kid in &kids {
                    walk(xref, kid, next.clone(), visited, pages, depth + 1)?;
                }
            }
        }
    }
    Ok(())
}

fn media_box_from(xref: &mut XRef, dict: &Dict) -> RedactResult<Option<[f64; 4]>> {
    let obj = xref.resolve_dict_entry(dict, "MediaBox")?;
    let Some(arr) = obj.as_array() else {
        return Ok(None);
    };
    if arr.len() < 4 {
        return Ok(None);
    }
    let mut mb = [0.0; 4];
    for (i, slot) in mb.iter_mut().enumerate() {
        match xref.resolve(&arr[i])?.as_number() {
            Some(n) if n.is_finite() => *slot = n,
            _ => return Ok(None),
        }
    }
    Ok(Some(mb))
}
