//! The redaction pipeline.
//!
//! `redact` ties the stages together: open a read-only view of the input,
//! parse each planned page, filter, serialize, rewrite the document, then
//! verify. The input path is never written; per-page failures are recorded
//! and the remaining pages proceed; document-level failures abort with no
//! output file.

use super::plan::{RedactOptions, RedactionPlan};
use super::verify::{verify_output, Leak};
use crate::content::content_parser::{parse_content, ContentParserOptions};
use crate::content::filter::{filter_operations, FilteredOp, FilterStats};
use crate::content::ops::{Operation, XObjectKind};
use crate::content::serializer::serialize_content;
use crate::core::document::PdfDocument;
use crate::core::error::{RedactError, RedactResult};
use crate::core::parser::{Dict, ObjRef, PdfObject};
use crate::core::writer::write_document;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PageStatus {
    Redacted {
        ops_dropped: u32,
        glyphs_dropped: u32,
        images_dropped: u32,
        xobjects_flattened: u32,
    },
    /// The page parsed but nothing intersected the rectangles; the
    /// black boxes (if requested) were still painted.
    Untouched,
    ParseFailure {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub index: u32,
    pub status: PageStatus,
    pub leaks: Vec<Leak>,
}

/// The overall result of a `redact` call.
#[derive(Debug, Clone, Serialize)]
pub struct RedactReport {
    pub success: bool,
    pub per_page: Vec<PageReport>,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
}

/// Redacts `input_path` into `output_path` with default options.
pub fn redact(
    input_path: &Path,
    output_path: &Path,
    plan: &RedactionPlan,
) -> RedactResult<RedactReport> {
    redact_with(input_path, output_path, plan, &RedactOptions::default())
}

/// Redacts `input_path` into `output_path`.
///
/// The input file is opened read-only and its handle is released before
/// the output is created; on any document-level error no output file is
/// produced.
pub fn redact_with(
    input_path: &Path,
    output_path: &Path,
    plan: &RedactionPlan,
    options: &RedactOptions,
) -> RedactResult<RedactReport> {
    ensure_distinct_paths(input_path, output_path)?;

    let bytes = std::fs::read(input_path).map_err(|e| RedactError::InputUnreadable {
        path: input_path.display().to_string(),
        reason: e.to_string(),
    })?;

    let (output, report) = redact_bytes(Arc::new(bytes), plan, options)?;

    std::fs::write(output_path, &output).map_err(|e| RedactError::OutputUnwritable {
        path: output_path.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(report)
}

/// The pure core: `(input bytes, plan) -> (output bytes, report)`.
pub fn redact_bytes(
    input: Arc<Vec<u8>>,
    plan: &RedactionPlan,
    options: &RedactOptions,
) -> RedactResult<(Vec<u8>, RedactReport)> {
    let started = Instant::now();

    let mut doc = PdfDocument::open_shared(Arc::clone(&input))?;
    plan.validate(doc.page_count())?;
    let indices = plan.page_indices();

    let outcomes = if options.parallel && indices.len() > 1 {
        process_pages_parallel(&input, plan, options, &indices)?
    } else {
        let mut outcomes = Vec::with_capacity(indices.len());
        for &index in &indices {
            check_cancel(options)?;
            outcomes.push(process_page(&mut doc, plan, options, index)?);
        }
        outcomes
    };
    check_cancel(options)?;

    let (output, mut warnings) = assemble_output(&mut doc, &indices, &outcomes)?;

    let mut per_page: Vec<PageReport> = outcomes
        .iter()
        .map(|o| PageReport {
            index: o.index,
            status: o.status.clone(),
            leaks: Vec::new(),
        })
        .collect();
    for outcome in &outcomes {
        warnings.extend(outcome.warnings.iter().cloned());
    }

    let mut success = !per_page
        .iter()
        .any(|p| matches!(p.status, PageStatus::ParseFailure { .. }));

    if plan.verify_after {
        match verify_output(&output, plan) {
            Ok(leaks) => {
                if !leaks.is_empty() {
                    success = false;
                }
                for leak in leaks {
                    match per_page.iter_mut().find(|p| p.index == leak.page) {
                        Some(page) => page.leaks.push(leak),
                        None => warnings.push(format!(
                            "verification leak on unplanned page {}: {}",
                            leak.page, leak.detail
                        )),
                    }
                }
            }
            Err(e) => {
                success = false;
                warnings.push(format!("verification could not run: {}", e));
            }
        }
    }

    let report = RedactReport {
        success,
        per_page,
        duration_ms: started.elapsed().as_millis() as u64,
        warnings,
    };
    Ok((output, report))
}

fn ensure_distinct_paths(input: &Path, output: &Path) -> RedactResult<()> {
    let same = if input == output {
        true
    } else {
        match (std::fs::canonicalize(input), std::fs::canonicalize(output)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    };
    if same {
        return Err(RedactError::OutputUnwritable {
            path: output.display().to_string(),
            reason: "output path must differ from input path".to_string(),
        });
    }
    Ok(())
}

fn check_cancel(options: &RedactOptions) -> RedactResult<()> {
    if let Some(token) = &options.cancel {
        if token.is_cancelled() {
            return Err(RedactError::Cancelled);
        }
    }
    Ok(())
}

/// Everything `assemble_output` needs to know about one processed page.
#[derive(Debug, Clone)]
struct PageOutcome {
    index: u32,
    status: PageStatus,
    warnings: Vec<String>,
    /// The rewritten content stream (also present when only black boxes
    /// were added)
    new_content: Option<Vec<u8>>,
    page_ref: Option<ObjRef>,
    page_dict: Dict,
    content_refs: Vec<ObjRef>,
    updated_resources: Option<Dict>,
    /// XObject stream objects whose invocations were flattened here
    flattened: Vec<ObjRef>,
    /// XObject stream objects with surviving `Do` invocations here
    survived: Vec<ObjRef>,
}

fn process_pages_parallel(
    input: &Arc<Vec<u8>>,
    plan: &RedactionPlan,
    options: &RedactOptions,
    indices: &[u32],
) -> RedactResult<Vec<PageOutcome>> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .min(indices.len());
    let chunk_size = indices.len().div_ceil(workers);

    let results: Vec<RedactResult<Vec<PageOutcome>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = indices
            .chunks(chunk_size)
            .map(|chunk| {
                let bytes = Arc::clone(input);
                scope.spawn(move || -> RedactResult<Vec<PageOutcome>> {
                    let mut doc = PdfDocument::open_shared(bytes)?;
                    let mut outcomes = Vec::with_capacity(chunk.len());
                    for &index in chunk {
                        check_cancel(options)?;
                        outcomes.push(process_page(&mut doc, plan, options, index)?);
                    }
                    Ok(outcomes)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("page worker panicked"))
            .collect()
    });

    let mut outcomes = Vec::new();
    for result in results {
        outcomes.extend(result?);
    }
    // Chunks preserve plan order, but make the invariant explicit
    outcomes.sort_by_key(|o| o.index);
    Ok(outcomes)
}

/// Parse, filter and serialize one page. Only cancellation aborts; any
/// other failure becomes a per-page status.
fn process_page(
    doc: &mut PdfDocument,
    plan: &RedactionPlan,
    options: &RedactOptions,
    index: u32,
) -> RedactResult<PageOutcome> {
    let page = match doc.get_page(index as usize) {
        Ok(p) => p,
        Err(e) => return Ok(failed_outcome(index, e)),
    };
    let page_ref = page.reference();
    let page_dict = page.dict().clone();

    let inner = (|| -> RedactResult<PageOutcome> {
        let geometry = page.geometry()?;
        let rects = plan.device_rects(index, &geometry)?;
        let content = page.content_bytes(doc.xref_mut())?;
        let content_refs = page.content_refs(doc.xref_mut())?;

        let cancel_flag = options.cancel.clone();
        let cancel_fn = move || {
            cancel_flag
                .as_ref()
                .map(|t| t.is_cancelled())
                .unwrap_or(false)
        };
        let parsed = parse_content(
            &content,
            page.resources(),
            &geometry,
            doc.xref_mut(),
            &ContentParserOptions {
                max_xobject_depth: plan.max_xobject_depth,
            },
            Some(&cancel_fn),
        )?;

        let mut warnings = Vec::new();
        if parsed.warnings.lexical_errors > 0 {
            warnings.push(format!(
                "page {}: {} lexical anomalies recovered",
                index, parsed.warnings.lexical_errors
            ));
        }
        for font in &parsed.warnings.unknown_fonts {
            warnings.push(format!("page {}: unknown font /{}", index, font));
        }
        if parsed.warnings.state_underflows > 0 {
            warnings.push(format!(
                "page {}: {} unbalanced restores",
                index, parsed.warnings.state_underflows
            ));
        }

        let (filtered, stats) = filter_operations(parsed.ops, &rects);
        let new_content = serialize_content(&filtered, &rects, &geometry, plan.draw_black_box);

        let mut flattened = Vec::new();
        let mut survived = Vec::new();
        let mut flattened_names = Vec::new();
        let mut survived_names = Vec::new();
        collect_xobject_fates(
            &filtered,
            &mut flattened,
            &mut survived,
            &mut flattened_names,
            &mut survived_names,
        );

        let updated_resources = build_updated_resources(
            &page,
            &filtered,
            &flattened_names,
            &survived_names,
            &mut warnings,
        );

        let status = if stats.changed() {
            status_from_stats(&stats)
        } else {
            PageStatus::Untouched
        };

        Ok(PageOutcome {
            index,
            status,
            warnings,
            new_content: Some(new_content),
            page_ref,
            page_dict: page_dict.clone(),
            content_refs,
            updated_resources,
            flattened,
            survived,
        })
    })();

    match inner {
        Ok(outcome) => Ok(outcome),
        Err(RedactError::Cancelled) => Err(RedactError::Cancelled),
        Err(e) => Ok(failed_outcome(index, e)),
    }
}

fn failed_outcome(index: u32, error: RedactError) -> PageOutcome {
    PageOutcome {
        index,
        status: PageStatus::ParseFailure {
            reason: error.to_string(),
        },
        warnings: Vec::new(),
        new_content: None,
        page_ref: None,
        page_dict: Dict::default(),
        content_refs: Vec::new(),
        updated_resources: None,
        flattened: Vec::new(),
        survived: Vec::new(),
    }
}

fn status_from_stats(stats: &FilterStats) -> PageStatus {
    PageStatus::Redacted {
        ops_dropped: stats.ops_dropped,
        glyphs_dropped: stats.glyphs_dropped,
        images_dropped: stats.images_dropped,
        xobjects_flattened: stats.xobjects_flattened,
    }
}

/// Walks the filtered tree recording which XObject streams had surviving
/// invocations and which were flattened away.
fn collect_xobject_fates(
    ops: &[FilteredOp],
    flattened: &mut Vec<ObjRef>,
    survived: &mut Vec<ObjRef>,
    flattened_names: &mut Vec<String>,
    survived_names: &mut Vec<String>,
) {
    for op in ops {
        match op {
            FilteredOp::Keep(Operation::XObject(xop)) => {
                if let Some(id) = xop.object {
                    survived.push(id);
                }
                survived_names.push(xop.name.clone());
            }
            FilteredOp::Flattened { op: xop, body } => {
                if let Some(id) = xop.object {
                    flattened.push(id);
                }
                flattened_names.push(xop.name.clone());
                collect_xobject_fates(body, flattened, survived, flattened_names, survived_names);
            }
            _ => {}
        }
    }
}

/// Merges flattened forms' resources into the page's and drops the names
/// of forms that no longer have a surviving invocation on this page.
fn build_updated_resources(
    page: &crate::core::page::Page,
    filtered: &[FilteredOp],
    flattened_names: &[String],
    survived_names: &[String],
    warnings: &mut Vec<String>,
) -> Option<Dict> {
    if flattened_names.is_empty() {
        return None;
    }
    let mut resources = page.resources().clone();

    // Bring the flattened forms' resources into page scope so the inlined
    // operators still resolve.
    let mut form_resources: Vec<Dict> = Vec::new();
    collect_flattened_resources(filtered, &mut form_resources);
    for form in &form_resources {
        for (category, entries) in form {
            let Some(entries) = entries.as_dict() else {
                continue;
            };
            let target = resources
                .entry(category.clone())
                .or_insert_with(|| PdfObject::Dictionary(Dict::default()));
            let PdfObject::Dictionary(target) = target else {
                continue;
            };
            for (name, value) in entries {
                if let Some(existing) = target.get(name) {
                    if existing != value {
                        warnings.push(format!(
                            "resource name /{} conflicts while flattening; page entry kept",
                            name
                        ));
                    }
                } else {
                    target.insert(name.clone(), value.clone());
                }
            }
        }
    }

    // Remove names whose every invocation was inlined
    if let Some(PdfObject::Dictionary(xobjects)) = resources.get_mut("XObject") {
        for name in flattened_names {
            if !survived_names.contains(name) {
                xobjects.remove(name);
            }
        }
    }

    Some(resources)
}

fn collect_flattened_resources(ops: &[FilteredOp], out: &mut Vec<Dict>) {
    for op in ops {
        if let FilteredOp::Flattened { op: xop, body } = op {
            if let XObjectKind::Form { resources, .. } = &xop.kind {
                out.push(resources.clone());
            }
            collect_flattened_resources(body, out);
        }
    }
}

/// Builds the replacement/removal sets and writes the document.
fn assemble_output(
    doc: &mut PdfDocument,
    planned: &[u32],
    outcomes: &[PageOutcome],
) -> RedactResult<(Vec<u8>, Vec<String>)> {
    let mut warnings = Vec::new();
    let planned_set: FxHashSet<u32> = planned.iter().copied().collect();

    // Objects the untouched pages still need
    let mut protected: FxHashSet<u32> = FxHashSet::default();
    for index in 0..doc.page_count() {
        if planned_set.contains(&(index as u32)) {
            continue;
        }
        let Ok(page) = doc.get_page(index) else {
            continue;
        };
        if let Ok(refs) = page.content_refs(doc.xref_mut()) {
            protected.extend(refs.iter().map(|r| r.num));
        }
        if let Ok(PdfObject::Dictionary(xobjects)) =
            doc.xref_mut().resolve_dict_entry(page.resources(), "XObject")
        {
            protected.extend(xobjects.values().filter_map(|v| v.as_ref()).map(|r| r.num));
        }
    }
    let survived_anywhere: FxHashSet<u32> = outcomes
        .iter()
        .flat_map(|o| o.survived.iter().map(|r| r.num))
        .collect();

    let mut replacements: FxHashMap<u32, PdfObject> = FxHashMap::default();
    let mut removals: FxHashSet<u32> = FxHashSet::default();
    let mut next_new_obj = doc.xref().len() as u32;

    for outcome in outcomes {
        let Some(new_content) = &outcome.new_content else {
            continue; // failed page keeps its original objects
        };

        let content_num = match outcome.content_refs.first() {
            Some(r) => r.num,
            None => {
                let num = next_new_obj;
                next_new_obj += 1;
                num
            }
        };
        replacements.insert(
            content_num,
            PdfObject::Stream {
                dict: Dict::default(),
                raw: new_content.clone(),
            },
        );
        for r in outcome.content_refs.iter().skip(1) {
            if !protected.contains(&r.num) {
                removals.insert(r.num);
            }
        }

        match outcome.page_ref {
            Some(page_ref) => {
                let mut dict = outcome.page_dict.clone();
                dict.insert(
                    "Contents".to_string(),
                    PdfObject::Ref(ObjRef {
                        num: content_num,
                        generation: 0,
                    }),
                );
                if let Some(resources) = &outcome.updated_resources {
                    dict.insert(
                        "Resources".to_string(),
                        PdfObject::Dictionary(resources.clone()),
                    );
                }
                replacements.insert(page_ref.num, PdfObject::Dictionary(dict));
            }
            None => warnings.push(format!(
                "page {} has no indirect object; content not replaceable",
                outcome.index
            )),
        }

        for id in &outcome.flattened {
            if !survived_anywhere.contains(&id.num) && !protected.contains(&id.num) {
                removals.insert(id.num);
            }
        }
    }

    // Replacements always win over removals
    for num in replacements.keys() {
        removals.remove(num);
    }

    let output = write_document(doc, &replacements, &removals)?;
    Ok((output, warnings))
}
