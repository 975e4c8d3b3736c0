//! Redaction plans and options.
//!
//! A [`RedactionPlan`] is built once by the caller and consumed read-only
//! by the pipeline and the verifier. Rectangles arrive in image pixels at
//! `dpi_hint` (72 means they are already points) with top-left origin and
//! page rotation applied, and are normalized to device space before any
//! filtering.

use crate::coords::{image_to_device, DeviceRect, ImageRect, PageGeometry, Rect};
use crate::core::error::{RedactError, RedactResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn default_dpi_hint() -> f64 {
    72.0
}

fn default_true() -> bool {
    true
}

fn default_depth() -> u32 {
    crate::content::content_parser::DEFAULT_XOBJECT_DEPTH
}

/// Rectangles to redact on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRedaction {
    pub index: u32,
    pub rectangles: Vec<Rect>,
    /// Render DPI the rectangles were measured at; 72 = points
    #[serde(default = "default_dpi_hint")]
    pub dpi_hint: f64,
}

/// The immutable redaction plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionPlan {
    pub pages: Vec<PageRedaction>,
    #[serde(default = "default_true")]
    pub draw_black_box: bool,
    #[serde(default = "default_true")]
    pub verify_after: bool,
    #[serde(default = "default_depth")]
    pub max_xobject_depth: u32,
}

impl RedactionPlan {
    /// A plan with default options.
    pub fn new(pages: Vec<PageRedaction>) -> Self {
        RedactionPlan {
            pages,
            draw_black_box: true,
            verify_after: true,
            max_xobject_depth: default_depth(),
        }
    }

    /// Distinct page indices referenced by the plan, ascending.
    pub fn page_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.pages.iter().map(|p| p.index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Checks plan preconditions against a document.
    pub fn validate(&self, page_count: usize) -> RedactResult<()> {
        for page in &self.pages {
            if page.index as usize >= page_count {
                return Err(RedactError::page_error(format!(
                    "plan references page {} but the document has {} pages",
                    page.index, page_count
                )));
            }
            if !page.dpi_hint.is_finite() || page.dpi_hint <= 0.0 {
                return Err(RedactError::invalid_coordinate(format!(
                    "dpi_hint {} on page {}",
                    page.dpi_hint, page.index
                )));
            }
            for rect in &page.rectangles {
                if !rect.is_finite() || rect.width < 0.0 || rect.height < 0.0 {
                    return Err(RedactError::invalid_coordinate(format!(
                        "bad rectangle on page {}",
                        page.index
                    )));
                }
            }
        }
        Ok(())
    }

    /// All of a page's rectangles, normalized to device space. Entries for
    /// the same page are merged, exact duplicates collapse, and rectangle
    /// order is irrelevant downstream.
    pub fn device_rects(
        &self,
        page_index: u32,
        geometry: &PageGeometry,
    ) -> RedactResult<Vec<DeviceRect>> {
        let mut rects: Vec<DeviceRect> = Vec::new();
        for page in self.pages.iter().filter(|p| p.index == page_index) {
            for rect in &page.rectangles {
                let image = ImageRect {
                    rect: *rect,
                    dpi: page.dpi_hint,
                };
                let device = image_to_device(&image, geometry)?;
                if !rects.contains(&device) {
                    rects.push(device);
                }
            }
        }
        Ok(rects)
    }
}

/// Cooperative cancellation flag, polled at page boundaries and roughly
/// every thousand operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Pipeline execution options, separate from the plan itself.
#[derive(Debug, Clone, Default)]
pub struct RedactOptions {
    /// Process pages on worker threads; output bytes are identical to the
    /// sequential mode.
    pub parallel: bool,
    pub cancel: Option<CancelToken>,
}
