//! # pdf-redact-core: forensically sound PDF redaction
//!
//! Given a PDF and rectangular regions on specific pages, this crate
//! produces a new PDF in which every glyph, inline image and form-XObject
//! fragment whose painted geometry falls inside a region has been removed
//! from the page content streams, with an opaque black rectangle painted
//! over each region. The removal is structural: redacted content does not
//! survive extraction by any downstream text-recovery tool. The input
//! file is never modified.
//!
//! ## Quick start
//!
//! ```no_run
//! use pdf_redact_core::coords::Rect;
//! use pdf_redact_core::redaction::{redact, PageRedaction, RedactionPlan};
//!
//! let plan = RedactionPlan::new(vec![PageRedaction {
//!     index: 0,
//!     // Device space: top-left origin, 72 DPI, page rotation applied
//!     rectangles: vec![Rect::new(72.0, 680.0, 120.0, 20.0)],
//!     dpi_hint: 72.0,
//! }]);
//!
//! let report = redact(
//!     "input.pdf".as_ref(),
//!     "output.pdf".as_ref(),
//!     &plan,
//! )?;
//! assert!(report.success);
//! # Ok::<(), pdf_redact_core::core::RedactError>(())
//! ```
//!
//! ## Architecture
//!
//! The pipeline has four tightly coupled stages:
//!
//! 1. **Content-stream parser** ([`content::content_parser`]): decodes the
//!    operator sequence of a page (descending into Form XObjects) into a
//!    typed operation stream, each paint carrying its device-space bbox.
//! 2. **Glyph-level filter** ([`content::filter`]): keeps or drops
//!    operation by operation; text operators are split glyph by glyph
//!    around the redacted runs, using glyph centers as the tie-break.
//! 3. **Serializer** ([`content::serializer`]): re-emits a valid content
//!    stream, repositioning kept runs with synthetic `Td`s and appending
//!    the opaque covers.
//! 4. **Coordinate reconciler** ([`coords`]): keeps image pixels, viewer
//!    space and page device space apart as distinct types.
//!
//! A full-rewrite writer ([`core::writer`]) then emits the output
//! document - never an incremental update, which would leave the original
//! bytes recoverable - and the verifier ([`redaction::verify`]) re-parses
//! the result to prove the redaction held.
//!
//! ## Guarantees
//!
//! - The input file's bytes and modification time are never changed.
//! - `redact` is deterministic: identical inputs produce byte-identical
//!   outputs, in sequential and parallel mode both.
//! - Every dropped operation, unknown font and verification leak is
//!   attributed in the report; nothing is silent.

pub mod content;
pub mod coords;
pub mod core;
pub mod redaction;

pub use self::coords::{
    compose, device_to_image, image_to_device, user_to_device, BBox, DeviceRect, ImageRect,
    Matrix, PageGeometry, Rect, UserRect,
};
pub use self::core::{PdfDocument, RedactError, RedactResult};
pub use self::redaction::{
    redact, redact_bytes, redact_with, CancelToken, PageRedaction, PageReport, PageStatus,
    RedactOptions, RedactReport, RedactionPlan,
};
