pub mod pipeline;
pub mod plan;
pub mod verify;

pub use pipeline::{redact, redact_bytes, redact_with, PageReport, PageStatus, RedactReport};
pub use plan::{CancelToken, PageRedaction, RedactOptions, RedactionPlan};
pub use verify::{verify_output, Leak};
