use std::fmt;

/// Universal error type for redaction operations.
///
/// Covers the whole pipeline: PDF file parsing, content-stream
/// interpretation, coordinate handling, writing and verification.
#[derive(Debug, Clone, PartialEq)]
pub enum RedactError {
    /// End of stream reached unexpectedly
    UnexpectedEndOfStream,

    /// Invalid byte range requested from a stream view
    InvalidByteRange { begin: usize, end: usize },

    /// Invalid stream position
    InvalidPosition { pos: usize, length: usize },

    /// Invalid PDF object encountered
    InvalidObject { expected: String, found: String },

    /// A rectangle or point with non-finite or negative components,
    /// or a non-positive DPI
    InvalidCoordinate { reason: String },

    /// Page rotation other than 0, 90, 180 or 270
    UnsupportedRotation { rotation: i64 },

    /// The input file could not be opened or read
    InputUnreadable { path: String, reason: String },

    /// The output file could not be created or written
    OutputUnwritable { path: String, reason: String },

    /// Parse error attributed to a byte offset in the stream being parsed
    ParseFailure { byte_offset: usize, reason: String },

    /// Nested Form XObjects exceeded the configured depth limit
    XObjectRecursionLimit { limit: u32 },

    /// A Form XObject directly or indirectly invokes itself
    XObjectCycle { name: String },

    /// A font referenced by a text operator was missing from the resources
    UnknownFont { name: String },

    /// Redacted content survived in the written output
    VerificationLeak { page: u32, detail: String },

    /// The caller cancelled the operation
    Cancelled,

    /// Cross-reference table errors
    XRefError { message: String },

    /// Page tree errors
    PageError { message: String },

    /// Stream decode failed (FlateDecode, LZWDecode, ASCII filters)
    StreamError(String),

    /// Feature present in the file but out of scope (e.g. encryption)
    Unsupported { feature: String },

    /// Generic error with message
    Generic(String),
}

impl fmt::Display for RedactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedactError::UnexpectedEndOfStream => {
                write!(f, "Unexpected end of stream")
            }
            RedactError::InvalidByteRange { begin, end } => {
                write!(f, "Invalid byte range: {}..{}", begin, end)
            }
            RedactError::InvalidPosition { pos, length } => {
                write!(f, "Invalid position {} for stream of length {}", pos, length)
            }
            RedactError::InvalidObject { expected, found } => {
                write!(f, "Invalid object: expected {}, found {}", expected, found)
            }
            RedactError::InvalidCoordinate { reason } => {
                write!(f, "Invalid coordinate: {}", reason)
            }
            RedactError::UnsupportedRotation { rotation } => {
                write!(f, "Unsupported page rotation: {}", rotation)
            }
            RedactError::InputUnreadable { path, reason } => {
                write!(f, "Input not readable: {}: {}", path, reason)
            }
            RedactError::OutputUnwritable { path, reason } => {
                write!(f, "Output not writable: {}: {}", path, reason)
            }
            RedactError::ParseFailure { byte_offset, reason } => {
                write!(f, "Parse failure at byte {}: {}", byte_offset, reason)
            }
            RedactError::XObjectRecursionLimit { limit } => {
                write!(f, "Form XObject nesting exceeded depth limit {}", limit)
            }
            RedactError::XObjectCycle { name } => {
                write!(f, "Form XObject cycle through /{}", name)
            }
            RedactError::UnknownFont { name } => {
                write!(f, "Unknown font /{}", name)
            }
            RedactError::VerificationLeak { page, detail } => {
                write!(f, "Verification leak on page {}: {}", page, detail)
            }
            RedactError::Cancelled => write!(f, "Operation cancelled"),
            RedactError::XRefError { message } => {
                write!(f, "XRef error: {}", message)
            }
            RedactError::PageError { message } => {
                write!(f, "Page error: {}", message)
            }
            RedactError::StreamError(message) => {
                write!(f, "Stream error: {}", message)
            }
            RedactError::Unsupported { feature } => {
                write!(f, "Unsupported feature: {}", feature)
            }
            RedactError::Generic(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for RedactError {}

impl RedactError {
    /// Creates a parse failure attributed to a byte offset.
    pub fn parse_failure(byte_offset: usize, reason: impl Into<String>) -> Self {
        RedactError::ParseFailure {
            byte_offset,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-coordinate error.
    pub fn invalid_coordinate(reason: impl Into<String>) -> Self {
        RedactError::InvalidCoordinate {
            reason: reason.into(),
        }
    }

    /// Creates an xref error.
    pub fn xref_error(message: impl Into<String>) -> Self {
        RedactError::XRefError {
            message: message.into(),
        }
    }

    /// Creates a page error.
    pub fn page_error(message: impl Into<String>) -> Self {
        RedactError::PageError {
            message: message.into(),
        }
    }

    /// Creates a stream error.
    pub fn stream_error(message: impl Into<String>) -> Self {
        RedactError::StreamError(message.into())
    }
}

/// Result alias used throughout the crate.
pub type RedactResult<T> = Result<T, RedactError>;
