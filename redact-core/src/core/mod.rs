pub mod decode;
pub mod document;
pub mod error;
pub mod font;
pub mod lexer;
pub mod page;
pub mod parser;
pub mod stream;
pub mod writer;
pub mod xref;

pub use document::PdfDocument;
pub use error::{RedactError, RedactResult};
pub use font::{CharCode, Font, FontType};
pub use lexer::{Lexer, Token};
pub use page::{Page, TextItem};
pub use parser::{Dict, ObjRef, Parser, PdfObject};
pub use stream::Stream;
pub use writer::write_document;
pub use xref::{XRef, XRefEntry};
