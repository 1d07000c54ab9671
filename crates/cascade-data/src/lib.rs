//! Example ingestion for Cascade: the text-format parser, the example pool,
//! and the source contract the driver consumes.

pub mod error;
pub mod pool;
pub mod source;
pub mod text;

pub use error::{DataError, Result};
pub use pool::ExamplePool;
pub use source::{ExampleSource, MultiExample, TextSource};
pub use text::TextParser;
