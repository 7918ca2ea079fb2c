//! Ingestion: export files -> chat store
//!
//! The flow is detect -> (optionally preprocess) -> parse -> persist:
//! - [`crate::format`] names candidate formats for a file
//! - [`preprocess`] shrinks pathological exports before full parsing
//! - format parsers in [`parsers`] stream normalized records into an [`parser::EventSink`]
//! - [`pipeline`] persists the stream transactionally and owns rollback
//! - [`merge`] folds a second export of the same chat into an existing store

pub mod merge;
pub mod name_timeline;
pub mod parser;
pub mod parsers;
pub mod pipeline;
pub mod preprocess;

pub use merge::{analyze_merge, merge_file, MergeOutcome, MergePreview};
pub use parser::{
    parser_for, ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
pub use pipeline::{import_file, ImportOptions, ImportOutcome};
