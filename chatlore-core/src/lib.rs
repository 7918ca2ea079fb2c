//! # chatlore-core
//!
//! Core library for chatlore - a chat history archiver and analyzer.
//!
//! This library provides:
//! - Export format detection and streaming parsers for QQ, WeChat,
//!   Telegram, Discord, WhatsApp, LINE and Instagram exports
//! - A SQLite-backed chat store with transactional bulk import and
//!   deduplicating incremental merge
//! - Behavioral analytics over an imported chat
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use chatlore_core::ingest::{import_file, ImportOptions};
//! use chatlore_core::progress::NullProgress;
//!
//! let outcome = import_file(
//!     Path::new("export.json"),
//!     Path::new("group.chatlore"),
//!     &ImportOptions::default(),
//!     &NullProgress,
//! )
//! .expect("import failed");
//! println!("{} messages", outcome.messages_written);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::ChatStore;
pub use error::{Error, Result};
pub use format::{detect, FormatId};
pub use ingest::{import_file, merge_file, ImportOptions, ImportOutcome, MergeOutcome};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod progress;
pub mod types;
