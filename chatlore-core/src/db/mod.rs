//! Database layer for chatlore
//!
//! One SQLite file per imported chat. The module provides:
//! - Schema migrations (secondary indexes deliberately deferred to bulk-load end)
//! - Repository-style store type for all queries and inserts
//! - Chat-session index regeneration by gap-thresholding

pub mod schema;
pub mod store;

pub use store::{delete_store_files, ChatStore};
