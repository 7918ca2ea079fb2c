//! Format parsers
//!
//! One module per supported export format. All of them implement
//! [`crate::ingest::parser::ChatParser`] and are reached through
//! [`crate::ingest::parser::parser_for`].

pub mod discord;
pub mod instagram;
pub mod jsonl;
pub mod line_text;
pub mod qq_json;
pub mod qq_text;
pub mod telegram;
pub mod wechat_csv;
pub mod whatsapp;
