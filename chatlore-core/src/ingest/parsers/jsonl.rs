//! Canonical JSONL interchange format
//!
//! One JSON object per line, discriminated by the `record` field:
//! - `header`: chat metadata, must be the first parseable line
//! - `member`: one roster entry
//! - `message`: one message, `type` carries the numeric kind code
//!
//! This is both an import format and the export target (see
//! [`crate::export`]), so the serde record types live here and are shared.
//!
//! Malformed lines are skipped and counted, never fatal; a file whose header
//! line is missing or broken fails the whole parse.

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Interchange format version this build writes and understands.
pub const FORMAT_VERSION: u32 = 1;

// ============================================
// Wire records
// ============================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Header(HeaderRecord),
    Member(MemberRecord),
    Message(MessageRecord),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub version: u32,
    pub name: String,
    pub platform: Platform,
    pub chat_kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub ts: i64,
    #[serde(rename = "type")]
    pub kind_code: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl From<MemberRecord> for ParsedMember {
    fn from(r: MemberRecord) -> Self {
        ParsedMember {
            platform_id: r.id,
            account_name: r.name,
            group_nickname: r.nickname,
            aliases: r.aliases,
            avatar: r.avatar,
            roles: r.roles,
        }
    }
}

impl From<MessageRecord> for ParsedMessage {
    fn from(r: MessageRecord) -> Self {
        ParsedMessage {
            sender_id: r.sender,
            account_name: r.name,
            group_nickname: r.nickname,
            ts: r.ts,
            kind: MessageKind::from_type_code(r.kind_code),
            content: r.content,
            platform_message_id: r.id,
            reply_to_id: r.reply_to,
        }
    }
}

// ============================================
// Parser
// ============================================

pub struct CanonicalJsonlParser;

impl ChatParser for CanonicalJsonlParser {
    fn format(&self) -> FormatId {
        FormatId::CanonicalJsonl
    }

    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ParseSummary> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);

        let mut batcher = MessageBatcher::new(sink, options);
        let mut skipped = 0u64;
        let mut saw_header = false;
        let mut bytes_read = 0u64;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            bytes_read += line.len() as u64 + 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: Record = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    if !saw_header {
                        // The very first record must be a valid header
                        return Err(Error::parse(
                            self.format().as_str(),
                            format!("invalid header line: {}", e),
                        ));
                    }
                    tracing::warn!(line = line_no + 1, error = %e, "Skipping malformed line");
                    skipped += 1;
                    continue;
                }
            };

            match record {
                Record::Header(header) => {
                    if header.version > FORMAT_VERSION {
                        return Err(Error::parse(
                            self.format().as_str(),
                            format!("unsupported format version {}", header.version),
                        ));
                    }
                    saw_header = true;
                    batcher.accept(ParseEvent::Meta(ParsedMeta {
                        name: header.name,
                        platform: header.platform,
                        chat_kind: header.chat_kind,
                        group_id: header.group_id,
                        group_avatar: header.group_avatar,
                        owner_id: header.owner_id,
                    }))?;
                }
                Record::Member(member) => {
                    batcher.accept(ParseEvent::Members(vec![member.into()]))?;
                }
                Record::Message(message) => {
                    if !saw_header {
                        return Err(Error::parse(
                            self.format().as_str(),
                            "message record before header",
                        ));
                    }
                    batcher.push(message.into())?;
                }
            }

            if line_no % 10_000 == 0 {
                batcher.accept(ParseEvent::Progress { bytes_read })?;
            }
        }

        if !saw_header {
            return Err(Error::parse(self.format().as_str(), "no header record"));
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}
