//! QQ exporter JSON
//!
//! One document per group: group metadata, a full roster, then the message
//! array. Third-party QQ exporters embed every avatar as a base64 data URI,
//! which is why this format is the main client of
//! [`crate::ingest::preprocess`]; the parser itself accepts files with or
//! without avatar fields.

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use serde::Deserialize;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

const FORMAT: &str = "qq_json";

// ============================================
// Wire shapes
// ============================================

#[derive(Debug, Deserialize)]
struct Export {
    group_name: String,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    group_avatar: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    members: Vec<RawMember>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    id: String,
    name: String,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<String>,
    sender: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
    ts: i64,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reply_to: Option<String>,
}

// ============================================
// Parser
// ============================================

pub struct QqJsonParser;

impl ChatParser for QqJsonParser {
    fn format(&self) -> FormatId {
        FormatId::QqJson
    }

    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ParseSummary> {
        let file = std::fs::File::open(path)?;
        let export: Export = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::parse(FORMAT, e.to_string()))?;

        let mut batcher = MessageBatcher::new(sink, options);
        batcher.accept(ParseEvent::Meta(ParsedMeta {
            name: export.group_name,
            platform: Platform::Qq,
            chat_kind: ChatKind::Group,
            group_id: export.group_id,
            group_avatar: export.group_avatar,
            owner_id: export.owner_id,
        }))?;

        if !export.members.is_empty() {
            let members = export
                .members
                .into_iter()
                .map(|m| ParsedMember {
                    platform_id: m.id,
                    account_name: m.name,
                    group_nickname: m.nickname,
                    aliases: Vec::new(),
                    avatar: m.avatar,
                    roles: m.roles,
                })
                .collect();
            batcher.accept(ParseEvent::Members(members))?;
        }

        let mut skipped = 0u64;
        for raw in export.messages {
            if raw.sender.is_empty() {
                skipped += 1;
                continue;
            }
            let kind = raw
                .kind
                .as_deref()
                .map(|k| MessageKind::from_str(k).unwrap_or(MessageKind::Other))
                .unwrap_or(MessageKind::Text);
            batcher.push(ParsedMessage {
                account_name: raw.name.clone().unwrap_or_else(|| raw.sender.clone()),
                sender_id: raw.sender,
                group_nickname: raw.nickname,
                ts: raw.ts,
                kind,
                content: raw.content,
                platform_message_id: raw.id,
                reply_to_id: raw.reply_to,
            })?;
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}
