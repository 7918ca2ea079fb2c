//! Instagram (Meta takeout) message JSON
//!
//! `message_1.json` holds `participants` plus a newest-first `messages`
//! array; the parser re-emits it oldest-first.
//!
//! Meta's export writes UTF-8 text mis-encoded as Latin-1 escapes, so every
//! string needs a decode pass before use ("ÃƒÂ©" style mojibake).

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use serde::Deserialize;
use std::io::BufReader;
use std::path::Path;

const FORMAT: &str = "instagram_json";

// ============================================
// Wire shapes
// ============================================

#[derive(Debug, Deserialize)]
struct Export {
    #[serde(default)]
    participants: Vec<Participant>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thread_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Participant {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    timestamp_ms: Option<i64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    photos: Vec<serde_json::Value>,
    #[serde(default)]
    videos: Vec<serde_json::Value>,
    #[serde(default)]
    audio_files: Vec<serde_json::Value>,
    #[serde(default)]
    sticker: Option<serde_json::Value>,
    #[serde(default)]
    share: Option<Share>,
    #[serde(default)]
    call_duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Share {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    share_text: Option<String>,
}

/// Undo Meta's Latin-1 round-trip: when every char fits a byte, reinterpret
/// the byte sequence as UTF-8. Strings that fail the reinterpretation are
/// already clean and pass through unchanged.
pub fn fix_encoding(s: &str) -> String {
    if !s.chars().all(|c| (c as u32) <= 0xFF) {
        return s.to_string();
    }
    let bytes: Vec<u8> = s.chars().map(|c| c as u8).collect();
    String::from_utf8(bytes).unwrap_or_else(|_| s.to_string())
}

fn classify(raw: &RawMessage) -> MessageKind {
    if raw.call_duration.is_some() {
        return MessageKind::Call;
    }
    if !raw.photos.is_empty() {
        return MessageKind::Image;
    }
    if !raw.videos.is_empty() {
        return MessageKind::Video;
    }
    if !raw.audio_files.is_empty() {
        return MessageKind::Voice;
    }
    if raw.sticker.is_some() {
        return MessageKind::Emoji;
    }
    if raw.share.is_some() {
        return MessageKind::Share;
    }
    MessageKind::Text
}

// ============================================
// Parser
// ============================================

pub struct InstagramParser;

impl ChatParser for InstagramParser {
    fn format(&self) -> FormatId {
        FormatId::InstagramJson
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

        let chat_kind = if export.participants.len() > 2 {
            ChatKind::Group
        } else {
            ChatKind::Private
        };
        let name = export
            .title
            .as_deref()
            .map(fix_encoding)
            .unwrap_or_else(|| "Instagram chat".to_string());

        let mut batcher = MessageBatcher::new(sink, options);
        batcher.accept(ParseEvent::Meta(ParsedMeta {
            name,
            platform: Platform::Instagram,
            chat_kind,
            group_id: export.thread_path.clone(),
            group_avatar: None,
            owner_id: None,
        }))?;

        // Instagram has no user ids; the (fixed) display name is the key
        let members: Vec<ParsedMember> = export
            .participants
            .iter()
            .map(|p| {
                let name = fix_encoding(&p.name);
                ParsedMember::from_observation(&name, &name)
            })
            .collect();
        if !members.is_empty() {
            batcher.accept(ParseEvent::Members(members))?;
        }

        let mut skipped = 0u64;
        // Export order is newest-first
        for raw in export.messages.into_iter().rev() {
            let (Some(sender), Some(ts_ms)) = (&raw.sender_name, raw.timestamp_ms) else {
                skipped += 1;
                continue;
            };
            let sender = fix_encoding(sender);
            let kind = classify(&raw);
            let content = raw
                .content
                .as_deref()
                .map(fix_encoding)
                .or_else(|| {
                    raw.share.as_ref().and_then(|s| {
                        s.share_text
                            .as_deref()
                            .map(fix_encoding)
                            .or_else(|| s.link.clone())
                    })
                });

            batcher.push(ParsedMessage {
                sender_id: sender.clone(),
                account_name: sender,
                group_nickname: None,
                ts: ts_ms / 1000,
                kind,
                content,
                platform_message_id: None,
                reply_to_id: None,
            })?;
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}
