//! Telegram Desktop JSON export
//!
//! Handles both shapes `result.json` comes in:
//! - a single chat: `{"name": ..., "type": ..., "messages": [...]}`
//! - a full-account bundle: `{"chats": {"list": [...]}}`
//!
//! For bundles the chat is picked by [`ParseOptions::chat_selector`] (name or
//! id match); without a selector the chat with the most messages wins.
//!
//! Telegram writes the whole export as one JSON document, so this parser
//! deserializes the document and then streams batches out of it; memory is
//! bounded by the document, not by batch size.

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::io::BufReader;
use std::path::Path;

const FORMAT: &str = "telegram_json";

// ============================================
// Wire shapes
// ============================================

#[derive(Debug, Deserialize)]
struct Export {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    chat_type: Option<String>,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    chats: Option<ChatList>,
}

#[derive(Debug, Deserialize)]
struct ChatList {
    #[serde(default)]
    list: Vec<Chat>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    chat_type: Option<String>,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<i64>,
    #[serde(rename = "type", default)]
    msg_type: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    date_unixtime: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_id: Option<String>,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    actor_id: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    text: serde_json::Value,
    #[serde(default)]
    photo: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    sticker_emoji: Option<String>,
    #[serde(default)]
    location_information: Option<serde_json::Value>,
    #[serde(default)]
    contact_information: Option<serde_json::Value>,
    #[serde(default)]
    reply_to_message_id: Option<i64>,
}

/// Flatten Telegram's rich-text value (string, or array of strings and
/// entity objects) into plain text.
fn flatten_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    serde_json::Value::String(s) => out.push_str(s),
                    serde_json::Value::Object(obj) => {
                        if let Some(serde_json::Value::String(s)) = obj.get("text") {
                            out.push_str(s);
                        }
                    }
                    _ => {}
                }
            }
            out
        }
        _ => String::new(),
    }
}

fn message_ts(raw: &RawMessage) -> Option<i64> {
    if let Some(unix) = &raw.date_unixtime {
        if let Ok(ts) = unix.parse::<i64>() {
            return Some(ts);
        }
    }
    let date = raw.date.as_deref()?;
    NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

fn classify(raw: &RawMessage, text: &str) -> MessageKind {
    if raw.msg_type.as_deref() == Some("service") {
        return match raw.action.as_deref() {
            Some("phone_call") | Some("group_call") => MessageKind::Call,
            _ => MessageKind::System,
        };
    }
    if let Some(media) = raw.media_type.as_deref() {
        return match media {
            "sticker" | "animation" => MessageKind::Emoji,
            "voice_message" => MessageKind::Voice,
            "video_message" | "video_file" => MessageKind::Video,
            "audio_file" => MessageKind::Voice,
            _ => MessageKind::File,
        };
    }
    if raw.photo.is_some() {
        return MessageKind::Image;
    }
    if raw.location_information.is_some() {
        return MessageKind::Location;
    }
    if raw.contact_information.is_some() {
        return MessageKind::Contact;
    }
    if raw.file.is_some() {
        return MessageKind::File;
    }
    if raw.reply_to_message_id.is_some() {
        return MessageKind::Reply;
    }
    if text.is_empty() {
        return MessageKind::Other;
    }
    MessageKind::Text
}

fn chat_kind(chat_type: Option<&str>) -> ChatKind {
    match chat_type {
        Some("personal_chat") | Some("bot_chat") | Some("saved_messages") => ChatKind::Private,
        _ => ChatKind::Group,
    }
}

// ============================================
// Parser
// ============================================

pub struct TelegramParser;

impl TelegramParser {
    fn select_chat(export: Export, selector: Option<&str>) -> Result<Chat> {
        let Some(chats) = export.chats else {
            // Single-chat export
            return Ok(Chat {
                name: export.name,
                chat_type: export.chat_type,
                id: export.id,
                messages: export.messages,
            });
        };

        let mut list = chats.list;
        if list.is_empty() {
            return Err(Error::parse(FORMAT, "bundle contains no chats"));
        }

        if let Some(selector) = selector {
            let idx = list.iter().position(|c| {
                c.name.as_deref() == Some(selector)
                    || c.id.map(|id| id.to_string()).as_deref() == Some(selector)
            });
            match idx {
                Some(idx) => Ok(list.swap_remove(idx)),
                None => Err(Error::parse(
                    FORMAT,
                    format!("no chat named or numbered '{}' in bundle", selector),
                )),
            }
        } else {
            // Default: the busiest chat
            let idx = list
                .iter()
                .enumerate()
                .max_by_key(|(_, c)| c.messages.len())
                .map(|(i, _)| i)
                .unwrap_or(0);
            let chat = list.swap_remove(idx);
            tracing::info!(
                chat = chat.name.as_deref().unwrap_or("(unnamed)"),
                "No chat selector given, picked the largest chat"
            );
            Ok(chat)
        }
    }

    fn emit_message(raw: RawMessage, batcher: &mut MessageBatcher) -> Result<bool> {
        let Some(ts) = message_ts(&raw) else {
            return Ok(false);
        };
        let text = flatten_text(&raw.text);
        let kind = classify(&raw, &text);

        let message = if raw.msg_type.as_deref() == Some("service") {
            let content = match (&raw.action, text.is_empty()) {
                (Some(action), true) => action.clone(),
                _ => text,
            };
            ParsedMessage {
                sender_id: SYSTEM_SENDER_ID.to_string(),
                account_name: raw.actor.unwrap_or_else(|| "system".to_string()),
                group_nickname: None,
                ts,
                kind,
                content: Some(content),
                platform_message_id: raw.id.map(|id| id.to_string()),
                reply_to_id: None,
            }
        } else {
            let Some(sender_id) = raw.from_id.or(raw.actor_id) else {
                return Ok(false);
            };
            let content = if text.is_empty() {
                raw.sticker_emoji.clone()
            } else {
                Some(text)
            };
            ParsedMessage {
                sender_id,
                account_name: raw.from.unwrap_or_else(|| "unknown".to_string()),
                group_nickname: None,
                ts,
                kind,
                content,
                platform_message_id: raw.id.map(|id| id.to_string()),
                reply_to_id: raw.reply_to_message_id.map(|id| id.to_string()),
            }
        };
        batcher.push(message)?;
        Ok(true)
    }
}

impl ChatParser for TelegramParser {
    fn format(&self) -> FormatId {
        FormatId::TelegramJson
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

        let chat = Self::select_chat(export, options.chat_selector.as_deref())?;

        let mut batcher = MessageBatcher::new(sink, options);
        batcher.accept(ParseEvent::Meta(ParsedMeta {
            name: chat
                .name
                .clone()
                .unwrap_or_else(|| "Telegram chat".to_string()),
            platform: Platform::Telegram,
            chat_kind: chat_kind(chat.chat_type.as_deref()),
            group_id: chat.id.map(|id| id.to_string()),
            group_avatar: None,
            owner_id: None,
        }))?;

        let mut skipped = 0u64;
        for raw in chat.messages {
            if !Self::emit_message(raw, &mut batcher)? {
                skipped += 1;
            }
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}
