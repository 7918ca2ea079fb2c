//! DiscordChatExporter JSON
//!
//! One document per channel: `guild` + `channel` objects followed by a
//! `messages` array. There is no explicit roster; members are accumulated
//! from message authors (first occurrence carries nickname and roles).

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use chrono::DateTime;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::BufReader;
use std::path::Path;

const FORMAT: &str = "discord_json";

// ============================================
// Wire shapes
// ============================================

#[derive(Debug, Deserialize)]
struct Export {
    guild: Guild,
    channel: Channel,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct Guild {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "iconUrl", default)]
    icon_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    channel_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    msg_type: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    content: String,
    author: Author,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    stickers: Vec<Sticker>,
    #[serde(default)]
    reference: Option<Reference>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    name: String,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(rename = "avatarUrl", default)]
    avatar_url: Option<String>,
    #[serde(default)]
    roles: Vec<Role>,
}

#[derive(Debug, Deserialize)]
struct Role {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(rename = "fileName", default)]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Sticker {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    #[serde(rename = "messageId", default)]
    message_id: Option<String>,
}

fn attachment_kind(file_name: &str) -> MessageKind {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" => MessageKind::Image,
        "mp4" | "mov" | "webm" | "mkv" => MessageKind::Video,
        "mp3" | "ogg" | "wav" | "m4a" | "flac" => MessageKind::Voice,
        _ => MessageKind::File,
    }
}

fn classify(raw: &RawMessage) -> MessageKind {
    match raw.msg_type.as_deref() {
        Some("Call") => return MessageKind::Call,
        Some("Default") | Some("Reply") | None => {}
        // ChannelPinnedMessage, GuildMemberJoin, thread events, ...
        Some(_) => return MessageKind::System,
    }
    if !raw.stickers.is_empty() {
        return MessageKind::Emoji;
    }
    if let Some(first) = raw.attachments.first() {
        return attachment_kind(first.file_name.as_deref().unwrap_or(""));
    }
    if raw.reference.is_some() {
        return MessageKind::Reply;
    }
    MessageKind::Text
}

// ============================================
// Parser
// ============================================

pub struct DiscordParser;

impl ChatParser for DiscordParser {
    fn format(&self) -> FormatId {
        FormatId::DiscordJson
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

        let name = match (&export.guild.name, &export.channel.name) {
            (Some(guild), Some(channel)) => format!("{} #{}", guild, channel),
            (Some(guild), None) => guild.clone(),
            (None, Some(channel)) => format!("#{}", channel),
            (None, None) => "Discord channel".to_string(),
        };
        let chat_kind = match export.channel.channel_type.as_deref() {
            Some("DirectTextChat") => ChatKind::Private,
            _ => ChatKind::Group,
        };

        let mut batcher = MessageBatcher::new(sink, options);
        batcher.accept(ParseEvent::Meta(ParsedMeta {
            name,
            platform: Platform::Discord,
            chat_kind,
            group_id: export.channel.id.or(export.guild.id),
            group_avatar: export.guild.icon_url,
            owner_id: None,
        }))?;

        let mut seen_authors: HashSet<String> = HashSet::new();
        let mut skipped = 0u64;

        for raw in export.messages {
            let Some(ts) = raw
                .timestamp
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|dt| dt.timestamp())
            else {
                skipped += 1;
                continue;
            };

            if seen_authors.insert(raw.author.id.clone()) {
                batcher.accept(ParseEvent::Members(vec![ParsedMember {
                    platform_id: raw.author.id.clone(),
                    account_name: raw.author.name.clone(),
                    group_nickname: raw.author.nickname.clone(),
                    aliases: Vec::new(),
                    avatar: raw.author.avatar_url.clone(),
                    roles: raw
                        .author
                        .roles
                        .iter()
                        .filter_map(|r| r.name.clone())
                        .collect(),
                }]))?;
            }

            let kind = classify(&raw);
            let content = if raw.content.is_empty() {
                raw.stickers
                    .first()
                    .and_then(|s| s.name.clone())
                    .or_else(|| {
                        raw.attachments
                            .first()
                            .and_then(|a| a.file_name.clone())
                    })
            } else {
                Some(raw.content)
            };

            batcher.push(ParsedMessage {
                sender_id: raw.author.id,
                account_name: raw.author.name,
                group_nickname: raw.author.nickname,
                ts,
                kind,
                content,
                platform_message_id: raw.id,
                reply_to_id: raw.reference.and_then(|r| r.message_id),
            })?;
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}
