//! LINE `.txt` chat history
//!
//! Layout: a `[LINE] Chat history with ...` banner, then date section lines
//! (`2023/05/01(Mon)`) each followed by tab-separated message lines:
//!
//! ```text
//! 12:00\tAlice\tHello
//! 12:01\tBob\t[Photo]
//! ```
//!
//! Two-field lines under a date (`12:02\tAlice joined the chat`) are LINE's
//! system notices. LINE exports carry no user ids, so the display name is
//! the member key. Lines with no tab continue the previous message.

use crate::error::Result;
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use chrono::NaiveDate;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::path::Path;

const MARKERS: &[(&str, MessageKind)] = &[
    ("[Photo]", MessageKind::Image),
    ("[写真]", MessageKind::Image),
    ("[Sticker]", MessageKind::Emoji),
    ("[スタンプ]", MessageKind::Emoji),
    ("[Video]", MessageKind::Video),
    ("[動画]", MessageKind::Video),
    ("[Voice message]", MessageKind::Voice),
    ("[ボイスメッセージ]", MessageKind::Voice),
    ("[File]", MessageKind::File),
    ("[ファイル]", MessageKind::File),
    ("[Location]", MessageKind::Location),
    ("[位置情報]", MessageKind::Location),
    ("[Contact]", MessageKind::Contact),
    ("[連絡先]", MessageKind::Contact),
];

fn classify(content: &str) -> MessageKind {
    let trimmed = content.trim();
    for (marker, kind) in MARKERS {
        if trimmed == *marker {
            return *kind;
        }
    }
    if trimmed.contains("unsent a message") || trimmed.contains("送信取消") {
        return MessageKind::Recall;
    }
    if trimmed.starts_with("☎") {
        return MessageKind::Call;
    }
    MessageKind::Text
}

fn parse_section_date(line: &str) -> Option<NaiveDate> {
    // "2023/05/01(Mon)" or "2023.05.01 月曜日"; take the leading date token
    let token: String = line
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '/' || *c == '.')
        .collect();
    NaiveDate::parse_from_str(&token, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(&token, "%Y.%m.%d"))
        .ok()
}

struct Pending {
    ts: i64,
    sender: Option<String>,
    lines: Vec<String>,
}

impl Pending {
    fn emit(self, batcher: &mut MessageBatcher) -> Result<()> {
        let content = self.lines.join("\n").trim_end().to_string();
        let message = match self.sender {
            Some(sender) => {
                let kind = classify(&content);
                ParsedMessage {
                    sender_id: sender.clone(),
                    account_name: sender,
                    group_nickname: None,
                    ts: self.ts,
                    kind,
                    content: if content.is_empty() {
                        None
                    } else {
                        Some(content)
                    },
                    platform_message_id: None,
                    reply_to_id: None,
                }
            }
            None => ParsedMessage::system(self.ts, &content),
        };
        batcher.push(message)
    }
}

pub struct LineTextParser;

impl ChatParser for LineTextParser {
    fn format(&self) -> FormatId {
        FormatId::LineText
    }

    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ParseSummary> {
        let banner_re =
            Regex::new(r"^\[LINE\]\s*(?:Chat history (?:with|in)\s+)?(.*)$").unwrap();
        let time_re = Regex::new(r"^(\d{1,2}):(\d{2})\t(.*)$").unwrap();

        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);

        let mut batcher = MessageBatcher::new(sink, options);
        let mut chat_name: Option<String> = None;
        let mut meta_sent = false;
        let mut current_date: Option<NaiveDate> = None;
        let mut pending: Option<Pending> = None;
        let mut skipped = 0u64;

        let send_meta = |batcher: &mut MessageBatcher, name: &Option<String>| -> Result<()> {
            batcher.accept(ParseEvent::Meta(ParsedMeta {
                name: name.clone().unwrap_or_else(|| "LINE chat".to_string()),
                platform: Platform::Line,
                chat_kind: ChatKind::Private,
                group_id: None,
                group_avatar: None,
                owner_id: None,
            }))
        };

        for line in reader.lines() {
            let line = line?;

            if chat_name.is_none() {
                if let Some(caps) = banner_re.captures(line.trim()) {
                    let name = caps[1].trim().to_string();
                    if !name.is_empty() {
                        chat_name = Some(name);
                    }
                    continue;
                }
            }

            if let Some(date) = parse_section_date(line.trim()) {
                if let Some(p) = pending.take() {
                    p.emit(&mut batcher)?;
                }
                current_date = Some(date);
                continue;
            }

            let fields: Option<(u32, u32, String)> = time_re.captures(&line).and_then(|caps| {
                let hour: u32 = caps[1].parse().ok()?;
                let minute: u32 = caps[2].parse().ok()?;
                Some((hour, minute, caps[3].to_string()))
            });

            match fields {
                Some((hour, minute, rest)) => {
                    let Some(date) = current_date else {
                        skipped += 1;
                        continue;
                    };
                    let Some(ts) = date
                        .and_hms_opt(hour, minute, 0)
                        .map(|dt| dt.and_utc().timestamp())
                    else {
                        skipped += 1;
                        continue;
                    };
                    if !meta_sent {
                        send_meta(&mut batcher, &chat_name)?;
                        meta_sent = true;
                    }
                    if let Some(p) = pending.take() {
                        p.emit(&mut batcher)?;
                    }
                    // "name\tcontent" is a message, a single field is a notice
                    pending = Some(match rest.split_once('\t') {
                        Some((sender, content)) => Pending {
                            ts,
                            sender: Some(sender.to_string()),
                            lines: vec![content.to_string()],
                        },
                        None => Pending {
                            ts,
                            sender: None,
                            lines: vec![rest],
                        },
                    });
                }
                None => {
                    if let Some(p) = pending.as_mut() {
                        p.lines.push(line);
                    }
                }
            }
        }

        if let Some(p) = pending.take() {
            p.emit(&mut batcher)?;
        }
        if !meta_sent {
            send_meta(&mut batcher, &chat_name)?;
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}
