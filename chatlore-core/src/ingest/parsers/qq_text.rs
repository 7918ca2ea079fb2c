//! QQ built-in `.txt` history export
//!
//! Layout: an optional banner block (消息记录 / 消息分组 / 消息对象 lines
//! between `====` rules), then message blocks of the shape
//!
//! ```text
//! 2023-05-01 12:00:00 张三(10001)
//! first content line
//! more content
//! ```
//!
//! The sender line ends in `(uin)` or `<email>`; content runs until the next
//! sender line. Sender names may themselves contain parentheses, so the id is
//! anchored to the line end.

use crate::error::Result;
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use chrono::NaiveDateTime;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Markers QQ substitutes for non-text payloads, in match order.
const CONTENT_MARKERS: &[(&str, MessageKind)] = &[
    ("[图片]", MessageKind::Image),
    ("[表情]", MessageKind::Emoji),
    ("[语音]", MessageKind::Voice),
    ("[视频]", MessageKind::Video),
    ("[文件]", MessageKind::File),
    ("[红包]", MessageKind::RedPacket),
    ("[QQ红包]", MessageKind::RedPacket),
    ("[转账]", MessageKind::Transfer),
    ("[位置]", MessageKind::Location),
    ("[分享]", MessageKind::Share),
    ("[链接]", MessageKind::Link),
    ("[名片]", MessageKind::Contact),
];

fn classify_content(content: &str) -> MessageKind {
    let trimmed = content.trim();
    for (marker, kind) in CONTENT_MARKERS {
        if trimmed == *marker {
            return *kind;
        }
    }
    if trimmed.contains("撤回了一条消息") {
        return MessageKind::Recall;
    }
    if trimmed.contains("拍了拍") || trimmed.contains("戳了戳") {
        return MessageKind::Poke;
    }
    MessageKind::Text
}

/// Senders QQ uses for group notices.
fn is_system_sender(name: &str, id: &str) -> bool {
    name == "系统消息" || id == "10000" || id == "1000000"
}

struct Block {
    ts: i64,
    name: String,
    id: String,
    lines: Vec<String>,
}

impl Block {
    fn emit(self, batcher: &mut MessageBatcher) -> Result<()> {
        let content = self.lines.join("\n").trim_end().to_string();
        let kind = classify_content(&content);
        let message = if is_system_sender(&self.name, &self.id) {
            ParsedMessage {
                sender_id: SYSTEM_SENDER_ID.to_string(),
                account_name: self.name,
                group_nickname: None,
                ts: self.ts,
                kind: MessageKind::System,
                content: Some(content),
                platform_message_id: None,
                reply_to_id: None,
            }
        } else {
            ParsedMessage {
                sender_id: self.id,
                account_name: self.name,
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
        };
        batcher.push(message)
    }
}

pub struct QqTextParser;

impl ChatParser for QqTextParser {
    fn format(&self) -> FormatId {
        FormatId::QqText
    }

    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ParseSummary> {
        // Id anchored to line end; `.+?` keeps parens inside names intact
        let uin_re = Regex::new(
            r"^(\d{4}-\d{2}-\d{2} \d{1,2}:\d{2}:\d{2})\s+(.+?)[(（](\d{5,})[)）]\s*$",
        )
        .unwrap();
        let email_re = Regex::new(
            r"^(\d{4}-\d{2}-\d{2} \d{1,2}:\d{2}:\d{2})\s+(.+?)<([^<>\s]+@[^<>\s]+)>\s*$",
        )
        .unwrap();
        let subject_re = Regex::new(r"^消息对象\s*[:：]\s*(.+)$").unwrap();

        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);

        let mut batcher = MessageBatcher::new(sink, options);
        let mut chat_name: Option<String> = None;
        let mut meta_sent = false;
        let mut current: Option<Block> = None;
        let mut skipped = 0u64;

        let send_meta = |batcher: &mut MessageBatcher, name: &Option<String>| -> Result<()> {
            batcher.accept(ParseEvent::Meta(ParsedMeta {
                name: name.clone().unwrap_or_else(|| "QQ聊天记录".to_string()),
                platform: Platform::Qq,
                chat_kind: ChatKind::Group,
                group_id: None,
                group_avatar: None,
                owner_id: None,
            }))
        };

        for line in reader.lines() {
            let line = line?;

            if !meta_sent {
                if let Some(caps) = subject_re.captures(line.trim()) {
                    chat_name = Some(caps[1].trim().to_string());
                    continue;
                }
            }

            let header: Option<(String, String, String)> = uin_re
                .captures(&line)
                .or_else(|| email_re.captures(&line))
                .map(|caps| {
                    (
                        caps[1].to_string(),
                        caps[2].trim().to_string(),
                        caps[3].to_string(),
                    )
                });

            if let Some((ts_str, name, id)) = header {
                if !meta_sent {
                    send_meta(&mut batcher, &chat_name)?;
                    meta_sent = true;
                }
                if let Some(block) = current.take() {
                    block.emit(&mut batcher)?;
                }
                match NaiveDateTime::parse_from_str(&ts_str, "%Y-%m-%d %H:%M:%S") {
                    Ok(ts) => {
                        current = Some(Block {
                            ts: ts.and_utc().timestamp(),
                            name,
                            id,
                            lines: Vec::new(),
                        });
                    }
                    Err(_) => skipped += 1,
                }
            } else if let Some(block) = current.as_mut() {
                // Blank lines inside a block are padding between messages
                if line.trim().is_empty() && block.lines.is_empty() {
                    continue;
                }
                block.lines.push(line);
            }
        }

        if let Some(block) = current.take() {
            if !meta_sent {
                send_meta(&mut batcher, &chat_name)?;
                meta_sent = true;
            }
            block.emit(&mut batcher)?;
        }
        if !meta_sent {
            send_meta(&mut batcher, &chat_name)?;
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parser::CollectSink;
    use std::io::Write;

    fn write_file(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        (dir, path)
    }

    #[test]
    fn test_parse_blocks_with_continuation() {
        let (_dir, path) = write_file(
            "消息记录（此消息记录为文本格式）\n\
             ================================================================\n\
             消息对象:测试群\n\
             ================================================================\n\
             \n\
             2023-05-01 12:00:00 张三(10001)\n\
             你好\n\
             第二行\n\
             \n\
             2023-05-01 12:00:30 李四<li@example.com>\n\
             [图片]\n",
        );
        let mut sink = CollectSink::default();
        let summary = QqTextParser
            .parse(&path, &ParseOptions::default(), &mut sink)
            .unwrap();

        assert_eq!(summary.messages, 2);
        assert_eq!(sink.meta.unwrap().name, "测试群");
        assert_eq!(sink.messages[0].sender_id, "10001");
        assert_eq!(sink.messages[0].content.as_deref(), Some("你好\n第二行"));
        assert_eq!(sink.messages[1].sender_id, "li@example.com");
        assert_eq!(sink.messages[1].kind, MessageKind::Image);
    }

    #[test]
    fn test_name_with_parens_keeps_trailing_uin() {
        let (_dir, path) = write_file(
            "2023-05-01 9:05:00 小明(大明)(10002)\n\
             内容\n",
        );
        let mut sink = CollectSink::default();
        QqTextParser
            .parse(&path, &ParseOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(sink.messages[0].sender_id, "10002");
        assert_eq!(sink.messages[0].account_name, "小明(大明)");
    }

    #[test]
    fn test_system_and_marker_classification() {
        let (_dir, path) = write_file(
            "2023-05-01 12:00:00 系统消息(10000)\n\
             张三加入本群\n\
             \n\
             2023-05-01 12:01:00 张三(10001)\n\
             \"李四\"撤回了一条消息\n\
             \n\
             2023-05-01 12:02:00 张三(10001)\n\
             [表情]\n",
        );
        let mut sink = CollectSink::default();
        QqTextParser
            .parse(&path, &ParseOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(sink.messages[0].sender_id, SYSTEM_SENDER_ID);
        assert_eq!(sink.messages[0].kind, MessageKind::System);
        assert_eq!(sink.messages[1].kind, MessageKind::Recall);
        assert_eq!(sink.messages[2].kind, MessageKind::Emoji);
    }
}
