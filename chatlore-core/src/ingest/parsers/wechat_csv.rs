//! WeChat CSV export (MemoTrace-style column layout)
//!
//! One row per message with WeChat's numeric type codes. `CreateTime` is
//! unix seconds; `StrTime` is the same instant formatted, used as fallback.
//! `Sender` carries the wxid, `NickName`/`Remark` the display names, and
//! `IsSender = 1` marks the exporting account's own messages.

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::Path;

const FORMAT: &str = "wechat_csv";

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "Type", default)]
    msg_type: Option<i64>,
    #[serde(rename = "SubType", default)]
    sub_type: Option<i64>,
    #[serde(rename = "IsSender", default)]
    is_sender: Option<i64>,
    #[serde(rename = "CreateTime", default)]
    create_time: Option<String>,
    #[serde(rename = "StrTime", default)]
    str_time: Option<String>,
    #[serde(rename = "StrContent", default)]
    content: Option<String>,
    #[serde(rename = "Remark", default)]
    remark: Option<String>,
    #[serde(rename = "NickName", default)]
    nickname: Option<String>,
    #[serde(rename = "Sender", default)]
    sender: Option<String>,
}

impl Row {
    fn ts(&self) -> Option<i64> {
        if let Some(raw) = self.create_time.as_deref() {
            if let Ok(ts) = raw.trim().parse::<i64>() {
                return Some(ts);
            }
        }
        let raw = self.str_time.as_deref()?;
        NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|dt| dt.and_utc().timestamp())
    }

    /// WeChat numeric type codes observed in MemoTrace exports.
    fn kind(&self) -> MessageKind {
        match (self.msg_type.unwrap_or(1), self.sub_type.unwrap_or(0)) {
            (1, _) => MessageKind::Text,
            (3, _) => MessageKind::Image,
            (34, _) => MessageKind::Voice,
            (43, _) => MessageKind::Video,
            (47, _) => MessageKind::Emoji,
            (48, _) => MessageKind::Location,
            (42, _) => MessageKind::Contact,
            (49, 6) => MessageKind::File,
            (49, 57) => MessageKind::Reply,
            (49, 2000) => MessageKind::Transfer,
            (49, _) => MessageKind::Link,
            (50, _) => MessageKind::Call,
            (10000, _) => MessageKind::System,
            _ => MessageKind::Other,
        }
    }
}

pub struct WeChatCsvParser;

impl ChatParser for WeChatCsvParser {
    fn format(&self) -> FormatId {
        FormatId::WeChatCsv
    }

    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ParseSummary> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| Error::parse(FORMAT, e.to_string()))?;

        let chat_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("WeChat chat")
            .to_string();

        let mut batcher = MessageBatcher::new(sink, options);
        batcher.accept(ParseEvent::Meta(ParsedMeta {
            name: chat_name,
            platform: Platform::WeChat,
            chat_kind: ChatKind::Group,
            group_id: None,
            group_avatar: None,
            owner_id: None,
        }))?;

        let mut owner_id: Option<String> = None;
        let mut skipped = 0u64;

        for row in reader.deserialize::<Row>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed CSV row");
                    skipped += 1;
                    continue;
                }
            };
            let Some(ts) = row.ts() else {
                skipped += 1;
                continue;
            };
            let kind = row.kind();

            if kind == MessageKind::System {
                batcher.push(ParsedMessage::system(
                    ts,
                    row.content.as_deref().unwrap_or(""),
                ))?;
                continue;
            }

            let Some(sender) = row.sender.clone().filter(|s| !s.is_empty()) else {
                skipped += 1;
                continue;
            };
            if row.is_sender == Some(1) && owner_id.is_none() {
                owner_id = Some(sender.clone());
            }
            // Remark (user-set) beats NickName (self-set) as display name
            let display = row
                .remark
                .clone()
                .filter(|s| !s.is_empty())
                .or_else(|| row.nickname.clone().filter(|s| !s.is_empty()))
                .unwrap_or_else(|| sender.clone());

            batcher.push(ParsedMessage {
                sender_id: sender,
                account_name: display,
                group_nickname: None,
                ts,
                kind,
                content: row.content.filter(|s| !s.is_empty()),
                platform_message_id: None,
                reply_to_id: None,
            })?;
        }

        let messages = batcher.finish()?;
        tracing::debug!(owner = ?owner_id, "WeChat CSV parse finished");
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
        let path = dir.path().join("friends.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        (dir, path)
    }

    #[test]
    fn test_parse_rows() {
        let (_dir, path) = write_file(
            "localId,Type,SubType,IsSender,CreateTime,StrTime,StrContent,Remark,NickName,Sender\n\
             1,1,0,0,1700000000,2023-11-14 22:13:20,你好,老张,张三,wxid_aaa\n\
             2,3,0,1,1700000060,2023-11-14 22:14:20,,,我自己,wxid_me\n\
             3,10000,0,0,1700000120,2023-11-14 22:15:20,\"你邀请张三加入了群聊\",,,\n",
        );
        let mut sink = CollectSink::default();
        let summary = WeChatCsvParser
            .parse(&path, &ParseOptions::default(), &mut sink)
            .unwrap();

        assert_eq!(summary.messages, 3);
        assert_eq!(sink.meta.unwrap().name, "friends");
        assert_eq!(sink.messages[0].sender_id, "wxid_aaa");
        assert_eq!(sink.messages[0].account_name, "老张");
        assert_eq!(sink.messages[1].kind, MessageKind::Image);
        assert_eq!(sink.messages[2].sender_id, SYSTEM_SENDER_ID);
    }

    #[test]
    fn test_str_time_fallback_and_bad_rows() {
        let (_dir, path) = write_file(
            "Type,CreateTime,StrTime,StrContent,NickName,Sender\n\
             1,,2023-11-14 22:13:20,fallback works,A,wxid_a\n\
             1,not-a-time,,broken,B,wxid_b\n",
        );
        let mut sink = CollectSink::default();
        let summary = WeChatCsvParser
            .parse(&path, &ParseOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(summary.messages, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(sink.messages[0].ts, 1700000000);
    }

    #[test]
    fn test_type_code_mapping() {
        let row = |t: i64, s: i64| Row {
            msg_type: Some(t),
            sub_type: Some(s),
            is_sender: None,
            create_time: None,
            str_time: None,
            content: None,
            remark: None,
            nickname: None,
            sender: None,
        };
        assert_eq!(row(47, 0).kind(), MessageKind::Emoji);
        assert_eq!(row(49, 6).kind(), MessageKind::File);
        assert_eq!(row(49, 57).kind(), MessageKind::Reply);
        assert_eq!(row(49, 5).kind(), MessageKind::Link);
        assert_eq!(row(777, 0).kind(), MessageKind::Other);
    }
}
