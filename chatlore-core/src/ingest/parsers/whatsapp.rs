//! WhatsApp "export chat" `.txt`
//!
//! WhatsApp writes headers in the device locale, so the same chat can look
//! like any of:
//!
//! ```text
//! [1/15/24, 10:30:45 AM] Alice: Hello
//! [15.01.24, 10:30:45] Alice: Hello
//! 15/01/2024, 10:30 - Alice: Hello
//! ```
//!
//! Day/month order is ambiguous; the parser makes a scan pass first, scores
//! each candidate ordering by how many headers it turns into valid dates,
//! and only then parses for real. Headers with no `name: ` separator are
//! WhatsApp's own notices (encryption banner, group events).

use crate::error::{Error, Result};
use crate::format::FormatId;
use crate::ingest::parser::{
    ChatParser, EventSink, MessageBatcher, ParseEvent, ParseOptions, ParseSummary,
};
use crate::types::*;
use chrono::NaiveDate;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::path::Path;

const FORMAT: &str = "whatsapp_text";

/// Field order of the three numeric date parts in a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateOrder {
    DayMonthYear,
    MonthDayYear,
    YearMonthDay,
}

impl DateOrder {
    fn to_date(self, a: i32, b: i32, c: i32) -> Option<NaiveDate> {
        let (year, month, day) = match self {
            DateOrder::DayMonthYear => (c, b, a),
            DateOrder::MonthDayYear => (c, a, b),
            DateOrder::YearMonthDay => (a, b, c),
        };
        let year = if year < 100 { year + 2000 } else { year };
        NaiveDate::from_ymd_opt(year, month as u32, day as u32)
    }
}

#[derive(Debug)]
struct Header {
    a: i32,
    b: i32,
    c: i32,
    hour: u32,
    minute: u32,
    second: u32,
    rest: String,
}

fn header_regex() -> Regex {
    // Bracketed (iOS) and dashed (Android) shapes share one pattern
    Regex::new(
        r"(?x)^
        \[?
        (\d{1,4})[./-](\d{1,2})[./-](\d{2,4}),\s
        (\d{1,2}):(\d{2})(?::(\d{2}))?
        (?:\s?([AaPp])\.?[Mm]\.?)?
        (?:\]\s|\s-\s)
        (.*)$",
    )
    .unwrap()
}

fn parse_header(re: &Regex, line: &str) -> Option<Header> {
    let caps = re.captures(line)?;
    let mut hour: u32 = caps[4].parse().ok()?;
    if let Some(meridiem) = caps.get(7) {
        let pm = meridiem.as_str().eq_ignore_ascii_case("p");
        hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
    }
    Some(Header {
        a: caps[1].parse().ok()?,
        b: caps[2].parse().ok()?,
        c: caps[3].parse().ok()?,
        hour,
        minute: caps[5].parse().ok()?,
        second: caps.get(6).and_then(|s| s.as_str().parse().ok()).unwrap_or(0),
        rest: caps[8].to_string(),
    })
}

/// Score every candidate ordering over the scanned headers and keep the one
/// that explains the most of them. A tie between day-first and month-first
/// breaks toward month-first when 12-hour clocks were seen (US locale),
/// day-first otherwise.
fn resolve_date_order(samples: &[(i32, i32, i32)], saw_meridiem: bool) -> DateOrder {
    let preferred = if saw_meridiem {
        [
            DateOrder::MonthDayYear,
            DateOrder::DayMonthYear,
            DateOrder::YearMonthDay,
        ]
    } else {
        [
            DateOrder::DayMonthYear,
            DateOrder::MonthDayYear,
            DateOrder::YearMonthDay,
        ]
    };
    let score = |order: DateOrder| {
        samples
            .iter()
            .filter(|(a, b, c)| order.to_date(*a, *b, *c).is_some())
            .count()
    };
    let mut best = preferred[0];
    let mut best_score = score(best);
    for candidate in &preferred[1..] {
        let candidate_score = score(*candidate);
        if candidate_score > best_score {
            best = *candidate;
            best_score = candidate_score;
        }
    }
    best
}

const OMITTED_MARKERS: &[(&str, MessageKind)] = &[
    ("<Media omitted>", MessageKind::Image),
    ("image omitted", MessageKind::Image),
    ("photo omitted", MessageKind::Image),
    ("sticker omitted", MessageKind::Emoji),
    ("GIF omitted", MessageKind::Emoji),
    ("video omitted", MessageKind::Video),
    ("audio omitted", MessageKind::Voice),
    ("voice message omitted", MessageKind::Voice),
    ("document omitted", MessageKind::File),
    ("Contact card omitted", MessageKind::Contact),
    ("location omitted", MessageKind::Location),
];

fn classify(content: &str) -> MessageKind {
    let trimmed = content.trim().trim_start_matches('\u{200e}');
    for (marker, kind) in OMITTED_MARKERS {
        if trimmed == *marker || trimmed.ends_with(marker) {
            return *kind;
        }
    }
    if trimmed == "This message was deleted" || trimmed == "You deleted this message" {
        return MessageKind::Recall;
    }
    if trimmed.starts_with("Missed voice call") || trimmed.starts_with("Missed video call") {
        return MessageKind::Call;
    }
    MessageKind::Text
}

/// Chat name out of the export filename ("WhatsApp Chat with Alice.txt").
fn chat_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem
        .strip_prefix("WhatsApp Chat with ")
        .or_else(|| stem.strip_prefix("WhatsApp Chat - "))?;
    Some(name.trim().to_string())
}

pub struct WhatsAppParser;

impl ChatParser for WhatsAppParser {
    fn format(&self) -> FormatId {
        FormatId::WhatsAppText
    }

    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ParseSummary> {
        let re = header_regex();

        // Pass 1: scan headers to pin down the date field order
        let mut samples: Vec<(i32, i32, i32)> = Vec::new();
        let mut saw_meridiem = false;
        {
            let reader = BufReader::new(std::fs::File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if let Some(caps) = re.captures(&line) {
                    if let (Ok(a), Ok(b), Ok(c)) =
                        (caps[1].parse(), caps[2].parse(), caps[3].parse())
                    {
                        samples.push((a, b, c));
                    }
                    saw_meridiem |= caps.get(7).is_some();
                }
            }
        }
        if samples.is_empty() {
            return Err(Error::parse(FORMAT, "no message headers found"));
        }
        let order = resolve_date_order(&samples, saw_meridiem);
        tracing::debug!(?order, headers = samples.len(), "Resolved WhatsApp date order");

        // Pass 2: parse for real
        let mut batcher = MessageBatcher::new(sink, options);
        batcher.accept(ParseEvent::Meta(ParsedMeta {
            name: chat_name_from_path(path).unwrap_or_else(|| "WhatsApp chat".to_string()),
            platform: Platform::WhatsApp,
            chat_kind: ChatKind::Group,
            group_id: None,
            group_avatar: None,
            owner_id: None,
        }))?;

        let mut pending: Option<ParsedMessage> = None;
        let mut skipped = 0u64;
        let reader = BufReader::new(std::fs::File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            match parse_header(&re, &line) {
                Some(header) => {
                    if let Some(message) = pending.take() {
                        batcher.push(message)?;
                    }
                    let Some(ts) = order
                        .to_date(header.a, header.b, header.c)
                        .and_then(|d| d.and_hms_opt(header.hour, header.minute, header.second))
                        .map(|dt| dt.and_utc().timestamp())
                    else {
                        skipped += 1;
                        continue;
                    };
                    pending = Some(match header.rest.split_once(": ") {
                        Some((sender, content)) => {
                            let sender = sender.trim_start_matches('\u{200e}').to_string();
                            ParsedMessage {
                                sender_id: sender.clone(),
                                account_name: sender,
                                group_nickname: None,
                                ts,
                                kind: classify(content),
                                content: Some(content.to_string()),
                                platform_message_id: None,
                                reply_to_id: None,
                            }
                        }
                        // No "name: " separator: WhatsApp notice
                        None => ParsedMessage::system(ts, header.rest.trim()),
                    });
                }
                None => {
                    if let Some(message) = pending.as_mut() {
                        let content = message.content.get_or_insert_with(String::new);
                        content.push('\n');
                        content.push_str(&line);
                    }
                }
            }
        }
        if let Some(message) = pending.take() {
            batcher.push(message)?;
        }

        let messages = batcher.finish()?;
        Ok(ParseSummary { messages, skipped })
    }
}
