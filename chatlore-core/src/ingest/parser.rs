//! Parser trait and event stream
//!
//! Every format parser walks its input once, start to finish, and pushes
//! normalized records into an [`EventSink`]. The hand-off is synchronous: the
//! sink persists a batch before the parser reads the next one, so memory stays
//! bounded by one batch regardless of file size.
//!
//! Ordering contract, per parse:
//! 1. exactly one [`ParseEvent::Meta`]
//! 2. zero or more [`ParseEvent::Members`]
//! 3. zero or more [`ParseEvent::Messages`] batches, in file order
//!
//! Roster events may also arrive before meta when the format stores its
//! roster first; sinks must tolerate either order.

use crate::error::Result;
use crate::format::FormatId;
use crate::types::{CancelToken, ParsedMember, ParsedMessage, ParsedMeta};
use std::path::Path;

// ============================================
// Event stream
// ============================================

/// One record batch flowing from a parser to its sink.
#[derive(Debug)]
pub enum ParseEvent {
    /// Chat-level metadata (exactly once per parse)
    Meta(ParsedMeta),
    /// A chunk of the member roster
    Members(Vec<ParsedMember>),
    /// A batch of messages in file order
    Messages(Vec<ParsedMessage>),
    /// Byte-level position report for progress display
    Progress { bytes_read: u64 },
}

/// Receiver side of the event stream.
///
/// `accept` returning an error aborts the parse; parsers propagate it
/// unchanged so cancellation and database failures surface immediately.
pub trait EventSink {
    fn accept(&mut self, event: ParseEvent) -> Result<()>;
}

/// What a completed parse did, independent of persistence.
#[derive(Debug, Clone, Default)]
pub struct ParseSummary {
    /// Messages emitted to the sink
    pub messages: u64,
    /// Input units (lines or array entries) skipped as malformed
    pub skipped: u64,
}

// ============================================
// Parse options
// ============================================

/// Knobs shared by all parsers.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Messages per [`ParseEvent::Messages`] batch
    pub batch_size: usize,
    /// For multi-chat bundles: name or id of the chat to extract
    pub chat_selector: Option<String>,
    /// Checked at batch boundaries
    pub cancel: CancelToken,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            batch_size: 2_000,
            chat_selector: None,
            cancel: CancelToken::new(),
        }
    }
}

// ============================================
// Parser trait & registry
// ============================================

/// A streaming parser for one export format.
pub trait ChatParser {
    /// The format this parser handles.
    fn format(&self) -> FormatId;

    /// Walk `path` once, pushing events into `sink`.
    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ParseSummary>;
}

/// Parser registry keyed by format id.
pub fn parser_for(id: FormatId) -> Box<dyn ChatParser> {
    use super::parsers::*;
    match id {
        FormatId::CanonicalJsonl => Box::new(jsonl::CanonicalJsonlParser),
        FormatId::TelegramJson => Box::new(telegram::TelegramParser),
        FormatId::DiscordJson => Box::new(discord::DiscordParser),
        FormatId::InstagramJson => Box::new(instagram::InstagramParser),
        FormatId::QqJson => Box::new(qq_json::QqJsonParser),
        FormatId::QqText => Box::new(qq_text::QqTextParser),
        FormatId::LineText => Box::new(line_text::LineTextParser),
        FormatId::WhatsAppText => Box::new(whatsapp::WhatsAppParser),
        FormatId::WeChatCsv => Box::new(wechat_csv::WeChatCsvParser),
    }
}

// ============================================
// Batching helper
// ============================================

/// Accumulates messages and flushes them to the sink in fixed-size batches.
/// Cancellation is observed at every flush.
pub struct MessageBatcher<'a> {
    sink: &'a mut dyn EventSink,
    batch: Vec<ParsedMessage>,
    batch_size: usize,
    cancel: CancelToken,
    emitted: u64,
}

impl<'a> MessageBatcher<'a> {
    pub fn new(sink: &'a mut dyn EventSink, options: &ParseOptions) -> Self {
        Self {
            sink,
            batch: Vec::with_capacity(options.batch_size),
            batch_size: options.batch_size.max(1),
            cancel: options.cancel.clone(),
            emitted: 0,
        }
    }

    pub fn push(&mut self, message: ParsedMessage) -> Result<()> {
        self.batch.push(message);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.cancel.check()?;
        if self.batch.is_empty() {
            return Ok(());
        }
        self.emitted += self.batch.len() as u64;
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        self.sink.accept(ParseEvent::Messages(batch))
    }

    /// Flush the tail and return how many messages went through.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        Ok(self.emitted)
    }

    /// Forward non-message events through the same sink.
    pub fn accept(&mut self, event: ParseEvent) -> Result<()> {
        self.sink.accept(event)
    }
}

// ============================================
// Test sink
// ============================================

/// Sink that collects everything in memory. Test support.
#[cfg(test)]
#[derive(Default)]
pub struct CollectSink {
    pub meta: Option<ParsedMeta>,
    pub members: Vec<ParsedMember>,
    pub messages: Vec<ParsedMessage>,
}

#[cfg(test)]
impl EventSink for CollectSink {
    fn accept(&mut self, event: ParseEvent) -> Result<()> {
        match event {
            ParseEvent::Meta(meta) => self.meta = Some(meta),
            ParseEvent::Members(members) => self.members.extend(members),
            ParseEvent::Messages(messages) => self.messages.extend(messages),
            ParseEvent::Progress { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_batcher_flushes_at_batch_size() {
        let mut sink = CollectSink::default();
        let options = ParseOptions {
            batch_size: 2,
            ..Default::default()
        };
        let mut batcher = MessageBatcher::new(&mut sink, &options);
        for i in 0..5 {
            batcher
                .push(ParsedMessage::text("u1", "A", i, "hi"))
                .unwrap();
        }
        let emitted = batcher.finish().unwrap();
        assert_eq!(emitted, 5);
        assert_eq!(sink.messages.len(), 5);
    }

    #[test]
    fn test_batcher_observes_cancellation() {
        let mut sink = CollectSink::default();
        let options = ParseOptions {
            batch_size: 1,
            ..Default::default()
        };
        options.cancel.cancel();
        let mut batcher = MessageBatcher::new(&mut sink, &options);
        let err = batcher
            .push(ParsedMessage::text("u1", "A", 0, "hi"))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
