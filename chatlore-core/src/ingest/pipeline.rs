//! Import pipeline: export file -> chat store
//!
//! Orchestrates detect -> preprocess -> parse -> persist. One import is one
//! logical transaction from the outside: on any failure (parse error,
//! database error, cancellation, zero messages) the partially written store
//! file and its WAL side files are deleted, never left behind.
//!
//! Inside, the work is chunked: the store sink commits every
//! `commit_interval` messages so rollback cost stays bounded, and forces a
//! WAL checkpoint every `checkpoint_interval` so the log cannot outgrow the
//! database during very large imports. Secondary indexes and the session
//! index are built once, after the last message lands.
//!
//! When detection returns several candidates the pipeline tries them in
//! priority order; the first candidate that persists at least one message
//! wins, and a candidate that fails cleans up before the next one runs.

use crate::config::Config;
use crate::db::{delete_store_files, ChatStore};
use crate::error::{Error, Result};
use crate::format::{self, FormatId};
use crate::ingest::name_timeline::NameTimeline;
use crate::ingest::parser::{parser_for, EventSink, ParseEvent, ParseOptions};
use crate::ingest::preprocess;
use crate::progress::{ImportStage, ProgressEvent, ProgressSink};
use crate::types::*;
use std::collections::HashMap;
use std::path::Path;

// ============================================
// Options & outcome
// ============================================

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub parse: ParseOptions,
    /// Messages per write transaction
    pub commit_interval: usize,
    /// Messages between forced WAL checkpoints
    pub checkpoint_interval: usize,
    /// Preprocess files larger than this
    pub preprocess_threshold_bytes: u64,
    /// Gap threshold for the derived session index
    pub session_gap_secs: i64,
}

impl ImportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parse: ParseOptions {
                batch_size: config.import.batch_size,
                chat_selector: None,
                cancel: CancelToken::new(),
            },
            commit_interval: config.import.commit_interval,
            checkpoint_interval: config.import.checkpoint_interval,
            preprocess_threshold_bytes: config.import.preprocess_threshold_bytes,
            session_gap_secs: config.analytics.session_gap_secs,
        }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Why individual records were dropped during persistence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounters {
    /// Message had no sender id
    pub missing_sender: u64,
    /// Message had no sender display name
    pub missing_name: u64,
    /// Timestamp missing or non-positive
    pub invalid_timestamp: u64,
}

impl SkipCounters {
    pub fn total(&self) -> u64 {
        self.missing_sender + self.missing_name + self.invalid_timestamp
    }
}

#[derive(Debug)]
pub struct ImportOutcome {
    /// Format that actually parsed the file
    pub format: FormatId,
    pub messages_written: u64,
    pub members_created: u64,
    /// Input units the parser itself skipped as malformed
    pub parse_skipped: u64,
    /// Structurally valid records dropped at persistence time
    pub skips: SkipCounters,
    /// Derived chat sessions built after the load
    pub sessions: usize,
}

// ============================================
// Store sink
// ============================================

/// [`EventSink`] that persists the parse stream into a [`ChatStore`].
///
/// Owns the member cache, the at-send name timeline, and the commit /
/// checkpoint cadence. Expects the caller to have opened the first
/// transaction and to commit the last one.
struct StoreSink<'a> {
    store: &'a ChatStore,
    progress: &'a dyn ProgressSink,
    options: &'a ImportOptions,
    platform: Platform,
    file_name: String,
    total_bytes: u64,
    members: HashMap<String, i64>,
    timeline: NameTimeline,
    /// Latest observed (account_name, group_nickname) per member
    last_names: HashMap<i64, (String, Option<String>)>,
    meta_written: bool,
    members_created: u64,
    written: u64,
    since_commit: usize,
    since_checkpoint: usize,
    skips: SkipCounters,
}

impl<'a> StoreSink<'a> {
    fn new(
        store: &'a ChatStore,
        progress: &'a dyn ProgressSink,
        options: &'a ImportOptions,
        platform: Platform,
        file_name: String,
        total_bytes: u64,
    ) -> Self {
        Self {
            store,
            progress,
            options,
            platform,
            file_name,
            total_bytes,
            members: HashMap::new(),
            timeline: NameTimeline::new(),
            last_names: HashMap::new(),
            meta_written: false,
            members_created: 0,
            written: 0,
            since_commit: 0,
            since_checkpoint: 0,
            skips: SkipCounters::default(),
        }
    }

    fn member_id(&mut self, message: &ParsedMessage) -> Result<i64> {
        if let Some(id) = self.members.get(&message.sender_id) {
            return Ok(*id);
        }
        let id = self.store.resolve_or_create_member(
            &message.sender_id,
            &message.account_name,
            message.group_nickname.as_deref(),
        )?;
        self.members.insert(message.sender_id.clone(), id);
        self.members_created += 1;
        Ok(id)
    }

    fn persist_message(&mut self, message: &ParsedMessage) -> Result<()> {
        if message.sender_id.is_empty() {
            self.skips.missing_sender += 1;
            return Ok(());
        }
        if message.account_name.is_empty() {
            self.skips.missing_name += 1;
            return Ok(());
        }
        if message.ts <= 0 {
            self.skips.invalid_timestamp += 1;
            return Ok(());
        }

        let member_id = self.member_id(message)?;
        self.store.insert_message(member_id, message)?;
        self.written += 1;
        self.since_commit += 1;
        self.since_checkpoint += 1;

        if message.sender_id != SYSTEM_SENDER_ID {
            self.timeline.observe_message(
                member_id,
                &message.account_name,
                message.group_nickname.as_deref(),
                message.ts,
            );
            self.last_names.insert(
                member_id,
                (
                    message.account_name.clone(),
                    message.group_nickname.clone(),
                ),
            );
        }

        if self.since_commit >= self.options.commit_interval {
            self.store.commit()?;
            self.since_commit = 0;
            if self.since_checkpoint >= self.options.checkpoint_interval {
                self.store.wal_checkpoint()?;
                self.since_checkpoint = 0;
                tracing::debug!(written = self.written, "WAL checkpoint during import");
            }
            self.store.begin()?;
        }
        Ok(())
    }

    /// Write everything that waits for the end of the stream: the member
    /// rows' current names and the name history intervals. Runs inside the
    /// final open transaction.
    fn finish(self) -> Result<(u64, u64, SkipCounters)> {
        if !self.meta_written {
            // Parsers always emit meta, but a file with only a roster and
            // no header still needs a row
            self.store.insert_meta(&StoreMeta {
                name: self.file_name.clone(),
                platform: self.platform,
                chat_kind: ChatKind::Group,
                imported_at: chrono::Utc::now().timestamp(),
                group_id: None,
                group_avatar: None,
                owner_id: None,
                schema_version: crate::db::schema::SCHEMA_VERSION,
                session_gap_secs: None,
            })?;
        }
        for (member_id, (account_name, group_nickname)) in &self.last_names {
            self.store
                .update_member_names(*member_id, account_name, group_nickname.as_deref())?;
        }
        let intervals = self.timeline.finish();
        if !intervals.is_empty() {
            self.store.insert_name_intervals(&intervals)?;
        }
        Ok((self.written, self.members_created, self.skips))
    }
}

impl EventSink for StoreSink<'_> {
    fn accept(&mut self, event: ParseEvent) -> Result<()> {
        match event {
            ParseEvent::Meta(meta) => {
                self.store.insert_meta(&StoreMeta {
                    name: meta.name,
                    platform: meta.platform,
                    chat_kind: meta.chat_kind,
                    imported_at: chrono::Utc::now().timestamp(),
                    group_id: meta.group_id,
                    group_avatar: meta.group_avatar,
                    owner_id: meta.owner_id,
                    schema_version: crate::db::schema::SCHEMA_VERSION,
                    session_gap_secs: None,
                })?;
                self.meta_written = true;
            }
            ParseEvent::Members(members) => {
                for member in members {
                    let created = !self.members.contains_key(&member.platform_id);
                    let id = self.store.upsert_member(&member)?;
                    self.members.insert(member.platform_id.clone(), id);
                    if created {
                        self.members_created += 1;
                    }
                }
            }
            ParseEvent::Messages(batch) => {
                for message in &batch {
                    self.persist_message(message)?;
                }
                let mut event = ProgressEvent::stage(ImportStage::Importing);
                event.messages_processed = self.written;
                self.progress.report(&event);
            }
            ParseEvent::Progress { bytes_read } => {
                let mut event = ProgressEvent::stage(ImportStage::Parsing);
                event.bytes_read = bytes_read;
                event.total_bytes = self.total_bytes;
                if self.total_bytes > 0 {
                    event.percentage =
                        (bytes_read as f64 / self.total_bytes as f64 * 100.0).min(100.0);
                }
                self.progress.report(&event);
            }
        }
        Ok(())
    }
}

// ============================================
// Entry points
// ============================================

/// Import `src` into a new store at `store_path`.
///
/// `store_path` must not exist. On failure of any kind nothing is left on
/// disk at `store_path`.
pub fn import_file(
    src: &Path,
    store_path: &Path,
    options: &ImportOptions,
    progress: &dyn ProgressSink,
) -> Result<ImportOutcome> {
    progress.report(&ProgressEvent::stage(ImportStage::Detecting));
    let candidates = format::detect_required(src)?;
    tracing::info!(
        src = %src.display(),
        candidates = ?candidates.iter().map(|d| d.id).collect::<Vec<_>>(),
        "Starting import"
    );

    let mut last_err: Option<Error> = None;
    for descriptor in &candidates {
        match import_as(src, store_path, descriptor.id, options, progress) {
            Ok(outcome) => {
                progress.report(&ProgressEvent::stage(ImportStage::Done));
                return Ok(outcome);
            }
            Err(Error::Cancelled) => {
                progress.report(&ProgressEvent::stage(ImportStage::Error));
                return Err(Error::Cancelled);
            }
            Err(e) => {
                tracing::warn!(
                    format = %descriptor.id,
                    error = %e,
                    "Candidate format failed, trying next"
                );
                last_err = Some(e);
            }
        }
    }

    progress.report(&ProgressEvent::stage(ImportStage::Error));
    Err(last_err.unwrap_or_else(|| Error::UnrecognizedFormat(src.display().to_string())))
}

/// Import with one fixed format. Cleans up the store file on failure.
pub fn import_as(
    src: &Path,
    store_path: &Path,
    format: FormatId,
    options: &ImportOptions,
    progress: &dyn ProgressSink,
) -> Result<ImportOutcome> {
    let store = ChatStore::create(store_path)?;
    let result = import_into(src, &store, format, options, progress);
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if store.in_transaction() {
                let _ = store.rollback();
            }
            drop(store);
            let _ = delete_store_files(store_path);
            Err(e)
        }
    }
}

fn import_into(
    src: &Path,
    store: &ChatStore,
    format: FormatId,
    options: &ImportOptions,
    progress: &dyn ProgressSink,
) -> Result<ImportOutcome> {
    let input = preprocess::prepare(src, format, options.preprocess_threshold_bytes, progress)?;
    let total_bytes = std::fs::metadata(input.path())?.len();
    let file_name = src
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("imported chat")
        .to_string();

    progress.report(&ProgressEvent::stage(ImportStage::Parsing));
    let parser = parser_for(format);
    let descriptor = crate::format::descriptor(format);

    store.begin()?;
    let mut sink = StoreSink::new(
        store,
        progress,
        options,
        descriptor.platform,
        file_name,
        total_bytes,
    );
    let summary = parser.parse(input.path(), &options.parse, &mut sink)?;
    let (written, members_created, skips) = sink.finish()?;
    store.commit()?;

    if written == 0 {
        return Err(Error::NoMessagesWritten);
    }

    progress.report(
        &ProgressEvent::stage(ImportStage::Saving).with_message("Building indexes".to_string()),
    );
    store.create_indexes()?;
    let sessions = store.regenerate_sessions(options.session_gap_secs)?;
    store.wal_checkpoint()?;

    tracing::info!(
        format = %format,
        written,
        members_created,
        parse_skipped = summary.skipped,
        dropped = skips.total(),
        sessions,
        "Import complete"
    );
    Ok(ImportOutcome {
        format,
        messages_written: written,
        members_created,
        parse_skipped: summary.skipped,
        skips,
        sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NullProgress, RecordingProgress};
    use std::io::Write;

    fn write_file(
        dir: &tempfile::TempDir,
        name: &str,
        contents: &str,
    ) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        path
    }

    fn jsonl_export() -> String {
        let mut s = String::new();
        s.push_str(
            r#"{"record":"header","version":1,"name":"My Group","platform":"qq","chat_kind":"group","group_id":"42"}"#,
        );
        s.push('\n');
        s.push_str(r#"{"record":"member","id":"1001","name":"Alice","nickname":"al"}"#);
        s.push('\n');
        for i in 0..10 {
            s.push_str(&format!(
                r#"{{"record":"message","sender":"1001","name":"Alice","ts":{},"type":0,"content":"msg {}"}}"#,
                1_700_000_000 + i * 60,
                i
            ));
            s.push('\n');
        }
        s
    }

    #[test]
    fn test_import_jsonl_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(&dir, "export.jsonl", &jsonl_export());
        let store_path = dir.path().join("chat.db");

        let progress = RecordingProgress::new();
        let outcome =
            import_file(&src, &store_path, &ImportOptions::default(), &progress).unwrap();

        assert_eq!(outcome.format, FormatId::CanonicalJsonl);
        assert_eq!(outcome.messages_written, 10);
        assert_eq!(outcome.members_created, 1);
        assert_eq!(outcome.sessions, 1);

        let store = ChatStore::open(&store_path).unwrap();
        assert_eq!(store.message_count().unwrap(), 10);
        let meta = store.get_meta().unwrap().unwrap();
        assert_eq!(meta.name, "My Group");
        assert_eq!(meta.platform, Platform::Qq);

        let stages = progress.stages();
        assert_eq!(stages.first(), Some(&ImportStage::Detecting));
        assert_eq!(stages.last(), Some(&ImportStage::Done));
    }

    #[test]
    fn test_failed_import_leaves_no_store_file() {
        let dir = tempfile::tempdir().unwrap();
        // Valid header, but every message line is broken
        let src = write_file(
            &dir,
            "export.jsonl",
            concat!(
                r#"{"record":"header","version":1,"name":"G","platform":"qq","chat_kind":"group"}"#,
                "\n",
                "garbage line\n",
                "another garbage line\n",
            ),
        );
        let store_path = dir.path().join("chat.db");

        let err = import_file(&src, &store_path, &ImportOptions::default(), &NullProgress)
            .unwrap_err();
        assert!(matches!(err, Error::NoMessagesWritten));
        assert!(!store_path.exists());
        assert!(!dir.path().join("chat.db-wal").exists());
    }

    #[test]
    fn test_nameless_sender_is_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(
            &dir,
            "export.jsonl",
            concat!(
                r#"{"record":"header","version":1,"name":"G","platform":"qq","chat_kind":"group"}"#,
                "\n",
                r#"{"record":"message","sender":"1001","name":"Alice","ts":1700000000,"type":0,"content":"hi"}"#,
                "\n",
                r#"{"record":"message","sender":"1002","name":"","ts":1700000060,"type":0,"content":"anonymous"}"#,
                "\n",
                r#"{"record":"message","sender":"1001","name":"Alice","ts":1700000120,"type":0,"content":"bye"}"#,
                "\n",
            ),
        );
        let store_path = dir.path().join("chat.db");

        let outcome =
            import_file(&src, &store_path, &ImportOptions::default(), &NullProgress).unwrap();
        assert_eq!(outcome.messages_written, 2);
        assert_eq!(outcome.skips.missing_name, 1);
        assert_eq!(outcome.skips.total(), 1);

        let store = ChatStore::open(&store_path).unwrap();
        assert_eq!(store.message_count().unwrap(), 2);
        // The nameless sender never became a member
        assert!(store.get_member("1002").unwrap().is_none());
    }

    #[test]
    fn test_unrecognized_file_errors_without_store() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(&dir, "data.bin", "not a chat export");
        let store_path = dir.path().join("chat.db");

        let err = import_file(&src, &store_path, &ImportOptions::default(), &NullProgress)
            .unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat(_)));
        assert!(!store_path.exists());
    }

    #[test]
    fn test_cancellation_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(&dir, "export.jsonl", &jsonl_export());
        let store_path = dir.path().join("chat.db");

        let mut options = ImportOptions::default();
        options.parse.batch_size = 1;
        options.parse.cancel.cancel();

        let err = import_file(&src, &store_path, &options, &NullProgress).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!store_path.exists());
    }

    #[test]
    fn test_small_commit_interval_still_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(&dir, "export.jsonl", &jsonl_export());
        let store_path = dir.path().join("chat.db");

        let mut options = ImportOptions::default();
        options.commit_interval = 3;
        options.checkpoint_interval = 6;

        let outcome = import_file(&src, &store_path, &options, &NullProgress).unwrap();
        assert_eq!(outcome.messages_written, 10);

        let store = ChatStore::open(&store_path).unwrap();
        assert_eq!(store.message_count().unwrap(), 10);
    }

    #[test]
    fn test_name_history_written_on_rename() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::from(
            r#"{"record":"header","version":1,"name":"G","platform":"qq","chat_kind":"group"}"#,
        );
        body.push('\n');
        body.push_str(
            r#"{"record":"message","sender":"u1","name":"Old Name","ts":100,"type":0,"content":"a"}"#,
        );
        body.push('\n');
        body.push_str(
            r#"{"record":"message","sender":"u1","name":"New Name","ts":200,"type":0,"content":"b"}"#,
        );
        body.push('\n');
        let src = write_file(&dir, "export.jsonl", &body);
        let store_path = dir.path().join("chat.db");

        import_file(&src, &store_path, &ImportOptions::default(), &NullProgress).unwrap();

        let store = ChatStore::open(&store_path).unwrap();
        let member = store.get_member("u1").unwrap().unwrap();
        // Member row carries the latest observed name
        assert_eq!(member.account_name, "New Name");
        let history = store.name_history(member.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].name, "Old Name");
        assert_eq!(history[0].end_ts, Some(200));
        assert_eq!(history[1].end_ts, None);
    }

    #[test]
    fn test_explicit_format_override() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(&dir, "export.jsonl", &jsonl_export());
        let store_path = dir.path().join("chat.db");

        let outcome = import_as(
            &src,
            &store_path,
            FormatId::CanonicalJsonl,
            &ImportOptions::default(),
            &NullProgress,
        )
        .unwrap();
        assert_eq!(outcome.messages_written, 10);
    }
}
