//! Incremental merge: fold a newer export into an existing store
//!
//! Exports of the same chat overlap heavily; merge keeps one copy. The
//! duplicate key is deliberately coarse, `(ts, sender platform id, content
//! length)`, so the same message survives the formatting drift between two
//! export runs (trailing whitespace, marker spelling) and still collapses.
//!
//! Unlike import, a merge runs as one transaction over the existing store:
//! an error rolls the store back to its pre-merge state and never deletes
//! the file. The derived session index is regenerated after a successful
//! merge.

use crate::db::ChatStore;
use crate::error::{Error, Result};
use crate::format;
use crate::ingest::parser::{parser_for, EventSink, ParseEvent, ParseOptions};
use crate::progress::{ImportStage, ProgressEvent, ProgressSink};
use crate::types::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;

type DedupKey = (i64, String, usize);

fn dedup_key(message: &ParsedMessage) -> DedupKey {
    (
        message.ts,
        message.sender_id.clone(),
        message.content.as_deref().map(str::len).unwrap_or(0),
    )
}

/// What a merge would do, without doing it.
#[derive(Debug, Clone, Default)]
pub struct MergePreview {
    pub new_messages: u64,
    pub duplicates: u64,
    pub new_members: u64,
}

/// What a merge did.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub messages_added: u64,
    pub duplicates_skipped: u64,
    pub members_created: u64,
    pub sessions: usize,
}

// ============================================
// Sinks
// ============================================

/// Counts without writing; backs [`analyze_merge`].
struct PreviewSink<'a> {
    seen: HashSet<DedupKey>,
    known_members: HashSet<String>,
    preview: MergePreview,
    cancel: &'a CancelToken,
}

impl EventSink for PreviewSink<'_> {
    fn accept(&mut self, event: ParseEvent) -> Result<()> {
        self.cancel.check()?;
        match event {
            ParseEvent::Messages(batch) => {
                for message in batch {
                    if message.sender_id.is_empty() || message.ts <= 0 {
                        continue;
                    }
                    if self.seen.insert(dedup_key(&message)) {
                        self.preview.new_messages += 1;
                        if self.known_members.insert(message.sender_id.clone()) {
                            self.preview.new_members += 1;
                        }
                    } else {
                        self.preview.duplicates += 1;
                    }
                }
            }
            ParseEvent::Members(members) => {
                for member in members {
                    self.known_members.insert(member.platform_id);
                }
            }
            ParseEvent::Meta(_) | ParseEvent::Progress { .. } => {}
        }
        Ok(())
    }
}

/// Writes new messages into the open merge transaction.
struct MergeSink<'a> {
    store: &'a ChatStore,
    progress: &'a dyn ProgressSink,
    seen: HashSet<DedupKey>,
    members: HashMap<String, i64>,
    added: u64,
    duplicates: u64,
    members_created: u64,
}

impl MergeSink<'_> {
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
}

impl EventSink for MergeSink<'_> {
    fn accept(&mut self, event: ParseEvent) -> Result<()> {
        match event {
            ParseEvent::Messages(batch) => {
                for message in &batch {
                    if message.sender_id.is_empty() || message.ts <= 0 {
                        continue;
                    }
                    if !self.seen.insert(dedup_key(message)) {
                        self.duplicates += 1;
                        continue;
                    }
                    let member_id = self.member_id(message)?;
                    self.store.insert_message(member_id, message)?;
                    self.added += 1;
                }
                let mut event = ProgressEvent::stage(ImportStage::Importing);
                event.messages_processed = self.added;
                self.progress.report(&event);
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
            // The store already has its meta row; a second export's meta
            // never overwrites it
            ParseEvent::Meta(_) | ParseEvent::Progress { .. } => {}
        }
        Ok(())
    }
}

// ============================================
// Entry points
// ============================================

fn existing_keys(store: &ChatStore) -> Result<HashSet<DedupKey>> {
    Ok(store.dedup_keys()?.into_iter().collect())
}

fn parse_with_fallback(
    src: &Path,
    options: &ParseOptions,
    sink: &mut dyn EventSink,
) -> Result<()> {
    let candidates = format::detect_required(src)?;
    let mut last_err: Option<Error> = None;
    for descriptor in &candidates {
        match parser_for(descriptor.id).parse(src, options, sink) {
            Ok(_) => return Ok(()),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(format = %descriptor.id, error = %e, "Merge candidate failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::UnrecognizedFormat(src.display().to_string())))
}

/// Dry run: report what merging `src` into `store` would add.
pub fn analyze_merge(
    store: &ChatStore,
    src: &Path,
    options: &ParseOptions,
) -> Result<MergePreview> {
    let mut sink = PreviewSink {
        seen: existing_keys(store)?,
        known_members: store
            .list_members()?
            .into_iter()
            .map(|m| m.platform_id)
            .collect(),
        preview: MergePreview::default(),
        cancel: &options.cancel,
    };
    parse_with_fallback(src, options, &mut sink)?;
    Ok(sink.preview)
}

/// Merge `src` into `store`. Idempotent: merging the same file twice adds
/// nothing the second time.
pub fn merge_file(
    store: &ChatStore,
    src: &Path,
    options: &ParseOptions,
    session_gap_secs: i64,
    progress: &dyn ProgressSink,
) -> Result<MergeOutcome> {
    progress.report(&ProgressEvent::stage(ImportStage::Detecting));

    let seen = existing_keys(store)?;
    let members: HashMap<String, i64> = store
        .list_members()?
        .into_iter()
        .map(|m| (m.platform_id, m.id))
        .collect();

    store.begin()?;
    let mut sink = MergeSink {
        store,
        progress,
        seen,
        members,
        added: 0,
        duplicates: 0,
        members_created: 0,
    };

    progress.report(&ProgressEvent::stage(ImportStage::Parsing));
    if let Err(e) = parse_with_fallback(src, options, &mut sink) {
        let _ = store.rollback();
        progress.report(&ProgressEvent::stage(ImportStage::Error));
        return Err(e);
    }

    let (added, duplicates, members_created) =
        (sink.added, sink.duplicates, sink.members_created);
    store.commit()?;

    progress.report(&ProgressEvent::stage(ImportStage::Saving));
    let sessions = store.regenerate_sessions(session_gap_secs)?;
    store.wal_checkpoint()?;

    tracing::info!(
        added,
        duplicates,
        members_created,
        sessions,
        "Merge complete"
    );
    progress.report(&ProgressEvent::stage(ImportStage::Done));
    Ok(MergeOutcome {
        messages_added: added,
        duplicates_skipped: duplicates,
        members_created,
        sessions,
    })
}
