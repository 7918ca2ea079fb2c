//! Name timeline accumulation
//!
//! Messages carry sender names as observed at send time; this module folds
//! that stream into run-length intervals per (member, name kind). The
//! pipeline feeds observations in timestamp order and writes the result in
//! its final transaction.
//!
//! Members whose name never changed produce no intervals: the member row
//! already holds the current name, and a single full-range interval would
//! only restate it.

use crate::types::{NameInterval, NameKind};
use std::collections::HashMap;

#[derive(Debug)]
struct Run {
    name: String,
    start_ts: i64,
}

/// Accumulator over at-send name observations.
#[derive(Debug, Default)]
pub struct NameTimeline {
    runs: HashMap<(i64, NameKind), Vec<Run>>,
}

impl NameTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation. Consecutive identical names collapse into
    /// the open run; a different name closes it and opens a new one.
    pub fn observe(&mut self, member_id: i64, kind: NameKind, name: &str, ts: i64) {
        if name.is_empty() {
            return;
        }
        let runs = self.runs.entry((member_id, kind)).or_default();
        match runs.last() {
            Some(last) if last.name == name => {}
            _ => runs.push(Run {
                name: name.to_string(),
                start_ts: ts,
            }),
        }
    }

    /// Convenience for a full message observation.
    pub fn observe_message(
        &mut self,
        member_id: i64,
        account_name: &str,
        group_nickname: Option<&str>,
        ts: i64,
    ) {
        self.observe(member_id, NameKind::AccountName, account_name, ts);
        if let Some(nickname) = group_nickname {
            self.observe(member_id, NameKind::GroupNickname, nickname, ts);
        }
    }

    /// Close all runs into intervals. Each run ends where the next begins;
    /// the final run stays open (`end_ts: None`).
    pub fn finish(self) -> Vec<NameInterval> {
        let mut intervals = Vec::new();
        let mut keys: Vec<(i64, NameKind)> = self.runs.keys().copied().collect();
        keys.sort_by_key(|(member_id, kind)| (*member_id, *kind as u8));

        for key in keys {
            let runs = &self.runs[&key];
            if runs.len() < 2 {
                continue;
            }
            let (member_id, kind) = key;
            for (i, run) in runs.iter().enumerate() {
                intervals.push(NameInterval {
                    member_id,
                    kind,
                    name: run.name.clone(),
                    start_ts: run.start_ts,
                    end_ts: runs.get(i + 1).map(|next| next.start_ts),
                });
            }
        }
        intervals
    }
}
