//! Behavioral analytics over an imported chat
//!
//! Every analysis is a pure read: it loads the working set through
//! [`load_messages`], computes, and returns a typed report. Nothing here
//! writes to the store.
//!
//! Timestamps are stored in UTC; anything day- or hour-based goes through
//! the caller-supplied UTC offset in [`AnalysisOptions`] so results are
//! reproducible regardless of the host timezone. "Now" is likewise an
//! option so silence durations can be pinned in tests.
//!
//! Messages from the reserved system sender never participate in any
//! ranking.

pub mod activity;
pub mod diving;
pub mod dragon;
pub mod laugh;
pub mod meme;
pub mod mentions;
pub mod nocturnal;
pub mod repeat;

pub use activity::{analyze_activity, ActivityReport};
pub use diving::{analyze_diving, DivingReport};
pub use dragon::{analyze_dragon_kings, DragonKingReport};
pub use laugh::{analyze_laughs, LaughReport};
pub use meme::{analyze_meme_battles, MemeBattleReport};
pub use mentions::{analyze_mentions, MentionReport};
pub use nocturnal::{analyze_nocturnal, NocturnalReport};
pub use repeat::{analyze_repeats, RepeatReport};

use crate::db::ChatStore;
use crate::error::Result;
use crate::types::{Member, StoredMessage, SYSTEM_SENDER_ID};
use chrono::{DateTime, NaiveDate, Timelike};
use std::collections::HashMap;

/// The day a message belongs to rolls over at 05:00 local, not midnight:
/// a 2 a.m. message is still "last night".
pub const DAY_ROLLOVER_SECS: i64 = 5 * 3600;

/// Shared knobs for every analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Half-open `[start_ts, end_ts)` restriction, seconds since epoch
    pub range: Option<(i64, i64)>,
    /// Offset added to UTC timestamps before any day/hour bucketing
    pub utc_offset_secs: i32,
    /// Reference instant for "silence since" durations; None means wall clock
    pub now_ts: Option<i64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            range: None,
            utc_offset_secs: host_utc_offset_secs(),
            now_ts: None,
        }
    }
}

impl AnalysisOptions {
    pub fn now(&self) -> i64 {
        self.now_ts
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }
}

/// UTC offset of the machine we run on.
pub fn host_utc_offset_secs() -> i32 {
    use chrono::Offset;
    chrono::Local::now().offset().fix().local_minus_utc()
}

/// The working set every analysis starts from: messages in range, in
/// timestamp order, with system messages dropped, plus the member map.
pub struct Workset {
    pub messages: Vec<StoredMessage>,
    pub members: HashMap<i64, Member>,
}

impl Workset {
    pub fn member_name(&self, member_id: i64) -> String {
        match self.members.get(&member_id) {
            Some(member) => member
                .group_nickname
                .clone()
                .unwrap_or_else(|| member.account_name.clone()),
            None => format!("member {}", member_id),
        }
    }
}

/// Load the working set for `options`.
pub fn load_messages(store: &ChatStore, options: &AnalysisOptions) -> Result<Workset> {
    let members: HashMap<i64, Member> = store
        .list_members()?
        .into_iter()
        .filter(|m| m.platform_id != SYSTEM_SENDER_ID)
        .map(|m| (m.id, m))
        .collect();

    let messages = store
        .messages_in_range(options.range)?
        .into_iter()
        .filter(|m| members.contains_key(&m.member_id))
        .collect();

    Ok(Workset { messages, members })
}

/// Percentage with the division-by-zero case folded to 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Local wall-clock view of a UTC timestamp under the analysis offset.
pub fn local_datetime(ts: i64, utc_offset_secs: i32) -> Option<DateTime<chrono::Utc>> {
    DateTime::from_timestamp(ts + utc_offset_secs as i64, 0)
}

/// Hour of day (0..24) in analysis-local time.
pub fn local_hour(ts: i64, utc_offset_secs: i32) -> u32 {
    local_datetime(ts, utc_offset_secs)
        .map(|dt| dt.hour())
        .unwrap_or(0)
}

/// Calendar date in analysis-local time.
pub fn local_date(ts: i64, utc_offset_secs: i32) -> Option<NaiveDate> {
    local_datetime(ts, utc_offset_secs).map(|dt| dt.date_naive())
}

/// The adjusted conversational day: local date after shifting the rollover
/// to 05:00. 04:59 belongs to the previous day, 05:00 to the current one.
pub fn adjusted_day(ts: i64, utc_offset_secs: i32) -> Option<NaiveDate> {
    local_date(ts - DAY_ROLLOVER_SECS, utc_offset_secs)
}
