//! Night-owl analysis
//!
//! The night window is 23:00..05:00 analysis-local. Days are adjusted days
//! (05:00 rollover), so one night from 23:00 to 04:59 is one day, not two.
//!
//! Three signals feed the champion score:
//! - night messages, weight 1
//! - adjusted days where the member spoke last, weight 10
//! - longest run of consecutive adjusted days with night activity, weight 20

use super::{adjusted_day, load_messages, local_hour, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const LAST_SPEAKER_WEIGHT: u64 = 10;
const STREAK_WEIGHT: u64 = 20;

/// Title tiers by total night-message count.
const TITLE_TIERS: &[(u64, &str)] = &[
    (500, "nocturnal legend"),
    (100, "night owl"),
    (20, "late sleeper"),
    (1, "occasionally up late"),
];

fn title_for(night_messages: u64) -> Option<&'static str> {
    TITLE_TIERS
        .iter()
        .find(|(floor, _)| night_messages >= *floor)
        .map(|(_, title)| *title)
}

#[derive(Debug, Clone, Serialize)]
pub struct NocturnalMemberStats {
    pub member_id: i64,
    pub name: String,
    pub night_messages: u64,
    /// Share of all night messages, 0..=100
    pub night_share: f64,
    pub title: Option<&'static str>,
    pub last_speaker_days: u64,
    pub first_speaker_days: u64,
    pub longest_night_streak: u64,
    /// Run of consecutive night days ending at the member's latest night day
    pub current_night_streak: u64,
    pub score: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NocturnalReport {
    pub total_night_messages: u64,
    /// Sorted by score, descending
    pub members: Vec<NocturnalMemberStats>,
    pub champion: Option<i64>,
}

fn in_night_window(hour: u32) -> bool {
    hour >= 23 || hour < 5
}

/// Longest and trailing runs of consecutive dates in `days`.
fn streaks(days: &HashSet<NaiveDate>) -> (u64, u64) {
    let mut sorted: Vec<NaiveDate> = days.iter().copied().collect();
    sorted.sort_unstable();
    let mut best = 0u64;
    let mut run = 0u64;
    let mut prev: Option<NaiveDate> = None;
    for day in sorted {
        run = match prev {
            Some(prev) if day == prev + chrono::Days::new(1) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(day);
    }
    (best, run)
}

pub fn analyze_nocturnal(store: &ChatStore, options: &AnalysisOptions) -> Result<NocturnalReport> {
    let workset = load_messages(store, options)?;

    let mut night_counts: HashMap<i64, u64> = HashMap::new();
    let mut night_days: HashMap<i64, HashSet<NaiveDate>> = HashMap::new();
    // Messages arrive in ts order, so the last write per day wins
    let mut last_speaker: HashMap<NaiveDate, i64> = HashMap::new();
    let mut first_speaker: HashMap<NaiveDate, i64> = HashMap::new();
    let mut total_night = 0u64;

    for message in &workset.messages {
        let Some(day) = adjusted_day(message.ts, options.utc_offset_secs) else {
            continue;
        };
        last_speaker.insert(day, message.member_id);
        first_speaker.entry(day).or_insert(message.member_id);

        let hour = local_hour(message.ts, options.utc_offset_secs);
        if in_night_window(hour) {
            total_night += 1;
            *night_counts.entry(message.member_id).or_default() += 1;
            night_days.entry(message.member_id).or_default().insert(day);
        }
    }

    let mut last_speaker_counts: HashMap<i64, u64> = HashMap::new();
    for member_id in last_speaker.values() {
        *last_speaker_counts.entry(*member_id).or_default() += 1;
    }
    let mut first_speaker_counts: HashMap<i64, u64> = HashMap::new();
    for member_id in first_speaker.values() {
        *first_speaker_counts.entry(*member_id).or_default() += 1;
    }

    let mut member_ids: HashSet<i64> = night_counts.keys().copied().collect();
    member_ids.extend(last_speaker_counts.keys().copied());
    member_ids.extend(first_speaker_counts.keys().copied());

    let mut members: Vec<NocturnalMemberStats> = member_ids
        .into_iter()
        .map(|member_id| {
            let night_messages = night_counts.get(&member_id).copied().unwrap_or(0);
            let last_days = last_speaker_counts.get(&member_id).copied().unwrap_or(0);
            let first_days = first_speaker_counts.get(&member_id).copied().unwrap_or(0);
            let (longest, current) = night_days
                .get(&member_id)
                .map(streaks)
                .unwrap_or((0, 0));
            NocturnalMemberStats {
                member_id,
                name: workset.member_name(member_id),
                night_messages,
                night_share: percentage(night_messages, total_night),
                title: title_for(night_messages),
                last_speaker_days: last_days,
                first_speaker_days: first_days,
                longest_night_streak: longest,
                current_night_streak: current,
                score: night_messages + last_days * LAST_SPEAKER_WEIGHT + longest * STREAK_WEIGHT,
            }
        })
        .collect();
    members.sort_by(|a, b| b.score.cmp(&a.score).then(a.member_id.cmp(&b.member_id)));

    let champion = members.first().filter(|m| m.score > 0).map(|m| m.member_id);

    Ok(NocturnalReport {
        total_night_messages: total_night,
        members,
        champion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{opts, store_with};
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    #[test]
    fn test_night_window_boundaries() {
        assert!(in_night_window(23));
        assert!(in_night_window(0));
        assert!(in_night_window(4));
        assert!(!in_night_window(5));
        assert!(!in_night_window(22));
    }

    #[test]
    fn test_one_night_is_one_adjusted_day() {
        // 23:30 and 02:30 the next calendar day: same adjusted day
        let store = store_with(&[
            ("a", ts(2023, 5, 1, 23, 30), "late"),
            ("a", ts(2023, 5, 2, 2, 30), "later"),
        ]);
        let report = analyze_nocturnal(&store, &opts(ts(2023, 5, 3, 12, 0))).unwrap();

        let a = &report.members[0];
        assert_eq!(a.night_messages, 2);
        assert_eq!(a.longest_night_streak, 1);
        // Every night message in the store is theirs
        assert!((a.night_share - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_streak_counts_consecutive_nights() {
        let store = store_with(&[
            ("a", ts(2023, 5, 1, 23, 30), "n1"),
            ("a", ts(2023, 5, 2, 23, 30), "n2"),
            ("a", ts(2023, 5, 3, 23, 30), "n3"),
            // gap
            ("a", ts(2023, 5, 7, 23, 30), "n4"),
        ]);
        let report = analyze_nocturnal(&store, &opts(ts(2023, 5, 8, 12, 0))).unwrap();
        assert_eq!(report.members[0].longest_night_streak, 3);
        // The isolated night after the gap is the trailing run
        assert_eq!(report.members[0].current_night_streak, 1);
        assert_eq!(report.members[0].title, Some("occasionally up late"));
    }

    #[test]
    fn test_first_speaker_of_day() {
        let store = store_with(&[
            ("a", ts(2023, 5, 1, 8, 0), "morning"),
            ("b", ts(2023, 5, 1, 9, 0), "hi"),
            ("b", ts(2023, 5, 2, 7, 0), "up early"),
        ]);
        let report = analyze_nocturnal(&store, &opts(ts(2023, 5, 3, 12, 0))).unwrap();

        let a = report.members.iter().find(|m| m.name == "Name a").unwrap();
        let b = report.members.iter().find(|m| m.name == "Name b").unwrap();
        assert_eq!(a.first_speaker_days, 1);
        assert_eq!(b.first_speaker_days, 1);
        assert_eq!(b.last_speaker_days, 2);
    }

    #[test]
    fn test_champion_scoring() {
        // a: 1 night message + last speaker on that day = 1 + 10 + 20
        // b: daytime chatter, last speaker on its own day = 10
        let store = store_with(&[
            ("b", ts(2023, 5, 1, 12, 0), "noon"),
            ("a", ts(2023, 5, 1, 23, 30), "night"),
            ("b", ts(2023, 5, 2, 12, 0), "noon again"),
        ]);
        let report = analyze_nocturnal(&store, &opts(ts(2023, 5, 3, 12, 0))).unwrap();

        let a = report
            .members
            .iter()
            .find(|m| m.name == "Name a")
            .unwrap();
        assert_eq!(a.score, 1 + 10 + 20);
        let b = report
            .members
            .iter()
            .find(|m| m.name == "Name b")
            .unwrap();
        assert_eq!(b.score, 10);
        assert_eq!(report.champion, Some(a.member_id));
    }

    #[test]
    fn test_empty_store_has_no_champion() {
        let store = store_with(&[]);
        let report = analyze_nocturnal(&store, &opts(0)).unwrap();
        assert_eq!(report.champion, None);
    }
}
