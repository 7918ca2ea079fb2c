//! Daily top-poster ("dragon king") analysis
//!
//! For every calendar day the member with the most messages takes the day.
//! Unlike the night-owl analysis, days here roll over at local midnight.
//! A tie crowns everyone involved; nobody is dropped for sharing a peak.

use super::{load_messages, local_date, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct DragonKingMemberStats {
    pub member_id: i64,
    pub name: String,
    pub days_won: u64,
    /// Share of all counted days this member won, 0..=100
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DragonKingReport {
    pub days_counted: u64,
    /// Sorted by days won, descending
    pub members: Vec<DragonKingMemberStats>,
    /// Winner(s) of the most recent day
    pub reigning: Vec<i64>,
    pub reigning_day: Option<NaiveDate>,
}

pub fn analyze_dragon_kings(
    store: &ChatStore,
    options: &AnalysisOptions,
) -> Result<DragonKingReport> {
    let workset = load_messages(store, options)?;

    let mut per_day: HashMap<NaiveDate, HashMap<i64, u64>> = HashMap::new();
    for message in &workset.messages {
        let Some(day) = local_date(message.ts, options.utc_offset_secs) else {
            continue;
        };
        *per_day
            .entry(day)
            .or_default()
            .entry(message.member_id)
            .or_default() += 1;
    }

    let mut wins: HashMap<i64, u64> = HashMap::new();
    let mut reigning: Vec<i64> = Vec::new();
    let mut reigning_day: Option<NaiveDate> = None;

    for (day, counts) in &per_day {
        let Some(top) = counts.values().copied().max() else {
            continue;
        };
        let mut winners: Vec<i64> = counts
            .iter()
            .filter(|(_, count)| **count == top)
            .map(|(member_id, _)| *member_id)
            .collect();
        winners.sort_unstable();
        for member_id in &winners {
            *wins.entry(*member_id).or_default() += 1;
        }
        if reigning_day.map(|latest| *day > latest).unwrap_or(true) {
            reigning_day = Some(*day);
            reigning = winners;
        }
    }

    let days_counted = per_day.len() as u64;
    let mut members: Vec<DragonKingMemberStats> = wins
        .into_iter()
        .map(|(member_id, days_won)| DragonKingMemberStats {
            member_id,
            name: workset.member_name(member_id),
            days_won,
            win_rate: percentage(days_won, days_counted),
        })
        .collect();
    members.sort_by(|a, b| b.days_won.cmp(&a.days_won).then(a.member_id.cmp(&b.member_id)));

    Ok(DragonKingReport {
        days_counted,
        members,
        reigning,
        reigning_day,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{opts, store_with};
    use chrono::NaiveDate;

    fn ts(d: u32, hh: u32, idx: i64) -> i64 {
        NaiveDate::from_ymd_opt(2023, 5, d)
            .unwrap()
            .and_hms_opt(hh, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
            + idx
    }

    #[test]
    fn test_daily_winner_and_totals() {
        let store = store_with(&[
            // Day 1: a wins 2:1
            ("a", ts(1, 12, 0), "m"),
            ("a", ts(1, 12, 1), "m"),
            ("b", ts(1, 12, 2), "m"),
            // Day 2: b wins 1:0
            ("b", ts(2, 12, 0), "m"),
        ]);
        let report = analyze_dragon_kings(&store, &opts(ts(3, 12, 0))).unwrap();

        assert_eq!(report.days_counted, 2);
        assert_eq!(report.members.len(), 2);
        assert!(report.members.iter().all(|m| m.days_won == 1));
        assert_eq!(report.reigning_day, NaiveDate::from_ymd_opt(2023, 5, 2));
        assert_eq!(report.reigning.len(), 1);
    }

    #[test]
    fn test_tie_crowns_everyone() {
        let store = store_with(&[
            ("a", ts(1, 12, 0), "m"),
            ("b", ts(1, 12, 1), "m"),
            ("c", ts(1, 12, 2), "m"),
        ]);
        let report = analyze_dragon_kings(&store, &opts(ts(2, 12, 0))).unwrap();

        assert_eq!(report.days_counted, 1);
        assert_eq!(report.reigning.len(), 3);
        assert!(report.members.iter().all(|m| m.days_won == 1));
    }

    #[test]
    fn test_early_morning_belongs_to_its_calendar_day() {
        // Days split at midnight here, not at the night-owl 05:00 rollover
        let store = store_with(&[
            ("a", ts(1, 12, 0), "m"),
            ("a", ts(1, 12, 1), "m"),
            ("b", ts(2, 2, 0), "m"),
            ("b", ts(2, 2, 1), "m"),
            ("b", ts(2, 2, 2), "m"),
        ]);
        let report = analyze_dragon_kings(&store, &opts(ts(3, 12, 0))).unwrap();

        // a holds May 1, b's small-hours burst holds May 2
        assert_eq!(report.days_counted, 2);
        assert!(report.members.iter().all(|m| m.days_won == 1));
        assert!(report
            .members
            .iter()
            .all(|m| (m.win_rate - 50.0).abs() < 1e-9));
        assert_eq!(report.reigning_day, NaiveDate::from_ymd_opt(2023, 5, 2));
        assert_eq!(report.reigning.len(), 1);
    }
}
