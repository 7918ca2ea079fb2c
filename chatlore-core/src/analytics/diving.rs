//! Lurker ("diving") analysis
//!
//! Two kinds of silence per member: how long they have been quiet now
//! (reference instant minus their last message) and the longest gap between
//! two of their messages historically. The second one is the "comeback":
//! they did eventually resurface.

use super::{load_messages, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;

const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Serialize)]
pub struct DivingMemberStats {
    pub member_id: i64,
    pub name: String,
    pub messages: u64,
    /// Share of all messages in range, 0..=100
    pub message_share: f64,
    pub last_message_ts: i64,
    /// Seconds of silence up to the reference instant
    pub current_silence_secs: i64,
    /// The same silence in days
    pub silence_days: f64,
    /// Longest gap between two consecutive messages, if they ever returned
    pub longest_gap_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DivingReport {
    /// Sorted by current silence, descending: the deepest diver first
    pub members: Vec<DivingMemberStats>,
    /// Member with the longest gap they actually came back from
    pub deepest_comeback: Option<(i64, i64)>,
}

pub fn analyze_diving(store: &ChatStore, options: &AnalysisOptions) -> Result<DivingReport> {
    let workset = load_messages(store, options)?;
    let now = options.now();

    struct Track {
        count: u64,
        last_ts: i64,
        longest_gap: Option<i64>,
    }
    let mut tracks: HashMap<i64, Track> = HashMap::new();

    for message in &workset.messages {
        match tracks.get_mut(&message.member_id) {
            Some(track) => {
                let gap = message.ts - track.last_ts;
                if track.longest_gap.map(|best| gap > best).unwrap_or(true) {
                    track.longest_gap = Some(gap);
                }
                track.last_ts = message.ts;
                track.count += 1;
            }
            None => {
                tracks.insert(
                    message.member_id,
                    Track {
                        count: 1,
                        last_ts: message.ts,
                        longest_gap: None,
                    },
                );
            }
        }
    }

    let total_messages = workset.messages.len() as u64;
    let mut members: Vec<DivingMemberStats> = tracks
        .into_iter()
        .map(|(member_id, track)| {
            let silence = (now - track.last_ts).max(0);
            DivingMemberStats {
                member_id,
                name: workset.member_name(member_id),
                messages: track.count,
                message_share: percentage(track.count, total_messages),
                last_message_ts: track.last_ts,
                current_silence_secs: silence,
                silence_days: silence as f64 / SECS_PER_DAY,
                longest_gap_secs: track.longest_gap,
            }
        })
        .collect();
    members.sort_by(|a, b| {
        b.current_silence_secs
            .cmp(&a.current_silence_secs)
            .then(a.member_id.cmp(&b.member_id))
    });

    let deepest_comeback = members
        .iter()
        .filter_map(|m| m.longest_gap_secs.map(|gap| (m.member_id, gap)))
        .max_by_key(|(member_id, gap)| (*gap, std::cmp::Reverse(*member_id)));

    Ok(DivingReport {
        members,
        deepest_comeback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{opts, store_with};

    #[test]
    fn test_silence_and_gaps() {
        let store = store_with(&[
            ("a", 1_000, "early"),
            ("b", 2_000, "hi"),
            ("a", 10_000, "back after a while"),
            ("b", 10_500, "still here"),
        ]);
        let report = analyze_diving(&store, &opts(20_000)).unwrap();

        // a has been quiet longer than b
        assert_eq!(report.members[0].name, "Name a");
        assert_eq!(report.members[0].current_silence_secs, 10_000);
        assert_eq!(report.members[0].longest_gap_secs, Some(9_000));
        assert!((report.members[0].silence_days - 10_000.0 / 86_400.0).abs() < 1e-9);
        assert!((report.members[0].message_share - 50.0).abs() < 1e-9);
        assert_eq!(report.members[1].current_silence_secs, 9_500);

        assert_eq!(
            report.deepest_comeback,
            Some((report.members[0].member_id, 9_000))
        );
    }

    #[test]
    fn test_single_message_member_has_no_gap() {
        let store = store_with(&[("a", 1_000, "only one")]);
        let report = analyze_diving(&store, &opts(5_000)).unwrap();
        assert_eq!(report.members[0].longest_gap_secs, None);
        assert_eq!(report.deepest_comeback, None);
    }

    #[test]
    fn test_empty_report() {
        let store = store_with(&[]);
        let report = analyze_diving(&store, &opts(0)).unwrap();
        assert!(report.members.is_empty());
    }
}
