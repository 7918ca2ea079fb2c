//! Meme battle analysis
//!
//! A battle is an unbroken run of image or sticker messages involving at
//! least two members and at least three volleys. Any other message kind
//! ends the run. Within a battle the member who fired the most images wins
//! it; ties crown everyone, same as the daily top-poster ranking.

use super::{load_messages, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;

const MIN_BATTLE_VOLLEYS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct MemeBattleMemberStats {
    pub member_id: i64,
    pub name: String,
    /// Images this member contributed across all battles
    pub images_in_battles: u64,
    /// Share of all battle images, 0..=100
    pub image_share: f64,
    pub battles_won: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BattleRecord {
    pub start_ts: i64,
    pub volleys: usize,
    pub participants: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemeBattleReport {
    pub total_battles: u64,
    pub largest_battle: Option<BattleRecord>,
    /// Sorted by battles won, then images thrown, descending
    pub members: Vec<MemeBattleMemberStats>,
}

struct OpenRun {
    start_ts: i64,
    counts: HashMap<i64, u64>,
    volleys: usize,
}

pub fn analyze_meme_battles(
    store: &ChatStore,
    options: &AnalysisOptions,
) -> Result<MemeBattleReport> {
    let workset = load_messages(store, options)?;

    #[derive(Default)]
    struct Tally {
        images: u64,
        wins: u64,
    }
    let mut tallies: HashMap<i64, Tally> = HashMap::new();
    let mut total_battles = 0u64;
    let mut largest: Option<BattleRecord> = None;
    let mut open: Option<OpenRun> = None;

    let mut close = |run: OpenRun, tallies: &mut HashMap<i64, Tally>| {
        if run.volleys < MIN_BATTLE_VOLLEYS || run.counts.len() < 2 {
            return;
        }
        total_battles += 1;

        let top = run.counts.values().copied().max().unwrap_or(0);
        for (&member_id, &count) in &run.counts {
            let tally = tallies.entry(member_id).or_default();
            tally.images += count;
            if count == top {
                tally.wins += 1;
            }
        }

        let record = BattleRecord {
            start_ts: run.start_ts,
            volleys: run.volleys,
            participants: run.counts.len(),
        };
        let bigger = largest
            .as_ref()
            .map(|best| record.volleys > best.volleys)
            .unwrap_or(true);
        if bigger {
            largest = Some(record);
        }
    };

    for message in &workset.messages {
        if message.kind.is_image_like() {
            let run = open.get_or_insert_with(|| OpenRun {
                start_ts: message.ts,
                counts: HashMap::new(),
                volleys: 0,
            });
            *run.counts.entry(message.member_id).or_default() += 1;
            run.volleys += 1;
        } else if let Some(run) = open.take() {
            close(run, &mut tallies);
        }
    }
    if let Some(run) = open.take() {
        close(run, &mut tallies);
    }

    let total_images: u64 = tallies.values().map(|t| t.images).sum();
    let mut members: Vec<MemeBattleMemberStats> = tallies
        .into_iter()
        .map(|(member_id, tally)| MemeBattleMemberStats {
            member_id,
            name: workset.member_name(member_id),
            images_in_battles: tally.images,
            image_share: percentage(tally.images, total_images),
            battles_won: tally.wins,
        })
        .collect();
    members.sort_by(|a, b| {
        b.battles_won
            .cmp(&a.battles_won)
            .then(b.images_in_battles.cmp(&a.images_in_battles))
            .then(a.member_id.cmp(&b.member_id))
    });

    Ok(MemeBattleReport {
        total_battles,
        largest_battle: largest,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::opts;
    use crate::db::ChatStore;
    use crate::types::{MessageKind, ParsedMessage};

    fn store_with_kinds(rows: &[(&str, i64, MessageKind)]) -> ChatStore {
        let store = ChatStore::open_in_memory().unwrap();
        for (sender, ts, kind) in rows {
            let name = format!("Name {}", sender);
            let id = store.resolve_or_create_member(sender, &name, None).unwrap();
            let mut msg = ParsedMessage::text(sender, &name, *ts, "x");
            msg.kind = *kind;
            if !matches!(kind, MessageKind::Text) {
                msg.content = None;
            }
            store.insert_message(id, &msg).unwrap();
        }
        store
    }

    #[test]
    fn test_battle_detection_and_winner() {
        let store = store_with_kinds(&[
            ("a", 100, MessageKind::Image),
            ("b", 110, MessageKind::Emoji),
            ("a", 120, MessageKind::Image),
            ("c", 130, MessageKind::Text),
        ]);
        let report = analyze_meme_battles(&store, &opts(1_000)).unwrap();

        assert_eq!(report.total_battles, 1);
        let largest = report.largest_battle.unwrap();
        assert_eq!(largest.volleys, 3);
        assert_eq!(largest.participants, 2);

        let a = report.members.iter().find(|m| m.name == "Name a").unwrap();
        assert_eq!(a.battles_won, 1);
        assert_eq!(a.images_in_battles, 2);
        // a fired two of the battle's three images
        assert!((a.image_share - 200.0 / 3.0).abs() < 1e-9);
        let b = report.members.iter().find(|m| m.name == "Name b").unwrap();
        assert_eq!(b.battles_won, 0);
    }

    #[test]
    fn test_solo_spam_is_not_a_battle() {
        let store = store_with_kinds(&[
            ("a", 100, MessageKind::Image),
            ("a", 110, MessageKind::Image),
            ("a", 120, MessageKind::Image),
            ("a", 130, MessageKind::Image),
        ]);
        let report = analyze_meme_battles(&store, &opts(1_000)).unwrap();
        assert_eq!(report.total_battles, 0);
        assert!(report.members.is_empty());
    }

    #[test]
    fn test_text_breaks_the_run() {
        let store = store_with_kinds(&[
            ("a", 100, MessageKind::Image),
            ("b", 110, MessageKind::Image),
            ("a", 120, MessageKind::Text),
            ("b", 130, MessageKind::Image),
        ]);
        let report = analyze_meme_battles(&store, &opts(1_000)).unwrap();
        // Two volleys before the break, one after: neither qualifies
        assert_eq!(report.total_battles, 0);
    }

    #[test]
    fn test_tie_crowns_both() {
        let store = store_with_kinds(&[
            ("a", 100, MessageKind::Image),
            ("b", 110, MessageKind::Image),
            ("a", 120, MessageKind::Emoji),
            ("b", 130, MessageKind::Emoji),
        ]);
        let report = analyze_meme_battles(&store, &opts(1_000)).unwrap();
        assert_eq!(report.total_battles, 1);
        assert!(report.members.iter().all(|m| m.battles_won == 1));
    }

    #[test]
    fn test_trailing_run_closes() {
        let store = store_with_kinds(&[
            ("a", 100, MessageKind::Image),
            ("b", 110, MessageKind::Image),
            ("a", 120, MessageKind::Image),
        ]);
        let report = analyze_meme_battles(&store, &opts(1_000)).unwrap();
        assert_eq!(report.total_battles, 1);
    }
}
