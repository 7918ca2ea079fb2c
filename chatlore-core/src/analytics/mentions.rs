//! Mention analysis
//!
//! Counts directed `@name` mentions in text messages. A name resolves
//! against current account names and nicknames, user-maintained aliases,
//! and the name history: a mention written while a member used an old name
//! still resolves, but only within that name's validity interval.
//!
//! At each `@` the longest matching candidate wins, so `@Alexander` never
//! resolves to a member named `Alex` when both exist. Self-mentions are
//! ignored.

use super::{load_messages, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::Result;
use crate::types::MessageKind;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A pair is balanced when the minority direction carries at least this
/// share of the majority one.
const BALANCED_MIN_RATIO: f64 = 0.3;
/// A pair is unrequited when one direction carries at least this share of
/// the pair total.
const UNREQUITED_MIN_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Serialize)]
pub struct MentionMemberStats {
    pub member_id: i64,
    pub name: String,
    pub mentions_sent: u64,
    pub mentions_received: u64,
    /// Share of all mentions that pointed at this member, 0..=100
    pub received_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionPair {
    pub a: i64,
    pub b: i64,
    pub a_to_b: u64,
    pub b_to_a: u64,
    /// min/max of the two directions, 0..=1; 1.0 is perfectly mutual
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionReport {
    pub total_mentions: u64,
    /// Sorted by mentions received, descending
    pub members: Vec<MentionMemberStats>,
    /// Mutual pairs above the mention floor, most balanced first
    pub balanced_pairs: Vec<MentionPair>,
    /// Pairs where one side does at least 80% of the mentioning, with `a`
    /// as the pursuing side; busiest first
    pub unrequited_pairs: Vec<MentionPair>,
}

/// One resolvable name with its validity window.
struct Candidate {
    name: String,
    member_id: i64,
    start_ts: i64,
    end_ts: Option<i64>,
}

impl Candidate {
    fn valid_at(&self, ts: i64) -> bool {
        ts >= self.start_ts && self.end_ts.map(|end| ts < end).unwrap_or(true)
    }

    fn always(name: &str, member_id: i64) -> Self {
        Self {
            name: name.to_string(),
            member_id,
            start_ts: i64::MIN,
            end_ts: None,
        }
    }
}

/// Resolve the mention starting right after the `@` at `at`, preferring the
/// longest valid candidate name.
fn resolve_at(rest: &str, ts: i64, candidates: &[Candidate]) -> Option<i64> {
    candidates
        .iter()
        .filter(|c| c.valid_at(ts) && !c.name.is_empty() && rest.starts_with(c.name.as_str()))
        .max_by_key(|c| c.name.len())
        .map(|c| c.member_id)
}

pub fn analyze_mentions(
    store: &ChatStore,
    options: &AnalysisOptions,
    min_pair_mentions: u64,
) -> Result<MentionReport> {
    let workset = load_messages(store, options)?;

    let mut candidates: Vec<Candidate> = Vec::new();
    for member in workset.members.values() {
        candidates.push(Candidate::always(&member.account_name, member.id));
        if let Some(nickname) = &member.group_nickname {
            candidates.push(Candidate::always(nickname, member.id));
        }
        for alias in &member.aliases {
            candidates.push(Candidate::always(alias, member.id));
        }
    }
    for interval in store.all_name_history()? {
        if workset.members.contains_key(&interval.member_id) {
            candidates.push(Candidate {
                name: interval.name,
                member_id: interval.member_id,
                start_ts: interval.start_ts,
                end_ts: interval.end_ts,
            });
        }
    }

    let mut sent: HashMap<i64, u64> = HashMap::new();
    let mut received: HashMap<i64, u64> = HashMap::new();
    let mut directed: HashMap<(i64, i64), u64> = HashMap::new();
    let mut total = 0u64;

    for message in &workset.messages {
        if message.kind != MessageKind::Text {
            continue;
        }
        let Some(content) = message.content.as_deref() else {
            continue;
        };
        // Repeating the same @target inside one message counts once
        let mut seen: HashSet<i64> = HashSet::new();
        for (at, _) in content.match_indices('@') {
            let rest = &content[at + 1..];
            let Some(target) = resolve_at(rest, message.ts, &candidates) else {
                continue;
            };
            if target == message.member_id || !seen.insert(target) {
                continue;
            }
            total += 1;
            *sent.entry(message.member_id).or_default() += 1;
            *received.entry(target).or_default() += 1;
            *directed.entry((message.member_id, target)).or_default() += 1;
        }
    }

    let mut member_ids: Vec<i64> = sent.keys().chain(received.keys()).copied().collect();
    member_ids.sort_unstable();
    member_ids.dedup();
    let mut members: Vec<MentionMemberStats> = member_ids
        .into_iter()
        .map(|member_id| {
            let mentions_received = received.get(&member_id).copied().unwrap_or(0);
            MentionMemberStats {
                member_id,
                name: workset.member_name(member_id),
                mentions_sent: sent.get(&member_id).copied().unwrap_or(0),
                mentions_received,
                received_share: percentage(mentions_received, total),
            }
        })
        .collect();
    members.sort_by(|a, b| {
        b.mentions_received
            .cmp(&a.mentions_received)
            .then(a.member_id.cmp(&b.member_id))
    });

    let mut balanced_pairs: Vec<MentionPair> = Vec::new();
    let mut unrequited_pairs: Vec<MentionPair> = Vec::new();
    for (&(a, b), &a_to_b) in &directed {
        if a >= b && directed.contains_key(&(b, a)) {
            // Visited from the other direction
            continue;
        }
        let b_to_a = directed.get(&(b, a)).copied().unwrap_or(0);
        let total_pair = a_to_b + b_to_a;
        if total_pair < min_pair_mentions {
            continue;
        }
        let max_dir = a_to_b.max(b_to_a);
        let balance = a_to_b.min(b_to_a) as f64 / max_dir as f64;
        if max_dir as f64 / total_pair as f64 >= UNREQUITED_MIN_SHARE {
            // Orient `a` as the pursuing side
            let (a, b, a_to_b, b_to_a) = if a_to_b >= b_to_a {
                (a, b, a_to_b, b_to_a)
            } else {
                (b, a, b_to_a, a_to_b)
            };
            unrequited_pairs.push(MentionPair {
                a,
                b,
                a_to_b,
                b_to_a,
                balance,
            });
        } else if balance >= BALANCED_MIN_RATIO {
            let (a, b, a_to_b, b_to_a) = if a < b {
                (a, b, a_to_b, b_to_a)
            } else {
                (b, a, b_to_a, a_to_b)
            };
            balanced_pairs.push(MentionPair {
                a,
                b,
                a_to_b,
                b_to_a,
                balance,
            });
        }
    }
    balanced_pairs.sort_by(|x, y| {
        y.balance
            .total_cmp(&x.balance)
            .then((y.a_to_b + y.b_to_a).cmp(&(x.a_to_b + x.b_to_a)))
            .then(x.a.cmp(&y.a))
    });
    unrequited_pairs.sort_by(|x, y| {
        (y.a_to_b + y.b_to_a)
            .cmp(&(x.a_to_b + x.b_to_a))
            .then(x.a.cmp(&y.a))
    });

    Ok(MentionReport {
        total_mentions: total,
        members,
        balanced_pairs,
        unrequited_pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::opts;
    use crate::db::ChatStore;
    use crate::types::{NameInterval, NameKind, ParsedMessage};

    fn store_with_named(rows: &[(&str, &str, i64, &str)]) -> ChatStore {
        let store = ChatStore::open_in_memory().unwrap();
        for (sender, name, ts, content) in rows {
            let id = store.resolve_or_create_member(sender, name, None).unwrap();
            store.update_member_names(id, name, None).unwrap();
            store
                .insert_message(id, &ParsedMessage::text(sender, name, *ts, content))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_directed_mentions() {
        let store = store_with_named(&[
            ("u1", "Alice", 100, "hello everyone"),
            ("u2", "Bob", 110, "@Alice are you around"),
            ("u1", "Alice", 120, "@Bob yes"),
            ("u2", "Bob", 130, "@Alice ok, @Alice really"),
        ]);
        let report = analyze_mentions(&store, &opts(1_000), 10).unwrap();

        // The doubled @Alice in one message counts once
        assert_eq!(report.total_mentions, 3);
        let alice = report.members.iter().find(|m| m.name == "Alice").unwrap();
        assert_eq!(alice.mentions_received, 2);
        assert_eq!(alice.mentions_sent, 1);
        assert!((alice.received_share - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unrequited_pair() {
        let mut rows: Vec<(&str, &str, i64, String)> = Vec::new();
        for i in 0..9 {
            rows.push(("u1", "Alice", 100 + i * 10, "@Bob hello".to_string()));
        }
        rows.push(("u2", "Bob", 400, "@Alice what".to_string()));
        let store = ChatStore::open_in_memory().unwrap();
        for (sender, name, ts, content) in &rows {
            let id = store.resolve_or_create_member(sender, name, None).unwrap();
            store
                .insert_message(id, &ParsedMessage::text(sender, name, *ts, content))
                .unwrap();
        }

        // 9 against 1 is a 90% share: unrequited, not balanced
        let report = analyze_mentions(&store, &opts(1_000), 10).unwrap();
        assert!(report.balanced_pairs.is_empty());
        assert_eq!(report.unrequited_pairs.len(), 1);
        let pair = &report.unrequited_pairs[0];
        assert_eq!(pair.a_to_b, 9);
        assert_eq!(pair.b_to_a, 1);
        let alice = store.get_member("u1").unwrap().unwrap();
        assert_eq!(pair.a, alice.id);
    }

    #[test]
    fn test_longest_name_wins() {
        let store = store_with_named(&[
            ("u1", "Alex", 100, "hi"),
            ("u2", "Alexander", 110, "hi"),
            ("u3", "Cara", 120, "@Alexander ping"),
        ]);
        let report = analyze_mentions(&store, &opts(1_000), 10).unwrap();
        let alexander = report
            .members
            .iter()
            .find(|m| m.name == "Alexander")
            .unwrap();
        assert_eq!(alexander.mentions_received, 1);
        assert!(report.members.iter().all(|m| m.name != "Alex"));
    }

    #[test]
    fn test_historical_name_resolves_within_interval() {
        let store = store_with_named(&[
            ("u1", "NewName", 500, "hi"),
            ("u2", "Bob", 150, "@OldName hello"),
            ("u2", "Bob", 600, "@OldName are you there"),
        ]);
        let u1 = store.get_member("u1").unwrap().unwrap();
        store
            .insert_name_intervals(&[
                NameInterval {
                    member_id: u1.id,
                    kind: NameKind::AccountName,
                    name: "OldName".to_string(),
                    start_ts: 100,
                    end_ts: Some(400),
                },
                NameInterval {
                    member_id: u1.id,
                    kind: NameKind::AccountName,
                    name: "NewName".to_string(),
                    start_ts: 400,
                    end_ts: None,
                },
            ])
            .unwrap();

        let report = analyze_mentions(&store, &opts(1_000), 10).unwrap();
        // Only the mention inside the old name's validity window resolves
        assert_eq!(report.total_mentions, 1);
        let stats = report
            .members
            .iter()
            .find(|m| m.member_id == u1.id)
            .unwrap();
        assert_eq!(stats.mentions_received, 1);
    }

    #[test]
    fn test_balanced_pairs_floor() {
        let mut rows: Vec<(&str, &str, i64, String)> = Vec::new();
        for i in 0..6 {
            rows.push(("u1", "Alice", 100 + i * 10, "@Bob hey".to_string()));
            rows.push(("u2", "Bob", 105 + i * 10, "@Alice hey".to_string()));
        }
        let store = ChatStore::open_in_memory().unwrap();
        for (sender, name, ts, content) in &rows {
            let id = store.resolve_or_create_member(sender, name, None).unwrap();
            store
                .insert_message(id, &ParsedMessage::text(sender, name, *ts, content))
                .unwrap();
        }

        let report = analyze_mentions(&store, &opts(1_000), 10).unwrap();
        assert_eq!(report.balanced_pairs.len(), 1);
        let pair = &report.balanced_pairs[0];
        assert_eq!(pair.a_to_b + pair.b_to_a, 12);
        assert!((pair.balance - 1.0).abs() < 1e-9);

        // Raising the floor above the total hides the pair
        let report = analyze_mentions(&store, &opts(1_000), 13).unwrap();
        assert!(report.balanced_pairs.is_empty());
    }
}
