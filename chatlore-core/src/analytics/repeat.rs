//! Repeat-chain analysis
//!
//! A repeat chain is a run of consecutive messages with identical trimmed
//! text where each link comes from a different sender than the link before
//! it. A member repeating their own message neither extends nor breaks the
//! chain; a sender may rejoin later (A, B, A is a three-link chain). A chain
//! qualifies once it has three links.
//!
//! The member who posts something different while a qualifying chain is
//! running is its breaker; a chain still open when the data ends has no
//! breaker. The first link is the chain's originator, the second its
//! initiator (they turned a message into a chain). The follower who joined
//! a chain fastest, within a 60 second window, takes the speed credit for
//! that chain.

use super::{load_messages, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::Result;
use crate::types::MessageKind;
use serde::Serialize;
use std::collections::HashMap;

/// Minimum links for a chain to count.
const MIN_CHAIN_LEN: usize = 3;
/// Join-speed credit window, seconds.
const FASTEST_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct RepeatMemberStats {
    pub member_id: i64,
    pub name: String,
    /// Chains this member started
    pub originated: u64,
    /// Chains where this member was the second link, turning a message
    /// into a chain
    pub initiated: u64,
    /// Individual chain joins
    pub joined: u64,
    /// Qualifying chains this member broke
    pub broke: u64,
    /// Chains where this member was the fastest joiner
    pub fastest_joins: u64,
    /// Share of all chain joins, 0..=100
    pub join_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainRecord {
    pub content: String,
    pub length: usize,
    pub start_ts: i64,
    /// None when the chain ran to the end of the data
    pub breaker: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepeatReport {
    pub total_chains: u64,
    pub longest_chain: Option<ChainRecord>,
    /// Chain contents by the longest chain each produced, descending
    pub top_content: Vec<(String, u64)>,
    /// Sorted by joins, descending
    pub members: Vec<RepeatMemberStats>,
}

#[derive(Default)]
struct Tally {
    originated: u64,
    initiated: u64,
    joined: u64,
    broke: u64,
    fastest_joins: u64,
}

struct OpenChain {
    content: String,
    start_ts: i64,
    last_ts: i64,
    last_sender: i64,
    links: Vec<i64>,
    /// Fastest (delta, member) join so far, within the window
    fastest: Option<(i64, i64)>,
}

impl OpenChain {
    fn new(content: String, ts: i64, sender: i64) -> Self {
        Self {
            content,
            start_ts: ts,
            last_ts: ts,
            last_sender: sender,
            links: vec![sender],
            fastest: None,
        }
    }

    fn extend(&mut self, ts: i64, sender: i64) {
        let delta = ts - self.last_ts;
        if delta <= FASTEST_WINDOW_SECS
            && self.fastest.map(|(best, _)| delta < best).unwrap_or(true)
        {
            self.fastest = Some((delta, sender));
        }
        self.links.push(sender);
        self.last_ts = ts;
        self.last_sender = sender;
    }

    fn qualifies(&self) -> bool {
        self.links.len() >= MIN_CHAIN_LEN
    }
}

pub fn analyze_repeats(store: &ChatStore, options: &AnalysisOptions) -> Result<RepeatReport> {
    let workset = load_messages(store, options)?;

    let mut tallies: HashMap<i64, Tally> = HashMap::new();
    let mut content_counts: HashMap<String, u64> = HashMap::new();
    let mut total_chains = 0u64;
    let mut longest: Option<ChainRecord> = None;
    let mut open: Option<OpenChain> = None;

    let mut close = |chain: OpenChain,
                     breaker: Option<i64>,
                     tallies: &mut HashMap<i64, Tally>| {
        if !chain.qualifies() {
            return;
        }
        total_chains += 1;
        let best = content_counts.entry(chain.content.clone()).or_default();
        *best = (*best).max(chain.links.len() as u64);

        tallies.entry(chain.links[0]).or_default().originated += 1;
        tallies.entry(chain.links[1]).or_default().initiated += 1;
        for &member in &chain.links[1..] {
            tallies.entry(member).or_default().joined += 1;
        }
        if let Some((_, fastest)) = chain.fastest {
            tallies.entry(fastest).or_default().fastest_joins += 1;
        }
        if let Some(breaker) = breaker {
            tallies.entry(breaker).or_default().broke += 1;
        }

        let record = ChainRecord {
            length: chain.links.len(),
            content: chain.content,
            start_ts: chain.start_ts,
            breaker,
        };
        let longer = longest
            .as_ref()
            .map(|best| record.length > best.length)
            .unwrap_or(true);
        if longer {
            longest = Some(record);
        }
    };

    for message in &workset.messages {
        let content = match (&message.kind, message.content.as_deref()) {
            (MessageKind::Text, Some(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            _ => None,
        };

        match (open.take(), content) {
            (Some(mut chain), Some(text)) if chain.content == text => {
                if message.member_id != chain.last_sender {
                    chain.extend(message.ts, message.member_id);
                }
                // Same sender again: the chain just keeps waiting
                open = Some(chain);
            }
            (Some(chain), Some(text)) => {
                close(chain, Some(message.member_id), &mut tallies);
                open = Some(OpenChain::new(
                    text.to_string(),
                    message.ts,
                    message.member_id,
                ));
            }
            (Some(chain), None) => {
                close(chain, Some(message.member_id), &mut tallies);
            }
            (None, Some(text)) => {
                open = Some(OpenChain::new(
                    text.to_string(),
                    message.ts,
                    message.member_id,
                ));
            }
            (None, None) => {}
        }
    }
    if let Some(chain) = open.take() {
        close(chain, None, &mut tallies);
    }

    let total_joins: u64 = tallies.values().map(|t| t.joined).sum();
    let mut members: Vec<RepeatMemberStats> = tallies
        .into_iter()
        .filter(|(_, t)| t.originated + t.joined + t.broke + t.fastest_joins > 0)
        .map(|(member_id, t)| RepeatMemberStats {
            member_id,
            name: workset.member_name(member_id),
            originated: t.originated,
            initiated: t.initiated,
            joined: t.joined,
            broke: t.broke,
            fastest_joins: t.fastest_joins,
            join_share: percentage(t.joined, total_joins),
        })
        .collect();
    members.sort_by(|a, b| b.joined.cmp(&a.joined).then(a.member_id.cmp(&b.member_id)));

    let mut top_content: Vec<(String, u64)> = content_counts.into_iter().collect();
    top_content.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_content.truncate(20);

    Ok(RepeatReport {
        total_chains,
        longest_chain: longest,
        top_content,
        members,
    })
}
