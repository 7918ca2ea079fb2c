//! Laughter analysis
//!
//! Keywords compile to one regex each. A keyword that is a single repeated
//! character ("哈哈") matches that many repeats or more, so longer bursts
//! still count; anything else matches literally. A built-in keysmash
//! pattern (hhh, 哈哈哈, 23333) stays on regardless of configuration.
//!
//! Comedian credit goes upstream: when someone laughs within 60 seconds of
//! another member's non-laugh message, that earlier message earned the
//! laugh. The member whose messages earn the most laughs is the comedian.

use super::{load_messages, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::{Error, Result};
use crate::types::MessageKind;
use regex::{escape, Regex, RegexSet};
use serde::Serialize;
use std::collections::HashMap;

/// How long after a message a laugh still counts as a reaction to it.
const REACTION_WINDOW_SECS: i64 = 60;

/// Used when the configured keyword list is empty.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "哈哈", "笑死", "xswl", "草", "lol", "lmao", "rofl", "笑哭", "绷不住",
];

#[derive(Debug, Clone, Serialize)]
pub struct LaughMemberStats {
    pub member_id: i64,
    pub name: String,
    pub messages: u64,
    pub laugh_messages: u64,
    /// Share of this member's own messages that are laughs, 0..=100
    pub laugh_rate: f64,
    /// Laughs other members sent in reaction to this member's messages
    pub laughs_earned: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaughReport {
    pub total_laughs: u64,
    /// Sorted by laugh messages sent, descending
    pub members: Vec<LaughMemberStats>,
    /// Member whose messages earned the most laughs
    pub comedian: Option<i64>,
}

/// Compiled laugh detector.
struct LaughMatcher {
    keywords: RegexSet,
    keysmash: Regex,
}

/// Per-keyword pattern. A keyword of n repeats of one character matches
/// n-or-more repeats, so "哈哈" also catches "哈哈哈哈".
fn keyword_pattern(keyword: &str) -> String {
    let mut chars = keyword.chars();
    if let (Some(first), n) = (chars.next(), keyword.chars().count()) {
        if n >= 2 && keyword.chars().all(|c| c == first) {
            return format!("{}{{{},}}", escape(&first.to_string()), n);
        }
    }
    escape(keyword)
}

impl LaughMatcher {
    fn new(keywords: &[String]) -> Result<Self> {
        let patterns: Vec<String> = if keywords.is_empty() {
            DEFAULT_KEYWORDS.iter().map(|k| keyword_pattern(k)).collect()
        } else {
            keywords.iter().map(|k| keyword_pattern(k)).collect()
        };
        let keywords = RegexSet::new(&patterns)
            .map_err(|e| Error::Config(format!("bad laugh keyword: {}", e)))?;
        // Runs of three or more laugh-ish characters
        let keysmash = Regex::new(r"(?i)h{3,}|哈{3,}|嘿{3,}|[23]{3,}").unwrap();
        Ok(Self { keywords, keysmash })
    }

    fn is_laugh(&self, text: &str) -> bool {
        self.keywords.is_match(&text.to_lowercase()) || self.keysmash.is_match(text)
    }
}

pub fn analyze_laughs(
    store: &ChatStore,
    options: &AnalysisOptions,
    keywords: &[String],
) -> Result<LaughReport> {
    let workset = load_messages(store, options)?;
    let matcher = LaughMatcher::new(keywords)?;

    #[derive(Default)]
    struct Tally {
        messages: u64,
        laughs: u64,
        earned: u64,
    }
    let mut tallies: HashMap<i64, Tally> = HashMap::new();
    let mut total_laughs = 0u64;
    // Most recent non-laugh message, the candidate joke
    let mut last_setup: Option<(i64, i64)> = None;

    for message in &workset.messages {
        tallies.entry(message.member_id).or_default().messages += 1;

        let laugh = message.kind == MessageKind::Text
            && message
                .content
                .as_deref()
                .map(|text| matcher.is_laugh(text))
                .unwrap_or(false);

        if laugh {
            total_laughs += 1;
            tallies.entry(message.member_id).or_default().laughs += 1;
            if let Some((setup_sender, setup_ts)) = last_setup {
                if setup_sender != message.member_id
                    && message.ts - setup_ts <= REACTION_WINDOW_SECS
                {
                    tallies.entry(setup_sender).or_default().earned += 1;
                }
            }
        } else {
            last_setup = Some((message.member_id, message.ts));
        }
    }

    let mut members: Vec<LaughMemberStats> = tallies
        .into_iter()
        .map(|(member_id, tally)| LaughMemberStats {
            member_id,
            name: workset.member_name(member_id),
            messages: tally.messages,
            laugh_messages: tally.laughs,
            laugh_rate: percentage(tally.laughs, tally.messages),
            laughs_earned: tally.earned,
        })
        .collect();
    members.sort_by(|a, b| {
        b.laugh_messages
            .cmp(&a.laugh_messages)
            .then(a.member_id.cmp(&b.member_id))
    });

    let comedian = members
        .iter()
        .max_by_key(|m| (m.laughs_earned, std::cmp::Reverse(m.member_id)))
        .filter(|m| m.laughs_earned > 0)
        .map(|m| m.member_id);

    Ok(LaughReport {
        total_laughs,
        members,
        comedian,
    })
}
