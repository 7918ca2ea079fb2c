//! Activity overview: who talks, when, and with what
//!
//! The baseline report the others hang off: per-member message counts and
//! share, the hour-of-day histogram, per-kind totals, and the busiest
//! single adjusted day of the chat's history.

use super::{adjusted_day, load_messages, local_hour, percentage, AnalysisOptions};
use crate::db::ChatStore;
use crate::error::Result;
use crate::types::MessageKind;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct MemberActivity {
    pub member_id: i64,
    pub name: String,
    pub messages: u64,
    /// Share of all counted messages, 0..=100
    pub percentage: f64,
    /// This member's busiest hour of day, analysis-local
    pub peak_hour: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusiestDay {
    pub date: NaiveDate,
    pub messages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub total_messages: u64,
    pub active_members: u64,
    /// Sorted by message count, descending
    pub members: Vec<MemberActivity>,
    /// Message count per analysis-local hour of day
    pub hourly: [u64; 24],
    /// Message count per kind, sorted descending
    pub kinds: Vec<(MessageKind, u64)>,
    pub busiest_day: Option<BusiestDay>,
}

pub fn analyze_activity(store: &ChatStore, options: &AnalysisOptions) -> Result<ActivityReport> {
    let workset = load_messages(store, options)?;
    let total = workset.messages.len() as u64;

    let mut per_member: HashMap<i64, u64> = HashMap::new();
    let mut per_member_hours: HashMap<i64, [u64; 24]> = HashMap::new();
    let mut hourly = [0u64; 24];
    let mut kinds: HashMap<MessageKind, u64> = HashMap::new();
    let mut days: HashMap<NaiveDate, u64> = HashMap::new();

    for message in &workset.messages {
        *per_member.entry(message.member_id).or_default() += 1;
        let hour = local_hour(message.ts, options.utc_offset_secs) as usize;
        hourly[hour] += 1;
        per_member_hours.entry(message.member_id).or_insert([0; 24])[hour] += 1;
        *kinds.entry(message.kind).or_default() += 1;
        if let Some(day) = adjusted_day(message.ts, options.utc_offset_secs) {
            *days.entry(day).or_default() += 1;
        }
    }

    let mut members: Vec<MemberActivity> = per_member
        .iter()
        .map(|(&member_id, &messages)| {
            let hours = per_member_hours.get(&member_id).copied().unwrap_or([0; 24]);
            let peak_hour = hours
                .iter()
                .enumerate()
                .max_by_key(|(_, count)| **count)
                .map(|(hour, _)| hour as u32)
                .unwrap_or(0);
            MemberActivity {
                member_id,
                name: workset.member_name(member_id),
                messages,
                percentage: percentage(messages, total),
                peak_hour,
            }
        })
        .collect();
    members.sort_by(|a, b| b.messages.cmp(&a.messages).then(a.member_id.cmp(&b.member_id)));

    let mut kinds: Vec<(MessageKind, u64)> = kinds.into_iter().collect();
    kinds.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

    let busiest_day = days
        .into_iter()
        .max_by_key(|&(date, count)| (count, std::cmp::Reverse(date)))
        .map(|(date, messages)| BusiestDay { date, messages });

    Ok(ActivityReport {
        total_messages: total,
        active_members: members.len() as u64,
        members,
        hourly,
        kinds,
        busiest_day,
    })
}
