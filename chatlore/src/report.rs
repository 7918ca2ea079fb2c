//! Report selection and text rendering for `chatlore analyze`.

use anyhow::{bail, Context, Result};
use chatlore_core::analytics::{
    analyze_activity, analyze_diving, analyze_dragon_kings, analyze_laughs, analyze_meme_battles,
    analyze_mentions, analyze_nocturnal, analyze_repeats, AnalysisOptions,
};
use chatlore_core::{ChatStore, Config};
use serde::Serialize;

pub const REPORT_NAMES: &[&str] = &[
    "activity",
    "repeats",
    "nocturnal",
    "dragon-kings",
    "diving",
    "mentions",
    "laughs",
    "meme-battles",
    "all",
];

pub fn run(
    store: &ChatStore,
    name: &str,
    options: &AnalysisOptions,
    config: &Config,
    json: bool,
) -> Result<()> {
    match name {
        "activity" => {
            let report = analyze_activity(store, options)?;
            emit(&report, json, render_activity)
        }
        "repeats" => {
            let report = analyze_repeats(store, options)?;
            emit(&report, json, render_repeats)
        }
        "nocturnal" => {
            let report = analyze_nocturnal(store, options)?;
            emit(&report, json, render_nocturnal)
        }
        "dragon-kings" => {
            let report = analyze_dragon_kings(store, options)?;
            emit(&report, json, render_dragon)
        }
        "diving" => {
            let report = analyze_diving(store, options)?;
            emit(&report, json, render_diving)
        }
        "mentions" => {
            let report = analyze_mentions(store, options, config.analytics.min_pair_mentions)?;
            emit(&report, json, render_mentions)
        }
        "laughs" => {
            let report = analyze_laughs(store, options, &config.analytics.laugh_keywords)?;
            emit(&report, json, render_laughs)
        }
        "meme-battles" => {
            let report = analyze_meme_battles(store, options)?;
            emit(&report, json, render_memes)
        }
        "all" => {
            for name in REPORT_NAMES.iter().filter(|n| **n != "all") {
                run(store, name, options, config, json)?;
                if !json {
                    println!();
                }
            }
            Ok(())
        }
        other => bail!(
            "unknown report '{}'; available: {}",
            other,
            REPORT_NAMES.join(", ")
        ),
    }
}

fn emit<R, F>(report: &R, json: bool, render: F) -> Result<()>
where
    R: Serialize,
    F: Fn(&R),
{
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("failed to serialize report")?
        );
    } else {
        render(report);
    }
    Ok(())
}

const TOP: usize = 10;

fn render_activity(report: &chatlore_core::analytics::ActivityReport) {
    println!("== Activity ==");
    println!(
        "{} messages from {} members",
        report.total_messages, report.active_members
    );
    if let Some(day) = &report.busiest_day {
        println!("Busiest day: {} ({} messages)", day.date, day.messages);
    }
    for member in report.members.iter().take(TOP) {
        println!(
            "  {:20} {:>8}  {:5.1}%  peak {:02}:00",
            member.name, member.messages, member.percentage, member.peak_hour
        );
    }
    if !report.kinds.is_empty() {
        let kinds: Vec<String> = report
            .kinds
            .iter()
            .map(|(kind, count)| format!("{} {}", kind.as_str(), count))
            .collect();
        println!("Kinds: {}", kinds.join(", "));
    }
}

fn render_repeats(report: &chatlore_core::analytics::RepeatReport) {
    println!("== Repeat chains ==");
    println!("{} chains", report.total_chains);
    if let Some(chain) = &report.longest_chain {
        println!("Longest: \"{}\" x{}", chain.content, chain.length);
    }
    for (content, count) in report.top_content.iter().take(5) {
        println!("  \"{}\" repeated in {} chain(s)", content, count);
    }
    for member in report.members.iter().take(TOP) {
        println!(
            "  {:20} joined {:>5} ({:4.1}%), started {:>4}, broke {:>4}, fastest {:>4}",
            member.name,
            member.joined,
            member.join_share,
            member.originated,
            member.broke,
            member.fastest_joins
        );
    }
}

fn render_nocturnal(report: &chatlore_core::analytics::NocturnalReport) {
    println!("== Night owls ==");
    println!("{} night messages", report.total_night_messages);
    for member in report.members.iter().take(TOP) {
        let crown = if Some(member.member_id) == report.champion {
            " *"
        } else {
            ""
        };
        let title = member.title.map(|t| format!(" ({t})")).unwrap_or_default();
        println!(
            "  {:20} {:>6} at night ({:4.1}%), last word on {:>4} day(s), streak {:>3}{}{}",
            member.name,
            member.night_messages,
            member.night_share,
            member.last_speaker_days,
            member.longest_night_streak,
            crown,
            title
        );
    }
}

fn render_dragon(report: &chatlore_core::analytics::DragonKingReport) {
    println!("== Dragon kings ==");
    println!("{} days counted", report.days_counted);
    for member in report.members.iter().take(TOP) {
        println!(
            "  {:20} won {:>5} day(s) ({:4.1}%)",
            member.name, member.days_won, member.win_rate
        );
    }
    if let Some(day) = report.reigning_day {
        println!("Reigning since {}: {} member(s)", day, report.reigning.len());
    }
}

fn render_diving(report: &chatlore_core::analytics::DivingReport) {
    println!("== Divers ==");
    for member in report.members.iter().take(TOP) {
        println!(
            "  {:20} silent {:>7.1} day(s), {} message(s) total ({:4.1}%)",
            member.name, member.silence_days, member.messages, member.message_share
        );
    }
    if let Some((member_id, gap)) = report.deepest_comeback {
        if let Some(member) = report.members.iter().find(|m| m.member_id == member_id) {
            println!(
                "Deepest comeback: {} after {} day(s)",
                member.name,
                gap / 86_400
            );
        }
    }
}

fn render_mentions(report: &chatlore_core::analytics::MentionReport) {
    println!("== Mentions ==");
    println!("{} mentions", report.total_mentions);
    for member in report.members.iter().take(TOP) {
        println!(
            "  {:20} received {:>5} ({:4.1}%), sent {:>5}",
            member.name, member.mentions_received, member.received_share, member.mentions_sent
        );
    }
    for pair in report.balanced_pairs.iter().take(5) {
        println!(
            "  pair #{} <-> #{}: {} + {} (balance {:.2})",
            pair.a, pair.b, pair.a_to_b, pair.b_to_a, pair.balance
        );
    }
    for pair in report.unrequited_pairs.iter().take(5) {
        println!(
            "  one-way #{} -> #{}: {} vs {}",
            pair.a, pair.b, pair.a_to_b, pair.b_to_a
        );
    }
}

fn render_laughs(report: &chatlore_core::analytics::LaughReport) {
    println!("== Laughs ==");
    println!("{} laugh messages", report.total_laughs);
    for member in report.members.iter().take(TOP) {
        let crown = if Some(member.member_id) == report.comedian {
            " *"
        } else {
            ""
        };
        println!(
            "  {:20} laughed {:>5} times ({:4.1}% of own), earned {:>4}{}",
            member.name, member.laugh_messages, member.laugh_rate, member.laughs_earned, crown
        );
    }
}

fn render_memes(report: &chatlore_core::analytics::MemeBattleReport) {
    println!("== Meme battles ==");
    println!("{} battles", report.total_battles);
    if let Some(battle) = &report.largest_battle {
        println!(
            "Largest: {} volleys between {} members",
            battle.volleys, battle.participants
        );
    }
    for member in report.members.iter().take(TOP) {
        println!(
            "  {:20} won {:>4}, threw {:>5} image(s) ({:4.1}%)",
            member.name, member.battles_won, member.images_in_battles, member.image_share
        );
    }
}
