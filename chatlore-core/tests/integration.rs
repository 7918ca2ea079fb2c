//! Integration tests for chatlore format detection, import, merge, export,
//! and analytics.
//!
//! These tests use fixture files in `tests/fixtures/` to verify the
//! end-to-end flow from platform export files into chat stores.

use chatlore_core::analytics::{
    analyze_activity, analyze_laughs, analyze_meme_battles, analyze_mentions, analyze_repeats,
    AnalysisOptions,
};
use chatlore_core::db::ChatStore;
use chatlore_core::format::{detect, FormatId};
use chatlore_core::ingest::{analyze_merge, import_file, merge_file, ImportOptions, ParseOptions};
use chatlore_core::progress::NullProgress;
use chatlore_core::types::{ChatKind, MessageKind, Platform};
use std::path::PathBuf;
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Options with host-independent bucketing and a pinned clock
fn analysis_opts() -> AnalysisOptions {
    AnalysisOptions {
        range: None,
        utc_offset_secs: 0,
        now_ts: Some(1_700_100_000),
    }
}

fn import_fixture(name: &str) -> (TempDir, ChatStore) {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("chat.db");
    import_file(
        &fixture_path(name),
        &store_path,
        &ImportOptions::default(),
        &NullProgress,
    )
    .unwrap_or_else(|e| panic!("import of {} failed: {}", name, e));
    let store = ChatStore::open(&store_path).unwrap();
    (dir, store)
}

// ============================================
// Per-format imports
// ============================================

#[test]
fn test_import_telegram_export() {
    let (_dir, store) = import_fixture("telegram.json");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "Weekend Plans");
    assert_eq!(meta.platform, Platform::Telegram);
    assert_eq!(meta.group_id.as_deref(), Some("424242"));

    // 3 user messages plus the join service message
    assert_eq!(store.message_count().unwrap(), 4);
    let messages = store.messages_in_range(None).unwrap();
    assert_eq!(messages[1].content.as_deref(), Some("count me in"));
    assert_eq!(messages[2].kind, MessageKind::Image);
    assert_eq!(messages[3].kind, MessageKind::System);
}

#[test]
fn test_import_discord_export_wins_over_telegram() {
    // The file also matches Telegram's loose "messages" signature; the
    // Discord descriptor must be tried first and succeed.
    let candidates = detect(&fixture_path("discord.json")).unwrap();
    let ids: Vec<FormatId> = candidates.iter().map(|d| d.id).collect();
    assert!(ids.contains(&FormatId::DiscordJson));
    assert!(ids.contains(&FormatId::TelegramJson));
    assert_eq!(ids[0], FormatId::DiscordJson);

    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("chat.db");
    let outcome = import_file(
        &fixture_path("discord.json"),
        &store_path,
        &ImportOptions::default(),
        &NullProgress,
    )
    .unwrap();
    assert_eq!(outcome.format, FormatId::DiscordJson);
    assert_eq!(outcome.messages_written, 3);

    let store = ChatStore::open(&store_path).unwrap();
    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "Homelab #general");

    let alice = store.get_member("u1").unwrap().unwrap();
    assert_eq!(alice.group_nickname.as_deref(), Some("Al"));
    assert_eq!(alice.roles, vec!["admin".to_string()]);
}

#[test]
fn test_import_instagram_export() {
    let (_dir, store) = import_fixture("message_1.json");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.platform, Platform::Instagram);
    assert_eq!(meta.chat_kind, ChatKind::Private);

    // Export order is newest-first; the store must be chronological
    let messages = store.messages_in_range(None).unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].content.as_deref(), Some("lunch tomorrow?"));
    assert_eq!(messages[1].kind, MessageKind::Image);
    // Mojibake repaired
    assert_eq!(messages[2].content.as_deref(), Some("see you at the Café"));
}

#[test]
fn test_import_qq_json_export() {
    let (_dir, store) = import_fixture("qq-group.json");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "摸鱼小分队");
    assert_eq!(meta.platform, Platform::Qq);
    assert_eq!(meta.owner_id.as_deref(), Some("10001"));

    assert_eq!(store.list_members().unwrap().len(), 3);
    let owner = store.get_member("10001").unwrap().unwrap();
    assert_eq!(owner.group_nickname.as_deref(), Some("群主"));
    assert_eq!(store.message_count().unwrap(), 4);
}

#[test]
fn test_import_qq_text_export() {
    let (_dir, store) = import_fixture("qq-history.txt");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "摸鱼小分队");

    let messages = store.messages_in_range(None).unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].content.as_deref(), Some("还没\n在加班"));
    assert_eq!(messages[2].kind, MessageKind::Image);
    assert_eq!(messages[3].kind, MessageKind::System);
    // Email-keyed sender
    assert!(store.get_member("wang@example.com").unwrap().is_some());
}

#[test]
fn test_import_line_export() {
    let (_dir, store) = import_fixture("line-talk.txt");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "Mika");
    assert_eq!(meta.platform, Platform::Line);

    let messages = store.messages_in_range(None).unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].content.as_deref(), Some("agreed!\nnext time my treat"));
    assert_eq!(messages[2].kind, MessageKind::Emoji);
    // The join notice under the second date section is a system message
    assert_eq!(messages[3].kind, MessageKind::System);
    assert!(messages[3].ts > messages[2].ts);
}

#[test]
fn test_import_whatsapp_export() {
    let (_dir, store) = import_fixture("WhatsApp Chat with Dana.txt");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "Dana");
    assert_eq!(meta.platform, Platform::WhatsApp);

    let messages = store.messages_in_range(None).unwrap();
    assert_eq!(messages.len(), 4);
    // Encryption banner has no "name: " separator
    assert_eq!(messages[0].kind, MessageKind::System);
    assert_eq!(
        messages[2].content.as_deref(),
        Some("great, how was the flight?\nlong one I bet")
    );
    assert_eq!(messages[3].kind, MessageKind::Image);
}

#[test]
fn test_import_wechat_export() {
    let (_dir, store) = import_fixture("wechat.csv");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.platform, Platform::WeChat);

    let messages = store.messages_in_range(None).unwrap();
    assert_eq!(messages.len(), 4);
    let zhang = store.get_member("wxid_zhang").unwrap().unwrap();
    // Remark beats NickName
    assert_eq!(zhang.account_name, "老张");
    assert_eq!(messages[2].kind, MessageKind::Image);
    assert_eq!(messages[3].kind, MessageKind::System);
}

#[test]
fn test_import_canonical_jsonl() {
    let (_dir, store) = import_fixture("canonical.jsonl");

    let meta = store.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "Night Crew");
    assert_eq!(meta.platform, Platform::Qq);
    assert_eq!(store.message_count().unwrap(), 11);
    assert_eq!(store.list_members().unwrap().len(), 3);
}

// ============================================
// Merge
// ============================================

#[test]
fn test_merge_overlapping_export() {
    let (_dir, store) = import_fixture("canonical.jsonl");
    let overlap = fixture_path("canonical-overlap.jsonl");

    let preview = analyze_merge(&store, &overlap, &ParseOptions::default()).unwrap();
    assert_eq!(preview.new_messages, 3);
    assert_eq!(preview.duplicates, 3);
    assert_eq!(preview.new_members, 1);

    let outcome = merge_file(
        &store,
        &overlap,
        &ParseOptions::default(),
        1_800,
        &NullProgress,
    )
    .unwrap();
    assert_eq!(outcome.messages_added, 3);
    assert_eq!(outcome.duplicates_skipped, 3);
    assert_eq!(outcome.members_created, 1);
    assert_eq!(store.message_count().unwrap(), 14);
    assert!(store.get_member("u4").unwrap().is_some());
}

#[test]
fn test_merge_is_idempotent() {
    let (_dir, store) = import_fixture("canonical.jsonl");
    let overlap = fixture_path("canonical-overlap.jsonl");

    merge_file(&store, &overlap, &ParseOptions::default(), 1_800, &NullProgress).unwrap();
    let again = merge_file(
        &store,
        &overlap,
        &ParseOptions::default(),
        1_800,
        &NullProgress,
    )
    .unwrap();
    assert_eq!(again.messages_added, 0);
    assert_eq!(again.duplicates_skipped, 6);
    assert_eq!(store.message_count().unwrap(), 14);
}

// ============================================
// Export round trip
// ============================================

#[test]
fn test_export_reimports_identically() {
    let (dir, store) = import_fixture("canonical.jsonl");
    let exported = dir.path().join("exported.jsonl");
    chatlore_core::export::export_to_path(&store, &exported).unwrap();

    let store2_path = dir.path().join("chat2.db");
    let outcome = import_file(
        &exported,
        &store2_path,
        &ImportOptions::default(),
        &NullProgress,
    )
    .unwrap();
    assert_eq!(outcome.format, FormatId::CanonicalJsonl);
    assert_eq!(outcome.messages_written, 11);

    let store2 = ChatStore::open(&store2_path).unwrap();
    let meta = store2.get_meta().unwrap().unwrap();
    assert_eq!(meta.name, "Night Crew");
    assert_eq!(
        store.messages_in_range(None).unwrap().len(),
        store2.messages_in_range(None).unwrap().len()
    );
}

// ============================================
// Analytics over an imported store
// ============================================

#[test]
fn test_analytics_over_imported_store() {
    let (_dir, store) = import_fixture("canonical.jsonl");
    let options = analysis_opts();

    let activity = analyze_activity(&store, &options).unwrap();
    assert_eq!(activity.total_messages, 11);
    assert_eq!(activity.active_members, 3);
    assert_eq!(activity.members[0].messages, 4);

    // The "666" run is one chain of three, broken by Bob's next message
    let repeats = analyze_repeats(&store, &options).unwrap();
    assert_eq!(repeats.total_chains, 1);
    let chain = repeats.longest_chain.unwrap();
    assert_eq!(chain.content, "666");
    assert_eq!(chain.length, 3);
    assert!(chain.breaker.is_some());

    // Bob laughed within a minute of Alice's message
    let laughs = analyze_laughs(&store, &options, &[]).unwrap();
    assert_eq!(laughs.total_laughs, 1);
    let alice_id = store.get_member("u1").unwrap().unwrap().id;
    assert_eq!(laughs.comedian, Some(alice_id));

    // "@Bob" resolves against the roster name
    let mentions = analyze_mentions(&store, &options, 10).unwrap();
    assert_eq!(mentions.total_mentions, 1);
    let bob_id = store.get_member("u2").unwrap().unwrap().id;
    assert_eq!(mentions.members[0].member_id, bob_id);

    // Image, image, emoji in a row with three participants
    let memes = analyze_meme_battles(&store, &options).unwrap();
    assert_eq!(memes.total_battles, 1);
    let battle = memes.largest_battle.unwrap();
    assert_eq!(battle.volleys, 3);
    assert_eq!(battle.participants, 3);
}

#[test]
fn test_analytics_range_restriction() {
    let (_dir, store) = import_fixture("canonical.jsonl");
    let mut options = analysis_opts();
    // Only the first four messages
    options.range = Some((1_700_000_000, 1_700_000_240));

    let activity = analyze_activity(&store, &options).unwrap();
    assert_eq!(activity.total_messages, 4);
}

// ============================================
// Sessions
// ============================================

#[test]
fn test_sessions_built_after_import() {
    let (_dir, store) = import_fixture("canonical.jsonl");
    let sessions = store.list_sessions().unwrap();
    // All fixture messages are a minute apart: one session
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].message_count, 11);
    assert_eq!(sessions[0].start_ts, 1_700_000_000);
    assert_eq!(sessions[0].end_ts, 1_700_000_600);
}
