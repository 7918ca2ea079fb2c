//! Export a store back to the canonical JSONL interchange format
//!
//! The output round-trips through [`crate::ingest::parsers::jsonl`]: header
//! line first, then the roster, then messages in timestamp order. Writing is
//! a streaming scan over the message table, so memory stays flat regardless
//! of store size.

use crate::db::ChatStore;
use crate::error::{Error, Result};
use crate::ingest::parsers::jsonl::{
    HeaderRecord, MemberRecord, MessageRecord, Record, FORMAT_VERSION,
};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write the whole store as canonical JSONL. Returns the message count.
pub fn export_jsonl<W: Write>(store: &ChatStore, out: W) -> Result<u64> {
    let meta = store
        .get_meta()?
        .ok_or_else(|| Error::Config("store has no meta row".to_string()))?;

    let mut out = BufWriter::new(out);
    let mut write_record = |record: &Record| -> Result<()> {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
        Ok(())
    };

    write_record(&Record::Header(HeaderRecord {
        version: FORMAT_VERSION,
        name: meta.name,
        platform: meta.platform,
        chat_kind: meta.chat_kind,
        group_id: meta.group_id,
        group_avatar: meta.group_avatar,
        owner_id: meta.owner_id,
    }))?;

    for member in store.list_members()? {
        write_record(&Record::Member(MemberRecord {
            id: member.platform_id,
            name: member.account_name,
            nickname: member.group_nickname,
            aliases: member.aliases,
            avatar: member.avatar,
            roles: member.roles,
        }))?;
    }

    let mut count = 0u64;
    store.for_each_message(|message, sender| {
        write_record(&Record::Message(MessageRecord {
            sender: sender.to_string(),
            name: message.account_name.clone(),
            nickname: message.group_nickname.clone(),
            ts: message.ts,
            kind_code: message.kind.type_code(),
            content: message.content.clone(),
            id: message.platform_message_id.clone(),
            reply_to: message.reply_to_id.clone(),
        }))?;
        count += 1;
        Ok(())
    })?;

    out.flush()?;
    tracing::info!(messages = count, "Export complete");
    Ok(count)
}

/// Export to a file path.
pub fn export_to_path(store: &ChatStore, path: &Path) -> Result<u64> {
    let file = std::fs::File::create(path)?;
    export_jsonl(store, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parser::{CollectSink, ChatParser, ParseOptions};
    use crate::ingest::parsers::jsonl::CanonicalJsonlParser;
    use crate::types::*;

    fn seeded_store() -> ChatStore {
        let store = ChatStore::open_in_memory().unwrap();
        store
            .insert_meta(&StoreMeta {
                name: "Round Trip".to_string(),
                platform: Platform::Telegram,
                chat_kind: ChatKind::Group,
                imported_at: 1_700_000_000,
                group_id: Some("g1".to_string()),
                group_avatar: None,
                owner_id: None,
                schema_version: crate::db::schema::SCHEMA_VERSION,
                session_gap_secs: None,
            })
            .unwrap();
        let id = store.resolve_or_create_member("u1", "Alice", None).unwrap();
        store
            .insert_message(id, &ParsedMessage::text("u1", "Alice", 100, "first"))
            .unwrap();
        let mut img = ParsedMessage::text("u1", "Alice", 200, "pic.png");
        img.kind = MessageKind::Image;
        store.insert_message(id, &img).unwrap();
        store
    }

    #[test]
    fn test_export_reimports_identically() {
        let store = seeded_store();
        let mut buf = Vec::new();
        let count = export_jsonl(&store, &mut buf).unwrap();
        assert_eq!(count, 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.jsonl");
        std::fs::write(&path, &buf).unwrap();

        let mut sink = CollectSink::default();
        CanonicalJsonlParser
            .parse(&path, &ParseOptions::default(), &mut sink)
            .unwrap();

        let meta = sink.meta.unwrap();
        assert_eq!(meta.name, "Round Trip");
        assert_eq!(meta.platform, Platform::Telegram);
        assert_eq!(sink.members.len(), 1);
        assert_eq!(sink.messages.len(), 2);
        assert_eq!(sink.messages[0].content.as_deref(), Some("first"));
        assert_eq!(sink.messages[1].kind, MessageKind::Image);
    }

    #[test]
    fn test_export_empty_meta_fails() {
        let store = ChatStore::open_in_memory().unwrap();
        let mut buf = Vec::new();
        assert!(export_jsonl(&store, &mut buf).is_err());
    }
}
