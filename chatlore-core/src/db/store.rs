//! Store repository layer
//!
//! [`ChatStore`] wraps one SQLite connection to one imported chat. The
//! concurrency model is single-writer: ingestion and merge own the store
//! exclusively for the duration of the operation, analytics open their own
//! read handle. rusqlite's `Connection` already provides the interior
//! mutability the statement cache needs, so no additional locking lives here.

use crate::error::{Error, Result};
use crate::types::*;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Handle to one chat store (one SQLite file = one imported chat).
pub struct ChatStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl ChatStore {
    /// Create a fresh store file. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(Error::Config(format!(
                "store already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::open_at(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Open an existing store file.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::SessionNotFound(path.display().to_string()));
        }
        Self::open_at(path)
    }

    fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let store = Self { conn, path: None };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations on this store.
    pub fn migrate(&self) -> Result<()> {
        super::schema::run_migrations(&self.conn)
    }

    /// Path of the backing file, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Build all secondary indexes (called once after bulk load).
    pub fn create_indexes(&self) -> Result<()> {
        super::schema::create_indexes(&self.conn)
    }

    // ============================================
    // Transactions & durability
    // ============================================

    /// Begin an explicit write transaction.
    ///
    /// The pipeline manages transaction boundaries manually because one
    /// logical import spans many commits (one per message batch window).
    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// True while an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Force a WAL checkpoint so the log cannot grow without bound during
    /// very large imports. Must be called outside a transaction.
    pub fn wal_checkpoint(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
        Ok(())
    }

    // ============================================
    // Meta operations
    // ============================================

    /// Insert the single meta row. Idempotent: once written, later meta
    /// events are ignored (first wins).
    pub fn insert_meta(&self, meta: &StoreMeta) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO meta
                (id, name, platform, chat_kind, imported_at, group_id,
                 group_avatar, owner_id, schema_version, session_gap_secs)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                meta.name,
                meta.platform.as_str(),
                meta.chat_kind.as_str(),
                meta.imported_at,
                meta.group_id,
                meta.group_avatar,
                meta.owner_id,
                meta.schema_version,
                meta.session_gap_secs,
            ],
        )?;
        Ok(())
    }

    /// Get the meta row, if the store has one.
    pub fn get_meta(&self) -> Result<Option<StoreMeta>> {
        self.conn
            .query_row("SELECT * FROM meta WHERE id = 1", [], Self::row_to_meta)
            .optional()
            .map_err(Error::from)
    }

    /// Set or clear the per-store session gap override.
    pub fn set_session_gap(&self, gap_secs: Option<i64>) -> Result<()> {
        self.conn.execute(
            "UPDATE meta SET session_gap_secs = ?1 WHERE id = 1",
            params![gap_secs],
        )?;
        Ok(())
    }

    fn row_to_meta(row: &Row) -> rusqlite::Result<StoreMeta> {
        let platform_str: String = row.get("platform")?;
        let kind_str: String = row.get("chat_kind")?;
        Ok(StoreMeta {
            name: row.get("name")?,
            platform: Platform::from_str(&platform_str).unwrap_or(Platform::Chatlore),
            chat_kind: ChatKind::from_str(&kind_str).unwrap_or(ChatKind::Group),
            imported_at: row.get("imported_at")?,
            group_id: row.get("group_id")?,
            group_avatar: row.get("group_avatar")?,
            owner_id: row.get("owner_id")?,
            schema_version: row.get("schema_version")?,
            session_gap_secs: row.get("session_gap_secs")?,
        })
    }

    // ============================================
    // Member operations
    // ============================================

    /// Insert or update a member from a roster record.
    ///
    /// First-seen wins for creation; later observations update display
    /// fields only. Returns the surrogate id.
    pub fn upsert_member(&self, member: &ParsedMember) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO member (platform_id, account_name, group_nickname, aliases, avatar, roles)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(platform_id) DO UPDATE SET
                account_name = excluded.account_name,
                group_nickname = COALESCE(excluded.group_nickname, member.group_nickname),
                avatar = COALESCE(excluded.avatar, member.avatar),
                roles = excluded.roles
            "#,
            params![
                member.platform_id,
                member.account_name,
                member.group_nickname,
                serde_json::to_string(&member.aliases)?,
                member.avatar,
                serde_json::to_string(&member.roles)?,
            ],
        )?;
        self.member_id(&member.platform_id)?
            .ok_or_else(|| Error::Config("member vanished after upsert".to_string()))
    }

    /// Surrogate id for a platform id, if the member exists.
    pub fn member_id(&self, platform_id: &str) -> Result<Option<i64>> {
        self.conn
            .prepare_cached("SELECT id FROM member WHERE platform_id = ?1")?
            .query_row([platform_id], |r| r.get(0))
            .optional()
            .map_err(Error::from)
    }

    /// Resolve a message sender to a member id, creating a minimal member
    /// when unseen. Does NOT rewrite existing display fields; the name
    /// timeline owns name evolution.
    pub fn resolve_or_create_member(
        &self,
        platform_id: &str,
        account_name: &str,
        group_nickname: Option<&str>,
    ) -> Result<i64> {
        if let Some(id) = self.member_id(platform_id)? {
            return Ok(id);
        }
        self.conn
            .prepare_cached(
                r#"
                INSERT INTO member (platform_id, account_name, group_nickname, aliases, roles)
                VALUES (?1, ?2, ?3, '[]', '[]')
                "#,
            )?
            .execute(params![platform_id, account_name, group_nickname])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Update the member's current names (applied when the pipeline finishes
    /// and knows each member's last observed names).
    pub fn update_member_names(
        &self,
        member_id: i64,
        account_name: &str,
        group_nickname: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE member SET account_name = ?2, group_nickname = ?3 WHERE id = ?1",
            params![member_id, account_name, group_nickname],
        )?;
        Ok(())
    }

    pub fn get_member(&self, platform_id: &str) -> Result<Option<Member>> {
        self.conn
            .query_row(
                "SELECT * FROM member WHERE platform_id = ?1",
                [platform_id],
                Self::row_to_member,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn list_members(&self) -> Result<Vec<Member>> {
        let mut stmt = self.conn.prepare("SELECT * FROM member ORDER BY id")?;
        let rows = stmt.query_map([], Self::row_to_member)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Replace a member's alias list (member-management operation).
    pub fn update_member_aliases(&self, member_id: i64, aliases: &[String]) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE member SET aliases = ?2 WHERE id = ?1",
            params![member_id, serde_json::to_string(aliases)?],
        )?;
        if changed == 0 {
            return Err(Error::Config(format!("no such member: {}", member_id)));
        }
        Ok(())
    }

    /// Delete a member; messages and name history cascade.
    pub fn delete_member(&self, member_id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM member WHERE id = ?1", params![member_id])?;
        if changed == 0 {
            return Err(Error::Config(format!("no such member: {}", member_id)));
        }
        Ok(())
    }

    fn row_to_member(row: &Row) -> rusqlite::Result<Member> {
        let aliases_str: String = row.get("aliases")?;
        let roles_str: String = row.get("roles")?;
        Ok(Member {
            id: row.get("id")?,
            platform_id: row.get("platform_id")?,
            account_name: row.get("account_name")?,
            group_nickname: row.get("group_nickname")?,
            aliases: serde_json::from_str(&aliases_str).unwrap_or_default(),
            avatar: row.get("avatar")?,
            roles: serde_json::from_str(&roles_str).unwrap_or_default(),
        })
    }

    // ============================================
    // Message operations
    // ============================================

    /// Insert one message. Hot path: uses the statement cache.
    pub fn insert_message(&self, member_id: i64, msg: &ParsedMessage) -> Result<i64> {
        self.conn
            .prepare_cached(
                r#"
                INSERT INTO message
                    (member_id, account_name, group_nickname, ts, kind, content,
                     reply_to_id, platform_message_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?
            .execute(params![
                member_id,
                msg.account_name,
                msg.group_nickname,
                msg.ts,
                msg.kind.as_str(),
                msg.content,
                msg.reply_to_id,
                msg.platform_message_id,
            ])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn message_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM message", [], |r| r.get(0))
            .map_err(Error::from)
    }

    /// All messages in ascending timestamp order, optionally bounded by a
    /// half-open `[start_ts, end_ts)` range. Analytics materialize their
    /// working set through this call.
    pub fn messages_in_range(&self, range: Option<(i64, i64)>) -> Result<Vec<StoredMessage>> {
        let (sql, bounds) = match range {
            Some((start, end)) => (
                "SELECT m.*, mem.platform_id AS sender_platform_id
                 FROM message m JOIN member mem ON mem.id = m.member_id
                 WHERE m.ts >= ?1 AND m.ts < ?2
                 ORDER BY m.ts, m.id",
                vec![start, end],
            ),
            None => (
                "SELECT m.*, mem.platform_id AS sender_platform_id
                 FROM message m JOIN member mem ON mem.id = m.member_id
                 ORDER BY m.ts, m.id",
                vec![],
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bounds), Self::row_to_message)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Visit every message in ascending timestamp order together with its
    /// sender's platform id, without materializing the whole set. Export
    /// and other full scans go through this.
    pub fn for_each_message<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&StoredMessage, &str) -> Result<()>,
    {
        let mut stmt = self.conn.prepare(
            "SELECT m.*, mem.platform_id AS sender_platform_id
             FROM message m JOIN member mem ON mem.id = m.member_id
             ORDER BY m.ts, m.id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let message = Self::row_to_message(row)?;
            let sender: String = row.get("sender_platform_id")?;
            f(&message, &sender)?;
        }
        Ok(())
    }

    /// Dedup fingerprints of the whole store:
    /// `(ts, sender platform id, content length)`.
    ///
    /// Deliberately coarse (length, not a hash) to tolerate formatting
    /// drift between repeated exports of the same chat.
    pub fn dedup_keys(&self) -> Result<Vec<(i64, String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.ts, mem.platform_id, COALESCE(LENGTH(m.content), 0)
             FROM message m JOIN member mem ON mem.id = m.member_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? as usize,
            ))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<StoredMessage> {
        let kind_str: String = row.get("kind")?;
        Ok(StoredMessage {
            id: row.get("id")?,
            member_id: row.get("member_id")?,
            account_name: row.get("account_name")?,
            group_nickname: row.get("group_nickname")?,
            ts: row.get("ts")?,
            kind: MessageKind::from_str(&kind_str).unwrap_or(MessageKind::Other),
            content: row.get("content")?,
            reply_to_id: row.get("reply_to_id")?,
            platform_message_id: row.get("platform_message_id")?,
        })
    }

    // ============================================
    // Name history operations
    // ============================================

    /// Write a batch of name intervals (the pipeline's final transaction).
    pub fn insert_name_intervals(&self, intervals: &[NameInterval]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO member_name_history (member_id, name_kind, name, start_ts, end_ts)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;
        for interval in intervals {
            stmt.execute(params![
                interval.member_id,
                interval.kind.as_str(),
                interval.name,
                interval.start_ts,
                interval.end_ts,
            ])?;
        }
        Ok(())
    }

    /// Name timeline for one member, ordered by kind then start_ts.
    pub fn name_history(&self, member_id: i64) -> Result<Vec<NameInterval>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, name_kind, name, start_ts, end_ts
             FROM member_name_history WHERE member_id = ?1
             ORDER BY name_kind, start_ts",
        )?;
        let rows = stmt.query_map([member_id], Self::row_to_interval)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Full name history of the store (mention resolution input).
    pub fn all_name_history(&self) -> Result<Vec<NameInterval>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, name_kind, name, start_ts, end_ts
             FROM member_name_history ORDER BY member_id, name_kind, start_ts",
        )?;
        let rows = stmt.query_map([], Self::row_to_interval)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn row_to_interval(row: &Row) -> rusqlite::Result<NameInterval> {
        let kind_str: String = row.get("name_kind")?;
        Ok(NameInterval {
            member_id: row.get("member_id")?,
            kind: NameKind::from_str(&kind_str).unwrap_or(NameKind::AccountName),
            name: row.get("name")?,
            start_ts: row.get("start_ts")?,
            end_ts: row.get("end_ts")?,
        })
    }

    // ============================================
    // Chat session index
    // ============================================

    /// Regenerate the derived chat-session index by gap-thresholding
    /// consecutive message timestamps. Manual sessions are preserved.
    pub fn regenerate_sessions(&self, gap_secs: i64) -> Result<usize> {
        self.begin()?;
        let result = self.regenerate_sessions_inner(gap_secs);
        match result {
            Ok(count) => {
                self.commit()?;
                Ok(count)
            }
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    fn regenerate_sessions_inner(&self, gap_secs: i64) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM message_context WHERE session_id IN
                 (SELECT id FROM chat_session WHERE is_manual = 0)",
            [],
        )?;
        self.conn
            .execute("DELETE FROM chat_session WHERE is_manual = 0", [])?;

        let mut stmt = self
            .conn
            .prepare("SELECT id, ts FROM message ORDER BY ts, id")?;
        let rows: Vec<(i64, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut sessions = 0usize;
        let mut burst: Vec<(i64, i64)> = Vec::new();

        let mut flush = |burst: &mut Vec<(i64, i64)>| -> Result<()> {
            if burst.is_empty() {
                return Ok(());
            }
            self.conn.execute(
                "INSERT INTO chat_session (start_ts, end_ts, message_count, is_manual)
                 VALUES (?1, ?2, ?3, 0)",
                params![burst[0].1, burst[burst.len() - 1].1, burst.len() as i64],
            )?;
            let session_id = self.conn.last_insert_rowid();
            let mut link = self
                .conn
                .prepare_cached("INSERT INTO message_context (message_id, session_id) VALUES (?1, ?2)")?;
            for (message_id, _) in burst.iter() {
                link.execute(params![message_id, session_id])?;
            }
            burst.clear();
            Ok(())
        };

        for (id, ts) in rows {
            if let Some(&(_, last_ts)) = burst.last() {
                if ts - last_ts > gap_secs {
                    flush(&mut burst)?;
                    sessions += 1;
                }
            }
            burst.push((id, ts));
        }
        if !burst.is_empty() {
            flush(&mut burst)?;
            sessions += 1;
        }

        Ok(sessions)
    }

    pub fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM chat_session ORDER BY start_ts")?;
        let rows = stmt.query_map([], |row| {
            Ok(ChatSession {
                id: row.get("id")?,
                start_ts: row.get("start_ts")?,
                end_ts: row.get("end_ts")?,
                message_count: row.get("message_count")?,
                is_manual: row.get::<_, i64>("is_manual")? != 0,
                summary: row.get("summary")?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }
}

/// Delete a store file together with its WAL/shared-memory side files.
/// Best-effort on the side files; the main file must go.
pub fn delete_store_files(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            let _ = std::fs::remove_file(&side);
        }
    }
    Ok(())
}
