//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! Secondary indexes are NOT part of the migrations: bulk load is materially
//! faster without them, so the pipeline calls [`create_indexes`] once after
//! the last message transaction commits.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- One row per store; a store is one imported chat.
    CREATE TABLE IF NOT EXISTS meta (
        id               INTEGER PRIMARY KEY CHECK (id = 1),
        name             TEXT NOT NULL,
        platform         TEXT NOT NULL,
        chat_kind        TEXT NOT NULL,
        imported_at      INTEGER NOT NULL,
        group_id         TEXT,
        group_avatar     TEXT,
        owner_id         TEXT,
        schema_version   INTEGER NOT NULL,
        session_gap_secs INTEGER
    );

    CREATE TABLE IF NOT EXISTS member (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        platform_id      TEXT NOT NULL UNIQUE,
        account_name     TEXT NOT NULL,
        group_nickname   TEXT,
        aliases          JSON NOT NULL DEFAULT '[]',
        avatar           TEXT,
        roles            JSON NOT NULL DEFAULT '[]'
    );

    -- Run-length encoded name timeline. For a given (member, kind) the
    -- intervals are contiguous, non-overlapping, ordered by start_ts;
    -- end_ts NULL means current.
    CREATE TABLE IF NOT EXISTS member_name_history (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        member_id        INTEGER NOT NULL REFERENCES member(id) ON DELETE CASCADE,
        name_kind        TEXT NOT NULL,
        name             TEXT NOT NULL,
        start_ts         INTEGER NOT NULL,
        end_ts           INTEGER
    );

    -- Sender names are denormalized as observed at send time.
    CREATE TABLE IF NOT EXISTS message (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        member_id           INTEGER NOT NULL REFERENCES member(id) ON DELETE CASCADE,
        account_name        TEXT NOT NULL,
        group_nickname      TEXT,
        ts                  INTEGER NOT NULL,
        kind                TEXT NOT NULL,
        content             TEXT,
        reply_to_id         TEXT,
        platform_message_id TEXT
    );

    -- Derived conversational bursts, regenerated after every mutation.
    CREATE TABLE IF NOT EXISTS chat_session (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        start_ts         INTEGER NOT NULL,
        end_ts           INTEGER NOT NULL,
        message_count    INTEGER NOT NULL,
        is_manual        INTEGER NOT NULL DEFAULT 0,
        summary          TEXT
    );

    -- Message -> derived session linkage.
    CREATE TABLE IF NOT EXISTS message_context (
        message_id       INTEGER NOT NULL UNIQUE REFERENCES message(id) ON DELETE CASCADE,
        session_id       INTEGER NOT NULL REFERENCES chat_session(id) ON DELETE CASCADE
    );
    "#,
];

/// Index DDL applied once after bulk load (and kept by later migrations).
const INDEX_DDL: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_message_ts ON message(ts);
    CREATE INDEX IF NOT EXISTS idx_message_member ON message(member_id);
    CREATE INDEX IF NOT EXISTS idx_message_platform_id ON message(platform_message_id);
    CREATE INDEX IF NOT EXISTS idx_name_history_member ON member_name_history(member_id);
    CREATE INDEX IF NOT EXISTS idx_chat_session_range ON chat_session(start_ts, end_ts);
    CREATE INDEX IF NOT EXISTS idx_message_context_session ON message_context(session_id);
"#;

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Build all secondary indexes. Called once after bulk load; idempotent.
pub fn create_indexes(conn: &Connection) -> crate::error::Result<()> {
    conn.execute_batch(INDEX_DDL)?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
