//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::DbError;

/// Schema version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

const V1: &str = "
    -- Single posts, one-shot or recurring
    CREATE TABLE IF NOT EXISTS scheduled_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        scheduled_at TEXT,
        scheduled_planned_at TEXT,
        repeat_anchor_at TEXT,
        repeat TEXT NOT NULL DEFAULT 'none',
        repeat_days_of_week TEXT NOT NULL DEFAULT '[]',   -- JSON array of weekdays
        repeat_day_of_week INTEGER,
        repeat_day_of_month INTEGER,
        status TEXT NOT NULL DEFAULT 'scheduled',
        pending_reason TEXT,
        target_platforms TEXT NOT NULL,                   -- JSON array
        platform_results TEXT NOT NULL DEFAULT '{}',      -- JSON object keyed by platform
        post_uri TEXT,
        posted_at TEXT,
        retry_attempt INTEGER NOT NULL DEFAULT 0,
        next_retry_at TEXT,
        last_retry_delay_ms INTEGER,
        created_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_scheduled_items_due
        ON scheduled_items (status, scheduled_at);

    -- Threads and their ordered segments
    CREATE TABLE IF NOT EXISTS threads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT,
        scheduled_at TEXT,
        status TEXT NOT NULL DEFAULT 'scheduled',
        target_platforms TEXT NOT NULL,                   -- JSON array
        metadata TEXT NOT NULL DEFAULT '{}',              -- JSON dispatch bookkeeping
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_threads_due ON threads (status, scheduled_at);

    CREATE TABLE IF NOT EXISTS thread_segments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        thread_id INTEGER NOT NULL REFERENCES threads (id) ON DELETE CASCADE,
        sequence INTEGER NOT NULL,
        content TEXT NOT NULL,
        remote_id TEXT,
        posted_at TEXT,
        UNIQUE (thread_id, sequence)
    );

    -- Append-only delivery history
    CREATE TABLE IF NOT EXISTS send_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id INTEGER NOT NULL,
        platform TEXT NOT NULL,
        event TEXT NOT NULL DEFAULT 'send',
        status TEXT NOT NULL,
        posted_at TEXT NOT NULL,
        post_uri TEXT,
        post_cid TEXT,
        error_code TEXT,
        error_message TEXT,
        content_snapshot TEXT,
        attempt INTEGER NOT NULL,
        UNIQUE (item_id, attempt)
    );
";

/// Image attachments as JSON arrays.
const V2: &str = "
    ALTER TABLE scheduled_items ADD COLUMN media TEXT NOT NULL DEFAULT '[]';
    ALTER TABLE thread_segments ADD COLUMN media TEXT NOT NULL DEFAULT '[]';
";

/// Steps applied in order; step `n` moves the schema to version `n + 1`.
const MIGRATIONS: [&str; 2] = [V1, V2];

/// Bring the database up to [`SCHEMA_VERSION`].
pub(crate) fn migrate(conn: &mut Connection) -> Result<(), DbError> {
    let found: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        return Err(DbError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in MIGRATIONS.iter().skip(usize::try_from(found).unwrap_or(0)) {
        tx.execute_batch(step)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    info!(from = found, to = SCHEMA_VERSION, "migrated database schema");
    Ok(())
}
