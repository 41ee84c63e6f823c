//! SQLite implementation of the scheduler's store port.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, named_params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crosspost_scheduler::{
    ItemId, NewSegment, NewSendLogEntry, PendingReason, ScheduledItem, SendLogEntry, Store,
    StoreError, Thread, ThreadId, ThreadSegment,
};

use crate::DbError;
use crate::rows::{
    ITEM_COLUMNS, ItemColumns, ItemRow, SEGMENT_COLUMNS, SEND_LOG_COLUMNS, SegmentRow,
    SendLogRow, THREAD_COLUMNS, ThreadColumns, ThreadRow, encode_media, encode_time,
    segment_posted_at,
};
use crate::schema::migrate;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Store backed by a single SQLite database file.
///
/// Calls are serialized through one connection. Attempt numbers in the send
/// log are assigned inside an immediate transaction so concurrent writers
/// (including other processes on the same file) never reuse a number.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened database");

        let store = Self::setup(conn)?;
        info!(path = %path.display(), "database ready");
        Ok(store)
    }

    /// A private database that lives as long as the store.
    pub fn in_memory() -> Result<Self, DbError> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(mut conn: Connection) -> Result<Self, DbError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, DbError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().await;
        Ok(f(&mut conn)?)
    }
}

fn query_items(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ScheduledItem>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, ItemRow::read)?;
    rows.map(|row| row?.into_item()).collect()
}

fn query_threads(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Thread>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, ThreadRow::read)?;
    rows.map(|row| row?.into_thread()).collect()
}

fn query_segments(conn: &Connection, thread_id: ThreadId) -> Result<Vec<ThreadSegment>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SEGMENT_COLUMNS} FROM thread_segments WHERE thread_id = ?1 ORDER BY sequence"
    ))?;
    let rows = stmt.query_map([thread_id], SegmentRow::read)?;
    rows.map(|row| row?.into_segment()).collect()
}

fn insert_segment(
    conn: &Connection,
    thread_id: ThreadId,
    sequence: u32,
    draft: NewSegment,
) -> Result<ThreadSegment, DbError> {
    let media = encode_media(&draft.media)?;
    conn.execute(
        "INSERT INTO thread_segments (thread_id, sequence, content, media) \
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![thread_id, sequence, draft.content, media],
    )?;
    Ok(
        ThreadSegment::new(conn.last_insert_rowid(), thread_id, sequence, draft.content)
            .with_media(draft.media),
    )
}

fn sql_int(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_item(&self, mut item: ScheduledItem) -> Result<ScheduledItem, StoreError> {
        self.with_conn(move |conn| {
            {
                let columns = ItemColumns::encode(&item)?;
                conn.execute(ItemColumns::INSERT, columns.params().as_slice())?;
            }
            item.id = conn.last_insert_rowid();
            Ok(item)
        })
        .await
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<ScheduledItem>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {ITEM_COLUMNS} FROM scheduled_items \
                         WHERE id = ?1 AND deleted_at IS NULL"
                    ),
                    [id],
                    ItemRow::read,
                )
                .optional()?;
            row.map(ItemRow::into_item).transpose()
        })
        .await
    }

    async fn save_item(&self, item: &ScheduledItem) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let columns = ItemColumns::encode(item)?;
            let mut params = columns.params();
            params.push((":id", &item.id));
            let changed = conn.execute(
                &format!(
                    "UPDATE scheduled_items SET {} WHERE id = :id",
                    ItemColumns::ASSIGNMENTS
                ),
                params.as_slice(),
            )?;
            if changed == 0 {
                return Err(DbError::Missing(format!("item {}", item.id)));
            }
            Ok(())
        })
        .await
    }

    async fn due_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledItem>, StoreError> {
        self.with_conn(|conn| {
            query_items(
                conn,
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM scheduled_items \
                     WHERE deleted_at IS NULL AND status = 'scheduled' \
                       AND scheduled_at IS NOT NULL AND scheduled_at <= :now \
                       AND (repeat != 'none' OR post_uri IS NULL) \
                     ORDER BY scheduled_at, id LIMIT :limit"
                ),
                named_params! { ":now": encode_time(now), ":limit": sql_int(limit) },
            )
        })
        .await
    }

    async fn mark_missed_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: PendingReason,
    ) -> Result<Vec<ItemId>, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut ids = {
                let mut stmt = tx.prepare(
                    "UPDATE scheduled_items SET status = 'pending_manual', pending_reason = :reason \
                     WHERE deleted_at IS NULL AND status = 'scheduled' \
                       AND scheduled_at IS NOT NULL AND scheduled_at < :cutoff \
                     RETURNING id",
                )?;
                let rows = stmt.query_map(
                    named_params! { ":reason": reason.as_str(), ":cutoff": encode_time(cutoff) },
                    |row| row.get::<_, ItemId>(0),
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            tx.commit()?;
            ids.sort_unstable();
            Ok(ids)
        })
        .await
    }

    async fn pending_items(&self) -> Result<Vec<ScheduledItem>, StoreError> {
        self.with_conn(|conn| {
            query_items(
                conn,
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM scheduled_items \
                     WHERE deleted_at IS NULL AND status = 'pending_manual' \
                     ORDER BY scheduled_at, id"
                ),
                [],
            )
        })
        .await
    }

    async fn insert_thread(
        &self,
        mut thread: Thread,
        segments: Vec<NewSegment>,
    ) -> Result<(Thread, Vec<ThreadSegment>), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let columns = ThreadColumns::encode(&thread)?;
                tx.execute(ThreadColumns::INSERT, columns.params().as_slice())?;
            }
            thread.id = tx.last_insert_rowid();

            let inserted = segments
                .into_iter()
                .zip(1u32..)
                .map(|(draft, sequence)| insert_segment(&tx, thread.id, sequence, draft))
                .collect::<Result<Vec<_>, _>>()?;
            tx.commit()?;
            Ok((thread, inserted))
        })
        .await
    }

    async fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                    [id],
                    ThreadRow::read,
                )
                .optional()?;
            row.map(ThreadRow::into_thread).transpose()
        })
        .await
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let columns = ThreadColumns::encode(thread)?;
            let mut params = columns.params();
            params.push((":id", &thread.id));
            let changed = conn.execute(
                &format!(
                    "UPDATE threads SET {} WHERE id = :id",
                    ThreadColumns::ASSIGNMENTS
                ),
                params.as_slice(),
            )?;
            if changed == 0 {
                return Err(DbError::Missing(format!("thread {}", thread.id)));
            }
            Ok(())
        })
        .await
    }

    async fn thread_segments(&self, id: ThreadId) -> Result<Vec<ThreadSegment>, StoreError> {
        self.with_conn(|conn| query_segments(conn, id)).await
    }

    async fn save_segment(&self, segment: &ThreadSegment) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let media = encode_media(&segment.media)?;
            let changed = conn.execute(
                "UPDATE thread_segments \
                 SET thread_id = :thread_id, sequence = :sequence, content = :content, \
                     media = :media, remote_id = :remote_id, posted_at = :posted_at \
                 WHERE id = :id",
                named_params! {
                    ":thread_id": segment.thread_id,
                    ":sequence": segment.sequence,
                    ":content": segment.content,
                    ":media": media,
                    ":remote_id": segment.remote_id,
                    ":posted_at": segment_posted_at(segment),
                    ":id": segment.id,
                },
            )?;
            if changed == 0 {
                return Err(DbError::Missing(format!("segment {}", segment.id)));
            }
            Ok(())
        })
        .await
    }

    async fn due_threads(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Thread>, StoreError> {
        self.with_conn(|conn| {
            query_threads(
                conn,
                &format!(
                    "SELECT {THREAD_COLUMNS} FROM threads \
                     WHERE status = 'scheduled' \
                       AND scheduled_at IS NOT NULL AND scheduled_at <= :now \
                     ORDER BY scheduled_at, id LIMIT :limit"
                ),
                named_params! { ":now": encode_time(now), ":limit": sql_int(limit) },
            )
        })
        .await
    }

    async fn append_send_log(&self, entry: NewSendLogEntry) -> Result<SendLogEntry, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let attempt: u32 = tx.query_row(
                "SELECT COALESCE(MAX(attempt), 0) + 1 FROM send_log WHERE item_id = ?1",
                [entry.item_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO send_log (item_id, platform, event, status, posted_at, post_uri, \
                     post_cid, error_code, error_message, content_snapshot, attempt) \
                 VALUES (:item_id, :platform, :event, :status, :posted_at, :post_uri, \
                     :post_cid, :error_code, :error_message, :content_snapshot, :attempt)",
                named_params! {
                    ":item_id": entry.item_id,
                    ":platform": entry.platform.as_str(),
                    ":event": entry.event.as_str(),
                    ":status": entry.status.as_str(),
                    ":posted_at": encode_time(entry.posted_at),
                    ":post_uri": entry.post_uri,
                    ":post_cid": entry.post_cid,
                    ":error_code": entry.error_code,
                    ":error_message": entry.error_message,
                    ":content_snapshot": entry.content_snapshot,
                    ":attempt": attempt,
                },
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(entry.into_entry(id, attempt))
        })
        .await
    }

    async fn send_log(
        &self,
        item_id: ItemId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SendLogEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEND_LOG_COLUMNS} FROM send_log WHERE item_id = :item_id \
                 ORDER BY id DESC LIMIT :limit OFFSET :offset"
            ))?;
            let rows = stmt.query_map(
                named_params! {
                    ":item_id": item_id,
                    ":limit": sql_int(limit),
                    ":offset": sql_int(offset),
                },
                SendLogRow::read,
            )?;
            rows.map(|row| row?.into_entry()).collect()
        })
        .await
    }
}
