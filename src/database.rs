//! Local store for notesync.
//!
//! One SQLite table keyed by note id, with secondary indexes on owner and on
//! sync status. The schema is versioned with `PRAGMA user_version` and
//! upgraded in place; upgrades only add columns and indexes, never drop rows.
//!
//! Timestamps are stored as Unix milliseconds (INTEGER) so newest-first
//! ordering is stable for notes created within the same second.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{NoteError, NoteResult};
use crate::models::{Note, SyncStatus};

/// Current local schema version.
pub const SCHEMA_VERSION: i64 = 2;

/// Batch size used when clearing every row of an owner.
const CLEAR_BATCH_SIZE: usize = 64;

const NOTE_COLUMNS: &str = "id, owner_id, content, created_at, updated_at, sync_status";

/// Database wrapper for the local note mirror
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(db_path: P) -> NoteResult<Self> {
        let conn = Connection::open(db_path)?;

        // WAL keeps readers unblocked while the engine writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let mut db = Self { conn };
        db.upgrade_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn open_in_memory() -> NoteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.upgrade_schema()?;
        Ok(db)
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> NoteResult<()> {
        self.conn.close().map_err(|(_, e)| NoteError::Database(e))
    }

    /// Schema version recorded in the database file.
    pub fn schema_version(&self) -> NoteResult<i64> {
        let version = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    // =========================================================================
    // Schema upgrades
    // =========================================================================

    fn upgrade_schema(&mut self) -> NoteResult<()> {
        let version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(NoteError::database_op(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        let tx = self.conn.transaction()?;
        if version < 1 {
            migrate_v1(&tx)?;
        }
        if version < 2 {
            migrate_v2(&tx)?;
        }
        // Indexes are re-asserted on every open so a file that lost one
        // (or was written by an older build) gets it back.
        ensure_indexes(&tx)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        tx.commit()?;

        if version < SCHEMA_VERSION {
            tracing::info!(from = version, to = SCHEMA_VERSION, "Upgraded local schema");
        }
        Ok(())
    }

    // =========================================================================
    // Note access
    // =========================================================================

    /// Insert or replace a note by id. Idempotent.
    pub fn put(&self, note: &Note) -> NoteResult<()> {
        upsert(&self.conn, note)
    }

    /// Upsert several notes in one local transaction.
    pub fn put_many(&self, notes: &[Note]) -> NoteResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for note in notes {
            upsert(&tx, note)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the row stored under `old_id` with `note` (which carries a new
    /// id) in one local transaction.
    pub fn rekey(&self, old_id: &str, note: &Note) -> NoteResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM notes WHERE id = ?", [old_id])?;
        upsert(&tx, note)?;
        tx.commit()?;
        Ok(())
    }

    /// Get a note by id
    pub fn get(&self, note_id: &str) -> NoteResult<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS),
                [note_id],
                row_to_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Delete a note by id. Returns whether a row was removed.
    pub fn delete(&self, note_id: &str) -> NoteResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?", [note_id])?;
        Ok(deleted > 0)
    }

    /// All notes of an owner, newest first
    pub fn query_by_owner(&self, owner_id: &str) -> NoteResult<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notes WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
            NOTE_COLUMNS
        ))?;
        let notes = stmt
            .query_map([owner_id], row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Notes of an owner in the given sync state, newest first
    pub fn query_by_status(&self, owner_id: &str, status: SyncStatus) -> NoteResult<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM notes
            WHERE sync_status = ? AND owner_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
            NOTE_COLUMNS
        ))?;
        let notes = stmt
            .query_map(params![status.as_str(), owner_id], row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Number of notes held for an owner
    pub fn count_by_owner(&self, owner_id: &str) -> NoteResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE owner_id = ?",
            [owner_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Lazily walk the ids of an owner's notes through the owner index.
    ///
    /// Ids are fetched `batch_size` at a time in id order. Rows may be deleted
    /// while the scan is consumed; the scan resumes after the last id it
    /// yielded, so it can also be restarted from `OwnerIdScan::position`.
    pub fn scan_owner_ids(&self, owner_id: &str, batch_size: usize) -> OwnerIdScan<'_> {
        self.scan_owner_ids_after(owner_id, None, batch_size)
    }

    /// Resume an owner scan after a previously yielded id.
    pub fn scan_owner_ids_after(
        &self,
        owner_id: &str,
        after: Option<String>,
        batch_size: usize,
    ) -> OwnerIdScan<'_> {
        OwnerIdScan {
            conn: &self.conn,
            owner_id: owner_id.to_string(),
            batch_size: batch_size.max(1),
            after,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Delete every note of an owner. Returns the number of rows removed.
    pub fn clear_owner(&self, owner_id: &str) -> NoteResult<usize> {
        let mut removed = 0;
        for id in self.scan_owner_ids(owner_id, CLEAR_BATCH_SIZE) {
            if self.delete(&id?)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Restartable, batch-fetching scan over one owner's note ids.
pub struct OwnerIdScan<'a> {
    conn: &'a Connection,
    owner_id: String,
    batch_size: usize,
    after: Option<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl OwnerIdScan<'_> {
    /// Last id handed out by the scan, usable with `scan_owner_ids_after`.
    pub fn position(&self) -> Option<&str> {
        self.after.as_deref()
    }

    fn fetch_batch(&mut self) -> NoteResult<()> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id FROM notes
            WHERE owner_id = ?1 AND (?2 IS NULL OR id > ?2)
            ORDER BY id
            LIMIT ?3
            "#,
        )?;
        let ids = stmt
            .query_map(
                params![self.owner_id, self.after, self.batch_size as i64],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        if ids.len() < self.batch_size {
            self.exhausted = true;
        }
        self.buffer.extend(ids);
        Ok(())
    }
}

impl Iterator for OwnerIdScan<'_> {
    type Item = NoteResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_batch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let id = self.buffer.pop_front()?;
        self.after = Some(id.clone());
        Some(Ok(id))
    }
}

/// v1: the notes store and its owner index.
fn migrate_v1(conn: &Connection) -> NoteResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notes_owner_id ON notes(owner_id);
        "#,
    )?;
    Ok(())
}

/// v2: sync state column plus its index. Rows written by v1 were all
/// confirmed or guest-owned, so they default to synced.
fn migrate_v2(conn: &Connection) -> NoteResult<()> {
    if !column_exists(conn, "notes", "sync_status")? {
        conn.execute(
            "ALTER TABLE notes ADD COLUMN sync_status TEXT NOT NULL DEFAULT 'synced'",
            [],
        )?;
        tracing::info!("Added sync_status column to notes");
    }
    Ok(())
}

fn ensure_indexes(conn: &Connection) -> NoteResult<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_notes_owner_id ON notes(owner_id);
        CREATE INDEX IF NOT EXISTS idx_notes_sync_status ON notes(sync_status);
        "#,
    )?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> NoteResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn upsert(conn: &Connection, note: &Note) -> NoteResult<()> {
    conn.execute(
        r#"
        INSERT INTO notes (id, owner_id, content, created_at, updated_at, sync_status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            owner_id = excluded.owner_id,
            content = excluded.content,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            sync_status = excluded.sync_status
        "#,
        params![
            note.id,
            note.owner_id,
            note.content,
            note.created_at.timestamp_millis(),
            note.updated_at.timestamp_millis(),
            note.sync_status.as_str(),
        ],
    )?;
    Ok(())
}

fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
    let status: String = row.get(5)?;
    let sync_status = SyncStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown sync_status '{}'", status).into(),
        )
    })?;

    Ok(Note {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        content: row.get(2)?,
        created_at: millis_to_datetime(3, row.get(3)?)?,
        updated_at: millis_to_datetime(4, row.get(4)?)?,
        sync_status,
    })
}

fn millis_to_datetime(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}
