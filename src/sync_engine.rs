//! Sync engine: every read and write of notes goes through here.
//!
//! The engine owns the local store and an injected remote store. Guest notes
//! live only in the local store and are always synced. Notes of an
//! authenticated owner are written remotely first and mirrored locally; when
//! the remote store is unreachable they are kept locally as pending and
//! pushed later by `flush`.
//!
//! The local store sits behind a mutex that is never held across an
//! `.await`. Operations touching both stores run as three phases (local read,
//! remote call, local write-back), see `SyncEngine::two_phase`.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::join_all;

use crate::database::Database;
use crate::error::{NoteError, NoteResult, RemoteError};
use crate::merge::merge_views;
use crate::models::{mint_local_id, Note, NoteDraft, Owner, RemoteNote, SyncStatus, GUEST_OWNER_ID};
use crate::remote::RemoteStore;
use crate::validation::{validate_note_content, validate_note_id};

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The note now holds the new content.
    Updated(Note),
    /// No row matched (deleted or reassigned concurrently). Nothing changed.
    NotFound,
}

/// A pending note that could not be pushed.
#[derive(Debug, Clone)]
pub struct FlushFailure {
    pub note_id: String,
    pub error: String,
}

/// Result of a flush
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Pending notes found for the owner
    pub attempted: usize,
    /// Pushed as an update of an existing remote row
    pub updated: usize,
    /// Pushed as a new remote row
    pub inserted: usize,
    /// Skipped because the row was deleted or confirmed before or during
    /// its push
    pub skipped: usize,
    pub failed: Vec<FlushFailure>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum FlushAction {
    Updated,
    Inserted,
    Skipped,
    /// Deleted locally while its push was in flight; holds the remote id the
    /// push created or touched.
    Orphaned(String),
}

/// Offline-first sync engine over a local and a remote note store
pub struct SyncEngine<R> {
    db: Mutex<Database>,
    remote: R,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Create an engine over an open local store and a constructed remote client.
    pub fn new(db: Database, remote: R) -> Self {
        Self {
            db: Mutex::new(db),
            remote,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Give back the local store (for closing at session end).
    pub fn into_database(self) -> Database {
        self.db.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn local(&self) -> NoteResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| NoteError::database_op("local store lock poisoned"))
    }

    /// Run a local read, a remote call and a local write-back as separate
    /// phases. The local store is locked only inside `read` and `write_back`,
    /// never while `call` is awaited.
    pub async fn two_phase<T, U, V, Fut>(
        &self,
        read: impl FnOnce(&Database) -> NoteResult<T>,
        call: impl FnOnce(T) -> Fut,
        write_back: impl FnOnce(&Database, U) -> NoteResult<V>,
    ) -> NoteResult<V>
    where
        Fut: Future<Output = NoteResult<U>>,
    {
        let value = {
            let db = self.local()?;
            read(&db)?
        };

        let remote_value = call(value).await?;

        let db = self.local()?;
        write_back(&db, remote_value)
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Create a note and return its id.
    ///
    /// For an authenticated owner the note is inserted remotely first and the
    /// server-assigned id is returned. If the remote store cannot take it, the
    /// note is stored locally as pending under a local id instead.
    pub async fn save(&self, owner: &Owner, draft: NoteDraft) -> NoteResult<String> {
        validate_note_content(&draft.content)?;
        if let Some(id) = &draft.id {
            validate_note_id(id)?;
        }

        let now = Utc::now();
        let created_at = draft.created_at.unwrap_or(now);

        let user_id = match owner {
            Owner::Guest => {
                let note = Note {
                    id: draft.id.unwrap_or_else(mint_local_id),
                    owner_id: GUEST_OWNER_ID.to_string(),
                    content: draft.content,
                    created_at,
                    updated_at: now,
                    sync_status: SyncStatus::Synced,
                };
                self.local()?.put(&note)?;
                tracing::debug!(note_id = %note.id, "Saved guest note");
                return Ok(note.id);
            }
            Owner::User(user_id) => user_id,
        };

        let inserted = self
            .remote
            .insert(user_id, &draft.content, created_at, now)
            .await;

        let db = self.local()?;
        match inserted {
            Ok(row) => {
                let note = Note::from_remote(row);
                match &draft.id {
                    Some(old_id) if *old_id != note.id => db.rekey(old_id, &note)?,
                    _ => db.put(&note)?,
                }
                tracing::debug!(note_id = %note.id, "Saved note remotely");
                Ok(note.id)
            }
            Err(e) => {
                let note = Note {
                    id: draft.id.unwrap_or_else(mint_local_id),
                    owner_id: user_id.clone(),
                    content: draft.content,
                    created_at,
                    updated_at: now,
                    sync_status: SyncStatus::Pending,
                };
                db.put(&note)?;
                tracing::warn!(
                    note_id = %note.id,
                    error = %e,
                    "Remote insert failed, note kept locally as pending"
                );
                Ok(note.id)
            }
        }
    }

    // =========================================================================
    // List
    // =========================================================================

    /// All notes of an owner, newest first.
    ///
    /// Authenticated owners get the remote list merged with the full local
    /// list (see `merge`); if the remote read fails, the local list alone.
    pub async fn list(&self, owner: &Owner) -> NoteResult<Vec<Note>> {
        let user_id = match owner {
            Owner::Guest => return self.local()?.query_by_owner(GUEST_OWNER_ID),
            Owner::User(user_id) => user_id,
        };

        let remote_rows = self.remote.select_all(user_id).await;
        let local_rows = self.local()?.query_by_owner(user_id)?;

        match remote_rows {
            Ok(rows) => {
                let merged = merge_views(rows, local_rows);
                tracing::debug!(
                    owner = %user_id,
                    total = merged.notes.len(),
                    pending_overlaid = merged.pending_overlaid,
                    local_only = merged.local_only,
                    "Merged remote and local notes"
                );
                Ok(merged.notes)
            }
            Err(e) => {
                tracing::warn!(
                    owner = %user_id,
                    error = %e,
                    "Remote list unavailable, serving local notes"
                );
                Ok(local_rows)
            }
        }
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Replace the content of a note.
    ///
    /// A note that no longer exists for the owner yields
    /// `UpdateOutcome::NotFound`; nothing is written and nothing recreated.
    pub async fn update(
        &self,
        owner: &Owner,
        note_id: &str,
        content: &str,
    ) -> NoteResult<UpdateOutcome> {
        validate_note_id(note_id)?;
        validate_note_content(content)?;
        let now = Utc::now();

        let user_id = match owner {
            Owner::Guest => {
                let db = self.local()?;
                return match db.get(note_id)? {
                    Some(mut note) if note.owner_id == GUEST_OWNER_ID => {
                        note.content = content.to_string();
                        note.updated_at = now;
                        db.put(&note)?;
                        Ok(UpdateOutcome::Updated(note))
                    }
                    _ => Ok(UpdateOutcome::NotFound),
                };
            }
            Owner::User(user_id) => user_id,
        };

        self.two_phase(
            |db| db.get(note_id),
            move |existing| async move {
                match self
                    .remote
                    .update_content(note_id, user_id, content, now)
                    .await
                {
                    Ok(row) => Ok((existing, Some(row))),
                    Err(RemoteError::NotFound) => Ok((existing, None)),
                    Err(e) => Err(NoteError::from(e)),
                }
            },
            |db, (existing, row): (Option<Note>, Option<RemoteNote>)| {
                let Some(row) = row else {
                    tracing::debug!(note_id = %note_id, "Update matched no remote row");
                    return Ok(UpdateOutcome::NotFound);
                };
                let mut note = Note::from_remote(row);
                if let Some(existing) = existing {
                    note.created_at = existing.created_at;
                }
                db.put(&note)?;
                Ok(UpdateOutcome::Updated(note))
            },
        )
        .await
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a note. For an authenticated owner the remote delete must
    /// succeed before the local mirror is removed.
    pub async fn delete(&self, owner: &Owner, note_id: &str) -> NoteResult<()> {
        validate_note_id(note_id)?;

        if let Owner::User(user_id) = owner {
            match self.remote.delete(note_id, user_id).await {
                // Already gone remotely; the mirror just has not caught up
                Ok(()) | Err(RemoteError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let db = self.local()?;
        match db.get(note_id)? {
            Some(note) if note.owner_id == owner.id() => {
                db.delete(note_id)?;
            }
            _ => tracing::debug!(note_id = %note_id, "No local row to delete"),
        }
        Ok(())
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Push every pending note of an owner to the remote store.
    ///
    /// Notes are pushed concurrently; one note failing never stops the rest.
    /// Failures are reported, not raised. Only a local store failure while
    /// reading the pending set is an error.
    pub async fn flush(&self, owner: &Owner) -> NoteResult<FlushReport> {
        let user_id = match owner {
            Owner::Guest => return Ok(FlushReport::default()),
            Owner::User(user_id) => user_id.as_str(),
        };

        let pending = self.local()?.query_by_status(user_id, SyncStatus::Pending)?;
        let mut report = FlushReport {
            attempted: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let results = join_all(pending.into_iter().map(move |note| async move {
            let note_id = note.id.clone();
            (note_id, self.flush_one(user_id, note).await)
        }))
        .await;

        for (note_id, result) in results {
            match result {
                Ok(FlushAction::Updated) => report.updated += 1,
                Ok(FlushAction::Inserted) => report.inserted += 1,
                Ok(FlushAction::Skipped) | Ok(FlushAction::Orphaned(_)) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(note_id = %note_id, error = %e, "Failed to push pending note");
                    report.failed.push(FlushFailure {
                        note_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            owner = %user_id,
            attempted = report.attempted,
            updated = report.updated,
            inserted = report.inserted,
            failed = report.failed.len(),
            "Flushed pending notes"
        );
        Ok(report)
    }

    /// Push one pending note and mirror the confirmed row locally.
    async fn flush_one(&self, user_id: &str, note: Note) -> NoteResult<FlushAction> {
        let note_id = note.id;

        let action = self
            .two_phase(
                // Re-read so an edit made since the pending set was fetched is
                // what gets pushed.
                |db| Ok(db.get(&note_id)?.filter(|n| n.is_pending() && n.owner_id == user_id)),
                move |current: Option<Note>| async move {
                    match current {
                        None => Ok(None),
                        Some(current) => self
                            .push_pending(user_id, &current)
                            .await
                            .map(|pushed| Some((current, pushed))),
                    }
                },
                |db, pushed: Option<(Note, (RemoteNote, bool))>| {
                    let Some((pushed_note, (row, inserted))) = pushed else {
                        return Ok(FlushAction::Skipped);
                    };

                    // The row may have been deleted or edited while the push
                    // was in flight.
                    let Some(latest) = db.get(&pushed_note.id)? else {
                        return Ok(FlushAction::Orphaned(row.id));
                    };

                    if latest.content != pushed_note.content
                        || latest.updated_at != pushed_note.updated_at
                    {
                        // Newer edit stays pending; it only moves to the server id
                        if row.id != latest.id {
                            let moved = Note {
                                id: row.id.clone(),
                                ..latest
                            };
                            db.rekey(&pushed_note.id, &moved)?;
                        }
                    } else {
                        let mut synced = Note::from_remote(row);
                        synced.created_at = pushed_note.created_at;

                        if synced.id != pushed_note.id {
                            db.rekey(&pushed_note.id, &synced)?;
                            tracing::debug!(old_id = %pushed_note.id, new_id = %synced.id, "Pending note re-keyed");
                        } else {
                            db.put(&synced)?;
                        }
                    }

                    Ok(if inserted {
                        FlushAction::Inserted
                    } else {
                        FlushAction::Updated
                    })
                },
            )
            .await?;

        if let FlushAction::Orphaned(remote_id) = &action {
            // Undo the push so the delete holds in both stores
            match self.remote.delete(remote_id, user_id).await {
                Ok(()) | Err(RemoteError::NotFound) => {
                    tracing::debug!(note_id = %note_id, remote_id = %remote_id, "Note deleted during push, remote copy removed");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(action)
    }

    /// Try an update first (the insert may have landed while its local
    /// mirror write did not), fall back to an insert. The flag tells whether
    /// a new remote row was created.
    async fn push_pending(&self, user_id: &str, note: &Note) -> NoteResult<(RemoteNote, bool)> {
        match self
            .remote
            .update_content(&note.id, user_id, &note.content, note.updated_at)
            .await
        {
            Ok(row) => Ok((row, false)),
            Err(RemoteError::NotFound) => {
                let row = self
                    .remote
                    .insert(user_id, &note.content, note.created_at, note.updated_at)
                    .await?;
                Ok((row, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Account erasure
    // =========================================================================

    /// Erase an authenticated owner remotely (notes, then identity) and then
    /// locally. If either remote step fails the error is returned and local
    /// notes are left in place.
    pub async fn erase_owner(&self, user_id: &str) -> NoteResult<usize> {
        self.remote.erase_owner(user_id).await?;
        let removed = self.local()?.clear_owner(user_id)?;
        tracing::info!(owner = %user_id, removed, "Erased account notes");
        Ok(removed)
    }

    // =========================================================================
    // Local maintenance used by migration and bootstrap
    // =========================================================================

    /// Number of local notes held for an owner.
    pub(crate) fn local_count(&self, owner: &Owner) -> NoteResult<usize> {
        self.local()?.count_by_owner(owner.id())
    }

    /// Write a note the local store is authoritative for (guest content).
    pub(crate) fn put_local(&self, note: &Note) -> NoteResult<()> {
        self.local()?.put(note)
    }

    /// Move every guest note to `user_id` and mark it pending, in one local
    /// transaction. Returns the rewritten notes.
    pub(crate) fn reassign_guest_notes(&self, user_id: &str) -> NoteResult<Vec<Note>> {
        let db = self.local()?;
        let mut notes = db.query_by_owner(GUEST_OWNER_ID)?;
        if notes.is_empty() {
            return Ok(notes);
        }

        for note in &mut notes {
            note.owner_id = user_id.to_string();
            note.sync_status = SyncStatus::Pending;
        }
        db.put_many(&notes)?;
        Ok(notes)
    }
}
