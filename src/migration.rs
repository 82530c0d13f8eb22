//! Guest to authenticated migration.
//!
//! When someone who has been writing notes as a guest signs in, their guest
//! notes become notes of the new account. The local rewrite (owner plus
//! pending status) happens first, in one transaction, and only then are the
//! notes pushed. If the push is interrupted the rows are already owned by the
//! account and pending, so the next flush finishes the job.

use crate::error::NoteResult;
use crate::models::Owner;
use crate::remote::RemoteStore;
use crate::sync_engine::{FlushReport, SyncEngine};
use crate::validation::validate_user_id;

/// Result of a migration
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Guest notes re-owned by the account
    pub migrated: usize,
    /// Outcome of pushing the account's pending notes
    pub flush: FlushReport,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.migrated == 0
    }
}

/// Move every guest note to `user_id` and push it to the remote store.
///
/// Without guest notes this does nothing (not even a flush), so calling it
/// on every sign-in is safe. Push failures end up in the report; the notes
/// stay pending for the next flush.
pub async fn migrate_guest_notes<R: RemoteStore>(
    engine: &SyncEngine<R>,
    user_id: &str,
) -> NoteResult<MigrationReport> {
    validate_user_id(user_id)?;

    let notes = engine.reassign_guest_notes(user_id)?;
    if notes.is_empty() {
        tracing::debug!(owner = %user_id, "No guest notes to migrate");
        return Ok(MigrationReport::default());
    }
    tracing::info!(owner = %user_id, count = notes.len(), "Re-owned guest notes");

    let owner = Owner::User(user_id.to_string());
    let flush = engine.flush(&owner).await?;
    if !flush.is_clean() {
        tracing::warn!(
            owner = %user_id,
            failed = flush.failed.len(),
            "Some migrated notes are still pending"
        );
    }

    Ok(MigrationReport {
        migrated: notes.len(),
        flush,
    })
}
