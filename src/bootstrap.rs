//! Starter notes for owners who have none yet.

use chrono::{Duration, Utc};

use crate::error::NoteResult;
use crate::models::{mint_local_id, Note, NoteDraft, Owner, SyncStatus};
use crate::remote::RemoteStore;
use crate::sync_engine::SyncEngine;

/// Starter notes, in the order they should be listed (newest first).
pub const STARTER_NOTES: [&str; 3] = [
    "Welcome! Notes you write here are kept on this device and synced to your account once you sign in.",
    "Offline? Keep writing. Anything saved without a connection is pushed the next time you are back online.",
    "Tip: edit a note any time; the latest version is the one every device sees.",
];

/// Result of a bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The owner already has notes; nothing was written.
    AlreadyPresent,
    /// The remote store could not say whether the owner has notes, so
    /// nothing was written.
    Skipped,
    /// The starter notes were created with these ids.
    Seeded(Vec<String>),
}

/// Seed the starter notes for an owner with no notes.
///
/// Local notes short-circuit. For an authenticated owner the remote store is
/// asked as well; if it cannot be reached the owner is left alone, since an
/// empty local mirror does not mean an empty account.
pub async fn bootstrap_owner<R: RemoteStore>(
    engine: &SyncEngine<R>,
    owner: &Owner,
) -> NoteResult<BootstrapOutcome> {
    if engine.local_count(owner)? > 0 {
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    if let Owner::User(user_id) = owner {
        match engine.remote().exists(user_id).await {
            Ok(true) => return Ok(BootstrapOutcome::AlreadyPresent),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(owner = %user_id, error = %e, "Cannot check remote notes, skipping starter notes");
                return Ok(BootstrapOutcome::Skipped);
            }
        }
    }

    let base = Utc::now();
    let mut ids = Vec::with_capacity(STARTER_NOTES.len());
    for (i, content) in STARTER_NOTES.iter().enumerate() {
        let created_at = base - Duration::seconds(i as i64);

        let id = match owner {
            Owner::Guest => {
                let note = Note {
                    id: mint_local_id(),
                    owner_id: owner.id().to_string(),
                    content: content.to_string(),
                    created_at,
                    updated_at: created_at,
                    sync_status: SyncStatus::Synced,
                };
                engine.put_local(&note)?;
                note.id
            }
            Owner::User(_) => {
                engine
                    .save(owner, NoteDraft::new(*content).created_at(created_at))
                    .await?
            }
        };
        ids.push(id);
    }

    tracing::info!(owner = %owner, count = ids.len(), "Seeded starter notes");
    Ok(BootstrapOutcome::Seeded(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::remote_memory::MemoryRemote;
    use chrono::TimeZone;

    fn engine() -> SyncEngine<MemoryRemote> {
        SyncEngine::new(Database::open_in_memory().unwrap(), MemoryRemote::new())
    }

    fn user() -> Owner {
        Owner::User("user-1".to_string())
    }

    fn contents(notes: &[Note]) -> Vec<String> {
        notes.iter().map(|n| n.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_guest_seeded_once_in_order() {
        let engine = engine();
        engine.remote().set_offline(true);

        let first = bootstrap_owner(&engine, &Owner::Guest).await.unwrap();
        assert!(matches!(first, BootstrapOutcome::Seeded(ref ids) if ids.len() == 3));
        let second = bootstrap_owner(&engine, &Owner::Guest).await.unwrap();
        assert_eq!(second, BootstrapOutcome::AlreadyPresent);

        let notes = engine.list(&Owner::Guest).await.unwrap();
        assert_eq!(contents(&notes), STARTER_NOTES.map(String::from).to_vec());
    }

    #[tokio::test]
    async fn test_user_seeded_remotely_once() {
        let engine = engine();

        let first = bootstrap_owner(&engine, &user()).await.unwrap();
        let BootstrapOutcome::Seeded(ids) = first else {
            panic!("expected seeding");
        };
        assert!(ids.iter().all(|id| id.starts_with("srv-")));
        assert_eq!(engine.remote().rows_for("user-1").len(), 3);

        assert_eq!(
            bootstrap_owner(&engine, &user()).await.unwrap(),
            BootstrapOutcome::AlreadyPresent
        );
        assert_eq!(engine.remote().rows_for("user-1").len(), 3);
    }

    #[tokio::test]
    async fn test_remote_notes_prevent_seeding_on_new_device() {
        let engine = engine();
        let at = Utc.timestamp_opt(1_735_689_600, 0).unwrap();
        engine.remote().seed("user-1", "from my laptop", at);

        let outcome = bootstrap_owner(&engine, &user()).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::AlreadyPresent);
        assert_eq!(engine.remote().rows_for("user-1").len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_remote_skips_seeding() {
        let engine = engine();
        engine.remote().set_offline(true);

        let outcome = bootstrap_owner(&engine, &user()).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Skipped);
        assert_eq!(engine.local_count(&user()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remote_rejecting_inserts_leaves_pending_starters() {
        let engine = engine();
        engine.remote().reject_content_containing(Some("Welcome"));

        let outcome = bootstrap_owner(&engine, &user()).await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Seeded(_)));
        assert_eq!(engine.remote().rows_for("user-1").len(), 2);

        let notes = engine.list(&user()).await.unwrap();
        assert_eq!(notes.len(), 3);
        assert!(notes[0].is_pending());
        assert_eq!(notes[0].content, STARTER_NOTES[0]);
    }
}
