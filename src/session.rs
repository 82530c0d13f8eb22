//! Login session: one engine, one local database connection, one owner.
//!
//! The session tracks who the current owner is and reacts to the two outside
//! events the engine cares about: identity changes (sign-in migrates guest
//! notes) and connectivity coming back (pending notes are flushed in the
//! background).
//!
//! Background work runs on the ambient tokio runtime, so the session must be
//! used from within one.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bootstrap::{bootstrap_owner, BootstrapOutcome};
use crate::config::Config;
use crate::database::Database;
use crate::error::{NoteError, NoteResult};
use crate::identity::IdentityProvider;
use crate::migration::{migrate_guest_notes, MigrationReport};
use crate::models::{Note, NoteDraft, Owner};
use crate::remote::RemoteStore;
use crate::remote_http::HttpRemote;
use crate::sync_engine::{FlushReport, SyncEngine, UpdateOutcome};

/// Session behaviour switches, usually taken from `Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Seed the starter notes for owners with no notes
    pub seed_defaults: bool,
    /// Push pending notes when the session starts
    pub flush_on_start: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            seed_defaults: true,
            flush_on_start: true,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            seed_defaults: config.seed_defaults(),
            flush_on_start: config.flush_on_start(),
        }
    }
}

/// What `refresh_identity` found and did.
#[derive(Debug, Clone)]
pub enum IdentityChange {
    Unchanged,
    /// A guest signed in; guest notes were migrated to the account.
    SignedIn {
        user_id: String,
        migration: MigrationReport,
        bootstrap: Option<BootstrapOutcome>,
    },
    /// A different account took over without passing through guest.
    Switched {
        from: String,
        to: String,
        bootstrap: Option<BootstrapOutcome>,
    },
    /// The account signed out; the session now writes guest notes.
    SignedOut { previous: String },
}

/// A running notes session
pub struct Session<R> {
    engine: Arc<SyncEngine<R>>,
    identity: Arc<dyn IdentityProvider>,
    owner: Arc<RwLock<Owner>>,
    options: SessionOptions,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session<HttpRemote> {
    /// Open the configured database and remote data API and start a session.
    pub async fn open(config: &Config, identity: Arc<dyn IdentityProvider>) -> NoteResult<Self> {
        let remote = HttpRemote::new(config.remote(), Arc::clone(&identity))?;
        let db = Database::open(config.database_file())?;
        Self::start(db, remote, identity, SessionOptions::from(config)).await
    }
}

impl<R: RemoteStore + 'static> Session<R> {
    /// Build the engine around `db` and `remote`, resolve the current owner
    /// and bring it up to date (starter notes, pending flush).
    pub async fn start(
        db: Database,
        remote: R,
        identity: Arc<dyn IdentityProvider>,
        options: SessionOptions,
    ) -> NoteResult<Self> {
        let owner = identity.current_owner();
        let session = Self {
            engine: Arc::new(SyncEngine::new(db, remote)),
            identity,
            owner: Arc::new(RwLock::new(owner.clone())),
            options,
            watcher: Mutex::new(None),
        };

        tracing::info!(owner = %owner, "Session started");
        session.settle_owner(&owner).await?;
        Ok(session)
    }

    /// Bring a newly active owner up to date: guest notes left on the device
    /// are migrated to an account owner, then starter notes and the
    /// start-of-session flush.
    ///
    /// Migration runs for every account owner, not only on a guest to account
    /// change seen by this session, so guest notes written before a sign-in
    /// that happened elsewhere (or before a crash) are still picked up.
    async fn settle_owner(
        &self,
        owner: &Owner,
    ) -> NoteResult<(MigrationReport, Option<BootstrapOutcome>)> {
        let migration = match owner {
            Owner::User(user_id) => migrate_guest_notes(&self.engine, user_id).await?,
            Owner::Guest => MigrationReport::default(),
        };

        let bootstrap = if self.options.seed_defaults {
            Some(bootstrap_owner(&self.engine, owner).await?)
        } else {
            None
        };

        if self.options.flush_on_start && !owner.is_guest() {
            let report = self.engine.flush(owner).await?;
            if report.attempted > 0 {
                tracing::debug!(owner = %owner, inserted = report.inserted, failed = report.failed.len(), "Start-up flush done");
            }
        }
        Ok((migration, bootstrap))
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// The owner every note operation of this session acts for.
    pub fn owner(&self) -> Owner {
        read_owner(&self.owner)
    }

    fn set_owner(&self, owner: Owner) {
        *self.owner.write().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    pub async fn save(&self, draft: NoteDraft) -> NoteResult<String> {
        self.engine.save(&self.owner(), draft).await
    }

    pub async fn list(&self) -> NoteResult<Vec<Note>> {
        self.engine.list(&self.owner()).await
    }

    pub async fn update(&self, note_id: &str, content: &str) -> NoteResult<UpdateOutcome> {
        self.engine.update(&self.owner(), note_id, content).await
    }

    pub async fn delete(&self, note_id: &str) -> NoteResult<()> {
        self.engine.delete(&self.owner(), note_id).await
    }

    pub async fn flush(&self) -> NoteResult<FlushReport> {
        self.engine.flush(&self.owner()).await
    }

    /// Re-read the identity provider and follow any change of owner.
    ///
    /// Guest to account runs the guest migration before bootstrap, so
    /// migrated notes count as existing notes and no starters are added.
    pub async fn refresh_identity(&self) -> NoteResult<IdentityChange> {
        let current = self.owner();
        let next = self.identity.current_owner();
        if current == next {
            return Ok(IdentityChange::Unchanged);
        }

        tracing::info!(from = %current, to = %next, "Owner changed");

        // The new owner becomes current only once it is settled, so an
        // interrupted migration is retried by the next refresh.
        match (current, next) {
            (Owner::Guest, Owner::User(user_id)) => {
                let owner = Owner::User(user_id.clone());
                let (migration, bootstrap) = self.settle_owner(&owner).await?;
                self.set_owner(owner);
                Ok(IdentityChange::SignedIn {
                    user_id,
                    migration,
                    bootstrap,
                })
            }
            (Owner::User(from), Owner::User(to)) => {
                let owner = Owner::User(to.clone());
                let (_, bootstrap) = self.settle_owner(&owner).await?;
                self.set_owner(owner);
                Ok(IdentityChange::Switched {
                    from,
                    to,
                    bootstrap,
                })
            }
            (Owner::User(previous), Owner::Guest) => {
                self.set_owner(Owner::Guest);
                Ok(IdentityChange::SignedOut { previous })
            }
            (Owner::Guest, Owner::Guest) => Ok(IdentityChange::Unchanged),
        }
    }

    /// Push the current owner's pending notes in the background.
    ///
    /// Returns immediately; await the handle to see the report. A flush
    /// already in flight is not waited for.
    pub fn connectivity_regained(&self) -> JoinHandle<NoteResult<FlushReport>> {
        let engine = Arc::clone(&self.engine);
        let owner = self.owner();
        tokio::spawn(async move { engine.flush(&owner).await })
    }

    /// Flush on every offline to online transition of `online`.
    ///
    /// Replaces any watcher started earlier. The task ends when the sender
    /// is dropped or the session closes.
    pub fn watch_connectivity(&self, mut online: watch::Receiver<bool>) {
        let engine = Arc::clone(&self.engine);
        let owner = Arc::clone(&self.owner);

        // Baseline taken now, not when the task first runs, so a reconnect
        // that lands before the first poll is still seen as a transition.
        let mut was_online = *online.borrow_and_update();
        let handle = tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online && !was_online {
                    let owner = read_owner(&owner);
                    match engine.flush(&owner).await {
                        Ok(report) if !report.is_clean() => tracing::warn!(
                            owner = %owner,
                            failed = report.failed.len(),
                            "Reconnect flush left notes pending"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(owner = %owner, error = %e, "Reconnect flush failed"),
                    }
                }
                was_online = is_online;
            }
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Delete the signed-in account: remote notes, then the identity, then
    /// the local mirror. The host is expected to sign out afterwards.
    pub async fn erase_account(&self) -> NoteResult<usize> {
        match self.owner() {
            Owner::User(user_id) => self.engine.erase_owner(&user_id).await,
            Owner::Guest => Err(NoteError::validation(
                "owner",
                "a guest has no account to erase",
            )),
        }
    }

    /// Stop background work and close the local database.
    ///
    /// Fails if a `connectivity_regained` flush is still running.
    pub async fn close(self) -> NoteResult<()> {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
            // Resolves once the task and its engine handle are dropped
            let _ = watcher.await;
        }

        let engine = Arc::try_unwrap(self.engine)
            .map_err(|_| NoteError::database_op("session closed while a flush is still running"))?;
        engine.into_database().close()?;
        tracing::info!("Session closed");
        Ok(())
    }
}

fn read_owner(owner: &RwLock<Owner>) -> Owner {
    owner.read().unwrap_or_else(PoisonError::into_inner).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::models::SyncStatus;
    use crate::remote_memory::MemoryRemote;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn start(identity: Arc<StaticIdentity>, options: SessionOptions) -> Session<MemoryRemote> {
        Session::start(
            Database::open_in_memory().unwrap(),
            MemoryRemote::new(),
            identity,
            options,
        )
        .await
        .unwrap()
    }

    fn no_seed() -> SessionOptions {
        SessionOptions {
            seed_defaults: false,
            flush_on_start: true,
        }
    }

    #[tokio::test]
    async fn test_guest_start_seeds_starter_notes() {
        let session = start(Arc::new(StaticIdentity::guest()), SessionOptions::default()).await;
        assert_eq!(session.owner(), Owner::Guest);
        assert_eq!(session.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_start_without_seeding() {
        let session = start(Arc::new(StaticIdentity::guest()), no_seed()).await;
        assert!(session.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_migrates_guest_notes() {
        let identity = Arc::new(StaticIdentity::guest());
        let session = start(Arc::clone(&identity), SessionOptions::default()).await;
        session.save(NoteDraft::new("my own note")).await.unwrap();

        identity.sign_in("user-1", "token");
        let change = session.refresh_identity().await.unwrap();
        let IdentityChange::SignedIn {
            user_id,
            migration,
            bootstrap,
        } = change
        else {
            panic!("expected sign-in");
        };
        assert_eq!(user_id, "user-1");
        // Three starter notes plus the one written by hand
        assert_eq!(migration.migrated, 4);
        assert_eq!(bootstrap, Some(BootstrapOutcome::AlreadyPresent));

        let notes = session.list().await.unwrap();
        assert_eq!(notes.len(), 4);
        assert!(notes.iter().all(|n| n.sync_status == SyncStatus::Synced));
        assert_eq!(session.engine().remote().rows_for("user-1").len(), 4);

        assert!(matches!(
            session.refresh_identity().await.unwrap(),
            IdentityChange::Unchanged
        ));
    }

    #[tokio::test]
    async fn test_signed_in_start_migrates_leftover_guest_notes() {
        // Guest notes written in an earlier run, sign-in done while closed
        let engine = SyncEngine::new(Database::open_in_memory().unwrap(), MemoryRemote::new());
        engine
            .save(&Owner::Guest, NoteDraft::new("written before sign-in"))
            .await
            .unwrap();
        let db = engine.into_database();

        let identity = Arc::new(StaticIdentity::signed_in("user-1", "token"));
        let session = Session::start(db, MemoryRemote::new(), identity, no_seed())
            .await
            .unwrap();

        assert_eq!(session.engine().local_count(&Owner::Guest).unwrap(), 0);
        let notes = session.list().await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].owner_id, "user-1");
        assert_eq!(notes[0].sync_status, SyncStatus::Synced);
        assert_eq!(session.engine().remote().rows_for("user-1").len(), 1);
        assert!(matches!(
            session.refresh_identity().await.unwrap(),
            IdentityChange::Unchanged
        ));
    }

    #[tokio::test]
    async fn test_owner_switches_only_after_migration() {
        let identity = Arc::new(StaticIdentity::guest());
        let session = start(Arc::clone(&identity), no_seed()).await;
        session.save(NoteDraft::new("guest draft")).await.unwrap();
        session.engine().remote().set_offline(true);

        identity.sign_in("user-1", "token");
        let change = session.refresh_identity().await.unwrap();
        assert!(matches!(change, IdentityChange::SignedIn { ref migration, .. } if migration.migrated == 1));
        assert_eq!(session.owner(), Owner::User("user-1".to_string()));

        // Offline during sign-in: the note is the account's, still pending
        let notes = session.list().await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].is_pending());
    }

    #[tokio::test]
    async fn test_sign_out_returns_to_guest() {
        let identity = Arc::new(StaticIdentity::signed_in("user-1", "token"));
        let session = start(Arc::clone(&identity), no_seed()).await;

        identity.sign_out();
        let change = session.refresh_identity().await.unwrap();
        assert!(matches!(change, IdentityChange::SignedOut { ref previous } if previous == "user-1"));
        assert_eq!(session.owner(), Owner::Guest);
    }

    #[tokio::test]
    async fn test_start_flushes_pending_notes() {
        let identity = Arc::new(StaticIdentity::signed_in("user-1", "token"));
        let db = Database::open_in_memory().unwrap();
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let engine = SyncEngine::new(db, remote);
        engine
            .save(&Owner::User("user-1".to_string()), NoteDraft::new("written offline"))
            .await
            .unwrap();
        engine.remote().set_offline(false);

        let db = engine.into_database();
        let session = Session::start(db, MemoryRemote::new(), identity, no_seed())
            .await
            .unwrap();

        let rows = session.engine().remote().rows_for("user-1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "written offline");
    }

    #[tokio::test]
    async fn test_connectivity_regained_flushes_in_background() {
        let identity = Arc::new(StaticIdentity::signed_in("user-1", "token"));
        let session = start(identity, no_seed()).await;
        session.engine().remote().set_offline(true);
        session.save(NoteDraft::new("queued")).await.unwrap();

        session.engine().remote().set_offline(false);
        let report = session.connectivity_regained().await.unwrap().unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(session.engine().remote().rows_for("user-1").len(), 1);
    }

    #[tokio::test]
    async fn test_watcher_flushes_on_reconnect() {
        let identity = Arc::new(StaticIdentity::signed_in("user-1", "token"));
        let session = start(identity, no_seed()).await;
        let (tx, rx) = watch::channel(false);
        session.watch_connectivity(rx);

        session.engine().remote().set_offline(true);
        session.save(NoteDraft::new("queued")).await.unwrap();
        session.engine().remote().set_offline(false);
        tx.send(true).unwrap();

        let mut pushed = false;
        for _ in 0..100 {
            if !session.engine().remote().rows_for("user-1").is_empty() {
                pushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pushed, "watcher did not flush after reconnect");

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_sees_reconnect_sent_before_first_poll() {
        let identity = Arc::new(StaticIdentity::signed_in("user-1", "token"));
        let session = start(identity, no_seed()).await;
        session.engine().remote().set_offline(true);
        session.save(NoteDraft::new("queued")).await.unwrap();
        session.engine().remote().set_offline(false);

        let (tx, rx) = watch::channel(false);
        session.watch_connectivity(rx);
        // No await in between: the task has not run yet
        tx.send(true).unwrap();

        let mut pushed = false;
        for _ in 0..100 {
            if !session.engine().remote().rows_for("user-1").is_empty() {
                pushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pushed, "reconnect before the first poll was missed");
    }

    #[tokio::test]
    async fn test_erase_account() {
        let identity = Arc::new(StaticIdentity::signed_in("user-1", "token"));
        let session = start(identity, SessionOptions::default()).await;
        assert_eq!(session.list().await.unwrap().len(), 3);

        let removed = session.erase_account().await.unwrap();
        assert_eq!(removed, 3);
        assert!(session.engine().remote().rows_for("user-1").is_empty());
        assert!(session.engine().remote().is_revoked("user-1"));
    }

    #[tokio::test]
    async fn test_guest_cannot_erase_account() {
        let session = start(Arc::new(StaticIdentity::guest()), no_seed()).await;
        assert!(matches!(
            session.erase_account().await,
            Err(NoteError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_requires_remote_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();

        let result = Session::open(&config, Arc::new(StaticIdentity::guest())).await;
        assert!(matches!(result, Err(NoteError::Config(_))));
    }

    #[tokio::test]
    async fn test_close_keeps_notes_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.db");
        let identity = Arc::new(StaticIdentity::guest());

        let session = Session::start(
            Database::open(&path).unwrap(),
            MemoryRemote::new(),
            identity.clone(),
            no_seed(),
        )
        .await
        .unwrap();
        session.save(NoteDraft::new("survives")).await.unwrap();
        session.close().await.unwrap();

        let reopened = Session::start(
            Database::open(&path).unwrap(),
            MemoryRemote::new(),
            identity,
            no_seed(),
        )
        .await
        .unwrap();
        let notes = reopened.list().await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "survives");
    }
}
