//! Abstract remote store for notesync.
//!
//! The remote store is the authoritative copy of an authenticated owner's
//! notes. Every call is scoped by owner id; implementations must never act on
//! an id alone. Outcomes are reported through the closed `RemoteError` set.
//!
//! Implementations:
//! - `HttpRemote` (`remote_http`): PostgREST-style data API over reqwest
//! - `MemoryRemote` (`remote_memory`): in-process store with failure switches

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::models::RemoteNote;

/// Result of a remote call
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Trait for remote note store implementations.
///
/// The client is constructed by the caller and injected into the sync engine;
/// its lifetime is the login session that owns the engine.
///
/// # Example
///
/// ```ignore
/// use notesync::remote::RemoteStore;
///
/// async fn count(remote: &impl RemoteStore, owner: &str) -> usize {
///     remote.select_all(owner).await.map(|rows| rows.len()).unwrap_or(0)
/// }
/// ```
pub trait RemoteStore: Send + Sync {
    /// Insert a note for `owner_id`. The server assigns the id.
    fn insert(
        &self,
        owner_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> impl Future<Output = RemoteResult<RemoteNote>> + Send;

    /// All notes of `owner_id`, newest first.
    fn select_all(&self, owner_id: &str) -> impl Future<Output = RemoteResult<Vec<RemoteNote>>> + Send;

    /// Whether `owner_id` has at least one note.
    fn exists(&self, owner_id: &str) -> impl Future<Output = RemoteResult<bool>> + Send;

    /// Replace the content of note `id` owned by `owner_id`.
    ///
    /// # Returns
    /// * `Ok(RemoteNote)` - The updated row as stored
    /// * `Err(RemoteError::NotFound)` - No row matched id + owner
    fn update_content(
        &self,
        id: &str,
        owner_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> impl Future<Output = RemoteResult<RemoteNote>> + Send;

    /// Delete note `id` owned by `owner_id`.
    ///
    /// # Returns
    /// * `Ok(())` - A row was deleted
    /// * `Err(RemoteError::NotFound)` - No row matched id + owner
    fn delete(&self, id: &str, owner_id: &str) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Privileged: delete every note of `owner_id`, then revoke the identity.
    ///
    /// These are two remote steps. A failure in the second leaves the notes
    /// deleted and the identity intact; the error is returned as-is.
    fn erase_owner(&self, owner_id: &str) -> impl Future<Output = RemoteResult<()>> + Send;
}
