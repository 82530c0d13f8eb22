//! In-process remote store.
//!
//! Behaves like the hosted data API (owner-scoped queries, server-assigned
//! ids, newest-first listing) and can be switched offline or into rejecting
//! mode at any time. Used by the test suites and as an offline stand-in.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::models::RemoteNote;
use crate::remote::{RemoteResult, RemoteStore};

/// Call counters, useful for asserting what reached the remote side.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub inserts: AtomicUsize,
    pub selects: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

/// In-memory remote note store
#[derive(Debug, Default)]
pub struct MemoryRemote {
    rows: Mutex<Vec<RemoteNote>>,
    revoked: Mutex<Vec<String>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    rejecting: AtomicBool,
    fail_revocation: AtomicBool,
    reject_containing: Mutex<Option<String>>,
    pub calls: CallCounts,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `RemoteError::Network` while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every call fails with `RemoteError::Rejected` while rejecting.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Make the identity-revocation step of `erase_owner` fail.
    pub fn set_fail_revocation(&self, fail: bool) {
        self.fail_revocation.store(fail, Ordering::SeqCst);
    }

    /// Reject inserts and updates whose content contains `marker`.
    pub fn reject_content_containing(&self, marker: Option<&str>) {
        *self
            .reject_containing
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = marker.map(str::to_string);
    }

    /// Snapshot of an owner's rows, newest first.
    pub fn rows_for(&self, owner_id: &str) -> Vec<RemoteNote> {
        let mut rows: Vec<RemoteNote> = self
            .lock_rows()
            .iter()
            .filter(|r| r.user_id == owner_id)
            .cloned()
            .collect();
        sort_rows(&mut rows);
        rows
    }

    /// Insert a row directly, as another device would.
    pub fn seed(&self, owner_id: &str, content: &str, at: DateTime<Utc>) -> RemoteNote {
        let row = RemoteNote {
            id: self.mint_id(),
            user_id: owner_id.to_string(),
            content: content.to_string(),
            created_at: at,
            updated_at: at,
        };
        self.lock_rows().push(row.clone());
        row
    }

    /// Remove a row directly, as another device would.
    pub fn remove_row(&self, id: &str) -> bool {
        let mut rows = self.lock_rows();
        let before = rows.len();
        rows.retain(|r| r.id != id);
        rows.len() != before
    }

    pub fn is_revoked(&self, owner_id: &str) -> bool {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|o| o == owner_id)
    }

    fn lock_rows(&self) -> MutexGuard<'_, Vec<RemoteNote>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint_id(&self) -> String {
        format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_available(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("connection refused".to_string()));
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(RemoteError::rejected(403, "permission denied for table notes"));
        }
        Ok(())
    }

    fn check_content(&self, content: &str) -> RemoteResult<()> {
        let marker = self
            .reject_containing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match marker {
            Some(m) if content.contains(&m) => Err(RemoteError::rejected(
                400,
                "new row violates check constraint \"notes_content_check\"",
            )),
            _ => Ok(()),
        }
    }
}

fn sort_rows(rows: &mut [RemoteNote]) {
    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

impl RemoteStore for MemoryRemote {
    async fn insert(
        &self,
        owner_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> RemoteResult<RemoteNote> {
        self.calls.inserts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.check_content(content)?;

        let row = RemoteNote {
            id: self.mint_id(),
            user_id: owner_id.to_string(),
            content: content.to_string(),
            created_at,
            updated_at,
        };
        self.lock_rows().push(row.clone());
        Ok(row)
    }

    async fn select_all(&self, owner_id: &str) -> RemoteResult<Vec<RemoteNote>> {
        self.calls.selects.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.rows_for(owner_id))
    }

    async fn exists(&self, owner_id: &str) -> RemoteResult<bool> {
        self.calls.selects.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.lock_rows().iter().any(|r| r.user_id == owner_id))
    }

    async fn update_content(
        &self,
        id: &str,
        owner_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> RemoteResult<RemoteNote> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.check_content(content)?;

        let mut rows = self.lock_rows();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id && r.user_id == owner_id)
            .ok_or(RemoteError::NotFound)?;
        row.content = content.to_string();
        row.updated_at = updated_at;
        Ok(row.clone())
    }

    async fn delete(&self, id: &str, owner_id: &str) -> RemoteResult<()> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut rows = self.lock_rows();
        let before = rows.len();
        rows.retain(|r| !(r.id == id && r.user_id == owner_id));
        if rows.len() == before {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }

    async fn erase_owner(&self, owner_id: &str) -> RemoteResult<()> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.lock_rows().retain(|r| r.user_id != owner_id);

        if self.fail_revocation.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("identity service unavailable".to_string()));
        }
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(owner_id.to_string());
        Ok(())
    }
}
