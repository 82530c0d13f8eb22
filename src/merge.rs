//! Merge-on-read for an authenticated owner's note list.
//!
//! The remote list is authoritative for rows the local mirror agrees on.
//! Local rows win in two cases:
//! - the local row is pending (the latest user intent has not reached the
//!   remote store yet)
//! - the remote list does not contain the id at all (a confirmation that
//!   was missed, or a remote deletion the mirror has not caught up to)
//!
//! Pending rows win without comparing `updated_at`: notes have a single
//! writer per owner, so a pending local edit is always the newest intent.

use std::collections::HashMap;

use crate::models::{sort_newest_first, Note, RemoteNote};

/// Result of merging the remote and local views.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Merged notes, newest first
    pub notes: Vec<Note>,
    /// Remote entries replaced by a pending local row
    pub pending_overlaid: usize,
    /// Local rows with no remote counterpart
    pub local_only: usize,
}

/// Merge the remote rows with the full local list of the same owner.
pub fn merge_views(remote: Vec<RemoteNote>, local: Vec<Note>) -> MergeResult {
    let mut by_id: HashMap<String, Note> = remote
        .into_iter()
        .map(|row| (row.id.clone(), Note::from_remote(row)))
        .collect();

    let mut pending_overlaid = 0;
    let mut local_only = 0;

    for note in local {
        match by_id.get(&note.id) {
            None => {
                local_only += 1;
                by_id.insert(note.id.clone(), note);
            }
            Some(_) if note.is_pending() => {
                pending_overlaid += 1;
                by_id.insert(note.id.clone(), note);
            }
            Some(_) => {}
        }
    }

    let mut notes: Vec<Note> = by_id.into_values().collect();
    sort_newest_first(&mut notes);

    MergeResult {
        notes,
        pending_overlaid,
        local_only,
    }
}
