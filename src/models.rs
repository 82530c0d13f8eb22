//! Data models for notesync.
//!
//! `Note` is the local row, `RemoteNote` the wire row of the remote data API.
//! Locally minted IDs are UUID7 simple-hex strings; remote IDs are whatever
//! the server assigns (text or integer keys) and are held as opaque strings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Owner id sentinel for notes created without a signed-in user.
pub const GUEST_OWNER_ID: &str = "guest";

/// Whether a note's latest content is confirmed by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(SyncStatus::Synced),
            "pending" => Some(SyncStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a note belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Guest,
    User(String),
}

impl Owner {
    /// Build an owner from the identity provider's "user id or none".
    pub fn from_user_id(user_id: Option<String>) -> Self {
        match user_id {
            Some(id) if !id.is_empty() && id != GUEST_OWNER_ID => Owner::User(id),
            _ => Owner::Guest,
        }
    }

    /// The owner id as stored in the local `owner_id` column.
    pub fn id(&self) -> &str {
        match self {
            Owner::Guest => GUEST_OWNER_ID,
            Owner::User(id) => id,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Owner::Guest)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A note as held in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
}

impl Note {
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// Local mirror of a row confirmed by the remote store.
    pub fn from_remote(remote: RemoteNote) -> Self {
        Self {
            id: remote.id,
            owner_id: remote.user_id,
            content: remote.content,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
            sync_status: SyncStatus::Synced,
        }
    }
}

/// A row of the remote `notes` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNote {
    #[serde(deserialize_with = "id_from_text_or_number")]
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Remote tables keyed by `bigint` send ids as JSON numbers.
fn id_from_text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

/// Input to a save: content plus optional caller-chosen id and creation time.
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub id: Option<String>,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl NoteDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

/// Mint an identifier for a note that has not been confirmed remotely.
pub fn mint_local_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Newest-first ordering used by every list surface.
pub fn sort_newest_first(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn note(id: &str, secs: i64) -> Note {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        Note {
            id: id.to_string(),
            owner_id: GUEST_OWNER_ID.to_string(),
            content: format!("note {}", id),
            created_at: at,
            updated_at: at,
            sync_status: SyncStatus::Synced,
        }
    }

    #[test]
    fn test_owner_from_user_id() {
        assert_eq!(Owner::from_user_id(None), Owner::Guest);
        assert_eq!(Owner::from_user_id(Some(String::new())), Owner::Guest);
        assert_eq!(Owner::from_user_id(Some("guest".into())), Owner::Guest);
        assert_eq!(
            Owner::from_user_id(Some("user-1".into())),
            Owner::User("user-1".into())
        );
        assert_eq!(Owner::Guest.id(), "guest");
    }

    #[test]
    fn test_sync_status_round_trip_str() {
        assert_eq!(SyncStatus::parse("pending"), Some(SyncStatus::Pending));
        assert_eq!(SyncStatus::parse(SyncStatus::Synced.as_str()), Some(SyncStatus::Synced));
        assert_eq!(SyncStatus::parse("dirty"), None);
    }

    #[test]
    fn test_sort_newest_first() {
        let mut notes = vec![note("a", 10), note("c", 30), note("b", 20), note("d", 30)];
        sort_newest_first(&mut notes);
        let ids: Vec<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_mint_local_id_format() {
        let id = mint_local_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, mint_local_id());
    }

    #[test]
    fn test_remote_note_wire_format() {
        let json = serde_json::json!({
            "id": "42",
            "user_id": "user-1",
            "content": "Buy milk",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00+00:00",
        });
        let remote: RemoteNote = serde_json::from_value(json).unwrap();
        let local = Note::from_remote(remote);
        assert_eq!(local.owner_id, "user-1");
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert!(local.updated_at > local.created_at);
    }

    #[test]
    fn test_remote_note_accepts_numeric_and_text_ids() {
        let numeric: RemoteNote = serde_json::from_str(
            r#"{"id": 42, "user_id": "u1", "content": "x",
                "created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(numeric.id, "42");

        let text: RemoteNote = serde_json::from_str(
            r#"{"id": "9b2c", "user_id": "u1", "content": "x",
                "created_at": "2025-01-01T00:00:00+00:00", "updated_at": "2025-01-01T00:00:00+00:00"}"#,
        )
        .unwrap();
        assert_eq!(text.id, "9b2c");
    }
}
