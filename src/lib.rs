//! notesync - offline-first replication core for a single-user notes collection.
//!
//! This library provides:
//! - Data models (Note, Owner, NoteDraft)
//! - Local mirror (SQLite) with pending-write tracking
//! - Remote data API client and an in-process stand-in
//! - Sync engine: save, list with merge-on-read, update, delete, flush
//! - Guest to account migration and starter-note bootstrap
//! - Session handling (identity changes, connectivity-triggered flush)
//! - Configuration management
//!
//! Notes written without an account ("guest") live only on the device. Notes
//! of a signed-in account are written to the remote store first and mirrored
//! locally; anything the remote store could not take is kept as pending and
//! pushed later.
//!
//! # Feature Flags
//!
//! - `desktop`: Platform config directory detection. Without it, callers pass
//!   the config directory explicitly.

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod merge;
pub mod migration;
pub mod models;
pub mod remote;
pub mod remote_http;
pub mod remote_memory;
pub mod session;
pub mod sync_engine;
pub mod validation;

// Re-export commonly used types
pub use bootstrap::{bootstrap_owner, BootstrapOutcome, STARTER_NOTES};
pub use config::Config;
pub use database::Database;
pub use error::{NoteError, NoteResult, RemoteError};
pub use identity::{IdentityProvider, StaticIdentity};
pub use migration::{migrate_guest_notes, MigrationReport};
pub use models::{Note, NoteDraft, Owner, RemoteNote, SyncStatus};
pub use remote::RemoteStore;
pub use remote_http::HttpRemote;
pub use remote_memory::MemoryRemote;
pub use session::{IdentityChange, Session, SessionOptions};
pub use sync_engine::{FlushReport, SyncEngine, UpdateOutcome};
