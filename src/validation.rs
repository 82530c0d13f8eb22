//! Input validation for notesync.
//!
//! All validators return NoteError::Validation on failure.

use crate::error::{NoteError, NoteResult};
use crate::models::GUEST_OWNER_ID;

pub const MAX_NOTE_CONTENT_LENGTH: usize = 100_000; // 100KB of text
pub const MAX_NOTE_ID_LENGTH: usize = 128;
pub const MAX_USER_ID_LENGTH: usize = 256;

/// Validate note content.
pub fn validate_note_content(content: &str) -> NoteResult<()> {
    if content.trim().is_empty() {
        return Err(NoteError::validation(
            "content",
            "cannot be empty or whitespace only",
        ));
    }

    if content.len() > MAX_NOTE_CONTENT_LENGTH {
        return Err(NoteError::validation(
            "content",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_NOTE_CONTENT_LENGTH,
                content.len()
            ),
        ));
    }

    Ok(())
}

/// Validate a note id (local or remote-assigned).
pub fn validate_note_id(note_id: &str) -> NoteResult<()> {
    if note_id.trim().is_empty() {
        return Err(NoteError::validation("note_id", "cannot be empty"));
    }
    if note_id.len() > MAX_NOTE_ID_LENGTH {
        return Err(NoteError::validation(
            "note_id",
            format!("cannot exceed {} characters", MAX_NOTE_ID_LENGTH),
        ));
    }
    Ok(())
}

/// Validate an authenticated user id. The guest sentinel is not a user.
pub fn validate_user_id(user_id: &str) -> NoteResult<()> {
    if user_id.trim().is_empty() {
        return Err(NoteError::validation("user_id", "cannot be empty"));
    }
    if user_id == GUEST_OWNER_ID {
        return Err(NoteError::validation(
            "user_id",
            format!("'{}' is reserved for notes without an account", GUEST_OWNER_ID),
        ));
    }
    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(NoteError::validation(
            "user_id",
            format!("cannot exceed {} characters", MAX_USER_ID_LENGTH),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_note_content() {
        assert!(validate_note_content("Hello #world").is_ok());
        assert!(validate_note_content("   \n").is_err());
        assert!(validate_note_content(&"x".repeat(MAX_NOTE_CONTENT_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_note_id() {
        assert!(validate_note_id("0190a1b2c3d4").is_ok());
        assert!(validate_note_id("").is_err());
        assert!(validate_note_id(&"a".repeat(MAX_NOTE_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_user_id_rejects_guest_sentinel() {
        assert!(validate_user_id("2b7c9e1e-user").is_ok());
        assert!(validate_user_id("guest").is_err());
        assert!(validate_user_id(" ").is_err());
    }
}
