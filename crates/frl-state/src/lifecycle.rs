//! # Content Lifecycle
//!
//! Flag history of a content record. A record is created live, may be
//! deleted, and a deleted record may be restored. `is_restored` remembers
//! that a restore happened, so the state after a restore is distinguishable
//! from a record that was never deleted.
//!
//! ```text
//!              delete                 restore
//! (live) ───────────────▶ (deleted) ───────────────▶ (restored)
//!   ▲                                                    │
//!   └──────────── (restored records can be deleted) ─────┘
//! ```
//!
//! Valid transitions, enforced at runtime:
//!
//! | kind    | from                          | to                                  |
//! |---------|-------------------------------|-------------------------------------|
//! | create  | absent                        | `is_deleted=false, is_restored=false` |
//! | delete  | `is_deleted=false`            | `is_deleted=true, is_restored=false`  |
//! | restore | `is_deleted=true`             | `is_deleted=false, is_restored=true`  |

use frl_core::ConflictError;
use serde::{Deserialize, Serialize};

/// Deletion flags carried by every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentFlags {
    /// The record is currently deleted.
    pub is_deleted: bool,
    /// The record was deleted and later restored.
    pub is_restored: bool,
}

impl ContentFlags {
    /// Flags of a freshly created record.
    pub const LIVE: ContentFlags = ContentFlags {
        is_deleted: false,
        is_restored: false,
    };
    /// Flags after a delete.
    pub const DELETED: ContentFlags = ContentFlags {
        is_deleted: true,
        is_restored: false,
    };
    /// Flags after a restore.
    pub const RESTORED: ContentFlags = ContentFlags {
        is_deleted: false,
        is_restored: true,
    };
}

/// The three kinds of content mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Insert a new record.
    Create,
    /// Mark an existing record deleted.
    Delete,
    /// Undo a delete.
    Restore,
}

impl TransitionKind {
    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Restore => "restore",
        }
    }

    /// Flags a record must carry after this transition, given its current
    /// flags (`None` when the record does not exist yet).
    ///
    /// Existence checks (duplicate create, delete of a missing record) are
    /// the caller's job; this function only judges the flag history and
    /// reports an absent record as a flag conflict.
    pub fn next_flags(&self, current: Option<ContentFlags>) -> Result<ContentFlags, ConflictError> {
        let next = match (self, current) {
            (Self::Create, None) => Some(ContentFlags::LIVE),
            (Self::Delete, Some(f)) if !f.is_deleted => Some(ContentFlags::DELETED),
            (Self::Restore, Some(f)) if f.is_deleted => Some(ContentFlags::RESTORED),
            _ => None,
        };
        next.ok_or_else(|| {
            let f = current.unwrap_or_default();
            ConflictError::InvalidFlagTransition {
                kind: self.name().to_string(),
                is_deleted: f.is_deleted,
                is_restored: f.is_restored,
            }
        })
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_then_restore_then_delete() {
        let deleted = TransitionKind::Delete.next_flags(Some(ContentFlags::LIVE)).unwrap();
        assert_eq!(deleted, ContentFlags::DELETED);
        let restored = TransitionKind::Restore.next_flags(Some(deleted)).unwrap();
        assert_eq!(restored, ContentFlags::RESTORED);
        let again = TransitionKind::Delete.next_flags(Some(restored)).unwrap();
        assert_eq!(again, ContentFlags::DELETED);
    }

    #[test]
    fn double_delete_is_rejected() {
        let err = TransitionKind::Delete
            .next_flags(Some(ContentFlags::DELETED))
            .unwrap_err();
        assert_eq!(
            err,
            ConflictError::InvalidFlagTransition {
                kind: "delete".into(),
                is_deleted: true,
                is_restored: false,
            }
        );
    }

    #[test]
    fn restore_of_live_record_is_rejected() {
        assert!(TransitionKind::Restore.next_flags(Some(ContentFlags::LIVE)).is_err());
        assert!(TransitionKind::Restore.next_flags(Some(ContentFlags::RESTORED)).is_err());
    }

    #[test]
    fn create_requires_absence() {
        assert_eq!(TransitionKind::Create.next_flags(None).unwrap(), ContentFlags::LIVE);
        assert!(TransitionKind::Create.next_flags(Some(ContentFlags::LIVE)).is_err());
        assert!(TransitionKind::Delete.next_flags(None).is_err());
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TransitionKind::Restore).unwrap(), "\"restore\"");
    }
}
