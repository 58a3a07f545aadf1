//! # Domain Types
//!
//! Small value types shared by every resource table.
//!
//! ## System Columns
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every resource table carries four columns the engine manages:         │
//! │                                                                         │
//! │  <identifier> INTEGER PRIMARY KEY AUTOINCREMENT (usually `id`)         │
//! │  created_at  INTEGER  (Unix millis, set on insert)                     │
//! │  updated_at  INTEGER  (Unix millis, set on insert and update)          │
//! │  deleted_at  INTEGER  (Unix millis, 0 = active)  ◄── DeletionState     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Conventional name of the identifier column.
pub const ID_COLUMN: &str = "id";

/// Column holding the creation timestamp.
pub const CREATED_AT_COLUMN: &str = "created_at";

/// Column holding the last-update timestamp.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Column holding the soft-delete marker.
pub const DELETED_AT_COLUMN: &str = "deleted_at";

/// Columns the engine manages on every table besides the identifier.
pub const MANAGED_COLUMNS: [&str; 3] = [CREATED_AT_COLUMN, UPDATED_AT_COLUMN, DELETED_AT_COLUMN];

// =============================================================================
// Deletion State
// =============================================================================

/// Soft-delete state of a row.
///
/// The table stores this as a millisecond timestamp where `0` means active.
/// That encoding is confined to [`DeletionState::from_millis`] and
/// [`DeletionState::to_millis`]; everything else speaks in terms of the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DeletionState {
    /// The row is visible.
    Active,

    /// The row was logically deleted at the given instant.
    Deleted { at: DateTime<Utc> },
}

impl DeletionState {
    /// Marks a row deleted now.
    pub fn deleted_now() -> Self {
        DeletionState::Deleted { at: Utc::now() }
    }

    /// Decodes the stored column value.
    ///
    /// Out-of-range timestamps still decode as deleted; only `0` is active.
    pub fn from_millis(millis: i64) -> Self {
        if millis == 0 {
            return DeletionState::Active;
        }
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        DeletionState::Deleted { at }
    }

    /// Encodes for the stored column.
    pub fn to_millis(&self) -> i64 {
        match self {
            DeletionState::Active => 0,
            // A deletion at exactly the epoch would read back as active.
            DeletionState::Deleted { at } => at.timestamp_millis().max(1),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, DeletionState::Active)
    }
}

/// Current time as Unix milliseconds, the unit of every timestamp column.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Unit Tests
// =============================================================================
