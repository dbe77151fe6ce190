//! # Error Handling
//!
//! A single crate-wide [`Error`] enum represents every failure mode the
//! store can produce, so callers match on one type regardless of which
//! operation failed.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Conflict | `AlreadyExists`, `VersionConflict`, `OwnerConflict`, `PhaseConflict`, `PendingFinalizers` | Re-read, re-apply, retry |
//! | Not found | `NotFound` | Treat as absent |
//! | Watch | `InvalidBookmark`, `Unsupported` | Restart the watch with different options |
//! | Transport | `Marshal`, `Sqlite`, `Schema`, `Internal` | Log and investigate |
//!
//! The store itself never retries: SQLite's busy timeout is the only retry
//! mechanism in the stack.

use thiserror::Error;

use crate::resource::Phase;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in store operations.
///
/// Variants that refer to a specific resource carry its formatted identity
/// (`namespace/type/id@version`) so the message is self-describing.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Conflict Errors (caller can retry with fresh data)
    // =========================================================================
    /// Create hit the primary-key uniqueness constraint: the identity triple
    /// already exists.
    #[error("resource {resource} already exists")]
    AlreadyExists {
        /// Formatted identity of the conflicting resource.
        resource: String,
    },

    /// Optimistic concurrency failed: the caller's version does not match
    /// the stored version, or the guarded UPDATE/DELETE affected no row.
    #[error("resource {resource} version conflict: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Formatted identity of the resource.
        resource: String,
        /// The version the caller expected to find.
        expected: u64,
        /// The version actually stored at check time.
        actual: u64,
    },

    /// The caller-provided owner does not match the stored owner.
    #[error("resource {resource} is owned by {owner:?}")]
    OwnerConflict {
        /// Formatted identity of the resource.
        resource: String,
        /// The owner currently recorded on the resource.
        owner: String,
    },

    /// Update was conditioned on a phase the resource is not in.
    #[error("resource {resource} is not in phase {expected}")]
    PhaseConflict {
        /// Formatted identity of the resource.
        resource: String,
        /// The phase the caller required.
        expected: Phase,
    },

    /// Destroy attempted while finalizers are still registered.
    #[error("resource {resource} has pending finalizers {finalizers:?}")]
    PendingFinalizers {
        /// Formatted identity of the resource.
        resource: String,
        /// The finalizers still holding the resource.
        finalizers: Vec<String>,
    },

    // =========================================================================
    // Not Found
    // =========================================================================
    /// Get/Update/Destroy referenced an identity triple with no row.
    #[error("resource {resource} doesn't exist")]
    NotFound {
        /// Formatted identity of the missing resource.
        resource: String,
    },

    // =========================================================================
    // Watch Errors
    // =========================================================================
    /// A bookmark failed to decode, or the event it points at has been
    /// compacted away.
    #[error("invalid watch bookmark: {reason}")]
    InvalidBookmark {
        /// What was wrong with the bookmark.
        reason: String,
    },

    /// A requested option combination is not supported by this store.
    #[error("unsupported option: {feature}")]
    Unsupported {
        /// The unsupported feature or combination.
        feature: String,
    },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Resource or label encoding/decoding failed.
    #[error("marshal error: {0}")]
    Marshal(#[from] serde_json::Error),

    /// The underlying SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed or the stored schema is unusable.
    #[error("schema error: {0}")]
    Schema(String),

    /// An internal invariant did not hold (e.g. the compaction probe found
    /// no neighbor event where one must exist).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for conflict-class errors: the stored state disagreed with the
    /// caller's preconditions, and a retry with fresh data may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::AlreadyExists { .. }
                | Error::VersionConflict { .. }
                | Error::OwnerConflict { .. }
                | Error::PhaseConflict { .. }
                | Error::PendingFinalizers { .. }
        )
    }

    /// True when the referenced resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True when a watch bookmark could not be resumed from.
    pub fn is_invalid_bookmark(&self) -> bool {
        matches!(self, Error::InvalidBookmark { .. })
    }
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// SQLite Error Classification
// =============================================================================

/// Returns true when the error is a unique/primary-key constraint
/// violation, as opposed to any other SQLite failure.
///
/// Create relies on this to turn the INSERT failure into
/// [`Error::AlreadyExists`] while still propagating genuine engine errors.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        ),
        _ => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
