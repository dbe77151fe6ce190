//! # Watch Events and Bookmarks
//!
//! A watch delivers [`Event`]s: a tagged union over the transitions the
//! journal records plus the sentinels the watch protocol adds on top
//! (`Bootstrapped`, `Noop`, `Errored`).
//!
//! Every non-error event carries a [`Bookmark`]: an opaque handle
//! identifying the event's position in the log. Feeding a bookmark back
//! through `start_from_bookmark` resumes a watch with all strictly later
//! events, as long as compaction has not trimmed past it.

use std::fmt;

use crate::error::{Error, Result};
use crate::resource::Resource;

// =============================================================================
// Bookmark
// =============================================================================

/// An opaque handle into the event log.
///
/// The only valid wire encoding is exactly 8 bytes: the event id as a
/// big-endian unsigned 64-bit integer. Anything else fails to decode with
/// [`Error::InvalidBookmark`]. Because the encoding is big-endian,
/// byte-wise ordering of bookmarks matches event order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bookmark(Vec<u8>);

impl Bookmark {
    /// Wraps raw bookmark bytes, e.g. received from a client resuming a
    /// watch. No validation happens until the bookmark is decoded.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes for persistence or transfer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encodes an event id.
    pub(crate) fn encode(event_id: i64) -> Self {
        Self((event_id as u64).to_be_bytes().to_vec())
    }

    /// Decodes the event id, validating the length.
    pub(crate) fn decode(&self) -> Result<i64> {
        let bytes: [u8; 8] = self.0.as_slice().try_into().map_err(|_| Error::InvalidBookmark {
            reason: format!("invalid bookmark length: {}", self.0.len()),
        })?;

        Ok(u64::from_be_bytes(bytes) as i64)
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

// =============================================================================
// Event
// =============================================================================

/// A single observation delivered on a watch channel.
#[derive(Debug)]
pub enum Event {
    /// A resource came into existence (or newly started matching a kind
    /// watch's predicate).
    Created {
        /// The resource after the transition.
        resource: Resource,
        /// Position of the producing journal row; absent for bootstrap
        /// contents, which precede the `Bootstrapped` sentinel carrying it.
        bookmark: Option<Bookmark>,
    },

    /// A resource changed while matching the predicate before and after.
    Updated {
        /// The resource after the transition.
        resource: Resource,
        /// The resource before the transition.
        old: Resource,
        /// Position of the producing journal row.
        bookmark: Option<Bookmark>,
    },

    /// A resource was destroyed (or newly stopped matching the predicate).
    Destroyed {
        /// The resource before the transition, or a tombstone when only
        /// the identity is known.
        resource: Resource,
        /// Position of the producing journal row.
        bookmark: Option<Bookmark>,
    },

    /// Bootstrap is complete: every `Created` before this sentinel was
    /// part of the initial snapshot.
    Bootstrapped {
        /// A tombstone carrying the watch scope.
        resource: Resource,
        /// The log position of the snapshot.
        bookmark: Bookmark,
    },

    /// No state transition; carries the current log position so a caller
    /// can persist a resume point before any write happens.
    Noop {
        /// A tombstone carrying the watch scope.
        resource: Resource,
        /// The current log position.
        bookmark: Bookmark,
    },

    /// The watch failed; this is the final event on the channel.
    Errored {
        /// What went wrong.
        error: Error,
    },
}

impl Event {
    /// Returns the event's resource, if it has one.
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Event::Created { resource, .. }
            | Event::Updated { resource, .. }
            | Event::Destroyed { resource, .. }
            | Event::Bootstrapped { resource, .. }
            | Event::Noop { resource, .. } => Some(resource),
            Event::Errored { .. } => None,
        }
    }

    /// Returns the pre-transition resource for `Updated` events.
    pub fn old(&self) -> Option<&Resource> {
        match self {
            Event::Updated { old, .. } => Some(old),
            _ => None,
        }
    }

    /// Returns the event's bookmark, if it carries one.
    pub fn bookmark(&self) -> Option<&Bookmark> {
        match self {
            Event::Created { bookmark, .. }
            | Event::Updated { bookmark, .. }
            | Event::Destroyed { bookmark, .. } => bookmark.as_ref(),
            Event::Bootstrapped { bookmark, .. } | Event::Noop { bookmark, .. } => Some(bookmark),
            Event::Errored { .. } => None,
        }
    }

    /// Returns the error of an `Errored` event.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Event::Errored { error } => Some(error),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Metadata;

    #[test]
    fn test_bookmark_roundtrip() {
        for id in [0i64, 1, 42, 1 << 40, i64::MAX] {
            let bookmark = Bookmark::encode(id);
            assert_eq!(bookmark.as_bytes().len(), 8);
            assert_eq!(bookmark.decode().unwrap(), id);
        }
    }

    #[test]
    fn test_bookmark_ordering_matches_event_order() {
        let early = Bookmark::encode(7);
        let late = Bookmark::encode(300);

        assert!(early < late);
        assert!(early.as_bytes() < late.as_bytes());
    }

    #[test]
    fn test_bookmark_invalid_length() {
        for bytes in [&b""[..], &b"abc"[..], &b"123456789"[..]] {
            let err = Bookmark::from_bytes(bytes).decode().unwrap_err();
            assert!(err.is_invalid_bookmark());
        }
    }

    #[test]
    fn test_event_accessors() {
        let resource = Resource::tombstone(Metadata::tombstone("ns", "a", "b"));

        let destroyed = Event::Destroyed {
            resource: resource.clone(),
            bookmark: Some(Bookmark::encode(3)),
        };
        assert!(destroyed.resource().is_some());
        assert!(destroyed.old().is_none());
        assert_eq!(destroyed.bookmark().unwrap().decode().unwrap(), 3);

        let errored = Event::Errored {
            error: Error::Internal("boom".to_string()),
        };
        assert!(errored.resource().is_none());
        assert!(errored.bookmark().is_none());
        assert!(errored.error().is_some());
    }
}
