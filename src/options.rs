//! # Configuration Bundles
//!
//! Option structs for the store and each of its operations. All of them
//! implement `Default` and expose chainable `with_*` builders; passing
//! `Default::default()` gives the documented default behavior.

use std::time::Duration;

use crate::event::Bookmark;
use crate::query::{queries_match, IdQuery, LabelQuery};
use crate::resource::Metadata;

// =============================================================================
// State Options
// =============================================================================

/// Store-wide configuration.
#[derive(Debug, Clone)]
pub struct StateOptions {
    /// Prefix for all tables used by this store. Setting a prefix allows
    /// multiple independent stores to share one database file. Default:
    /// empty.
    pub table_prefix: String,

    /// Interval between automatic compaction passes. Zero disables the
    /// background runner ([`compact`](crate::state::State::compact) stays
    /// available). Default: 30 minutes.
    pub compaction_interval: Duration,

    /// Number of most recent events compaction keeps regardless of age.
    /// Default: 1000.
    pub compact_keep_events: i64,

    /// Minimum age before an event becomes eligible for compaction.
    /// Keeping recent events lets watches restart from a bookmark; a
    /// negative value makes every event eligible immediately. Default:
    /// 1 hour.
    pub compact_min_age: chrono::Duration,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            compaction_interval: Duration::from_secs(30 * 60),
            compact_keep_events: 1000,
            compact_min_age: chrono::Duration::hours(1),
        }
    }
}

impl StateOptions {
    /// Sets the table prefix.
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Sets the interval between automatic compactions; zero disables the
    /// background runner.
    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Sets the number of events compaction keeps.
    pub fn with_compact_keep_events(mut self, keep_events: i64) -> Self {
        self.compact_keep_events = keep_events;
        self
    }

    /// Sets the minimum event age for compaction eligibility.
    pub fn with_compact_min_age(mut self, min_age: chrono::Duration) -> Self {
        self.compact_min_age = min_age;
        self
    }
}

// =============================================================================
// Write Options
// =============================================================================

/// Options for [`create`](crate::state::State::create).
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Owner recorded on the new resource; empty means unowned.
    pub owner: String,
}

impl CreateOptions {
    /// Sets the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

/// Options for [`update`](crate::state::State::update).
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Owner the caller claims; must match the stored owner.
    pub owner: String,

    /// When set, the update only succeeds while the resource is in this
    /// phase. Default: no phase check.
    pub expected_phase: Option<crate::resource::Phase>,
}

impl UpdateOptions {
    /// Sets the claimed owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Requires the resource to be in the given phase.
    pub fn with_expected_phase(mut self, phase: crate::resource::Phase) -> Self {
        self.expected_phase = Some(phase);
        self
    }
}

/// Options for [`destroy`](crate::state::State::destroy).
#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    /// Owner the caller claims; must match the stored owner.
    pub owner: String,
}

impl DestroyOptions {
    /// Sets the claimed owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

// =============================================================================
// Read Options
// =============================================================================

/// Options for [`list`](crate::state::State::list).
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Disjunction of label queries; empty matches everything.
    pub label_queries: Vec<LabelQuery>,

    /// Id predicate; empty matches everything.
    pub id_query: IdQuery,
}

impl ListOptions {
    /// Adds a label query to the disjunction.
    pub fn with_label_query(mut self, query: LabelQuery) -> Self {
        self.label_queries.push(query);
        self
    }

    /// Sets the id predicate.
    pub fn with_id_query(mut self, query: IdQuery) -> Self {
        self.id_query = query;
        self
    }

    /// Evaluates the full predicate against a resource's metadata.
    pub(crate) fn matches(&self, metadata: &Metadata) -> bool {
        queries_match(&self.label_queries, metadata.labels()) && self.id_query.matches(metadata.id())
    }
}

// =============================================================================
// Watch Options
// =============================================================================

/// Options for [`watch`](crate::state::State::watch) (single resource).
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Replay of the last N historical events. Not supported by this
    /// store; any non-zero value fails the watch setup.
    pub tail_events: u32,

    /// Resume strictly after the event the bookmark points at, skipping
    /// the initial-state event.
    pub start_from_bookmark: Option<Bookmark>,
}

impl WatchOptions {
    /// Resumes the watch from a bookmark.
    pub fn with_start_from_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.start_from_bookmark = Some(bookmark);
        self
    }
}

/// Options for [`watch_kind`](crate::state::State::watch_kind) and
/// [`watch_kind_aggregated`](crate::state::State::watch_kind_aggregated).
#[derive(Debug, Clone, Default)]
pub struct WatchKindOptions {
    /// Replay of the last N historical events. Not supported by this
    /// store; any non-zero value fails the watch setup.
    pub tail_events: u32,

    /// Resume strictly after the event the bookmark points at. Mutually
    /// exclusive with `bootstrap_contents`.
    pub start_from_bookmark: Option<Bookmark>,

    /// Start the watch with a `Created` event for every currently
    /// matching resource, closed by a `Bootstrapped` sentinel carrying
    /// the snapshot's bookmark.
    pub bootstrap_contents: bool,

    /// Start the watch with a single `Noop` event carrying the current
    /// bookmark, so the consumer can persist a resume point before any
    /// write happens.
    pub bootstrap_bookmark: bool,

    /// Disjunction of label queries; empty matches everything.
    pub label_queries: Vec<LabelQuery>,

    /// Id predicate; empty matches everything.
    pub id_query: IdQuery,
}

impl WatchKindOptions {
    /// Resumes the watch from a bookmark.
    pub fn with_start_from_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.start_from_bookmark = Some(bookmark);
        self
    }

    /// Enables bootstrap of current contents.
    pub fn with_bootstrap_contents(mut self) -> Self {
        self.bootstrap_contents = true;
        self
    }

    /// Enables the initial `Noop` bookmark event.
    pub fn with_bootstrap_bookmark(mut self) -> Self {
        self.bootstrap_bookmark = true;
        self
    }

    /// Adds a label query to the disjunction.
    pub fn with_label_query(mut self, query: LabelQuery) -> Self {
        self.label_queries.push(query);
        self
    }

    /// Sets the id predicate.
    pub fn with_id_query(mut self, query: IdQuery) -> Self {
        self.id_query = query;
        self
    }

    /// Evaluates the full predicate against a resource's metadata.
    pub(crate) fn matches(&self, metadata: &Metadata) -> bool {
        queries_match(&self.label_queries, metadata.labels()) && self.id_query.matches(metadata.id())
    }
}
