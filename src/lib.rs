//! # Statehouse — a durable single-node resource state store
//!
//! Statehouse stores typed, namespaced, versioned resources in SQLite and
//! streams a total-ordered sequence of change events to any number of
//! concurrent watchers. It is the storage layer for a controller-style
//! runtime: controllers create and mutate resources under optimistic
//! concurrency, and react to each other's changes through watches.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         State (async API)                       │
//! │     create / update / destroy / get / list / watch* / compact   │
//! └───────────┬─────────────────────────────┬───────────────────────┘
//!             │ writes                      │ watches
//!             ▼                             ▼
//! ┌───────────────────────┐       ┌─────────────────────────────────┐
//! │      Write path       │notify │          Watch engine           │
//! │ immediate transaction │──────►│ one task per watch, woken by    │
//! │ precondition checks   │       │ the notifier, tails the log     │
//! └───────────┬───────────┘       └───────────────┬─────────────────┘
//!             ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      SQLite (WAL, pooled)                       │
//! │   resources table ──triggers──► events table (total order)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Atomic journal**: triggers insert the event row in the same
//!    transaction that mutates the resource row; the two tables never
//!    disagree.
//! 2. **Total event order**: `event_id` strictly increases across all
//!    writes; watchers observe events in `event_id` order. Gaps are
//!    allowed (compaction, rollbacks), reuse is not.
//! 3. **Optimistic concurrency**: every mutation bumps the resource
//!    version and guards the write with `WHERE version = current`.
//! 4. **Coalesced wakeups**: the notifier delivers at most one pending
//!    wakeup per subscriber; watchers catch up by event-id range.
//! 5. **Compaction preserves recency**: surviving events are within the
//!    configured count of the head or younger than the minimum age.
//!
//! ## Module Organization
//!
//! - [`error`]: crate-wide error enum and classification helpers
//! - [`resource`]: metadata, resources, kinds, versions, phases
//! - [`query`]: label and id queries with in-memory matching
//! - [`filter`]: conservative compilation of label queries to SQL
//! - [`event`]: watch events and bookmarks
//! - [`marshal`]: opaque resource marshaling contract
//! - [`schema`]: DDL, triggers, idempotent migration
//! - [`pool`]: fixed-size SQLite connection pool
//! - [`options`]: configuration bundles for the state and its operations
//! - [`state`]: the [`State`] handle and lifecycle
//! - [`writer`]: create / update / destroy
//! - [`reader`]: get / list
//! - [`watch`]: point and kind watches
//! - [`compact`]: event log compaction

pub mod compact;
pub mod error;
pub mod event;
pub mod filter;
pub mod marshal;
pub mod options;
pub mod pool;
pub mod query;
pub mod reader;
pub mod resource;
pub mod schema;
pub mod state;
pub(crate) mod sub;
pub mod watch;
pub mod writer;

pub use compact::CompactionInfo;
pub use error::{Error, Result};
pub use event::{Bookmark, Event};
pub use marshal::{JsonMarshaler, Marshaler};
pub use options::{
    CreateOptions, DestroyOptions, ListOptions, StateOptions, UpdateOptions, WatchKindOptions,
    WatchOptions,
};
pub use pool::Pool;
pub use query::{IdQuery, LabelOp, LabelQuery, LabelTerm};
pub use resource::{Kind, Metadata, Phase, Resource, Version};
pub use state::State;
