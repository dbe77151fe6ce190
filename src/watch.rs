//! # Watch Engine
//!
//! Three entry points share one core:
//!
//! - [`watch`](State::watch): events for a single resource identity,
//!   delivered one by one.
//! - [`watch_kind`](State::watch_kind): events for every resource of a
//!   kind passing the options' predicate, delivered one by one.
//! - [`watch_kind_aggregated`](State::watch_kind_aggregated): the same,
//!   but each wakeup's drain arrives as one batch.
//!
//! ## Two phases
//!
//! **Setup** runs synchronously in the caller and can fail: it registers
//! with the notifier (before any snapshot, so no event can slip between
//! snapshot and subscription), then either takes an initial snapshot
//! under a read transaction or validates the resume bookmark. Setup
//! errors propagate to the caller and leave no subscription behind.
//!
//! **Streaming** is one task per watch. It parks on the subscription's
//! wakeup channel, and on each wakeup drains every journal row above the
//! last seen event id, in event-id order. Wakeups are coalesced and carry
//! no payload; the drain query is the payload. The task ends when the
//! consumer drops its receiver (observed both while parked and while
//! sending) or when a row fails to convert, in which case a terminal
//! `Errored` event is delivered first.
//!
//! ## Match transitions
//!
//! Kind watches rewrite events whose matching fact changes: an update
//! into the predicate becomes `Created`, an update out of it becomes
//! `Destroyed`, a non-matching event is dropped. Point watches never
//! rewrite; their SQL filter already pins the identity.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{Bookmark, Event};
use crate::filter::compile_label_queries;
use crate::marshal::Marshaler;
use crate::options::{WatchKindOptions, WatchOptions};
use crate::query::LabelQuery;
use crate::resource::{Kind, Metadata, Resource};
use crate::state::{blocking, State, StateInner};
use crate::sub::{self, Subscription};

// =============================================================================
// Public Entry Points
// =============================================================================

impl State {
    /// Watches a single resource identity.
    ///
    /// Watching a resource that does not exist yet is fine: the initial
    /// event is then a `Destroyed` tombstone, and a later create arrives
    /// as `Created`. Unless resuming from a bookmark, the current state
    /// is sent as the very first event on the channel.
    ///
    /// The watch ends when the consumer drops the receiving half of `ch`.
    pub async fn watch(
        &self,
        ptr: &Metadata,
        ch: mpsc::Sender<Event>,
        options: WatchOptions,
    ) -> Result<()> {
        if options.tail_events != 0 {
            return Err(Error::Unsupported {
                feature: "tailEvents".to_string(),
            });
        }

        let sub = sub::subscribe(&self.inner.sub, ptr.kind());

        let mut prelude = Vec::new();
        let last_seen;

        match &options.start_from_bookmark {
            Some(bookmark) => {
                last_seen = self.resume_point(bookmark).await?;
                // no writes may happen for a while; fire the loop once so
                // it drains everything after the bookmark immediately
                sub.trigger_notify();
            }
            None => {
                let (spec, max_id) = self.point_snapshot(ptr).await?;

                let event = match spec {
                    Some(bytes) => Event::Created {
                        resource: self.inner.marshaler.unmarshal_resource(&bytes)?,
                        bookmark: Some(Bookmark::encode(max_id)),
                    },
                    None => Event::Destroyed {
                        resource: Resource::tombstone(Metadata::tombstone(
                            ptr.namespace(),
                            ptr.type_name(),
                            ptr.id(),
                        )),
                        bookmark: Some(Bookmark::encode(max_id)),
                    },
                };

                prelude.push(event);
                last_seen = max_id;
            }
        }

        let stream = WatchStream {
            inner: Arc::clone(&self.inner),
            scope: format!("{}/{}/{}", ptr.namespace(), ptr.type_name(), ptr.id()),
            namespace: ptr.namespace().to_string(),
            type_name: ptr.type_name().to_string(),
            id: Some(ptr.id().to_string()),
            filter: None,
            last_seen,
        };

        tokio::spawn(stream.run(sub, Sink::Single(ch), prelude, None));

        Ok(())
    }

    /// Watches all resources of a kind, delivering single events.
    pub async fn watch_kind(
        &self,
        kind: &Kind,
        ch: mpsc::Sender<Event>,
        options: WatchKindOptions,
    ) -> Result<()> {
        self.watch_kind_inner(kind, Sink::Single(ch), options).await
    }

    /// Watches all resources of a kind, delivering each drain as a batch.
    pub async fn watch_kind_aggregated(
        &self,
        kind: &Kind,
        ch: mpsc::Sender<Vec<Event>>,
        options: WatchKindOptions,
    ) -> Result<()> {
        self.watch_kind_inner(kind, Sink::Aggregated(ch), options).await
    }

    async fn watch_kind_inner(
        &self,
        kind: &Kind,
        sink: Sink,
        options: WatchKindOptions,
    ) -> Result<()> {
        if options.tail_events != 0 {
            return Err(Error::Unsupported {
                feature: "tailEvents".to_string(),
            });
        }

        if options.start_from_bookmark.is_some() && options.bootstrap_contents {
            return Err(Error::Unsupported {
                feature: "startFromBookmark and bootstrapContents".to_string(),
            });
        }

        let sub = sub::subscribe(&self.inner.sub, kind.clone());

        let mut bootstrap = Vec::new();
        let last_seen;

        if let Some(bookmark) = &options.start_from_bookmark {
            last_seen = self.resume_point(bookmark).await?;
            sub.trigger_notify();
        } else if options.bootstrap_contents {
            let (specs, max_id) = self.kind_snapshot(kind, &options.label_queries).await?;

            for spec in specs {
                let resource = self.inner.marshaler.unmarshal_resource(&spec)?;

                if !options.matches(resource.metadata()) {
                    continue;
                }

                bootstrap.push(resource);
            }

            last_seen = max_id;
        } else {
            last_seen = self.max_event_id().await?;
        }

        let sentinel = || {
            Resource::tombstone(Metadata::tombstone(kind.namespace(), kind.type_name(), ""))
        };

        let mut prelude: Vec<Event> = Vec::new();

        if options.bootstrap_contents {
            prelude.extend(bootstrap.into_iter().map(|resource| Event::Created {
                resource,
                bookmark: None,
            }));
            prelude.push(Event::Bootstrapped {
                resource: sentinel(),
                bookmark: Bookmark::encode(last_seen),
            });
        }

        let noop = options.bootstrap_bookmark.then(|| Event::Noop {
            resource: sentinel(),
            bookmark: Bookmark::encode(last_seen),
        });

        let stream = WatchStream {
            inner: Arc::clone(&self.inner),
            scope: kind.to_string(),
            namespace: kind.namespace().to_string(),
            type_name: kind.type_name().to_string(),
            id: None,
            filter: Some(options),
            last_seen,
        };

        tokio::spawn(stream.run(sub, sink, prelude, noop));

        Ok(())
    }

    // =========================================================================
    // Setup-Phase Queries
    // =========================================================================

    /// Decodes a resume bookmark and verifies the event it points at is
    /// still in the journal.
    async fn resume_point(&self, bookmark: &Bookmark) -> Result<i64> {
        let event_id = bookmark.decode()?;

        let prefix = self.inner.options.table_prefix.clone();
        let conn = self.inner.pool.acquire().await?;

        let exists = blocking(move || {
            let select = format!("SELECT 1 FROM {prefix}events WHERE event_id = ?1");

            let found: Option<i64> = conn
                .query_row(&select, params![event_id], |row| row.get(0))
                .optional()?;

            Ok(found.is_some())
        })
        .await?;

        if !exists {
            return Err(Error::InvalidBookmark {
                reason: format!("event {event_id} has been compacted"),
            });
        }

        Ok(event_id)
    }

    /// Reads a point watch's initial state: the resource's current spec
    /// (if any) and the journal head, consistently under one read
    /// transaction.
    async fn point_snapshot(&self, ptr: &Metadata) -> Result<(Option<Vec<u8>>, i64)> {
        let namespace = ptr.namespace().to_string();
        let type_name = ptr.type_name().to_string();
        let id = ptr.id().to_string();
        let prefix = self.inner.options.table_prefix.clone();
        let conn = self.inner.pool.acquire().await?;

        blocking(move || {
            let mut conn = conn;
            let tx = conn.transaction()?;

            let select = format!(
                "SELECT spec FROM {prefix}resources
                 WHERE namespace = ?1 AND type = ?2 AND id = ?3"
            );

            let spec: Option<Vec<u8>> = tx
                .query_row(&select, params![namespace, type_name, id], |row| row.get(0))
                .optional()?;

            let max_id: i64 = tx.query_row(
                &format!("SELECT coalesce(max(event_id), 0) FROM {prefix}events"),
                [],
                |row| row.get(0),
            )?;

            Ok((spec, max_id))
        })
        .await
    }

    /// Reads a kind watch's bootstrap set (specs of rows passing the
    /// compiled label predicate) and the journal head under one read
    /// transaction.
    async fn kind_snapshot(
        &self,
        kind: &Kind,
        label_queries: &[LabelQuery],
    ) -> Result<(Vec<Vec<u8>>, i64)> {
        let namespace = kind.namespace().to_string();
        let type_name = kind.type_name().to_string();
        let prefix = self.inner.options.table_prefix.clone();
        let filter = compile_label_queries(label_queries);
        let conn = self.inner.pool.acquire().await?;

        blocking(move || {
            let mut conn = conn;
            let tx = conn.transaction()?;

            let select = format!(
                "SELECT spec FROM {prefix}resources
                 WHERE namespace = ?1 AND type = ?2 AND ({filter})"
            );

            let specs = {
                let mut stmt = tx.prepare(&select)?;
                let rows = stmt
                    .query_map(params![namespace, type_name], |row| row.get::<_, Vec<u8>>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            };

            let max_id: i64 = tx.query_row(
                &format!("SELECT coalesce(max(event_id), 0) FROM {prefix}events"),
                [],
                |row| row.get(0),
            )?;

            Ok((specs, max_id))
        })
        .await
    }

    /// Reads the journal head.
    async fn max_event_id(&self) -> Result<i64> {
        let prefix = self.inner.options.table_prefix.clone();
        let conn = self.inner.pool.acquire().await?;

        blocking(move || {
            let max_id: i64 = conn.query_row(
                &format!("SELECT coalesce(max(event_id), 0) FROM {prefix}events"),
                [],
                |row| row.get(0),
            )?;

            Ok(max_id)
        })
        .await
    }
}

// =============================================================================
// Delivery Sink
// =============================================================================

/// Where a watch delivers: a single-event channel or a batch channel.
enum Sink {
    Single(mpsc::Sender<Event>),
    Aggregated(mpsc::Sender<Vec<Event>>),
}

impl Sink {
    /// Resolves when the consumer has dropped its receiver.
    async fn closed(&self) {
        match self {
            Sink::Single(tx) => tx.closed().await,
            Sink::Aggregated(tx) => tx.closed().await,
        }
    }

    /// Delivers a batch of events: one send for an aggregated sink, one
    /// send per event otherwise. Returns false once the consumer is gone.
    async fn deliver(&self, events: Vec<Event>) -> bool {
        if events.is_empty() {
            return true;
        }

        match self {
            Sink::Single(tx) => {
                for event in events {
                    if tx.send(event).await.is_err() {
                        return false;
                    }
                }

                true
            }
            Sink::Aggregated(tx) => tx.send(events).await.is_ok(),
        }
    }
}

// =============================================================================
// Streaming Phase
// =============================================================================

/// One journal row as the drain query returns it.
struct EventRow {
    event_id: i64,
    spec_before: Option<Vec<u8>>,
    spec_after: Option<Vec<u8>>,
    event_type: i64,
}

/// Everything a streaming task needs, detached from the `State` handle.
struct WatchStream {
    inner: Arc<StateInner>,
    scope: String,
    namespace: String,
    type_name: String,
    /// Set for point watches; pins the drain query to one identity.
    id: Option<String>,
    /// Set for kind watches; drives match-transition rewriting.
    filter: Option<WatchKindOptions>,
    last_seen: i64,
}

impl WatchStream {
    async fn run(mut self, mut sub: Subscription, sink: Sink, prelude: Vec<Event>, noop: Option<Event>) {
        if !sink.deliver(prelude).await {
            return;
        }

        if let Some(noop) = noop {
            if !sink.deliver(vec![noop]).await {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = sink.closed() => return,
                _ = sub.notified() => {}
            }

            let rows = match self.fetch_new_events().await {
                Ok(rows) => rows,
                Err(error) => {
                    debug!(scope = %self.scope, error = %error, "watch drain failed");

                    let _ = sink.deliver(vec![Event::Errored { error }]).await;

                    return;
                }
            };

            let mut batch = Vec::new();

            for row in rows {
                self.last_seen = row.event_id;

                let event = convert_event(self.inner.marshaler.as_ref(), &self.scope, row);

                if matches!(event, Event::Errored { .. }) {
                    // terminal: the accumulated batch is dropped, the error
                    // is the last thing the consumer sees
                    let _ = sink.deliver(vec![event]).await;

                    return;
                }

                let event = match &self.filter {
                    None => event,
                    Some(options) => match rewrite_match_transition(event, options) {
                        Some(event) => event,
                        None => continue,
                    },
                };

                batch.push(event);
            }

            if !sink.deliver(batch).await {
                return;
            }
        }
    }

    /// Drains journal rows above the last seen event id, in id order.
    async fn fetch_new_events(&self) -> Result<Vec<EventRow>> {
        let prefix = self.inner.options.table_prefix.clone();
        let namespace = self.namespace.clone();
        let type_name = self.type_name.clone();
        let id = self.id.clone();
        let after = self.last_seen;
        let conn = self.inner.pool.acquire().await?;

        blocking(move || {
            let select = match &id {
                Some(_) => format!(
                    "SELECT event_id, spec_before, spec_after, event_type
                     FROM {prefix}events
                     WHERE event_id > ?1 AND namespace = ?2 AND type = ?3 AND id = ?4
                     ORDER BY event_id ASC"
                ),
                None => format!(
                    "SELECT event_id, spec_before, spec_after, event_type
                     FROM {prefix}events
                     WHERE event_id > ?1 AND namespace = ?2 AND type = ?3
                     ORDER BY event_id ASC"
                ),
            };

            let mut stmt = conn.prepare(&select)?;

            let map_row = |row: &rusqlite::Row<'_>| {
                Ok(EventRow {
                    event_id: row.get(0)?,
                    spec_before: row.get(1)?,
                    spec_after: row.get(2)?,
                    event_type: row.get(3)?,
                })
            };

            let rows = match &id {
                Some(id) => stmt
                    .query_map(params![after, namespace, type_name, id], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map(params![after, namespace, type_name], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };

            Ok(rows)
        })
        .await
    }
}

// =============================================================================
// Event Conversion
// =============================================================================

/// Converts a journal row into a watch event. Any decode failure becomes
/// an `Errored` event, which terminates the watch that sees it.
fn convert_event(marshaler: &dyn Marshaler, scope: &str, row: EventRow) -> Event {
    let bookmark = Some(Bookmark::encode(row.event_id));

    match row.event_type {
        1 => match unmarshal_column(marshaler, row.spec_after, "spec_after", scope) {
            Ok(resource) => Event::Created { resource, bookmark },
            Err(error) => Event::Errored { error },
        },
        2 => {
            let resource = match unmarshal_column(marshaler, row.spec_after, "spec_after", scope) {
                Ok(resource) => resource,
                Err(error) => return Event::Errored { error },
            };

            let old = match unmarshal_column(marshaler, row.spec_before, "spec_before", scope) {
                Ok(old) => old,
                Err(error) => return Event::Errored { error },
            };

            Event::Updated {
                resource,
                old,
                bookmark,
            }
        }
        3 => match unmarshal_column(marshaler, row.spec_before, "spec_before", scope) {
            Ok(resource) => Event::Destroyed { resource, bookmark },
            Err(error) => Event::Errored { error },
        },
        other => Event::Errored {
            error: Error::Internal(format!("unknown event type {other} for watch {scope}")),
        },
    }
}

fn unmarshal_column(
    marshaler: &dyn Marshaler,
    bytes: Option<Vec<u8>>,
    column: &str,
    scope: &str,
) -> Result<Resource> {
    let Some(bytes) = bytes else {
        return Err(Error::Internal(format!(
            "event row for watch {scope} is missing {column}"
        )));
    };

    marshaler.unmarshal_resource(&bytes)
}

// =============================================================================
// Match-Transition Rewriting
// =============================================================================

/// Rewrites an event for a kind watch whose predicate the transition may
/// cross: entering the predicate reads as `Created`, leaving it as
/// `Destroyed`, staying outside drops the event entirely.
fn rewrite_match_transition(event: Event, options: &WatchKindOptions) -> Option<Event> {
    match event {
        Event::Created { resource, bookmark } => {
            if options.matches(resource.metadata()) {
                Some(Event::Created { resource, bookmark })
            } else {
                None
            }
        }
        Event::Destroyed { resource, bookmark } => {
            if options.matches(resource.metadata()) {
                Some(Event::Destroyed { resource, bookmark })
            } else {
                None
            }
        }
        Event::Updated {
            resource,
            old,
            bookmark,
        } => {
            let old_matches = options.matches(old.metadata());
            let new_matches = options.matches(resource.metadata());

            match (old_matches, new_matches) {
                (true, true) => Some(Event::Updated {
                    resource,
                    old,
                    bookmark,
                }),
                (false, true) => Some(Event::Created { resource, bookmark }),
                (true, false) => Some(Event::Destroyed { resource, bookmark }),
                (false, false) => None,
            }
        }
        // sentinels and errors are produced after conversion and never
        // pass through the rewriter
        other => Some(other),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::JsonMarshaler;
    use crate::query::LabelTerm;

    fn resource_with_label(key: &str, value: &str) -> Resource {
        let mut md = Metadata::new("ns", "a", "b");
        md.labels_mut().insert(key.to_string(), value.to_string());
        Resource::new(md, serde_json::Value::Null)
    }

    fn prod_filter() -> WatchKindOptions {
        WatchKindOptions::default()
            .with_label_query(LabelQuery::new(vec![LabelTerm::equal("env", "prod")]))
    }

    #[test]
    fn test_convert_event_kinds() {
        let marshaler = JsonMarshaler;
        let res = resource_with_label("env", "prod");
        let bytes = marshaler.marshal_resource(&res).unwrap();

        let created = convert_event(
            &marshaler,
            "ns/a",
            EventRow {
                event_id: 7,
                spec_before: None,
                spec_after: Some(bytes.clone()),
                event_type: 1,
            },
        );
        assert!(matches!(created, Event::Created { .. }));
        assert_eq!(created.bookmark().unwrap().decode().unwrap(), 7);

        let updated = convert_event(
            &marshaler,
            "ns/a",
            EventRow {
                event_id: 8,
                spec_before: Some(bytes.clone()),
                spec_after: Some(bytes.clone()),
                event_type: 2,
            },
        );
        assert!(matches!(updated, Event::Updated { .. }));
        assert!(updated.old().is_some());

        let destroyed = convert_event(
            &marshaler,
            "ns/a",
            EventRow {
                event_id: 9,
                spec_before: Some(bytes.clone()),
                spec_after: None,
                event_type: 3,
            },
        );
        assert!(matches!(destroyed, Event::Destroyed { .. }));

        let unknown = convert_event(
            &marshaler,
            "ns/a",
            EventRow {
                event_id: 10,
                spec_before: None,
                spec_after: Some(bytes),
                event_type: 9,
            },
        );
        assert!(matches!(unknown, Event::Errored { .. }));
    }

    #[test]
    fn test_convert_event_bad_payload() {
        let event = convert_event(
            &JsonMarshaler,
            "ns/a",
            EventRow {
                event_id: 1,
                spec_before: None,
                spec_after: Some(b"not json".to_vec()),
                event_type: 1,
            },
        );
        assert!(matches!(event, Event::Errored { .. }));

        let event = convert_event(
            &JsonMarshaler,
            "ns/a",
            EventRow {
                event_id: 1,
                spec_before: None,
                spec_after: None,
                event_type: 1,
            },
        );
        assert!(matches!(event, Event::Errored { .. }));
    }

    #[test]
    fn test_match_transitions() {
        let options = prod_filter();
        let prod = resource_with_label("env", "prod");
        let dev = resource_with_label("env", "dev");
        let bookmark = Some(Bookmark::encode(1));

        // created: kept iff matching
        assert!(rewrite_match_transition(
            Event::Created {
                resource: prod.clone(),
                bookmark: bookmark.clone()
            },
            &options
        )
        .is_some());
        assert!(rewrite_match_transition(
            Event::Created {
                resource: dev.clone(),
                bookmark: bookmark.clone()
            },
            &options
        )
        .is_none());

        // update entering the predicate becomes Created
        let entering = rewrite_match_transition(
            Event::Updated {
                resource: prod.clone(),
                old: dev.clone(),
                bookmark: bookmark.clone(),
            },
            &options,
        )
        .unwrap();
        assert!(matches!(entering, Event::Created { .. }));

        // update leaving the predicate becomes Destroyed
        let leaving = rewrite_match_transition(
            Event::Updated {
                resource: dev.clone(),
                old: prod.clone(),
                bookmark: bookmark.clone(),
            },
            &options,
        )
        .unwrap();
        assert!(matches!(leaving, Event::Destroyed { .. }));

        // update inside the predicate passes through
        let inside = rewrite_match_transition(
            Event::Updated {
                resource: prod.clone(),
                old: prod.clone(),
                bookmark: bookmark.clone(),
            },
            &options,
        )
        .unwrap();
        assert!(matches!(inside, Event::Updated { .. }));

        // update entirely outside is dropped
        assert!(rewrite_match_transition(
            Event::Updated {
                resource: dev.clone(),
                old: dev,
                bookmark,
            },
            &options,
        )
        .is_none());
    }
}
