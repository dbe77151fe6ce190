//! # Event Log Compaction
//!
//! The events table grows with every write; compaction trims it under two
//! constraints at once: keep at least the newest `compact_keep_events`
//! events, and keep every event younger than `compact_min_age` — the
//! retained window is what bookmark resumes can still reach.
//!
//! A pass estimates the event count from the id range (good enough with
//! gaps), derives a cutoff id from the count bound, then binary-searches
//! the id space for the oldest event still protected by the age bound.
//! The search probes with `max(event_id) WHERE event_id < mid`, which
//! tolerates id gaps. Deletes run in batches of 1000 to bound transaction
//! size and lock duration.
//!
//! Passes are mutually exclusive; the background runner simply calls
//! [`State::compact`] on a ticker and logs the outcome.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::pool::PooledConn;
use crate::state::{blocking, State, StateInner};

/// Events deleted per transaction while trimming.
const DELETE_BATCH: i64 = 1000;

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionInfo {
    /// Events deleted by this pass.
    pub events_compacted: i64,
    /// Estimated events remaining after this pass.
    pub remaining_events: i64,
}

impl State {
    /// Runs one compaction pass.
    ///
    /// Passes are serialized: a concurrent call waits for the running
    /// pass to finish before starting its own.
    pub async fn compact(&self) -> Result<CompactionInfo> {
        run_pass(&self.inner).await
    }
}

/// One full pass against a held connection.
fn compact_pass(
    conn: PooledConn,
    prefix: &str,
    keep_events: i64,
    age_cutoff: i64,
) -> Result<CompactionInfo> {
    let mut info = CompactionInfo::default();

    let (min_id, max_id): (i64, i64) = conn.query_row(
        &format!(
            "SELECT coalesce(min(event_id), 0), coalesce(max(event_id), 0) FROM {prefix}events"
        ),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    if min_id == 0 && max_id == 0 {
        // no events
        return Ok(info);
    }

    // the id range over-counts only by the gaps, which is close enough
    info.remaining_events = max_id - min_id + 1;

    if info.remaining_events <= keep_events {
        return Ok(info);
    }

    // never drop into the newest keep_events window
    let count_cutoff = max_id - keep_events + 1;

    // binary search [min_id, count_cutoff) for the first event the age
    // bound still protects
    let (mut left, mut right) = (min_id, count_cutoff);
    let mut probe_timestamp: i64 = 0;

    while left < right {
        let mid = (left + right) / 2;

        if mid == min_id {
            // there are no older events to probe
            break;
        }

        // event ids may have gaps; probe the closest event below mid
        let probe: (Option<i64>, Option<i64>) = conn.query_row(
            &format!(
                "SELECT max(event_id), event_timestamp FROM {prefix}events WHERE event_id < ?1"
            ),
            params![mid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        probe_timestamp = match probe {
            (Some(_), Some(timestamp)) => timestamp,
            _ => {
                return Err(Error::Internal(format!(
                    "no event found below event id {mid} during compaction"
                )))
            }
        };

        if probe_timestamp < age_cutoff {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    if probe_timestamp > age_cutoff {
        // everything below the count cutoff is still within the age bound
        return Ok(info);
    }

    let effective_cutoff = left;

    // batched deletes bound the transaction size and lock duration
    loop {
        let affected = conn.execute(
            &format!(
                "DELETE FROM {prefix}events WHERE event_id IN
                 (SELECT event_id FROM {prefix}events WHERE event_id < ?1 LIMIT {DELETE_BATCH})"
            ),
            params![effective_cutoff],
        )? as i64;

        info.events_compacted += affected;
        info.remaining_events -= affected;

        if affected == 0 {
            break;
        }
    }

    Ok(info)
}

// =============================================================================
// Background Runner
// =============================================================================

/// Spawns the periodic compaction task: run a pass, log the outcome,
/// sleep an interval, repeat until shutdown.
pub(crate) fn spawn_runner(
    inner: Arc<StateInner>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = inner.options.compaction_interval;

        loop {
            match run_pass(&inner).await {
                Ok(info) => info!(
                    events_compacted = info.events_compacted,
                    remaining_events = info.remaining_events,
                    "database compaction completed"
                ),
                // a panicking pass surfaces here as Error::Internal and
                // does not take the runner down
                Err(err) => error!(error = %err, "failed to compact database"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

/// One serialized pass against the shared state, without a `State` handle.
async fn run_pass(inner: &Arc<StateInner>) -> Result<CompactionInfo> {
    let _guard = inner.compact_mu.lock().await;

    let conn = inner.pool.acquire().await?;
    let prefix = inner.options.table_prefix.clone();
    let keep_events = inner.options.compact_keep_events;
    let age_cutoff = Utc::now().timestamp() - inner.options.compact_min_age.num_seconds();

    blocking(move || compact_pass(conn, &prefix, keep_events, age_cutoff)).await
}
