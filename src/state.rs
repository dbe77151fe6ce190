//! # State Handle and Lifecycle
//!
//! [`State`] binds one connection [`Pool`] and one [`Marshaler`] into a
//! store instance. Construction applies the schema idempotently and, when
//! configured, spawns the background compaction runner; [`close`] stops
//! that runner and nothing else — user watches are tied to their
//! consumers, not to the store lifecycle.
//!
//! All state lives in the instance; there are no globals.
//!
//! [`close`]: State::close

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::compact;
use crate::error::{Error, Result};
use crate::marshal::Marshaler;
use crate::options::StateOptions;
use crate::pool::Pool;
use crate::schema;
use crate::sub;

// =============================================================================
// Blocking Bridge
// =============================================================================

/// Runs a closure of SQLite work on the blocking thread pool.
///
/// A panic inside the closure surfaces as [`Error::Internal`] instead of
/// unwinding the caller; the compaction runner relies on this to survive
/// a panicking pass.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
}

// =============================================================================
// State
// =============================================================================

/// Shared innards of a [`State`]; watch tasks hold a clone of this.
pub(crate) struct StateInner {
    pub(crate) pool: Pool,
    pub(crate) marshaler: Arc<dyn Marshaler>,
    pub(crate) sub: Arc<sub::Manager>,
    pub(crate) options: StateOptions,
    /// Serializes compaction passes; never held across other operations.
    pub(crate) compact_mu: tokio::sync::Mutex<()>,
}

/// A durable resource state store over one SQLite database.
///
/// # Example
///
/// ```rust,no_run
/// use statehouse::{JsonMarshaler, Metadata, Pool, Resource, State, StateOptions};
///
/// # async fn example() -> statehouse::Result<()> {
/// let pool = Pool::open("state.db", 8)?;
/// let state = State::new(pool, JsonMarshaler, StateOptions::default()).await?;
///
/// let mut res = Resource::new(
///     Metadata::new("ns1", "path", "var/run"),
///     serde_json::json!({"path": "var/run"}),
/// );
/// state.create(&mut res, Default::default()).await?;
///
/// state.close().await;
/// # Ok(())
/// # }
/// ```
pub struct State {
    pub(crate) inner: Arc<StateInner>,
    shutdown_tx: watch::Sender<bool>,
    compaction_task: Mutex<Option<JoinHandle<()>>>,
}

impl State {
    /// Creates a store over the given pool and marshaler.
    ///
    /// Applies the journal schema (a no-op when present) and spawns the
    /// compaction runner when `options.compaction_interval` is non-zero.
    pub async fn new(
        pool: Pool,
        marshaler: impl Marshaler + 'static,
        options: StateOptions,
    ) -> Result<Self> {
        let prefix = options.table_prefix.clone();
        let conn = pool.acquire().await?;

        blocking(move || schema::migrate(&conn, &prefix)).await?;

        let inner = Arc::new(StateInner {
            pool,
            marshaler: Arc::new(marshaler),
            sub: Arc::new(sub::Manager::default()),
            options,
            compact_mu: tokio::sync::Mutex::new(()),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let compaction_task = if !inner.options.compaction_interval.is_zero() {
            Some(compact::spawn_runner(Arc::clone(&inner), shutdown_rx))
        } else {
            None
        };

        Ok(Self {
            inner,
            shutdown_tx,
            compaction_task: Mutex::new(compaction_task),
        })
    }

    /// Shuts down background compaction and waits for the runner to exit.
    ///
    /// In-flight user operations and watches are not awaited: watches end
    /// when their consumers drop the event receivers.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);

        let task = match self.compaction_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Returns the size in bytes of the tables used by this store.
    ///
    /// Uses SQLite's `dbstat` virtual table to sum the page usage of the
    /// prefixed resources and events tables inside the main database
    /// file; separate WAL/SHM files are not included.
    pub async fn db_size(&self) -> Result<u64> {
        let conn = self.inner.pool.acquire().await?;
        let resources = format!("{}resources", self.inner.options.table_prefix);
        let events = format!("{}events", self.inner.options.table_prefix);

        blocking(move || {
            let size: i64 = conn.query_row(
                "SELECT coalesce(SUM(pgsize), 0) FROM dbstat WHERE name = ?1 OR name = ?2",
                rusqlite::params![resources, events],
                |row| row.get(0),
            )?;

            Ok(size as u64)
        })
        .await
    }

    /// True when no watch subscriptions are registered. Test hook: lets
    /// tests assert that watch tasks have fully unwound.
    pub fn subscriptions_empty(&self) -> bool {
        self.inner.sub.empty()
    }
}
