//! # Connection Pool
//!
//! A fixed-size pool of SQLite connections. Every store operation takes a
//! connection for its duration: writes hold one across their transaction,
//! watches take one per wakeup to drain the event log, compaction holds
//! one for a whole pass.
//!
//! Size the pool at least at the number of expected concurrent watches
//! plus writers, plus one for compaction; acquisition blocks (at an await
//! point) when the pool is exhausted.
//!
//! Connections are opened with the journal pragmas the store relies on:
//! WAL journaling (readers don't block the writer), a 5 s busy timeout
//! (the store's only retry mechanism), and NORMAL synchronous mode.
//! SQLite connections are not `Sync`, so all statement execution happens
//! on the blocking thread pool via [`tokio::task::spawn_blocking`]; the
//! guard travels into the closure and returns the connection on drop.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Pragmas applied to every pooled connection.
const CONNECTION_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;
";

// =============================================================================
// Pool
// =============================================================================

/// A fixed-size pool of SQLite connections to one database file.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    connections: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl Pool {
    /// Opens `size` connections (at least one) to the database at `path`,
    /// creating the file if necessary.
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let size = size.max(1);
        let path = path.as_ref();

        let mut connections = Vec::with_capacity(size);

        for _ in 0..size {
            let conn = Connection::open(path)?;
            conn.execute_batch(CONNECTION_PRAGMAS)?;
            connections.push(conn);
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                connections: Mutex::new(connections),
                permits: Arc::new(Semaphore::new(size)),
                size,
            }),
        })
    }

    /// Returns the pool size.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Takes a connection, waiting until one is free.
    pub async fn acquire(&self) -> Result<PooledConn> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("connection pool closed".to_string()))?;

        let conn = lock_unpoisoned(&self.inner.connections).pop().ok_or_else(|| {
            Error::Internal("connection pool permit held but no connection available".to_string())
        })?;

        Ok(PooledConn {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

/// A mutex for plain data: a poisoned lock still yields usable contents.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// =============================================================================
// Pooled Connection
// =============================================================================

/// A connection checked out of the pool; returned on drop from any thread,
/// including the blocking pool a closure ran on.
pub struct PooledConn {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // the Option is only empty inside drop
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            lock_unpoisoned(&self.pool.connections).push(conn);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
