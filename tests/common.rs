//! Shared helpers for the integration suite: a tempdir-backed store with
//! a `test_` table prefix and a tiny path-like test resource.

// each test binary compiles this module and uses a different subset
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use statehouse::{JsonMarshaler, Metadata, Pool, Resource, State, StateOptions};

/// A store over a temporary database file; the directory lives as long as
/// the harness.
pub struct TestState {
    pub state: Arc<State>,
    _dir: tempfile::TempDir,
}

/// Builds a store with the given options (table prefix forced to `test_`).
pub async fn with_state(options: StateOptions) -> TestState {
    let dir = tempfile::tempdir().expect("create temp dir");
    let pool = Pool::open(dir.path().join("state.db"), 8).expect("open pool");

    let state = State::new(pool, JsonMarshaler, options.with_table_prefix("test_"))
        .await
        .expect("create state");

    TestState {
        state: Arc::new(state),
        _dir: dir,
    }
}

/// Builds a store with default options.
pub async fn default_state() -> TestState {
    with_state(StateOptions::default()).await
}

/// A minimal test resource: type `path`, spec carrying its own id.
pub fn path_resource(namespace: &str, id: &str) -> Resource {
    Resource::new(
        Metadata::new(namespace, "path", id),
        serde_json::json!({ "path": id }),
    )
}

/// Polls until all watch subscriptions are gone; fails the test after a
/// second. Watch tasks unwind asynchronously after their consumer drops.
#[allow(dead_code)]
pub async fn wait_subscriptions_empty(state: &State) {
    for _ in 0..200 {
        if state.subscriptions_empty() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    panic!("expected no active subscriptions");
}
