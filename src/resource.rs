//! # Resources and Metadata
//!
//! Domain types for the store: a [`Resource`] is an opaque spec plus a
//! [`Metadata`] record carrying its identity triple `(namespace, type, id)`
//! and bookkeeping attributes (version, owner, phase, labels, finalizers,
//! timestamps).
//!
//! ## Invariants
//!
//! - The identity triple is the primary key; the store enforces uniqueness.
//! - [`Version`] is monotone: every successful mutation stores
//!   `version.next()`. `Version::UNDEFINED` (zero) marks tombstones only.
//! - An empty owner string means "no owner". Once set, the owner can only
//!   be confirmed, never silently changed.
//! - Metadata values are not shared across tasks; the write path mutates
//!   the caller's metadata only after a successful commit.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Version
// =============================================================================

/// A monotone resource version.
///
/// Fresh metadata starts at version 1; the write path persists
/// `version.next()` on every mutation, so the first create stores
/// version 2. Zero is the undefined sentinel used by tombstones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The undefined version, carried by tombstone metadata.
    pub const UNDEFINED: Version = Version(0);

    /// The version fresh metadata starts with.
    pub const INITIAL: Version = Version(1);

    /// Creates a version from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value for storage.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "undefined")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// =============================================================================
// Phase
// =============================================================================

/// A small-integer lifecycle tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// The resource is live.
    Running,
    /// The resource is being torn down; finalizers are draining.
    TearingDown,
}

impl Phase {
    /// Returns the stored integer representation.
    pub fn as_i64(&self) -> i64 {
        match self {
            Phase::Running => 1,
            Phase::TearingDown => 2,
        }
    }

    /// Decodes the stored integer representation.
    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Phase::Running),
            2 => Ok(Phase::TearingDown),
            other => Err(Error::Internal(format!("unknown phase value {other}"))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Running => write!(f, "running"),
            Phase::TearingDown => write!(f, "tearingDown"),
        }
    }
}

// =============================================================================
// Kind
// =============================================================================

/// The `(namespace, type)` tuple used as a watch and subscription scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Kind {
    namespace: String,
    type_name: String,
}

impl Kind {
    /// Creates a kind from a namespace and a resource type name.
    pub fn new(namespace: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            type_name: type_name.into(),
        }
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the resource type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.type_name)
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Identity and bookkeeping attributes of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    namespace: String,
    type_name: String,
    id: String,
    version: Version,
    owner: String,
    phase: Phase,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    labels: BTreeMap<String, String>,
    finalizers: Vec<String>,
}

impl Metadata {
    /// Creates metadata for a new resource: initial version, no owner,
    /// phase running, no labels or finalizers.
    pub fn new(
        namespace: impl Into<String>,
        type_name: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            type_name: type_name.into(),
            id: id.into(),
            version: Version::INITIAL,
            owner: String::new(),
            phase: Phase::Running,
            created: DateTime::UNIX_EPOCH,
            updated: DateTime::UNIX_EPOCH,
            labels: BTreeMap::new(),
            finalizers: Vec::new(),
        }
    }

    /// Creates tombstone metadata: identity only, version undefined.
    ///
    /// Tombstones carry identity for `Destroyed`, `Bootstrapped` and `Noop`
    /// events that have no live resource behind them.
    pub fn tombstone(
        namespace: impl Into<String>,
        type_name: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        let mut md = Self::new(namespace, type_name, id);
        md.version = Version::UNDEFINED;
        md
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the resource type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the resource id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the `(namespace, type)` scope of this resource.
    pub fn kind(&self) -> Kind {
        Kind::new(self.namespace.clone(), self.type_name.clone())
    }

    /// Returns the current version.
    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Returns the owner, or an empty string when unowned.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Sets the owner.
    ///
    /// Setting an owner on unowned metadata, or re-confirming the current
    /// owner, succeeds. Changing a non-empty owner fails with
    /// [`Error::OwnerConflict`].
    pub fn set_owner(&mut self, owner: &str) -> Result<()> {
        if !self.owner.is_empty() && self.owner != owner {
            return Err(Error::OwnerConflict {
                resource: self.to_string(),
                owner: self.owner.clone(),
            });
        }

        self.owner = owner.to_string();

        Ok(())
    }

    /// Returns the lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sets the lifecycle phase.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Returns the creation time.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub(crate) fn set_created(&mut self, created: DateTime<Utc>) {
        self.created = created;
    }

    /// Returns the last update time.
    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    pub(crate) fn set_updated(&mut self, updated: DateTime<Utc>) {
        self.updated = updated;
    }

    /// Returns the labels.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns the labels for modification.
    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.labels
    }

    /// Returns the finalizers in registration order.
    pub fn finalizers(&self) -> &[String] {
        &self.finalizers
    }

    /// Registers a finalizer. Returns false if it was already present.
    pub fn add_finalizer(&mut self, finalizer: impl Into<String>) -> bool {
        let finalizer = finalizer.into();

        if self.finalizers.contains(&finalizer) {
            return false;
        }

        self.finalizers.push(finalizer);

        true
    }

    /// Removes a finalizer. Returns false if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.namespace, self.type_name, self.id, self.version
        )
    }
}

// =============================================================================
// Resource
// =============================================================================

/// A stored record: metadata plus an opaque spec.
///
/// The store never interprets the spec; it round-trips through the
/// configured [`Marshaler`](crate::marshal::Marshaler) as bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    metadata: Metadata,
    spec: serde_json::Value,
}

impl Resource {
    /// Creates a resource from metadata and a spec value.
    pub fn new(metadata: Metadata, spec: serde_json::Value) -> Self {
        Self { metadata, spec }
    }

    /// Creates a tombstone resource: the given metadata and a null spec.
    pub fn tombstone(metadata: Metadata) -> Self {
        Self {
            metadata,
            spec: serde_json::Value::Null,
        }
    }

    /// Returns the metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the metadata for modification.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Returns the opaque spec.
    pub fn spec(&self) -> &serde_json::Value {
        &self.spec
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_progression() {
        assert_eq!(Version::INITIAL.next(), Version::from_raw(2));
        assert_eq!(Version::from_raw(41).next().value(), 42);
        assert_eq!(Version::UNDEFINED.to_string(), "undefined");
        assert_eq!(Version::from_raw(3).to_string(), "3");
    }

    #[test]
    fn test_phase_roundtrip() {
        assert_eq!(Phase::from_i64(Phase::Running.as_i64()).unwrap(), Phase::Running);
        assert_eq!(
            Phase::from_i64(Phase::TearingDown.as_i64()).unwrap(),
            Phase::TearingDown
        );
        assert!(Phase::from_i64(17).is_err());
    }

    #[test]
    fn test_metadata_display() {
        let md = Metadata::new("ns1", "path", "var/run");
        assert_eq!(md.to_string(), "ns1/path/var/run@1");

        let tombstone = Metadata::tombstone("ns1", "path", "var/run");
        assert_eq!(tombstone.to_string(), "ns1/path/var/run@undefined");
    }

    #[test]
    fn test_set_owner() {
        let mut md = Metadata::new("ns", "a", "b");

        md.set_owner("controller-1").unwrap();
        assert_eq!(md.owner(), "controller-1");

        // confirming the same owner is fine
        md.set_owner("controller-1").unwrap();

        let err = md.set_owner("controller-2").unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(md.owner(), "controller-1");
    }

    #[test]
    fn test_finalizers() {
        let mut md = Metadata::new("ns", "a", "b");

        assert!(md.add_finalizer("A"));
        assert!(!md.add_finalizer("A"));
        assert!(md.add_finalizer("B"));
        assert_eq!(md.finalizers(), &["A".to_string(), "B".to_string()]);

        assert!(md.remove_finalizer("A"));
        assert!(!md.remove_finalizer("A"));
        assert_eq!(md.finalizers(), &["B".to_string()]);
    }

    #[test]
    fn test_resource_serde_roundtrip() {
        let mut md = Metadata::new("ns1", "path", "var/run");
        md.labels_mut().insert("env".to_string(), "prod".to_string());

        let res = Resource::new(md, serde_json::json!({"path": "var/run"}));

        let bytes = serde_json::to_vec(&res).unwrap();
        let back: Resource = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back, res);
    }
}
