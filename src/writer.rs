//! # Write Path
//!
//! Create / Update / Destroy. Each operation runs in a single immediate
//! transaction — the write intent is acquired up front, which avoids
//! lock-upgrade deadlocks between concurrent writers inside the busy
//! timeout window.
//!
//! All precondition checks happen inside the transaction, against the row
//! the transaction sees. The journal triggers record the event as part of
//! the same commit; the write path itself never touches the events table.
//! After a successful commit the path notifies the subscription scope and
//! only then copies the new metadata back into the caller's resource
//! (metadata values are documented as not shared across tasks).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::error::{is_unique_violation, Error, Result};
use crate::options::{CreateOptions, DestroyOptions, UpdateOptions};
use crate::resource::{Metadata, Phase, Resource};
use crate::state::{blocking, State};

impl State {
    /// Creates a resource.
    ///
    /// The input is deep-copied first: the caller's metadata is only
    /// mutated (owner, timestamps, version) when the create succeeds.
    /// Creating an identity triple that already exists fails with
    /// [`Error::AlreadyExists`].
    pub async fn create(&self, resource: &mut Resource, options: CreateOptions) -> Result<()> {
        let mut res_copy = resource.clone();

        res_copy.metadata_mut().set_owner(&options.owner)?;

        let now = Utc::now();
        res_copy.metadata_mut().set_created(now);
        res_copy.metadata_mut().set_updated(now);

        let version = res_copy.metadata().version().next();
        res_copy.metadata_mut().set_version(version);

        let labels = labels_json(&res_copy)?;
        let finalizers = finalizers_json(&res_copy)?;
        let spec = self.inner.marshaler.marshal_resource(&res_copy)?;

        let resource_str = res_copy.metadata().to_string();
        let prefix = self.inner.options.table_prefix.clone();
        let conn = self.inner.pool.acquire().await?;

        let namespace = res_copy.metadata().namespace().to_string();
        let type_name = res_copy.metadata().type_name().to_string();
        let id = res_copy.metadata().id().to_string();
        let version = res_copy.metadata().version().value() as i64;
        let created_at = res_copy.metadata().created().timestamp();
        let updated_at = res_copy.metadata().updated().timestamp();
        let phase = res_copy.metadata().phase().as_i64();
        let owner = res_copy.metadata().owner().to_string();

        blocking(move || {
            let mut conn = conn;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let insert = format!(
                "INSERT INTO {prefix}resources
                 (namespace, type, id, version, created_at, updated_at, labels, finalizers, phase, owner, spec)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, jsonb(?7), jsonb(?8), ?9, ?10, ?11)"
            );

            match tx.execute(
                &insert,
                params![
                    namespace,
                    type_name,
                    id,
                    version,
                    created_at,
                    updated_at,
                    labels,
                    finalizers,
                    phase,
                    owner,
                    spec,
                ],
            ) {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(Error::AlreadyExists {
                        resource: resource_str,
                    })
                }
                Err(err) => return Err(err.into()),
            }

            tx.commit()?;

            Ok(())
        })
        .await?;

        self.inner.sub.notify(&res_copy.metadata().kind());

        *resource = res_copy;

        Ok(())
    }

    /// Updates a resource.
    ///
    /// The caller's version must match the stored version, the claimed
    /// owner must match the stored owner, and — when the options require
    /// one — the stored phase must match. The persisted version is the
    /// caller's version bumped once; `created_at` is preserved from the
    /// stored row.
    pub async fn update(&self, resource: &mut Resource, options: UpdateOptions) -> Result<()> {
        let res_copy = resource.clone();
        let caller_version = res_copy.metadata().version().value();
        let resource_str = res_copy.metadata().to_string();
        let prefix = self.inner.options.table_prefix.clone();
        let marshaler = std::sync::Arc::clone(&self.inner.marshaler);
        let conn = self.inner.pool.acquire().await?;

        let res_copy = blocking(move || {
            let mut res_copy = res_copy;
            let mut conn = conn;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let select = format!(
                "SELECT owner, version, created_at, phase
                 FROM {prefix}resources
                 WHERE namespace = ?1 AND type = ?2 AND id = ?3"
            );

            let current: Option<(String, i64, i64, i64)> = tx
                .query_row(
                    &select,
                    params![
                        res_copy.metadata().namespace(),
                        res_copy.metadata().type_name(),
                        res_copy.metadata().id(),
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((current_owner, current_version, created_at, current_phase)) = current else {
                return Err(Error::NotFound {
                    resource: resource_str,
                });
            };

            let current_version = current_version as u64;

            if current_version != caller_version {
                return Err(Error::VersionConflict {
                    resource: resource_str,
                    expected: caller_version,
                    actual: current_version,
                });
            }

            if current_owner != options.owner {
                return Err(Error::OwnerConflict {
                    resource: resource_str,
                    owner: current_owner,
                });
            }

            if let Some(expected) = options.expected_phase {
                if Phase::from_i64(current_phase)? != expected {
                    return Err(Error::PhaseConflict {
                        resource: resource_str,
                        expected,
                    });
                }
            }

            res_copy.metadata_mut().set_updated(Utc::now());
            res_copy.metadata_mut().set_created(
                DateTime::from_timestamp(created_at, 0).unwrap_or(DateTime::UNIX_EPOCH),
            );
            let version = res_copy.metadata().version().next();
            res_copy.metadata_mut().set_version(version);

            let labels = labels_json(&res_copy)?;
            let finalizers = finalizers_json(&res_copy)?;
            let spec = marshaler.marshal_resource(&res_copy)?;

            let update = format!(
                "UPDATE {prefix}resources
                 SET version = ?1, updated_at = ?2, labels = jsonb(?3), finalizers = jsonb(?4),
                     phase = ?5, owner = ?6, spec = ?7
                 WHERE namespace = ?8 AND type = ?9 AND id = ?10 AND version = ?11"
            );

            let md = res_copy.metadata();

            let affected = tx.execute(
                &update,
                params![
                    md.version().value() as i64,
                    md.updated().timestamp(),
                    labels,
                    finalizers,
                    md.phase().as_i64(),
                    md.owner(),
                    spec,
                    md.namespace(),
                    md.type_name(),
                    md.id(),
                    current_version as i64,
                ],
            )?;

            if affected != 1 {
                // a writer slipped in between our SELECT and UPDATE; report
                // the version we read, even though the committed one is newer
                return Err(Error::VersionConflict {
                    resource: resource_str,
                    expected: caller_version,
                    actual: current_version,
                });
            }

            tx.commit()?;

            Ok(res_copy)
        })
        .await?;

        self.inner.sub.notify(&res_copy.metadata().kind());

        *resource = res_copy;

        Ok(())
    }

    /// Destroys a resource.
    ///
    /// The claimed owner must match the stored owner and no finalizers may
    /// remain; a destroy racing with another writer fails with
    /// [`Error::VersionConflict`].
    pub async fn destroy(&self, ptr: &Metadata, options: DestroyOptions) -> Result<()> {
        let namespace = ptr.namespace().to_string();
        let type_name = ptr.type_name().to_string();
        let id = ptr.id().to_string();
        let resource_str = ptr.to_string();
        let prefix = self.inner.options.table_prefix.clone();
        let conn = self.inner.pool.acquire().await?;

        blocking(move || {
            let mut conn = conn;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let select = format!(
                "SELECT owner, json(finalizers), version
                 FROM {prefix}resources
                 WHERE namespace = ?1 AND type = ?2 AND id = ?3"
            );

            let current: Option<(String, Option<String>, i64)> = tx
                .query_row(&select, params![namespace, type_name, id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .optional()?;

            let Some((current_owner, current_finalizers, current_version)) = current else {
                return Err(Error::NotFound {
                    resource: resource_str,
                });
            };

            if current_owner != options.owner {
                return Err(Error::OwnerConflict {
                    resource: resource_str,
                    owner: current_owner,
                });
            }

            if let Some(finalizers) = current_finalizers {
                // decode is best-effort, the list only feeds the message
                let finalizers: Vec<String> =
                    serde_json::from_str(&finalizers).unwrap_or_default();

                return Err(Error::PendingFinalizers {
                    resource: resource_str,
                    finalizers,
                });
            }

            let delete = format!(
                "DELETE FROM {prefix}resources
                 WHERE namespace = ?1 AND type = ?2 AND id = ?3 AND version = ?4"
            );

            let affected = tx.execute(&delete, params![namespace, type_name, id, current_version])?;

            if affected != 1 {
                let current_version = current_version as u64;

                return Err(Error::VersionConflict {
                    resource: resource_str,
                    expected: current_version,
                    actual: current_version,
                });
            }

            tx.commit()?;

            Ok(())
        })
        .await?;

        self.inner.sub.notify(&ptr.kind());

        Ok(())
    }
}

/// Labels as a JSON object, or `None` (stored as NULL) when empty.
fn labels_json(resource: &Resource) -> Result<Option<String>> {
    let labels = resource.metadata().labels();

    if labels.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(labels)?))
    }
}

/// Finalizers as a JSON array, or `None` (stored as NULL) when empty.
fn finalizers_json(resource: &Resource) -> Result<Option<String>> {
    let finalizers = resource.metadata().finalizers();

    if finalizers.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(finalizers)?))
    }
}
