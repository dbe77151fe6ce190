//! # Read Path
//!
//! Get and List. List pushes the compiled label predicate into the SQL
//! query so obviously non-matching rows never leave the engine, then
//! re-applies the full options predicate to every unmarshaled resource —
//! the compiler is conservative and may let rows through (see
//! [`filter`](crate::filter)).
//!
//! No result ordering is promised to callers.

use rusqlite::{params, OptionalExtension};

use crate::error::{Error, Result};
use crate::filter::compile_label_queries;
use crate::options::ListOptions;
use crate::resource::{Kind, Metadata, Resource};
use crate::state::{blocking, State};

impl State {
    /// Returns the resource with the given identity triple.
    pub async fn get(&self, ptr: &Metadata) -> Result<Resource> {
        let namespace = ptr.namespace().to_string();
        let type_name = ptr.type_name().to_string();
        let id = ptr.id().to_string();
        let resource_str = ptr.to_string();
        let prefix = self.inner.options.table_prefix.clone();
        let marshaler = std::sync::Arc::clone(&self.inner.marshaler);
        let conn = self.inner.pool.acquire().await?;

        blocking(move || {
            let select = format!(
                "SELECT spec FROM {prefix}resources
                 WHERE namespace = ?1 AND type = ?2 AND id = ?3"
            );

            let spec: Option<Vec<u8>> = conn
                .query_row(&select, params![namespace, type_name, id], |row| row.get(0))
                .optional()?;

            let Some(spec) = spec else {
                return Err(Error::NotFound {
                    resource: resource_str,
                });
            };

            marshaler.unmarshal_resource(&spec)
        })
        .await
    }

    /// Returns all resources of a kind passing the options' predicate.
    pub async fn list(&self, kind: &Kind, options: ListOptions) -> Result<Vec<Resource>> {
        let namespace = kind.namespace().to_string();
        let type_name = kind.type_name().to_string();
        let prefix = self.inner.options.table_prefix.clone();
        let marshaler = std::sync::Arc::clone(&self.inner.marshaler);
        let conn = self.inner.pool.acquire().await?;

        let filter = compile_label_queries(&options.label_queries);

        blocking(move || {
            let select = format!(
                "SELECT spec FROM {prefix}resources
                 WHERE namespace = ?1 AND type = ?2 AND ({filter})"
            );

            let mut stmt = conn.prepare(&select)?;
            let specs = stmt
                .query_map(params![namespace, type_name], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut result = Vec::new();

            for spec in specs {
                let resource = marshaler.unmarshal_resource(&spec)?;

                // the pushed-down predicate is conservative; the original
                // query stays authoritative
                if !options.matches(resource.metadata()) {
                    continue;
                }

                result.push(resource);
            }

            Ok(result)
        })
        .await
    }
}
