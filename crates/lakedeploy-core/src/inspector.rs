//! Read-only queries against the catalog service

use std::fmt;

use tracing::debug;

use crate::backend::CatalogService;
use crate::error::{Error, Result};
use crate::types::{Partition, TableKind, TableSnapshot};

/// Optional prefix/suffix restriction on table names, used to scope partial runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl NameFilter {
    pub fn new(prefix: Option<String>, suffix: Option<String>) -> Self {
        Self { prefix, suffix }
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.suffix.is_none()
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        let prefix_ok = self
            .prefix
            .as_ref()
            .map_or(true, |p| name.starts_with(&p.to_lowercase()));
        let suffix_ok = self
            .suffix
            .as_ref()
            .map_or(true, |s| name.ends_with(&s.to_lowercase()));
        prefix_ok && suffix_ok
    }
}

impl fmt::Display for NameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.prefix, &self.suffix) {
            (None, None) => write!(f, "any name"),
            (Some(p), None) => write!(f, "prefix '{}'", p),
            (None, Some(s)) => write!(f, "suffix '{}'", s),
            (Some(p), Some(s)) => write!(f, "prefix '{}' and suffix '{}'", p, s),
        }
    }
}

/// Read-only view over a catalog service
pub struct CatalogInspector<'a> {
    catalog: &'a dyn CatalogService,
}

impl<'a> CatalogInspector<'a> {
    pub fn new(catalog: &'a dyn CatalogService) -> Self {
        Self { catalog }
    }

    pub async fn database_exists(&self, database: &str) -> Result<bool> {
        self.catalog
            .database_exists(database)
            .await
            .map_err(|e| Error::catalog(database, e))
    }

    /// Current snapshot of a table.
    ///
    /// `Ok(None)` only when the catalog affirmatively reports the table
    /// absent. A table that exists but cannot be described is an error,
    /// never "absent".
    pub async fn snapshot(&self, database: &str, table: &str) -> Result<Option<TableSnapshot>> {
        let resource = format!("{}.{}", database, table);
        let exists = self
            .catalog
            .table_exists(database, table)
            .await
            .map_err(|e| Error::catalog(&resource, e))?;
        if !exists {
            debug!(table = %resource, "table not in catalog");
            return Ok(None);
        }

        let snapshot = self
            .catalog
            .get_table(database, table)
            .await
            .map_err(|e| Error::catalog(&resource, e))?
            .ok_or_else(|| Error::CatalogAccess {
                resource: resource.clone(),
                message: "table exists but its schema could not be retrieved".to_string(),
            })?;

        if !snapshot.name.eq_ignore_ascii_case(table) {
            return Err(Error::CatalogAccess {
                resource,
                message: format!("catalog returned metadata for '{}'", snapshot.name),
            });
        }
        if snapshot.kind == TableKind::External && snapshot.columns.is_empty() {
            return Err(Error::CatalogAccess {
                resource,
                message: "catalog reported an external table without columns".to_string(),
            });
        }

        debug!(
            table = %resource,
            columns = snapshot.columns.len(),
            partition_keys = snapshot.partition_keys.len(),
            "observed table snapshot"
        );
        Ok(Some(snapshot))
    }

    pub async fn partitions(&self, database: &str, table: &str) -> Result<Vec<Partition>> {
        self.catalog
            .list_partitions(database, table)
            .await
            .map_err(|e| Error::catalog(format!("{}.{} partitions", database, table), e))
    }

    /// Sorted table names in a database, restricted by the filter when given
    pub async fn table_names(
        &self,
        database: &str,
        filter: Option<&NameFilter>,
    ) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .catalog
            .list_tables(database)
            .await
            .map_err(|e| Error::catalog(database, e))?
            .into_iter()
            .filter(|name| filter.map_or(true, |f| f.matches(name)))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_filter() {
        let filter = NameFilter::new(Some("claims_".into()), Some("_view".into()));
        assert!(filter.matches("claims_summary_view"));
        assert!(filter.matches("CLAIMS_detail_VIEW"));
        assert!(!filter.matches("claims_summary"));
        assert!(!filter.matches("orders_view"));

        let open = NameFilter::default();
        assert!(open.is_empty());
        assert!(open.matches("anything"));
        assert_eq!(filter.to_string(), "prefix 'claims_' and suffix '_view'");
    }
}
