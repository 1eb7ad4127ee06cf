//! Error taxonomy shared by the provisioning and permission pipelines

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration. Always fatal, raised before any mutation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A collaborator could not be reached or returned malformed data
    #[error("catalog access failed for {resource}: {message}")]
    CatalogAccess { resource: String, message: String },

    /// The desired schema could not be diffed against the catalog
    #[error("cannot reconcile table {table}: {message}")]
    ReconciliationConflict { table: String, message: String },

    /// A single create/drop/grant/revoke call failed
    #[error("{operation} failed: {message}")]
    Execution { operation: String, message: String },

    /// The table name filter selected nothing in the catalog
    #[error("no tables in database {database} match {filter}")]
    NoMatchingTables { database: String, filter: String },
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Wrap a collaborator failure while reading catalog state
    pub fn catalog(resource: impl Into<String>, source: anyhow::Error) -> Self {
        Error::CatalogAccess {
            resource: resource.into(),
            message: format!("{:#}", source),
        }
    }

    /// Wrap a collaborator failure while mutating state
    pub fn execution(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Execution {
            operation: operation.into(),
            message: format!("{:#}", source),
        }
    }

    /// Fatal errors stop the whole run; the rest are recorded per item
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::NoMatchingTables { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_catalog_error_keeps_context_chain() {
        let source = Err::<(), _>(anyhow!("connection reset"))
            .context("GetTable sales.orders")
            .unwrap_err();
        let err = Error::catalog("sales.orders", source);
        assert_eq!(
            err.to_string(),
            "catalog access failed for sales.orders: GetTable sales.orders: connection reset"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_configuration_is_fatal() {
        assert!(Error::configuration("missing table").is_fatal());
        assert!(Error::NoMatchingTables {
            database: "sales".into(),
            filter: "prefix 'tmp_'".into()
        }
        .is_fatal());
    }
}
