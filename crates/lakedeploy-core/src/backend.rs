//! Collaborator traits for the catalog, permission and storage services
//!
//! Implementations live in `lakedeploy-emulator` (local, in-memory) and
//! `lakedeploy-aws` (Glue, Athena, Lake Formation and S3).

use crate::config::TableDescriptor;
use crate::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Catalog metadata store: databases, tables and partitions
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Create a database, optionally rooted at an S3 location
    async fn create_database(&self, name: &str, location: Option<&str>) -> Result<()>;

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool>;

    /// Current schema of a table, `None` if it does not exist
    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableSnapshot>>;

    async fn list_tables(&self, database: &str) -> Result<Vec<String>>;

    /// Execute a rendered CREATE TABLE / CREATE VIEW statement.
    /// `staging` is the prefix for query output, when the service needs one.
    async fn create_table(&self, database: &str, ddl: &str, staging: Option<&str>) -> Result<()>;

    async fn drop_table(
        &self,
        database: &str,
        table: &str,
        kind: TableKind,
        staging: Option<&str>,
    ) -> Result<()>;

    async fn list_partitions(&self, database: &str, table: &str) -> Result<Vec<Partition>>;

    /// Register a partition; registering an existing partition is a no-op
    async fn add_partition(
        &self,
        database: &str,
        table: &str,
        values: &[String],
        location: Option<&str>,
    ) -> Result<()>;

    /// Register many partitions at once. Services with a bulk API override
    /// this; the default registers them one by one.
    async fn add_partitions(&self, database: &str, table: &str, partitions: &[Partition]) -> Result<()> {
        for partition in partitions {
            self.add_partition(database, table, &partition.values, partition.location.as_deref())
                .await
                .with_context(|| format!("partition ({})", partition.values.join(", ")))?;
        }
        Ok(())
    }

    /// Scan the table location and register partitions found there.
    /// Returns the number of partitions registered by the scan.
    async fn discover_partitions(&self, database: &str, table: &str) -> Result<usize>;
}

/// Lake Formation style permission service
#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn grant(
        &self,
        principal: &str,
        resource: &Resource,
        permissions: &[Permission],
        grantable: &[Permission],
    ) -> Result<MutationEffect>;

    async fn revoke(
        &self,
        principal: &str,
        resource: &Resource,
        permissions: &[Permission],
        grantable: &[Permission],
    ) -> Result<MutationEffect>;

    /// Every permission currently held, across all principals
    async fn list_grants(&self) -> Result<Vec<GrantRecord>>;
}

/// Blob storage holding table data under folder prefixes
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn folder_exists(&self, bucket_label: &str, prefix: &str) -> Result<bool>;

    async fn create_folder(&self, bucket_label: &str, prefix: &str) -> Result<()>;
}

/// Where raw DDL scripts are read from
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn fetch_script(&self, table: &TableDescriptor) -> Result<String>;
}

/// Turns a rendered DDL script into the desired table definition
pub trait DdlParser: Send + Sync {
    fn parse(&self, ddl: &str) -> Result<DesiredTable>;
}

/// Configuration for backend implementations
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Local emulator (no AWS required)
    Emulator {
        /// Optional file to persist state
        state_file: Option<String>,
        /// Directory holding DDL scripts
        scripts_dir: Option<String>,
    },
    /// Real AWS services
    Aws {
        /// AWS region
        region: Option<String>,
        /// AWS profile name
        profile: Option<String>,
        /// Custom endpoint (for testing)
        endpoint: Option<String>,
    },
}
