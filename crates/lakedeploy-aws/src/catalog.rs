//! Glue catalog reads and Athena DDL execution

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_glue::types::{Column as GlueColumn, PartitionInput, StorageDescriptor, Table};
use lakedeploy_core::backend::CatalogService;
use lakedeploy_core::types::{Column, Partition, TableKind, TableSnapshot};
use tracing::{debug, info};

use crate::AwsBackend;

const VIRTUAL_VIEW: &str = "VIRTUAL_VIEW";
/// BatchCreatePartition accepts at most 100 partitions per call
const PARTITION_BATCH: usize = 100;
const ALREADY_EXISTS: &str = "AlreadyExistsException";

fn convert_columns(columns: &[GlueColumn]) -> Vec<Column> {
    columns
        .iter()
        .map(|c| Column::new(c.name(), c.r#type().unwrap_or_default()))
        .collect()
}

fn convert_table(table: &Table) -> TableSnapshot {
    let storage = table.storage_descriptor();
    let kind = if table.table_type() == Some(VIRTUAL_VIEW) {
        TableKind::View
    } else {
        TableKind::External
    };
    TableSnapshot {
        name: table.name().to_string(),
        kind,
        columns: storage.map(|s| convert_columns(s.columns())).unwrap_or_default(),
        partition_keys: convert_columns(table.partition_keys()),
        location: storage.and_then(|s| s.location()).map(str::to_string),
        input_format: storage.and_then(|s| s.input_format()).map(str::to_string),
    }
}

/// Hive string literal; DDL does not accept the doubled-quote form
fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Hive-style partition directory under the table location
fn partition_location(table_location: &str, keys: &[GlueColumn], values: &[String]) -> String {
    let mut location = table_location.trim_end_matches('/').to_string();
    for (key, value) in keys.iter().zip(values) {
        location.push_str(&format!("/{}={}", key.name(), value));
    }
    location
}

fn partition_input(table: &Table, partition: &Partition) -> PartitionInput {
    let mut storage = table
        .storage_descriptor()
        .cloned()
        .unwrap_or_else(|| StorageDescriptor::builder().build());
    let location = match &partition.location {
        Some(location) => location.clone(),
        None => partition_location(
            storage.location().unwrap_or_default(),
            table.partition_keys(),
            &partition.values,
        ),
    };
    storage.location = Some(location);
    PartitionInput::builder()
        .set_values(Some(partition.values.clone()))
        .storage_descriptor(storage)
        .build()
}

impl AwsBackend {
    /// Raw Glue table, `None` when it does not exist
    async fn glue_table(&self, database: &str, table: &str) -> Result<Option<Table>> {
        match self
            .glue
            .get_table()
            .database_name(database)
            .name(table)
            .send()
            .await
        {
            Ok(output) => Ok(output.table().cloned()),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_entity_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("GetTable {}.{}", database, table)),
        }
    }
}

#[async_trait]
impl CatalogService for AwsBackend {
    async fn database_exists(&self, name: &str) -> Result<bool> {
        match self.glue.get_database().name(name).send().await {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_entity_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(err).with_context(|| format!("GetDatabase {}", name)),
        }
    }

    async fn create_database(&self, name: &str, location: Option<&str>) -> Result<()> {
        let sql = match location {
            Some(location) => format!(
                "CREATE DATABASE IF NOT EXISTS {} LOCATION {}",
                name,
                quote_value(location)
            ),
            None => format!("CREATE DATABASE IF NOT EXISTS {}", name),
        };
        self.run_query(&sql, None, None).await
    }

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool> {
        Ok(self.get_table(database, table).await?.is_some())
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableSnapshot>> {
        Ok(self.glue_table(database, table).await?.as_ref().map(convert_table))
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .glue
                .get_tables()
                .database_name(database)
                .set_next_token(token.take())
                .send()
                .await
                .with_context(|| format!("GetTables {}", database))?;
            names.extend(page.table_list().iter().map(|t| t.name().to_string()));
            match page.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(names)
    }

    async fn create_table(&self, database: &str, ddl: &str, staging: Option<&str>) -> Result<()> {
        self.run_query(ddl, Some(database), staging).await
    }

    async fn drop_table(
        &self,
        database: &str,
        table: &str,
        kind: TableKind,
        staging: Option<&str>,
    ) -> Result<()> {
        let sql = match kind {
            TableKind::View => format!("DROP VIEW IF EXISTS {}.{}", database, table),
            TableKind::External => format!("DROP TABLE IF EXISTS {}.{}", database, table),
        };
        self.run_query(&sql, Some(database), staging).await
    }

    async fn list_partitions(&self, database: &str, table: &str) -> Result<Vec<Partition>> {
        let mut partitions = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .glue
                .get_partitions()
                .database_name(database)
                .table_name(table)
                .set_next_token(token.take())
                .send()
                .await
                .with_context(|| format!("GetPartitions {}.{}", database, table))?;
            partitions.extend(page.partitions().iter().map(|p| {
                Partition::new(
                    p.values().to_vec(),
                    p.storage_descriptor()
                        .and_then(|s| s.location())
                        .map(str::to_string),
                )
            }));
            match page.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(partitions)
    }

    async fn add_partition(
        &self,
        database: &str,
        table: &str,
        values: &[String],
        location: Option<&str>,
    ) -> Result<()> {
        let snapshot = self
            .get_table(database, table)
            .await?
            .with_context(|| format!("table {}.{} not found", database, table))?;
        if snapshot.partition_keys.len() != values.len() {
            anyhow::bail!(
                "partition ({}) does not match the {} partition keys of {}.{}",
                values.join(", "),
                snapshot.partition_keys.len(),
                database,
                table
            );
        }

        let spec = snapshot
            .partition_keys
            .iter()
            .zip(values)
            .map(|(key, value)| format!("{} = {}", key.name, quote_value(value)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "ALTER TABLE {}.{} ADD IF NOT EXISTS PARTITION ({})",
            database, table, spec
        );
        if let Some(location) = location {
            sql.push_str(&format!(" LOCATION {}", quote_value(location)));
        }
        self.run_query(&sql, Some(database), None).await
    }

    async fn add_partitions(&self, database: &str, table: &str, partitions: &[Partition]) -> Result<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        let glue_table = self
            .glue_table(database, table)
            .await?
            .with_context(|| format!("table {}.{} not found", database, table))?;
        let expected = glue_table.partition_keys().len();
        if let Some(bad) = partitions.iter().find(|p| p.values.len() != expected) {
            anyhow::bail!(
                "partition ({}) does not match the {} partition keys of {}.{}",
                bad.values.join(", "),
                expected,
                database,
                table
            );
        }

        for chunk in partitions.chunks(PARTITION_BATCH) {
            let inputs = chunk.iter().map(|p| partition_input(&glue_table, p)).collect();
            let output = self
                .glue
                .batch_create_partition()
                .database_name(database)
                .table_name(table)
                .set_partition_input_list(Some(inputs))
                .send()
                .await
                .with_context(|| format!("BatchCreatePartition {}.{}", database, table))?;

            // Re-registering an existing partition is not an error
            let failures: Vec<String> = output
                .errors()
                .iter()
                .filter(|e| {
                    e.error_detail().and_then(|d| d.error_code()) != Some(ALREADY_EXISTS)
                })
                .map(|e| {
                    format!(
                        "({}): {}",
                        e.partition_values().join(", "),
                        e.error_detail()
                            .and_then(|d| d.error_message())
                            .unwrap_or("unknown error")
                    )
                })
                .collect();
            if !failures.is_empty() {
                anyhow::bail!(
                    "{} of {} partitions rejected for {}.{}: {}",
                    failures.len(),
                    chunk.len(),
                    database,
                    table,
                    failures.join("; ")
                );
            }
            debug!(database, table, partitions = chunk.len(), "registered partition batch");
        }
        Ok(())
    }

    async fn discover_partitions(&self, database: &str, table: &str) -> Result<usize> {
        self.run_query(&format!("MSCK REPAIR TABLE {}.{}", database, table), Some(database), None)
            .await?;
        let found = self.list_partitions(database, table).await?.len();
        info!(database, table, partitions = found, "partition repair complete");
        Ok(found)
    }
}
