//! Emulated Glue catalog and Athena DDL execution

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use lakedeploy_core::backend::{CatalogService, DdlParser};
use lakedeploy_core::types::{Partition, TableKind, TableSnapshot};
use lakedeploy_parser::AthenaDdlParser;
use tracing::debug;

use crate::{location_key, EmulatedDatabase, EmulatedTable, EmulatorBackend, EmulatorState, Fault};

fn database_mut<'s>(state: &'s mut EmulatorState, database: &str) -> Result<&'s mut EmulatedDatabase> {
    state
        .databases
        .get_mut(&database.to_lowercase())
        .ok_or_else(|| anyhow!("EntityNotFoundException: database {} not found", database))
}

fn table_mut<'s>(
    state: &'s mut EmulatorState,
    database: &str,
    table: &str,
) -> Result<&'s mut EmulatedTable> {
    database_mut(state, database)?
        .tables
        .get_mut(&table.to_lowercase())
        .ok_or_else(|| anyhow!("EntityNotFoundException: table {}.{} not found", database, table))
}

#[async_trait]
impl CatalogService for EmulatorBackend {
    async fn database_exists(&self, name: &str) -> Result<bool> {
        self.check("GetDatabase", true, None).await?;
        self.read(|state| Ok(state.databases.contains_key(&name.to_lowercase())))
            .await
    }

    async fn create_database(&self, name: &str, location: Option<&str>) -> Result<()> {
        self.check("CREATE DATABASE", true, None).await?;
        self.mutate(|state| {
            state
                .databases
                .entry(name.to_lowercase())
                .or_insert_with(|| EmulatedDatabase {
                    location: location.map(str::to_string),
                    tables: Default::default(),
                });
            Ok(())
        })
        .await
    }

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool> {
        self.check("GetTable", true, None).await?;
        self.read(|state| Ok(state.table(database, table).is_some())).await
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableSnapshot>> {
        self.check("GetTable", true, Some(Fault::GetTable(table.to_lowercase())))
            .await?;
        self.read(|state| Ok(state.table(database, table).map(|t| t.snapshot.clone())))
            .await
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.check("GetTables", true, None).await?;
        self.read(|state| {
            let db = state
                .databases
                .get(&database.to_lowercase())
                .ok_or_else(|| anyhow!("EntityNotFoundException: database {} not found", database))?;
            Ok(db.tables.keys().cloned().collect())
        })
        .await
    }

    async fn create_table(&self, database: &str, ddl: &str, staging: Option<&str>) -> Result<()> {
        let desired = AthenaDdlParser
            .parse(ddl)
            .context("Athena rejected the statement")?;
        let target = desired.database.clone().unwrap_or_else(|| database.to_string());
        self.check(
            "CREATE TABLE",
            true,
            Some(Fault::CreateTable(desired.name.to_lowercase())),
        )
        .await?;
        debug!(database = %target, table = %desired.name, staging = ?staging, "executing DDL");

        self.mutate(|state| {
            let created = state.creation_counter + 1;
            let db = database_mut(state, &target)?;
            let key = desired.name.to_lowercase();
            match db.tables.get(&key) {
                Some(existing) if desired.kind == TableKind::External => {
                    bail!("AlreadyExistsException: {} {}.{} already exists", existing.snapshot.kind, target, key)
                }
                Some(existing) if existing.snapshot.kind != TableKind::View => {
                    bail!("{}.{} is not a view", target, key)
                }
                _ => {}
            }

            let snapshot = TableSnapshot {
                name: key.clone(),
                kind: desired.kind,
                columns: desired.columns,
                partition_keys: desired.partition_keys,
                location: desired.location,
                input_format: desired.stored_as,
            };
            db.tables.insert(
                key,
                EmulatedTable {
                    snapshot,
                    partitions: Vec::new(),
                    ddl: ddl.trim().to_string(),
                    created,
                },
            );
            state.creation_counter = created;
            Ok(())
        })
        .await
    }

    async fn drop_table(
        &self,
        database: &str,
        table: &str,
        kind: TableKind,
        _staging: Option<&str>,
    ) -> Result<()> {
        self.check("DROP TABLE", true, Some(Fault::DropTable(table.to_lowercase())))
            .await?;
        self.mutate(|state| {
            let db = database_mut(state, database)?;
            let key = table.to_lowercase();
            if let Some(existing) = db.tables.get(&key) {
                if existing.snapshot.kind != kind {
                    bail!(
                        "cannot drop {} {}.{}: it is a {}",
                        kind,
                        database,
                        table,
                        existing.snapshot.kind
                    );
                }
                db.tables.remove(&key);
            }
            Ok(())
        })
        .await
    }

    async fn list_partitions(&self, database: &str, table: &str) -> Result<Vec<Partition>> {
        self.check("GetPartitions", true, None).await?;
        self.read(|state| {
            state
                .table(database, table)
                .map(|t| t.partitions.clone())
                .ok_or_else(|| anyhow!("EntityNotFoundException: table {}.{} not found", database, table))
        })
        .await
    }

    async fn add_partition(
        &self,
        database: &str,
        table: &str,
        values: &[String],
        location: Option<&str>,
    ) -> Result<()> {
        let key = table.to_lowercase();
        self.check("ALTER TABLE ADD PARTITION", true, Some(Fault::AddPartition(key.clone())))
            .await?;
        let lossy = self
            .faults
            .lock()
            .await
            .contains(&Fault::SilentPartitionLoss(key));

        self.mutate(|state| {
            let target = table_mut(state, database, table)?;
            if values.len() != target.snapshot.partition_keys.len() {
                bail!(
                    "partition ({}) does not match the {} partition keys of {}.{}",
                    values.join(", "),
                    target.snapshot.partition_keys.len(),
                    database,
                    table
                );
            }
            if lossy || target.partitions.iter().any(|p| p.values == values) {
                return Ok(());
            }
            target
                .partitions
                .push(Partition::new(values.to_vec(), location.map(str::to_string)));
            Ok(())
        })
        .await
    }

    async fn discover_partitions(&self, database: &str, table: &str) -> Result<usize> {
        self.check("MSCK REPAIR TABLE", true, None).await?;
        self.mutate(|state| {
            let stored = {
                let existing = state
                    .table(database, table)
                    .ok_or_else(|| anyhow!("EntityNotFoundException: table {}.{} not found", database, table))?;
                let location = existing.snapshot.location.as_deref().map(location_key);
                let arity = existing.snapshot.partition_keys.len();
                location
                    .and_then(|l| state.storage_partitions.get(&l))
                    .map(|found| {
                        found
                            .iter()
                            .filter(|p| p.values.len() == arity)
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            };

            let target = table_mut(state, database, table)?;
            for partition in &stored {
                if !target.partitions.iter().any(|p| p.values == partition.values) {
                    target.partitions.push(partition.clone());
                }
            }
            Ok(stored.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &str = "CREATE EXTERNAL TABLE analytics.events (id bigint, kind string)
        PARTITIONED BY (dt string) STORED AS PARQUET LOCATION 's3://lake/events/'";

    async fn backend_with_events() -> EmulatorBackend {
        let backend = EmulatorBackend::in_memory();
        backend.create_database("analytics", None).await.unwrap();
        backend.create_table("analytics", EVENTS, None).await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_create_and_describe() {
        let backend = backend_with_events().await;
        let snapshot = backend.get_table("ANALYTICS", "Events").await.unwrap().unwrap();
        assert_eq!(snapshot.columns.len(), 2);
        assert_eq!(snapshot.partition_keys.len(), 1);
        assert_eq!(snapshot.input_format.as_deref(), Some("parquet"));

        let err = backend.create_table("analytics", EVENTS, None).await.unwrap_err();
        assert!(err.to_string().contains("AlreadyExists"));
    }

    #[tokio::test]
    async fn test_partition_registration_is_idempotent() {
        let backend = backend_with_events().await;
        let values = vec!["2024-01-01".to_string()];
        backend.add_partition("analytics", "events", &values, None).await.unwrap();
        backend.add_partition("analytics", "events", &values, None).await.unwrap();
        assert_eq!(backend.list_partitions("analytics", "events").await.unwrap().len(), 1);

        let wrong_arity = vec!["2024-01-01".to_string(), "us".to_string()];
        assert!(backend
            .add_partition("analytics", "events", &wrong_arity, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_bulk_partition_registration() {
        let backend = backend_with_events().await;
        let partitions = vec![
            Partition::new(vec!["2024-01-01".into()], Some("s3://lake/events/dt=2024-01-01".into())),
            Partition::new(vec!["2024-01-02".into()], None),
        ];
        backend.add_partitions("analytics", "events", &partitions).await.unwrap();
        backend.add_partitions("analytics", "events", &partitions).await.unwrap();
        assert_eq!(backend.list_partitions("analytics", "events").await.unwrap(), partitions);

        let err = backend
            .add_partitions("analytics", "events", &[Partition::new(vec!["a".into(), "b".into()], None)])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("partition (a, b)"));
    }

    #[tokio::test]
    async fn test_discovery_reads_storage_partitions() {
        let backend = backend_with_events().await;
        backend
            .seed_storage_partitions(
                "s3://lake/events",
                vec![
                    Partition::new(vec!["2024-01-01".into()], Some("s3://lake/events/dt=2024-01-01".into())),
                    Partition::new(vec!["2024-01-02".into()], Some("s3://lake/events/dt=2024-01-02".into())),
                ],
            )
            .await
            .unwrap();
        assert_eq!(backend.discover_partitions("analytics", "events").await.unwrap(), 2);
        assert_eq!(backend.list_partitions("analytics", "events").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_checks_kind() {
        let backend = backend_with_events().await;
        assert!(backend
            .drop_table("analytics", "events", TableKind::View, None)
            .await
            .is_err());
        backend
            .drop_table("analytics", "events", TableKind::External, None)
            .await
            .unwrap();
        assert!(!backend.table_exists("analytics", "events").await.unwrap());
        // Dropping an absent table is a no-op
        backend
            .drop_table("analytics", "events", TableKind::External, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_views_are_replaced() {
        let backend = backend_with_events().await;
        let view = "CREATE OR REPLACE VIEW analytics.daily AS SELECT dt, count(*) AS n FROM analytics.events GROUP BY dt";
        backend.create_table("analytics", view, None).await.unwrap();
        backend.create_table("analytics", view, None).await.unwrap();
        let snapshot = backend.get_table("analytics", "daily").await.unwrap().unwrap();
        assert_eq!(snapshot.kind, TableKind::View);
    }
}
