//! Persistent storage and export for emulator state

use crate::{EmulatedTable, EmulatorState};
use anyhow::{Context, Result};
use lakedeploy_core::types::{GrantOperation, Direction, TableKind};
use std::path::{Path, PathBuf};

/// JSON file holding emulator state between runs
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load state, or an empty state when the file does not exist yet
    pub async fn load(&self) -> Result<EmulatorState> {
        if !self.exists() {
            return Ok(EmulatorState::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read emulator state {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("emulator state {} is corrupt", self.path.display()))
    }

    pub async fn save(&self, state: &EmulatorState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("failed to write emulator state {}", self.path.display()))
    }
}

/// Export state to different formats
pub struct StateExporter;

impl StateExporter {
    /// Statements recreating the catalog and grants. Tables come before
    /// views, each in the order they were last created, so a view follows
    /// the tables and views it selects from.
    pub fn to_ddl(state: &EmulatorState) -> String {
        let mut sql = String::new();
        sql.push_str("-- lakedeploy emulator state export\n\n");

        for (name, database) in &state.databases {
            match &database.location {
                Some(location) => sql.push_str(&format!(
                    "CREATE DATABASE IF NOT EXISTS {} LOCATION '{}';\n",
                    name, location
                )),
                None => sql.push_str(&format!("CREATE DATABASE IF NOT EXISTS {};\n", name)),
            }

            let mut ordered: Vec<(&String, &EmulatedTable)> = database.tables.iter().collect();
            ordered.sort_by_key(|(_, table)| (table.snapshot.kind == TableKind::View, table.created));
            for (table_name, table) in ordered {
                sql.push_str(table.ddl.trim_end_matches(';'));
                sql.push_str(";\n");
                if table.snapshot.kind == TableKind::External {
                    for partition in &table.partitions {
                        let spec = table
                            .snapshot
                            .partition_keys
                            .iter()
                            .zip(&partition.values)
                            .map(|(key, value)| format!("{} = '{}'", key.name, value))
                            .collect::<Vec<_>>()
                            .join(", ");
                        sql.push_str(&format!(
                            "ALTER TABLE {}.{} ADD IF NOT EXISTS PARTITION ({});\n",
                            name, table_name, spec
                        ));
                    }
                }
            }
            sql.push('\n');
        }

        for record in &state.grants {
            let operation = GrantOperation {
                principal: record.principal.clone(),
                resource: record.resource.clone(),
                permissions: record.permissions.clone(),
                grantable_permissions: record.grantable_permissions.clone(),
                direction: Direction::Grant,
            };
            sql.push_str(&format!("-- {};\n", operation));
        }

        sql
    }

    /// Human-readable summary
    pub fn to_summary(state: &EmulatorState) -> String {
        let tables: usize = state.databases.values().map(|db| db.tables.len()).sum();
        let partitions: usize = state
            .databases
            .values()
            .flat_map(|db| db.tables.values())
            .map(|t| t.partitions.len())
            .sum();
        let folders: usize = state.folders.values().map(|f| f.len()).sum();

        let mut summary = String::new();
        summary.push_str("🦀 lakedeploy emulator state\n");
        summary.push_str("============================\n\n");
        summary.push_str("📊 Statistics:\n");
        summary.push_str(&format!("- Databases: {}\n", state.databases.len()));
        summary.push_str(&format!("- Tables and views: {}\n", tables));
        summary.push_str(&format!("- Partitions: {}\n", partitions));
        summary.push_str(&format!("- Folders: {}\n", folders));
        summary.push_str(&format!("- Grants: {}\n\n", state.grants.len()));

        for (name, database) in &state.databases {
            summary.push_str(&format!("🗄️ {}\n", name));
            for (table_name, table) in &database.tables {
                match table.snapshot.kind {
                    TableKind::View => summary.push_str(&format!("  • {} (view)\n", table_name)),
                    TableKind::External => summary.push_str(&format!(
                        "  • {} ({} columns, {} partitions)\n",
                        table_name,
                        table.snapshot.columns.len(),
                        table.partitions.len()
                    )),
                }
            }
        }

        if !state.grants.is_empty() {
            summary.push_str("\n🔐 Grants:\n");
            for (i, record) in state.grants.iter().enumerate() {
                let permissions = record
                    .permissions
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                summary.push_str(&format!(
                    "{}. {} → {} → {}\n",
                    i + 1,
                    record.principal,
                    permissions,
                    record.resource
                ));
            }
        }

        summary
    }
}
