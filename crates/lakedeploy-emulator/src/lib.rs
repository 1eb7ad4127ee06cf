//! # lakedeploy emulator
//!
//! In-memory catalog, permission and folder services implementing the
//! `lakedeploy-core` collaborator traits. Useful for local dry runs and
//! for exercising the provisioning and permission pipelines in tests.
//! State can be persisted to a JSON file between runs.

use anyhow::{bail, Result};
use lakedeploy_core::types::{GrantRecord, Partition, TableSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use tracing::info;

pub mod catalog;
pub mod folders;
pub mod grants;
pub mod scripts;
pub mod storage;

pub use scripts::{DirectoryScripts, InMemoryScripts};
pub use storage::{FileStorage, StateExporter};

/// A table or view registered in the emulated catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedTable {
    pub snapshot: TableSnapshot,
    pub partitions: Vec<Partition>,
    /// Statement the table was created from
    pub ddl: String,
    /// Position in catalog creation order; a replaced view moves to the end
    #[serde(default)]
    pub created: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedDatabase {
    pub location: Option<String>,
    /// Lowercased table name -> table
    pub tables: BTreeMap<String, EmulatedTable>,
}

/// Complete state of the emulator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorState {
    /// Lowercased database name -> database
    pub databases: BTreeMap<String, EmulatedDatabase>,
    /// Bucket label -> folder prefixes
    pub folders: BTreeMap<String, BTreeSet<String>>,
    pub grants: Vec<GrantRecord>,
    /// Partition directories present in storage, keyed by table location.
    /// Partition discovery registers these.
    pub storage_partitions: BTreeMap<String, Vec<Partition>>,
    /// Last value handed out for `EmulatedTable::created`
    #[serde(default)]
    pub creation_counter: u64,
}

impl EmulatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, database: &str, table: &str) -> Option<&EmulatedTable> {
        self.databases
            .get(&database.to_lowercase())?
            .tables
            .get(&table.to_lowercase())
    }
}

/// Failures that can be injected into the emulator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fault {
    /// Every catalog call fails
    CatalogUnreachable,
    /// Describing this table fails although it exists
    GetTable(String),
    CreateTable(String),
    DropTable(String),
    AddPartition(String),
    /// `add_partition` reports success without registering anything
    SilentPartitionLoss(String),
    CreateFolder(String),
    /// Grants and revokes for this principal fail
    Grant(String),
}

/// Emulated Glue/Athena catalog, Lake Formation and S3 folders
pub struct EmulatorBackend {
    state: Mutex<EmulatorState>,
    faults: Mutex<BTreeSet<Fault>>,
    storage: Option<FileStorage>,
}

impl EmulatorBackend {
    /// Create an emulator, loading persisted state when `state_file` exists
    pub async fn new(state_file: Option<String>) -> Result<Self> {
        let storage = state_file.map(FileStorage::new);
        let state = match &storage {
            Some(storage) if storage.exists() => {
                let state = storage.load().await?;
                info!(path = %storage.path().display(), "loaded emulator state");
                state
            }
            _ => EmulatorState::new(),
        };

        Ok(Self {
            state: Mutex::new(state),
            faults: Mutex::new(BTreeSet::new()),
            storage,
        })
    }

    /// Emulator without persistence
    pub fn in_memory() -> Self {
        Self::with_state(EmulatorState::new())
    }

    pub fn with_state(state: EmulatorState) -> Self {
        Self {
            state: Mutex::new(state),
            faults: Mutex::new(BTreeSet::new()),
            storage: None,
        }
    }

    /// Copy of the current state
    pub async fn state(&self) -> EmulatorState {
        self.state.lock().await.clone()
    }

    pub async fn inject(&self, fault: Fault) {
        self.faults.lock().await.insert(fault);
    }

    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    /// Pretend partition directories exist under a table location
    pub async fn seed_storage_partitions(
        &self,
        location: &str,
        partitions: Vec<Partition>,
    ) -> Result<()> {
        self.mutate(|state| {
            state
                .storage_partitions
                .entry(location_key(location))
                .or_default()
                .extend(partitions);
            Ok(())
        })
        .await
    }

    /// Fail with `operation` when the fault (or an unreachable catalog, for
    /// catalog calls) is injected
    async fn check(&self, operation: &str, catalog_call: bool, fault: Option<Fault>) -> Result<()> {
        let faults = self.faults.lock().await;
        if catalog_call && faults.contains(&Fault::CatalogUnreachable) {
            bail!("{}: could not connect to the catalog endpoint", operation);
        }
        if let Some(fault) = fault {
            if faults.contains(&fault) {
                bail!("{}: injected failure", operation);
            }
        }
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(&EmulatorState) -> Result<T>) -> Result<T> {
        let state = self.state.lock().await;
        f(&state)
    }

    /// Apply a mutation and persist the result
    async fn mutate<T>(&self, f: impl FnOnce(&mut EmulatorState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let result = f(&mut state)?;
        if let Some(storage) = &self.storage {
            storage.save(&state).await?;
        }
        Ok(result)
    }
}

/// Storage locations compare without the trailing slash
pub(crate) fn location_key(location: &str) -> String {
    location.trim_end_matches('/').to_string()
}
