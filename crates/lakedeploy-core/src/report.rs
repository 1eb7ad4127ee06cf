//! Provisioning and grant execution reports

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::GrantOperation;

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of an idempotent create-if-absent step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnsureOutcome {
    Existing,
    Created,
    /// Not attempted because an earlier stage failed
    Skipped { reason: String },
    Failed { reason: String },
}

impl EnsureOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, EnsureOutcome::Failed { .. } | EnsureOutcome::Skipped { .. })
    }
}

impl fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsureOutcome::Existing => write!(f, "existing"),
            EnsureOutcome::Created => write!(f, "created"),
            EnsureOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            EnsureOutcome::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderReport {
    pub label: String,
    pub folder: String,
    #[serde(flatten)]
    pub outcome: EnsureOutcome,
}

/// Outcome of provisioning one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Created {
        /// Partitions registered by discovery after creation
        partitions: usize,
    },
    Recreated {
        partitions_before: usize,
        partitions_after: usize,
    },
    Unchanged,
    Failed { reason: String },
}

impl TableOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TableOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TableOutcome::Created { .. } => "created",
            TableOutcome::Recreated { .. } => "recreated",
            TableOutcome::Unchanged => "unchanged",
            TableOutcome::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for TableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableOutcome::Created { partitions } if *partitions > 0 => {
                write!(f, "created ({} partitions discovered)", partitions)
            }
            TableOutcome::Recreated {
                partitions_before,
                partitions_after,
            } if *partitions_before > 0 || *partitions_after > 0 => write!(
                f,
                "recreated (partitions {} -> {})",
                partitions_before, partitions_after
            ),
            TableOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    #[serde(flatten)]
    pub outcome: TableOutcome,
}

/// One entry per folder and per table, plus the database step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    pub database: String,
    pub database_outcome: EnsureOutcome,
    pub folders: Vec<FolderReport>,
    pub tables: Vec<TableReport>,
}

impl ProvisioningReport {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            database_outcome: EnsureOutcome::Skipped {
                reason: "not attempted".to_string(),
            },
            folders: Vec::new(),
            tables: Vec::new(),
        }
    }

    pub fn status(&self) -> RunStatus {
        let failed = self.database_outcome.is_failed()
            || self.folders.iter().any(|f| f.outcome.is_failed())
            || self.tables.iter().any(|t| t.outcome.is_failed());
        if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableOutcome> {
        self.tables
            .iter()
            .find(|t| t.table.eq_ignore_ascii_case(name))
            .map(|t| &t.outcome)
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.outcome.is_failed())
            .map(|t| t.table.as_str())
            .collect()
    }
}

impl fmt::Display for ProvisioningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database {}: {}", self.database, self.database_outcome)?;
        for folder in &self.folders {
            writeln!(f, "  folder {}/{}: {}", folder.label, folder.folder, folder.outcome)?;
        }
        for table in &self.tables {
            writeln!(f, "  table {}: {}", table.table, table.outcome)?;
        }
        write!(f, "Status: {}", self.status())
    }
}

/// Outcome of applying one grant operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    Applied,
    /// Already granted (or already absent, for revokes)
    Unchanged,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    pub operation: GrantOperation,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub operations: Vec<OperationReport>,
}

impl ExecutionReport {
    pub fn status(&self) -> RunStatus {
        if self
            .operations
            .iter()
            .any(|op| matches!(op.outcome, OperationOutcome::Failed { .. }))
        {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Operations to retry
    pub fn failed_operations(&self) -> Vec<GrantOperation> {
        self.operations
            .iter()
            .filter(|op| matches!(op.outcome, OperationOutcome::Failed { .. }))
            .map(|op| op.operation.clone())
            .collect()
    }

    pub fn count(&self, outcome: fn(&OperationOutcome) -> bool) -> usize {
        self.operations.iter().filter(|op| outcome(&op.outcome)).count()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.operations {
            match &entry.outcome {
                OperationOutcome::Applied => writeln!(f, "  applied   {}", entry.operation)?,
                OperationOutcome::Unchanged => writeln!(f, "  unchanged {}", entry.operation)?,
                OperationOutcome::Failed { reason } => {
                    writeln!(f, "  FAILED    {}: {}", entry.operation, reason)?
                }
            }
        }
        write!(
            f,
            "Status: {} ({} applied, {} unchanged, {} failed)",
            self.status(),
            self.count(|o| matches!(o, OperationOutcome::Applied)),
            self.count(|o| matches!(o, OperationOutcome::Unchanged)),
            self.count(|o| matches!(o, OperationOutcome::Failed { .. })),
        )
    }
}
