//! Drift detection between a desired table definition and the catalog

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Column, DesiredTable, TableKind, TableSnapshot};

/// What to do with a table on this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileDecision {
    /// Table is absent from the catalog
    Create,
    /// Catalog already matches the DDL
    Skip,
    /// Drop and recreate from the DDL, reloading partitions
    Recreate,
}

/// First difference found between desired and observed schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    KindChanged {
        desired: TableKind,
        observed: TableKind,
    },
    /// Views are replaced on every run
    ViewRefresh,
    ColumnCount {
        desired: usize,
        observed: usize,
    },
    Column {
        position: usize,
        desired: Column,
        observed: Column,
    },
    PartitionKeys {
        desired: Vec<Column>,
        observed: Vec<Column>,
    },
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::KindChanged { desired, observed } => {
                write!(f, "catalog has a {} but DDL defines a {}", observed, desired)
            }
            Drift::ViewRefresh => write!(f, "views are refreshed on every run"),
            Drift::ColumnCount { desired, observed } => write!(
                f,
                "DDL declares {} columns, catalog has {}",
                desired, observed
            ),
            Drift::Column {
                position,
                desired,
                observed,
            } => write!(
                f,
                "column {} differs: DDL '{}', catalog '{}'",
                position + 1,
                desired,
                observed
            ),
            Drift::PartitionKeys { desired, observed } => write!(
                f,
                "partition keys differ: DDL [{}], catalog [{}]",
                join_columns(desired),
                join_columns(observed)
            ),
        }
    }
}

fn join_columns(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn same_columns(desired: &[Column], observed: &[Column]) -> bool {
    desired.len() == observed.len() && desired.iter().zip(observed).all(|(d, o)| d.same_as(o))
}

/// First detected drift, or `None` when the catalog matches the DDL.
///
/// Columns are compared in order on normalized name and type, then the
/// partition-key sequence.
pub fn detect_drift(desired: &DesiredTable, observed: &TableSnapshot) -> Option<Drift> {
    if desired.kind != observed.kind {
        return Some(Drift::KindChanged {
            desired: desired.kind,
            observed: observed.kind,
        });
    }
    if desired.kind == TableKind::View {
        return Some(Drift::ViewRefresh);
    }

    if desired.columns.len() != observed.columns.len() {
        return Some(Drift::ColumnCount {
            desired: desired.columns.len(),
            observed: observed.columns.len(),
        });
    }
    if let Some((position, (d, o))) = desired
        .columns
        .iter()
        .zip(&observed.columns)
        .enumerate()
        .find(|(_, (d, o))| !d.same_as(o))
    {
        return Some(Drift::Column {
            position,
            desired: d.clone(),
            observed: o.clone(),
        });
    }

    if !same_columns(&desired.partition_keys, &observed.partition_keys) {
        return Some(Drift::PartitionKeys {
            desired: desired.partition_keys.clone(),
            observed: observed.partition_keys.clone(),
        });
    }

    None
}

/// Decide whether to create, skip or recreate a table.
///
/// Identical column and partition-key sequences yield `Skip`, except for an
/// existing view: views always yield `Recreate` and are refreshed with
/// `CREATE OR REPLACE VIEW`, whatever their columns.
///
/// Pure: the caller performs the resulting catalog mutations.
pub fn reconcile(desired: &DesiredTable, observed: Option<&TableSnapshot>) -> ReconcileDecision {
    match observed {
        None => ReconcileDecision::Create,
        Some(observed) => match detect_drift(desired, observed) {
            Some(_) => ReconcileDecision::Recreate,
            None => ReconcileDecision::Skip,
        },
    }
}

/// True when the DDL location differs from the catalog location.
/// Reported as a warning only; it does not trigger a recreate.
pub fn location_differs(desired: &DesiredTable, observed: &TableSnapshot) -> bool {
    match (&desired.location, &observed.location) {
        (Some(d), Some(o)) => {
            d.trim_end_matches('/').to_lowercase() != o.trim_end_matches('/').to_lowercase()
        }
        _ => false,
    }
}

/// True when partitions captured under the observed keys can be re-added
/// to a table created from the desired definition
pub fn partition_keys_compatible(desired: &DesiredTable, observed: &TableSnapshot) -> bool {
    desired.partition_keys.len() == observed.partition_keys.len()
        && desired
            .partition_keys
            .iter()
            .zip(&observed.partition_keys)
            .all(|(d, o)| d.normalized_name() == o.normalized_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(columns: &[(&str, &str)], partition_keys: &[(&str, &str)]) -> DesiredTable {
        DesiredTable {
            database: Some("sales".to_string()),
            name: "orders".to_string(),
            kind: TableKind::External,
            columns: columns.iter().map(|(n, t)| Column::new(*n, *t)).collect(),
            partition_keys: partition_keys.iter().map(|(n, t)| Column::new(*n, *t)).collect(),
            location: Some("s3://bucket/orders".to_string()),
            stored_as: Some("parquet".to_string()),
        }
    }

    fn observed_from(desired: &DesiredTable) -> TableSnapshot {
        TableSnapshot {
            name: desired.name.clone(),
            kind: desired.kind,
            columns: desired.columns.clone(),
            partition_keys: desired.partition_keys.clone(),
            location: desired.location.clone(),
            input_format: None,
        }
    }

    const COLUMNS: &[(&str, &str)] = &[("id", "bigint"), ("amount", "decimal(10,2)"), ("note", "string")];
    const KEYS: &[(&str, &str)] = &[("dt", "string")];

    #[test]
    fn test_absent_table_is_created() {
        assert_eq!(reconcile(&desired(COLUMNS, KEYS), None), ReconcileDecision::Create);
        assert_eq!(reconcile(&desired(&[], &[]), None), ReconcileDecision::Create);
    }

    #[test]
    fn test_identical_schema_is_skipped() {
        let unpartitioned: &[(&str, &str)] = &[];
        for keys in [KEYS, unpartitioned] {
            let d = desired(COLUMNS, keys);
            let o = observed_from(&d);
            assert_eq!(reconcile(&d, Some(&o)), ReconcileDecision::Skip);
        }
    }

    #[test]
    fn test_case_and_spacing_do_not_count_as_drift() {
        let d = desired(&[("ID", "BIGINT"), ("Amount", "DECIMAL(10, 2)"), ("note", "STRING")], KEYS);
        let o = observed_from(&desired(COLUMNS, KEYS));
        assert_eq!(reconcile(&d, Some(&o)), ReconcileDecision::Skip);
    }

    #[test]
    fn test_any_type_change_recreates() {
        for position in 0..COLUMNS.len() {
            let mut columns = COLUMNS.to_vec();
            columns[position].1 = "varchar(64)";
            let d = desired(&columns, KEYS);
            let o = observed_from(&desired(COLUMNS, KEYS));
            assert_eq!(reconcile(&d, Some(&o)), ReconcileDecision::Recreate);
            assert!(matches!(
                detect_drift(&d, &o),
                Some(Drift::Column { position: p, .. }) if p == position
            ));
        }
    }

    #[test]
    fn test_added_column_recreates() {
        let mut columns = COLUMNS.to_vec();
        columns.push(("region", "string"));
        let d = desired(&columns, KEYS);
        let o = observed_from(&desired(COLUMNS, KEYS));
        assert_eq!(
            detect_drift(&d, &o),
            Some(Drift::ColumnCount { desired: 4, observed: 3 })
        );
        assert_eq!(reconcile(&d, Some(&o)), ReconcileDecision::Recreate);
    }

    #[test]
    fn test_column_order_matters() {
        let d = desired(&[("amount", "decimal(10,2)"), ("id", "bigint"), ("note", "string")], KEYS);
        let o = observed_from(&desired(COLUMNS, KEYS));
        assert_eq!(reconcile(&d, Some(&o)), ReconcileDecision::Recreate);
    }

    #[test]
    fn test_partition_key_change_recreates() {
        let d = desired(COLUMNS, &[("dt", "string"), ("region", "string")]);
        let o = observed_from(&desired(COLUMNS, KEYS));
        assert!(matches!(detect_drift(&d, &o), Some(Drift::PartitionKeys { .. })));
        assert!(!partition_keys_compatible(&d, &o));

        let retyped = desired(COLUMNS, &[("dt", "date")]);
        assert_eq!(reconcile(&retyped, Some(&o)), ReconcileDecision::Recreate);
        assert!(partition_keys_compatible(&retyped, &o));
    }

    #[test]
    fn test_views_always_refresh() {
        let mut d = desired(&[], &[]);
        d.kind = TableKind::View;
        let o = observed_from(&d);
        assert_eq!(detect_drift(&d, &o), Some(Drift::ViewRefresh));
        assert_eq!(reconcile(&d, Some(&o)), ReconcileDecision::Recreate);
    }

    #[test]
    fn test_location_change_is_not_drift() {
        let d = desired(COLUMNS, KEYS);
        let mut o = observed_from(&d);
        o.location = Some("s3://other-bucket/orders/".to_string());
        assert!(location_differs(&d, &o));
        assert_eq!(reconcile(&d, Some(&o)), ReconcileDecision::Skip);
    }
}
