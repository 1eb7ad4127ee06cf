//! Core data types for catalog provisioning and Lake Formation grants

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A column as declared in DDL or reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    /// Column name lowercased with identifier quoting removed
    pub fn normalized_name(&self) -> String {
        self.name.trim().trim_matches('`').to_lowercase()
    }

    /// Type lowercased with whitespace and quoting removed, so that
    /// `DECIMAL(10, 2)` and `decimal(10,2)` compare equal
    pub fn normalized_type(&self) -> String {
        self.data_type
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '`')
            .flat_map(char::to_lowercase)
            .collect()
    }

    /// True when both columns agree on normalized name and type
    pub fn same_as(&self, other: &Column) -> bool {
        self.normalized_name() == other.normalized_name()
            && self.normalized_type() == other.normalized_type()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)
    }
}

/// Kind of catalog object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// External table backed by S3 data
    External,
    /// Virtual view defined by a query
    View,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::External => write!(f, "table"),
            TableKind::View => write!(f, "view"),
        }
    }
}

/// Desired table definition derived from a rendered DDL script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredTable {
    /// Database qualifier used in the DDL, if any
    pub database: Option<String>,
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<Column>,
    pub partition_keys: Vec<Column>,
    pub location: Option<String>,
    /// File format from `STORED AS` (or the input format class)
    pub stored_as: Option<String>,
}

impl DesiredTable {
    pub fn is_partitioned(&self) -> bool {
        !self.partition_keys.is_empty()
    }
}

/// Table metadata as currently observed in the catalog.
///
/// Snapshots are produced fresh on every run and never cached, since the
/// catalog may be changed by other actors between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<Column>,
    pub partition_keys: Vec<Column>,
    pub location: Option<String>,
    pub input_format: Option<String>,
}

impl TableSnapshot {
    pub fn is_partitioned(&self) -> bool {
        !self.partition_keys.is_empty()
    }
}

/// A single partition of a partitioned table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Partition values, in partition-key order
    pub values: Vec<String>,
    pub location: Option<String>,
}

impl Partition {
    pub fn new(values: Vec<String>, location: Option<String>) -> Self {
        Self { values, location }
    }
}

/// Lake Formation permissions that can appear in a permission config
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    All,
    Select,
    Insert,
    Delete,
    Describe,
    Alter,
    Drop,
    CreateTable,
    DataLocationAccess,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::All => "ALL",
            Permission::Select => "SELECT",
            Permission::Insert => "INSERT",
            Permission::Delete => "DELETE",
            Permission::Describe => "DESCRIBE",
            Permission::Alter => "ALTER",
            Permission::Drop => "DROP",
            Permission::CreateTable => "CREATE_TABLE",
            Permission::DataLocationAccess => "DATA_LOCATION_ACCESS",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource a grant operation applies to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    /// Entire database
    Database { name: String },
    /// Whole table, all columns
    Table { database: String, table: String },
    /// Column wildcard on a table with some columns excluded
    TableColumns {
        database: String,
        table: String,
        excluded_columns: Vec<String>,
    },
    /// Registered S3 data location
    DataLocation { arn: String },
}

impl Resource {
    /// Table name the resource refers to, if it is table scoped
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Resource::Table { table, .. } | Resource::TableColumns { table, .. } => Some(table),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Database { name } => write!(f, "DATABASE {}", name),
            Resource::Table { database, table } => write!(f, "{}.{}", database, table),
            Resource::TableColumns {
                database,
                table,
                excluded_columns,
            } => write!(
                f,
                "{}.{}(* EXCLUDING {})",
                database,
                table,
                excluded_columns.join(", ")
            ),
            Resource::DataLocation { arn } => write!(f, "LOCATION '{}'", arn),
        }
    }
}

/// Whether a resolution pass grants or revokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Grant,
    Revoke,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Grant => write!(f, "grant"),
            Direction::Revoke => write!(f, "revoke"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grant" => Ok(Direction::Grant),
            "revoke" => Ok(Direction::Revoke),
            other => Err(format!("invalid mode '{}', expected grant or revoke", other)),
        }
    }
}

/// A fully resolved grant or revoke, the unit of work sent to the
/// permission service. Applying it twice must leave the same state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GrantOperation {
    /// Principal ARN
    pub principal: String,
    pub resource: Resource,
    pub permissions: BTreeSet<Permission>,
    pub grantable_permissions: BTreeSet<Permission>,
    pub direction: Direction,
}

impl fmt::Display for GrantOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            Direction::Grant => "GRANT",
            Direction::Revoke => "REVOKE",
        };
        let preposition = match self.direction {
            Direction::Grant => "TO",
            Direction::Revoke => "FROM",
        };
        let permissions = self
            .permissions
            .iter()
            .map(Permission::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{} {} ON {} {} {}",
            verb, permissions, self.resource, preposition, self.principal
        )?;
        if !self.grantable_permissions.is_empty() {
            let grantable = self
                .grantable_permissions
                .iter()
                .map(Permission::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " (GRANT OPTION: {})", grantable)?;
        }
        Ok(())
    }
}

/// A permission currently held by a principal, as listed by the permission service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub principal: String,
    pub resource: Resource,
    pub permissions: BTreeSet<Permission>,
    pub grantable_permissions: BTreeSet<Permission>,
}

/// Observable effect of an idempotent mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationEffect {
    /// State changed
    Applied,
    /// State already matched the request
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_normalization() {
        let ddl = Column::new("`Order_ID`", "DECIMAL(10, 2)");
        let catalog = Column::new("order_id", "decimal(10,2)");
        assert!(ddl.same_as(&catalog));

        let other = Column::new("order_id", "decimal(12,2)");
        assert!(!ddl.same_as(&other));
    }

    #[test]
    fn test_nested_type_normalization() {
        let ddl = Column::new("items", "ARRAY<STRUCT<sku: STRING, qty: INT>>");
        let catalog = Column::new("items", "array<struct<sku:string,qty:int>>");
        assert!(ddl.same_as(&catalog));
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("GRANT".parse::<Direction>().unwrap(), Direction::Grant);
        assert_eq!("revoke".parse::<Direction>().unwrap(), Direction::Revoke);
        assert!("delete".parse::<Direction>().is_err());
    }

    #[test]
    fn test_permission_serde_names() {
        let parsed: Vec<Permission> =
            serde_json::from_str(r#"["SELECT", "CREATE_TABLE", "DATA_LOCATION_ACCESS"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                Permission::Select,
                Permission::CreateTable,
                Permission::DataLocationAccess
            ]
        );
        assert!(serde_json::from_str::<Permission>(r#""SUPERUSER""#).is_err());
    }

    #[test]
    fn test_operation_display() {
        let op = GrantOperation {
            principal: "arn:aws:iam::123456789012:role/analyst".to_string(),
            resource: Resource::TableColumns {
                database: "sales".to_string(),
                table: "orders".to_string(),
                excluded_columns: vec!["ssn".to_string()],
            },
            permissions: [Permission::Select].into_iter().collect(),
            grantable_permissions: BTreeSet::new(),
            direction: Direction::Grant,
        };
        assert_eq!(
            op.to_string(),
            "GRANT SELECT ON sales.orders(* EXCLUDING ssn) TO arn:aws:iam::123456789012:role/analyst"
        );
    }
}
