//! Typed application-resource and permission configuration documents

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::context::{RunContext, OUTPUT_BUCKET_LABEL};
use crate::error::{Error, Result};
use crate::types::Permission;

/// Database identity shared by both documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    pub name: String,
    /// Append `_<environment>` to the database name
    #[serde(default)]
    pub include_env_suffix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DatabaseLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseLocation {
    pub s3_label: String,
    pub s3_path: String,
}

impl DatabaseSpec {
    pub fn resolved_name(&self, ctx: &RunContext) -> String {
        if self.include_env_suffix {
            format!("{}_{}", self.name, ctx.environment)
        } else {
            self.name.clone()
        }
    }

    /// `s3://<bucket><s3_path>/` when a location is configured
    pub fn resolved_location(&self, ctx: &RunContext) -> Option<String> {
        self.location.as_ref().map(|location| {
            format!(
                "s3://{}{}/",
                ctx.bucket_name(&location.s3_label),
                location.s3_path.trim_end_matches('/')
            )
        })
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_identifier(&self.name) {
            return Err(Error::configuration(format!(
                "invalid database name '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// One table or view to provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDescriptor {
    pub table_name: String,
    /// DDL script file name
    pub script_name: String,
    /// Folder holding the DDL script
    pub sql_folder: String,
    /// Bucket label of the table data
    pub label: String,
    /// Prefix under the bucket, starting with `/`
    pub location_dir: String,
    /// Staging prefix for query output
    pub temp_folder: String,
    #[serde(default)]
    pub partitioned: bool,
}

impl TableDescriptor {
    /// Storage location of the table data
    pub fn location(&self, ctx: &RunContext) -> String {
        format!(
            "s3://{}{}/{}",
            ctx.bucket_name(&self.label),
            self.location_dir.trim_end_matches('/'),
            self.table_name
        )
    }

    /// Query output prefix under the output bucket
    pub fn staging_location(&self, ctx: &RunContext) -> String {
        format!(
            "s3://{}/{}",
            ctx.bucket_name(OUTPUT_BUCKET_LABEL),
            self.temp_folder.trim_matches('/')
        )
    }

    pub fn script_path(&self) -> String {
        format!("{}/{}", self.sql_folder.trim_end_matches('/'), self.script_name)
    }

    /// Substitute `%%LOCATION%%` and `%%DATABASE%%` and strip `--` comments
    pub fn render_script(&self, raw: &str, database: &str, location: &str) -> String {
        let substituted = raw
            .replace("%%LOCATION%%", location)
            .replace("%%DATABASE%%", database);
        strip_sql_comments(&substituted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderDescriptor {
    pub folder_name: String,
    pub label: String,
}

/// Application resource document: `{database, athena_tables[], folders[]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub database: DatabaseSpec,
    #[serde(default)]
    pub athena_tables: Vec<TableDescriptor>,
    #[serde(default)]
    pub folders: Vec<FolderDescriptor>,
}

impl ResourceConfig {
    /// Parse and validate a resource document
    pub fn from_json(content: &str) -> Result<Self> {
        let config: ResourceConfig = serde_json::from_str(content).map_err(|e| {
            Error::configuration(format!("invalid resource configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;

        let mut seen = HashSet::new();
        for table in &self.athena_tables {
            if !is_valid_identifier(&table.table_name) {
                return Err(Error::configuration(format!(
                    "invalid table name '{}'",
                    table.table_name
                )));
            }
            if !seen.insert(table.table_name.to_lowercase()) {
                return Err(Error::configuration(format!(
                    "table '{}' is declared more than once",
                    table.table_name
                )));
            }
            if table.script_name.trim().is_empty() {
                return Err(Error::configuration(format!(
                    "table '{}' has no script_name",
                    table.table_name
                )));
            }
            if table.label.trim().is_empty() {
                return Err(Error::configuration(format!(
                    "table '{}' has no bucket label",
                    table.table_name
                )));
            }
        }

        for folder in &self.folders {
            if folder.folder_name.trim_matches('/').is_empty() || folder.label.trim().is_empty() {
                return Err(Error::configuration(format!(
                    "folder '{}' must have a name and a bucket label",
                    folder.folder_name
                )));
            }
        }

        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.athena_tables
            .iter()
            .find(|t| t.table_name.eq_ignore_ascii_case(name))
    }
}

/// Sensitivity classification of a policy or a column tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityLevel {
    /// No sensitivity restriction, table-level access
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensitivityLevel::None => "none",
            SensitivityLevel::Low => "low",
            SensitivityLevel::Medium => "medium",
            SensitivityLevel::High => "high",
        };
        f.write_str(name)
    }
}

/// Column membership per sensitivity tier. Tiers are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensitivityTiers {
    #[serde(default)]
    pub high: Vec<String>,
    #[serde(default)]
    pub medium: Vec<String>,
    #[serde(default)]
    pub low: Vec<String>,
}

impl SensitivityTiers {
    fn tiers(&self) -> [(SensitivityLevel, &Vec<String>); 3] {
        [
            (SensitivityLevel::Low, &self.low),
            (SensitivityLevel::Medium, &self.medium),
            (SensitivityLevel::High, &self.high),
        ]
    }

    /// Columns a policy at `level` must not see, sorted and lowercased.
    /// `None` carries no restriction.
    pub fn columns_above(&self, level: SensitivityLevel) -> Vec<String> {
        if level == SensitivityLevel::None {
            return Vec::new();
        }
        let excluded: BTreeSet<String> = self
            .tiers()
            .into_iter()
            .filter(|(tier, _)| *tier > level)
            .flat_map(|(_, columns)| columns.iter().map(|c| c.to_lowercase()))
            .collect();
        excluded.into_iter().collect()
    }

    fn validate(&self, table: &str) -> Result<()> {
        let mut owner: BTreeMap<String, SensitivityLevel> = BTreeMap::new();
        for (level, columns) in self.tiers() {
            for column in columns {
                if let Some(previous) = owner.insert(column.to_lowercase(), level) {
                    return Err(Error::configuration(format!(
                        "column '{}' of table '{}' is classified both {} and {}",
                        column, table, previous, level
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Access granted to one principal on one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolePolicy {
    /// Principal label or ARN
    pub principal: String,
    /// Highest sensitivity tier the principal may read
    pub level: SensitivityLevel,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub grantable_permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableGrant {
    pub table_name: String,
    pub bucket_label: String,
    #[serde(default)]
    pub sensitivity: SensitivityTiers,
    pub policies: Vec<RolePolicy>,
}

/// Database-level access, e.g. DESCRIBE or CREATE_TABLE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseGrant {
    pub principal: String,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub grantable_permissions: Vec<Permission>,
}

/// Permission document: `{database, grants[]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionConfig {
    pub database: DatabaseSpec,
    #[serde(default)]
    pub grants: Vec<TableGrant>,
    /// Principal label -> ARN
    #[serde(default)]
    pub principals: BTreeMap<String, String>,
    #[serde(default)]
    pub database_grants: Vec<DatabaseGrant>,
}

impl PermissionConfig {
    /// Parse and validate a permission document
    pub fn from_json(content: &str) -> Result<Self> {
        let config: PermissionConfig = serde_json::from_str(content).map_err(|e| {
            Error::configuration(format!("invalid permission configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;

        for grant in &self.grants {
            if !is_valid_identifier(&grant.table_name) {
                return Err(Error::configuration(format!(
                    "invalid table name '{}' in grants",
                    grant.table_name
                )));
            }
            grant.sensitivity.validate(&grant.table_name)?;
            for policy in &grant.policies {
                validate_permission_sets(
                    &format!("policy for '{}' on '{}'", policy.principal, grant.table_name),
                    &policy.principal,
                    &policy.permissions,
                    &policy.grantable_permissions,
                )?;
            }
        }

        for grant in &self.database_grants {
            validate_permission_sets(
                &format!("database grant for '{}'", grant.principal),
                &grant.principal,
                &grant.permissions,
                &grant.grantable_permissions,
            )?;
        }

        for (label, arn) in &self.principals {
            if !arn.starts_with("arn:") {
                return Err(Error::configuration(format!(
                    "principal '{}' maps to '{}', which is not an ARN",
                    label, arn
                )));
            }
        }

        Ok(())
    }
}

fn validate_permission_sets(
    what: &str,
    principal: &str,
    permissions: &[Permission],
    grantable: &[Permission],
) -> Result<()> {
    if principal.trim().is_empty() {
        return Err(Error::configuration(format!("{} has no principal", what)));
    }
    if permissions.is_empty() {
        return Err(Error::configuration(format!("{} lists no permissions", what)));
    }
    if let Some(extra) = grantable.iter().find(|p| !permissions.contains(p)) {
        return Err(Error::configuration(format!(
            "{} makes {} grantable without granting it",
            what, extra
        )));
    }
    Ok(())
}

/// Catalog identifiers: ASCII letters, digits and underscores
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Remove `--` comments that appear outside quoted literals
pub fn strip_sql_comments(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for line in text.lines() {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut cut = line.len();
        let mut chars = line.char_indices().peekable();
        while let Some((index, c)) = chars.next() {
            if escaped {
                escaped = false;
                continue;
            }
            match (quote, c) {
                (Some(_), '\\') => escaped = true,
                (Some(q), c) if c == q => quote = None,
                (None, '\'' | '"') => quote = Some(c),
                (None, '-') if matches!(chars.peek(), Some((_, '-'))) => {
                    cut = index;
                    break;
                }
                _ => {}
            }
        }
        let kept = line[..cut].trim_end();
        if kept.is_empty() && cut < line.len() {
            continue;
        }
        output.push_str(kept);
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCES: &str = r#"{
        "database": {"name": "sales", "include_env_suffix": true,
                     "location": {"s3_label": "data", "s3_path": "/warehouse/sales"}},
        "athena_tables": [
            {"table_name": "orders", "script_name": "orders.sql", "sql_folder": "sql/tables",
             "label": "data", "location_dir": "/warehouse/sales", "temp_folder": "_tmp/orders",
             "partitioned": true}
        ],
        "folders": [{"folder_name": "warehouse/sales", "label": "data"}]
    }"#;

    #[test]
    fn test_resource_config_parses() {
        let config = ResourceConfig::from_json(RESOURCES).unwrap();
        let ctx = RunContext::new("rdms", "dev");

        assert_eq!(config.database.resolved_name(&ctx), "sales_dev");
        assert_eq!(
            config.database.resolved_location(&ctx).as_deref(),
            Some("s3://rdms-dev-data/warehouse/sales/")
        );

        let orders = config.table("ORDERS").unwrap();
        assert!(orders.partitioned);
        assert_eq!(orders.location(&ctx), "s3://rdms-dev-data/warehouse/sales/orders");
        assert_eq!(orders.script_path(), "sql/tables/orders.sql");
        assert_eq!(orders.staging_location(&ctx), "s3://rdms-dev-output/_tmp/orders");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let content = r#"{"database": {"name": "sales"}, "athena_table": []}"#;
        assert!(matches!(
            ResourceConfig::from_json(content),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_tables_rejected() {
        let mut config = ResourceConfig::from_json(RESOURCES).unwrap();
        let mut twin = config.athena_tables[0].clone();
        twin.table_name = "Orders".to_string();
        config.athena_tables.push(twin);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sensitivity_tiers_must_be_exclusive() {
        let content = r#"{
            "database": {"name": "sales"},
            "grants": [{"table_name": "orders", "bucket_label": "data",
                        "sensitivity": {"high": ["ssn"], "medium": ["SSN"], "low": []},
                        "policies": [{"principal": "analyst", "level": "low", "permissions": ["SELECT"]}]}]
        }"#;
        let err = PermissionConfig::from_json(content).unwrap_err();
        assert!(err.to_string().contains("classified both"));
    }

    #[test]
    fn test_unknown_level_rejected() {
        let content = r#"{
            "database": {"name": "sales"},
            "grants": [{"table_name": "orders", "bucket_label": "data",
                        "policies": [{"principal": "analyst", "level": "secret", "permissions": ["SELECT"]}]}]
        }"#;
        assert!(PermissionConfig::from_json(content).is_err());
    }

    #[test]
    fn test_grantable_must_be_granted() {
        let content = r#"{
            "database": {"name": "sales"},
            "grants": [{"table_name": "orders", "bucket_label": "data",
                        "policies": [{"principal": "analyst", "level": "none",
                                      "permissions": ["SELECT"], "grantable_permissions": ["ALTER"]}]}]
        }"#;
        let err = PermissionConfig::from_json(content).unwrap_err();
        assert!(err.to_string().contains("ALTER grantable"));
    }

    #[test]
    fn test_columns_above() {
        let tiers = SensitivityTiers {
            high: vec!["SSN".to_string()],
            medium: vec!["dob".to_string()],
            low: vec!["zip".to_string()],
        };
        assert_eq!(tiers.columns_above(SensitivityLevel::Low), vec!["dob", "ssn"]);
        assert_eq!(tiers.columns_above(SensitivityLevel::Medium), vec!["ssn"]);
        assert!(tiers.columns_above(SensitivityLevel::High).is_empty());
        assert!(tiers.columns_above(SensitivityLevel::None).is_empty());
    }

    #[test]
    fn test_render_script() {
        let table = ResourceConfig::from_json(RESOURCES).unwrap().athena_tables[0].clone();
        let raw = "-- orders table\nCREATE EXTERNAL TABLE %%DATABASE%%.orders (\n  id int, -- key\n  note string COMMENT 'a -- b'\n)\nLOCATION '%%LOCATION%%'\n";
        let rendered = table.render_script(raw, "sales_dev", "s3://bucket/orders");
        assert_eq!(
            rendered,
            "CREATE EXTERNAL TABLE sales_dev.orders (\n  id int,\n  note string COMMENT 'a -- b'\n)\nLOCATION 's3://bucket/orders'\n"
        );
    }
}
