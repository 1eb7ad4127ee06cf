//! Expansion of a permission config into atomic grant/revoke operations

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument, warn};

use crate::config::{PermissionConfig, ResourceConfig, RolePolicy, TableGrant};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::inspector::{CatalogInspector, NameFilter};
use crate::types::{Direction, GrantOperation, Permission, Resource};

#[derive(Default)]
struct PermissionSets {
    permissions: BTreeSet<Permission>,
    grantable: BTreeSet<Permission>,
}

/// Operations resolved against the live catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogResolution {
    pub operations: Vec<GrantOperation>,
    /// Granted tables that pass the filter but are not in the catalog yet.
    /// Their grants are not part of `operations`.
    pub missing_tables: Vec<String>,
}

/// Resolves permission configs against the companion resource config
pub struct PermissionResolver<'a> {
    resources: &'a ResourceConfig,
    ctx: &'a RunContext,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(resources: &'a ResourceConfig, ctx: &'a RunContext) -> Self {
        Self { resources, ctx }
    }

    /// Both documents must describe the same database, and every granted
    /// table must be declared in the resource config
    pub fn check_references(&self, config: &PermissionConfig) -> Result<()> {
        let granted_db = config.database.resolved_name(self.ctx);
        let declared_db = self.resources.database.resolved_name(self.ctx);
        if granted_db != declared_db {
            return Err(Error::configuration(format!(
                "permission config targets database '{}' but resource config declares '{}'",
                granted_db, declared_db
            )));
        }

        let missing: Vec<&str> = config
            .grants
            .iter()
            .filter(|grant| self.resources.table(&grant.table_name).is_none())
            .map(|grant| grant.table_name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::configuration(format!(
                "permission config grants on tables not declared in the resource config: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Flatten the config into sorted, deduplicated operations.
    ///
    /// Nothing is returned unless the whole config resolves; any
    /// configuration error yields zero operations.
    pub fn resolve(
        &self,
        config: &PermissionConfig,
        filter: Option<&NameFilter>,
        direction: Direction,
    ) -> Result<Vec<GrantOperation>> {
        config.validate()?;
        self.check_references(config)?;

        let database = config.database.resolved_name(self.ctx);
        let mut merged: BTreeMap<(String, Resource), PermissionSets> = BTreeMap::new();

        let selected = config
            .grants
            .iter()
            .filter(|grant| filter.map_or(true, |f| f.matches(&grant.table_name)));
        for grant in selected {
            for policy in &grant.policies {
                let principal = self.principal_arn(config, &policy.principal)?;
                for (resource, permission, grantable) in self.expand(&database, grant, policy)? {
                    let sets = merged.entry((principal.clone(), resource)).or_default();
                    sets.permissions.insert(permission);
                    if grantable {
                        sets.grantable.insert(permission);
                    }
                }
            }
        }

        for grant in &config.database_grants {
            let principal = self.principal_arn(config, &grant.principal)?;
            let resource = Resource::Database {
                name: database.clone(),
            };
            let sets = merged.entry((principal, resource)).or_default();
            sets.permissions.extend(grant.permissions.iter().copied());
            sets.grantable.extend(grant.grantable_permissions.iter().copied());
        }

        let operations: Vec<GrantOperation> = merged
            .into_iter()
            .map(|((principal, resource), sets)| GrantOperation {
                principal,
                resource,
                permissions: sets.permissions,
                grantable_permissions: sets.grantable,
                direction,
            })
            .collect();
        debug!(operations = operations.len(), %direction, "resolved permission config");
        Ok(operations)
    }

    /// Resolve only the grants whose tables exist in the catalog and pass
    /// the filter. Fails with `NoMatchingTables` when nothing is selected.
    /// Granted tables missing from the catalog are returned alongside the
    /// operations.
    #[instrument(skip_all, fields(database = %config.database.resolved_name(self.ctx), %direction))]
    pub async fn resolve_against_catalog(
        &self,
        inspector: &CatalogInspector<'_>,
        config: &PermissionConfig,
        filter: Option<&NameFilter>,
        direction: Direction,
    ) -> Result<CatalogResolution> {
        config.validate()?;
        self.check_references(config)?;

        let database = config.database.resolved_name(self.ctx);
        let tables = inspector.table_names(&database, filter).await?;
        if tables.is_empty() {
            return Err(Error::NoMatchingTables {
                database,
                filter: filter.map_or_else(|| "any name".to_string(), |f| f.to_string()),
            });
        }
        info!(tables = tables.len(), "catalog tables selected");

        let (present, absent): (Vec<TableGrant>, Vec<TableGrant>) = config
            .grants
            .iter()
            .filter(|grant| filter.map_or(true, |f| f.matches(&grant.table_name)))
            .cloned()
            .partition(|grant| tables.iter().any(|t| t.eq_ignore_ascii_case(&grant.table_name)));

        let missing_tables: Vec<String> = absent
            .iter()
            .map(|grant| grant.table_name.to_lowercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !missing_tables.is_empty() {
            warn!(tables = ?missing_tables, "grants skipped: tables not in catalog");
        }

        let scoped = PermissionConfig {
            grants: present,
            ..config.clone()
        };
        Ok(CatalogResolution {
            operations: self.resolve(&scoped, filter, direction)?,
            missing_tables,
        })
    }

    /// Principal label to ARN
    pub fn principal_arn(&self, config: &PermissionConfig, label: &str) -> Result<String> {
        if label.starts_with("arn:") {
            return Ok(label.to_string());
        }
        if let Some(arn) = config.principals.get(label) {
            return Ok(arn.clone());
        }
        match &self.ctx.account_id {
            Some(account) => Ok(format!("arn:aws:iam::{}:role/{}", account, label)),
            None => Err(Error::configuration(format!(
                "principal '{}' is not an ARN, has no entry in principals and no account id is configured",
                label
            ))),
        }
    }

    /// (resource, permission, grantable) triples for one policy on one table
    fn expand(
        &self,
        database: &str,
        grant: &TableGrant,
        policy: &RolePolicy,
    ) -> Result<Vec<(Resource, Permission, bool)>> {
        let excluded = grant.sensitivity.columns_above(policy.level);
        if !excluded.is_empty() && policy.permissions.contains(&Permission::All) {
            return Err(Error::configuration(format!(
                "policy for '{}' on '{}' grants ALL at level {}, which would expose restricted columns",
                policy.principal, grant.table_name, policy.level
            )));
        }

        let table = Resource::Table {
            database: database.to_string(),
            table: grant.table_name.to_lowercase(),
        };
        let columns = Resource::TableColumns {
            database: database.to_string(),
            table: grant.table_name.to_lowercase(),
            excluded_columns: excluded.clone(),
        };
        let location = Resource::DataLocation {
            arn: format!("arn:aws:s3:::{}", self.ctx.bucket_name(&grant.bucket_label)),
        };

        Ok(policy
            .permissions
            .iter()
            .map(|permission| {
                let resource = match permission {
                    Permission::Select if !excluded.is_empty() => columns.clone(),
                    Permission::DataLocationAccess => location.clone(),
                    _ => table.clone(),
                };
                let grantable = policy.grantable_permissions.contains(permission);
                (resource, *permission, grantable)
            })
            .collect())
    }
}
