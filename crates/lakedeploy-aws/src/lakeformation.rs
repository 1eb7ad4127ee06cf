//! Lake Formation grants

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_lakeformation::error::ProvideErrorMetadata;
use aws_sdk_lakeformation::types::{
    ColumnWildcard, DataLakePrincipal, DataLocationResource, DatabaseResource,
    Permission as LfPermission, Resource as LfResource, TableResource, TableWithColumnsResource,
};
use lakedeploy_core::backend::PermissionService;
use lakedeploy_core::types::{GrantRecord, MutationEffect, Permission, Resource};
use tracing::{debug, warn};

use crate::AwsBackend;

fn convert_principal(principal: &str) -> DataLakePrincipal {
    DataLakePrincipal::builder()
        .data_lake_principal_identifier(principal)
        .build()
}

fn convert_resource(resource: &Resource) -> Result<LfResource> {
    let converted = match resource {
        Resource::Database { name } => LfResource::builder()
            .database(
                DatabaseResource::builder()
                    .name(name)
                    .build()
                    .map_err(|e| anyhow!("Failed to build database resource: {}", e))?,
            )
            .build(),
        Resource::Table { database, table } => LfResource::builder()
            .table(
                TableResource::builder()
                    .database_name(database)
                    .name(table)
                    .build()
                    .map_err(|e| anyhow!("Failed to build table resource: {}", e))?,
            )
            .build(),
        Resource::TableColumns {
            database,
            table,
            excluded_columns,
        } => LfResource::builder()
            .table_with_columns(
                TableWithColumnsResource::builder()
                    .database_name(database)
                    .name(table)
                    .column_wildcard(
                        ColumnWildcard::builder()
                            .set_excluded_column_names(Some(excluded_columns.clone()))
                            .build(),
                    )
                    .build()
                    .map_err(|e| anyhow!("Failed to build column resource: {}", e))?,
            )
            .build(),
        Resource::DataLocation { arn } => LfResource::builder()
            .data_location(
                DataLocationResource::builder()
                    .resource_arn(arn)
                    .build()
                    .map_err(|e| anyhow!("Failed to build data location resource: {}", e))?,
            )
            .build(),
    };
    Ok(converted)
}

fn convert_permissions(permissions: &[Permission]) -> Vec<LfPermission> {
    permissions
        .iter()
        .map(|permission| match permission {
            Permission::All => LfPermission::All,
            Permission::Select => LfPermission::Select,
            Permission::Insert => LfPermission::Insert,
            Permission::Delete => LfPermission::Delete,
            Permission::Describe => LfPermission::Describe,
            Permission::Alter => LfPermission::Alter,
            Permission::Drop => LfPermission::Drop,
            Permission::CreateTable => LfPermission::CreateTable,
            Permission::DataLocationAccess => LfPermission::DataLocationAccess,
        })
        .collect()
}

fn convert_aws_permission(permission: &LfPermission) -> Option<Permission> {
    match permission {
        LfPermission::All => Some(Permission::All),
        LfPermission::Select => Some(Permission::Select),
        LfPermission::Insert => Some(Permission::Insert),
        LfPermission::Delete => Some(Permission::Delete),
        LfPermission::Describe => Some(Permission::Describe),
        LfPermission::Alter => Some(Permission::Alter),
        LfPermission::Drop => Some(Permission::Drop),
        LfPermission::CreateTable => Some(Permission::CreateTable),
        LfPermission::DataLocationAccess => Some(Permission::DataLocationAccess),
        _ => None,
    }
}

fn convert_aws_resource(resource: &LfResource) -> Option<Resource> {
    if let Some(db) = resource.database() {
        return Some(Resource::Database {
            name: db.name().to_string(),
        });
    }
    if let Some(table) = resource.table() {
        return Some(Resource::Table {
            database: table.database_name().to_string(),
            table: table.name().unwrap_or("*").to_string(),
        });
    }
    if let Some(columns) = resource.table_with_columns() {
        let excluded = columns
            .column_wildcard()
            .map(|w| w.excluded_column_names().to_vec())
            .unwrap_or_default();
        return Some(Resource::TableColumns {
            database: columns.database_name().to_string(),
            table: columns.name().to_string(),
            excluded_columns: excluded,
        });
    }
    resource.data_location().map(|location| Resource::DataLocation {
        arn: location.resource_arn().to_string(),
    })
}

/// Lake Formation reports a revoke of something never granted as invalid input
fn is_nothing_to_revoke(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("no permissions revoked") || message.contains("does not have")
}

#[async_trait]
impl PermissionService for AwsBackend {
    async fn grant(
        &self,
        principal: &str,
        resource: &Resource,
        permissions: &[Permission],
        grantable: &[Permission],
    ) -> Result<MutationEffect> {
        // GrantPermissions is idempotent and does not report prior state
        self.lakeformation
            .grant_permissions()
            .principal(convert_principal(principal))
            .resource(convert_resource(resource)?)
            .set_permissions(Some(convert_permissions(permissions)))
            .set_permissions_with_grant_option(Some(convert_permissions(grantable)))
            .send()
            .await
            .with_context(|| format!("GrantPermissions on {} to {}", resource, principal))?;
        debug!(principal, %resource, "granted");
        Ok(MutationEffect::Applied)
    }

    async fn revoke(
        &self,
        principal: &str,
        resource: &Resource,
        permissions: &[Permission],
        grantable: &[Permission],
    ) -> Result<MutationEffect> {
        let result = self
            .lakeformation
            .revoke_permissions()
            .principal(convert_principal(principal))
            .resource(convert_resource(resource)?)
            .set_permissions(Some(convert_permissions(permissions)))
            .set_permissions_with_grant_option(Some(convert_permissions(grantable)))
            .send()
            .await;

        match result {
            Ok(_) => Ok(MutationEffect::Applied),
            Err(err)
                if err
                    .as_service_error()
                    .and_then(|e| e.message())
                    .map_or(false, is_nothing_to_revoke) =>
            {
                debug!(principal, %resource, "nothing to revoke");
                Ok(MutationEffect::Unchanged)
            }
            Err(err) => Err(err)
                .with_context(|| format!("RevokePermissions on {} from {}", resource, principal)),
        }
    }

    async fn list_grants(&self) -> Result<Vec<GrantRecord>> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .lakeformation
                .list_permissions()
                .set_next_token(token.take())
                .send()
                .await
                .context("ListPermissions")?;

            for entry in page.principal_resource_permissions() {
                let principal = entry
                    .principal()
                    .and_then(|p| p.data_lake_principal_identifier());
                let resource = entry.resource().and_then(convert_aws_resource);
                let (Some(principal), Some(resource)) = (principal, resource) else {
                    warn!("skipping permission entry without a principal or a supported resource");
                    continue;
                };
                records.push(GrantRecord {
                    principal: principal.to_string(),
                    resource,
                    permissions: entry
                        .permissions()
                        .iter()
                        .filter_map(convert_aws_permission)
                        .collect(),
                    grantable_permissions: entry
                        .permissions_with_grant_option()
                        .iter()
                        .filter_map(convert_aws_permission)
                        .collect(),
                });
            }

            match page.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_resource_uses_wildcard() {
        let resource = convert_resource(&Resource::TableColumns {
            database: "sales".to_string(),
            table: "customers".to_string(),
            excluded_columns: vec!["ssn".to_string()],
        })
        .unwrap();
        let columns = resource.table_with_columns().unwrap();
        assert_eq!(columns.name(), "customers");
        assert_eq!(
            columns.column_wildcard().unwrap().excluded_column_names(),
            &["ssn".to_string()]
        );
        assert_eq!(
            convert_aws_resource(&resource),
            Some(Resource::TableColumns {
                database: "sales".to_string(),
                table: "customers".to_string(),
                excluded_columns: vec!["ssn".to_string()],
            })
        );
    }

    #[test]
    fn test_permission_mapping_is_total() {
        let all = [
            Permission::All,
            Permission::Select,
            Permission::Insert,
            Permission::Delete,
            Permission::Describe,
            Permission::Alter,
            Permission::Drop,
            Permission::CreateTable,
            Permission::DataLocationAccess,
        ];
        let converted = convert_permissions(&all);
        let back: Vec<Permission> = converted.iter().filter_map(convert_aws_permission).collect();
        assert_eq!(back, all.to_vec());
    }

    #[test]
    fn test_nothing_to_revoke_detection() {
        assert!(is_nothing_to_revoke(
            "No permissions revoked. Grantee arn:aws:iam::1:role/x does not have SELECT"
        ));
        assert!(!is_nothing_to_revoke("Insufficient Lake Formation permission(s)"));
    }
}
