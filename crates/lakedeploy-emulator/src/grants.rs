//! Emulated Lake Formation permissions

use anyhow::Result;
use async_trait::async_trait;
use lakedeploy_core::backend::PermissionService;
use lakedeploy_core::types::{GrantRecord, MutationEffect, Permission, Resource};
use std::collections::BTreeSet;

use crate::{EmulatorBackend, Fault};

#[async_trait]
impl PermissionService for EmulatorBackend {
    async fn grant(
        &self,
        principal: &str,
        resource: &Resource,
        permissions: &[Permission],
        grantable: &[Permission],
    ) -> Result<MutationEffect> {
        self.check("GrantPermissions", false, Some(Fault::Grant(principal.to_string())))
            .await?;
        self.mutate(|state| {
            let index = match state
                .grants
                .iter()
                .position(|g| g.principal == principal && g.resource == *resource)
            {
                Some(index) => index,
                None => {
                    state.grants.push(GrantRecord {
                        principal: principal.to_string(),
                        resource: resource.clone(),
                        permissions: BTreeSet::new(),
                        grantable_permissions: BTreeSet::new(),
                    });
                    state.grants.len() - 1
                }
            };

            let record = &mut state.grants[index];
            let mut changed = false;
            for permission in permissions {
                changed |= record.permissions.insert(*permission);
            }
            for permission in grantable {
                changed |= record.grantable_permissions.insert(*permission);
            }
            Ok(if changed {
                MutationEffect::Applied
            } else {
                MutationEffect::Unchanged
            })
        })
        .await
    }

    async fn revoke(
        &self,
        principal: &str,
        resource: &Resource,
        permissions: &[Permission],
        grantable: &[Permission],
    ) -> Result<MutationEffect> {
        self.check("RevokePermissions", false, Some(Fault::Grant(principal.to_string())))
            .await?;
        self.mutate(|state| {
            let Some(index) = state
                .grants
                .iter()
                .position(|g| g.principal == principal && g.resource == *resource)
            else {
                return Ok(MutationEffect::Unchanged);
            };

            let record = &mut state.grants[index];
            let mut changed = false;
            for permission in permissions {
                changed |= record.permissions.remove(permission);
                // No grant option without the permission itself
                changed |= record.grantable_permissions.remove(permission);
            }
            for permission in grantable {
                changed |= record.grantable_permissions.remove(permission);
            }
            if record.permissions.is_empty() {
                state.grants.remove(index);
            }
            Ok(if changed {
                MutationEffect::Applied
            } else {
                MutationEffect::Unchanged
            })
        })
        .await
    }

    async fn list_grants(&self) -> Result<Vec<GrantRecord>> {
        self.read(|state| {
            let mut grants = state.grants.clone();
            grants.sort_by(|a, b| (&a.principal, &a.resource).cmp(&(&b.principal, &b.resource)));
            Ok(grants)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Resource {
        Resource::Table {
            database: "sales".to_string(),
            table: "orders".to_string(),
        }
    }

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let backend = EmulatorBackend::in_memory();
        let effect = backend
            .grant("arn:a", &orders(), &[Permission::Select], &[])
            .await
            .unwrap();
        assert_eq!(effect, MutationEffect::Applied);

        let again = backend
            .grant("arn:a", &orders(), &[Permission::Select], &[])
            .await
            .unwrap();
        assert_eq!(again, MutationEffect::Unchanged);
        assert_eq!(backend.list_grants().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_removes_grant_option() {
        let backend = EmulatorBackend::in_memory();
        backend
            .grant("arn:a", &orders(), &[Permission::Select, Permission::Insert], &[Permission::Select])
            .await
            .unwrap();
        backend
            .revoke("arn:a", &orders(), &[Permission::Select], &[])
            .await
            .unwrap();

        let grants = backend.list_grants().await.unwrap();
        assert_eq!(grants[0].permissions, [Permission::Insert].into_iter().collect());
        assert!(grants[0].grantable_permissions.is_empty());

        backend
            .revoke("arn:a", &orders(), &[Permission::Insert], &[])
            .await
            .unwrap();
        assert!(backend.list_grants().await.unwrap().is_empty());

        let absent = backend
            .revoke("arn:a", &orders(), &[Permission::Insert], &[])
            .await
            .unwrap();
        assert_eq!(absent, MutationEffect::Unchanged);
    }
}
