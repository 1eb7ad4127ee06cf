//! Applies resolved grant operations against the permission service

use tracing::{error, info, instrument};

use crate::backend::PermissionService;
use crate::error::Error;
use crate::report::{ExecutionReport, OperationOutcome, OperationReport};
use crate::types::{Direction, GrantOperation, MutationEffect, Permission};

pub struct GrantExecutor<'a> {
    service: &'a dyn PermissionService,
}

impl<'a> GrantExecutor<'a> {
    pub fn new(service: &'a dyn PermissionService) -> Self {
        Self { service }
    }

    /// Apply every operation in order. A failed operation is recorded and
    /// the batch continues; retries are left to the caller.
    #[instrument(skip_all, fields(operations = operations.len()))]
    pub async fn execute(&self, operations: &[GrantOperation]) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for operation in operations {
            let outcome = match self.apply(operation).await {
                Ok(MutationEffect::Applied) => {
                    info!(%operation, "applied");
                    OperationOutcome::Applied
                }
                Ok(MutationEffect::Unchanged) => {
                    info!(%operation, "already in place");
                    OperationOutcome::Unchanged
                }
                Err(err) => {
                    error!(%operation, error = %err, "grant operation failed");
                    OperationOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            report.operations.push(OperationReport {
                operation: operation.clone(),
                outcome,
            });
        }
        info!(status = %report.status(), "grant execution finished");
        report
    }

    async fn apply(&self, operation: &GrantOperation) -> Result<MutationEffect, Error> {
        let permissions: Vec<Permission> = operation.permissions.iter().copied().collect();
        let grantable: Vec<Permission> = operation.grantable_permissions.iter().copied().collect();
        let result = match operation.direction {
            Direction::Grant => {
                self.service
                    .grant(&operation.principal, &operation.resource, &permissions, &grantable)
                    .await
            }
            Direction::Revoke => {
                self.service
                    .revoke(&operation.principal, &operation.resource, &permissions, &grantable)
                    .await
            }
        };
        result.map_err(|e| Error::execution(format!("{} on {}", operation.direction, operation.resource), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GrantRecord, Resource};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Fails for one principal, records calls for the rest
    struct FlakyService {
        failing: &'static str,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PermissionService for FlakyService {
        async fn grant(
            &self,
            principal: &str,
            _resource: &Resource,
            _permissions: &[Permission],
            _grantable: &[Permission],
        ) -> Result<MutationEffect> {
            self.calls.lock().unwrap().push(principal.to_string());
            if principal == self.failing {
                bail!("AccessDeniedException");
            }
            Ok(MutationEffect::Applied)
        }

        async fn revoke(
            &self,
            _principal: &str,
            _resource: &Resource,
            _permissions: &[Permission],
            _grantable: &[Permission],
        ) -> Result<MutationEffect> {
            Ok(MutationEffect::Unchanged)
        }

        async fn list_grants(&self) -> Result<Vec<GrantRecord>> {
            Ok(Vec::new())
        }
    }

    fn operation(principal: &str, direction: Direction) -> GrantOperation {
        GrantOperation {
            principal: principal.to_string(),
            resource: Resource::Table {
                database: "sales".to_string(),
                table: "orders".to_string(),
            },
            permissions: [Permission::Select].into_iter().collect(),
            grantable_permissions: BTreeSet::new(),
            direction,
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let service = FlakyService {
            failing: "arn:b",
            calls: Mutex::new(Vec::new()),
        };
        let ops = vec![
            operation("arn:a", Direction::Grant),
            operation("arn:b", Direction::Grant),
            operation("arn:c", Direction::Grant),
        ];
        let report = GrantExecutor::new(&service).execute(&ops).await;

        assert_eq!(service.calls.lock().unwrap().len(), 3);
        assert_eq!(report.operations.len(), 3);
        assert_eq!(report.failed_operations(), vec![ops[1].clone()]);
        assert_eq!(report.status(), crate::report::RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_revoke_of_absent_grant_is_success() {
        let service = FlakyService {
            failing: "",
            calls: Mutex::new(Vec::new()),
        };
        let report = GrantExecutor::new(&service)
            .execute(&[operation("arn:a", Direction::Revoke)])
            .await;
        assert_eq!(report.operations[0].outcome, OperationOutcome::Unchanged);
        assert_eq!(report.status(), crate::report::RunStatus::Succeeded);
    }
}
