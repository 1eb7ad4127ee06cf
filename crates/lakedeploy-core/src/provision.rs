//! Folder, database and table provisioning driven by a resource config

use tracing::{debug, error, info, instrument, warn};

use crate::backend::{CatalogService, DdlParser, ScriptSource, StorageService};
use crate::config::{FolderDescriptor, ResourceConfig, TableDescriptor};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::inspector::CatalogInspector;
use crate::reconcile::{
    detect_drift, location_differs, partition_keys_compatible, reconcile, ReconcileDecision,
};
use crate::report::{EnsureOutcome, FolderReport, ProvisioningReport, TableOutcome, TableReport};
use crate::types::{DesiredTable, TableKind, TableSnapshot};

/// Runs the folders → database → tables pipeline
pub struct ResourceProvisioner<'a> {
    catalog: &'a dyn CatalogService,
    storage: &'a dyn StorageService,
    scripts: &'a dyn ScriptSource,
    parser: &'a dyn DdlParser,
}

/// Everything needed to act on one table once its DDL is rendered
struct TablePlan<'t> {
    descriptor: &'t TableDescriptor,
    database: &'t str,
    ddl: String,
    staging: String,
    desired: DesiredTable,
}

impl<'t> TablePlan<'t> {
    fn name(&self) -> &str {
        &self.descriptor.table_name
    }

    fn qualified(&self) -> String {
        format!("{}.{}", self.database, self.descriptor.table_name)
    }
}

impl<'a> ResourceProvisioner<'a> {
    pub fn new(
        catalog: &'a dyn CatalogService,
        storage: &'a dyn StorageService,
        scripts: &'a dyn ScriptSource,
        parser: &'a dyn DdlParser,
    ) -> Self {
        Self {
            catalog,
            storage,
            scripts,
            parser,
        }
    }

    /// Provision everything the resource config declares.
    ///
    /// Returns `Err` only for configuration errors, detected before any
    /// mutation. Every other failure is recorded in the report, which lists
    /// each folder and each table exactly once.
    #[instrument(skip_all, fields(database = %config.database.name, environment = %ctx.environment))]
    pub async fn provision(
        &self,
        config: &ResourceConfig,
        ctx: &RunContext,
    ) -> Result<ProvisioningReport> {
        ctx.validate()?;
        config.validate()?;

        let database = config.database.resolved_name(ctx);
        let mut report = ProvisioningReport::new(&database);
        let mut blocked: Option<String> = None;

        info!(folders = config.folders.len(), "provisioning folders");
        for folder in &config.folders {
            let outcome = self.ensure_folder(folder).await;
            if let EnsureOutcome::Failed { reason } = &outcome {
                blocked.get_or_insert_with(|| {
                    format!(
                        "prerequisite folder {}/{} failed: {}",
                        folder.label, folder.folder_name, reason
                    )
                });
            }
            report.folders.push(FolderReport {
                label: folder.label.clone(),
                folder: folder.folder_name.clone(),
                outcome,
            });
        }

        report.database_outcome = match &blocked {
            Some(reason) => EnsureOutcome::Skipped {
                reason: reason.clone(),
            },
            None => {
                let location = config.database.resolved_location(ctx);
                self.ensure_database(&database, location.as_deref()).await
            }
        };
        if let EnsureOutcome::Failed { reason } = &report.database_outcome {
            blocked = Some(format!("prerequisite database {} failed: {}", database, reason));
        }

        info!(tables = config.athena_tables.len(), "provisioning tables");
        for table in &config.athena_tables {
            let outcome = match &blocked {
                Some(reason) => TableOutcome::Failed {
                    reason: reason.clone(),
                },
                None => match self.provision_table(table, &database, ctx).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(table = %table.table_name, error = %e, "table provisioning failed");
                        TableOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                },
            };
            info!(table = %table.table_name, outcome = %outcome, "table done");
            report.tables.push(TableReport {
                table: table.table_name.clone(),
                outcome,
            });
        }

        info!(status = %report.status(), "provisioning finished");
        Ok(report)
    }

    async fn ensure_folder(&self, folder: &FolderDescriptor) -> EnsureOutcome {
        let prefix = folder.folder_name.trim_matches('/');
        let what = format!("{}/{}", folder.label, prefix);
        match self.storage.folder_exists(&folder.label, prefix).await {
            Ok(true) => {
                debug!(folder = %what, "folder exists");
                EnsureOutcome::Existing
            }
            Ok(false) => match self.storage.create_folder(&folder.label, prefix).await {
                Ok(()) => {
                    info!(folder = %what, "created folder");
                    EnsureOutcome::Created
                }
                Err(e) => {
                    let err = Error::execution(format!("create folder {}", what), e);
                    error!(error = %err, "folder provisioning failed");
                    EnsureOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            },
            Err(e) => {
                let err = Error::catalog(format!("folder {}", what), e);
                error!(error = %err, "folder lookup failed");
                EnsureOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn ensure_database(&self, database: &str, location: Option<&str>) -> EnsureOutcome {
        let inspector = CatalogInspector::new(self.catalog);
        match inspector.database_exists(database).await {
            Ok(true) => {
                debug!(database, "database exists");
                EnsureOutcome::Existing
            }
            Ok(false) => match self.catalog.create_database(database, location).await {
                Ok(()) => {
                    info!(database, location = ?location, "created database");
                    EnsureOutcome::Created
                }
                Err(e) => {
                    let err = Error::execution(format!("create database {}", database), e);
                    error!(error = %err, "database provisioning failed");
                    EnsureOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            },
            Err(err) => {
                error!(error = %err, "database lookup failed");
                EnsureOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    #[instrument(skip_all, fields(table = %descriptor.table_name))]
    async fn provision_table(
        &self,
        descriptor: &TableDescriptor,
        database: &str,
        ctx: &RunContext,
    ) -> Result<TableOutcome> {
        let plan = self.plan(descriptor, database, ctx).await?;

        // Fresh snapshot every run; an unreachable catalog fails here
        let inspector = CatalogInspector::new(self.catalog);
        let observed = inspector.snapshot(database, plan.name()).await?;

        let decision = reconcile(&plan.desired, observed.as_ref());
        if let Some(observed) = &observed {
            if location_differs(&plan.desired, observed) {
                warn!(
                    desired = ?plan.desired.location,
                    observed = ?observed.location,
                    "table location differs from catalog, not recreating for location alone"
                );
            }
            if let Some(drift) = detect_drift(&plan.desired, observed) {
                info!(%drift, "schema drift");
            }
        }
        info!(decision = ?decision, "reconciled");

        match (decision, observed) {
            (ReconcileDecision::Skip, _) => Ok(TableOutcome::Unchanged),
            (ReconcileDecision::Recreate, Some(observed)) => self.recreate(&plan, &observed).await,
            (ReconcileDecision::Create, _) | (ReconcileDecision::Recreate, None) => {
                self.create(&plan).await
            }
        }
    }

    /// Fetch, render and parse the table's DDL
    async fn plan<'t>(
        &self,
        descriptor: &'t TableDescriptor,
        database: &'t str,
        ctx: &RunContext,
    ) -> Result<TablePlan<'t>> {
        let conflict = |message: String| Error::ReconciliationConflict {
            table: descriptor.table_name.clone(),
            message,
        };

        let raw = self
            .scripts
            .fetch_script(descriptor)
            .await
            .map_err(|e| Error::execution(format!("fetch script {}", descriptor.script_path()), e))?;
        let ddl = descriptor.render_script(&raw, database, &descriptor.location(ctx));
        let desired = self
            .parser
            .parse(&ddl)
            .map_err(|e| conflict(format!("DDL {} does not parse: {:#}", descriptor.script_path(), e)))?;

        if !desired.name.eq_ignore_ascii_case(&descriptor.table_name) {
            return Err(conflict(format!(
                "DDL defines '{}' instead of '{}'",
                desired.name, descriptor.table_name
            )));
        }
        if let Some(qualifier) = &desired.database {
            if !qualifier.eq_ignore_ascii_case(database) {
                return Err(conflict(format!(
                    "DDL targets database '{}' instead of '{}'",
                    qualifier, database
                )));
            }
        }
        if descriptor.partitioned && !desired.is_partitioned() {
            return Err(conflict(
                "table is declared partitioned but its DDL has no PARTITIONED BY clause".to_string(),
            ));
        }

        Ok(TablePlan {
            descriptor,
            database,
            staging: descriptor.staging_location(ctx),
            ddl,
            desired,
        })
    }

    async fn create(&self, plan: &TablePlan<'_>) -> Result<TableOutcome> {
        self.catalog
            .create_table(plan.database, &plan.ddl, Some(&plan.staging))
            .await
            .map_err(|e| Error::execution(format!("create {} {}", plan.desired.kind, plan.qualified()), e))?;
        info!(kind = %plan.desired.kind, "created");

        let partitions = if plan.desired.kind == TableKind::External && plan.desired.is_partitioned() {
            self.discover(plan).await?
        } else {
            0
        };
        Ok(TableOutcome::Created { partitions })
    }

    async fn recreate(&self, plan: &TablePlan<'_>, observed: &TableSnapshot) -> Result<TableOutcome> {
        let inspector = CatalogInspector::new(self.catalog);

        if plan.desired.kind == TableKind::View && observed.kind == TableKind::View {
            // CREATE OR REPLACE, no drop
            self.catalog
                .create_table(plan.database, &plan.ddl, Some(&plan.staging))
                .await
                .map_err(|e| Error::execution(format!("replace view {}", plan.qualified()), e))?;
            return Ok(TableOutcome::Recreated {
                partitions_before: 0,
                partitions_after: 0,
            });
        }

        let captured = if observed.is_partitioned() {
            inspector.partitions(plan.database, plan.name()).await?
        } else {
            Vec::new()
        };
        info!(partitions = captured.len(), "captured partitions before drop");

        self.catalog
            .drop_table(plan.database, plan.name(), observed.kind, Some(&plan.staging))
            .await
            .map_err(|e| Error::execution(format!("drop {} {}", observed.kind, plan.qualified()), e))?;
        self.catalog
            .create_table(plan.database, &plan.ddl, Some(&plan.staging))
            .await
            .map_err(|e| Error::execution(format!("create {} {}", plan.desired.kind, plan.qualified()), e))?;

        if plan.desired.kind == TableKind::View || !plan.desired.is_partitioned() {
            return Ok(TableOutcome::Recreated {
                partitions_before: captured.len(),
                partitions_after: 0,
            });
        }

        if !partition_keys_compatible(&plan.desired, observed) {
            warn!(
                captured = captured.len(),
                "partition keys changed, rediscovering partitions from storage"
            );
            let after = self.discover(plan).await?;
            return Ok(TableOutcome::Recreated {
                partitions_before: captured.len(),
                partitions_after: after,
            });
        }

        self.catalog
            .add_partitions(plan.database, plan.name(), &captured)
            .await
            .map_err(|e| {
                Error::execution(
                    format!("reload {} partitions into {}", captured.len(), plan.qualified()),
                    e,
                )
            })?;

        let after = inspector.partitions(plan.database, plan.name()).await?.len();
        if after != captured.len() {
            error!(before = captured.len(), after, "partition reload incomplete");
            return Ok(TableOutcome::Failed {
                reason: format!(
                    "partition reload mismatch: {} before recreate, {} after",
                    captured.len(),
                    after
                ),
            });
        }
        info!(partitions = after, "partitions reloaded");
        Ok(TableOutcome::Recreated {
            partitions_before: captured.len(),
            partitions_after: after,
        })
    }

    async fn discover(&self, plan: &TablePlan<'_>) -> Result<usize> {
        let found = self
            .catalog
            .discover_partitions(plan.database, plan.name())
            .await
            .map_err(|e| Error::execution(format!("discover partitions of {}", plan.qualified()), e))?;
        info!(partitions = found, "discovered partitions");
        Ok(found)
    }
}
