//! Provisioning pipeline against the emulator

use lakedeploy_core::backend::CatalogService;
use lakedeploy_core::config::ResourceConfig;
use lakedeploy_core::context::RunContext;
use lakedeploy_core::report::{EnsureOutcome, RunStatus, TableOutcome};
use lakedeploy_core::types::{Partition, TableKind};
use lakedeploy_core::{Error, ResourceProvisioner};
use lakedeploy_emulator::{EmulatorBackend, Fault, InMemoryScripts};
use lakedeploy_parser::AthenaDdlParser;
use pretty_assertions::assert_eq;

const RESOURCES: &str = r#"{
    "database": {"name": "sales", "include_env_suffix": true,
                 "location": {"s3_label": "data", "s3_path": "/warehouse/sales"}},
    "athena_tables": [
        {"table_name": "orders", "script_name": "orders.sql", "sql_folder": "sql",
         "label": "data", "location_dir": "/warehouse/sales", "temp_folder": "tmp/orders",
         "partitioned": true}
    ],
    "folders": [{"folder_name": "warehouse/sales", "label": "data"}]
}"#;

const ORDERS: &str = "-- orders fact table
CREATE EXTERNAL TABLE %%DATABASE%%.orders (
  order_id bigint,
  amount decimal(10,2)
)
PARTITIONED BY (dt string)
STORED AS PARQUET
LOCATION '%%LOCATION%%';
";

const ORDERS_WITH_REGION: &str = "CREATE EXTERNAL TABLE %%DATABASE%%.orders (
  order_id bigint,
  amount decimal(10,2),
  region string
)
PARTITIONED BY (dt string)
STORED AS PARQUET
LOCATION '%%LOCATION%%';
";

const TOTALS_VIEW: &str = "CREATE OR REPLACE VIEW %%DATABASE%%.order_totals AS
SELECT dt, sum(amount) AS total FROM %%DATABASE%%.orders GROUP BY dt";

const ORDERS_LOCATION: &str = "s3://rdms-dev-data/warehouse/sales/orders";

fn ctx() -> RunContext {
    RunContext::new("rdms", "dev")
}

fn resources() -> ResourceConfig {
    ResourceConfig::from_json(RESOURCES).unwrap()
}

fn scripts(orders: &str) -> InMemoryScripts {
    InMemoryScripts::new()
        .with_script("sql/orders.sql", orders)
        .with_script("sql/order_totals.sql", TOTALS_VIEW)
}

async fn seeded_backend() -> EmulatorBackend {
    let backend = EmulatorBackend::in_memory();
    backend
        .seed_storage_partitions(
            ORDERS_LOCATION,
            ["2024-01-01", "2024-01-02", "2024-01-03"]
                .iter()
                .map(|dt| {
                    Partition::new(
                        vec![dt.to_string()],
                        Some(format!("{}/dt={}", ORDERS_LOCATION, dt)),
                    )
                })
                .collect(),
        )
        .await
        .unwrap();
    backend
}

#[tokio::test]
async fn test_new_table_is_created() {
    let backend = seeded_backend().await;
    let scripts = scripts(ORDERS);
    let provisioner = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser);

    let report = provisioner.provision(&resources(), &ctx()).await.unwrap();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(report.database, "sales_dev");
    assert_eq!(report.database_outcome, EnsureOutcome::Created);
    assert_eq!(report.folders[0].outcome, EnsureOutcome::Created);
    assert_eq!(report.table("orders"), Some(&TableOutcome::Created { partitions: 3 }));

    let state = backend.state().await;
    assert_eq!(
        state.databases["sales_dev"].location.as_deref(),
        Some("s3://rdms-dev-data/warehouse/sales/")
    );
    assert_eq!(state.table("sales_dev", "orders").unwrap().partitions.len(), 3);
}

#[tokio::test]
async fn test_second_run_is_unchanged() {
    let backend = seeded_backend().await;
    let scripts = scripts(ORDERS);
    let provisioner = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser);
    provisioner.provision(&resources(), &ctx()).await.unwrap();

    let report = provisioner.provision(&resources(), &ctx()).await.unwrap();
    assert_eq!(report.database_outcome, EnsureOutcome::Existing);
    assert_eq!(report.folders[0].outcome, EnsureOutcome::Existing);
    assert_eq!(report.table("orders"), Some(&TableOutcome::Unchanged));
}

#[tokio::test]
async fn test_added_column_recreates_and_keeps_partitions() {
    let backend = seeded_backend().await;
    let first = scripts(ORDERS);
    ResourceProvisioner::new(&backend, &backend, &first, &AthenaDdlParser)
        .provision(&resources(), &ctx())
        .await
        .unwrap();

    // A partition registered by hand, absent from storage discovery
    backend
        .add_partition(
            "sales_dev",
            "orders",
            &["2024-02-01".to_string()],
            Some("s3://elsewhere/orders/dt=2024-02-01"),
        )
        .await
        .unwrap();

    let second = scripts(ORDERS_WITH_REGION);
    let report = ResourceProvisioner::new(&backend, &backend, &second, &AthenaDdlParser)
        .provision(&resources(), &ctx())
        .await
        .unwrap();

    assert_eq!(
        report.table("orders"),
        Some(&TableOutcome::Recreated {
            partitions_before: 4,
            partitions_after: 4,
        })
    );
    let snapshot = backend.get_table("sales_dev", "orders").await.unwrap().unwrap();
    assert_eq!(snapshot.columns.len(), 3);
    assert_eq!(snapshot.columns[2].name, "region");
}

#[tokio::test]
async fn test_partition_loss_fails_the_table() {
    let backend = seeded_backend().await;
    let first = scripts(ORDERS);
    ResourceProvisioner::new(&backend, &backend, &first, &AthenaDdlParser)
        .provision(&resources(), &ctx())
        .await
        .unwrap();

    backend.inject(Fault::SilentPartitionLoss("orders".to_string())).await;
    let second = scripts(ORDERS_WITH_REGION);
    let report = ResourceProvisioner::new(&backend, &backend, &second, &AthenaDdlParser)
        .provision(&resources(), &ctx())
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Failed);
    match report.table("orders") {
        Some(TableOutcome::Failed { reason }) => {
            assert!(reason.contains("3 before recreate, 0 after"), "{}", reason)
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_catalog_creates_nothing() {
    let backend = seeded_backend().await;
    backend.inject(Fault::CatalogUnreachable).await;
    let scripts = scripts(ORDERS);

    let report = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser)
        .provision(&resources(), &ctx())
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Failed);
    assert!(matches!(report.database_outcome, EnsureOutcome::Failed { .. }));
    assert!(matches!(report.table("orders"), Some(TableOutcome::Failed { .. })));
    assert!(backend.state().await.databases.is_empty());
}

#[tokio::test]
async fn test_unreadable_table_is_not_treated_as_absent() {
    let backend = seeded_backend().await;
    let scripts = scripts(ORDERS);
    let provisioner = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser);
    provisioner.provision(&resources(), &ctx()).await.unwrap();

    backend.inject(Fault::GetTable("orders".to_string())).await;
    let report = provisioner.provision(&resources(), &ctx()).await.unwrap();

    match report.table("orders") {
        Some(TableOutcome::Failed { reason }) => assert!(reason.contains("catalog access failed")),
        other => panic!("expected failure, got {:?}", other),
    }
    // Still the original table with its partitions
    assert_eq!(
        backend.state().await.table("sales_dev", "orders").unwrap().partitions.len(),
        3
    );
}

#[tokio::test]
async fn test_folder_failure_blocks_tables() {
    let backend = seeded_backend().await;
    backend.inject(Fault::CreateFolder("warehouse/sales".to_string())).await;
    let scripts = scripts(ORDERS);

    let report = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser)
        .provision(&resources(), &ctx())
        .await
        .unwrap();

    assert!(matches!(report.folders[0].outcome, EnsureOutcome::Failed { .. }));
    assert!(matches!(report.database_outcome, EnsureOutcome::Skipped { .. }));
    assert_eq!(report.tables.len(), 1);
    match report.table("orders") {
        Some(TableOutcome::Failed { reason }) => assert!(reason.contains("prerequisite folder")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_table_failure_does_not_abort_batch() {
    let mut config = resources();
    let mut view = config.athena_tables[0].clone();
    view.table_name = "order_totals".to_string();
    view.script_name = "order_totals.sql".to_string();
    view.partitioned = false;
    let mut broken = config.athena_tables[0].clone();
    broken.table_name = "returns".to_string();
    broken.script_name = "missing.sql".to_string();
    config.athena_tables.insert(0, broken);
    config.athena_tables.push(view);

    let backend = seeded_backend().await;
    let scripts = scripts(ORDERS);
    let provisioner = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser);
    let report = provisioner.provision(&config, &ctx()).await.unwrap();

    let names: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(names, vec!["returns", "orders", "order_totals"]);
    assert!(matches!(report.table("returns"), Some(TableOutcome::Failed { .. })));
    assert_eq!(report.table("orders"), Some(&TableOutcome::Created { partitions: 3 }));
    assert_eq!(report.table("order_totals"), Some(&TableOutcome::Created { partitions: 0 }));

    // Views are refreshed on every run
    let again = provisioner.provision(&config, &ctx()).await.unwrap();
    assert_eq!(
        again.table("order_totals"),
        Some(&TableOutcome::Recreated {
            partitions_before: 0,
            partitions_after: 0,
        })
    );
    let view = backend.get_table("sales_dev", "order_totals").await.unwrap().unwrap();
    assert_eq!(view.kind, TableKind::View);
}

#[tokio::test]
async fn test_partition_flag_without_clause_conflicts() {
    let unpartitioned = "CREATE EXTERNAL TABLE %%DATABASE%%.orders (order_id bigint)
        STORED AS PARQUET LOCATION '%%LOCATION%%'";
    let backend = seeded_backend().await;
    let scripts = scripts(unpartitioned);

    let report = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser)
        .provision(&resources(), &ctx())
        .await
        .unwrap();
    match report.table("orders") {
        Some(TableOutcome::Failed { reason }) => assert!(reason.contains("PARTITIONED BY")),
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_context_is_fatal() {
    let backend = EmulatorBackend::in_memory();
    let scripts = scripts(ORDERS);
    let err = ResourceProvisioner::new(&backend, &backend, &scripts, &AthenaDdlParser)
        .provision(&resources(), &RunContext::new("rdms", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(backend.state().await.folders.is_empty());
}
