//! # lakedeploy AWS backend
//!
//! Collaborator implementations on top of the AWS SDK: Glue for catalog
//! reads, Athena for DDL execution, Lake Formation for grants and S3 for
//! folders and DDL scripts.

use anyhow::{anyhow, bail, Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use lakedeploy_core::context::{RunContext, OUTPUT_BUCKET_LABEL};
use std::time::Duration;
use tracing::debug;

pub mod catalog;
pub mod lakeformation;
pub mod s3;

pub use s3::S3Scripts;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// AWS backend implementing the catalog, permission and storage services
pub struct AwsBackend {
    glue: aws_sdk_glue::Client,
    athena: aws_sdk_athena::Client,
    lakeformation: aws_sdk_lakeformation::Client,
    s3: aws_sdk_s3::Client,
    ctx: RunContext,
}

impl AwsBackend {
    /// Create a backend from the default credential chain
    pub async fn new(ctx: RunContext) -> Result<Self> {
        Self::with_config(None, None, None, ctx).await
    }

    /// Create a backend with an explicit region, profile or endpoint
    pub async fn with_config(
        region: Option<String>,
        profile: Option<String>,
        endpoint: Option<String>,
        ctx: RunContext,
    ) -> Result<Self> {
        let region = region.unwrap_or_else(|| ctx.region.clone());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        // Custom endpoint, e.g. LocalStack
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let config = loader.load().await;
        debug!(region = ?config.region(), "loaded AWS configuration");

        Ok(Self {
            glue: aws_sdk_glue::Client::new(&config),
            athena: aws_sdk_athena::Client::new(&config),
            lakeformation: aws_sdk_lakeformation::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            ctx,
        })
    }

    /// Script source reading from the application bucket
    pub fn scripts(&self) -> S3Scripts {
        S3Scripts::new(self.s3.clone(), &self.ctx)
    }

    fn workgroup(&self) -> String {
        format!("{}-etl", self.ctx.product)
    }

    fn default_staging(&self) -> String {
        format!("s3://{}/lakedeploy", self.ctx.bucket_name(OUTPUT_BUCKET_LABEL))
    }

    /// Run an Athena statement and wait for it to finish
    async fn run_query(&self, sql: &str, database: Option<&str>, staging: Option<&str>) -> Result<()> {
        let output = staging.map_or_else(|| self.default_staging(), str::to_string);
        let mut request = self
            .athena
            .start_query_execution()
            .query_string(sql)
            .work_group(self.workgroup())
            .result_configuration(ResultConfiguration::builder().output_location(output).build());
        if let Some(database) = database {
            request = request
                .query_execution_context(QueryExecutionContext::builder().database(database).build());
        }

        let started = request
            .send()
            .await
            .with_context(|| format!("StartQueryExecution failed for: {}", first_line(sql)))?;
        let id = started
            .query_execution_id()
            .ok_or_else(|| anyhow!("Athena returned no query execution id"))?
            .to_string();
        debug!(query_id = %id, statement = %first_line(sql), "query started");

        let timeout = self.ctx.query_timeout();
        tokio::time::timeout(timeout, self.wait_for(&id))
            .await
            .map_err(|_| anyhow!("query {} did not finish within {:?}", id, timeout))?
    }

    async fn wait_for(&self, id: &str) -> Result<()> {
        loop {
            let response = self
                .athena
                .get_query_execution()
                .query_execution_id(id)
                .send()
                .await
                .with_context(|| format!("GetQueryExecution {}", id))?;
            let status = response.query_execution().and_then(|q| q.status());
            match status.and_then(|s| s.state()) {
                Some(QueryExecutionState::Succeeded) => return Ok(()),
                Some(QueryExecutionState::Failed) | Some(QueryExecutionState::Cancelled) => {
                    let reason = status
                        .and_then(|s| s.state_change_reason())
                        .unwrap_or("no reason given");
                    bail!("query {} failed: {}", id, reason);
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }
}

fn first_line(sql: &str) -> &str {
    sql.trim().lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("\n  CREATE EXTERNAL TABLE t (\n id int)"), "CREATE EXTERNAL TABLE t (");
        assert_eq!(first_line(""), "");
    }
}
