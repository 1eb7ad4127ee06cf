//! Explicit per-run context, passed into every pipeline entry point

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Logging verbosity requested for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Bucket label receiving query output
pub const OUTPUT_BUCKET_LABEL: &str = "output";
/// Bucket label holding DDL scripts
pub const SCRIPT_BUCKET_LABEL: &str = "app";

/// Account ids read from the environment arrive as numbers
fn account_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AccountId {
        Text(String),
        Number(u64),
    }

    Ok(Option::<AccountId>::deserialize(deserializer)?.map(|id| match id {
        AccountId::Text(text) => text,
        AccountId::Number(number) => format!("{:012}", number),
    }))
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_query_timeout_secs() -> u64 {
    300
}

/// Environment, region and naming inputs for a single provisioning or
/// permission run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Product the resources belong to (e.g. `rdms`)
    pub product: String,
    /// Target environment (e.g. `dev`, `qa`, `prod`)
    pub environment: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub log_level: LogLevel,
    /// AWS account used to build role ARNs from bare principal labels
    #[serde(default, deserialize_with = "account_id")]
    pub account_id: Option<String>,
    /// Bucket label -> bucket name overrides
    #[serde(default)]
    pub buckets: BTreeMap<String, String>,
    /// Upper bound for a single catalog query to complete
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl RunContext {
    pub fn new(product: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            environment: environment.into(),
            region: default_region(),
            log_level: LogLevel::default(),
            account_id: None,
            buckets: BTreeMap::new(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_bucket(mut self, label: impl Into<String>, bucket: impl Into<String>) -> Self {
        self.buckets.insert(label.into(), bucket.into());
        self
    }

    /// Resolve a bucket label to a bucket name.
    ///
    /// Labels without an explicit mapping follow the stack naming convention
    /// `<product>-<environment>-<label>`.
    pub fn bucket_name(&self, label: &str) -> String {
        match self.buckets.get(label) {
            Some(bucket) => bucket.clone(),
            None => format!("{}-{}-{}", self.product, self.environment, label),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.product.trim().is_empty() {
            return Err(Error::configuration("product must not be empty"));
        }
        if self.environment.trim().is_empty() {
            return Err(Error::configuration(
                "environment must not be empty (set LAKEDEPLOY__ENVIRONMENT or --environment)",
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err(Error::configuration("query_timeout_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_resolution() {
        let ctx = RunContext::new("rdms", "dev").with_bucket("app", "rdms-app-bucket");
        assert_eq!(ctx.bucket_name("app"), "rdms-app-bucket");
        assert_eq!(ctx.bucket_name("data"), "rdms-dev-data");
    }

    #[test]
    fn test_validate_rejects_empty_environment() {
        let ctx = RunContext::new("rdms", " ");
        assert!(matches!(ctx.validate(), Err(Error::Configuration(_))));
        assert!(RunContext::new("rdms", "qa").validate().is_ok());
    }

    #[test]
    fn test_deserialize_defaults() {
        let ctx: RunContext =
            serde_json::from_str(r#"{"product": "rdms", "environment": "uat"}"#).unwrap();
        assert_eq!(ctx.region, "us-west-2");
        assert_eq!(ctx.log_level, LogLevel::Info);
        assert_eq!(ctx.query_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_numeric_account_id() {
        let ctx: RunContext = serde_json::from_str(
            r#"{"product": "rdms", "environment": "dev", "account_id": 11111111111}"#,
        )
        .unwrap();
        assert_eq!(ctx.account_id.as_deref(), Some("011111111111"));
    }
}
