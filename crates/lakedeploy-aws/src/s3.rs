//! S3 folder markers and DDL scripts

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use lakedeploy_core::backend::{ScriptSource, StorageService};
use lakedeploy_core::config::TableDescriptor;
use lakedeploy_core::context::{RunContext, SCRIPT_BUCKET_LABEL};
use tracing::debug;

use crate::AwsBackend;

/// Folder marker key, `a/b/` for prefix `/a/b`
fn folder_key(prefix: &str) -> String {
    format!("{}/", prefix.trim_matches('/'))
}

#[async_trait]
impl StorageService for AwsBackend {
    async fn folder_exists(&self, bucket_label: &str, prefix: &str) -> Result<bool> {
        let bucket = self.ctx.bucket_name(bucket_label);
        let key = folder_key(prefix);
        let listing = self
            .s3
            .list_objects_v2()
            .bucket(&bucket)
            .prefix(&key)
            .max_keys(1)
            .send()
            .await
            .with_context(|| format!("ListObjectsV2 s3://{}/{}", bucket, key))?;
        Ok(listing.key_count().unwrap_or(0) > 0 || !listing.contents().is_empty())
    }

    async fn create_folder(&self, bucket_label: &str, prefix: &str) -> Result<()> {
        let bucket = self.ctx.bucket_name(bucket_label);
        let key = folder_key(prefix);
        self.s3
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .with_context(|| format!("PutObject s3://{}/{}", bucket, key))?;
        debug!(bucket = %bucket, key = %key, "created folder marker");
        Ok(())
    }
}

/// Reads DDL scripts from the application bucket
#[derive(Debug, Clone)]
pub struct S3Scripts {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Scripts {
    pub fn new(client: aws_sdk_s3::Client, ctx: &RunContext) -> Self {
        Self {
            client,
            bucket: ctx.bucket_name(SCRIPT_BUCKET_LABEL),
        }
    }
}

#[async_trait]
impl ScriptSource for S3Scripts {
    async fn fetch_script(&self, table: &TableDescriptor) -> Result<String> {
        let key = table.script_path().trim_start_matches('/').to_string();
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("GetObject s3://{}/{}", self.bucket, key))?;
        let bytes = object
            .body
            .collect()
            .await
            .with_context(|| format!("reading s3://{}/{}", self.bucket, key))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .with_context(|| format!("s3://{}/{} is not valid UTF-8", self.bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_key() {
        assert_eq!(folder_key("/warehouse/sales"), "warehouse/sales/");
        assert_eq!(folder_key("warehouse/sales/"), "warehouse/sales/");
    }
}
