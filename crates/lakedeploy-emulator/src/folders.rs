//! Emulated S3 folder prefixes

use anyhow::Result;
use async_trait::async_trait;
use lakedeploy_core::backend::StorageService;

use crate::{EmulatorBackend, Fault};

#[async_trait]
impl StorageService for EmulatorBackend {
    async fn folder_exists(&self, bucket_label: &str, prefix: &str) -> Result<bool> {
        let prefix = prefix.trim_matches('/');
        self.read(|state| {
            Ok(state
                .folders
                .get(bucket_label)
                .map_or(false, |folders| folders.contains(prefix)))
        })
        .await
    }

    async fn create_folder(&self, bucket_label: &str, prefix: &str) -> Result<()> {
        let prefix = prefix.trim_matches('/');
        self.check(
            "PutObject",
            false,
            Some(Fault::CreateFolder(prefix.to_string())),
        )
        .await?;
        self.mutate(|state| {
            state
                .folders
                .entry(bucket_label.to_string())
                .or_default()
                .insert(prefix.to_string());
            Ok(())
        })
        .await
    }
}
