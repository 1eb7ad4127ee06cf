//! DDL script sources for local runs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lakedeploy_core::backend::ScriptSource;
use lakedeploy_core::config::TableDescriptor;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Reads `<root>/<sql_folder>/<script_name>` from the local filesystem
#[derive(Debug, Clone)]
pub struct DirectoryScripts {
    root: PathBuf,
}

impl DirectoryScripts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ScriptSource for DirectoryScripts {
    async fn fetch_script(&self, table: &TableDescriptor) -> Result<String> {
        let path = self.root.join(table.script_path().trim_start_matches('/'));
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read DDL script {}", path.display()))
    }
}

/// Scripts keyed by `sql_folder/script_name`
#[derive(Debug, Clone, Default)]
pub struct InMemoryScripts {
    scripts: BTreeMap<String, String>,
}

impl InMemoryScripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, path: impl Into<String>, ddl: impl Into<String>) -> Self {
        self.scripts.insert(path.into(), ddl.into());
        self
    }
}

#[async_trait]
impl ScriptSource for InMemoryScripts {
    async fn fetch_script(&self, table: &TableDescriptor) -> Result<String> {
        let path = table.script_path();
        self.scripts
            .get(&path)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {}", path))
    }
}
