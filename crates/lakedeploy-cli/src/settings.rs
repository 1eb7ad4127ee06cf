//! Run context loading: settings file, then `LAKEDEPLOY__` environment, then flags

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use lakedeploy_core::context::{LogLevel, RunContext};
use serde::Serialize;
use std::path::Path;

#[cfg(not(test))]
const ENV_PREFIX: &str = "LAKEDEPLOY__";
#[cfg(test)]
const ENV_PREFIX: &str = "LAKEDEPLOY_TEST__";

/// Values given on the command line win over every other source
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

fn figment(settings_file: Option<&Path>, overrides: &ContextOverrides) -> Figment {
    let mut figment = Figment::new();
    if let Some(path) = settings_file {
        figment = figment.merge(Json::file(path));
    }
    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Serialized::defaults(overrides))
}

pub fn load_context(settings_file: Option<&Path>, overrides: &ContextOverrides) -> Result<RunContext> {
    if let Some(path) = settings_file {
        if !path.exists() {
            anyhow::bail!("settings file {} does not exist", path.display());
        }
    }
    figment(settings_file, overrides)
        .extract::<RunContext>()
        .context("failed to load run context")
}
