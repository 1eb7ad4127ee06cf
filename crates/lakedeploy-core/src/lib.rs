//! # lakedeploy core
//!
//! Configuration model, schema reconciliation and permission resolution
//! for provisioning an Athena / Lake Formation data-lake catalog.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod inspector;
pub mod permissions;
pub mod provision;
pub mod reconcile;
pub mod report;
pub mod types;

pub use backend::*;
pub use config::*;
pub use context::*;
pub use error::{Error, Result};
pub use executor::GrantExecutor;
pub use inspector::{CatalogInspector, NameFilter};
pub use permissions::{CatalogResolution, PermissionResolver};
pub use provision::ResourceProvisioner;
pub use reconcile::{detect_drift, reconcile, Drift, ReconcileDecision};
pub use report::*;
pub use types::*;
