use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lakedeploy_aws::{AwsBackend, S3Scripts};
use lakedeploy_core::*;
use lakedeploy_emulator::{DirectoryScripts, EmulatorBackend, StateExporter};
use lakedeploy_parser::AthenaDdlParser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

mod logging;
mod settings;

use logging::LogFormat;
use settings::ContextOverrides;

#[derive(Parser)]
#[command(name = "lakedeploy")]
#[command(about = "Provision data-lake catalog resources and Lake Formation permissions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend the run talks to
    #[arg(long, value_enum, default_value_t = BackendKind::Emulator, env = "LAKEDEPLOY_BACKEND", global = true)]
    backend: BackendKind,

    /// Emulator state file (optional)
    #[arg(short, long, global = true)]
    state_file: Option<String>,

    /// Directory holding DDL scripts for the emulator backend
    #[arg(long, global = true)]
    scripts_dir: Option<String>,

    #[arg(long, global = true)]
    region: Option<String>,

    /// AWS profile name
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Custom AWS endpoint, e.g. LocalStack
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// JSON settings file for the run context
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Target environment (dev, qa, prod, ...)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    #[arg(long, global = true)]
    product: Option<String>,

    #[arg(long, global = true)]
    account_id: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Emulator,
    Aws,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure folders, database and tables exist and match their DDL
    Provision {
        /// Application resource document
        #[arg(short, long)]
        resources: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Grant or revoke the permissions of a permission document
    Permissions {
        #[arg(value_enum)]
        direction: DirectionArg,
        #[arg(short, long)]
        resources: PathBuf,
        #[arg(short, long)]
        permissions: PathBuf,
        /// Only tables whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Only tables whose name ends with this suffix
        #[arg(long)]
        suffix: Option<String>,
        /// Print the planned operations without applying them
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Check configuration documents (and local DDL scripts) without touching any backend
    Validate {
        #[arg(short, long)]
        resources: Option<PathBuf>,
        #[arg(short, long)]
        permissions: Option<PathBuf>,
    },
    /// Print every current grant as one JSON document per line
    ListGrants,
    /// Show emulator state
    Status {
        #[arg(short, long, value_enum, default_value_t = StatusFormat::Summary)]
        format: StatusFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    Grant,
    Revoke,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Grant => Direction::Grant,
            DirectionArg::Revoke => Direction::Revoke,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusFormat {
    Summary,
    Ddl,
}

impl Cli {
    fn backend_config(&self) -> BackendConfig {
        match self.backend {
            BackendKind::Emulator => BackendConfig::Emulator {
                state_file: self.state_file.clone(),
                scripts_dir: self.scripts_dir.clone(),
            },
            BackendKind::Aws => BackendConfig::Aws {
                region: self.region.clone(),
                profile: self.profile.clone(),
                endpoint: self.endpoint.clone(),
            },
        }
    }

    fn overrides(&self) -> ContextOverrides {
        ContextOverrides {
            product: self.product.clone(),
            environment: self.environment.clone(),
            region: self.region.clone(),
            log_level: None,
            account_id: self.account_id.clone(),
        }
    }
}

/// The collaborators of one run
enum Backend {
    Emulator {
        backend: EmulatorBackend,
        scripts: DirectoryScripts,
    },
    Aws {
        backend: AwsBackend,
        scripts: S3Scripts,
    },
}

impl Backend {
    async fn connect(config: BackendConfig, ctx: &RunContext) -> Result<Self> {
        match config {
            BackendConfig::Emulator {
                state_file,
                scripts_dir,
            } => {
                let backend = EmulatorBackend::new(state_file).await?;
                let scripts = DirectoryScripts::new(scripts_dir.unwrap_or_else(|| ".".to_string()));
                Ok(Backend::Emulator { backend, scripts })
            }
            BackendConfig::Aws {
                region,
                profile,
                endpoint,
            } => {
                let backend = AwsBackend::with_config(region, profile, endpoint, ctx.clone()).await?;
                let scripts = backend.scripts();
                Ok(Backend::Aws { backend, scripts })
            }
        }
    }

    fn catalog(&self) -> &dyn CatalogService {
        match self {
            Backend::Emulator { backend, .. } => backend,
            Backend::Aws { backend, .. } => backend,
        }
    }

    fn permissions(&self) -> &dyn PermissionService {
        match self {
            Backend::Emulator { backend, .. } => backend,
            Backend::Aws { backend, .. } => backend,
        }
    }

    fn storage(&self) -> &dyn StorageService {
        match self {
            Backend::Emulator { backend, .. } => backend,
            Backend::Aws { backend, .. } => backend,
        }
    }

    fn scripts(&self) -> &dyn ScriptSource {
        match self {
            Backend::Emulator { scripts, .. } => scripts,
            Backend::Aws { scripts, .. } => scripts,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(RunStatus::Succeeded) => ExitCode::SUCCESS,
        Ok(RunStatus::Failed) => ExitCode::from(1),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<RunStatus> {
    let ctx = settings::load_context(cli.settings.as_deref(), &cli.overrides())?;
    logging::init(ctx.log_level, cli.log_format)?;
    ctx.validate()?;
    info!(product = %ctx.product, environment = %ctx.environment, backend = ?cli.backend, "starting run");

    match &cli.command {
        Commands::Validate {
            resources,
            permissions,
        } => validate(&ctx, cli.scripts_dir.as_deref(), resources.as_deref(), permissions.as_deref()).await,

        Commands::Provision { resources, json } => {
            let config = ResourceConfig::from_json(&read(resources)?)?;
            let backend = Backend::connect(cli.backend_config(), &ctx).await?;
            let provisioner = ResourceProvisioner::new(
                backend.catalog(),
                backend.storage(),
                backend.scripts(),
                &AthenaDdlParser,
            );
            let report = provisioner.provision(&config, &ctx).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("📦 Provisioning {}", report.database);
                println!("{}", report);
            }
            Ok(report.status())
        }

        Commands::Permissions {
            direction,
            resources,
            permissions,
            prefix,
            suffix,
            dry_run,
            json,
        } => {
            let resources = ResourceConfig::from_json(&read(resources)?)?;
            let config = PermissionConfig::from_json(&read(permissions)?)?;
            let filter = NameFilter::new(prefix.clone(), suffix.clone());
            let filter = (!filter.is_empty()).then_some(filter);

            let backend = Backend::connect(cli.backend_config(), &ctx).await?;
            let inspector = CatalogInspector::new(backend.catalog());
            let resolution = PermissionResolver::new(&resources, &ctx)
                .resolve_against_catalog(&inspector, &config, filter.as_ref(), (*direction).into())
                .await?;
            if !resolution.missing_tables.is_empty() {
                eprintln!(
                    "⚠️  grants skipped, tables not in catalog: {}",
                    resolution.missing_tables.join(", ")
                );
            }
            let operations = resolution.operations;

            if *dry_run {
                for operation in &operations {
                    println!("{}", operation);
                }
                println!("🔍 {} operation(s) planned", operations.len());
                return Ok(RunStatus::Succeeded);
            }

            let report = GrantExecutor::new(backend.permissions()).execute(&operations).await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("🔐 {} on {}", Direction::from(*direction), config.database.resolved_name(&ctx));
                println!("{}", report);
            }
            Ok(report.status())
        }

        Commands::ListGrants => {
            let backend = Backend::connect(cli.backend_config(), &ctx).await?;
            for record in backend.permissions().list_grants().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(RunStatus::Succeeded)
        }

        Commands::Status { format } => {
            let Backend::Emulator { backend, .. } = Backend::connect(cli.backend_config(), &ctx).await? else {
                bail!("status is only available for the emulator backend");
            };
            let state = backend.state().await;
            match format {
                StatusFormat::Ddl => println!("{}", StateExporter::to_ddl(&state)),
                StatusFormat::Summary => println!("{}", StateExporter::to_summary(&state)),
            }
            Ok(RunStatus::Succeeded)
        }
    }
}

async fn validate(
    ctx: &RunContext,
    scripts_dir: Option<&str>,
    resources: Option<&Path>,
    permissions: Option<&Path>,
) -> Result<RunStatus> {
    if resources.is_none() && permissions.is_none() {
        bail!("nothing to validate: pass --resources and/or --permissions");
    }

    let resources = resources
        .map(|path| ResourceConfig::from_json(&read(path)?).map_err(anyhow::Error::from))
        .transpose()?;
    let permissions = permissions
        .map(|path| PermissionConfig::from_json(&read(path)?).map_err(anyhow::Error::from))
        .transpose()?;

    if let (Some(resources), Some(permissions)) = (&resources, &permissions) {
        PermissionResolver::new(resources, ctx).check_references(permissions)?;
        println!("✅ permission document matches the resource document");
    }

    let mut status = RunStatus::Succeeded;
    if let Some(resources) = &resources {
        println!(
            "✅ resources: database {}, {} table(s), {} folder(s)",
            resources.database.resolved_name(ctx),
            resources.athena_tables.len(),
            resources.folders.len()
        );

        // Scripts are only checked when they are available locally
        if let Some(dir) = scripts_dir {
            let scripts = DirectoryScripts::new(dir);
            let database = resources.database.resolved_name(ctx);
            for table in &resources.athena_tables {
                match check_script(&scripts, table, &database, ctx).await {
                    Ok(desired) => println!(
                        "  ✅ {}: {} with {} column(s)",
                        table.table_name,
                        desired.kind,
                        desired.columns.len()
                    ),
                    Err(e) => {
                        warn!(table = %table.table_name, "script check failed");
                        println!("  ❌ {}: {:#}", table.table_name, e);
                        status = RunStatus::Failed;
                    }
                }
            }
        }
    }
    if let Some(permissions) = &permissions {
        println!(
            "✅ permissions: {} table grant(s), {} database grant(s)",
            permissions.grants.len(),
            permissions.database_grants.len()
        );
    }
    Ok(status)
}

async fn check_script(
    scripts: &DirectoryScripts,
    table: &TableDescriptor,
    database: &str,
    ctx: &RunContext,
) -> Result<DesiredTable> {
    let raw = scripts.fetch_script(table).await?;
    let ddl = table.render_script(&raw, database, &table.location(ctx));
    AthenaDdlParser.parse(&ddl)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_permissions_command() {
        let cli = Cli::try_parse_from([
            "lakedeploy",
            "permissions",
            "revoke",
            "--resources",
            "resources.json",
            "--permissions",
            "permissions.json",
            "--suffix",
            "_v2",
            "--environment",
            "qa",
        ])
        .unwrap();
        assert_eq!(cli.environment.as_deref(), Some("qa"));
        assert_eq!(cli.backend, BackendKind::Emulator);
        match cli.command {
            Commands::Permissions {
                direction, suffix, ..
            } => {
                assert_eq!(Direction::from(direction), Direction::Revoke);
                assert_eq!(suffix.as_deref(), Some("_v2"));
            }
            _ => panic!("expected permissions command"),
        }
    }

    #[test]
    fn test_backend_config_follows_flag() {
        let cli = Cli::try_parse_from([
            "lakedeploy",
            "--backend",
            "aws",
            "--region",
            "eu-west-1",
            "list-grants",
        ])
        .unwrap();
        assert!(matches!(
            cli.backend_config(),
            BackendConfig::Aws { region: Some(ref r), .. } if r == "eu-west-1"
        ));
    }
}
