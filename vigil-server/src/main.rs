//! # Vigil Server
//!
//! Compliance scan execution engine.
//!
//! - `vigil-server` (or `vigil-server serve`) exposes the scan API over HTTP
//!   with live progress as server-sent events
//! - `vigil-server run <technology>` executes one scan in the foreground and
//!   writes the completion payload
//! - `vigil-server plan <technology>` prints the batch plan without executing

use std::{fs, net::SocketAddr, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;
use vigil_config::{Config, ConfigLoad, ConfigLoader, StoreConfig};
use vigil_core::{
    OutputFormat, RegistryQuery, ScanRequest,
    output::{completion_payload, exit_code, write_completion, write_completion_to_path},
};
use vigil_model::{CheckId, ScanId, Secret, Severity, TargetCredentials};
use vigil_server::{
    AppState, create_app,
    handlers::checks::CheckListResponse,
    infra::{
        startup::{build_scan_manager, log_config_warnings},
        telemetry::{LogTarget, SERVER_LOG_FILTER, init_tracing},
    },
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(about = "Compliance scan execution engine with isolated batch workers")]
struct Cli {
    /// Path to vigil.toml (overrides discovery)
    #[arg(short, long, env = "VIGIL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Run one scan in the foreground and write its completion payload
    Run(RunArgs),
    /// Print the batch plan for a technology without executing anything
    Plan(PlanArgs),
}

#[derive(ClapArgs, Debug)]
struct TargetArgs {
    /// JSON file holding the full credential bundle; wins over the flags below
    #[arg(long)]
    credentials: Option<PathBuf>,

    #[arg(long, env = "VIGIL_TENANT_ID")]
    tenant_id: Option<String>,

    #[arg(long, env = "VIGIL_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "VIGIL_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Primary tenant domain for mail and compliance sessions
    #[arg(long, env = "VIGIL_ORGANIZATION")]
    organization: Option<String>,

    /// Tenant admin endpoint for platform sessions
    #[arg(long, env = "VIGIL_ADMIN_URL")]
    admin_url: Option<Url>,

    #[arg(long)]
    display_name: Option<String>,
}

impl TargetArgs {
    fn into_credentials(self) -> anyhow::Result<TargetCredentials> {
        if let Some(path) = self.credentials {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read credentials {}", path.display()))?;
            return serde_json::from_str(&raw)
                .with_context(|| format!("invalid credentials file {}", path.display()));
        }

        let tenant_id = self
            .tenant_id
            .context("a tenant id is required (--tenant-id or VIGIL_TENANT_ID)")?;
        let client_id = self
            .client_id
            .context("a client id is required (--client-id or VIGIL_CLIENT_ID)")?;
        Ok(TargetCredentials {
            tenant_id,
            client_id,
            client_secret: self.client_secret.map(Secret::new),
            organization: self.organization,
            admin_url: self.admin_url,
            display_name: self.display_name,
        })
    }
}

#[derive(ClapArgs, Debug)]
struct FilterArgs {
    /// Restrict to these check identifiers (comma separated or repeated)
    #[arg(long = "check-id", value_delimiter = ',')]
    check_ids: Vec<String>,

    /// Drop checks below this severity
    #[arg(long)]
    min_severity: Option<Severity>,
}

impl FilterArgs {
    fn check_ids(&self) -> Option<Vec<CheckId>> {
        if self.check_ids.is_empty() {
            None
        } else {
            Some(self.check_ids.iter().map(|id| CheckId::from(id.as_str())).collect())
        }
    }
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Technology selector, i.e. the checks sub-directory to run
    technology: String,

    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    filters: FilterArgs,

    /// Write the completion payload here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Payload format: json or json-lines
    #[arg(long, default_value = "json")]
    format: OutputFormat,

    /// Address receiving one POST per progress update
    #[arg(long)]
    callback_url: Option<Url>,

    #[arg(long)]
    scan_id: Option<Uuid>,
}

#[derive(ClapArgs, Debug)]
struct PlanArgs {
    technology: String,

    #[command(flatten)]
    filters: FilterArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            run_server(cli.config, cli.serve).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Run(args)) => run_scan(cli.config, args).await,
        Some(Command::Plan(args)) => {
            print_plan(cli.config, args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_runtime_config(config_path: Option<PathBuf>, log_target: LogTarget) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad { config, warnings } = loader.load().context("failed to load configuration")?;

    init_tracing(SERVER_LOG_FILTER, log_target);

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration loaded");
    }
    log_config_warnings(&warnings);

    Ok(config)
}

async fn run_server(config_path: Option<PathBuf>, args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_runtime_config(config_path, LogTarget::Stdout)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    let manager = build_scan_manager(&config).await?;
    let state = AppState::new(manager, config.server.list_limit);
    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "vigil server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn run_scan(config_path: Option<PathBuf>, args: RunArgs) -> anyhow::Result<ExitCode> {
    // stdout may carry the payload; logs go to stderr.
    let config = load_runtime_config(config_path, LogTarget::Stderr)?;
    let manager = build_scan_manager(&config).await?;

    let scan_id = args.scan_id.map(ScanId::from).unwrap_or_default();
    let mut request = ScanRequest::new(args.target.into_credentials()?, args.technology)
        .with_scan_id(scan_id);
    request.check_ids = args.filters.check_ids();
    request.min_severity = args.filters.min_severity;
    request.callback_url = args.callback_url;

    let cancel_manager = manager.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(%scan_id, "interrupt received; cancelling scan");
            if let Err(err) = cancel_manager.cancel_scan(scan_id).await {
                warn!(%scan_id, error = %err, "cancellation not applied");
            }
        }
    });

    let scan = manager.execute(request).await?;
    signal_task.abort();

    let results = manager.results(scan.id).await?;
    let payload = completion_payload(&scan, results);
    match &args.output {
        Some(path) => {
            write_completion_to_path(path, &payload, args.format)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "completion payload written");
        }
        None => write_completion(std::io::stdout().lock(), &payload, args.format)
            .context("failed to write completion payload")?,
    }

    let code = exit_code(&payload);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

async fn print_plan(config_path: Option<PathBuf>, args: PlanArgs) -> anyhow::Result<()> {
    let mut config = load_runtime_config(config_path, LogTarget::Stderr)?;
    // Planning never touches persisted scans.
    config.store = StoreConfig::Memory;
    let manager = build_scan_manager(&config).await?;

    let mut query = RegistryQuery::new(args.technology.clone());
    if let Some(ids) = args.filters.check_ids() {
        query = query.with_check_ids(ids);
    }
    if let Some(severity) = args.filters.min_severity {
        query = query.with_min_severity(severity);
    }

    let preview = manager.plan(query, None).await?;
    let listing = CheckListResponse::from_preview(args.technology, preview);
    serde_json::to_writer_pretty(std::io::stdout().lock(), &listing)
        .context("failed to write plan")?;
    println!();
    Ok(())
}
