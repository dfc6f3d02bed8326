//! Process wiring shared by the server, the `run` command and the worker.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use vigil_config::{Config, ConfigWarnings, StoreConfig};
use vigil_core::{
    BatchPlanner, BatchRunner, CheckRegistry, DependencyClassifier, InMemoryScanStore,
    ScanManager, ScanStore, ScriptCheckRunner, SessionProvider,
    executor::{OAuthSessionProvider, StaticSessionProvider, select_boundary},
};

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

pub fn log_config_warnings(warnings: &ConfigWarnings) {
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

/// Session provider and check runner for one boundary.
pub fn build_batch_runner(config: &Config, http: reqwest::Client) -> BatchRunner {
    let sessions: Arc<dyn SessionProvider> = match &config.auth.static_token {
        Some(token) => Arc::new(StaticSessionProvider::new(token.expose())),
        None => Arc::new(OAuthSessionProvider::new(
            http,
            config.auth.authority.clone(),
            config.auth.scopes.clone(),
        )),
    };
    let runner = ScriptCheckRunner::new(
        config.engine.interpreters.clone(),
        config.engine.check_timeout,
    );
    BatchRunner::new(sessions, Arc::new(runner))
}

pub fn build_registry(config: &Config) -> CheckRegistry {
    CheckRegistry::new(&config.engine.checks_root).with_extensions(config.engine.unit_extensions())
}

pub async fn build_store(store: &StoreConfig) -> anyhow::Result<Arc<dyn ScanStore>> {
    match store {
        StoreConfig::Memory => Ok(Arc::new(InMemoryScanStore::new())),
        #[cfg(feature = "postgres")]
        StoreConfig::Postgres { url } => {
            let store = vigil_core::store::PostgresScanStore::connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            store.migrate().await.context("database migration failed")?;
            info!("scan store: postgres");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreConfig::Postgres { .. } => anyhow::bail!(
            "a database URL is configured but this build lacks the `postgres` feature"
        ),
    }
}

pub async fn build_scan_manager(config: &Config) -> anyhow::Result<ScanManager> {
    let http = http_client()?;
    let engine = &config.engine;

    let worker_args = match &config.metadata.config_path {
        Some(path) => vec!["--config".to_string(), path.display().to_string()],
        None => Vec::new(),
    };
    let boundary = select_boundary(
        engine.boundary,
        engine.worker_path.clone(),
        worker_args,
        engine.batch_timeout,
        || build_batch_runner(config, http.clone()),
    );
    let store = build_store(&config.store).await?;

    info!(
        checks_root = %engine.checks_root.display(),
        boundary = boundary.name(),
        store = config.store.label(),
        ambiguous_checks = %engine.ambiguous_checks,
        "scan engine ready"
    );

    Ok(ScanManager::builder(build_registry(config), boundary, store)
        .planner(BatchPlanner::new(
            DependencyClassifier::new(),
            engine.ambiguous_checks,
        ))
        .relay(config.relay.settings())
        .http_client(http)
        .build())
}
