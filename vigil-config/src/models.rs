use std::{collections::HashMap, path::PathBuf, time::Duration};

use url::Url;
use vigil_core::{
    AmbiguityPolicy, OverflowPolicy,
    executor::{BoundaryKind, GroupScopes, Interpreter},
    relay::{CallbackSettings, RelaySettings},
};
use vigil_model::Secret;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub relay: RelayConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for `GET /api/v1/scans`.
    pub list_limit: usize,
}

/// Check discovery and execution settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one sub-directory of check units per technology.
    pub checks_root: PathBuf,
    pub boundary: BoundaryKind,
    /// Explicit worker binary; discovered when absent.
    pub worker_path: Option<PathBuf>,
    pub batch_timeout: Duration,
    pub check_timeout: Duration,
    /// Interpreter per unit file extension (without the dot).
    pub interpreters: HashMap<String, Interpreter>,
    pub ambiguous_checks: AmbiguityPolicy,
}

impl EngineConfig {
    pub fn unit_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<_> = self.interpreters.keys().cloned().collect();
        extensions.sort();
        extensions
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub callback_timeout: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub broadcast_capacity: usize,
    pub history_capacity: usize,
    pub drain_grace: Duration,
}

impl RelayConfig {
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            history_capacity: self.history_capacity,
            broadcast_capacity: self.broadcast_capacity,
            callback: CallbackSettings {
                timeout: self.callback_timeout,
                queue_capacity: self.queue_capacity,
                overflow: self.overflow,
            },
            drain_grace: self.drain_grace,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        let defaults = RelaySettings::default();
        Self {
            callback_timeout: defaults.callback.timeout,
            queue_capacity: defaults.callback.queue_capacity,
            overflow: defaults.callback.overflow,
            broadcast_capacity: defaults.broadcast_capacity,
            history_capacity: defaults.history_capacity,
            drain_grace: defaults.drain_grace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Identity authority host; tokens come from `{authority}/{tenant}/oauth2/v2.0/token`.
    pub authority: Url,
    pub scopes: GroupScopes,
    /// Fixed bearer token for every session instead of client credentials.
    pub static_token: Option<Secret>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Postgres { url: String },
}

impl StoreConfig {
    pub fn label(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
