use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use vigil_core::executor::Interpreter;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub engine: FileEngineConfig,
    #[serde(default)]
    pub relay: FileRelayConfig,
    #[serde(default)]
    pub auth: FileAuthConfig,
    #[serde(default)]
    pub store: FileStoreConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_limit: Option<usize>,
}

/// Durations are humantime strings such as `"45m"` or `"30s"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileEngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub interpreters: HashMap<String, Interpreter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguous_checks: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRelayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overflow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_grace: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// Scope overrides keyed by service group label.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub scopes: HashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_token: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub checks_root: Option<PathBuf>,
    pub boundary: Option<String>,
    pub worker_path: Option<PathBuf>,
    pub batch_timeout: Option<String>,
    pub check_timeout: Option<String>,
    pub ambiguous_checks: Option<String>,
    pub callback_timeout: Option<String>,
    pub queue_capacity: Option<usize>,
    pub overflow: Option<String>,
    pub authority: Option<String>,
    pub static_token: Option<String>,
    pub database_url: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from arbitrary `(name, value)` pairs instead of the process
    /// environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            config_path: var("VIGIL_CONFIG").map(PathBuf::from),
            server_host: var("VIGIL_HOST"),
            server_port: var("VIGIL_PORT").and_then(|s| s.parse().ok()),
            checks_root: var("VIGIL_CHECKS_ROOT").map(PathBuf::from),
            boundary: var("VIGIL_BOUNDARY"),
            worker_path: var("VIGIL_WORKER_PATH").map(PathBuf::from),
            batch_timeout: var("VIGIL_BATCH_TIMEOUT"),
            check_timeout: var("VIGIL_CHECK_TIMEOUT"),
            ambiguous_checks: var("VIGIL_AMBIGUOUS_CHECKS"),
            callback_timeout: var("VIGIL_CALLBACK_TIMEOUT"),
            queue_capacity: var("VIGIL_CALLBACK_QUEUE").and_then(|s| s.parse().ok()),
            overflow: var("VIGIL_OVERFLOW_POLICY"),
            authority: var("VIGIL_AUTHORITY"),
            static_token: var("VIGIL_STATIC_TOKEN"),
            database_url: var("VIGIL_DATABASE_URL").or_else(|| var("DATABASE_URL")),
        }
    }
}
