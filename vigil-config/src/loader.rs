use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use once_cell::sync::Lazy;
use thiserror::Error;
use url::Url;
use vigil_core::{
    AmbiguityPolicy, OverflowPolicy,
    executor::{
        BoundaryKind, DEFAULT_BATCH_TIMEOUT, GroupScopes, default_interpreters,
        runner::DEFAULT_CHECK_TIMEOUT, session::DEFAULT_AUTHORITY,
    },
};
use vigil_model::{Secret, ServiceGroup};

use super::{
    models::{
        AuthConfig, Config, ConfigMetadata, EngineConfig, RelayConfig, ServerConfig, StoreConfig,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("vigil.toml"),
        PathBuf::from("config/vigil.toml"),
    ]
});

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Use these values instead of the process environment; also skips `.env`.
    pub env: Option<EnvConfig>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.options.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env_config, env_file_loaded) = match &self.options.env {
            Some(env) => (env.clone(), false),
            None => {
                let loaded = self.load_env_file()?;
                (EnvConfig::gather(), loaded)
            }
        };

        let (file_config, config_path) = self.load_file_config(&env_config)?;
        let config_present = file_config.is_some();

        let (config, warnings) = self.compose_config(
            file_config.unwrap_or_default(),
            env_config,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
            config_present,
        )?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        loaded.or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            _ => Err(ConfigLoadError::EnvFile(err)),
        })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // Explicit and env-provided paths must exist; defaults are optional.
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file: FileConfig,
        env: EnvConfig,
        metadata: ConfigMetadata,
        config_present: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if !config_present {
            warnings.push_with_hint(
                "No vigil.toml detected; using environment variables and defaults",
                "Create vigil.toml or set VIGIL_CONFIG to tune the engine",
            );
        }

        let FileConfig {
            server: file_server,
            engine: file_engine,
            relay: file_relay,
            auth: file_auth,
            store: file_store,
        } = file;

        let server = ServerConfig {
            host: env
                .server_host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.server_port.or(file_server.port).unwrap_or(DEFAULT_PORT),
            list_limit: file_server.list_limit.unwrap_or(DEFAULT_LIST_LIMIT),
        };

        let mut interpreters = default_interpreters();
        interpreters.extend(
            file_engine
                .interpreters
                .into_iter()
                .map(|(ext, interpreter)| {
                    (ext.trim_start_matches('.').to_ascii_lowercase(), interpreter)
                }),
        );

        let engine = EngineConfig {
            checks_root: env
                .checks_root
                .clone()
                .or(file_engine.checks_root)
                .unwrap_or_else(|| PathBuf::from("./checks")),
            boundary: parse_value(
                "engine.boundary",
                env.boundary.clone().or(file_engine.boundary),
                BoundaryKind::default(),
            )?,
            worker_path: env.worker_path.clone().or(file_engine.worker_path),
            batch_timeout: parse_duration(
                "engine.batch_timeout",
                env.batch_timeout.clone().or(file_engine.batch_timeout),
                DEFAULT_BATCH_TIMEOUT,
            )?,
            check_timeout: parse_duration(
                "engine.check_timeout",
                env.check_timeout.clone().or(file_engine.check_timeout),
                DEFAULT_CHECK_TIMEOUT,
            )?,
            interpreters,
            ambiguous_checks: parse_value(
                "engine.ambiguous_checks",
                env.ambiguous_checks.clone().or(file_engine.ambiguous_checks),
                AmbiguityPolicy::default(),
            )?,
        };

        let relay_defaults = RelayConfig::default();
        let relay = RelayConfig {
            callback_timeout: parse_duration(
                "relay.callback_timeout",
                env.callback_timeout.clone().or(file_relay.callback_timeout),
                relay_defaults.callback_timeout,
            )?,
            queue_capacity: env
                .queue_capacity
                .or(file_relay.queue_capacity)
                .unwrap_or(relay_defaults.queue_capacity),
            overflow: parse_value(
                "relay.overflow",
                env.overflow.clone().or(file_relay.overflow),
                OverflowPolicy::default(),
            )?,
            broadcast_capacity: file_relay
                .broadcast_capacity
                .unwrap_or(relay_defaults.broadcast_capacity),
            history_capacity: file_relay
                .history_capacity
                .unwrap_or(relay_defaults.history_capacity),
            drain_grace: parse_duration(
                "relay.drain_grace",
                file_relay.drain_grace,
                relay_defaults.drain_grace,
            )?,
        };

        let authority_raw = env
            .authority
            .clone()
            .or(file_auth.authority)
            .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string());
        let authority = Url::parse(&authority_raw).map_err(|source| {
            ConfigLoadError::InvalidUrl {
                field: "auth.authority",
                source,
            }
        })?;
        let mut scopes = GroupScopes::default();
        for (label, values) in file_auth.scopes {
            let group = ServiceGroup::from_str(&label).map_err(|err| {
                ConfigLoadError::InvalidValue {
                    field: "auth.scopes",
                    value: label.clone(),
                    reason: err.to_string(),
                }
            })?;
            scopes.set(group, values);
        }
        let auth = AuthConfig {
            authority,
            scopes,
            static_token: env
                .static_token
                .clone()
                .or(file_auth.static_token)
                .map(Secret::new),
        };

        let store = match env.database_url.clone().or(file_store.database_url) {
            Some(url) if !url.trim().is_empty() => StoreConfig::Postgres { url },
            _ => StoreConfig::Memory,
        };

        let config = Config {
            server,
            engine,
            relay,
            auth,
            store,
            metadata,
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok((config, warnings))
    }
}

fn parse_duration(
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match raw {
        Some(value) => humantime::parse_duration(value.trim()).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value,
                source,
            }
        }),
        None => Ok(default),
    }
}

fn parse_value<T>(field: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigLoadError>
where
    T: FromStr<Err = String>,
{
    match raw {
        Some(value) => value
            .parse()
            .map_err(|reason| ConfigLoadError::InvalidValue {
                field,
                value,
                reason,
            }),
        None => Ok(default),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid URL for {field}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoad {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.metadata.config_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_values_use_humantime() {
        assert_eq!(
            parse_duration("x", Some("1m 30s".into()), Duration::ZERO).unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(
            parse_duration("x", None, Duration::from_secs(5)).unwrap(),
            Duration::from_secs(5)
        );
        let err = parse_duration("engine.batch_timeout", Some("soon".into()), Duration::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("engine.batch_timeout"));
    }

    #[test]
    fn enum_values_report_the_field() {
        let err = parse_value::<OverflowPolicy>(
            "relay.overflow",
            Some("drop-all".into()),
            OverflowPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                field: "relay.overflow",
                ..
            }
        ));
    }
}
