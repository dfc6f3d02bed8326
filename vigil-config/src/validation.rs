use std::fmt;

use thiserror::Error;
use vigil_core::executor::{BoundaryKind, ProcessBoundary};

use super::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("check timeout ({check:?}) exceeds batch timeout ({batch:?})")]
    CheckTimeoutExceedsBatch {
        check: std::time::Duration,
        batch: std::time::Duration,
    },
    #[error("no interpreters configured; no check unit could run")]
    NoInterpreters,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let engine = &config.engine;
    let relay = &config.relay;

    for (field, value) in [
        ("relay.queue_capacity", relay.queue_capacity),
        ("relay.broadcast_capacity", relay.broadcast_capacity),
        ("relay.history_capacity", relay.history_capacity),
        ("server.list_limit", config.server.list_limit),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroValue { field });
        }
    }
    for (field, value) in [
        ("engine.batch_timeout", engine.batch_timeout),
        ("engine.check_timeout", engine.check_timeout),
        ("relay.callback_timeout", relay.callback_timeout),
    ] {
        if value.is_zero() {
            return Err(ConfigGuardRailError::ZeroValue { field });
        }
    }
    if engine.check_timeout > engine.batch_timeout {
        return Err(ConfigGuardRailError::CheckTimeoutExceedsBatch {
            check: engine.check_timeout,
            batch: engine.batch_timeout,
        });
    }
    if engine.interpreters.is_empty() {
        return Err(ConfigGuardRailError::NoInterpreters);
    }

    if !engine.checks_root.is_dir() {
        warnings.push_with_hint(
            format!("checks root {} does not exist", engine.checks_root.display()),
            "Set VIGIL_CHECKS_ROOT or engine.checks_root; every scan will fail until it exists",
        );
    }

    let worker = engine
        .worker_path
        .clone()
        .or_else(ProcessBoundary::discover_worker);
    match (engine.boundary, worker) {
        (BoundaryKind::Auto, None) => warnings.push_with_hint(
            "vigil-worker binary not found; batches will run in-process without library isolation",
            "Build the vigil-worker binary or set VIGIL_WORKER_PATH",
        ),
        (BoundaryKind::Process, None) => warnings.push_with_hint(
            "boundary = \"process\" but no vigil-worker binary was found",
            "Every batch will fail to start; set VIGIL_WORKER_PATH",
        ),
        (_, Some(path)) if engine.worker_path.is_some() && !path.is_file() => {
            warnings.push(format!("worker path {} is not a file", path.display()))
        }
        _ => {}
    }

    if config.auth.static_token.is_some() {
        warnings.push_with_hint(
            "static session token configured; client credentials are ignored",
            "Unset VIGIL_STATIC_TOKEN outside of offline testing",
        );
    }

    Ok(warnings)
}
