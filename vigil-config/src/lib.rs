//! Configuration library for Vigil.
//!
//! Settings come from an optional `vigil.toml`, a `.env` file and `VIGIL_*`
//! environment variables, in increasing order of precedence. The server's
//! command line overrides the result.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    AuthConfig, Config, ConfigMetadata, EngineConfig, RelayConfig, ServerConfig, StoreConfig,
};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
