//! Configuration loading helper functions
//! Layers defaults, an optional config file and prefixed environment variables

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable prefix used by the Mendeleev tools
pub const DEFAULT_ENV_PREFIX: &str = "MENDELEEV_";

/// Load configuration with priority: ENV > file > defaults
///
/// # Arguments
/// * `path` - Optional config file; the format is picked from the extension
///   (`yaml`/`yml`, `toml`, `json`)
/// * `env_prefix` - Prefix of environment overrides. Nested keys are split on
///   `__`, e.g. `MENDELEEV_TRANSPORT__BAUD_RATE=19200`
pub fn load_config<T>(path: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Config("Config file must have an extension".to_string()))?;

        figment = match extension {
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "json" => figment.merge(Json::file(path)),
            _ => {
                return Err(Error::Config(format!(
                    "Unsupported config file format: {}",
                    extension
                )))
            },
        };
        info!("Loading configuration from {}", path.display());
    } else {
        debug!("No config file given, using defaults and environment");
    }

    figment = figment.merge(Env::prefixed(env_prefix).split("__"));

    figment
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}
