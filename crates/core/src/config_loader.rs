use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Default TOML location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

/// Environment variable prefix. Nested keys are separated by `__`,
/// e.g. `APP_ENGINE__MONITOR__URGENT_INTERVAL_SECS=3`.
pub const ENV_PREFIX: &str = "APP_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging TOML, environment variables, and JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load<T: DeserializeOwned>() -> Result<T> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a specific TOML file plus environment and JSON overlays.
    ///
    /// A missing file is not an error; every section falls back to its defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be parsed or a value has the wrong type.
    pub fn load_from<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
        let path = path.as_ref();
        let config: T = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(path.with_extension("json")))
            .extract()?;

        Ok(config)
    }

    /// Loads configuration with a profile overlay (`Config.{profile}.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile<T: DeserializeOwned>(profile: &str) -> Result<T> {
        let config: T = Figment::new()
            .merge(Toml::file(DEFAULT_CONFIG_PATH))
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file("config/Config.json"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        name: String,
        #[serde(default = "default_limit")]
        limit: u32,
    }

    fn default_limit() -> u32 {
        100
    }

    // ==================== Loader Tests ====================

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "name = \"exits\"\nlimit = 42").unwrap();

        let sample: Sample = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "exits".to_string(),
                limit: 42
            }
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let sample: Sample = ConfigLoader::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(sample.limit, 100);
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(&path, "limit = \"lots\"").unwrap();

        let result: Result<Sample> = ConfigLoader::load_from(&path);
        assert!(result.is_err());
    }
}
