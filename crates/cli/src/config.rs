use algo_trade_exits::ExitEngineConfig;
use algo_trade_kalshi::KalshiClientConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Top-level service configuration, read from `config/Config.toml` with
/// `APP_` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub kalshi: KalshiClientConfig,
    pub engine: ExitEngineConfig,
    /// JSON file holding positions, trailing stops and exit attempts.
    pub store_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            kalshi: KalshiClientConfig::default(),
            engine: ExitEngineConfig::default(),
            store_path: PathBuf::from("data/exits.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_trade_core::ConfigLoader;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config: AppConfig = ConfigLoader::load_from(dir.path().join("Config.toml")).unwrap();
        assert_eq!(config.store_path, PathBuf::from("data/exits.json"));
        assert_eq!(config.engine, ExitEngineConfig::default());
    }

    #[test]
    fn test_sections_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(
            &path,
            r#"
store_path = "/var/lib/exits/state.json"

[kalshi]
requests_per_minute = 60
burst = 20

[engine.monitor]
urgent_interval_secs = 3

[[engine.strategies]]
name = "momentum"
version = 2
active = true

[engine.strategies.params]
trailing_stop_distance = "0.08"

"#,
        )
        .unwrap();

        let config: AppConfig = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(config.kalshi.requests_per_minute.get(), 60);
        assert_eq!(config.kalshi.burst.get(), 20);
        assert_eq!(config.engine.monitor.urgent_interval_secs, 3);
        assert_eq!(config.engine.monitor.normal_interval_secs, 30);
        assert_eq!(config.engine.strategies.len(), 1);
        assert!(config.engine.strategies[0].active);
        assert_eq!(
            config.engine.strategies[0].params.trailing_stop_distance.to_string(),
            "0.08"
        );
        assert_eq!(config.store_path, PathBuf::from("/var/lib/exits/state.json"));
    }
}
