use std::error::Error;
use std::path::PathBuf;

use serde::{Serialize, Deserialize};

const CONFIG_PATH: &str = "config.toml";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for relative sample references.
    pub sample_dir: PathBuf,
    /// How far ahead of the audio clock ticks are scheduled.
    pub lookahead_ms: u32,
    /// Delay between starting the transport and the first tick.
    pub start_delay_ms: u32,
    /// How long the first start waits for samples still loading.
    pub asset_timeout_ms: u32,
    pub meter_interval_ms: u32,
    /// Voice cap for polyphonic synth tracks.
    pub max_polyphony: usize,
    /// Tracing filter directive, e.g. "info" or "stepdaw=debug".
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_dir: PathBuf::from("samples"),
            lookahead_ms: 100,
            start_delay_ms: 50,
            asset_timeout_ms: 5000,
            meter_interval_ms: 50,
            max_polyphony: 16,
            log_filter: String::from("info"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn Error>> {
        Self::load_from(CONFIG_PATH)
    }

    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        self.save_to(CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<dyn Error>> {
        let s = std::fs::read_to_string(path)?;
        let c = toml::from_str(&s)?;
        Ok(c)
    }

    pub fn save_to(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn Error>> {
        let s = toml::to_string(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead_ms as f64 / 1000.0
    }

    pub fn start_delay(&self) -> f64 {
        self.start_delay_ms as f64 / 1000.0
    }

    pub fn asset_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.asset_timeout_ms as u64)
    }

    pub fn meter_interval(&self) -> f64 {
        self.meter_interval_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            lookahead_ms: 40,
            log_filter: String::from("stepdaw=trace"),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_config_partial() {
        let config: Config = toml::from_str("max_polyphony = 4").unwrap();
        assert_eq!(config.max_polyphony, 4);
        assert_eq!(config.lookahead_ms, Config::default().lookahead_ms);
        assert_eq!(config.lookahead(), 0.1);
    }
}
