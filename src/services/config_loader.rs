use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct FallbackConfig {
    /// Rubric used when a form cannot be fetched. Relative to the data folder.
    #[serde(default)]
    pub rubric_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JuriConfig {
    /// Coalescing window for sheet saves.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    /// Where score sheets are kept between runs, relative to the data folder.
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
    /// NDJSON file receiving submitted sheets, relative to the data folder.
    #[serde(default = "default_submissions_file")]
    pub submissions_file: PathBuf,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

impl Default for JuriConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: default_save_debounce_ms(),
            store_file: default_store_file(),
            submissions_file: default_submissions_file(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl JuriConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

fn default_save_debounce_ms() -> u64 {
    300
}

fn default_store_file() -> PathBuf {
    PathBuf::from(".juri_cache").join("sheets.json")
}

fn default_submissions_file() -> PathBuf {
    PathBuf::from("submissions.ndjson")
}

pub fn load_juri_config(data_folder: &Path) -> Result<JuriConfig> {
    let config_path = data_folder.join("config.toml");
    if !config_path.exists() {
        info!(
            "config.toml not found in data folder, using defaults: {}",
            config_path.display()
        );
        return Ok(JuriConfig::default());
    }

    let raw = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config.toml at {}", config_path.display()))?;

    toml::from_str::<JuriConfig>(&raw)
        .with_context(|| format!("Failed to parse config.toml at {}", config_path.display()))
}
