use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::constants::{HEAVYMETAL_DK_KEY, HEAVYMETAL_DK_ORIGIN};
use crate::error::{Result, ScraperError};
use crate::types::Source;

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_channel() -> String {
    "console".to_string()
}

fn default_interval_hours() -> i64 {
    24
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationConfig {
    /// Delivery channel name; only "console" is built in
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
        }
    }
}

/// One configured scrape origin. Sources are created here and only their
/// scrape-status fields ever change afterwards, in storage.
#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub scraper: String,
    pub url: String,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SourceConfig {
    fn into_source(self) -> Source {
        Source {
            id: self.id,
            name: self.name,
            scraper_key: self.scraper,
            url: self.url,
            interval_hours: self.interval_hours,
            last_scraped_at: None,
            last_scrape_success: None,
            last_scrape_error: None,
            enabled: self.enabled,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Load the config file, or fall back to the built-in single-source
    /// default when it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!(
                "No config file at {}, using built-in defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Consume the configured source list
    pub fn sources(&mut self) -> Vec<Source> {
        std::mem::take(&mut self.sources)
            .into_iter()
            .map(SourceConfig::into_source)
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            notifications: NotificationConfig::default(),
            sources: vec![SourceConfig {
                id: "heavymetal_dk".to_string(),
                name: "Heavymetal.dk koncertkalender".to_string(),
                scraper: HEAVYMETAL_DK_KEY.to_string(),
                url: format!("{}/koncertkalender", HEAVYMETAL_DK_ORIGIN),
                interval_hours: default_interval_hours(),
                enabled: true,
            }],
        }
    }
}
