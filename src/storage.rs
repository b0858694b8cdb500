use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, ScraperError};
use crate::types::{ConcertEvent, Preferences, Source};

/// Storage trait for the pipeline's durable state
#[async_trait]
pub trait Storage: Send + Sync {
    /// The full stored event set, across all sources
    async fn get_previous_events(&self) -> Result<Vec<ConcertEvent>>;

    /// Full replace of the stored event set
    async fn save_events(&self, events: &[ConcertEvent]) -> Result<()>;

    async fn get_preferences(&self) -> Result<Preferences>;
    async fn save_preferences(&self, prefs: &Preferences) -> Result<()>;

    /// Enabled sources whose re-scrape interval has elapsed (or which were
    /// never attempted)
    async fn get_sources_due_for_scraping(&self, cancel: &CancellationToken)
        -> Result<Vec<Source>>;

    /// Record the outcome of a scrape attempt on the source
    async fn update_source_scraped(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
        success: bool,
        error: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    events: Mutex<Vec<ConcertEvent>>,
    preferences: Mutex<Preferences>,
    sources: Mutex<Vec<Source>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_sources(Vec::new())
    }

    pub fn with_sources(sources: Vec<Source>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            preferences: Mutex::new(Preferences::default()),
            sources: Mutex::new(sources),
        }
    }

    pub fn set_preferences(&self, prefs: Preferences) {
        *self.preferences.lock().unwrap() = prefs;
    }

    /// Snapshot of the sources, status fields included
    pub fn sources(&self) -> Vec<Source> {
        self.sources.lock().unwrap().clone()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_previous_events(&self) -> Result<Vec<ConcertEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn save_events(&self, events: &[ConcertEvent]) -> Result<()> {
        *self.events.lock().unwrap() = events.to_vec();
        debug!("Stored {} events", events.len());
        Ok(())
    }

    async fn get_preferences(&self) -> Result<Preferences> {
        Ok(self.preferences.lock().unwrap().clone())
    }

    async fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        *self.preferences.lock().unwrap() = prefs.clone();
        Ok(())
    }

    async fn get_sources_due_for_scraping(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Source>> {
        if cancel.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }
        let now = Utc::now();
        let sources = self.sources.lock().unwrap();
        Ok(sources.iter().filter(|s| s.is_due(now)).cloned().collect())
    }

    async fn update_source_scraped(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
        success: bool,
        error: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }
        let mut sources = self.sources.lock().unwrap();
        match sources.iter_mut().find(|s| s.id == source_id) {
            Some(source) => {
                source.last_scraped_at = Some(at);
                source.last_scrape_success = Some(success);
                source.last_scrape_error = error.map(|e| e.to_string());
            }
            None => debug!("Ignoring status update for unknown source {}", source_id),
        }
        Ok(())
    }
}

const EVENTS_FILE: &str = "events.json";
const PREFERENCES_FILE: &str = "preferences.json";
const SOURCE_STATUS_FILE: &str = "source_status.json";

/// Per-source scrape status persisted separately from the configured source
/// list, which lives in the config file and is never written back
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SourceStatus {
    last_scraped_at: Option<DateTime<Utc>>,
    last_scrape_success: Option<bool>,
    last_scrape_error: Option<String>,
}

/// File-backed storage: plain JSON documents under one data directory.
/// A missing or malformed file reads as empty/default, never as an error;
/// write problems are storage errors and abort the run.
pub struct JsonFileStorage {
    data_dir: PathBuf,
    sources: Mutex<Vec<Source>>,
}

impl JsonFileStorage {
    pub fn new(data_dir: impl AsRef<Path>, configured: Vec<Source>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)
            .map_err(|e| ScraperError::Storage(format!("create {}: {}", data_dir.display(), e)))?;

        let storage = Self {
            data_dir,
            sources: Mutex::new(configured),
        };

        // Overlay persisted scrape status onto the configured sources
        let status: HashMap<String, SourceStatus> = storage.read_or_default(SOURCE_STATUS_FILE);
        {
            let mut sources = storage.sources.lock().unwrap();
            for source in sources.iter_mut() {
                if let Some(s) = status.get(&source.id) {
                    source.last_scraped_at = s.last_scraped_at;
                    source.last_scrape_success = s.last_scrape_success;
                    source.last_scrape_error = s.last_scrape_error.clone();
                }
            }
        }
        Ok(storage)
    }

    fn read_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.data_dir.join(name);
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Ignoring malformed {}: {}", path.display(), e);
                    T::default()
                }
            },
            Err(_) => T::default(),
        }
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.data_dir.join(name);
        let raw = serde_json::to_string_pretty(value)
            .map_err(|e| ScraperError::Storage(format!("serialize {}: {}", name, e)))?;
        // Write-then-rename keeps a crashed write from clobbering state
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, raw)
            .map_err(|e| ScraperError::Storage(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| ScraperError::Storage(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn get_previous_events(&self) -> Result<Vec<ConcertEvent>> {
        Ok(self.read_or_default(EVENTS_FILE))
    }

    async fn save_events(&self, events: &[ConcertEvent]) -> Result<()> {
        self.write_json(EVENTS_FILE, &events)?;
        debug!("Stored {} events in {}", events.len(), self.data_dir.display());
        Ok(())
    }

    async fn get_preferences(&self) -> Result<Preferences> {
        Ok(self.read_or_default(PREFERENCES_FILE))
    }

    async fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.write_json(PREFERENCES_FILE, prefs)
    }

    async fn get_sources_due_for_scraping(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Source>> {
        if cancel.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }
        let now = Utc::now();
        let sources = self.sources.lock().unwrap();
        Ok(sources.iter().filter(|s| s.is_due(now)).cloned().collect())
    }

    async fn update_source_scraped(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
        success: bool,
        error: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }
        let status: HashMap<String, SourceStatus> = {
            let mut sources = self.sources.lock().unwrap();
            match sources.iter_mut().find(|s| s.id == source_id) {
                Some(source) => {
                    source.last_scraped_at = Some(at);
                    source.last_scrape_success = Some(success);
                    source.last_scrape_error = error.map(|e| e.to_string());
                }
                None => debug!("Ignoring status update for unknown source {}", source_id),
            }
            sources
                .iter()
                .map(|s| {
                    (
                        s.id.clone(),
                        SourceStatus {
                            last_scraped_at: s.last_scraped_at,
                            last_scrape_success: s.last_scrape_success,
                            last_scrape_error: s.last_scrape_error.clone(),
                        },
                    )
                })
                .collect()
        };
        self.write_json(SOURCE_STATUS_FILE, &status)
    }
}
