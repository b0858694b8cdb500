use std::collections::HashMap;
use std::sync::Arc;

use crate::apis::heavymetal::HeavymetalDkScraper;
use crate::error::{Result, ScraperError};
use crate::fetch::PageFetcher;
use crate::types::EventScraper;

/// Registry for scraper implementations, selected per source by key or by
/// URL pattern
pub struct ScraperRegistry {
    scrapers: HashMap<String, Arc<dyn EventScraper>>,
}

impl ScraperRegistry {
    /// Registry with all built-in scrapers wired to the given fetcher
    pub fn with_builtins(fetcher: Arc<dyn PageFetcher>) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(HeavymetalDkScraper::new(fetcher)));
        registry
    }

    pub fn empty() -> Self {
        Self {
            scrapers: HashMap::new(),
        }
    }

    /// Register a scraper under its own key
    pub fn register(&mut self, scraper: Arc<dyn EventScraper>) {
        self.scrapers.insert(scraper.key().to_string(), scraper);
    }

    /// Look up a scraper by its selector key
    pub fn get(&self, key: &str) -> Result<Arc<dyn EventScraper>> {
        self.scrapers
            .get(key)
            .cloned()
            .ok_or_else(|| ScraperError::ScraperNotFound(key.to_string()))
    }

    /// Resolve a scraper by matching its URL pattern against a source URL
    pub fn resolve_for_url(&self, url: &str) -> Result<Arc<dyn EventScraper>> {
        self.scrapers
            .values()
            .find(|s| url.contains(s.url_pattern()))
            .cloned()
            .ok_or_else(|| ScraperError::ScraperNotFound(url.to_string()))
    }

    /// List all registered scraper keys
    pub fn list_keys(&self) -> Vec<&str> {
        self.scrapers.keys().map(|k| k.as_str()).collect()
    }
}
