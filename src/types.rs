use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One concert listing as observed on a source site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcertEvent {
    /// Content-derived identity, assigned by the pipeline (see `identity`),
    /// never by the scraper that produced the event
    pub id: String,
    pub date: NaiveDate,
    /// Weekday label as printed by the source, display only
    pub weekday: String,
    /// One or more band names; for festivals the festival name comes first
    pub bands: Vec<String>,
    pub venue: String,
    pub event_url: String,
    pub cancelled: bool,
    /// Marked "new in the calendar" by the site itself
    pub newly_added: bool,
    pub festival: bool,
    /// When this pipeline observed the listing
    pub scraped_at: DateTime<Utc>,
}

impl ConcertEvent {
    /// An event without bands, venue or detail link is unusable and gets
    /// dropped during extraction rather than surfaced as an error.
    pub fn is_valid(&self) -> bool {
        !self.bands.is_empty() && !self.venue.is_empty() && !self.event_url.is_empty()
    }
}

fn default_interval_hours() -> i64 {
    24
}

fn default_enabled() -> bool {
    true
}

/// A configured origin to scrape. Created by configuration; only the
/// last-attempt fields are ever mutated, and only by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    /// Registry key selecting the scraper implementation
    pub scraper_key: String,
    pub url: String,
    /// Hours between scrape attempts
    #[serde(default = "default_interval_hours")]
    pub interval_hours: i64,
    #[serde(default)]
    pub last_scraped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_scrape_success: Option<bool>,
    #[serde(default)]
    pub last_scrape_error: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Source {
    /// Due means enabled and either never attempted or past the re-scrape
    /// interval.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_scraped_at {
            None => true,
            Some(last) => now >= last + Duration::hours(self.interval_hours),
        }
    }
}

/// User matching criteria, owned by storage and read-only to the matcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub favorite_bands: Vec<String>,
    pub favorite_venues: Vec<String>,
    /// Substring matches against band names
    pub keywords: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Delivery address for the notification channel; opaque to the pipeline
    pub notify_address: Option<String>,
}

impl Preferences {
    /// A profile with no criteria at all filters nothing and scores nothing;
    /// `matching::find_matches` passes events straight through for it.
    pub fn is_empty(&self) -> bool {
        self.favorite_bands.is_empty()
            && self.favorite_venues.is_empty()
            && self.keywords.is_empty()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }
}

/// Transient result of one scrape attempt
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub events: Vec<ConcertEvent>,
    pub error: Option<String>,
    pub scraped_count: usize,
    pub attempted_at: DateTime<Utc>,
}

impl ScrapeOutcome {
    pub fn ok(events: Vec<ConcertEvent>) -> Self {
        Self {
            success: true,
            scraped_count: events.len(),
            events,
            error: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            events: Vec::new(),
            error: Some(error.into()),
            scraped_count: 0,
            attempted_at: Utc::now(),
        }
    }
}

/// Externally reported result of one pipeline run for one source
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub source_id: String,
    pub source_name: String,
    pub scraped_count: usize,
    pub new_count: usize,
    /// Kind names of the occurrences published during this run
    pub published: Vec<String>,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Core trait every calendar scraper implements
#[async_trait::async_trait]
pub trait EventScraper: Send + Sync {
    /// Registry key for this scraper
    fn key(&self) -> &'static str;

    /// Substring of source URLs this scraper understands
    fn url_pattern(&self) -> &'static str;

    /// Fetch the calendar at `url` and extract events. Never fails hard:
    /// transport and parse problems come back inside the outcome.
    async fn scrape(&self, url: &str, cancel: &CancellationToken) -> ScrapeOutcome;
}
