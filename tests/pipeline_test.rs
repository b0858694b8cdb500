use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use koncert_scraper::bus::{EventBus, NewEventsFound, NEW_EVENTS_FOUND};
use koncert_scraper::error::{Result as ScraperResult, ScraperError};
use koncert_scraper::pipeline::Pipeline;
use koncert_scraper::registry::ScraperRegistry;
use koncert_scraper::storage::{InMemoryStorage, Storage};
use koncert_scraper::types::{ConcertEvent, EventScraper, Preferences, ScrapeOutcome, Source};

fn concert(venue: &str, date: &str, bands: &[&str]) -> ConcertEvent {
    ConcertEvent {
        id: String::new(),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        weekday: "lør".to_string(),
        bands: bands.iter().map(|b| b.to_string()).collect(),
        venue: venue.to_string(),
        event_url: format!("https://heavymetal.dk/koncerter/{}", venue.to_lowercase()),
        cancelled: false,
        newly_added: false,
        festival: false,
        scraped_at: Utc::now(),
    }
}

fn source(id: &str, scraper_key: &str) -> Source {
    Source {
        id: id.to_string(),
        name: format!("Source {}", id),
        scraper_key: scraper_key.to_string(),
        url: format!("https://stub.test/{}", id),
        // Always due, so consecutive runs in one test both fire.
        interval_hours: 0,
        last_scraped_at: None,
        last_scrape_success: None,
        last_scrape_error: None,
        enabled: true,
    }
}

struct StubScraper {
    key: &'static str,
    events: Vec<ConcertEvent>,
    fail_with: Option<String>,
}

impl StubScraper {
    fn returning(key: &'static str, events: Vec<ConcertEvent>) -> Arc<Self> {
        Arc::new(Self {
            key,
            events,
            fail_with: None,
        })
    }

    fn failing(key: &'static str, error: &str) -> Arc<Self> {
        Arc::new(Self {
            key,
            events: Vec::new(),
            fail_with: Some(error.to_string()),
        })
    }
}

#[async_trait]
impl EventScraper for StubScraper {
    fn key(&self) -> &'static str {
        self.key
    }

    fn url_pattern(&self) -> &'static str {
        "stub.test"
    }

    async fn scrape(&self, _url: &str, _cancel: &CancellationToken) -> ScrapeOutcome {
        match &self.fail_with {
            Some(error) => ScrapeOutcome::failed(error.clone()),
            None => ScrapeOutcome::ok(self.events.clone()),
        }
    }
}

/// Record the size of every published new-event occurrence
fn subscribe_recorder(bus: &EventBus) -> Arc<Mutex<Vec<usize>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_in_handler = log.clone();
    bus.subscribe(
        NEW_EVENTS_FOUND,
        Box::new(move |occurrence, _cancel| {
            let log = log_in_handler.clone();
            Box::pin(async move {
                let found = occurrence
                    .as_any()
                    .downcast_ref::<NewEventsFound>()
                    .expect("unexpected occurrence payload");
                log.lock().unwrap().push(found.events.len());
                Ok(())
            })
        }),
    );
    log
}

fn pipeline_with(
    storage: Arc<InMemoryStorage>,
    scrapers: Vec<Arc<StubScraper>>,
    bus: Arc<EventBus>,
) -> Pipeline {
    let mut registry = ScraperRegistry::empty();
    for scraper in scrapers {
        registry.register(scraper);
    }
    Pipeline::new(storage, registry, bus)
}

#[tokio::test]
async fn first_run_marks_every_event_new() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::with_sources(vec![source("hm", "stub")]));
    let bus = Arc::new(EventBus::new());
    let published = subscribe_recorder(&bus);
    let pipeline = pipeline_with(
        storage.clone(),
        vec![StubScraper::returning(
            "stub",
            vec![
                concert("Pumpehuset", "2026-08-15", &["Einherjer"]),
                concert("Loppen", "2026-08-21", &["Taake"]),
            ],
        )],
        bus,
    );

    let cancel = CancellationToken::new();
    let outcomes = pipeline.run_due_workflows(&cancel).await?;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].scraped_count, 2);
    assert_eq!(outcomes[0].new_count, 2);
    assert_eq!(outcomes[0].published, vec![NEW_EVENTS_FOUND.to_string()]);

    // Identities were assigned before anything was stored or published.
    let stored = storage.get_previous_events().await?;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|e| e.id.len() == 16));
    assert_eq!(*published.lock().unwrap(), vec![2]);
    Ok(())
}

#[tokio::test]
async fn unchanged_rescrape_finds_nothing_new_and_publishes_nothing() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::with_sources(vec![source("hm", "stub")]));
    let bus = Arc::new(EventBus::new());
    let published = subscribe_recorder(&bus);
    let pipeline = pipeline_with(
        storage.clone(),
        vec![StubScraper::returning(
            "stub",
            vec![concert("Pumpehuset", "2026-08-15", &["Einherjer"])],
        )],
        bus,
    );

    let cancel = CancellationToken::new();
    let first = pipeline.run_due_workflows(&cancel).await?;
    assert_eq!(first[0].new_count, 1);

    let second = pipeline.run_due_workflows(&cancel).await?;
    assert_eq!(second.len(), 1);
    assert!(second[0].success);
    assert_eq!(second[0].scraped_count, 1);
    assert_eq!(second[0].new_count, 0);
    assert!(second[0].published.is_empty());

    // Only the first run published anything.
    assert_eq!(*published.lock().unwrap(), vec![1]);
    Ok(())
}

#[tokio::test]
async fn a_failing_source_does_not_stop_the_others() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::with_sources(vec![
        source("broken", "broken_stub"),
        source("working", "working_stub"),
    ]));
    let bus = Arc::new(EventBus::new());
    let pipeline = pipeline_with(
        storage.clone(),
        vec![
            StubScraper::failing("broken_stub", "connection refused"),
            StubScraper::returning(
                "working_stub",
                vec![concert("Pumpehuset", "2026-08-15", &["Einherjer"])],
            ),
        ],
        bus,
    );

    let cancel = CancellationToken::new();
    let outcomes = pipeline.run_due_workflows(&cancel).await?;

    assert_eq!(outcomes.len(), 2);
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].scraped_count, 0);
    assert_eq!(outcomes[0].new_count, 0);
    assert_eq!(outcomes[0].error.as_deref(), Some("connection refused"));
    assert!(outcomes[1].success);

    // The failure left no trace in the stored events, only in the status.
    let stored = storage.get_previous_events().await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].venue, "Pumpehuset");

    let sources = storage.sources();
    let broken = sources.iter().find(|s| s.id == "broken").unwrap();
    assert_eq!(broken.last_scrape_success, Some(false));
    assert_eq!(broken.last_scrape_error.as_deref(), Some("connection refused"));
    assert!(broken.last_scraped_at.is_some());

    let working = sources.iter().find(|s| s.id == "working").unwrap();
    assert_eq!(working.last_scrape_success, Some(true));
    assert!(working.last_scrape_error.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_scraper_key_fails_that_source_only() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::with_sources(vec![source("hm", "missing")]));
    let bus = Arc::new(EventBus::new());
    let pipeline = pipeline_with(storage.clone(), Vec::new(), bus);

    let cancel = CancellationToken::new();
    let outcomes = pipeline.run_due_workflows(&cancel).await?;

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert!(outcomes[0].error.as_deref().unwrap().contains("missing"));
    assert_eq!(storage.sources()[0].last_scrape_success, Some(false));
    Ok(())
}

#[tokio::test]
async fn same_event_from_a_second_source_is_not_new() -> Result<()> {
    // Both sources list the identical show; content identity dedupes it
    // even though the sources are unrelated.
    let storage = Arc::new(InMemoryStorage::with_sources(vec![
        source("first", "first_stub"),
        source("second", "second_stub"),
    ]));
    let bus = Arc::new(EventBus::new());
    let pipeline = pipeline_with(
        storage.clone(),
        vec![
            StubScraper::returning(
                "first_stub",
                vec![concert("Pumpehuset", "2026-08-15", &["Einherjer", "Vreid"])],
            ),
            StubScraper::returning(
                "second_stub",
                vec![concert("Pumpehuset", "2026-08-15", &["Vreid", "Einherjer"])],
            ),
        ],
        bus,
    );

    let cancel = CancellationToken::new();
    let outcomes = pipeline.run_due_workflows(&cancel).await?;

    assert_eq!(outcomes[0].new_count, 1);
    assert_eq!(outcomes[1].new_count, 0);
    Ok(())
}

#[tokio::test]
async fn subscriber_failure_does_not_roll_back_persistence() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::with_sources(vec![source("hm", "stub")]));
    let bus = Arc::new(EventBus::new());
    bus.subscribe(
        NEW_EVENTS_FOUND,
        Box::new(|_occurrence, _cancel| {
            Box::pin(async { Err(ScraperError::Notification("handler blew up".to_string())) })
        }),
    );
    let pipeline = pipeline_with(
        storage.clone(),
        vec![StubScraper::returning(
            "stub",
            vec![concert("Pumpehuset", "2026-08-15", &["Einherjer"])],
        )],
        bus,
    );

    let cancel = CancellationToken::new();
    let outcomes = pipeline.run_due_workflows(&cancel).await?;

    // The failure is reported, but the persisted state and the source
    // status reflect the successful scrape that preceded publishing.
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert!(outcomes[0].error.as_deref().unwrap().contains("handler blew up"));
    assert_eq!(storage.get_previous_events().await?.len(), 1);
    assert_eq!(storage.sources()[0].last_scrape_success, Some(true));
    Ok(())
}

#[tokio::test]
async fn cancelled_run_returns_without_scraping() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::with_sources(vec![source("hm", "stub")]));
    let bus = Arc::new(EventBus::new());
    let published = subscribe_recorder(&bus);
    let pipeline = pipeline_with(
        storage.clone(),
        vec![StubScraper::returning(
            "stub",
            vec![concert("Pumpehuset", "2026-08-15", &["Einherjer"])],
        )],
        bus,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcomes = pipeline.run_due_workflows(&cancel).await?;

    assert!(outcomes.is_empty());
    assert!(storage.get_previous_events().await?.is_empty());
    assert!(published.lock().unwrap().is_empty());
    Ok(())
}

/// Wraps the in-memory storage and fails every event write
struct BrokenEventStore {
    inner: InMemoryStorage,
}

#[async_trait]
impl Storage for BrokenEventStore {
    async fn get_previous_events(&self) -> ScraperResult<Vec<ConcertEvent>> {
        self.inner.get_previous_events().await
    }

    async fn save_events(&self, _events: &[ConcertEvent]) -> ScraperResult<()> {
        Err(ScraperError::Storage("disk full".to_string()))
    }

    async fn get_preferences(&self) -> ScraperResult<Preferences> {
        self.inner.get_preferences().await
    }

    async fn save_preferences(&self, prefs: &Preferences) -> ScraperResult<()> {
        self.inner.save_preferences(prefs).await
    }

    async fn get_sources_due_for_scraping(
        &self,
        cancel: &CancellationToken,
    ) -> ScraperResult<Vec<Source>> {
        self.inner.get_sources_due_for_scraping(cancel).await
    }

    async fn update_source_scraped(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
        success: bool,
        error: Option<&str>,
        cancel: &CancellationToken,
    ) -> ScraperResult<()> {
        self.inner
            .update_source_scraped(source_id, at, success, error, cancel)
            .await
    }
}

#[tokio::test]
async fn storage_failure_aborts_the_whole_run() {
    let storage = Arc::new(BrokenEventStore {
        inner: InMemoryStorage::with_sources(vec![source("hm", "stub")]),
    });
    let mut registry = ScraperRegistry::empty();
    registry.register(StubScraper::returning(
        "stub",
        vec![concert("Pumpehuset", "2026-08-15", &["Einherjer"])],
    ));
    let pipeline = Pipeline::new(storage, registry, Arc::new(EventBus::new()));

    let cancel = CancellationToken::new();
    let result = pipeline.run_due_workflows(&cancel).await;
    assert!(matches!(result, Err(ScraperError::Storage(_))));
}
