use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bus::{EventBus, NewEventsFound, NEW_EVENTS_FOUND};
use crate::error::{Result, ScraperError};
use crate::identity::assign_identities;
use crate::registry::ScraperRegistry;
use crate::storage::Storage;
use crate::types::{ConcertEvent, Source, WorkflowOutcome};

/// Drives the per-source scrape workflow: resolve a scraper, extract, assign
/// identities, diff against stored state, persist, publish, record status.
///
/// Persistence always commits before anything is published, so a crash or
/// failure on the notification side can never leave the stored state
/// disagreeing with what the next run will diff against.
pub struct Pipeline {
    storage: Arc<dyn Storage>,
    registry: ScraperRegistry,
    bus: Arc<EventBus>,
}

impl Pipeline {
    pub fn new(storage: Arc<dyn Storage>, registry: ScraperRegistry, bus: Arc<EventBus>) -> Self {
        Self {
            storage,
            registry,
            bus,
        }
    }

    /// Run the workflow for every due source, one at a time. A source's
    /// failure only shows up in its own outcome; storage failures abort the
    /// whole run. Cancellation stops the loop at the next checkpoint and
    /// returns whatever completed before it.
    pub async fn run_due_workflows(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkflowOutcome>> {
        let due = match self.storage.get_sources_due_for_scraping(cancel).await {
            Ok(due) => due,
            Err(ScraperError::Cancelled) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if due.is_empty() {
            debug!("No sources due for scraping");
            return Ok(Vec::new());
        }

        info!("{} source(s) due for scraping", due.len());
        let mut outcomes = Vec::with_capacity(due.len());
        for source in due {
            if cancel.is_cancelled() {
                info!("Cancelled after {} source(s)", outcomes.len());
                break;
            }
            match self.run_source(&source, cancel).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(ScraperError::Cancelled) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    /// One source's workflow. Only storage errors and cancellation come back
    /// as `Err`; everything else is folded into the outcome.
    #[instrument(skip(self, source, cancel), fields(source = %source.id))]
    async fn run_source(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        counter!("koncert_workflow_runs_total", "source" => source.id.clone()).increment(1);
        let started = std::time::Instant::now();

        let scraper = match self.registry.get(&source.scraper_key) {
            Ok(scraper) => scraper,
            Err(e) => return self.fail_source(source, e.to_string(), cancel).await,
        };

        let scrape = scraper.scrape(&source.url, cancel).await;
        if !scrape.success {
            let error = scrape
                .error
                .unwrap_or_else(|| "scrape failed without detail".to_string());
            return self.fail_source(source, error, cancel).await;
        }

        let mut scraped = scrape.events;
        assign_identities(&mut scraped);

        // Diff against everything we have ever kept, not just this source's
        // slice: the same show reported by two sources is one event.
        let previous = self.storage.get_previous_events().await?;
        let known: HashSet<&str> = previous.iter().map(|e| e.id.as_str()).collect();
        let new_events: Vec<ConcertEvent> = scraped
            .iter()
            .filter(|e| !known.contains(e.id.as_str()))
            .cloned()
            .collect();

        // Persist before publishing. The stored set is simply "what the
        // source currently lists"; vanished events drop out on their own.
        self.storage.save_events(&scraped).await?;

        let mut published = Vec::new();
        let mut publish_error = None;
        if !new_events.is_empty() {
            info!("{} new event(s) from {}", new_events.len(), source.name);
            counter!("koncert_new_events_total", "source" => source.id.clone())
                .increment(new_events.len() as u64);

            let occurrence = Arc::new(NewEventsFound {
                events: new_events.clone(),
                source_url: source.url.clone(),
                found_at: Utc::now(),
            });
            match self.bus.publish(occurrence, cancel).await {
                Ok(()) => published.push(NEW_EVENTS_FOUND.to_string()),
                Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
                Err(e) => {
                    // Stored state is already committed; a subscriber
                    // failure only shows up in the outcome.
                    warn!("Publishing {} failed: {}", NEW_EVENTS_FOUND, e);
                    publish_error = Some(e.to_string());
                }
            }
        } else {
            debug!("Nothing new from {}", source.name);
        }

        let now = Utc::now();
        self.storage
            .update_source_scraped(&source.id, now, true, None, cancel)
            .await?;
        histogram!("koncert_workflow_duration_seconds", "source" => source.id.clone())
            .record(started.elapsed().as_secs_f64());

        Ok(WorkflowOutcome {
            success: publish_error.is_none(),
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            scraped_count: scraped.len(),
            new_count: new_events.len(),
            published,
            error: publish_error,
            executed_at: now,
        })
    }

    /// Record a failed attempt: status update, no events touched, nothing
    /// published.
    async fn fail_source(
        &self,
        source: &Source,
        error: String,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        warn!("Workflow failed for {}: {}", source.name, error);
        counter!("koncert_workflow_failures_total", "source" => source.id.clone()).increment(1);

        let now = Utc::now();
        self.storage
            .update_source_scraped(&source.id, now, false, Some(&error), cancel)
            .await?;

        Ok(WorkflowOutcome {
            success: false,
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            scraped_count: 0,
            new_count: 0,
            published: Vec::new(),
            error: Some(error),
            executed_at: now,
        })
    }
}
