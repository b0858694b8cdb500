use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, NewEventsFound, NEW_EVENTS_FOUND};
use crate::error::Result;
use crate::matching;
use crate::storage::Storage;
use crate::types::ConcertEvent;

/// Result of one notification delivery
#[derive(Debug, Clone)]
pub struct NotificationOutcome {
    pub success: bool,
    pub message: String,
    pub notified_count: usize,
}

/// Outbound delivery channel for matched events
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(
        &self,
        events: &[ConcertEvent],
        cancel: &CancellationToken,
    ) -> Result<NotificationOutcome>;
}

/// Prints matches to stdout; the default channel for CLI runs
pub struct ConsoleChannel;

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    async fn notify(
        &self,
        events: &[ConcertEvent],
        _cancel: &CancellationToken,
    ) -> Result<NotificationOutcome> {
        println!("\n🤘 {} upcoming concert(s) match your preferences:", events.len());
        for event in events {
            let festival = if event.festival { " [festival]" } else { "" };
            let cancelled = if event.cancelled { " [AFLYST]" } else { "" };
            println!(
                "   {} {} | {} @ {}{}{}",
                event.date,
                event.weekday,
                event.bands.join(", "),
                event.venue,
                festival,
                cancelled
            );
            println!("      {}", event.event_url);
        }
        Ok(NotificationOutcome {
            success: true,
            message: format!("printed {} match(es)", events.len()),
            notified_count: events.len(),
        })
    }
}

/// Subscribes to new-event occurrences and forwards the relevant ones to the
/// notification channel. Every failure inside the handler is demoted to a
/// log line: a delivery problem must never disturb what the pipeline already
/// persisted.
pub struct NotificationHandler {
    storage: Arc<dyn Storage>,
    channel: Arc<dyn NotificationChannel>,
}

impl NotificationHandler {
    /// Construct the handler and register it on the bus in one step
    pub fn new(
        storage: Arc<dyn Storage>,
        channel: Arc<dyn NotificationChannel>,
        bus: &EventBus,
    ) -> Arc<Self> {
        let handler = Arc::new(Self { storage, channel });
        let subscribed = Arc::clone(&handler);
        bus.subscribe(
            NEW_EVENTS_FOUND,
            Box::new(move |occurrence, cancel| {
                let handler = Arc::clone(&subscribed);
                Box::pin(async move {
                    if let Some(found) = occurrence.as_any().downcast_ref::<NewEventsFound>() {
                        handler.handle(found, &cancel).await;
                    }
                    Ok(())
                })
            }),
        );
        handler
    }

    /// React to newly found events. Infallible by design.
    pub async fn handle(&self, found: &NewEventsFound, cancel: &CancellationToken) {
        if found.events.is_empty() {
            return;
        }

        let prefs = match self.storage.get_preferences().await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("Could not load preferences, skipping notification: {}", e);
                return;
            }
        };

        let matches = matching::find_matches(&found.events, &prefs);
        if matches.is_empty() {
            debug!(
                "No preference matches among {} new event(s) from {}",
                found.events.len(),
                found.source_url
            );
            return;
        }

        match self.channel.notify(&matches, cancel).await {
            Ok(outcome) if outcome.success => {
                info!(
                    "Notified about {} event(s): {}",
                    outcome.notified_count, outcome.message
                );
            }
            Ok(outcome) => warn!("Notification channel reported failure: {}", outcome.message),
            Err(e) => warn!("Notification channel error: {}", e),
        }
    }
}
