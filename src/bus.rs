use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ScraperError};
use crate::types::ConcertEvent;

/// An immutable fact published through the bus
pub trait Occurrence: Send + Sync + 'static {
    /// Exact kind string handlers subscribe under
    fn kind(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

/// Kind name for [`NewEventsFound`]
pub const NEW_EVENTS_FOUND: &str = "new_events_found";

/// Unseen events discovered during one pipeline run for one source.
/// Carries the full unfiltered new set; relevance filtering happens
/// downstream in whoever subscribes.
#[derive(Debug, Clone)]
pub struct NewEventsFound {
    pub events: Vec<ConcertEvent>,
    pub source_url: String,
    pub found_at: DateTime<Utc>,
}

impl Occurrence for NewEventsFound {
    fn kind(&self) -> &'static str {
        NEW_EVENTS_FOUND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A subscribed handler closure
pub type Handler = Box<dyn Fn(Arc<dyn Occurrence>, CancellationToken) -> HandlerFuture + Send + Sync>;

/// In-process publish/subscribe decoupling producers of domain occurrences
/// from their consumers. Handlers for a kind run sequentially in subscription
/// order and each one is awaited before the next starts; a handler error
/// stops dispatch and surfaces to the publisher. There is no unsubscribe.
///
/// One instance is constructed at startup and passed by reference to every
/// publisher and subscriber; the registry itself is synchronized so shared
/// use across tasks is safe.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<Handler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for an occurrence kind
    pub fn subscribe(&self, kind: &str, handler: Handler) {
        let mut handlers = self.handlers.write().unwrap();
        handlers
            .entry(kind.to_string())
            .or_default()
            .push(Arc::new(handler));
        debug!("Subscribed handler for occurrence kind {}", kind);
    }

    /// Dispatch to every handler registered for the occurrence's kind.
    /// Publishing a kind nobody subscribed to is a no-op.
    pub async fn publish(
        &self,
        occurrence: Arc<dyn Occurrence>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ScraperError::Cancelled);
        }

        let kind = occurrence.kind();
        let registered: Vec<Arc<Handler>> = {
            let handlers = self.handlers.read().unwrap();
            handlers.get(kind).cloned().unwrap_or_default()
        };

        if registered.is_empty() {
            debug!("No subscribers for occurrence kind {}", kind);
            return Ok(());
        }

        for handler in registered {
            handler(occurrence.clone(), cancel.clone()).await?;
        }
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
