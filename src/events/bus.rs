//! In-process event bus.
//!
//! # Responsibilities
//! - Persist every event before acknowledging the publisher
//! - Fan out to every subscription of the event's type
//! - Isolate handlers: failures and panics are retried, logged, counted
//! - Serve history and replay from the log, enforce retention

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::EventsConfig;
use crate::events::envelope::Event;
use crate::events::log::{EventError, EventLog, LogQuery, RetentionPolicy};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Something that reacts to events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery tuning.
#[derive(Debug, Clone)]
pub struct BusSettings {
    pub max_delivery_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retention: RetentionPolicy,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self::from(&EventsConfig::default())
    }
}

impl From<&EventsConfig> for BusSettings {
    fn from(config: &EventsConfig) -> Self {
        Self {
            max_delivery_attempts: config.max_delivery_attempts.max(1),
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            retention: RetentionPolicy::from(config),
        }
    }
}

#[derive(Debug, Default)]
struct HandlerCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    pending: AtomicI64,
}

struct Registration {
    id: SubscriptionId,
    name: String,
    tx: mpsc::UnboundedSender<Event>,
    counters: Arc<HandlerCounters>,
    worker: JoinHandle<()>,
}

/// Per-subscription delivery counters.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStats {
    pub id: SubscriptionId,
    pub name: String,
    pub event_type: String,
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
    pub pending: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub publish_failures: u64,
    pub subscriptions: usize,
    pub subscribers_by_type: BTreeMap<String, usize>,
    pub handlers: Vec<SubscriptionStats>,
}

pub struct EventBus {
    log: Arc<dyn EventLog>,
    settings: BusSettings,
    subscriptions: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("log", &self.log)
            .field("settings", &self.settings)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(log: Arc<dyn EventLog>, settings: BusSettings) -> Self {
        Self {
            log,
            settings,
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    /// Persist `event`, then hand it to every current subscriber of its type.
    ///
    /// Returns once the event is durable; handlers run afterwards on their
    /// own workers.
    pub async fn publish(&self, event: Event) -> Result<(), EventError> {
        if let Err(e) = self.log.append(&event).await {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(event_id = %event.event_id, event_type = %event.event_type, error = %e, "Failed to persist event");
            return Err(e);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_event_published(&event.event_type);

        let receivers = self.dispatch(&event);
        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            correlation_id = %event.correlation_id,
            receivers,
            "Event published"
        );
        Ok(())
    }

    /// Enqueue for every subscription of the type. Returns the receiver count.
    fn dispatch(&self, event: &Event) -> usize {
        let subscriptions = self.subscriptions.read();
        let Some(registrations) = subscriptions.get(&event.event_type) else {
            return 0;
        };
        let mut sent = 0;
        for registration in registrations {
            registration.counters.pending.fetch_add(1, Ordering::Relaxed);
            if registration.tx.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                registration.counters.pending.fetch_sub(1, Ordering::Relaxed);
            }
        }
        sent
    }

    /// Register `handler` for `event_type`. `name` identifies it in logs and stats.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let event_type = event_type.into();
        let name = name.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let counters = Arc::new(HandlerCounters::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(delivery_worker(
            rx,
            handler,
            name.clone(),
            self.settings.clone(),
            counters.clone(),
        ));

        tracing::info!(subscription = %id, event_type = %event_type, handler = %name, "Subscribed");
        self.subscriptions
            .write()
            .entry(event_type)
            .or_default()
            .push(Registration {
                id,
                name,
                tx,
                counters,
                worker,
            });
        id
    }

    /// Remove a subscription. Events already queued for it still drain.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let found = subscriptions.iter().find_map(|(event_type, registrations)| {
            registrations
                .iter()
                .position(|r| r.id == id)
                .map(|pos| (event_type.clone(), pos))
        });
        let Some((event_type, pos)) = found else {
            return false;
        };

        if let Some(registrations) = subscriptions.get_mut(&event_type) {
            let removed = registrations.remove(pos);
            tracing::info!(subscription = %id, event_type = %event_type, handler = %removed.name, "Unsubscribed");
            if registrations.is_empty() {
                subscriptions.remove(&event_type);
            }
        }
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().values().map(Vec::len).sum()
    }

    /// Newest `limit` persisted events of a type, oldest first.
    pub async fn history(&self, event_type: &str, limit: usize) -> Result<Vec<Event>, EventError> {
        self.log
            .read(LogQuery {
                event_type: Some(event_type),
                since: None,
                limit: Some(limit),
            })
            .await
    }

    /// Re-deliver persisted events of a type created at or after `since`
    /// to the current subscribers. Returns how many events were replayed.
    pub async fn replay(&self, event_type: &str, since: DateTime<Utc>) -> Result<usize, EventError> {
        let events = self
            .log
            .read(LogQuery {
                event_type: Some(event_type),
                since: Some(since),
                limit: None,
            })
            .await?;
        for event in &events {
            self.dispatch(event);
        }
        tracing::info!(event_type = %event_type, count = events.len(), "Replayed events");
        Ok(events.len())
    }

    /// Apply the retention policy to the log. Returns how many events were dropped.
    pub async fn enforce_retention(&self) -> Result<usize, EventError> {
        self.log.compact(&self.settings.retention).await
    }

    /// Periodically enforce retention until `shutdown` fires.
    pub fn spawn_maintenance(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.enforce_retention().await {
                            tracing::error!(error = %e, "Event retention failed");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    pub fn stats(&self) -> BusStats {
        let subscriptions = self.subscriptions.read();
        let mut handlers = Vec::new();
        let mut subscribers_by_type = BTreeMap::new();
        for (event_type, registrations) in subscriptions.iter() {
            subscribers_by_type.insert(event_type.clone(), registrations.len());
            for r in registrations {
                handlers.push(SubscriptionStats {
                    id: r.id,
                    name: r.name.clone(),
                    event_type: event_type.clone(),
                    delivered: r.counters.delivered.load(Ordering::Relaxed),
                    failed: r.counters.failed.load(Ordering::Relaxed),
                    retried: r.counters.retried.load(Ordering::Relaxed),
                    pending: r.counters.pending.load(Ordering::Relaxed),
                });
            }
        }
        handlers.sort_by_key(|h| h.id);

        BusStats {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            subscriptions: handlers.len(),
            subscribers_by_type,
            handlers,
        }
    }

    /// Drop every subscription and wait for queued deliveries to finish.
    pub async fn shutdown(&self) {
        let registrations: Vec<Registration> = self
            .subscriptions
            .write()
            .drain()
            .flat_map(|(_, regs)| regs)
            .collect();

        let workers: Vec<JoinHandle<()>> = registrations
            .into_iter()
            .map(|r| {
                drop(r.tx);
                r.worker
            })
            .collect();
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("Event bus drained");
    }
}

async fn delivery_worker(
    mut rx: mpsc::UnboundedReceiver<Event>,
    handler: Arc<dyn EventHandler>,
    name: String,
    settings: BusSettings,
    counters: Arc<HandlerCounters>,
) {
    while let Some(event) = rx.recv().await {
        let delivered = deliver(handler.as_ref(), &event, &name, &settings, &counters).await;
        counters.pending.fetch_sub(1, Ordering::Relaxed);
        metrics::record_event_delivery(&event.event_type, delivered);
        if delivered {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn deliver(
    handler: &dyn EventHandler,
    event: &Event,
    name: &str,
    settings: &BusSettings,
    counters: &HandlerCounters,
) -> bool {
    let base_ms = settings.retry_base_delay.as_millis() as u64;
    let max_ms = settings.retry_max_delay.as_millis() as u64;

    for attempt in 1..=settings.max_delivery_attempts {
        let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
        let error = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "handler panicked".to_string(),
        };

        tracing::warn!(
            handler = %name,
            event_id = %event.event_id,
            event_type = %event.event_type,
            attempt,
            error = %error,
            "Event handler failed"
        );
        if attempt < settings.max_delivery_attempts {
            counters.retried.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(calculate_backoff(attempt, base_ms, max_ms)).await;
        }
    }

    tracing::error!(
        handler = %name,
        event_id = %event.event_id,
        attempts = settings.max_delivery_attempts,
        "Giving up on event delivery"
    );
    false
}
