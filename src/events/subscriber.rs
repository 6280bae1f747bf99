//! Typed subscriptions.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

use crate::events::bus::{handler_fn, EventBus, HandlerError, SubscriptionId};
use crate::events::envelope::Event;
use crate::observability::TraceContext;

/// What a handler gets besides its payload.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: Event,
    /// Trace for work caused by this event.
    pub trace: TraceContext,
}

impl EventContext {
    fn new(event: Event) -> Self {
        let trace = event.child_trace();
        Self { event, trace }
    }
}

/// Owns a group of subscriptions made on behalf of one component.
#[derive(Debug)]
pub struct EventSubscriber {
    bus: Arc<EventBus>,
    name: String,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl EventSubscriber {
    pub fn new(bus: Arc<EventBus>, name: impl Into<String>) -> Self {
        Self {
            bus,
            name: name.into(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Handle `event_type` with a payload decoded as `T`.
    pub fn on<T, F, Fut>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped = handler_fn(move |event: Event| {
            let handler = handler.clone();
            async move {
                let payload: T = event.payload_as()?;
                handler(payload, EventContext::new(event)).await
            }
        });
        self.track(self.bus.subscribe(event_type, self.handler_name(event_type), wrapped))
    }

    /// Handle `event_type` with the raw envelope.
    pub fn on_event<F, Fut>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped = handler_fn(move |event: Event| {
            let handler = handler.clone();
            async move { handler(EventContext::new(event)).await }
        });
        self.track(self.bus.subscribe(event_type, self.handler_name(event_type), wrapped))
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.subscriptions.lock().clone()
    }

    /// Cancel every subscription made through this subscriber.
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.subscriptions.lock().drain(..).collect();
        ids.into_iter().filter(|id| self.bus.unsubscribe(*id)).count()
    }

    fn handler_name(&self, event_type: &str) -> String {
        format!("{}:{}", self.name, event_type)
    }

    fn track(&self, id: SubscriptionId) -> SubscriptionId {
        self.subscriptions.lock().push(id);
        id
    }
}
