//! Event publishing with causal metadata.

use serde::Serialize;
use std::sync::Arc;

use crate::events::bus::EventBus;
use crate::events::envelope::Event;
use crate::events::log::EventError;
use crate::observability::TraceContext;

/// Stamps source, correlation and causation ids onto outgoing events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    bus: Arc<EventBus>,
    source: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<EventBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publish within `trace`, or as the root of a new trace.
    pub async fn publish<T: Serialize>(
        &self,
        event_type: &str,
        payload: &T,
        trace: Option<&TraceContext>,
    ) -> Result<Event, EventError> {
        let root;
        let trace = match trace {
            Some(trace) => trace,
            None => {
                root = TraceContext::new_root();
                &root
            }
        };
        let event = Event::new(event_type, serde_json::to_value(payload)?, trace, &self.source);
        self.publish_event(event).await
    }

    /// Publish an event caused by `parent`: same correlation id, causation
    /// id set to the parent's event id.
    pub async fn publish_caused_by<T: Serialize>(
        &self,
        parent: &Event,
        event_type: &str,
        payload: &T,
    ) -> Result<Event, EventError> {
        self.publish(event_type, payload, Some(&parent.child_trace())).await
    }

    /// Publish a fully built event as is.
    pub async fn publish_event(&self, event: Event) -> Result<Event, EventError> {
        self.bus.publish(event.clone()).await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::bus::BusSettings;
    use crate::events::log::MemoryEventLog;
    use serde_json::json;

    fn publisher() -> (EventPublisher, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(Arc::new(MemoryEventLog::new()), BusSettings::default()));
        (EventPublisher::new(bus.clone(), "products"), bus)
    }

    #[tokio::test]
    async fn test_root_events_get_fresh_correlation() {
        let (publisher, _) = publisher();
        let a = publisher.publish("product.created", &json!({"id": 1}), None).await.unwrap();
        let b = publisher.publish("product.created", &json!({"id": 2}), None).await.unwrap();

        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(a.causation_id.is_none());
        assert_eq!(a.source, "products");
    }

    #[tokio::test]
    async fn test_inherits_trace() {
        let (publisher, _) = publisher();
        let trace = TraceContext::with_correlation("req-42").caused_by("req-42");
        let event = publisher.publish("product.updated", &json!({}), Some(&trace)).await.unwrap();

        assert_eq!(event.correlation_id, "req-42");
        assert_eq!(event.causation_id.as_deref(), Some("req-42"));
    }

    #[tokio::test]
    async fn test_causal_chain() {
        let (publisher, bus) = publisher();
        let parent = publisher.publish("order.placed", &json!({}), None).await.unwrap();
        let child = publisher
            .publish_caused_by(&parent, "stock.reserved", &json!({"sku": "x"}))
            .await
            .unwrap();

        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.causation_id.as_deref(), Some(parent.event_id.as_str()));
        assert_eq!(bus.history("stock.reserved", 10).await.unwrap(), vec![child]);
    }
}
