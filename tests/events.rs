//! Event bus fan-out, causal metadata and durability.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilient_mesh::events::{
    BusSettings, EventBus, EventContext, EventPublisher, EventSubscriber, FileEventLog,
    HandlerError, MemoryEventLog,
};
use resilient_mesh::observability::TraceContext;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OrderPlaced {
    order_id: u64,
    total_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StockReserved {
    order_id: u64,
}

async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn memory_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new(Arc::new(MemoryEventLog::new()), BusSettings::default()))
}

#[tokio::test]
async fn test_correlation_reaches_every_subscriber() {
    let bus = memory_bus();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let billing = EventSubscriber::new(bus.clone(), "billing");
    let shipping = EventSubscriber::new(bus.clone(), "shipping");
    for (subscriber, label) in [(&billing, "billing"), (&shipping, "shipping")] {
        let sink = seen.clone();
        subscriber.on("order.placed", move |order: OrderPlaced, ctx: EventContext| {
            let sink = sink.clone();
            async move {
                sink.lock().push((label, order.order_id, ctx.event.correlation_id));
                Ok::<(), HandlerError>(())
            }
        });
    }

    let publisher = EventPublisher::new(bus.clone(), "orders");
    let trace = TraceContext::with_correlation("checkout-77");
    publisher
        .publish(
            "order.placed",
            &OrderPlaced {
                order_id: 77,
                total_cents: 1999,
            },
            Some(&trace),
        )
        .await
        .unwrap();

    wait_for(|| seen.lock().len() == 2).await;
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("billing", 77, "checkout-77".to_string()),
            ("shipping", 77, "checkout-77".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_follow_up_events_carry_causation() {
    let bus = memory_bus();
    let inventory = EventSubscriber::new(bus.clone(), "inventory");
    let publisher = EventPublisher::new(bus.clone(), "inventory");

    let reacting = publisher.clone();
    inventory.on_event("order.placed", move |ctx: EventContext| {
        let publisher = reacting.clone();
        async move {
            let order: OrderPlaced = ctx.event.payload_as()?;
            publisher
                .publish_caused_by(&ctx.event, "stock.reserved", &StockReserved { order_id: order.order_id })
                .await?;
            Ok::<(), HandlerError>(())
        }
    });

    let placed = EventPublisher::new(bus.clone(), "orders")
        .publish(
            "order.placed",
            &OrderPlaced {
                order_id: 5,
                total_cents: 500,
            },
            None,
        )
        .await
        .unwrap();

    let mut reserved = Vec::new();
    for _ in 0..100 {
        reserved = bus.history("stock.reserved", 10).await.unwrap();
        if !reserved.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].correlation_id, placed.correlation_id);
    assert_eq!(reserved[0].causation_id.as_deref(), Some(placed.event_id.as_str()));
    assert_eq!(reserved[0].source, "inventory");
}

#[tokio::test]
async fn test_failing_handler_is_retried() {
    let bus = memory_bus();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let subscriber = EventSubscriber::new(bus.clone(), "mailer");
    subscriber.on_event("user.signed_up", move |_ctx: EventContext| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err::<(), HandlerError>("smtp unavailable".into());
            }
            Ok(())
        }
    });

    EventPublisher::new(bus.clone(), "accounts")
        .publish("user.signed_up", &serde_json::json!({"user": "ada"}), None)
        .await
        .unwrap();

    wait_for(|| attempts.load(Ordering::SeqCst) == 2).await;
    wait_for(|| bus.stats().handlers.first().is_some_and(|h| h.delivered == 1)).await;
    let handler = bus.stats().handlers.into_iter().next().unwrap();
    assert_eq!(handler.retried, 1);
    assert_eq!(handler.failed, 0);
}

#[tokio::test]
async fn test_file_log_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events").join("mesh.jsonl");

    let first_id = {
        let log = FileEventLog::open(&path).await.unwrap();
        let bus = Arc::new(EventBus::new(Arc::new(log), BusSettings::default()));
        let publisher = EventPublisher::new(bus.clone(), "orders");
        let first = publisher
            .publish("order.placed", &OrderPlaced { order_id: 1, total_cents: 100 }, None)
            .await
            .unwrap();
        publisher
            .publish("order.placed", &OrderPlaced { order_id: 2, total_cents: 200 }, None)
            .await
            .unwrap();
        publisher
            .publish("order.cancelled", &serde_json::json!({"order_id": 1}), None)
            .await
            .unwrap();
        bus.shutdown().await;
        first.event_id
    };

    let log = FileEventLog::open(&path).await.unwrap();
    let bus = Arc::new(EventBus::new(Arc::new(log), BusSettings::default()));

    let history = bus.history("order.placed", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].event_id, first_id);
    let second: OrderPlaced = history[1].payload_as().unwrap();
    assert_eq!(second.order_id, 2);

    let replayed = Arc::new(Mutex::new(Vec::new()));
    let sink = replayed.clone();
    let subscriber = EventSubscriber::new(bus.clone(), "audit");
    subscriber.on("order.placed", move |order: OrderPlaced, _ctx: EventContext| {
        let sink = sink.clone();
        async move {
            sink.lock().push(order.order_id);
            Ok::<(), HandlerError>(())
        }
    });

    let since = chrono::Utc::now() - chrono::Duration::hours(1);
    assert_eq!(bus.replay("order.placed", since).await.unwrap(), 2);
    wait_for(|| replayed.lock().len() == 2).await;
    assert_eq!(*replayed.lock(), vec![1, 2]);

    assert!(bus.history("order.cancelled", 10).await.unwrap().len() == 1);
}
