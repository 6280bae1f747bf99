//! Asynchronous events.
//!
//! # Data Flow
//! ```text
//! EventPublisher (stamps source, correlation_id, causation_id)
//!     → EventBus::publish
//!     → EventLog::append (fsync'd JSON lines) ── error → publisher
//!     → per-subscription FIFO queue
//!     → worker task → handler (retried with backoff, panics caught)
//!
//! EventSubscriber::on::<T>(type, f)
//!     → decodes payload, hands f an EventContext with the derived trace
//! ```
//!
//! # Design Decisions
//! - Publish returns after durability, not after delivery
//! - One worker per subscription: slow handlers only delay themselves
//! - At-least-once delivery; handlers must tolerate duplicates
//! - Retention is enforced by compaction, never on the publish path

pub mod bus;
pub mod envelope;
pub mod log;
pub mod publisher;
pub mod subscriber;

pub use bus::{
    handler_fn, BusSettings, BusStats, EventBus, EventHandler, HandlerError, SubscriptionId,
    SubscriptionStats,
};
pub use envelope::Event;
pub use log::{EventError, EventLog, FileEventLog, LogQuery, MemoryEventLog, RetentionPolicy};
pub use publisher::EventPublisher;
pub use subscriber::{EventContext, EventSubscriber};
