//! Event envelope.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::observability::TraceContext;

pub const ENVELOPE_VERSION: &str = "1.0";

/// An immutable fact published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

fn default_version() -> String {
    ENVELOPE_VERSION.to_string()
}

impl Event {
    /// New event in the given trace.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        trace: &TraceContext,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_type: event_type.into(),
            payload,
            correlation_id: trace.correlation_id.clone(),
            causation_id: trace.causation_id.clone(),
            created_at: Utc::now(),
            source: source.into(),
            version: default_version(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Trace context for work caused by this event.
    pub fn child_trace(&self) -> TraceContext {
        TraceContext::with_correlation(self.correlation_id.clone()).caused_by(self.event_id.clone())
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
