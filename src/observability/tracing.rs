//! Trace context propagation.
//!
//! A trace context is the pair (correlation id, causation id). The
//! correlation id is minted once at the edge and copied into every call and
//! event that follows; the causation id names the immediate parent (request
//! or event) of whatever is being produced.

use axum::http::{HeaderMap, HeaderValue};
use uuid::Uuid;

/// Header carrying the correlation id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Header carrying the per-call span id.
pub const SPAN_ID_HEADER: &str = "x-span-id";

/// Causal metadata that travels with requests and events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub correlation_id: String,
    pub causation_id: Option<String>,
}

impl TraceContext {
    /// Start a new trace (root of a causal chain).
    pub fn new_root() -> Self {
        Self {
            correlation_id: new_id(),
            causation_id: None,
        }
    }

    /// Continue an existing trace.
    pub fn with_correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            causation_id: None,
        }
    }

    /// Same trace, caused by `parent`.
    pub fn caused_by(&self, parent: impl Into<String>) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            causation_id: Some(parent.into()),
        }
    }

    /// Use the inbound `X-Trace-ID` when present, otherwise mint a new one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Self::with_correlation)
            .unwrap_or_else(Self::new_root)
    }

    /// Write `X-Trace-ID` and a fresh `X-Span-ID` onto outbound headers.
    /// Returns the span id.
    pub fn inject(&self, headers: &mut HeaderMap) -> String {
        let span_id = new_id();
        if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
            headers.insert(TRACE_ID_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&span_id) {
            headers.insert(SPAN_ID_HEADER, value);
        }
        span_id
    }
}

/// Fresh opaque identifier (UUID v4, simple form).
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}
