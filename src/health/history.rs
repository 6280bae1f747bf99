//! Bounded per-instance probe history.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;

/// Outcome of one probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregates over the retained records of one instance.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthStats {
    pub total_checks: usize,
    pub successful_checks: usize,
    pub uptime_percentage: f64,
    pub avg_latency_ms: f64,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct HealthHistory {
    capacity: usize,
    records: DashMap<String, VecDeque<HealthRecord>>,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: DashMap::new(),
        }
    }

    pub fn push(&self, key: &str, record: HealthRecord) {
        let mut entries = self.records.entry(key.to_string()).or_default();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Most recent records, newest last.
    pub fn recent(&self, key: &str, limit: usize) -> Vec<HealthRecord> {
        self.records
            .get(key)
            .map(|entries| {
                let skip = entries.len().saturating_sub(limit);
                entries.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self, key: &str) -> Option<HealthStats> {
        let entries = self.records.get(key)?;
        let total = entries.len();
        if total == 0 {
            return None;
        }
        let successful = entries.iter().filter(|r| r.healthy).count();
        let latency: f64 = entries.iter().map(|r| r.latency_ms).sum();

        Some(HealthStats {
            total_checks: total,
            successful_checks: successful,
            uptime_percentage: successful as f64 * 100.0 / total as f64,
            avg_latency_ms: latency / total as f64,
            last_check: entries.back().map(|r| r.timestamp),
        })
    }

    pub fn remove(&self, key: &str) {
        self.records.remove(key);
    }
}
