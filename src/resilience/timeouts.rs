//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Each attempt gets its own timeout, clipped by the call deadline
//! - Timed-out calls surface as a distinct error (504 at the gateway)

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Overall deadline for a call spanning several attempts.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Per-attempt timeout clipped to what is left of the deadline.
    pub fn clip(&self, per_attempt: Duration) -> Duration {
        per_attempt.min(self.remaining())
    }
}

/// Run `fut` with a timeout; `None` when it elapsed.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await.ok()
}
