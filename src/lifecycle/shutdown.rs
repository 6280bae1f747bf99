//! Shutdown coordination for the mesh.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Every long-running task (health checker, event maintenance, config
/// watcher) subscribes to the same broadcast and exits when it fires.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Track a background task so `drain` can wait for it.
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening for the signal.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Fire the signal and wait up to `grace` for tracked tasks to finish.
    /// Stragglers are aborted. Returns how many finished in time.
    pub async fn drain(mut self, grace: Duration) -> usize {
        self.trigger();
        let deadline = tokio::time::Instant::now() + grace;
        let mut finished = 0;
        for (name, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => finished += 1,
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        finished
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
