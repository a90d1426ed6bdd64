//! Callback subscriptions to snapshot updates

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vitalis_core::HealthSnapshot;

/// Handle to a registered snapshot callback
///
/// The callback stops being invoked when this handle is dropped or
/// cancelled, or when the engine stops.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn<F>(
        mut updates: broadcast::Receiver<HealthSnapshot>,
        mut shutdown_rx: broadcast::Receiver<()>,
        callback: F,
    ) -> Self
    where
        F: Fn(HealthSnapshot) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = updates.recv() => match result {
                        Ok(snapshot) => callback(snapshot),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Snapshot subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Snapshot subscription ended");
        });
        Self { handle }
    }

    /// Whether the callback can still be invoked
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop delivering updates
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
