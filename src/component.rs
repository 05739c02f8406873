//! Uniform lifecycle for the room's registered components

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

/// A component owning a registered endpoint and background tasks.
/// The orchestrator stops every component the same way during shutdown.
#[async_trait]
pub trait RoomComponent: Send + Sync {
    /// Component name for logs (e.g., "panel", "cloud")
    fn name(&self) -> &'static str;

    /// Whether the component's endpoint registration succeeded
    fn is_registered(&self) -> bool;

    /// Cancel background tasks and unregister. Safe to call more than once.
    async fn stop(&self);
}

/// Stop `component`, giving up after `budget`. Returns false if it was abandoned.
pub async fn stop_within(component: &dyn RoomComponent, budget: Duration) -> bool {
    if budget.is_zero() {
        warn!(
            "No shutdown time left for {}, skipping cleanup",
            component.name()
        );
        return false;
    }

    match tokio::time::timeout(budget, component.stop()).await {
        Ok(()) => {
            debug!("Stopped {}", component.name());
            true
        }
        Err(_) => {
            warn!(
                "{} did not stop within {:?}, abandoning",
                component.name(),
                budget
            );
            false
        }
    }
}
