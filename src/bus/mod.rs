//! Room event ingestion
//!
//! Every panel, cloud, lifecycle and admin event reaches the orchestrator
//! through one bounded, single-consumer channel. Producers never touch room
//! state directly; they publish here and the orchestrator applies events in
//! arrival order.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Default queue depth between producers and the orchestrator
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Intents decoded from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanelIntent {
    PowerToggle,
    /// Select the source with this input index
    SelectSource(i32),
    /// Raw level from the volume control (clamped by the orchestrator)
    VolumeChanged(u16),
}

/// Events raised towards the room by the cloud side or room sensors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudEvent {
    RoomNameChanged(String),
    /// Presence detected (true) or cleared (false) by the panel's touch sensor
    OccupancyHintFromSensor(bool),
}

/// Program lifecycle transitions, already decoded by the bootstrap layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemLifecycle {
    Pausing,
    Resuming,
    Stopping,
}

/// Administrative requests from the operator console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminCommand {
    ClearSystemCheck,
    ReportStatus,
}

/// Everything the orchestrator consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RoomEvent {
    Panel(PanelIntent),
    Cloud(CloudEvent),
    Lifecycle(SystemLifecycle),
    Admin(AdminCommand),
}

impl RoomEvent {
    /// Get the event type as a string (for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Panel(PanelIntent::PowerToggle) => "power_toggle",
            Self::Panel(PanelIntent::SelectSource(_)) => "select_source",
            Self::Panel(PanelIntent::VolumeChanged(_)) => "volume_changed",
            Self::Cloud(CloudEvent::RoomNameChanged(_)) => "room_name_changed",
            Self::Cloud(CloudEvent::OccupancyHintFromSensor(_)) => "occupancy_hint",
            Self::Lifecycle(SystemLifecycle::Pausing) => "pausing",
            Self::Lifecycle(SystemLifecycle::Resuming) => "resuming",
            Self::Lifecycle(SystemLifecycle::Stopping) => "stopping",
            Self::Admin(AdminCommand::ClearSystemCheck) => "clear_system_check",
            Self::Admin(AdminCommand::ReportStatus) => "report_status",
        }
    }

    pub fn is_lifecycle_event(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }
}

/// Producer handle for the orchestrator's event queue
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::Sender<RoomEvent>,
}

impl EventSender {
    /// Queue an event, waiting for space if the queue is full.
    /// Returns false when the orchestrator is gone.
    pub async fn publish(&self, event: RoomEvent) -> bool {
        match self.sender.send(event).await {
            Ok(()) => true,
            Err(err) => {
                debug!(
                    "Dropped {} event: orchestrator is not running",
                    err.0.event_type()
                );
                false
            }
        }
    }

    /// Queue an event without waiting. Returns false if the queue is full or closed.
    pub fn try_publish(&self, event: RoomEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("Dropped {} event: queue full", event.event_type());
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(
                    "Dropped {} event: orchestrator is not running",
                    event.event_type()
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Create the room's event queue
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<RoomEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EventSender { sender }, receiver)
}
