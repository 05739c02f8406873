//! Room orchestrator
//!
//! Owns the room's runtime state and the three components (routing matrix,
//! panel, cloud). Every event reaches it through one queue and is applied in
//! arrival order by a single task, so state mutation needs no locking. The
//! components never talk to each other; all cross-component effects are
//! decided here.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{
    self, AdminCommand, CloudEvent, EventSender, PanelIntent, RoomEvent, SystemLifecycle,
};
use crate::cloud::{CloudConnector, CloudLink};
use crate::component::{stop_within, RoomComponent};
use crate::config::{OrchestratorSettings, RoomConfig, Settings};
use crate::devices::DeviceFactory;
use crate::error::RoomError;
use crate::panel::{PanelAdapter, PanelLink};
use crate::routing::RoutingMatrix;

/// Highest accepted volume level
pub const MAX_VOLUME: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveRoute {
    pub input: i32,
    pub output: i32,
}

/// The room's live state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomRuntimeState {
    pub powered: bool,
    pub display_powered: bool,
    pub occupied: bool,
    pub volume_level: u16,
    pub active_route: Option<ActiveRoute>,
    pub last_preview_url: Option<String>,
    pub room_name_from_cloud: Option<String>,
}

impl RoomRuntimeState {
    fn new(default_volume: u16) -> Self {
        Self {
            powered: false,
            display_powered: false,
            occupied: false,
            volume_level: default_volume.min(MAX_VOLUME),
            active_route: None,
            last_preview_url: None,
            room_name_from_cloud: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoomPhase {
    Running,
    Paused,
    ShuttingDown,
}

/// What the room looks like after the last applied event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    pub phase: RoomPhase,
    pub state: RoomRuntimeState,
    /// Events applied so far
    pub applied: u64,
}

/// Hardware the room is built on
pub struct RoomDevices {
    pub factory: Arc<dyn DeviceFactory>,
    pub panel: PanelLink,
    /// None when the room has no cloud slot
    pub cloud: Option<CloudLink>,
}

pub struct RoomOrchestrator {
    config: RoomConfig,
    settings: OrchestratorSettings,
    state: RoomRuntimeState,
    phase: RoomPhase,
    applied: u64,
    matrix: Arc<RoutingMatrix>,
    panel: PanelAdapter,
    cloud: CloudConnector,
    snapshots: watch::Sender<RoomSnapshot>,
}

impl RoomOrchestrator {
    /// Wire the room from its configuration.
    ///
    /// Fails only on configuration errors. Device, panel and cloud problems
    /// degrade the affected feature and are logged.
    pub fn build(
        config: RoomConfig,
        devices: RoomDevices,
        settings: &Settings,
        events: EventSender,
    ) -> Result<Self, RoomError> {
        config.validate()?;

        info!(
            "Building room {} ({} / {})",
            config.identity().unwrap_or("<unassigned>"),
            config.information.building.as_deref().unwrap_or("-"),
            config.information.floor.as_deref().unwrap_or("-")
        );

        let matrix = RoutingMatrix::build(&config.sources, &config.outputs, devices.factory.as_ref())?;
        let panel = PanelAdapter::new(devices.panel, &settings.panel, events.clone());
        let cloud = CloudConnector::new(devices.cloud, &settings.cloud, events);

        let state = RoomRuntimeState::new(settings.orchestrator.default_volume);
        let (snapshots, _) = watch::channel(RoomSnapshot {
            phase: RoomPhase::Running,
            state: state.clone(),
            applied: 0,
        });

        let room = Self {
            config,
            settings: settings.orchestrator.clone(),
            state,
            phase: RoomPhase::Running,
            applied: 0,
            matrix: Arc::new(matrix),
            panel,
            cloud,
            snapshots,
        };
        room.push_initial_feedback();
        Ok(room)
    }

    /// Build the room and start its event loop
    pub fn start(
        config: RoomConfig,
        devices: RoomDevices,
        settings: &Settings,
    ) -> Result<RoomHandle, RoomError> {
        let (events, receiver) = bus::channel(settings.orchestrator.event_queue_capacity);
        let room = Self::build(config, devices, settings, events.clone())?;
        Ok(room.run(events, receiver))
    }

    fn push_initial_feedback(&self) {
        self.panel.show_main_page(true);
        self.panel.set_power_indicator(false);
        self.panel.set_volume_feedback(self.state.volume_level);
        if let Err(e) = self.panel.show_preview(None) {
            debug!("Initial preview clear failed: {}", e);
        }
    }

    pub fn state(&self) -> &RoomRuntimeState {
        &self.state
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Apply one event. `Break` means the room has shut down.
    pub async fn handle(&mut self, event: RoomEvent) -> ControlFlow<()> {
        if self.phase == RoomPhase::ShuttingDown {
            debug!("Room is shutting down, dropping {} event", event.event_type());
            return ControlFlow::Break(());
        }
        debug!("Handling {} event", event.event_type());

        let flow = match event {
            RoomEvent::Panel(intent) => {
                self.on_panel_intent(intent);
                ControlFlow::Continue(())
            }
            RoomEvent::Cloud(event) => {
                self.on_cloud_event(event);
                ControlFlow::Continue(())
            }
            RoomEvent::Lifecycle(lifecycle) => self.on_lifecycle(lifecycle).await,
            RoomEvent::Admin(command) => {
                self.on_admin(command).await;
                ControlFlow::Continue(())
            }
        };

        self.applied += 1;
        self.publish_snapshot();
        flow
    }

    fn on_panel_intent(&mut self, intent: PanelIntent) {
        match intent {
            PanelIntent::PowerToggle if self.state.powered => self.power_off(),
            PanelIntent::PowerToggle => self.power_on(),
            PanelIntent::SelectSource(input) => self.select_source(input),
            PanelIntent::VolumeChanged(level) => {
                let level = level.min(MAX_VOLUME);
                self.state.volume_level = level;
                self.panel.set_volume_feedback(level);
                debug!("Volume set to {}", level);
            }
        }
    }

    fn power_on(&mut self) {
        info!("Room power on");
        self.state.powered = true;
        self.panel.set_power_indicator(true);
        self.cloud.set_room_power(true);
    }

    fn power_off(&mut self) {
        info!("Room power off");
        let default_volume = self.settings.default_volume.min(MAX_VOLUME);

        self.state.powered = false;
        self.state.display_powered = false;
        self.state.volume_level = default_volume;
        self.state.active_route = None;
        self.state.last_preview_url = None;

        if let Err(e) = self.panel.show_preview(None) {
            warn!("Failed to clear preview: {}", e);
        }
        self.panel.set_status_text("");
        self.panel.set_volume_feedback(default_volume);
        self.panel.set_power_indicator(false);

        self.cloud.set_room_power(false);
        self.cloud.set_display_power(false);
    }

    fn select_source(&mut self, input: i32) {
        if !self.state.powered {
            if !self.settings.select_source_powers_on {
                info!("Ignoring selection of source {}: room is off", input);
                return;
            }
            self.power_on();
        }

        let output = self.settings.default_output;
        let preview = match self.matrix.route(input, output) {
            Ok(preview) => preview,
            Err(e) => {
                warn!("Source {} not selected: {}", input, e);
                return;
            }
        };

        self.state.active_route = Some(ActiveRoute { input, output });
        self.state.last_preview_url = preview.clone();
        self.state.display_powered = true;

        if let Err(e) = self.panel.show_preview(preview.as_deref()) {
            warn!("Source {} routed without preview: {}", input, e);
        }
        self.cloud.set_room_power(true);
        self.cloud.set_display_power(true);
    }

    fn on_cloud_event(&mut self, event: CloudEvent) {
        match event {
            CloudEvent::RoomNameChanged(name) => {
                self.panel.set_status_text(&name);
                self.state.room_name_from_cloud = Some(name);
            }
            CloudEvent::OccupancyHintFromSensor(occupied) => {
                debug!("Occupancy hint: {}", occupied);
                self.state.occupied = occupied;
                self.cloud.set_occupancy(occupied);
            }
        }
    }

    async fn on_lifecycle(&mut self, lifecycle: SystemLifecycle) -> ControlFlow<()> {
        match lifecycle {
            SystemLifecycle::Pausing => {
                info!("Room paused");
                self.phase = RoomPhase::Paused;
                ControlFlow::Continue(())
            }
            SystemLifecycle::Resuming => {
                info!("Room resumed");
                self.phase = RoomPhase::Running;
                ControlFlow::Continue(())
            }
            SystemLifecycle::Stopping => {
                self.shutdown().await;
                ControlFlow::Break(())
            }
        }
    }

    async fn on_admin(&mut self, command: AdminCommand) {
        match command {
            AdminCommand::ClearSystemCheck => {
                if let Err(e) = self.cloud.clear_system_check().await {
                    warn!("Cannot clear system check: {}", e);
                }
            }
            AdminCommand::ReportStatus => {
                let cloud = self.cloud.state().await;
                info!(
                    "Status: phase={:?} powered={} display={} occupied={} volume={} route={:?} preview={:?} name={:?}",
                    self.phase,
                    self.state.powered,
                    self.state.display_powered,
                    self.state.occupied,
                    self.state.volume_level,
                    self.state.active_route,
                    self.state.last_preview_url,
                    self.state.room_name_from_cloud
                );
                info!(
                    "Components: sources={:?} panel_registered={} cloud={:?}/{:?}",
                    self.matrix.routable_sources(),
                    self.panel.is_registered(),
                    cloud.connection,
                    cloud.system_check
                );
            }
        }
    }

    /// Unregister everything within the shutdown grace period.
    /// Whatever doesn't finish in time is skipped.
    async fn shutdown(&mut self) {
        if self.phase == RoomPhase::ShuttingDown {
            return;
        }
        self.phase = RoomPhase::ShuttingDown;
        info!("Room shutting down");

        let grace = self.settings.shutdown_grace();
        let deadline = Instant::now() + grace;

        let matrix = self.matrix.clone();
        let unregister = tokio::task::spawn_blocking(move || matrix.unregister_all());
        match tokio::time::timeout(grace, unregister).await {
            Ok(Ok(report)) if report.failed.is_empty() => {
                debug!("Routing endpoints unregistered: {}", report.unregistered)
            }
            Ok(Ok(report)) => warn!(
                "{} routing endpoint(s) failed to unregister",
                report.failed.len()
            ),
            Ok(Err(e)) => error!("Routing unregister task panicked: {}", e),
            Err(_) => warn!("Routing endpoints did not unregister within {:?}, abandoning", grace),
        }

        let components: [&dyn RoomComponent; 2] = [&self.panel, &self.cloud];
        for component in components {
            let remaining = deadline.saturating_duration_since(Instant::now());
            stop_within(component, remaining).await;
        }

        info!("Room shutdown complete");
        self.publish_snapshot();
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            phase: self.phase,
            state: self.state.clone(),
            applied: self.applied,
        }
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    /// Spawn the event loop. `events` must feed `receiver`.
    pub fn run(mut self, events: EventSender, mut receiver: mpsc::Receiver<RoomEvent>) -> RoomHandle {
        let cancel = CancellationToken::new();
        let snapshots = self.snapshots.subscribe();
        let span = info_span!(
            "room",
            id = self.config.identity().unwrap_or("<unassigned>")
        );

        let token = cancel.clone();
        let task = tokio::spawn(
            async move {
                info!("Room event loop started");
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            self.shutdown().await;
                            break;
                        }
                        event = receiver.recv() => {
                            let Some(event) = event else {
                                info!("Event queue closed");
                                self.shutdown().await;
                                break;
                            };
                            if self.handle(event).await.is_break() {
                                break;
                            }
                        }
                    }
                }
                info!("Room event loop stopped");
            }
            .instrument(span),
        );

        RoomHandle {
            events,
            cancel,
            snapshots,
            task,
        }
    }
}

/// Handle to a running room
pub struct RoomHandle {
    events: EventSender,
    cancel: CancellationToken,
    snapshots: watch::Receiver<RoomSnapshot>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    /// Queue for feeding events into the room
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every applied event
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the room to stop and wait for it to finish shutting down.
    /// Falls back to cancelling the loop if the queue is gone.
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        if !self
            .events
            .publish(RoomEvent::Lifecycle(SystemLifecycle::Stopping))
            .await
        {
            self.cancel.cancel();
        }
        self.task.await
    }

    /// Kill the event loop without cleanup
    pub fn abort(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
