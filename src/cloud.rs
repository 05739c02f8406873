//! Cloud fleet-management connector
//!
//! Mirrors room state to the remote management slot and turns the remote
//! side's events into room behaviour. The connector owns one background pump
//! that reads [`RemoteEvent`]s; system checks and alert clearing run on their
//! own tasks so their delays never hold up the pump or the orchestrator.
//!
//! If the slot can't be registered the connector is inert: every mirror call
//! is dropped with a warning and the rest of the room carries on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{CloudEvent, EventSender, RoomEvent};
use crate::component::RoomComponent;
use crate::config::CloudSettings;
use crate::devices::Endpoint;
use crate::error::RoomError;

pub const SYSTEM_CHECK_STARTED: &str = "SystemCheck started";
pub const SYSTEM_CHECK_PASSED: &str = "Microphones are working!";

/// The room's registration slot on the management service
pub trait CloudSlot: Endpoint {
    /// Push one feedback value to the remote side
    fn write(&self, feedback: CloudFeedback);
}

/// Values the room reports to the management service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudFeedback {
    SystemPower(bool),
    DisplayPower(bool),
    Occupied(bool),
    ResolveAllAlerts(bool),
    SystemCheckState(SystemCheckState),
    SystemCheckMessage(String),
}

/// Events raised by the management service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Online(bool),
    RoomName(String),
    MaintenanceMode(bool),
    Occupancy(bool),
    SystemCheckRequested,
    DisplayPower(bool),
    SystemPower(bool),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Registering,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SystemCheckState {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

/// Snapshot of the connector's state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudState {
    pub connection: ConnectionState,
    pub system_check: SystemCheckState,
    /// Last room name pushed by the remote side
    pub room_name: Option<String>,
}

/// The slot plus the stream of events the remote side raises on it
pub struct CloudLink {
    pub slot: Arc<dyn CloudSlot>,
    pub events: mpsc::Receiver<RemoteEvent>,
}

/// The system check waiting out its diagnostic delay
struct PendingCheck {
    id: u64,
    cancel: CancellationToken,
}

/// Everything the background tasks share
#[derive(Clone)]
struct Shared {
    slot: Arc<dyn CloudSlot>,
    state: Arc<RwLock<CloudState>>,
    room_events: EventSender,
    shutdown: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// Only touched while holding the `state` write lock
    pending_check: Arc<Mutex<Option<PendingCheck>>>,
    next_check_id: Arc<AtomicU64>,
    system_check_delay: Duration,
    alert_debounce: Duration,
}

impl Shared {
    fn write(&self, feedback: CloudFeedback) {
        self.slot.write(feedback);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    async fn handle_remote(&self, event: RemoteEvent) {
        match event {
            RemoteEvent::Online(true) => {
                info!("Cloud slot online");
                self.state.write().await.connection = ConnectionState::Online;
                self.track(tokio::spawn(resolve_all_alerts(self.clone())));
            }
            RemoteEvent::Online(false) => {
                warn!("Cloud slot offline");
                self.state.write().await.connection = ConnectionState::Offline;
            }
            RemoteEvent::RoomName(name) => {
                info!("Room name changed by cloud: {}", name);
                self.state.write().await.room_name = Some(name.clone());
                let event = RoomEvent::Cloud(CloudEvent::RoomNameChanged(name));
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = self.room_events.publish(event) => {}
                }
            }
            RemoteEvent::MaintenanceMode(on) => {
                info!("Cloud maintenance mode: {}", on);
            }
            RemoteEvent::Occupancy(occupied) => {
                debug!("Cloud reports occupancy {}, ignored", occupied);
            }
            RemoteEvent::DisplayPower(on) => {
                info!("Cloud display power event: {}", on);
            }
            RemoteEvent::SystemPower(on) => {
                info!("Cloud system power event: {}", on);
            }
            RemoteEvent::SystemCheckRequested => self.start_system_check().await,
        }
    }

    fn pending_check(&self) -> MutexGuard<'_, Option<PendingCheck>> {
        self.pending_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn start_system_check(&self) {
        let mut state = self.state.write().await;
        if state.system_check == SystemCheckState::Running {
            info!("System check already running, ignoring request");
            return;
        }

        let id = self.next_check_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.pending_check() = Some(PendingCheck {
            id,
            cancel: cancel.clone(),
        });

        state.system_check = SystemCheckState::Running;
        info!("System check {} started", id);
        self.write(CloudFeedback::SystemCheckState(SystemCheckState::Running));
        self.write(CloudFeedback::SystemCheckMessage(
            SYSTEM_CHECK_STARTED.to_string(),
        ));
        drop(state);

        self.track(tokio::spawn(finish_system_check(self.clone(), id, cancel)));
    }

    /// Record the outcome of check `id`, unless it has been cleared since
    async fn complete_check(&self, id: u64, outcome: SystemCheckState) {
        let mut state = self.state.write().await;
        {
            let mut pending = self.pending_check();
            if pending.as_ref().map(|p| p.id) != Some(id) {
                debug!("System check {} is no longer current, dropping outcome", id);
                return;
            }
            *pending = None;
        }

        if outcome == SystemCheckState::Success {
            self.write(CloudFeedback::SystemCheckMessage(
                SYSTEM_CHECK_PASSED.to_string(),
            ));
            info!("System check {} passed", id);
        }
        state.system_check = outcome;
        self.write(CloudFeedback::SystemCheckState(outcome));
    }

    /// Drop any pending check, then report Idle, Running, Success
    async fn clear_system_check(&self) {
        let mut state = self.state.write().await;
        if let Some(pending) = self.pending_check().take() {
            debug!("Cancelling pending system check {}", pending.id);
            pending.cancel.cancel();
        }
        for check in [
            SystemCheckState::Idle,
            SystemCheckState::Running,
            SystemCheckState::Success,
        ] {
            state.system_check = check;
            self.write(CloudFeedback::SystemCheckState(check));
        }
    }
}

/// Clear outstanding alerts: false, wait, false, wait, true
async fn resolve_all_alerts(shared: Shared) {
    for value in [false, false] {
        shared.write(CloudFeedback::ResolveAllAlerts(value));
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                debug!("Alert clearing interrupted by shutdown");
                return;
            }
            _ = tokio::time::sleep(shared.alert_debounce) => {}
        }
    }
    shared.write(CloudFeedback::ResolveAllAlerts(true));
    debug!("Outstanding alerts resolved");
}

async fn finish_system_check(shared: Shared, id: u64, cancel: CancellationToken) {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("System check {} cleared before completion", id);
            return;
        }
        _ = shared.shutdown.cancelled() => {
            warn!("System check {} interrupted by shutdown", id);
            SystemCheckState::Failed
        }
        _ = tokio::time::sleep(shared.system_check_delay) => SystemCheckState::Success,
    };
    shared.complete_check(id, outcome).await;
}

async fn pump(shared: Shared, mut events: mpsc::Receiver<RemoteEvent>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                debug!("Cloud pump shutting down");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => shared.handle_remote(event).await,
                    None => {
                        debug!("Cloud event stream closed");
                        break;
                    }
                }
            }
        }
    }
}

pub struct CloudConnector {
    /// None when disabled or registration failed
    shared: Option<Shared>,
    /// Kept for state() when inert
    state: Arc<RwLock<CloudState>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl CloudConnector {
    /// Register the slot and start the event pump. Never fails: any problem
    /// leaves the connector inert.
    pub fn new(link: Option<CloudLink>, settings: &CloudSettings, room_events: EventSender) -> Self {
        let state = Arc::new(RwLock::new(CloudState::default()));
        let shutdown = CancellationToken::new();

        let link = match link {
            Some(link) if settings.enabled => link,
            Some(_) => {
                info!("Cloud connector disabled by settings");
                return Self::inert(state, shutdown);
            }
            None => {
                warn!("No cloud slot configured, cloud features are inert");
                return Self::inert(state, shutdown);
            }
        };

        let CloudLink { slot, events } = link;
        // Nothing else can hold the lock yet
        if let Ok(mut s) = state.try_write() {
            s.connection = ConnectionState::Registering;
        }

        if let Err(e) = slot.register() {
            error!(
                "Cloud slot registration at {:#04x} failed: {} ({})",
                slot.address(),
                e,
                RoomError::CloudUnavailable
            );
            if let Ok(mut s) = state.try_write() {
                s.connection = ConnectionState::Idle;
            }
            return Self::inert(state, shutdown);
        }
        info!("Cloud slot registered at {:#04x}", slot.address());

        let shared = Shared {
            slot,
            state: state.clone(),
            room_events,
            shutdown: shutdown.clone(),
            tasks: Arc::new(Mutex::new(Vec::new())),
            pending_check: Arc::new(Mutex::new(None)),
            next_check_id: Arc::new(AtomicU64::new(1)),
            system_check_delay: settings.system_check_delay(),
            alert_debounce: settings.alert_debounce(),
        };
        shared.track(tokio::spawn(pump(shared.clone(), events)));

        Self {
            shared: Some(shared),
            state,
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    fn inert(state: Arc<RwLock<CloudState>>, shutdown: CancellationToken) -> Self {
        Self {
            shared: None,
            state,
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    fn mirror(&self, what: &str, feedback: CloudFeedback) {
        match &self.shared {
            Some(shared) => shared.write(feedback),
            None => warn!("Cloud connector not registered, dropping {} update", what),
        }
    }

    pub fn set_room_power(&self, on: bool) {
        self.mirror("room power", CloudFeedback::SystemPower(on));
    }

    pub fn set_display_power(&self, on: bool) {
        self.mirror("display power", CloudFeedback::DisplayPower(on));
    }

    pub fn set_occupancy(&self, occupied: bool) {
        self.mirror("occupancy", CloudFeedback::Occupied(occupied));
    }

    /// Administrative reset: Idle, Running, Success without the diagnostic delay.
    /// A check still waiting on its delay is cancelled and never reports.
    pub async fn clear_system_check(&self) -> Result<(), RoomError> {
        let shared = self.shared.as_ref().ok_or(RoomError::CloudUnavailable)?;
        shared.clear_system_check().await;
        info!("System check cleared");
        Ok(())
    }

    pub async fn state(&self) -> CloudState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl RoomComponent for CloudConnector {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn is_registered(&self) -> bool {
        self.shared.is_some()
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let Some(shared) = &self.shared else {
            return;
        };

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = shared.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Cloud task panicked: {}", e);
            }
        }

        match shared.slot.unregister() {
            Ok(()) => info!("Cloud slot unregistered"),
            Err(e) => warn!("Failed to unregister cloud slot: {}", e),
        }
        self.state.write().await.connection = ConnectionState::Idle;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::devices::simulated::SimulatedCloudSlot;

    fn fast_settings() -> CloudSettings {
        CloudSettings {
            enabled: true,
            system_check_delay_ms: 50,
            alert_debounce_ms: 5,
        }
    }

    fn connector(
        slot: &SimulatedCloudSlot,
    ) -> (
        CloudConnector,
        mpsc::Sender<RemoteEvent>,
        mpsc::Receiver<RoomEvent>,
    ) {
        connector_with(slot, &fast_settings())
    }

    fn connector_with(
        slot: &SimulatedCloudSlot,
        settings: &CloudSettings,
    ) -> (
        CloudConnector,
        mpsc::Sender<RemoteEvent>,
        mpsc::Receiver<RoomEvent>,
    ) {
        let (remote_tx, remote_rx) = mpsc::channel(8);
        let (room_tx, room_rx) = bus::channel(8);
        let link = CloudLink {
            slot: Arc::new(slot.clone()),
            events: remote_rx,
        };
        (
            CloudConnector::new(Some(link), settings, room_tx),
            remote_tx,
            room_rx,
        )
    }

    fn passed_count(slot: &SimulatedCloudSlot) -> usize {
        slot.writes()
            .iter()
            .filter(|w| **w == CloudFeedback::SystemCheckMessage(SYSTEM_CHECK_PASSED.to_string()))
            .count()
    }

    async fn wait_for_check(cloud: &CloudConnector, expected: SystemCheckState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while cloud.state().await.system_check != expected {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("system check state not reached");
    }

    #[tokio::test]
    async fn test_room_name_is_cached_and_raised() {
        let slot = SimulatedCloudSlot::new(0x0a);
        let (cloud, remote, mut room) = connector(&slot);

        remote
            .send(RemoteEvent::RoomName("Boardroom".to_string()))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), room.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            RoomEvent::Cloud(CloudEvent::RoomNameChanged("Boardroom".to_string()))
        );
        assert_eq!(cloud.state().await.room_name.as_deref(), Some("Boardroom"));
    }

    #[tokio::test]
    async fn test_online_resolves_alerts_in_order() {
        let slot = SimulatedCloudSlot::new(0x0a);
        let (cloud, remote, _room) = connector(&slot);

        remote.send(RemoteEvent::Online(true)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !slot
                .writes()
                .contains(&CloudFeedback::ResolveAllAlerts(true))
            {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            slot.writes(),
            vec![
                CloudFeedback::ResolveAllAlerts(false),
                CloudFeedback::ResolveAllAlerts(false),
                CloudFeedback::ResolveAllAlerts(true),
            ]
        );
        assert_eq!(cloud.state().await.connection, ConnectionState::Online);
    }

    #[tokio::test]
    async fn test_system_check_runs_to_success() {
        let slot = SimulatedCloudSlot::new(0x0a);
        let (cloud, remote, _room) = connector(&slot);

        remote.send(RemoteEvent::SystemCheckRequested).await.unwrap();
        remote.send(RemoteEvent::SystemCheckRequested).await.unwrap();
        wait_for_check(&cloud, SystemCheckState::Success).await;

        let writes = slot.writes();
        assert_eq!(
            writes,
            vec![
                CloudFeedback::SystemCheckState(SystemCheckState::Running),
                CloudFeedback::SystemCheckMessage(SYSTEM_CHECK_STARTED.to_string()),
                CloudFeedback::SystemCheckMessage(SYSTEM_CHECK_PASSED.to_string()),
                CloudFeedback::SystemCheckState(SystemCheckState::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_during_check_marks_failed_and_unregisters() {
        let slot = SimulatedCloudSlot::new(0x0a);
        let (remote_tx, remote_rx) = mpsc::channel(8);
        let (room_tx, _room_rx) = bus::channel(8);
        let settings = CloudSettings {
            system_check_delay_ms: 60_000,
            ..fast_settings()
        };
        let cloud = CloudConnector::new(
            Some(CloudLink {
                slot: Arc::new(slot.clone()),
                events: remote_rx,
            }),
            &settings,
            room_tx,
        );

        remote_tx
            .send(RemoteEvent::SystemCheckRequested)
            .await
            .unwrap();
        wait_for_check(&cloud, SystemCheckState::Running).await;

        cloud.stop().await;

        assert_eq!(cloud.state().await.system_check, SystemCheckState::Failed);
        assert!(!slot.is_registered());
        assert_eq!(
            slot.writes().last(),
            Some(&CloudFeedback::SystemCheckState(SystemCheckState::Failed))
        );
    }

    #[tokio::test]
    async fn test_clear_system_check_sequence() {
        let slot = SimulatedCloudSlot::new(0x0a);
        let (cloud, _remote, _room) = connector(&slot);

        cloud.clear_system_check().await.unwrap();

        assert_eq!(
            slot.writes(),
            vec![
                CloudFeedback::SystemCheckState(SystemCheckState::Idle),
                CloudFeedback::SystemCheckState(SystemCheckState::Running),
                CloudFeedback::SystemCheckState(SystemCheckState::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_cancels_pending_check() {
        let slot = SimulatedCloudSlot::new(0x0a);
        let settings = CloudSettings {
            system_check_delay_ms: 100,
            ..fast_settings()
        };
        let (cloud, remote, _room) = connector_with(&slot, &settings);

        remote.send(RemoteEvent::SystemCheckRequested).await.unwrap();
        wait_for_check(&cloud, SystemCheckState::Running).await;
        cloud.clear_system_check().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        remote.send(RemoteEvent::SystemCheckRequested).await.unwrap();
        wait_for_check(&cloud, SystemCheckState::Running).await;

        // Past the cleared check's delay, short of the second one's
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(passed_count(&slot), 0);
        assert_eq!(cloud.state().await.system_check, SystemCheckState::Running);

        wait_for_check(&cloud, SystemCheckState::Success).await;

        assert_eq!(passed_count(&slot), 1);
        assert_eq!(
            slot.writes(),
            vec![
                CloudFeedback::SystemCheckState(SystemCheckState::Running),
                CloudFeedback::SystemCheckMessage(SYSTEM_CHECK_STARTED.to_string()),
                CloudFeedback::SystemCheckState(SystemCheckState::Idle),
                CloudFeedback::SystemCheckState(SystemCheckState::Running),
                CloudFeedback::SystemCheckState(SystemCheckState::Success),
                CloudFeedback::SystemCheckState(SystemCheckState::Running),
                CloudFeedback::SystemCheckMessage(SYSTEM_CHECK_STARTED.to_string()),
                CloudFeedback::SystemCheckMessage(SYSTEM_CHECK_PASSED.to_string()),
                CloudFeedback::SystemCheckState(SystemCheckState::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_registration_is_inert() {
        let slot = SimulatedCloudSlot::rejecting(0x0a);
        let (cloud, _remote, _room) = connector(&slot);

        assert!(!cloud.is_registered());
        cloud.set_room_power(true);
        cloud.set_occupancy(true);

        assert!(slot.writes().is_empty());
        assert_eq!(
            cloud.clear_system_check().await,
            Err(RoomError::CloudUnavailable)
        );
        assert_eq!(cloud.state().await.connection, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_mirrors_write_through() {
        let slot = SimulatedCloudSlot::new(0x0a);
        let (cloud, _remote, _room) = connector(&slot);

        cloud.set_room_power(false);
        cloud.set_display_power(false);

        assert_eq!(
            slot.writes(),
            vec![
                CloudFeedback::SystemPower(false),
                CloudFeedback::DisplayPower(false),
            ]
        );
        assert_eq!(cloud.state().await.connection, ConnectionState::Registering);
    }
}
