//! In-memory hardware for running the room without devices attached
//!
//! Used by the binary (console-driven room) and by tests. Failures can be
//! injected per address; everything the room does to the hardware is
//! recorded so it can be inspected afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{
    DeviceAddress, DeviceError, DeviceFactory, Endpoint, Receiver, StreamDescriptor, Transmitter,
};
use crate::cloud::{CloudFeedback, CloudSlot};
use crate::panel::{ControlSurface, Join};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct SimState {
    failing_construction: HashSet<DeviceAddress>,
    failing_registration: HashSet<DeviceAddress>,
    failing_streams: HashSet<DeviceAddress>,
    registered: HashSet<DeviceAddress>,
    receiver_streams: HashMap<DeviceAddress, StreamDescriptor>,
}

/// Device factory backed by shared in-memory state
#[derive(Clone, Default)]
pub struct SimulatedDevices {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make construction at `address` fail
    pub fn fail_construction(self, address: DeviceAddress) -> Self {
        lock(&self.state).failing_construction.insert(address);
        self
    }

    /// Make registration at `address` fail
    pub fn fail_registration(self, address: DeviceAddress) -> Self {
        lock(&self.state).failing_registration.insert(address);
        self
    }

    /// Make publish/consume at `address` fail
    pub fn fail_streams(self, address: DeviceAddress) -> Self {
        lock(&self.state).failing_streams.insert(address);
        self
    }

    pub fn is_registered(&self, address: DeviceAddress) -> bool {
        lock(&self.state).registered.contains(&address)
    }

    pub fn registered_count(&self) -> usize {
        lock(&self.state).registered.len()
    }

    /// Stream a receiver is currently consuming
    pub fn receiver_stream(&self, address: DeviceAddress) -> Option<StreamDescriptor> {
        lock(&self.state).receiver_streams.get(&address).cloned()
    }

    /// Stream a simulated transmitter at `address` publishes
    pub fn transmitter_stream(address: DeviceAddress) -> StreamDescriptor {
        StreamDescriptor::new(format!("rtsp://nvx-{:02x}.local:554/live.sdp", address))
    }

    fn endpoint(&self, address: DeviceAddress) -> Result<Arc<SimEndpoint>, DeviceError> {
        if lock(&self.state).failing_construction.contains(&address) {
            return Err(DeviceError::Construct {
                address,
                reason: "no device answers at this address".to_string(),
            });
        }
        Ok(Arc::new(SimEndpoint {
            address,
            state: self.state.clone(),
        }))
    }
}

impl DeviceFactory for SimulatedDevices {
    fn transmitter(&self, address: DeviceAddress) -> Result<Arc<dyn Transmitter>, DeviceError> {
        let endpoint: Arc<dyn Transmitter> = self.endpoint(address)?;
        Ok(endpoint)
    }

    fn receiver(&self, address: DeviceAddress) -> Result<Arc<dyn Receiver>, DeviceError> {
        let endpoint: Arc<dyn Receiver> = self.endpoint(address)?;
        Ok(endpoint)
    }
}

struct SimEndpoint {
    address: DeviceAddress,
    state: Arc<Mutex<SimState>>,
}

impl Endpoint for SimEndpoint {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn register(&self) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        if state.failing_registration.contains(&self.address) {
            return Err(DeviceError::Registration("ipid already in use".to_string()));
        }
        state.registered.insert(self.address);
        Ok(())
    }

    fn unregister(&self) -> Result<(), DeviceError> {
        lock(&self.state).registered.remove(&self.address);
        Ok(())
    }
}

impl Transmitter for SimEndpoint {
    fn publish_stream(&self) -> Result<StreamDescriptor, DeviceError> {
        let state = lock(&self.state);
        if state.failing_streams.contains(&self.address) {
            return Err(DeviceError::Stream("no stream published".to_string()));
        }
        if !state.registered.contains(&self.address) {
            return Err(DeviceError::Offline);
        }
        Ok(SimulatedDevices::transmitter_stream(self.address))
    }
}

impl Receiver for SimEndpoint {
    fn consume_stream(&self, stream: &StreamDescriptor) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        if state.failing_streams.contains(&self.address) {
            return Err(DeviceError::Stream("server url rejected".to_string()));
        }
        if !state.registered.contains(&self.address) {
            return Err(DeviceError::Offline);
        }
        state.receiver_streams.insert(self.address, stream.clone());
        Ok(())
    }
}

/// A feedback call made on a control surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Text(Join, String),
    Visibility(Join, bool),
    Level(Join, u16),
    Url(Join, String),
}

/// Control surface that records every feedback call
#[derive(Clone)]
pub struct RecordingSurface {
    address: DeviceAddress,
    reject_registration: bool,
    registered: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<SurfaceCall>>>,
}

impl RecordingSurface {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            reject_registration: false,
            registered: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A surface whose registration is always rejected
    pub fn rejecting(address: DeviceAddress) -> Self {
        Self {
            reject_registration: true,
            ..Self::new(address)
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Most recent URL pushed to `join`
    pub fn last_url(&self, join: Join) -> Option<String> {
        lock(&self.calls).iter().rev().find_map(|c| match c {
            SurfaceCall::Url(j, url) if *j == join => Some(url.clone()),
            _ => None,
        })
    }

    /// Most recent text pushed to `join`
    pub fn last_text(&self, join: Join) -> Option<String> {
        lock(&self.calls).iter().rev().find_map(|c| match c {
            SurfaceCall::Text(j, text) if *j == join => Some(text.clone()),
            _ => None,
        })
    }

    /// Most recent level pushed to `join`
    pub fn last_level(&self, join: Join) -> Option<u16> {
        lock(&self.calls).iter().rev().find_map(|c| match c {
            SurfaceCall::Level(j, level) if *j == join => Some(*level),
            _ => None,
        })
    }

    /// Most recent digital/visibility value pushed to `join`
    pub fn last_visibility(&self, join: Join) -> Option<bool> {
        lock(&self.calls).iter().rev().find_map(|c| match c {
            SurfaceCall::Visibility(j, v) if *j == join => Some(*v),
            _ => None,
        })
    }

    fn record(&self, call: SurfaceCall) {
        debug!("Panel {:#04x} feedback: {:?}", self.address, call);
        lock(&self.calls).push(call);
    }
}

impl Endpoint for RecordingSurface {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn register(&self) -> Result<(), DeviceError> {
        if self.reject_registration {
            return Err(DeviceError::Registration("panel not licensed".to_string()));
        }
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unregister(&self) -> Result<(), DeviceError> {
        self.registered.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl ControlSurface for RecordingSurface {
    fn set_text(&self, join: Join, text: &str) {
        self.record(SurfaceCall::Text(join, text.to_string()));
    }

    fn set_visibility(&self, join: Join, visible: bool) {
        self.record(SurfaceCall::Visibility(join, visible));
    }

    fn set_level(&self, join: Join, level: u16) {
        self.record(SurfaceCall::Level(join, level));
    }

    fn set_url(&self, join: Join, url: &str) {
        self.record(SurfaceCall::Url(join, url.to_string()));
    }
}

/// Cloud room slot that records every feedback write
#[derive(Clone)]
pub struct SimulatedCloudSlot {
    address: DeviceAddress,
    reject_registration: bool,
    registered: Arc<AtomicBool>,
    writes: Arc<Mutex<Vec<CloudFeedback>>>,
}

impl SimulatedCloudSlot {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            reject_registration: false,
            registered: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A slot whose registration is always rejected
    pub fn rejecting(address: DeviceAddress) -> Self {
        Self {
            reject_registration: true,
            ..Self::new(address)
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<CloudFeedback> {
        lock(&self.writes).clone()
    }

    pub fn clear(&self) {
        lock(&self.writes).clear();
    }
}

impl Endpoint for SimulatedCloudSlot {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn register(&self) -> Result<(), DeviceError> {
        if self.reject_registration {
            return Err(DeviceError::Registration("room slot not claimed".to_string()));
        }
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unregister(&self) -> Result<(), DeviceError> {
        self.registered.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl CloudSlot for SimulatedCloudSlot {
    fn write(&self, feedback: CloudFeedback) {
        debug!("Cloud slot feedback: {:?}", feedback);
        lock(&self.writes).push(feedback);
    }
}
