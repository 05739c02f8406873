//! Device layer interface
//!
//! The hardware drivers live outside this crate. The room only needs to
//! construct endpoints at an address, register/unregister them, and move a
//! stream descriptor from a transmitter to a receiver.

pub mod simulated;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Hardware slot identifier (IPID) of a device
pub type DeviceAddress = u32;

/// Errors raised by the device layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("cannot construct device at {address:#04x}: {reason}")]
    Construct {
        address: DeviceAddress,
        reason: String,
    },

    #[error("registration rejected: {0}")]
    Registration(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("device offline")]
    Offline,
}

/// The stream a transmitter publishes and a receiver consumes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamDescriptor(String);

impl StreamDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registrable device handle
pub trait Endpoint: Send + Sync {
    fn address(&self) -> DeviceAddress;

    fn register(&self) -> Result<(), DeviceError>;

    fn unregister(&self) -> Result<(), DeviceError>;
}

/// Encoder side of a route
pub trait Transmitter: Endpoint {
    /// Current stream descriptor published by this transmitter
    fn publish_stream(&self) -> Result<StreamDescriptor, DeviceError>;
}

/// Decoder side of a route
pub trait Receiver: Endpoint {
    /// Point this receiver at a transmitter's stream
    fn consume_stream(&self, stream: &StreamDescriptor) -> Result<(), DeviceError>;
}

/// Constructs endpoints at a given address. Construction does not register.
pub trait DeviceFactory: Send + Sync {
    fn transmitter(&self, address: DeviceAddress) -> Result<Arc<dyn Transmitter>, DeviceError>;

    fn receiver(&self, address: DeviceAddress) -> Result<Arc<dyn Receiver>, DeviceError>;
}
