//! Error kinds for room construction, routing and feedback

use thiserror::Error;

use crate::devices::DeviceAddress;

/// Every failure the room core can report.
///
/// Only the configuration kinds (`ConfigNotFound`, `MalformedConfig`,
/// `ConfigurationConflict`) prevent a room from being built. Everything else
/// degrades a single feature and is reported to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error("malformed configuration: {0}")]
    MalformedConfig(String),

    /// Duplicate input or output index in the configuration
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("failed to write configuration: {0}")]
    WriteFailed(String),

    #[error("device registration failed at address {address:#04x}: {reason}")]
    DeviceRegistrationFailed {
        address: DeviceAddress,
        reason: String,
    },

    #[error("unknown source {0}")]
    UnknownSource(i32),

    #[error("unknown output {0}")]
    UnknownOutput(i32),

    #[error("route {input} -> {output} failed: {reason}")]
    RouteFailed {
        input: i32,
        output: i32,
        reason: String,
    },

    #[error("invalid preview url: {0}")]
    InvalidPreviewUrl(String),

    #[error("cloud connector unavailable")]
    CloudUnavailable,
}

impl RoomError {
    /// Whether this error prevents the room from being constructed at all
    pub fn is_fatal_to_room(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::MalformedConfig(_) | Self::ConfigurationConflict(_)
        )
    }

    /// Whether a route request failed because the route does not exist
    /// (as opposed to the devices failing mid-route)
    pub fn is_route_unavailable(&self) -> bool {
        matches!(self, Self::UnknownSource(_) | Self::UnknownOutput(_))
    }
}
