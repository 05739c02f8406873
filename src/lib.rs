//! AV Room Control
//!
//! Runs a single audio/video room: loads the room configuration, wires the
//! configured devices into a routing matrix, and mediates between the touch
//! panel, the routing hardware and the cloud management slot.
//!
//! This library provides:
//! - Room configuration loading with persisted room identity
//! - Source → display routing over registered transmitter/receiver endpoints
//! - Touch panel signal decoding and feedback rendering
//! - Cloud state mirroring, system checks and alert clearing
//! - A single-queue orchestrator that owns all room state

pub mod bus;
pub mod cloud;
pub mod component;
pub mod config;
pub mod console;
pub mod devices;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod panel;
pub mod routing;

pub use error::RoomError;
pub use orchestrator::{RoomDevices, RoomHandle, RoomOrchestrator};
