//! Source → output routing table
//!
//! Built once from the room configuration: every source gets a transmitter and
//! every output a receiver at its configured device address. Endpoints that
//! fail construction or registration are left out and their indices remembered,
//! so routing to them reports "unavailable" with a clear log line instead of
//! failing the whole room.
//!
//! After [`RoutingMatrix::build`] the table is never mutated, so lookups need
//! no locking.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::store::check_unique_indices;
use crate::config::{OutputSpec, SourceSpec};
use crate::devices::{DeviceAddress, DeviceError, DeviceFactory, Endpoint, Receiver, Transmitter};
use crate::error::RoomError;

struct SourceEntry {
    spec: SourceSpec,
    transmitter: Arc<dyn Transmitter>,
}

struct OutputEntry {
    spec: OutputSpec,
    receiver: Arc<dyn Receiver>,
}

/// Outcome of [`RoutingMatrix::unregister_all`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnregisterReport {
    pub unregistered: usize,
    pub failed: Vec<(DeviceAddress, String)>,
}

pub struct RoutingMatrix {
    sources: BTreeMap<i32, SourceEntry>,
    outputs: BTreeMap<i32, OutputEntry>,
    /// Configured indices whose endpoint could not be brought up
    unavailable_sources: BTreeSet<i32>,
    unavailable_outputs: BTreeSet<i32>,
}

impl RoutingMatrix {
    /// Construct and register an endpoint for every source and output.
    ///
    /// Fails only on duplicate indices; device failures are logged and the
    /// affected index is excluded.
    pub fn build(
        sources: &[SourceSpec],
        outputs: &[OutputSpec],
        factory: &dyn DeviceFactory,
    ) -> Result<Self, RoomError> {
        check_unique_indices(sources, outputs).inspect_err(|e| {
            error!("Refusing to build routing matrix: {}", e);
        })?;

        let mut matrix = Self {
            sources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            unavailable_sources: BTreeSet::new(),
            unavailable_outputs: BTreeSet::new(),
        };

        for spec in sources {
            let bring_up = factory
                .transmitter(spec.device_address)
                .and_then(|tx| tx.register().map(|()| tx));
            match bring_up {
                Ok(transmitter) => {
                    debug!(
                        "Source {} ({}) registered at {:#04x}",
                        spec.input_index, spec.name, spec.device_address
                    );
                    matrix.sources.insert(
                        spec.input_index,
                        SourceEntry {
                            spec: spec.clone(),
                            transmitter,
                        },
                    );
                }
                Err(e) => {
                    let err = registration_failed(spec.device_address, &e);
                    error!("Source {} ({}) excluded: {}", spec.input_index, spec.name, err);
                    matrix.unavailable_sources.insert(spec.input_index);
                }
            }
        }

        for spec in outputs {
            let bring_up = factory
                .receiver(spec.device_address)
                .and_then(|rx| rx.register().map(|()| rx));
            match bring_up {
                Ok(receiver) => {
                    debug!(
                        "Output {} ({}) registered at {:#04x}",
                        spec.output_index, spec.name, spec.device_address
                    );
                    matrix.outputs.insert(
                        spec.output_index,
                        OutputEntry {
                            spec: spec.clone(),
                            receiver,
                        },
                    );
                }
                Err(e) => {
                    let err = registration_failed(spec.device_address, &e);
                    error!("Output {} ({}) excluded: {}", spec.output_index, spec.name, err);
                    matrix.unavailable_outputs.insert(spec.output_index);
                }
            }
        }

        info!(
            "Routing matrix ready: {}/{} source(s), {}/{} output(s)",
            matrix.sources.len(),
            sources.len(),
            matrix.outputs.len(),
            outputs.len()
        );
        Ok(matrix)
    }

    /// Point output `output` at source `input` and return the source's preview URL.
    ///
    /// Routing the same pair again is not an error and leaves the receiver in the
    /// same state.
    pub fn route(&self, input: i32, output: i32) -> Result<Option<String>, RoomError> {
        let source = match self.sources.get(&input) {
            Some(source) => source,
            None => {
                if self.unavailable_sources.contains(&input) {
                    warn!("Route {} -> {}: source failed registration", input, output);
                } else {
                    warn!("Route {} -> {}: source not configured", input, output);
                }
                return Err(RoomError::UnknownSource(input));
            }
        };
        let destination = match self.outputs.get(&output) {
            Some(destination) => destination,
            None => {
                if self.unavailable_outputs.contains(&output) {
                    warn!("Route {} -> {}: output failed registration", input, output);
                } else {
                    warn!("Route {} -> {}: output not configured", input, output);
                }
                return Err(RoomError::UnknownOutput(output));
            }
        };

        let route_failed = |e: DeviceError| {
            let err = RoomError::RouteFailed {
                input,
                output,
                reason: e.to_string(),
            };
            error!("{}", err);
            err
        };

        let stream = source.transmitter.publish_stream().map_err(route_failed)?;
        destination
            .receiver
            .consume_stream(&stream)
            .map_err(route_failed)?;

        info!(
            "Routed {} ({}) -> {} ({})",
            input, source.spec.name, output, destination.spec.name
        );

        Ok(source
            .spec
            .preview_url
            .clone()
            .filter(|url| !url.trim().is_empty()))
    }

    /// Input indices that can currently be routed
    pub fn routable_sources(&self) -> Vec<i32> {
        self.sources.keys().copied().collect()
    }

    pub fn routable_outputs(&self) -> Vec<i32> {
        self.outputs.keys().copied().collect()
    }

    pub fn is_source_available(&self, input: i32) -> bool {
        self.sources.contains_key(&input)
    }

    /// Unregister every owned endpoint. Errors are collected, not raised.
    pub fn unregister_all(&self) -> UnregisterReport {
        let mut report = UnregisterReport::default();

        let mut record = |address: DeviceAddress, result: Result<(), DeviceError>| match result {
            Ok(()) => report.unregistered += 1,
            Err(e) => {
                warn!("Failed to unregister device {:#04x}: {}", address, e);
                report.failed.push((address, e.to_string()));
            }
        };

        for source in self.sources.values() {
            record(source.transmitter.address(), source.transmitter.unregister());
        }
        for output in self.outputs.values() {
            record(output.receiver.address(), output.receiver.unregister());
        }

        info!(
            "Unregistered {} routing endpoint(s), {} failure(s)",
            report.unregistered,
            report.failed.len()
        );
        report
    }
}

fn registration_failed(address: DeviceAddress, e: &DeviceError) -> RoomError {
    RoomError::DeviceRegistrationFailed {
        address,
        reason: e.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::devices::simulated::SimulatedDevices;

    fn source(input: i32, ipid: DeviceAddress, preview: Option<&str>) -> SourceSpec {
        SourceSpec {
            name: format!("Source {}", input),
            input_index: input,
            preview_url: preview.map(str::to_string),
            device_address: ipid,
            ..Default::default()
        }
    }

    fn output(index: i32, ipid: DeviceAddress) -> OutputSpec {
        OutputSpec {
            name: format!("Screen {}", index),
            output_index: index,
            device_address: ipid,
        }
    }

    #[test]
    fn test_route_moves_stream_and_returns_preview() {
        let devices = SimulatedDevices::new();
        let matrix = RoutingMatrix::build(
            &[source(1, 0x11, Some("rtsp://cam.local/feed"))],
            &[output(1, 0x21)],
            &devices,
        )
        .unwrap();

        let preview = matrix.route(1, 1).unwrap();

        assert_eq!(preview.as_deref(), Some("rtsp://cam.local/feed"));
        assert_eq!(
            devices.receiver_stream(0x21),
            Some(SimulatedDevices::transmitter_stream(0x11))
        );
    }

    #[test]
    fn test_empty_preview_is_none() {
        let devices = SimulatedDevices::new();
        let matrix =
            RoutingMatrix::build(&[source(1, 0x11, Some(""))], &[output(1, 0x21)], &devices)
                .unwrap();
        assert_eq!(matrix.route(1, 1), Ok(None));
    }

    #[test]
    fn test_stream_failure_is_route_failed() {
        let devices = SimulatedDevices::new().fail_streams(0x21);
        let matrix =
            RoutingMatrix::build(&[source(1, 0x11, None)], &[output(1, 0x21)], &devices).unwrap();

        assert!(matches!(
            matrix.route(1, 1),
            Err(RoomError::RouteFailed {
                input: 1,
                output: 1,
                ..
            })
        ));
        assert_eq!(devices.receiver_stream(0x21), None);
    }

    #[test]
    fn test_construction_failure_excludes_output() {
        let devices = SimulatedDevices::new().fail_construction(0x22);
        let matrix = RoutingMatrix::build(
            &[source(1, 0x11, None)],
            &[output(1, 0x21), output(2, 0x22)],
            &devices,
        )
        .unwrap();

        assert_eq!(matrix.routable_outputs(), vec![1]);
        assert_eq!(matrix.route(1, 2), Err(RoomError::UnknownOutput(2)));
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let devices = SimulatedDevices::new();
        let result = RoutingMatrix::build(
            &[source(1, 0x11, None)],
            &[output(1, 0x21), output(1, 0x22)],
            &devices,
        );

        assert!(matches!(result, Err(RoomError::ConfigurationConflict(_))));
        assert_eq!(devices.registered_count(), 0);
    }

    #[test]
    fn test_unregister_all() {
        let devices = SimulatedDevices::new();
        let matrix = RoutingMatrix::build(
            &[source(1, 0x11, None), source(2, 0x12, None)],
            &[output(1, 0x21)],
            &devices,
        )
        .unwrap();
        assert_eq!(devices.registered_count(), 3);

        let report = matrix.unregister_all();

        assert_eq!(report.unregistered, 3);
        assert!(report.failed.is_empty());
        assert_eq!(devices.registered_count(), 0);
    }
}
