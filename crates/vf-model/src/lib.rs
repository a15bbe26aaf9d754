// vf-model: Canonical domain model for the vitalflow telemetry core.
//
// Everything downstream of the decoder speaks these types: canonical
// observations with per-type value shapes, emergency events, locations,
// and the per-step flow events consumed by dashboards and the event log.

pub mod emergency;
pub mod flow;
pub mod location;
pub mod observation;

pub use emergency::{EmergencyEvent, EmergencyKind, EmergencySeverity, EmergencyStatus};
pub use flow::{EventLogRecord, FlowEvent, FlowStatus, FlowStep};
pub use location::{Location, WifiNetwork};
pub use observation::{
    fingerprint, DeviceFamily, GlucoseMarker, Observation, ObservationType, ObservationValues,
    SeverityHint, SnapshotValue, TemperatureMode,
};
