// vf-protocol: Wire grammar for the vitalflow telemetry core.
//
// Inbound: the closed topic set and the tagged `Decoded` payload
// variants produced by the decoder.  Outbound: the fanout WebSocket
// frame types and the event-log HTTP API types.  All JSON messages use
// a top-level `type` field for discriminated deserialization.

pub mod decode;
pub mod eventlog_api;
pub mod fanout;
pub mod time;
pub mod topics;

pub use decode::{
    decode, encode, Decoded, DecodeError, GatewayMedical, GatewayStatus, KioskObservation,
    SubDeviceReading, VitalsFields, WatchBatch, WatchBatchSample, WatchBp, WatchEmergency,
    WatchLocation, WatchOnline, WatchSleep, WatchStatus, WatchVitals,
};
pub use eventlog_api::{EventLogIngest, EventLogPage, EventLogStats, Pagination, StatBucket};
pub use fanout::{ClientMessage, FanoutStats, Room, ServerMessage, StatCount, MAX_FRAME_BYTES};
pub use topics::{family_for_topic, watch_suffix};
