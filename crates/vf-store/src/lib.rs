// vf-store: Document-store layer for the vitalflow core.
//
// The core reads shared collections (patients, hospitals, device
// registries) and exclusively owns the per-type histories, emergency
// events, FHIR shadow, and event log.  Access goes through three
// capability traits so the pipelines can run against the in-memory
// store in tests and MongoDB in production.

pub mod documents;
pub mod fhir;
pub mod mongo;
pub mod traits;

pub use documents::{
    EmergencyDoc, EventLogDoc, GatewayRegistryDoc, HistoryDoc, HospitalDoc, KioskDoc,
    LocationSnapshotDoc, NameDoc, OperatorTokenDoc, PatientDoc, SnapshotDoc, SubDeviceDoc,
    WatchDoc, UNREGISTERED_MARKER,
};
pub use mongo::MongoStore;
pub use traits::{
    AppendOutcome, DirectoryStore, DuplicateKey, EventLogFilter, EventLogStore, ObservationStore,
    SnapshotOutcome, StoreError, UnregisteredPatient,
};
