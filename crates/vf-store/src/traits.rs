//! Store capability traits.
//!
//! The pipelines never talk to MongoDB directly; they hold
//! `Arc<dyn DirectoryStore>` / `Arc<dyn ObservationStore>` /
//! `Arc<dyn EventLogStore>` capabilities constructed once at startup.
//! Tests inject the in-memory implementation from `vf-test-utils`.

use crate::documents::{
    GatewayRegistryDoc, HospitalDoc, KioskDoc, OperatorTokenDoc, PatientDoc, SubDeviceDoc,
    WatchDoc,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vf_model::{EmergencyEvent, EventLogRecord, Location, Observation};
use vf_protocol::EventLogStats;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
    /// Unique-constraint conflict; callers decide whether this is an
    /// error (never for the duplicate-suppression key).
    #[error("duplicate key")]
    DuplicateKey,
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Directory (resolver reads + kiosk auto-create)
// ---------------------------------------------------------------------------

/// Scaffold for a kiosk auto-created patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnregisteredPatient {
    pub citizen_id: String,
    pub hospital_id: Option<String>,
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn sub_device_by_ble_addr(&self, ble_addr: &str) -> StoreResult<Option<SubDeviceDoc>>;
    /// Match any of the typed sub-device MAC fields on the patient.
    async fn patient_by_sub_device_mac(&self, mac: &str) -> StoreResult<Option<PatientDoc>>;
    /// Match the patient's gateway binding (`ava_mac_address`).
    async fn patient_by_gateway_mac(&self, mac: &str) -> StoreResult<Option<PatientDoc>>;
    /// Match the patient's watch binding (`watch_mac_address`).
    async fn patient_by_watch_imei(&self, imei: &str) -> StoreResult<Option<PatientDoc>>;
    async fn patient_by_id(&self, patient_id: &str) -> StoreResult<Option<PatientDoc>>;
    async fn patient_by_citizen_id(&self, citizen_id: &str) -> StoreResult<Option<PatientDoc>>;
    async fn watch_by_imei(&self, imei: &str) -> StoreResult<Option<WatchDoc>>;
    async fn kiosk_by_mac(&self, mac: &str) -> StoreResult<Option<KioskDoc>>;
    async fn hospital_by_id(&self, hospital_id: &str) -> StoreResult<Option<HospitalDoc>>;
    /// Hospital whose `mac_hv01_box` equals the gateway MAC.
    async fn hospital_by_gateway_mac(&self, mac: &str) -> StoreResult<Option<HospitalDoc>>;
    /// Gateway-hospital registry (`mfc_hv01_boxes`) lookup.
    async fn gateway_registry_by_mac(&self, mac: &str) -> StoreResult<Option<GatewayRegistryDoc>>;
    /// Create an unregistered patient scaffold.  On a citizen-id
    /// uniqueness conflict the winner is re-read and returned, so
    /// concurrent creates converge on one record.
    async fn create_unregistered_patient(
        &self,
        scaffold: UnregisteredPatient,
    ) -> StoreResult<PatientDoc>;
    /// Operator token lookup for the fanout edge (by hex SHA-256).
    async fn operator_by_token_hash(&self, hash: &str) -> StoreResult<Option<OperatorTokenDoc>>;
}

// ---------------------------------------------------------------------------
// Observations (persister writes)
// ---------------------------------------------------------------------------

/// The duplicate-suppression key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuplicateKey {
    pub source_device_id: String,
    pub measured_at: DateTime<Utc>,
    pub observation_type: vf_model::ObservationType,
    pub raw_fingerprint: String,
}

impl DuplicateKey {
    pub fn of(obs: &Observation) -> DuplicateKey {
        DuplicateKey {
            source_device_id: obs.source_device_id.clone(),
            measured_at: obs.measured_at,
            observation_type: obs.observation_type,
            raw_fingerprint: obs.raw_fingerprint.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// The unique index already held this key (lost race with a
    /// concurrent replay); treated exactly like the pre-check hit.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Updated,
    /// A newer value already occupies the slot; nothing written.
    Stale,
    /// The observation type keeps no snapshot (sleep).
    NoField,
}

#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Existence probe on the duplicate-suppression key.
    async fn history_contains(&self, key: &DuplicateKey) -> StoreResult<bool>;
    /// Append to the per-type history collection (the source of truth).
    async fn append_history(&self, obs: &Observation) -> StoreResult<AppendOutcome>;
    /// Conditionally set `last_<type>` on the patient; only a
    /// `measured_at` greater or equal to the stored one wins.
    async fn update_snapshot(&self, obs: &Observation) -> StoreResult<SnapshotOutcome>;
    /// Conditionally set `last_location` on the patient.
    async fn update_location_snapshot(
        &self,
        patient_id: &str,
        location: &Location,
        measured_at: DateTime<Utc>,
    ) -> StoreResult<SnapshotOutcome>;
    /// Write the FHIR-shaped shadow resource.  Callers treat failures
    /// as warnings; the history row stays authoritative.
    async fn write_fhir(&self, obs: &Observation) -> StoreResult<()>;
    async fn insert_emergency(&self, event: &EmergencyEvent) -> StoreResult<()>;
    /// Most recent still-active emergencies, newest first.
    async fn active_emergencies(&self, limit: usize) -> StoreResult<Vec<EmergencyEvent>>;
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Typed query filter; all fields are conjunctive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLogFilter {
    pub source: Option<String>,
    pub status: Option<String>,
    pub step: Option<String>,
    pub device_family: Option<String>,
    /// Inclusive window on `server_timestamp`.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Substring match on `error_message` or `patient_ref`.
    pub text: Option<String>,
    /// 1-based page.
    pub page: u64,
    pub limit: u64,
}

#[async_trait]
pub trait EventLogStore: Send + Sync {
    async fn insert(&self, record: &EventLogRecord) -> StoreResult<()>;
    /// Matching records (newest first) plus the total match count.
    async fn query(&self, filter: &EventLogFilter) -> StoreResult<(Vec<EventLogRecord>, u64)>;
    async fn stats_24h(&self, now: DateTime<Utc>) -> StoreResult<EventLogStats>;
    /// Retention sweep; returns the number of deleted records.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}
