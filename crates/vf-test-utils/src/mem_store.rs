//! In-memory store implementing the three capability traits.
//!
//! Semantics mirror the MongoDB implementation where the pipelines can
//! observe them: citizen-id uniqueness on auto-create, the
//! duplicate-suppression unique key on history appends, and the
//! monotonic conditional snapshot update.  Seeding and inspection
//! helpers let tests arrange registry state and assert on writes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;
use vf_model::{
    EmergencyEvent, EmergencyStatus, EventLogRecord, Location, Observation, ObservationType,
};
use vf_protocol::{EventLogStats, StatBucket};
use vf_store::documents::LocationSnapshotDoc;
use vf_store::{
    AppendOutcome, DirectoryStore, DuplicateKey, EmergencyDoc, EventLogDoc, EventLogFilter,
    EventLogStore, GatewayRegistryDoc, HistoryDoc, HospitalDoc, KioskDoc, NameDoc,
    ObservationStore, OperatorTokenDoc, PatientDoc, SnapshotDoc, SnapshotOutcome, StoreError,
    SubDeviceDoc, UnregisteredPatient, WatchDoc, UNREGISTERED_MARKER,
};

type StoreResult<T> = Result<T, StoreError>;

#[derive(Default)]
struct MemState {
    patients: HashMap<String, PatientDoc>,
    hospitals: HashMap<String, HospitalDoc>,
    gateway_registry: HashMap<String, GatewayRegistryDoc>,
    sub_devices: HashMap<String, SubDeviceDoc>,
    watches: HashMap<String, WatchDoc>,
    kiosks: HashMap<String, KioskDoc>,
    operator_tokens: HashMap<String, OperatorTokenDoc>,
    histories: HashMap<ObservationType, Vec<HistoryDoc>>,
    history_keys: HashSet<(String, DateTime<Utc>, ObservationType, String)>,
    emergencies: Vec<EmergencyDoc>,
    event_logs: Vec<EventLogDoc>,
    fhir_observations: Vec<serde_json::Value>,
    /// Fault injection: fail the next N history appends with a backend
    /// error before succeeding.
    history_failures_remaining: u32,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    pub fn seed_patient(&self, patient: PatientDoc) {
        let mut state = self.inner.lock().unwrap();
        state.patients.insert(patient.patient_id.clone(), patient);
    }

    pub fn seed_hospital(&self, hospital: HospitalDoc) {
        let mut state = self.inner.lock().unwrap();
        state
            .hospitals
            .insert(hospital.hospital_id.clone(), hospital);
    }

    pub fn seed_gateway_registry(&self, entry: GatewayRegistryDoc) {
        let mut state = self.inner.lock().unwrap();
        state
            .gateway_registry
            .insert(entry.mac_address.clone(), entry);
    }

    pub fn seed_sub_device(&self, device: SubDeviceDoc) {
        let mut state = self.inner.lock().unwrap();
        state.sub_devices.insert(device.ble_addr.clone(), device);
    }

    pub fn seed_watch(&self, watch: WatchDoc) {
        let mut state = self.inner.lock().unwrap();
        state.watches.insert(watch.imei.clone(), watch);
    }

    pub fn seed_kiosk(&self, kiosk: KioskDoc) {
        let mut state = self.inner.lock().unwrap();
        state.kiosks.insert(kiosk.mac.clone(), kiosk);
    }

    /// Register an operator token by its raw value; the hub looks up
    /// the SHA-256 hash.
    pub fn seed_operator_token(&self, raw_token: &str, operator_id: &str) {
        let hash = vf_model::fingerprint(raw_token.as_bytes());
        let mut state = self.inner.lock().unwrap();
        state.operator_tokens.insert(
            hash.clone(),
            OperatorTokenDoc {
                token_hash: hash,
                operator_id: operator_id.to_owned(),
                revoked: false,
            },
        );
    }

    /// Fail the next `n` history appends with a backend error.
    pub fn fail_next_history_appends(&self, n: u32) {
        self.inner.lock().unwrap().history_failures_remaining = n;
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn patient(&self, patient_id: &str) -> Option<PatientDoc> {
        self.inner.lock().unwrap().patients.get(patient_id).cloned()
    }

    pub fn patient_count(&self) -> usize {
        self.inner.lock().unwrap().patients.len()
    }

    pub fn history_rows(&self, observation_type: ObservationType) -> Vec<HistoryDoc> {
        self.inner
            .lock()
            .unwrap()
            .histories
            .get(&observation_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn history_count(&self, observation_type: ObservationType) -> usize {
        self.history_rows(observation_type).len()
    }

    pub fn emergency_rows(&self) -> Vec<EmergencyDoc> {
        self.inner.lock().unwrap().emergencies.clone()
    }

    pub fn event_log_count(&self) -> usize {
        self.inner.lock().unwrap().event_logs.len()
    }

    pub fn fhir_observation_count(&self) -> usize {
        self.inner.lock().unwrap().fhir_observations.len()
    }
}

// ---------------------------------------------------------------------------
// DirectoryStore
// ---------------------------------------------------------------------------

#[async_trait]
impl DirectoryStore for MemStore {
    async fn sub_device_by_ble_addr(&self, ble_addr: &str) -> StoreResult<Option<SubDeviceDoc>> {
        Ok(self.inner.lock().unwrap().sub_devices.get(ble_addr).cloned())
    }

    async fn patient_by_sub_device_mac(&self, mac: &str) -> StoreResult<Option<PatientDoc>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .patients
            .values()
            .find(|p| p.matches_sub_device_mac(mac))
            .cloned())
    }

    async fn patient_by_gateway_mac(&self, mac: &str) -> StoreResult<Option<PatientDoc>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .patients
            .values()
            .find(|p| p.ava_mac_address.as_deref() == Some(mac))
            .cloned())
    }

    async fn patient_by_watch_imei(&self, imei: &str) -> StoreResult<Option<PatientDoc>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .patients
            .values()
            .find(|p| p.watch_mac_address.as_deref() == Some(imei))
            .cloned())
    }

    async fn patient_by_id(&self, patient_id: &str) -> StoreResult<Option<PatientDoc>> {
        Ok(self.inner.lock().unwrap().patients.get(patient_id).cloned())
    }

    async fn patient_by_citizen_id(&self, citizen_id: &str) -> StoreResult<Option<PatientDoc>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .patients
            .values()
            .find(|p| p.citizen_id.as_deref() == Some(citizen_id))
            .cloned())
    }

    async fn watch_by_imei(&self, imei: &str) -> StoreResult<Option<WatchDoc>> {
        Ok(self.inner.lock().unwrap().watches.get(imei).cloned())
    }

    async fn kiosk_by_mac(&self, mac: &str) -> StoreResult<Option<KioskDoc>> {
        Ok(self.inner.lock().unwrap().kiosks.get(mac).cloned())
    }

    async fn hospital_by_id(&self, hospital_id: &str) -> StoreResult<Option<HospitalDoc>> {
        Ok(self.inner.lock().unwrap().hospitals.get(hospital_id).cloned())
    }

    async fn hospital_by_gateway_mac(&self, mac: &str) -> StoreResult<Option<HospitalDoc>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .hospitals
            .values()
            .find(|h| h.mac_hv01_box.as_deref() == Some(mac))
            .cloned())
    }

    async fn gateway_registry_by_mac(&self, mac: &str) -> StoreResult<Option<GatewayRegistryDoc>> {
        Ok(self.inner.lock().unwrap().gateway_registry.get(mac).cloned())
    }

    async fn create_unregistered_patient(
        &self,
        scaffold: UnregisteredPatient,
    ) -> StoreResult<PatientDoc> {
        let mut state = self.inner.lock().unwrap();
        // Citizen-id uniqueness: a concurrent create wins and is reused.
        if let Some(existing) = state
            .patients
            .values()
            .find(|p| p.citizen_id.as_deref() == Some(scaffold.citizen_id.as_str()))
        {
            return Ok(existing.clone());
        }
        let patient = PatientDoc {
            patient_id: Uuid::new_v4().to_string(),
            name: NameDoc {
                marker: Some(UNREGISTERED_MARKER.to_owned()),
                ..NameDoc::default()
            },
            citizen_id: Some(scaffold.citizen_id),
            hospital_id: scaffold.hospital_id,
            created_by: Some("kiosk".to_owned()),
            ..PatientDoc::default()
        };
        state
            .patients
            .insert(patient.patient_id.clone(), patient.clone());
        Ok(patient)
    }

    async fn operator_by_token_hash(&self, hash: &str) -> StoreResult<Option<OperatorTokenDoc>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .operator_tokens
            .get(hash)
            .filter(|t| !t.revoked)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// ObservationStore
// ---------------------------------------------------------------------------

fn key_tuple(key: &DuplicateKey) -> (String, DateTime<Utc>, ObservationType, String) {
    (
        key.source_device_id.clone(),
        key.measured_at,
        key.observation_type,
        key.raw_fingerprint.clone(),
    )
}

#[async_trait]
impl ObservationStore for MemStore {
    async fn history_contains(&self, key: &DuplicateKey) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .history_keys
            .contains(&key_tuple(key)))
    }

    async fn append_history(&self, obs: &Observation) -> StoreResult<AppendOutcome> {
        let mut state = self.inner.lock().unwrap();
        if state.history_failures_remaining > 0 {
            state.history_failures_remaining -= 1;
            return Err(StoreError::Backend("injected history failure".to_owned()));
        }
        let key = key_tuple(&DuplicateKey::of(obs));
        if !state.history_keys.insert(key) {
            return Ok(AppendOutcome::Duplicate);
        }
        state
            .histories
            .entry(obs.observation_type)
            .or_default()
            .push(HistoryDoc::from_observation(obs));
        Ok(AppendOutcome::Inserted)
    }

    async fn update_snapshot(&self, obs: &Observation) -> StoreResult<SnapshotOutcome> {
        if obs.observation_type.snapshot_field().is_none() {
            return Ok(SnapshotOutcome::NoField);
        }
        let mut state = self.inner.lock().unwrap();
        let Some(patient) = state.patients.get_mut(&obs.patient_id) else {
            return Ok(SnapshotOutcome::Stale);
        };
        let Some(slot) = patient.snapshot_mut(obs.observation_type) else {
            return Ok(SnapshotOutcome::NoField);
        };
        let incoming = bson::DateTime::from_chrono(obs.measured_at);
        if let Some(existing) = slot {
            if existing.measured_at > incoming {
                return Ok(SnapshotOutcome::Stale);
            }
        }
        *slot = Some(SnapshotDoc::from_observation(obs));
        Ok(SnapshotOutcome::Updated)
    }

    async fn update_location_snapshot(
        &self,
        patient_id: &str,
        location: &Location,
        measured_at: DateTime<Utc>,
    ) -> StoreResult<SnapshotOutcome> {
        let mut state = self.inner.lock().unwrap();
        let Some(patient) = state.patients.get_mut(patient_id) else {
            return Ok(SnapshotOutcome::Stale);
        };
        let incoming = bson::DateTime::from_chrono(measured_at);
        if let Some(existing) = &patient.last_location {
            if existing.measured_at > incoming {
                return Ok(SnapshotOutcome::Stale);
            }
        }
        patient.last_location = Some(LocationSnapshotDoc {
            location: location.clone(),
            measured_at: incoming,
        });
        Ok(SnapshotOutcome::Updated)
    }

    async fn write_fhir(&self, obs: &Observation) -> StoreResult<()> {
        let resource = vf_store::fhir::observation_resource(obs);
        self.inner.lock().unwrap().fhir_observations.push(resource);
        Ok(())
    }

    async fn insert_emergency(&self, event: &EmergencyEvent) -> StoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .emergencies
            .push(EmergencyDoc::from_event(event));
        Ok(())
    }

    async fn active_emergencies(&self, limit: usize) -> StoreResult<Vec<EmergencyEvent>> {
        let state = self.inner.lock().unwrap();
        let mut active: Vec<EmergencyDoc> = state
            .emergencies
            .iter()
            .filter(|e| e.status == EmergencyStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(active
            .into_iter()
            .take(limit)
            .map(EmergencyDoc::into_event)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// EventLogStore
// ---------------------------------------------------------------------------

fn matches(filter: &EventLogFilter, doc: &EventLogDoc) -> bool {
    if let Some(source) = &filter.source {
        if &doc.source != source {
            return false;
        }
    }
    if let Some(status) = &filter.status {
        if serde_json::to_value(doc.status).ok().as_ref().and_then(|v| v.as_str().map(str::to_owned))
            != Some(status.clone())
        {
            return false;
        }
    }
    if let Some(step) = &filter.step {
        if doc.step.as_str() != step {
            return false;
        }
    }
    if let Some(family) = &filter.device_family {
        if doc.device_family.as_str() != family {
            return false;
        }
    }
    let ts = doc.server_timestamp.to_chrono();
    if let Some(from) = filter.from {
        if ts < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if ts > to {
            return false;
        }
    }
    if let Some(text) = &filter.text {
        let needle = text.to_lowercase();
        let in_error = doc
            .error_message
            .as_deref()
            .is_some_and(|m| m.to_lowercase().contains(&needle));
        let in_patient = doc
            .patient_ref
            .as_deref()
            .is_some_and(|p| p.to_lowercase().contains(&needle));
        if !in_error && !in_patient {
            return false;
        }
    }
    true
}

#[async_trait]
impl EventLogStore for MemStore {
    async fn insert(&self, record: &EventLogRecord) -> StoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .event_logs
            .push(EventLogDoc::from_record(record));
        Ok(())
    }

    async fn query(&self, filter: &EventLogFilter) -> StoreResult<(Vec<EventLogRecord>, u64)> {
        let state = self.inner.lock().unwrap();
        let mut hits: Vec<EventLogDoc> = state
            .event_logs
            .iter()
            .filter(|doc| matches(filter, doc))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.server_timestamp.cmp(&a.server_timestamp));
        let total = hits.len() as u64;
        let page = filter.page.max(1);
        let skip = usize::try_from((page - 1) * filter.limit).unwrap_or(usize::MAX);
        let records = hits
            .into_iter()
            .skip(skip)
            .take(usize::try_from(filter.limit).unwrap_or(usize::MAX))
            .map(EventLogDoc::into_record)
            .collect();
        Ok((records, total))
    }

    async fn stats_24h(&self, now: DateTime<Utc>) -> StoreResult<EventLogStats> {
        let cutoff = now - Duration::hours(24);
        let state = self.inner.lock().unwrap();
        let mut sources: HashMap<String, u64> = HashMap::new();
        let mut statuses: HashMap<String, u64> = HashMap::new();
        let mut total_24h = 0;
        for doc in &state.event_logs {
            if doc.server_timestamp.to_chrono() < cutoff {
                continue;
            }
            total_24h += 1;
            *sources.entry(doc.source.clone()).or_default() += 1;
            let status = serde_json::to_value(doc.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            *statuses.entry(status).or_default() += 1;
        }
        let to_buckets = |map: HashMap<String, u64>| {
            let mut buckets: Vec<StatBucket> = map
                .into_iter()
                .map(|(id, count)| StatBucket { id, count })
                .collect();
            buckets.sort_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
            buckets
        };
        Ok(EventLogStats {
            total_24h,
            sources: to_buckets(sources),
            statuses: to_buckets(statuses),
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.inner.lock().unwrap();
        let before = state.event_logs.len();
        state
            .event_logs
            .retain(|doc| doc.server_timestamp.to_chrono() >= cutoff);
        Ok((before - state.event_logs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vf_model::{fingerprint, DeviceFamily, FlowEvent, FlowStep, ObservationValues};

    fn bp_observation(measured_at: DateTime<Utc>, fp: &str) -> Observation {
        Observation::new(
            "P1",
            DeviceFamily::GatewayBox,
            "d616f9641622",
            measured_at,
            ObservationValues::BloodPressure {
                systolic: 120,
                diastolic: 80,
                pulse: None,
            },
            Some("H1".to_owned()),
            fp,
        )
    }

    #[tokio::test]
    async fn history_append_enforces_the_duplicate_key() {
        let store = MemStore::new();
        let ts = Utc.with_ymd_and_hms(2028, 3, 14, 6, 32, 51).unwrap();
        let obs = bp_observation(ts, &fingerprint(b"raw"));

        assert_eq!(
            store.append_history(&obs).await.unwrap(),
            AppendOutcome::Inserted
        );
        // Same key, fresh observation id: still a duplicate.
        let replay = bp_observation(ts, &fingerprint(b"raw"));
        assert_eq!(
            store.append_history(&replay).await.unwrap(),
            AppendOutcome::Duplicate
        );
        assert_eq!(store.history_count(ObservationType::BloodPressure), 1);
    }

    #[tokio::test]
    async fn snapshot_update_is_monotonic_by_measured_at() {
        let store = MemStore::new();
        store.seed_patient(PatientDoc {
            patient_id: "P1".to_owned(),
            ..PatientDoc::default()
        });
        let early = Utc.with_ymd_and_hms(2028, 3, 14, 9, 59, 50).unwrap();
        let late = Utc.with_ymd_and_hms(2028, 3, 14, 10, 0, 0).unwrap();

        let late_obs = bp_observation(late, "fp-late");
        let early_obs = bp_observation(early, "fp-early");

        assert_eq!(
            store.update_snapshot(&late_obs).await.unwrap(),
            SnapshotOutcome::Updated
        );
        assert_eq!(
            store.update_snapshot(&early_obs).await.unwrap(),
            SnapshotOutcome::Stale
        );
        let snapshot = store
            .patient("P1")
            .unwrap()
            .last_blood_pressure
            .expect("snapshot present");
        assert_eq!(snapshot.measured_at.to_chrono(), late);
    }

    #[tokio::test]
    async fn concurrent_unregistered_creates_converge() {
        let store = MemStore::new();
        let first = store
            .create_unregistered_patient(UnregisteredPatient {
                citizen_id: "C9".to_owned(),
                hospital_id: Some("H9".to_owned()),
            })
            .await
            .unwrap();
        let second = store
            .create_unregistered_patient(UnregisteredPatient {
                citizen_id: "C9".to_owned(),
                hospital_id: Some("H9".to_owned()),
            })
            .await
            .unwrap();
        assert_eq!(first.patient_id, second.patient_id);
        assert_eq!(first.name.marker.as_deref(), Some("UNREGISTERED"));
        assert_eq!(store.patient_count(), 1);
    }

    #[tokio::test]
    async fn event_log_query_filters_and_paginates() {
        let store = MemStore::new();
        let base = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        for i in 0..5 {
            store
                .insert(&EventLogRecord {
                    source: if i % 2 == 0 { "watch_pipeline" } else { "gateway_pipeline" }
                        .to_owned(),
                    server_timestamp: base + Duration::seconds(i),
                    event: FlowEvent::success(
                        FlowStep::Received,
                        DeviceFamily::Watch,
                        "iMEDE_watch/hb",
                    ),
                })
                .await
                .unwrap();
        }
        let (records, total) = store
            .query(&EventLogFilter {
                source: Some("watch_pipeline".to_owned()),
                page: 1,
                limit: 2,
                ..EventLogFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(records.len(), 2);
        // Newest first.
        assert!(records[0].server_timestamp > records[1].server_timestamp);
    }

    #[tokio::test]
    async fn retention_sweep_deletes_only_expired_records() {
        let store = MemStore::new();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        for days_ago in [0, 10, 29, 31, 45] {
            store
                .insert(&EventLogRecord {
                    source: "monitor".to_owned(),
                    server_timestamp: now - Duration::days(days_ago),
                    event: FlowEvent::success(
                        FlowStep::Received,
                        DeviceFamily::GatewayBox,
                        "dusun_pub",
                    ),
                })
                .await
                .unwrap();
        }
        let deleted = store
            .delete_older_than(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.event_log_count(), 3);
    }
}
