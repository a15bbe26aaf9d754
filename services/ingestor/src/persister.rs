//! Durable persistence of observations and emergencies.
//!
//! Per observation, in order: duplicate check, history append (the
//! source of truth, retried on backend failure), conditional snapshot
//! update (warning on failure), FHIR shadow (warning on failure).
//! The duplicate check runs before the insert and the unique index
//! backstops the race, so the whole pipeline is replay-safe.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use vf_model::{EmergencyEvent, Observation};
use vf_store::{AppendOutcome, DuplicateKey, ObservationStore, SnapshotOutcome, StoreError};

/// Backoff schedule between history retries.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(400),
    Duration::from_millis(1600),
];

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("history write failed after retries: {0}")]
    History(StoreError),
    #[error("emergency write failed after retries: {0}")]
    Emergency(StoreError),
}

/// Outcome of persisting a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedObservation {
    /// The duplicate-suppression key was already present; nothing was
    /// written.
    pub duplicate: bool,
    /// The snapshot write errored (history is still authoritative).
    pub snapshot_failed: bool,
    /// The snapshot was actually advanced (false for stale
    /// out-of-order samples and snapshot-less types).
    pub snapshot_updated: bool,
}

pub struct Persister {
    store: Arc<dyn ObservationStore>,
    retry_budget: u32,
}

impl Persister {
    pub fn new(store: Arc<dyn ObservationStore>, retry_budget: u32) -> Persister {
        Persister {
            store,
            retry_budget,
        }
    }

    /// Persist one observation.
    pub async fn persist_observation(
        &self,
        obs: &Observation,
    ) -> Result<PersistedObservation, PersistError> {
        // 1. Duplicate check.
        let key = DuplicateKey::of(obs);
        if self
            .store
            .history_contains(&key)
            .await
            .map_err(PersistError::History)?
        {
            return Ok(PersistedObservation {
                duplicate: true,
                snapshot_failed: false,
                snapshot_updated: false,
            });
        }

        // 2. History append with bounded retries.
        let outcome = self
            .with_retries(|| self.store.append_history(obs))
            .await
            .map_err(PersistError::History)?;
        if outcome == AppendOutcome::Duplicate {
            // Lost a replay race to the unique index.
            return Ok(PersistedObservation {
                duplicate: true,
                snapshot_failed: false,
                snapshot_updated: false,
            });
        }

        // 3. Conditional snapshot update (warning on failure).
        let (snapshot_failed, snapshot_updated) = match self.store.update_snapshot(obs).await {
            Ok(SnapshotOutcome::Updated) => (false, true),
            Ok(SnapshotOutcome::Stale | SnapshotOutcome::NoField) => (false, false),
            Err(e) => {
                warn!(
                    observation_id = %obs.observation_id,
                    patient_id = %obs.patient_id,
                    error = %e,
                    "snapshot update failed; history kept"
                );
                (true, false)
            }
        };

        // 4. FHIR shadow (warning on failure).
        if let Err(e) = self.store.write_fhir(obs).await {
            warn!(
                observation_id = %obs.observation_id,
                error = %e,
                "fhir shadow write failed; history kept"
            );
        }

        Ok(PersistedObservation {
            duplicate: false,
            snapshot_failed,
            snapshot_updated,
        })
    }

    /// Persist an emergency event (`status = active`).  No snapshot is
    /// touched; the caller broadcasts on success.
    pub async fn persist_emergency(&self, event: &EmergencyEvent) -> Result<(), PersistError> {
        self.with_retries(|| async {
            self.store.insert_emergency(event).await?;
            Ok(AppendOutcome::Inserted)
        })
        .await
        .map_err(PersistError::Emergency)?;
        Ok(())
    }

    /// Best-effort location snapshot update; failures are warnings.
    pub async fn update_location(
        &self,
        patient_id: &str,
        location: &vf_model::Location,
        measured_at: chrono::DateTime<chrono::Utc>,
    ) {
        if let Err(e) = self
            .store
            .update_location_snapshot(patient_id, location, measured_at)
            .await
        {
            warn!(patient_id, error = %e, "location snapshot update failed");
        }
    }

    async fn with_retries<F, Fut>(&self, mut op: F) -> Result<AppendOutcome, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<AppendOutcome, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    if attempt >= self.retry_budget {
                        return Err(e);
                    }
                    let backoff = RETRY_BACKOFF
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or(*RETRY_BACKOFF.last().expect("non-empty schedule"));
                    warn!(error = %e, attempt, backoff_ms = backoff.as_millis() as u64, "history write retry");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vf_model::{fingerprint, DeviceFamily, ObservationType, ObservationValues};
    use vf_test_utils::{fixtures, MemStore};

    fn bp(ts: chrono::DateTime<Utc>, raw: &[u8]) -> Observation {
        Observation::new(
            "P1",
            DeviceFamily::GatewayBox,
            "d616f9641622",
            ts,
            ObservationValues::BloodPressure {
                systolic: 137,
                diastolic: 95,
                pulse: Some(74),
            },
            Some("H1".to_owned()),
            fingerprint(raw),
        )
    }

    #[tokio::test]
    async fn persist_then_replay_suppresses_the_duplicate() {
        let store = Arc::new(MemStore::new());
        store.seed_patient(fixtures::patient("P1"));
        let persister = Persister::new(store.clone(), 3);
        let ts = Utc.with_ymd_and_hms(2028, 3, 14, 6, 32, 51).unwrap();

        let first = persister.persist_observation(&bp(ts, b"raw")).await.unwrap();
        assert!(!first.duplicate);
        assert!(first.snapshot_updated);
        assert_eq!(store.history_count(ObservationType::BloodPressure), 1);
        assert_eq!(store.fhir_observation_count(), 1);

        // Replay: same source bytes, fresh observation id.
        let replay = persister.persist_observation(&bp(ts, b"raw")).await.unwrap();
        assert!(replay.duplicate);
        assert_eq!(store.history_count(ObservationType::BloodPressure), 1);
        // No FHIR shadow write for a suppressed duplicate.
        assert_eq!(store.fhir_observation_count(), 1);
    }

    #[tokio::test]
    async fn out_of_order_samples_keep_the_newest_snapshot() {
        let store = Arc::new(MemStore::new());
        store.seed_patient(fixtures::patient("P1"));
        let persister = Persister::new(store.clone(), 3);

        let late = Utc.with_ymd_and_hms(2028, 3, 14, 10, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2028, 3, 14, 9, 59, 50).unwrap();

        let first = persister
            .persist_observation(&bp(late, b"late"))
            .await
            .unwrap();
        assert!(first.snapshot_updated);
        let second = persister
            .persist_observation(&bp(early, b"early"))
            .await
            .unwrap();
        assert!(!second.duplicate);
        assert!(!second.snapshot_updated);

        assert_eq!(store.history_count(ObservationType::BloodPressure), 2);
        let snapshot = store.patient("P1").unwrap().last_blood_pressure.unwrap();
        assert_eq!(snapshot.measured_at.to_chrono(), late);
    }

    #[tokio::test(start_paused = true)]
    async fn history_failures_retry_with_backoff_then_succeed() {
        let store = Arc::new(MemStore::new());
        store.seed_patient(fixtures::patient("P1"));
        store.fail_next_history_appends(2);
        let persister = Persister::new(store.clone(), 3);
        let ts = Utc.with_ymd_and_hms(2028, 3, 14, 6, 32, 51).unwrap();

        let report = persister.persist_observation(&bp(ts, b"raw")).await.unwrap();
        assert!(!report.duplicate);
        assert_eq!(store.history_count(ObservationType::BloodPressure), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retry_budget_surfaces_a_history_error() {
        let store = Arc::new(MemStore::new());
        store.fail_next_history_appends(10);
        let persister = Persister::new(store.clone(), 3);
        let ts = Utc.with_ymd_and_hms(2028, 3, 14, 6, 32, 51).unwrap();

        let err = persister.persist_observation(&bp(ts, b"raw")).await;
        assert!(matches!(err, Err(PersistError::History(_))));
        assert_eq!(store.history_count(ObservationType::BloodPressure), 0);
    }
}
