//! End-to-end: SOS panic event with GPS location.

mod common;

use common::{drain_messages, wait_until, Harness};
use chrono::{TimeZone, Utc};
use std::time::Duration;
use vf_model::{EmergencyKind, EmergencySeverity, EmergencyStatus, Location, ObservationType};
use vf_protocol::ServerMessage;
use vf_test_utils::fixtures;

#[tokio::test]
async fn sos_persists_an_active_panic_and_alerts_the_rooms() {
    let harness = Harness::start().await;
    harness.store.seed_patient(fixtures::patient("P3"));
    harness
        .store
        .seed_watch(fixtures::watch("861265061482607", "P3", "H3"));

    // One tap on system:alerts, one on the patient's alert room.
    let (system_conn, system_tap) = harness.tap();
    let (patient_conn, patient_tap) = harness.tap();
    assert!(harness.state.hub.subscribe(system_conn, "system:alerts"));
    assert!(harness.state.hub.subscribe(patient_conn, "patient:P3:alerts"));

    let occurred_at = Utc.with_ymd_and_hms(2025, 7, 13, 2, 0, 0).unwrap();
    let payload = fixtures::sos_payload("861265061482607", occurred_at, 13.7563, 100.5018);
    harness.publish("iMEDE_watch/SOS", payload).await;

    wait_until(
        || !harness.store.emergency_rows().is_empty(),
        Duration::from_secs(2),
    )
    .await;

    // Persisted event.
    let rows = harness.store.emergency_rows();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.kind, EmergencyKind::Panic);
    assert_eq!(row.severity, EmergencySeverity::Critical);
    assert_eq!(row.status, EmergencyStatus::Active);
    assert_eq!(row.patient_id.as_deref(), Some("P3"));
    match row.location.as_ref().unwrap() {
        Location::Gps { lat, lng, .. } => {
            assert_eq!(*lat, 13.7563);
            assert_eq!(*lng, 100.5018);
        }
        other => panic!("expected gps location, got {other:?}"),
    }

    // No vitals observations from an SOS.
    assert_eq!(harness.store.history_count(ObservationType::HeartRate), 0);

    // Broadcasts: system:alerts sees an emergency_alert, the patient
    // room a patient_alert.
    let system_messages = drain_messages(&system_tap).await;
    assert!(system_messages.iter().any(|m| matches!(
        m,
        ServerMessage::EmergencyAlert { emergency } if emergency.kind == EmergencyKind::Panic
    )));
    let patient_messages = drain_messages(&patient_tap).await;
    assert!(patient_messages.iter().any(|m| matches!(
        m,
        ServerMessage::PatientAlert { emergency } if emergency.patient_id.as_deref() == Some("P3")
    )));

    // The GPS fix refreshed the location snapshot.
    let patient = harness.store.patient("P3").unwrap();
    assert!(patient.last_location.is_some());

    harness.stop().await;
}
