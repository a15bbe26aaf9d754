//! End-to-end: out-of-order arrival leaves the snapshot at the newest
//! measurement while history keeps both rows.

mod common;

use common::{wait_until, Harness};
use chrono::{TimeZone, Utc};
use std::time::Duration;
use vf_model::ObservationType;
use vf_test_utils::fixtures;

#[tokio::test]
async fn late_sample_arriving_first_wins_the_snapshot() {
    let harness = Harness::start().await;
    harness.store.seed_patient(fixtures::patient("P1"));
    harness
        .store
        .seed_sub_device(fixtures::sub_device("d616f9641622", "P1", "H1"));

    let late = Utc.with_ymd_and_hms(2028, 3, 14, 10, 0, 0).unwrap();
    let early = Utc.with_ymd_and_hms(2028, 3, 14, 9, 59, 50).unwrap();

    // O_late arrives before O_early.
    harness
        .publish(
            "dusun_pub",
            fixtures::gateway_bp_payload("AA:BB", "d616f9641622", late, 140, 90, 80),
        )
        .await;
    wait_until(
        || harness.store.history_count(ObservationType::BloodPressure) == 1,
        Duration::from_secs(2),
    )
    .await;
    harness
        .publish(
            "dusun_pub",
            fixtures::gateway_bp_payload("AA:BB", "d616f9641622", early, 120, 80, 70),
        )
        .await;
    wait_until(
        || harness.store.history_count(ObservationType::BloodPressure) == 2,
        Duration::from_secs(2),
    )
    .await;

    let snapshot = harness
        .store
        .patient("P1")
        .unwrap()
        .last_blood_pressure
        .expect("snapshot present");
    assert_eq!(snapshot.measured_at.to_chrono(), late);

    harness.stop().await;
}
