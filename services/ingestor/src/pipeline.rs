//! Per-family pipeline orchestration.
//!
//! Each family runs one consumer over its bus channel with a bounded
//! in-flight pool (default 4).  Inside a message, the five steps run
//! sequentially; every step emits a flow event, and a stage failure
//! emits an error event at its step and abandons the rest of that
//! message, never the pipeline.
//!
//! Info-event markers carried in `error_kind`: `status_only`,
//! `no_observation`, `duplicate_suppressed`.

use crate::bus::BusMessage;
use crate::resolver::{Resolution, ResolutionError};
use crate::state::AppState;
use crate::{normalizer, persister::PersistError};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};
use vf_model::{DeviceFamily, FlowEvent, FlowStep};
use vf_protocol::{decode, Decoded};

/// Wall-clock budget for steps 4-5 once a message is resolved.
const PERSIST_DEADLINE: Duration = Duration::from_secs(10);
/// In-flight completion budget on shutdown.
const DRAIN_BUDGET: Duration = Duration::from_secs(5);

/// The emitting source tag for a family's pipeline.
pub fn source_name(family: DeviceFamily) -> &'static str {
    match family {
        DeviceFamily::GatewayBox => "gateway_pipeline",
        DeviceFamily::Watch => "watch_pipeline",
        DeviceFamily::HospitalKiosk => "kiosk_pipeline",
    }
}

/// Run one family pipeline until shutdown, then drain in-flight work.
pub async fn run(state: AppState, family: DeviceFamily, mut rx: mpsc::Receiver<BusMessage>) {
    let limit = state.config.pipeline.in_flight_per_pipeline;
    let semaphore = std::sync::Arc::new(Semaphore::new(limit));
    let mut shutdown = state.shutdown.clone();
    let mut in_flight = JoinSet::new();

    info!(family = family.as_str(), in_flight = limit, "pipeline started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            maybe = rx.recv() => {
                let Some(message) = maybe else { break };
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("pipeline semaphore never closes");
                let state = state.clone();
                in_flight.spawn(async move {
                    process_message(&state, family, message).await;
                    drop(permit);
                });
                // Reap completed tasks so the set stays small.
                while in_flight.try_join_next().is_some() {}
            }
        }
    }

    let drained = tokio::time::timeout(DRAIN_BUDGET, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            family = family.as_str(),
            "in-flight messages did not finish within the shutdown budget"
        );
        in_flight.abort_all();
    }
    info!(family = family.as_str(), "pipeline stopped");
}

// ---------------------------------------------------------------------------
// Per-message processing
// ---------------------------------------------------------------------------

async fn process_message(state: &AppState, family: DeviceFamily, message: BusMessage) {
    let source = source_name(family);
    let topic = message.topic.as_str();
    state.stats.record_message(family);

    // Step 1: emitted unconditionally on receipt.
    state.emitter.emit(
        source,
        FlowEvent::success(FlowStep::Received, family, topic).with_excerpt(&message.payload),
    );

    // Step 2: decode.
    let decoded = match decode(topic, &message.payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            state.stats.record_error(family);
            state.emitter.emit(
                source,
                FlowEvent::error(FlowStep::Decoded, family, topic, e.kind(), e.to_string())
                    .with_excerpt(&message.payload),
            );
            return;
        }
    };
    state
        .emitter
        .emit(source, FlowEvent::success(FlowStep::Decoded, family, topic));

    // Step 3: resolve.  Device-status payloads carry no patient; they
    // surface as liveness info and terminate with `no_observation`.
    let resolution = match resolve_decoded(state, &decoded).await {
        Ok(Some(resolution)) => resolution,
        Ok(None) => {
            let mut resolved = FlowEvent::info(FlowStep::Resolved, family, topic);
            resolved.error_kind = Some("status_only".to_owned());
            state.emitter.emit(source, resolved);
            let mut terminal = FlowEvent::info(FlowStep::Persisted, family, topic);
            terminal.error_kind = Some("no_observation".to_owned());
            state.emitter.emit(source, terminal);
            return;
        }
        Err(ResolutionError::PatientUnknown { device_id }) => {
            state.stats.record_error(family);
            state.emitter.emit(
                source,
                FlowEvent::error(
                    FlowStep::Resolved,
                    family,
                    topic,
                    "patient_unknown",
                    format!("no patient mapping for device `{device_id}`"),
                ),
            );
            return;
        }
        Err(ResolutionError::Store(e)) => {
            state.stats.record_error(family);
            state.emitter.emit(
                source,
                FlowEvent::error(FlowStep::Resolved, family, topic, "store", e.to_string()),
            );
            return;
        }
    };
    state.emitter.emit(
        source,
        FlowEvent::success(FlowStep::Resolved, family, topic)
            .with_patient(resolution.patient_id.clone()),
    );

    // Steps 4-5 under the wall-clock budget.
    let outcome = tokio::time::timeout(
        PERSIST_DEADLINE,
        persist_phase(state, source, family, &message, &decoded, &resolution),
    )
    .await;
    if outcome.is_err() {
        state.stats.record_error(family);
        state.emitter.emit(
            source,
            FlowEvent::error(
                FlowStep::Persisted,
                family,
                topic,
                "timeout",
                "persistence exceeded the 10s budget; message abandoned",
            )
            .with_patient(resolution.patient_id.clone()),
        );
    }
}

/// Which payloads are liveness-only (no patient resolution).
fn is_status_only(decoded: &Decoded) -> bool {
    matches!(decoded, Decoded::GatewayStatus(_) | Decoded::WatchOnline(_))
}

async fn resolve_decoded(
    state: &AppState,
    decoded: &Decoded,
) -> Result<Option<Resolution>, ResolutionError> {
    if is_status_only(decoded) {
        return Ok(None);
    }
    let resolution = match decoded {
        Decoded::GatewayMedical(medical) => state.resolver.resolve_gateway(medical).await?,
        Decoded::Kiosk(kiosk) => {
            state
                .resolver
                .resolve_kiosk(&kiosk.kiosk_mac, &kiosk.citizen_id)
                .await?
        }
        Decoded::WatchVitals(w) => state.resolver.resolve_watch(&w.imei).await?,
        Decoded::WatchBatch(w) => state.resolver.resolve_watch(&w.imei).await?,
        Decoded::WatchStatus(w) => state.resolver.resolve_watch(&w.imei).await?,
        Decoded::WatchLocation(w) => state.resolver.resolve_watch(&w.imei).await?,
        Decoded::WatchSleep(w) => state.resolver.resolve_watch(&w.imei).await?,
        Decoded::WatchEmergency(w) => state.resolver.resolve_watch(&w.imei).await?,
        Decoded::GatewayStatus(_) | Decoded::WatchOnline(_) => unreachable!("status-only"),
    };
    Ok(Some(resolution))
}

async fn persist_phase(
    state: &AppState,
    source: &'static str,
    family: DeviceFamily,
    message: &BusMessage,
    decoded: &Decoded,
    resolution: &Resolution,
) {
    let topic = message.topic.as_str();

    // Step 4a: normalize.
    let normalized = match normalizer::normalize(decoded, resolution, &message.payload, message.received_at)
    {
        Ok(normalized) => normalized,
        Err(e) => {
            state.stats.record_error(family);
            state.emitter.emit(
                source,
                FlowEvent::error(
                    FlowStep::SnapshotUpdated,
                    family,
                    topic,
                    e.kind(),
                    e.to_string(),
                )
                .with_patient(resolution.patient_id.clone()),
            );
            return;
        }
    };

    // Location refreshes are best-effort snapshot writes.
    let mut location_applied = false;
    if let Some((location, at)) = &normalized.location_update {
        state
            .persister
            .update_location(&resolution.patient_id, location, *at)
            .await;
        location_applied = true;
    }

    if normalized.is_empty() {
        let mut snapshot_event = FlowEvent::info(FlowStep::SnapshotUpdated, family, topic)
            .with_patient(resolution.patient_id.clone());
        if location_applied {
            snapshot_event.status = vf_model::FlowStatus::Success;
        }
        state.emitter.emit(source, snapshot_event);
        let mut terminal = FlowEvent::info(FlowStep::Persisted, family, topic)
            .with_patient(resolution.patient_id.clone());
        terminal.error_kind = Some("no_observation".to_owned());
        state.emitter.emit(source, terminal);
        return;
    }

    // Steps 4b-5: persist observations and emergencies.
    let mut snapshot_failed = false;
    let mut snapshot_updated = location_applied;
    let mut persisted = 0usize;
    let mut duplicates = 0usize;
    let mut history_error: Option<PersistError> = None;
    let mut first_observation_ref = None;

    for obs in &normalized.observations {
        match state.persister.persist_observation(obs).await {
            Ok(report) => {
                snapshot_failed |= report.snapshot_failed;
                snapshot_updated |= report.snapshot_updated;
                if report.duplicate {
                    duplicates += 1;
                } else {
                    persisted += 1;
                    first_observation_ref
                        .get_or_insert_with(|| obs.observation_id.to_string());
                    state.hub.broadcast_observation(obs);
                }
            }
            Err(e) => {
                // This observation is abandoned; the rest of the batch
                // still gets its chance.
                warn!(observation_id = %obs.observation_id, error = %e, "observation persistence failed");
                history_error.get_or_insert(e);
            }
        }
    }

    for event in &normalized.emergencies {
        match state.persister.persist_emergency(event).await {
            Ok(()) => {
                persisted += 1;
                state
                    .hub
                    .broadcast_emergency(event, Some(resolution.hospital_id.as_str()));
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "emergency persistence failed");
                history_error.get_or_insert(e);
            }
        }
    }

    // Step 4 event.
    if snapshot_failed {
        state.emitter.emit(
            source,
            FlowEvent::error(
                FlowStep::SnapshotUpdated,
                family,
                topic,
                "snapshot",
                "snapshot update failed; history kept",
            )
            .with_patient(resolution.patient_id.clone()),
        );
    } else if snapshot_updated {
        state.emitter.emit(
            source,
            FlowEvent::success(FlowStep::SnapshotUpdated, family, topic)
                .with_patient(resolution.patient_id.clone()),
        );
    } else {
        state.emitter.emit(
            source,
            FlowEvent::info(FlowStep::SnapshotUpdated, family, topic)
                .with_patient(resolution.patient_id.clone()),
        );
    }

    // Step 5 terminal event: exactly one per message.
    if let Some(e) = history_error {
        state.stats.record_error(family);
        state.emitter.emit(
            source,
            FlowEvent::error(FlowStep::Persisted, family, topic, "history", e.to_string())
                .with_patient(resolution.patient_id.clone()),
        );
    } else if persisted == 0 && duplicates > 0 {
        let mut terminal = FlowEvent::info(FlowStep::Persisted, family, topic)
            .with_patient(resolution.patient_id.clone());
        terminal.error_kind = Some("duplicate_suppressed".to_owned());
        state.emitter.emit(source, terminal);
    } else {
        let mut terminal = FlowEvent::success(FlowStep::Persisted, family, topic)
            .with_patient(resolution.patient_id.clone());
        if let Some(observation_ref) = first_observation_ref {
            terminal = terminal.with_observation(observation_ref);
        }
        state.emitter.emit(source, terminal);
    }
}
