//! Operational status snapshot.

use crate::state::{AppState, CounterSnapshot};
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use vf_model::DeviceFamily;

#[derive(Serialize)]
pub struct PipelineStatus {
    pub gateway_box: CounterSnapshot,
    pub watch: CounterSnapshot,
    pub hospital_kiosk: CounterSnapshot,
}

#[derive(Serialize)]
pub struct EmitterStatus {
    pub queue_depth: usize,
    pub dropped: u64,
}

#[derive(Serialize)]
pub struct FanoutStatus {
    pub connections: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub pipelines: PipelineStatus,
    pub emitter: EmitterStatus,
    pub fanout: FanoutStatus,
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime_secs: state.stats.uptime_secs(),
        pipelines: PipelineStatus {
            gateway_box: state.stats.snapshot(DeviceFamily::GatewayBox),
            watch: state.stats.snapshot(DeviceFamily::Watch),
            hospital_kiosk: state.stats.snapshot(DeviceFamily::HospitalKiosk),
        },
        emitter: EmitterStatus {
            queue_depth: state.emitter.queue_depth(),
            dropped: state.emitter.dropped(),
        },
        fanout: FanoutStatus {
            connections: state.hub.connection_count(),
        },
    })
}
