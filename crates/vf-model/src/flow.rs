//! Per-step flow events.
//!
//! Each inbound message emits one `FlowEvent` per processing step it
//! reaches.  Emission is best-effort: a lost flow event never fails
//! persistence.  The event-log store flattens these into
//! `EventLogRecord`s with the emitting source and arrival time.

use crate::observation::DeviceFamily;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five pipeline steps, serialized with their step number so the
/// event log sorts naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowStep {
    #[serde(rename = "1_received")]
    Received,
    #[serde(rename = "2_decoded")]
    Decoded,
    #[serde(rename = "3_resolved")]
    Resolved,
    #[serde(rename = "4_snapshot_updated")]
    SnapshotUpdated,
    #[serde(rename = "5_persisted")]
    Persisted,
}

impl FlowStep {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowStep::Received => "1_received",
            FlowStep::Decoded => "2_decoded",
            FlowStep::Resolved => "3_resolved",
            FlowStep::SnapshotUpdated => "4_snapshot_updated",
            FlowStep::Persisted => "5_persisted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Success,
    Error,
    Info,
}

/// One processing-step record for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    pub step: FlowStep,
    pub status: FlowStatus,
    pub device_family: DeviceFamily,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_excerpt: Option<String>,
}

impl FlowEvent {
    pub fn success(step: FlowStep, device_family: DeviceFamily, topic: impl Into<String>) -> Self {
        FlowEvent {
            step,
            status: FlowStatus::Success,
            device_family,
            topic: topic.into(),
            timestamp: Utc::now(),
            patient_ref: None,
            observation_ref: None,
            error_kind: None,
            error_message: None,
            payload_excerpt: None,
        }
    }

    pub fn info(step: FlowStep, device_family: DeviceFamily, topic: impl Into<String>) -> Self {
        FlowEvent {
            status: FlowStatus::Info,
            ..FlowEvent::success(step, device_family, topic)
        }
    }

    pub fn error(
        step: FlowStep,
        device_family: DeviceFamily,
        topic: impl Into<String>,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        FlowEvent {
            status: FlowStatus::Error,
            error_kind: Some(error_kind.into()),
            error_message: Some(error_message.into()),
            ..FlowEvent::success(step, device_family, topic)
        }
    }

    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_ref = Some(patient_id.into());
        self
    }

    pub fn with_observation(mut self, observation_id: impl Into<String>) -> Self {
        self.observation_ref = Some(observation_id.into());
        self
    }

    pub fn with_excerpt(mut self, payload: &[u8]) -> Self {
        self.payload_excerpt = Some(excerpt(payload));
        self
    }
}

/// Truncate a raw payload to a loggable UTF-8 excerpt.
pub fn excerpt(payload: &[u8]) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(payload);
    if text.len() <= MAX {
        text.into_owned()
    } else {
        let mut cut = MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    }
}

// ---------------------------------------------------------------------------
// Event-log records
// ---------------------------------------------------------------------------

/// A flattened flow event as stored by the event-log store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    /// Which pipeline or monitor emitted the event.
    pub source: String,
    /// Arrival time at the log store (distinct from the event timestamp).
    pub server_timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: FlowEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_serialize_with_numeric_prefix() {
        assert_eq!(
            serde_json::to_value(FlowStep::Received).unwrap(),
            "1_received"
        );
        assert_eq!(
            serde_json::to_value(FlowStep::SnapshotUpdated).unwrap(),
            "4_snapshot_updated"
        );
        assert_eq!(
            serde_json::to_value(FlowStep::Persisted).unwrap(),
            "5_persisted"
        );
        let back: FlowStep = serde_json::from_value("3_resolved".into()).unwrap();
        assert_eq!(back, FlowStep::Resolved);
    }

    #[test]
    fn error_event_carries_kind_and_message() {
        let event = FlowEvent::error(
            FlowStep::Decoded,
            DeviceFamily::Watch,
            "iMEDE_watch/AP55",
            "batch_count_mismatch",
            "num_datas=3 but 2 samples",
        );
        assert_eq!(event.status, FlowStatus::Error);
        assert_eq!(event.error_kind.as_deref(), Some("batch_count_mismatch"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step"], "2_decoded");
        assert_eq!(json["status"], "error");
    }

    #[test]
    fn excerpt_truncates_long_payloads() {
        let short = excerpt(b"{\"ok\":true}");
        assert_eq!(short, "{\"ok\":true}");
        let long = excerpt(&vec![b'x'; 1000]);
        assert!(long.chars().count() <= 257);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn event_log_record_flattens_the_event() {
        let record = EventLogRecord {
            source: "watch_pipeline".to_owned(),
            server_timestamp: Utc::now(),
            event: FlowEvent::success(FlowStep::Received, DeviceFamily::Watch, "iMEDE_watch/hb"),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["source"], "watch_pipeline");
        assert_eq!(json["step"], "1_received");
        assert_eq!(json["topic"], "iMEDE_watch/hb");
    }
}
