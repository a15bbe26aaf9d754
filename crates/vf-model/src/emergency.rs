//! Emergency events (panic button, fall detection).
//!
//! The kind fixes the severity: panic is always critical, fall is
//! always high.  Events persist with `status = active` and are
//! acknowledged later by the admin layer.

use crate::location::Location;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyKind {
    Panic,
    Fall,
}

impl EmergencyKind {
    /// The severity implied by the kind; there is no other source.
    pub fn severity(self) -> EmergencySeverity {
        match self {
            EmergencyKind::Panic => EmergencySeverity::Critical,
            EmergencyKind::Fall => EmergencySeverity::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencySeverity {
    Critical,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyStatus {
    Active,
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyEvent {
    pub event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub device_id: String,
    pub kind: EmergencyKind,
    pub severity: EmergencySeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub occurred_at: DateTime<Utc>,
    pub status: EmergencyStatus,
    pub raw: serde_json::Value,
}

impl EmergencyEvent {
    /// Build a new active event; severity is derived from the kind.
    pub fn new(
        patient_id: Option<String>,
        device_id: impl Into<String>,
        kind: EmergencyKind,
        location: Option<Location>,
        occurred_at: DateTime<Utc>,
        raw: serde_json::Value,
    ) -> Self {
        EmergencyEvent {
            event_id: Uuid::new_v4(),
            patient_id,
            device_id: device_id.into(),
            kind,
            severity: kind.severity(),
            location,
            occurred_at,
            status: EmergencyStatus::Active,
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_fixes_severity() {
        assert_eq!(EmergencyKind::Panic.severity(), EmergencySeverity::Critical);
        assert_eq!(EmergencyKind::Fall.severity(), EmergencySeverity::High);

        let event = EmergencyEvent::new(
            Some("P3".to_owned()),
            "861265061482607",
            EmergencyKind::Panic,
            None,
            Utc::now(),
            serde_json::json!({"IMEI": "861265061482607"}),
        );
        assert_eq!(event.severity, EmergencySeverity::Critical);
        assert_eq!(event.status, EmergencyStatus::Active);
    }

    #[test]
    fn serializes_snake_case() {
        let event = EmergencyEvent::new(
            None,
            "dev-1",
            EmergencyKind::Fall,
            None,
            Utc::now(),
            serde_json::Value::Null,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "fall");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["status"], "active");
        assert!(json.get("patient_id").is_none());
    }
}
