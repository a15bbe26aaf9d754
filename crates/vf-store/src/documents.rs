//! Shared document shapes.
//!
//! Patient, hospital, and registry collections are owned by the admin
//! layer; the core reads them and updates only the patient `last_*`
//! snapshot subfields.  History, emergency, and event-log documents
//! are owned by the core.
//!
//! Timestamps used in range filters or conditional updates are stored
//! as BSON datetimes, converted at this boundary.

use serde::{Deserialize, Serialize};
use vf_model::{
    DeviceFamily, EmergencyEvent, EmergencyKind, EmergencySeverity, EmergencyStatus,
    EventLogRecord, FlowEvent, FlowStatus, FlowStep, Location, Observation, ObservationType,
    ObservationValues, SeverityHint,
};

// ---------------------------------------------------------------------------
// Collection names
// ---------------------------------------------------------------------------

pub mod collections {
    pub const PATIENTS: &str = "patients";
    pub const HOSPITALS: &str = "hospitals";
    pub const GATEWAY_BOXES: &str = "mfc_hv01_boxes";
    pub const SUB_DEVICES: &str = "amy_devices";
    pub const WATCHES: &str = "watches";
    pub const KIOSKS: &str = "kiosks";
    pub const OPERATOR_TOKENS: &str = "operator_tokens";
    pub const EMERGENCY: &str = "emergency_alarm";
    pub const EVENT_LOGS: &str = "event_logs";
    pub const FHIR_OBSERVATIONS: &str = "fhir_observations";
    pub const FHIR_ORGANIZATIONS: &str = "fhir_organizations";
    pub const FHIR_LOCATIONS: &str = "fhir_locations";
}

// ---------------------------------------------------------------------------
// Patient
// ---------------------------------------------------------------------------

/// Marker written into `name.marker` on kiosk auto-created scaffolds.
pub const UNREGISTERED_MARKER: &str = "UNREGISTERED";

/// Patient name block.  `marker` is set to `UNREGISTERED` on kiosk
/// auto-created scaffolds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

/// A `last_<type>` snapshot subdocument on the patient record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDoc {
    #[serde(flatten)]
    pub values: ObservationValues,
    pub measured_at: bson::DateTime,
    pub source_device_family: DeviceFamily,
}

impl SnapshotDoc {
    pub fn from_observation(obs: &Observation) -> SnapshotDoc {
        SnapshotDoc {
            values: obs.values.clone(),
            measured_at: bson::DateTime::from_chrono(obs.measured_at),
            source_device_family: obs.device_family,
        }
    }
}

/// Latest known position, kept separately from vitals snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshotDoc {
    #[serde(flatten)]
    pub location: Location,
    pub measured_at: bson::DateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientDoc {
    /// Opaque stable patient id (`_id` in the shared collection).
    #[serde(rename = "_id")]
    pub patient_id: String,
    #[serde(default)]
    pub name: NameDoc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citizen_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    // Device bindings (typed MAC/IMEI fields written by the admin layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ava_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_pressure_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_glucose_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_oximeter_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_temperature_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_scale_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uric_mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cholesterol_mac_address: Option<String>,

    // Latest-value snapshots (owned by the core).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_blood_pressure: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_glucose: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_spo2: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_temperature: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_weight: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heart_rate: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_step_count: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_uric_acid: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cholesterol: Option<SnapshotDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_location: Option<LocationSnapshotDoc>,
}

/// The typed sub-device MAC fields checked by gateway resolution step 2.
pub const SUB_DEVICE_MAC_FIELDS: [&str; 7] = [
    "blood_pressure_mac_address",
    "blood_glucose_mac_address",
    "pulse_oximeter_mac_address",
    "body_temperature_mac_address",
    "weight_scale_mac_address",
    "uric_mac_address",
    "cholesterol_mac_address",
];

impl PatientDoc {
    /// True when any typed sub-device MAC field equals `mac`.
    pub fn matches_sub_device_mac(&self, mac: &str) -> bool {
        [
            &self.blood_pressure_mac_address,
            &self.blood_glucose_mac_address,
            &self.pulse_oximeter_mac_address,
            &self.body_temperature_mac_address,
            &self.weight_scale_mac_address,
            &self.uric_mac_address,
            &self.cholesterol_mac_address,
        ]
        .into_iter()
        .any(|field| field.as_deref() == Some(mac))
    }

    /// The snapshot slot for an observation type, if the type has one.
    pub fn snapshot(&self, observation_type: ObservationType) -> Option<&SnapshotDoc> {
        match observation_type {
            ObservationType::BloodPressure => self.last_blood_pressure.as_ref(),
            ObservationType::BloodGlucose => self.last_glucose.as_ref(),
            ObservationType::Spo2 => self.last_spo2.as_ref(),
            ObservationType::BodyTemperature => self.last_temperature.as_ref(),
            ObservationType::BodyWeight => self.last_weight.as_ref(),
            ObservationType::HeartRate => self.last_heart_rate.as_ref(),
            ObservationType::StepCount => self.last_step_count.as_ref(),
            ObservationType::Sleep => None,
            ObservationType::UricAcid => self.last_uric_acid.as_ref(),
            ObservationType::Cholesterol => self.last_cholesterol.as_ref(),
        }
    }

    pub fn snapshot_mut(
        &mut self,
        observation_type: ObservationType,
    ) -> Option<&mut Option<SnapshotDoc>> {
        match observation_type {
            ObservationType::BloodPressure => Some(&mut self.last_blood_pressure),
            ObservationType::BloodGlucose => Some(&mut self.last_glucose),
            ObservationType::Spo2 => Some(&mut self.last_spo2),
            ObservationType::BodyTemperature => Some(&mut self.last_temperature),
            ObservationType::BodyWeight => Some(&mut self.last_weight),
            ObservationType::HeartRate => Some(&mut self.last_heart_rate),
            ObservationType::StepCount => Some(&mut self.last_step_count),
            ObservationType::Sleep => None,
            ObservationType::UricAcid => Some(&mut self.last_uric_acid),
            ObservationType::Cholesterol => Some(&mut self.last_cholesterol),
        }
    }
}

// ---------------------------------------------------------------------------
// Hospital and device registries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HospitalDoc {
    #[serde(rename = "_id")]
    pub hospital_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Gateway box associated with this hospital, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_hv01_box: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

/// Gateway-hospital registry entry (`mfc_hv01_boxes`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRegistryDoc {
    pub mac_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
}

/// Sub-device registry entry, keyed by BLE address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDeviceDoc {
    pub ble_addr: String,
    pub patient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type_tag: Option<String>,
}

/// Watch registry entry, keyed by IMEI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchDoc {
    pub imei: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
}

/// Kiosk registry entry, keyed by MAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskDoc {
    pub mac: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
}

/// Operator token (written by the identity layer; the hub only reads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorTokenDoc {
    /// Hex SHA-256 of the raw bearer token.
    pub token_hash: String,
    pub operator_id: String,
    #[serde(default)]
    pub revoked: bool,
}

// ---------------------------------------------------------------------------
// History rows
// ---------------------------------------------------------------------------

/// One row in a per-type history collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDoc {
    pub observation_id: uuid::Uuid,
    pub patient_id: String,
    pub device_family: DeviceFamily,
    pub source_device_id: String,
    pub observation_type: ObservationType,
    pub measured_at: bson::DateTime,
    pub values: ObservationValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_hint: Option<SeverityHint>,
    pub raw_fingerprint: String,
}

impl HistoryDoc {
    pub fn from_observation(obs: &Observation) -> HistoryDoc {
        HistoryDoc {
            observation_id: obs.observation_id,
            patient_id: obs.patient_id.clone(),
            device_family: obs.device_family,
            source_device_id: obs.source_device_id.clone(),
            observation_type: obs.observation_type,
            measured_at: bson::DateTime::from_chrono(obs.measured_at),
            values: obs.values.clone(),
            hospital_id: obs.hospital_id.clone(),
            severity_hint: obs.severity_hint,
            raw_fingerprint: obs.raw_fingerprint.clone(),
        }
    }

    pub fn into_observation(self) -> Observation {
        Observation {
            observation_id: self.observation_id,
            patient_id: self.patient_id,
            device_family: self.device_family,
            source_device_id: self.source_device_id,
            observation_type: self.observation_type,
            measured_at: self.measured_at.to_chrono(),
            values: self.values,
            hospital_id: self.hospital_id,
            severity_hint: self.severity_hint,
            raw_fingerprint: self.raw_fingerprint,
        }
    }
}

// ---------------------------------------------------------------------------
// Emergency rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyDoc {
    pub event_id: uuid::Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub device_id: String,
    pub kind: EmergencyKind,
    pub severity: EmergencySeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub occurred_at: bson::DateTime,
    pub status: EmergencyStatus,
    pub raw: serde_json::Value,
}

impl EmergencyDoc {
    pub fn from_event(event: &EmergencyEvent) -> EmergencyDoc {
        EmergencyDoc {
            event_id: event.event_id,
            patient_id: event.patient_id.clone(),
            device_id: event.device_id.clone(),
            kind: event.kind,
            severity: event.severity,
            location: event.location.clone(),
            occurred_at: bson::DateTime::from_chrono(event.occurred_at),
            status: event.status,
            raw: event.raw.clone(),
        }
    }

    pub fn into_event(self) -> EmergencyEvent {
        EmergencyEvent {
            event_id: self.event_id,
            patient_id: self.patient_id,
            device_id: self.device_id,
            kind: self.kind,
            severity: self.severity,
            location: self.location,
            occurred_at: self.occurred_at.to_chrono(),
            status: self.status,
            raw: self.raw,
        }
    }
}

// ---------------------------------------------------------------------------
// Event-log rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogDoc {
    pub source: String,
    pub server_timestamp: bson::DateTime,
    pub step: FlowStep,
    pub status: FlowStatus,
    pub device_family: DeviceFamily,
    pub topic: String,
    pub timestamp: bson::DateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_excerpt: Option<String>,
}

impl EventLogDoc {
    pub fn from_record(record: &EventLogRecord) -> EventLogDoc {
        EventLogDoc {
            source: record.source.clone(),
            server_timestamp: bson::DateTime::from_chrono(record.server_timestamp),
            step: record.event.step,
            status: record.event.status,
            device_family: record.event.device_family,
            topic: record.event.topic.clone(),
            timestamp: bson::DateTime::from_chrono(record.event.timestamp),
            patient_ref: record.event.patient_ref.clone(),
            observation_ref: record.event.observation_ref.clone(),
            error_kind: record.event.error_kind.clone(),
            error_message: record.event.error_message.clone(),
            payload_excerpt: record.event.payload_excerpt.clone(),
        }
    }

    pub fn into_record(self) -> EventLogRecord {
        EventLogRecord {
            source: self.source,
            server_timestamp: self.server_timestamp.to_chrono(),
            event: FlowEvent {
                step: self.step,
                status: self.status,
                device_family: self.device_family,
                topic: self.topic,
                timestamp: self.timestamp.to_chrono(),
                patient_ref: self.patient_ref,
                observation_ref: self.observation_ref,
                error_kind: self.error_kind,
                error_message: self.error_message,
                payload_excerpt: self.payload_excerpt,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vf_model::fingerprint;

    #[test]
    fn history_doc_round_trips_an_observation() {
        let measured_at = Utc.with_ymd_and_hms(2028, 3, 14, 6, 32, 51).unwrap();
        let obs = Observation::new(
            "P1",
            DeviceFamily::GatewayBox,
            "d616f9641622",
            measured_at,
            ObservationValues::BloodPressure {
                systolic: 137,
                diastolic: 95,
                pulse: Some(74),
            },
            Some("H1".to_owned()),
            fingerprint(b"raw"),
        );
        let doc = HistoryDoc::from_observation(&obs);
        assert_eq!(doc.into_observation(), obs);
    }

    #[test]
    fn patient_matches_any_typed_sub_device_mac() {
        let patient = PatientDoc {
            patient_id: "P1".to_owned(),
            blood_pressure_mac_address: Some("d616f9641622".to_owned()),
            ..PatientDoc::default()
        };
        assert!(patient.matches_sub_device_mac("d616f9641622"));
        assert!(!patient.matches_sub_device_mac("ffffffffffff"));
    }

    #[test]
    fn event_log_doc_round_trips_a_record() {
        let record = EventLogRecord {
            source: "watch_pipeline".to_owned(),
            server_timestamp: Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap(),
            event: FlowEvent::error(
                FlowStep::Decoded,
                DeviceFamily::Watch,
                "iMEDE_watch/AP55",
                "batch_count_mismatch",
                "num_datas=3 but 2 samples present",
            ),
        };
        let doc = EventLogDoc::from_record(&record);
        let back = doc.into_record();
        assert_eq!(back.source, record.source);
        assert_eq!(back.event.step, FlowStep::Decoded);
        assert_eq!(back.event.error_kind, record.event.error_kind);
    }
}
