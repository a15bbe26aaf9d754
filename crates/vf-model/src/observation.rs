//! Canonical observations.
//!
//! An `Observation` is one medical measurement, produced by the
//! normalizer and persisted three ways (history, patient snapshot,
//! FHIR shadow).  The value shape is a closed tagged enum: adding a
//! device type is a compile-time change, not a runtime dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Device families
// ---------------------------------------------------------------------------

/// The three device families, each with its own topic namespace and
/// resolution rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    GatewayBox,
    Watch,
    HospitalKiosk,
}

impl DeviceFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::GatewayBox => "gateway_box",
            DeviceFamily::Watch => "watch",
            DeviceFamily::HospitalKiosk => "hospital_kiosk",
        }
    }
}

// ---------------------------------------------------------------------------
// Observation types
// ---------------------------------------------------------------------------

/// Closed set of canonical observation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    BloodPressure,
    BloodGlucose,
    Spo2,
    BodyTemperature,
    BodyWeight,
    HeartRate,
    StepCount,
    Sleep,
    UricAcid,
    Cholesterol,
}

impl ObservationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObservationType::BloodPressure => "blood_pressure",
            ObservationType::BloodGlucose => "blood_glucose",
            ObservationType::Spo2 => "spo2",
            ObservationType::BodyTemperature => "body_temperature",
            ObservationType::BodyWeight => "body_weight",
            ObservationType::HeartRate => "heart_rate",
            ObservationType::StepCount => "step_count",
            ObservationType::Sleep => "sleep",
            ObservationType::UricAcid => "uric_acid",
            ObservationType::Cholesterol => "cholesterol",
        }
    }

    /// Name of the append-only history collection for this type.
    ///
    /// `temprature_data_histories` keeps the legacy collection spelling
    /// shared with the admin layer.
    pub fn history_collection(self) -> &'static str {
        match self {
            ObservationType::BloodPressure => "blood_pressure_histories",
            ObservationType::BloodGlucose => "blood_sugar_histories",
            ObservationType::Spo2 => "spo2_histories",
            ObservationType::BodyTemperature => "temprature_data_histories",
            ObservationType::BodyWeight => "body_data_histories",
            ObservationType::HeartRate => "heart_rate_histories",
            ObservationType::StepCount => "step_histories",
            ObservationType::Sleep => "sleep_data_histories",
            ObservationType::UricAcid => "uric_acid_histories",
            ObservationType::Cholesterol => "cholesterol_histories",
        }
    }

    /// Patient snapshot field updated by observations of this type.
    ///
    /// Sleep history is append-only with no latest-value view.
    pub fn snapshot_field(self) -> Option<&'static str> {
        match self {
            ObservationType::BloodPressure => Some("last_blood_pressure"),
            ObservationType::BloodGlucose => Some("last_glucose"),
            ObservationType::Spo2 => Some("last_spo2"),
            ObservationType::BodyTemperature => Some("last_temperature"),
            ObservationType::BodyWeight => Some("last_weight"),
            ObservationType::HeartRate => Some("last_heart_rate"),
            ObservationType::StepCount => Some("last_step_count"),
            ObservationType::Sleep => None,
            ObservationType::UricAcid => Some("last_uric_acid"),
            ObservationType::Cholesterol => Some("last_cholesterol"),
        }
    }
}

// ---------------------------------------------------------------------------
// Value shapes
// ---------------------------------------------------------------------------

/// Meal context for a glucose reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseMarker {
    Pre,
    Post,
    Unspecified,
}

/// Measurement site for a thermometer reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureMode {
    Ear,
    Forehead,
    Other,
}

/// Per-type observation values.  The `type` tag matches
/// `ObservationType`'s snake_case serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservationValues {
    BloodPressure {
        systolic: i32,
        diastolic: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pulse: Option<i32>,
    },
    BloodGlucose {
        #[serde(rename = "mg_per_dL")]
        mg_per_dl: f64,
        marker: GlucoseMarker,
    },
    Spo2 {
        percent: i32,
        /// Oximeters report a pulse alongside saturation; watch-derived
        /// readings borrow the envelope heart rate when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        pulse: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pi: Option<f64>,
    },
    BodyTemperature {
        celsius: f64,
        mode: TemperatureMode,
    },
    BodyWeight {
        kg: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        resistance: Option<f64>,
    },
    HeartRate {
        bpm: i32,
    },
    StepCount {
        steps: i64,
    },
    /// Implementation-opaque map, stored verbatim in history.
    Sleep {
        data: serde_json::Map<String, serde_json::Value>,
    },
    UricAcid {
        #[serde(rename = "mg_per_dL")]
        mg_per_dl: f64,
    },
    Cholesterol {
        #[serde(rename = "mg_per_dL")]
        mg_per_dl: f64,
    },
}

impl ObservationValues {
    pub fn observation_type(&self) -> ObservationType {
        match self {
            ObservationValues::BloodPressure { .. } => ObservationType::BloodPressure,
            ObservationValues::BloodGlucose { .. } => ObservationType::BloodGlucose,
            ObservationValues::Spo2 { .. } => ObservationType::Spo2,
            ObservationValues::BodyTemperature { .. } => ObservationType::BodyTemperature,
            ObservationValues::BodyWeight { .. } => ObservationType::BodyWeight,
            ObservationValues::HeartRate { .. } => ObservationType::HeartRate,
            ObservationValues::StepCount { .. } => ObservationType::StepCount,
            ObservationValues::Sleep { .. } => ObservationType::Sleep,
            ObservationValues::UricAcid { .. } => ObservationType::UricAcid,
            ObservationValues::Cholesterol { .. } => ObservationType::Cholesterol,
        }
    }
}

// ---------------------------------------------------------------------------
// Severity hints
// ---------------------------------------------------------------------------

/// Threshold classification attached to observations for display.
/// Never drives clinical action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityHint {
    Low,
    Normal,
    High,
    Critical,
    Fever,
    HighFever,
}

/// Classify a value set against the fixed display thresholds.
///
/// Returns `None` for types with no threshold table, and for readings
/// that fall in the gaps between bands.
pub fn severity_hint(values: &ObservationValues) -> Option<SeverityHint> {
    match values {
        ObservationValues::BloodPressure {
            systolic: sys,
            diastolic: dia,
            ..
        } => {
            // Physically implausible systolic readings are flagged but
            // still persisted.
            if *sys < 30 || *sys > 260 {
                return Some(SeverityHint::Critical);
            }
            if *sys >= 180 || *dia >= 120 {
                Some(SeverityHint::Critical)
            } else if (130..180).contains(sys) || (80..120).contains(dia) {
                Some(SeverityHint::High)
            } else if (90..=120).contains(sys) && (60..=80).contains(dia) {
                Some(SeverityHint::Normal)
            } else {
                None
            }
        }
        ObservationValues::HeartRate { bpm } => Some(if *bpm < 60 {
            SeverityHint::Low
        } else if *bpm <= 100 {
            SeverityHint::Normal
        } else if *bpm <= 150 {
            SeverityHint::High
        } else {
            SeverityHint::Critical
        }),
        ObservationValues::BodyTemperature { celsius, .. } => Some(if *celsius < 36.0 {
            SeverityHint::Low
        } else if *celsius <= 37.5 {
            SeverityHint::Normal
        } else if *celsius <= 39.0 {
            SeverityHint::Fever
        } else {
            SeverityHint::HighFever
        }),
        ObservationValues::Spo2 { percent, .. } => Some(if *percent < 90 {
            SeverityHint::Critical
        } else if *percent < 95 {
            SeverityHint::Low
        } else {
            SeverityHint::Normal
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// A single canonical medical measurement.
///
/// `(source_device_id, measured_at, observation_type, raw_fingerprint)`
/// is the duplicate-suppression key; it is unique per successful
/// persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: Uuid,
    pub patient_id: String,
    pub device_family: DeviceFamily,
    pub source_device_id: String,
    pub observation_type: ObservationType,
    /// Always UTC; only the decoder may apply a source time zone.
    pub measured_at: DateTime<Utc>,
    pub values: ObservationValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_hint: Option<SeverityHint>,
    pub raw_fingerprint: String,
}

impl Observation {
    /// Build an observation with a fresh id; the type and severity hint
    /// are derived from `values`.
    pub fn new(
        patient_id: impl Into<String>,
        device_family: DeviceFamily,
        source_device_id: impl Into<String>,
        measured_at: DateTime<Utc>,
        values: ObservationValues,
        hospital_id: Option<String>,
        raw_fingerprint: impl Into<String>,
    ) -> Self {
        let hint = severity_hint(&values);
        Observation {
            observation_id: Uuid::new_v4(),
            patient_id: patient_id.into(),
            device_family,
            source_device_id: source_device_id.into(),
            observation_type: values.observation_type(),
            measured_at,
            values,
            hospital_id,
            severity_hint: hint,
            raw_fingerprint: raw_fingerprint.into(),
        }
    }
}

/// A `last_<type>` snapshot entry on the patient record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotValue {
    #[serde(flatten)]
    pub values: ObservationValues,
    pub measured_at: DateTime<Utc>,
    pub source_device_family: DeviceFamily,
}

/// Hex SHA-256 of the normalized source bytes, used as the idempotency
/// component of the duplicate-suppression key.
pub fn fingerprint(raw: &[u8]) -> String {
    let digest = Sha256::digest(raw);
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn observation_type_serializes_snake_case() {
        let json = serde_json::to_value(ObservationType::BloodPressure).unwrap();
        assert_eq!(json, "blood_pressure");
        let json = serde_json::to_value(ObservationType::Spo2).unwrap();
        assert_eq!(json, "spo2");
    }

    #[test]
    fn values_round_trip_on_the_closed_set() {
        let all = vec![
            ObservationValues::BloodPressure {
                systolic: 120,
                diastolic: 80,
                pulse: Some(70),
            },
            ObservationValues::BloodGlucose {
                mg_per_dl: 104.0,
                marker: GlucoseMarker::Pre,
            },
            ObservationValues::Spo2 {
                percent: 98,
                pulse: Some(72),
                pi: Some(4.2),
            },
            ObservationValues::BodyTemperature {
                celsius: 36.6,
                mode: TemperatureMode::Forehead,
            },
            ObservationValues::BodyWeight {
                kg: 68.5,
                resistance: None,
            },
            ObservationValues::HeartRate { bpm: 74 },
            ObservationValues::StepCount { steps: 5000 },
            ObservationValues::UricAcid { mg_per_dl: 5.5 },
            ObservationValues::Cholesterol { mg_per_dl: 180.0 },
        ];
        for values in all {
            let json = serde_json::to_string(&values).unwrap();
            let back: ObservationValues = serde_json::from_str(&json).unwrap();
            assert_eq!(back, values);
        }
    }

    #[test]
    fn glucose_serializes_with_uppercase_dl() {
        let values = ObservationValues::BloodGlucose {
            mg_per_dl: 142.0,
            marker: GlucoseMarker::Unspecified,
        };
        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json["mg_per_dL"], 142.0);
        assert_eq!(json["marker"], "unspecified");
    }

    #[test]
    fn blood_pressure_thresholds() {
        let bp = |sys, dia| ObservationValues::BloodPressure {
            systolic: sys,
            diastolic: dia,
            pulse: None,
        };
        assert_eq!(severity_hint(&bp(110, 70)), Some(SeverityHint::Normal));
        assert_eq!(severity_hint(&bp(137, 95)), Some(SeverityHint::High));
        assert_eq!(severity_hint(&bp(185, 70)), Some(SeverityHint::Critical));
        assert_eq!(severity_hint(&bp(110, 125)), Some(SeverityHint::Critical));
        // Gap between normal and high bands: no hint.
        assert_eq!(severity_hint(&bp(125, 70)), None);
        // Implausible readings are critical but still persistable.
        assert_eq!(severity_hint(&bp(25, 70)), Some(SeverityHint::Critical));
        assert_eq!(severity_hint(&bp(270, 70)), Some(SeverityHint::Critical));
    }

    #[test]
    fn heart_rate_thresholds() {
        let hr = |bpm| ObservationValues::HeartRate { bpm };
        assert_eq!(severity_hint(&hr(55)), Some(SeverityHint::Low));
        assert_eq!(severity_hint(&hr(60)), Some(SeverityHint::Normal));
        assert_eq!(severity_hint(&hr(100)), Some(SeverityHint::Normal));
        assert_eq!(severity_hint(&hr(101)), Some(SeverityHint::High));
        assert_eq!(severity_hint(&hr(150)), Some(SeverityHint::High));
        assert_eq!(severity_hint(&hr(151)), Some(SeverityHint::Critical));
    }

    #[test]
    fn temperature_and_spo2_thresholds() {
        let temp = |celsius| ObservationValues::BodyTemperature {
            celsius,
            mode: TemperatureMode::Ear,
        };
        assert_eq!(severity_hint(&temp(35.5)), Some(SeverityHint::Low));
        assert_eq!(severity_hint(&temp(37.0)), Some(SeverityHint::Normal));
        assert_eq!(severity_hint(&temp(38.0)), Some(SeverityHint::Fever));
        assert_eq!(severity_hint(&temp(39.5)), Some(SeverityHint::HighFever));

        let spo2 = |percent| ObservationValues::Spo2 {
            percent,
            pulse: Some(70),
            pi: None,
        };
        assert_eq!(severity_hint(&spo2(88)), Some(SeverityHint::Critical));
        assert_eq!(severity_hint(&spo2(92)), Some(SeverityHint::Low));
        assert_eq!(severity_hint(&spo2(97)), Some(SeverityHint::Normal));
    }

    #[test]
    fn new_observation_derives_type_and_hint() {
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
            fingerprint(b"payload"),
        );
        assert_eq!(obs.observation_type, ObservationType::BloodPressure);
        assert_eq!(obs.severity_hint, Some(SeverityHint::High));
        assert_eq!(obs.measured_at, measured_at);
    }

    #[test]
    fn fingerprint_is_stable_hex_sha256() {
        let a = fingerprint(b"abc");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint(b"abc"));
        assert_ne!(a, fingerprint(b"abd"));
        // Known SHA-256 of "abc".
        assert!(a.starts_with("ba7816bf"));
    }

    #[test]
    fn snapshot_field_covers_every_type_except_sleep() {
        assert_eq!(ObservationType::Sleep.snapshot_field(), None);
        assert_eq!(
            ObservationType::BloodGlucose.snapshot_field(),
            Some("last_glucose")
        );
        assert_eq!(
            ObservationType::StepCount.snapshot_field(),
            Some("last_step_count")
        );
    }
}
