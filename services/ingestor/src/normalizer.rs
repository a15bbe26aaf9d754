//! Decoded payload -> canonical observations and emergency events.
//!
//! Stateless.  The attribute table is closed and matched
//! case-sensitively; adding a device type is a new match arm, not a
//! runtime registration.  `measured_at` selection order: inner
//! `time`/`scan_time`, then envelope time, then bus receive time.

use crate::resolver::Resolution;
use chrono::{DateTime, Utc};
use vf_model::{
    fingerprint, EmergencyEvent, GlucoseMarker, Location, Observation, ObservationValues,
    TemperatureMode,
};
use vf_protocol::{Decoded, VitalsFields, WatchBp};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("attribute `{attribute}` is missing value field `{field}`")]
    MissingValue {
        attribute: String,
        field: &'static str,
    },
    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),
}

impl NormalizeError {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizeError::MissingValue { .. } => "missing_value",
            NormalizeError::UnknownAttribute(_) => "unknown_attribute",
        }
    }
}

/// Everything a decoded payload normalizes into.
#[derive(Debug, Default)]
pub struct Normalized {
    pub observations: Vec<Observation>,
    pub emergencies: Vec<EmergencyEvent>,
    /// Position update for the patient's `last_location` snapshot.
    pub location_update: Option<(Location, DateTime<Utc>)>,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.emergencies.is_empty()
    }
}

/// Normalize one decoded payload.
///
/// `raw` is the original bus payload; its hash becomes the
/// idempotency fingerprint shared by every record from this message.
pub fn normalize(
    decoded: &Decoded,
    resolution: &Resolution,
    raw: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Normalized, NormalizeError> {
    let fp = fingerprint(raw);
    let mut out = Normalized::default();

    match decoded {
        Decoded::GatewayMedical(medical) => {
            for reading in &medical.device_list {
                let values = attribute_values(&medical.attribute, &reading.vitals)?;
                let measured_at = reading
                    .scan_time
                    .or(medical.envelope_time)
                    .unwrap_or(received_at);
                out.observations.push(Observation::new(
                    resolution.patient_id.clone(),
                    resolution.device_family,
                    reading.ble_addr.clone(),
                    measured_at,
                    values,
                    Some(resolution.hospital_id.clone()),
                    fp.clone(),
                ));
            }
        }

        Decoded::Kiosk(kiosk) => {
            let values = attribute_values(&kiosk.attribute, &kiosk.vitals)?;
            let measured_at = kiosk.measured_at.unwrap_or(received_at);
            out.observations.push(Observation::new(
                resolution.patient_id.clone(),
                resolution.device_family,
                kiosk.kiosk_mac.clone(),
                measured_at,
                values,
                Some(resolution.hospital_id.clone()),
                fp,
            ));
        }

        Decoded::WatchVitals(vitals) => {
            let measured_at = vitals.measured_at.unwrap_or(received_at);
            push_watch_sample(
                &mut out,
                resolution,
                &fp,
                measured_at,
                vitals.heart_rate,
                vitals.blood_pressure,
                vitals.spo2,
                vitals.body_temperature,
            );
        }

        Decoded::WatchBatch(batch) => {
            // One observation per sample per sub-type; sample order and
            // per-sample timestamps are preserved.
            for sample in &batch.samples {
                push_watch_sample(
                    &mut out,
                    resolution,
                    &fp,
                    sample.measured_at,
                    sample.heart_rate,
                    sample.blood_pressure,
                    sample.spo2,
                    sample.body_temperature,
                );
            }
        }

        Decoded::WatchStatus(status) => {
            // Heartbeats yield a step-count observation only when the
            // counter is present; battery/signal stay flow-level.
            if let Some(steps) = status.steps {
                let measured_at = status.envelope_time.unwrap_or(received_at);
                out.observations.push(Observation::new(
                    resolution.patient_id.clone(),
                    resolution.device_family,
                    resolution.device_id.clone(),
                    measured_at,
                    ObservationValues::StepCount { steps },
                    Some(resolution.hospital_id.clone()),
                    fp,
                ));
            }
        }

        Decoded::WatchSleep(sleep) => {
            let measured_at = sleep.envelope_time.unwrap_or(received_at);
            out.observations.push(Observation::new(
                resolution.patient_id.clone(),
                resolution.device_family,
                resolution.device_id.clone(),
                measured_at,
                ObservationValues::Sleep {
                    data: sleep.data.clone(),
                },
                Some(resolution.hospital_id.clone()),
                fp,
            ));
        }

        Decoded::WatchLocation(location) => {
            if let Some(position) = &location.location {
                let at = location.envelope_time.unwrap_or(received_at);
                out.location_update = Some((position.clone(), at));
            }
        }

        Decoded::WatchEmergency(emergency) => {
            let occurred_at = emergency.envelope_time.unwrap_or(received_at);
            let raw_value = serde_json::from_slice(raw).unwrap_or(serde_json::Value::Null);
            out.emergencies.push(EmergencyEvent::new(
                Some(resolution.patient_id.clone()),
                emergency.imei.clone(),
                emergency.kind,
                emergency.location.clone(),
                occurred_at,
                raw_value,
            ));
            if let Some(position) = &emergency.location {
                out.location_update = Some((position.clone(), occurred_at));
            }
        }

        // Pure device-status payloads produce flow events only.
        Decoded::GatewayStatus(_) | Decoded::WatchOnline(_) => {}
    }

    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn push_watch_sample(
    out: &mut Normalized,
    resolution: &Resolution,
    fp: &str,
    measured_at: DateTime<Utc>,
    heart_rate: Option<i32>,
    blood_pressure: Option<WatchBp>,
    spo2: Option<i32>,
    body_temperature: Option<f64>,
) {
    let mut push = |values: ObservationValues| {
        out.observations.push(Observation::new(
            resolution.patient_id.clone(),
            resolution.device_family,
            resolution.device_id.clone(),
            measured_at,
            values,
            Some(resolution.hospital_id.clone()),
            fp.to_owned(),
        ));
    };
    if let Some(bpm) = heart_rate {
        push(ObservationValues::HeartRate { bpm });
    }
    if let Some(bp) = blood_pressure {
        push(ObservationValues::BloodPressure {
            systolic: bp.bp_sys,
            diastolic: bp.bp_dia,
            pulse: heart_rate,
        });
    }
    if let Some(percent) = spo2 {
        push(ObservationValues::Spo2 {
            percent,
            pulse: heart_rate,
            pi: None,
        });
    }
    if let Some(celsius) = body_temperature {
        push(ObservationValues::BodyTemperature {
            celsius,
            mode: TemperatureMode::Other,
        });
    }
}

// ---------------------------------------------------------------------------
// Attribute table
// ---------------------------------------------------------------------------

fn require<T: Copy>(
    attribute: &str,
    field: &'static str,
    value: Option<T>,
) -> Result<T, NormalizeError> {
    value.ok_or_else(|| NormalizeError::MissingValue {
        attribute: attribute.to_owned(),
        field,
    })
}

/// The closed attribute -> value-shape mapping for gateway sub-devices
/// and kiosk reports.
fn attribute_values(
    attribute: &str,
    vitals: &VitalsFields,
) -> Result<ObservationValues, NormalizeError> {
    match attribute {
        "BP_BIOLIGTH" | "WBP BIOLIGHT" | "BLE_BPG" | "WBP_JUMPER" => {
            Ok(ObservationValues::BloodPressure {
                systolic: require(attribute, "bp_high", vitals.bp_high)?,
                diastolic: require(attribute, "bp_low", vitals.bp_low)?,
                pulse: vitals.pr,
            })
        }
        "Contour_Elite" | "AccuChek_Instant" | "CONTOUR" => Ok(ObservationValues::BloodGlucose {
            mg_per_dl: require(attribute, "blood_glucose", vitals.blood_glucose)?,
            marker: glucose_marker(vitals.marker.as_deref()),
        }),
        "Oximeter JUMPER" | "Oximeter_JUMPER" => Ok(ObservationValues::Spo2 {
            percent: require(attribute, "spo2", vitals.spo2)?,
            pulse: Some(require(attribute, "pulse", vitals.pulse)?),
            pi: vitals.pi,
        }),
        "IR_TEMO_JUMPER" | "TEMO_Jumper" => Ok(ObservationValues::BodyTemperature {
            celsius: require(attribute, "temp", vitals.temp)?,
            mode: temperature_mode(vitals.mode.as_deref()),
        }),
        "BodyScale_JUMPER" => Ok(ObservationValues::BodyWeight {
            kg: require(attribute, "weight", vitals.weight)?,
            resistance: vitals.resistance,
        }),
        "MGSS_REF_UA" => Ok(ObservationValues::UricAcid {
            mg_per_dl: require(attribute, "uric_acid", vitals.uric_acid)?,
        }),
        "MGSS_REF_CHOL" => Ok(ObservationValues::Cholesterol {
            mg_per_dl: require(attribute, "cholesterol", vitals.cholesterol)?,
        }),
        other => Err(NormalizeError::UnknownAttribute(other.to_owned())),
    }
}

/// Absent or unrecognized markers are `unspecified`.
fn glucose_marker(marker: Option<&str>) -> GlucoseMarker {
    match marker {
        Some("pre") => GlucoseMarker::Pre,
        Some("post") => GlucoseMarker::Post,
        _ => GlucoseMarker::Unspecified,
    }
}

fn temperature_mode(mode: Option<&str>) -> TemperatureMode {
    match mode {
        Some("ear") => TemperatureMode::Ear,
        Some("forehead") => TemperatureMode::Forehead,
        _ => TemperatureMode::Other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
