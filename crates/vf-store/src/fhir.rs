//! FHIR-R5 structural shaping.
//!
//! The shadow collection mirrors observations as FHIR resources for
//! downstream interoperability.  Shaping only — no conformance
//! validation, and never a source of truth.

use serde_json::{json, Value};
use vf_model::{Observation, ObservationType, ObservationValues};

const LOINC: &str = "http://loinc.org";
const UCUM: &str = "http://unitsofmeasure.org";

/// LOINC coding for an observation type, where one exists.
pub fn loinc_code(observation_type: ObservationType) -> Option<(&'static str, &'static str)> {
    match observation_type {
        ObservationType::BloodPressure => Some(("85354-9", "Blood pressure panel")),
        ObservationType::BloodGlucose => Some(("2339-0", "Glucose [Mass/volume] in Blood")),
        ObservationType::Spo2 => Some(("2708-6", "Oxygen saturation in Arterial blood")),
        ObservationType::BodyTemperature => Some(("8310-5", "Body temperature")),
        ObservationType::BodyWeight => Some(("29463-7", "Body weight")),
        ObservationType::HeartRate => Some(("8867-4", "Heart rate")),
        ObservationType::StepCount => Some(("55423-8", "Number of steps")),
        ObservationType::Sleep => None,
        ObservationType::UricAcid => Some(("3084-1", "Urate [Mass/volume] in Serum or Plasma")),
        ObservationType::Cholesterol => {
            Some(("2093-3", "Cholesterol [Mass/volume] in Serum or Plasma"))
        }
    }
}

fn quantity(value: f64, unit: &str) -> Value {
    json!({ "value": value, "unit": unit, "system": UCUM, "code": unit })
}

fn component(code: &str, display: &str, value: Value) -> Value {
    json!({
        "code": { "coding": [{ "system": LOINC, "code": code, "display": display }] },
        "valueQuantity": value,
    })
}

/// Shape an observation into a FHIR R5 `Observation` resource.
pub fn observation_resource(obs: &Observation) -> Value {
    let mut resource = json!({
        "resourceType": "Observation",
        "id": obs.observation_id.to_string(),
        "status": "final",
        "subject": { "reference": format!("Patient/{}", obs.patient_id) },
        "effectiveDateTime": obs.measured_at.to_rfc3339(),
        "device": { "display": format!("{}:{}", obs.device_family.as_str(), obs.source_device_id) },
    });

    if let Some((code, display)) = loinc_code(obs.observation_type) {
        resource["code"] =
            json!({ "coding": [{ "system": LOINC, "code": code, "display": display }] });
    } else {
        resource["code"] = json!({ "text": obs.observation_type.as_str() });
    }

    if let Some(hospital_id) = &obs.hospital_id {
        resource["performer"] = json!([{ "reference": format!("Organization/{hospital_id}") }]);
    }

    match &obs.values {
        ObservationValues::BloodPressure {
            systolic,
            diastolic,
            pulse,
        } => {
            let mut components = vec![
                component(
                    "8480-6",
                    "Systolic blood pressure",
                    quantity(f64::from(*systolic), "mm[Hg]"),
                ),
                component(
                    "8462-4",
                    "Diastolic blood pressure",
                    quantity(f64::from(*diastolic), "mm[Hg]"),
                ),
            ];
            if let Some(pulse) = pulse {
                components.push(component(
                    "8867-4",
                    "Heart rate",
                    quantity(f64::from(*pulse), "/min"),
                ));
            }
            resource["component"] = Value::Array(components);
        }
        ObservationValues::BloodGlucose { mg_per_dl, .. } => {
            resource["valueQuantity"] = quantity(*mg_per_dl, "mg/dL");
        }
        ObservationValues::Spo2 { percent, .. } => {
            resource["valueQuantity"] = quantity(f64::from(*percent), "%");
        }
        ObservationValues::BodyTemperature { celsius, .. } => {
            resource["valueQuantity"] = quantity(*celsius, "Cel");
        }
        ObservationValues::BodyWeight { kg, .. } => {
            resource["valueQuantity"] = quantity(*kg, "kg");
        }
        ObservationValues::HeartRate { bpm } => {
            resource["valueQuantity"] = quantity(f64::from(*bpm), "/min");
        }
        ObservationValues::StepCount { steps } => {
            // Steps are a count, not a UCUM quantity.
            resource["valueInteger"] = json!(steps);
        }
        ObservationValues::Sleep { data } => {
            resource["valueAttachment"] = json!({
                "contentType": "application/json",
                "data": Value::Object(data.clone()),
            });
        }
        ObservationValues::UricAcid { mg_per_dl } | ObservationValues::Cholesterol { mg_per_dl } => {
            resource["valueQuantity"] = quantity(*mg_per_dl, "mg/dL");
        }
    }

    resource
}

/// Shape a hospital reference into a minimal FHIR `Organization`.
pub fn organization_resource(hospital_id: &str, name: Option<&str>) -> Value {
    json!({
        "resourceType": "Organization",
        "id": hospital_id,
        "name": name.unwrap_or(hospital_id),
    })
}

/// Shape a hospital's geocoords into a FHIR `Location` managed by its
/// organization.
pub fn location_resource(hospital_id: &str, name: Option<&str>, lat: f64, lng: f64) -> Value {
    json!({
        "resourceType": "Location",
        "id": hospital_id,
        "name": name.unwrap_or(hospital_id),
        "position": { "latitude": lat, "longitude": lng },
        "managingOrganization": { "reference": format!("Organization/{hospital_id}") },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vf_model::{fingerprint, DeviceFamily};

    #[test]
    fn blood_pressure_shapes_as_component_panel() {
        let obs = Observation::new(
            "P1",
            DeviceFamily::GatewayBox,
            "d616f9641622",
            Utc.with_ymd_and_hms(2028, 3, 14, 6, 32, 51).unwrap(),
            ObservationValues::BloodPressure {
                systolic: 137,
                diastolic: 95,
                pulse: Some(74),
            },
            Some("H1".to_owned()),
            fingerprint(b"raw"),
        );
        let resource = observation_resource(&obs);
        assert_eq!(resource["resourceType"], "Observation");
        assert_eq!(resource["code"]["coding"][0]["code"], "85354-9");
        assert_eq!(resource["subject"]["reference"], "Patient/P1");
        assert_eq!(resource["performer"][0]["reference"], "Organization/H1");
        let components = resource["component"].as_array().unwrap();
        assert_eq!(components.len(), 3);
        assert_eq!(components[0]["valueQuantity"]["value"], 137.0);
    }

    #[test]
    fn scalar_types_shape_as_value_quantity() {
        let obs = Observation::new(
            "P2",
            DeviceFamily::HospitalKiosk,
            "CM:4B",
            Utc::now(),
            ObservationValues::BloodGlucose {
                mg_per_dl: 142.0,
                marker: vf_model::GlucoseMarker::Unspecified,
            },
            None,
            fingerprint(b"raw"),
        );
        let resource = observation_resource(&obs);
        assert_eq!(resource["valueQuantity"]["value"], 142.0);
        assert_eq!(resource["valueQuantity"]["unit"], "mg/dL");
        assert!(resource.get("performer").is_none());
    }
}
