//! Raw payload builders and registry seeds for pipeline tests.
//!
//! Payloads are built as the devices publish them (wire field names,
//! epoch or Bangkok-local timestamps), so tests exercise the real
//! decoder path.

use chrono::{DateTime, Utc};
use serde_json::json;
use vf_store::{HospitalDoc, KioskDoc, PatientDoc, SubDeviceDoc, WatchDoc};

/// The §6.1 contract payload: gateway BP report for one sub-device.
pub fn gateway_bp_payload(
    gateway_mac: &str,
    ble_addr: &str,
    scan_time: DateTime<Utc>,
    systolic: i32,
    diastolic: i32,
    pulse: i32,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "from": "BLE",
        "to": "CLOUD",
        "time": scan_time.timestamp(),
        "deviceCode": gateway_mac,
        "mac": gateway_mac,
        "type": "reportAttribute",
        "device": "WBP BIOLIGHT",
        "data": {
            "attribute": "BP_BIOLIGTH",
            "mac": gateway_mac,
            "value": {
                "device_list": [{
                    "scan_time": scan_time.timestamp(),
                    "ble_addr": ble_addr,
                    "bp_high": systolic,
                    "bp_low": diastolic,
                    "PR": pulse,
                }]
            }
        }
    }))
    .expect("fixture payload serializes")
}

/// Watch vital-sign payload with a Bangkok-local timestamp.
pub fn watch_vitals_payload(imei: &str, measured_at: DateTime<Utc>) -> Vec<u8> {
    let local = measured_at
        .with_timezone(&chrono_tz::Asia::Bangkok)
        .format("%d/%m/%Y %H:%M:%S")
        .to_string();
    serde_json::to_vec(&json!({
        "IMEI": imei,
        "heartRate": 75,
        "bloodPressure": { "bp_sys": 120, "bp_dia": 80 },
        "spO2": 98,
        "bodyTemperature": 36.5,
        "battery": 85,
        "signalGSM": 4,
        "step": 5000,
        "timeStamps": local,
    }))
    .expect("fixture payload serializes")
}

/// One AP55 sample tuple: (heart rate, systolic, diastolic, spo2, temp, ts).
pub type Ap55Sample = (i32, i32, i32, i32, f64, DateTime<Utc>);

pub fn ap55_payload(imei: &str, samples: &[Ap55Sample]) -> Vec<u8> {
    let data: Vec<serde_json::Value> = samples
        .iter()
        .map(|(hr, sys, dia, spo2, temp, ts)| {
            json!({
                "heartRate": hr,
                "bloodPressure": { "bp_sys": sys, "bp_dia": dia },
                "spO2": spo2,
                "bodyTemperature": temp,
                "timestamp": ts.timestamp(),
            })
        })
        .collect();
    serde_json::to_vec(&json!({
        "IMEI": imei,
        "num_datas": samples.len(),
        "data": data,
    }))
    .expect("fixture payload serializes")
}

/// SOS payload with a GPS fix.
pub fn sos_payload(imei: &str, occurred_at: DateTime<Utc>, lat: f64, lng: f64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "IMEI": imei,
        "time": occurred_at.timestamp(),
        "location": {
            "GPS": { "latitude": lat, "longitude": lng, "speed": 0.0 },
            "LBS": { "mcc": 520, "mnc": 3, "lac": 1234, "cid": 56789 },
        }
    }))
    .expect("fixture payload serializes")
}

/// Watch heartbeat, optionally with a step counter.
pub fn watch_hb_payload(imei: &str, steps: Option<i64>, at: DateTime<Utc>) -> Vec<u8> {
    let mut body = json!({
        "IMEI": imei,
        "battery": 62,
        "signalGSM": 3,
        "time": at.timestamp(),
    });
    if let Some(steps) = steps {
        body["step"] = json!(steps);
    }
    serde_json::to_vec(&body).expect("fixture payload serializes")
}

/// Kiosk glucose report for a citizen id.
pub fn kiosk_glucose_payload(
    kiosk_mac: &str,
    citizen_id: &str,
    mg_per_dl: f64,
    at: DateTime<Utc>,
) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "reportAttribute",
        "mac": kiosk_mac,
        "time": at.timestamp(),
        "citizen_id": citizen_id,
        "attribute": "CONTOUR",
        "value": { "blood_glucose": mg_per_dl, "scan_time": at.timestamp() },
    }))
    .expect("fixture payload serializes")
}

// ---------------------------------------------------------------------------
// Registry seeds
// ---------------------------------------------------------------------------

pub fn patient(patient_id: &str) -> PatientDoc {
    PatientDoc {
        patient_id: patient_id.to_owned(),
        ..PatientDoc::default()
    }
}

pub fn hospital(hospital_id: &str) -> HospitalDoc {
    HospitalDoc {
        hospital_id: hospital_id.to_owned(),
        ..HospitalDoc::default()
    }
}

pub fn sub_device(ble_addr: &str, patient_id: &str, hospital_id: &str) -> SubDeviceDoc {
    SubDeviceDoc {
        ble_addr: ble_addr.to_owned(),
        patient_id: patient_id.to_owned(),
        hospital_id: Some(hospital_id.to_owned()),
        device_type_tag: Some("BP_BIOLIGTH".to_owned()),
    }
}

pub fn watch(imei: &str, patient_id: &str, hospital_id: &str) -> WatchDoc {
    WatchDoc {
        imei: imei.to_owned(),
        patient_id: Some(patient_id.to_owned()),
        hospital_id: Some(hospital_id.to_owned()),
    }
}

pub fn kiosk(mac: &str, hospital_id: &str) -> KioskDoc {
    KioskDoc {
        mac: mac.to_owned(),
        hospital_id: Some(hospital_id.to_owned()),
    }
}
