//! Payload decoder: raw bytes → tagged `Decoded` variant, by topic.
//!
//! The decoder validates structural shape only.  Gateway sub-device
//! readings and kiosk values carry every measurement field as an
//! `Option`; the per-attribute requirements (which fields a
//! `BP_BIOLIGTH` reading must have) are the normalizer's step-4
//! concern.
//!
//! Raw envelope structs mirror the device JSON verbatim and are
//! converted into the public types, the same raw/validated split the
//! config loader uses.

use crate::time::{from_epoch_seconds, TimeField};
use crate::topics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use vf_model::{EmergencyKind, Location, WifiNetwork};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}`: {reason}")]
    TypeMismatch { field: &'static str, reason: String },
    #[error("num_datas={declared} but {actual} samples present")]
    BatchCountMismatch { declared: usize, actual: usize },
    #[error("unparseable time: {0}")]
    Time(String),
    #[error("no decoder for topic `{0}`")]
    UnknownTopic(String),
}

impl DecodeError {
    /// Stable kind tag for flow events and the event log.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Json(_) => "json",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::TypeMismatch { .. } => "type_mismatch",
            DecodeError::BatchCountMismatch { .. } => "batch_count_mismatch",
            DecodeError::Time(_) => "time",
            DecodeError::UnknownTopic(_) => "unknown_topic",
        }
    }
}

// ---------------------------------------------------------------------------
// Shared measurement fields
// ---------------------------------------------------------------------------

/// The full optional measurement set carried by gateway sub-device
/// readings and kiosk value blocks.  Field names are the device wire
/// names; which of them must be present depends on the attribute and
/// is enforced downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalsFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bp_high: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bp_low: Option<i32>,
    #[serde(rename = "PR", skip_serializing_if = "Option::is_none")]
    pub pr: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spo2: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resistance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_glucose: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uric_acid: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cholesterol: Option<f64>,
}

// ---------------------------------------------------------------------------
// Public decoded types
// ---------------------------------------------------------------------------

/// Gateway box status heartbeat (`ESP32_BLE_GW_TX`).
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStatus {
    pub gateway_mac: String,
    pub envelope_time: Option<DateTime<Utc>>,
}

/// One sub-device reading inside a gateway medical envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct SubDeviceReading {
    pub ble_addr: String,
    pub scan_time: Option<DateTime<Utc>>,
    pub vitals: VitalsFields,
}

/// Gateway box medical report (`dusun_pub`).
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMedical {
    pub gateway_mac: String,
    pub attribute: String,
    pub device_mac: Option<String>,
    pub envelope_time: Option<DateTime<Utc>>,
    pub device_list: Vec<SubDeviceReading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchBp {
    pub bp_sys: i32,
    pub bp_dia: i32,
}

/// Watch single vital-sign report (`iMEDE_watch/VitalSign`).
#[derive(Debug, Clone, PartialEq)]
pub struct WatchVitals {
    pub imei: String,
    pub heart_rate: Option<i32>,
    pub blood_pressure: Option<WatchBp>,
    pub spo2: Option<i32>,
    pub body_temperature: Option<f64>,
    pub battery: Option<i32>,
    pub signal_gsm: Option<i32>,
    pub steps: Option<i64>,
    pub measured_at: Option<DateTime<Utc>>,
}

/// One sample inside an AP55 batch.  Source order is preserved and the
/// per-sample timestamp is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchBatchSample {
    pub heart_rate: Option<i32>,
    pub blood_pressure: Option<WatchBp>,
    pub spo2: Option<i32>,
    pub body_temperature: Option<f64>,
    pub measured_at: DateTime<Utc>,
}

/// Watch batch upload (`iMEDE_watch/AP55`).
#[derive(Debug, Clone, PartialEq)]
pub struct WatchBatch {
    pub imei: String,
    pub samples: Vec<WatchBatchSample>,
}

/// Watch heartbeat (`iMEDE_watch/hb`): device status plus an optional
/// step counter.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchStatus {
    pub imei: String,
    pub battery: Option<i32>,
    pub signal_gsm: Option<i32>,
    pub steps: Option<i64>,
    pub envelope_time: Option<DateTime<Utc>>,
}

/// Watch position report (`iMEDE_watch/location`).
#[derive(Debug, Clone, PartialEq)]
pub struct WatchLocation {
    pub imei: String,
    pub location: Option<Location>,
    pub envelope_time: Option<DateTime<Utc>>,
}

/// Watch sleep upload (`iMEDE_watch/sleepdata`); the map is opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSleep {
    pub imei: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub envelope_time: Option<DateTime<Utc>>,
}

/// Watch emergency (`iMEDE_watch/SOS`, `iMEDE_watch/fallDown`).
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEmergency {
    pub imei: String,
    pub kind: EmergencyKind,
    pub location: Option<Location>,
    pub envelope_time: Option<DateTime<Utc>>,
}

/// Watch online trigger (`iMEDE_watch/onlineTrigger`): liveness only.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOnline {
    pub imei: String,
}

/// Hospital kiosk report (`CM4_BLE_GW_TX`).
#[derive(Debug, Clone, PartialEq)]
pub struct KioskObservation {
    pub kiosk_mac: String,
    pub citizen_id: String,
    pub attribute: String,
    pub vitals: VitalsFields,
    pub measured_at: Option<DateTime<Utc>>,
}

/// A decoded inbound payload, tagged by device family and topic role.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    GatewayStatus(GatewayStatus),
    GatewayMedical(GatewayMedical),
    WatchVitals(WatchVitals),
    WatchBatch(WatchBatch),
    WatchStatus(WatchStatus),
    WatchLocation(WatchLocation),
    WatchSleep(WatchSleep),
    WatchEmergency(WatchEmergency),
    WatchOnline(WatchOnline),
    Kiosk(KioskObservation),
}

impl Decoded {
    /// The topic an encoded form of this payload is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Decoded::GatewayStatus(_) => topics::GATEWAY_STATUS,
            Decoded::GatewayMedical(_) => topics::GATEWAY_MEDICAL,
            Decoded::WatchVitals(_) => topics::WATCH_VITALS,
            Decoded::WatchBatch(_) => topics::WATCH_BATCH,
            Decoded::WatchStatus(_) => topics::WATCH_HEARTBEAT,
            Decoded::WatchLocation(_) => topics::WATCH_LOCATION,
            Decoded::WatchSleep(_) => topics::WATCH_SLEEP,
            Decoded::WatchEmergency(e) => match e.kind {
                EmergencyKind::Panic => topics::WATCH_SOS,
                EmergencyKind::Fall => topics::WATCH_FALL,
            },
            Decoded::WatchOnline(_) => topics::WATCH_ONLINE,
            Decoded::Kiosk(_) => topics::KIOSK,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw envelope structs (wire-verbatim)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawGatewayEnvelope {
    time: Option<i64>,
    #[serde(rename = "deviceCode")]
    device_code: Option<String>,
    mac: Option<String>,
    data: Option<RawGatewayData>,
}

#[derive(Deserialize)]
struct RawGatewayData {
    attribute: Option<String>,
    mac: Option<String>,
    value: Option<RawGatewayValue>,
}

#[derive(Deserialize)]
struct RawGatewayValue {
    #[serde(default)]
    device_list: Vec<RawSubDeviceReading>,
}

#[derive(Deserialize)]
struct RawSubDeviceReading {
    ble_addr: Option<String>,
    scan_time: Option<i64>,
    #[serde(flatten)]
    vitals: VitalsFields,
}

#[derive(Deserialize)]
struct RawWatchVitals {
    #[serde(rename = "IMEI")]
    imei: Option<String>,
    #[serde(rename = "heartRate")]
    heart_rate: Option<i32>,
    #[serde(rename = "bloodPressure")]
    blood_pressure: Option<WatchBp>,
    #[serde(rename = "spO2")]
    spo2: Option<i32>,
    #[serde(rename = "bodyTemperature")]
    body_temperature: Option<f64>,
    battery: Option<i32>,
    #[serde(rename = "signalGSM")]
    signal_gsm: Option<i32>,
    step: Option<i64>,
    #[serde(rename = "timeStamps")]
    time_stamps: Option<String>,
}

#[derive(Deserialize)]
struct RawWatchBatch {
    #[serde(rename = "IMEI")]
    imei: Option<String>,
    num_datas: Option<usize>,
    #[serde(default)]
    data: Vec<RawWatchBatchSample>,
}

#[derive(Deserialize)]
struct RawWatchBatchSample {
    #[serde(rename = "heartRate")]
    heart_rate: Option<i32>,
    #[serde(rename = "bloodPressure")]
    blood_pressure: Option<WatchBp>,
    #[serde(rename = "spO2")]
    spo2: Option<i32>,
    #[serde(rename = "bodyTemperature")]
    body_temperature: Option<f64>,
    timestamp: Option<TimeField>,
}

#[derive(Deserialize)]
struct RawWatchStatus {
    #[serde(rename = "IMEI")]
    imei: Option<String>,
    battery: Option<i32>,
    #[serde(rename = "signalGSM")]
    signal_gsm: Option<i32>,
    step: Option<i64>,
    time: Option<i64>,
}

#[derive(Deserialize)]
struct RawWatchLocation {
    #[serde(rename = "IMEI")]
    imei: Option<String>,
    location: Option<RawLocationBlock>,
    time: Option<i64>,
}

#[derive(Deserialize)]
struct RawWatchSleep {
    #[serde(rename = "IMEI")]
    imei: Option<String>,
    sleep: Option<serde_json::Map<String, serde_json::Value>>,
    time: Option<i64>,
}

#[derive(Deserialize)]
struct RawWatchEmergency {
    #[serde(rename = "IMEI")]
    imei: Option<String>,
    location: Option<RawLocationBlock>,
    time: Option<i64>,
}

#[derive(Deserialize)]
struct RawWatchOnline {
    #[serde(rename = "IMEI")]
    imei: Option<String>,
}

#[derive(Deserialize)]
struct RawGatewayStatus {
    mac: Option<String>,
    time: Option<i64>,
}

#[derive(Deserialize)]
struct RawKiosk {
    mac: Option<String>,
    citizen_id: Option<String>,
    attribute: Option<String>,
    value: Option<RawKioskValue>,
    time: Option<i64>,
}

#[derive(Deserialize)]
struct RawKioskValue {
    scan_time: Option<i64>,
    #[serde(flatten)]
    vitals: VitalsFields,
}

// ---------------------------------------------------------------------------
// Location block
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct RawLocationBlock {
    #[serde(rename = "GPS", skip_serializing_if = "Option::is_none")]
    gps: Option<RawGps>,
    #[serde(rename = "LBS", skip_serializing_if = "Option::is_none")]
    lbs: Option<RawLbs>,
    #[serde(rename = "WiFi", skip_serializing_if = "Option::is_none")]
    wifi: Option<Vec<RawWifi>>,
}

#[derive(Serialize, Deserialize)]
struct RawGps {
    latitude: f64,
    longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heading: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct RawLbs {
    mcc: u32,
    mnc: u32,
    lac: u32,
    cid: u32,
}

#[derive(Serialize, Deserialize)]
struct RawWifi {
    #[serde(rename = "SSID")]
    ssid: String,
    #[serde(rename = "MAC")]
    mac: String,
    #[serde(rename = "RSSI")]
    rssi: i32,
}

impl RawLocationBlock {
    /// Collapse the block into the single best source (gps > cell > wifi).
    fn into_location(self) -> Option<Location> {
        let gps = self.gps.map(|g| Location::Gps {
            lat: g.latitude,
            lng: g.longitude,
            speed: g.speed,
            heading: g.heading,
        });
        let cell = self.lbs.map(|l| Location::CellTriangulation {
            mcc: l.mcc,
            mnc: l.mnc,
            lac: l.lac,
            cid: l.cid,
        });
        let wifi = self.wifi.map(|nets| Location::WifiScan {
            networks: nets
                .into_iter()
                .map(|n| WifiNetwork {
                    ssid: n.ssid,
                    mac: n.mac,
                    rssi: n.rssi,
                })
                .collect(),
        });
        Location::preferred(gps, cell, wifi)
    }

    fn from_location(location: &Location) -> RawLocationBlock {
        let mut block = RawLocationBlock {
            gps: None,
            lbs: None,
            wifi: None,
        };
        match location {
            Location::Gps {
                lat,
                lng,
                speed,
                heading,
            } => {
                block.gps = Some(RawGps {
                    latitude: *lat,
                    longitude: *lng,
                    speed: *speed,
                    heading: *heading,
                });
            }
            Location::CellTriangulation { mcc, mnc, lac, cid } => {
                block.lbs = Some(RawLbs {
                    mcc: *mcc,
                    mnc: *mnc,
                    lac: *lac,
                    cid: *cid,
                });
            }
            Location::WifiScan { networks } => {
                block.wifi = Some(
                    networks
                        .iter()
                        .map(|n| RawWifi {
                            ssid: n.ssid.clone(),
                            mac: n.mac.clone(),
                            rssi: n.rssi,
                        })
                        .collect(),
                );
            }
        }
        block
    }
}

// ---------------------------------------------------------------------------
// Decode entry point
// ---------------------------------------------------------------------------

fn parse_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(payload).map_err(|e| DecodeError::Json(e.to_string()))
}

fn opt_epoch(secs: Option<i64>) -> Result<Option<DateTime<Utc>>, DecodeError> {
    secs.map(from_epoch_seconds).transpose()
}

/// Decode a raw bus payload by topic.
pub fn decode(topic: &str, payload: &[u8]) -> Result<Decoded, DecodeError> {
    match topic {
        topics::GATEWAY_STATUS => decode_gateway_status(payload),
        topics::GATEWAY_MEDICAL => decode_gateway_medical(payload),
        topics::KIOSK => decode_kiosk(payload),
        _ => match topics::watch_suffix(topic) {
            Some("VitalSign") => decode_watch_vitals(payload),
            Some("AP55") => decode_watch_batch(payload),
            Some("hb") => decode_watch_status(payload),
            Some("location") => decode_watch_location(payload),
            Some("sleepdata") => decode_watch_sleep(payload),
            Some("SOS" | "sos") => decode_watch_emergency(payload, EmergencyKind::Panic),
            Some("fallDown") => decode_watch_emergency(payload, EmergencyKind::Fall),
            Some("onlineTrigger") => decode_watch_online(payload),
            _ => Err(DecodeError::UnknownTopic(topic.to_owned())),
        },
    }
}

fn decode_gateway_status(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawGatewayStatus = parse_json(payload)?;
    Ok(Decoded::GatewayStatus(GatewayStatus {
        gateway_mac: raw.mac.ok_or(DecodeError::MissingField("mac"))?,
        envelope_time: opt_epoch(raw.time)?,
    }))
}

fn decode_gateway_medical(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawGatewayEnvelope = parse_json(payload)?;
    let gateway_mac = raw
        .mac
        .or(raw.device_code)
        .ok_or(DecodeError::MissingField("mac"))?;
    let data = raw.data.ok_or(DecodeError::MissingField("data"))?;
    let attribute = data
        .attribute
        .ok_or(DecodeError::MissingField("data.attribute"))?;
    let mut device_list = Vec::new();
    if let Some(value) = data.value {
        for entry in value.device_list {
            device_list.push(SubDeviceReading {
                ble_addr: entry
                    .ble_addr
                    .ok_or(DecodeError::MissingField("device_list.ble_addr"))?,
                scan_time: opt_epoch(entry.scan_time)?,
                vitals: entry.vitals,
            });
        }
    }
    Ok(Decoded::GatewayMedical(GatewayMedical {
        gateway_mac,
        attribute,
        device_mac: data.mac,
        envelope_time: opt_epoch(raw.time)?,
        device_list,
    }))
}

fn decode_watch_vitals(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawWatchVitals = parse_json(payload)?;
    let measured_at = raw
        .time_stamps
        .as_deref()
        .map(crate::time::parse_device_local)
        .transpose()?;
    Ok(Decoded::WatchVitals(WatchVitals {
        imei: raw.imei.ok_or(DecodeError::MissingField("IMEI"))?,
        heart_rate: raw.heart_rate,
        blood_pressure: raw.blood_pressure,
        spo2: raw.spo2,
        body_temperature: raw.body_temperature,
        battery: raw.battery,
        signal_gsm: raw.signal_gsm,
        steps: raw.step,
        measured_at,
    }))
}

fn decode_watch_batch(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawWatchBatch = parse_json(payload)?;
    let imei = raw.imei.ok_or(DecodeError::MissingField("IMEI"))?;
    let declared = raw.num_datas.ok_or(DecodeError::MissingField("num_datas"))?;
    if declared != raw.data.len() {
        return Err(DecodeError::BatchCountMismatch {
            declared,
            actual: raw.data.len(),
        });
    }
    let mut samples = Vec::with_capacity(raw.data.len());
    for sample in raw.data {
        let ts = sample
            .timestamp
            .ok_or(DecodeError::MissingField("data.timestamp"))?;
        samples.push(WatchBatchSample {
            heart_rate: sample.heart_rate,
            blood_pressure: sample.blood_pressure,
            spo2: sample.spo2,
            body_temperature: sample.body_temperature,
            measured_at: ts.to_utc()?,
        });
    }
    Ok(Decoded::WatchBatch(WatchBatch { imei, samples }))
}

fn decode_watch_status(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawWatchStatus = parse_json(payload)?;
    Ok(Decoded::WatchStatus(WatchStatus {
        imei: raw.imei.ok_or(DecodeError::MissingField("IMEI"))?,
        battery: raw.battery,
        signal_gsm: raw.signal_gsm,
        steps: raw.step,
        envelope_time: opt_epoch(raw.time)?,
    }))
}

fn decode_watch_location(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawWatchLocation = parse_json(payload)?;
    Ok(Decoded::WatchLocation(WatchLocation {
        imei: raw.imei.ok_or(DecodeError::MissingField("IMEI"))?,
        location: raw.location.and_then(RawLocationBlock::into_location),
        envelope_time: opt_epoch(raw.time)?,
    }))
}

fn decode_watch_sleep(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawWatchSleep = parse_json(payload)?;
    Ok(Decoded::WatchSleep(WatchSleep {
        imei: raw.imei.ok_or(DecodeError::MissingField("IMEI"))?,
        data: raw.sleep.ok_or(DecodeError::MissingField("sleep"))?,
        envelope_time: opt_epoch(raw.time)?,
    }))
}

fn decode_watch_emergency(payload: &[u8], kind: EmergencyKind) -> Result<Decoded, DecodeError> {
    let raw: RawWatchEmergency = parse_json(payload)?;
    Ok(Decoded::WatchEmergency(WatchEmergency {
        imei: raw.imei.ok_or(DecodeError::MissingField("IMEI"))?,
        kind,
        location: raw.location.and_then(RawLocationBlock::into_location),
        envelope_time: opt_epoch(raw.time)?,
    }))
}

fn decode_watch_online(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawWatchOnline = parse_json(payload)?;
    Ok(Decoded::WatchOnline(WatchOnline {
        imei: raw.imei.ok_or(DecodeError::MissingField("IMEI"))?,
    }))
}

fn decode_kiosk(payload: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawKiosk = parse_json(payload)?;
    let kiosk_mac = raw.mac.ok_or(DecodeError::MissingField("mac"))?;
    let citizen_id = raw.citizen_id.ok_or(DecodeError::MissingField("citizen_id"))?;
    let attribute = raw.attribute.ok_or(DecodeError::MissingField("attribute"))?;
    let (vitals, inner_time) = match raw.value {
        Some(v) => (v.vitals, v.scan_time),
        None => (VitalsFields::default(), None),
    };
    let measured_at = opt_epoch(inner_time.or(raw.time))?;
    Ok(Decoded::Kiosk(KioskObservation {
        kiosk_mac,
        citizen_id,
        attribute,
        vitals,
        measured_at,
    }))
}

// ---------------------------------------------------------------------------
// Encode (inverse of decode on the closed set)
// ---------------------------------------------------------------------------

/// Re-serialize a decoded payload into a wire envelope.
///
/// `decode(topic, encode(x)) == x` for every variant; used by the
/// fixture builders and the round-trip tests.
pub fn encode(decoded: &Decoded) -> Vec<u8> {
    let value = match decoded {
        Decoded::GatewayStatus(s) => {
            let mut v = json!({ "from": "ESP32", "to": "CLOUD", "mac": s.gateway_mac });
            if let Some(t) = s.envelope_time {
                v["time"] = json!(t.timestamp());
            }
            v
        }
        Decoded::GatewayMedical(m) => {
            let device_list: Vec<serde_json::Value> = m
                .device_list
                .iter()
                .map(|entry| {
                    let mut v = serde_json::to_value(&entry.vitals).unwrap_or_default();
                    v["ble_addr"] = json!(entry.ble_addr);
                    if let Some(t) = entry.scan_time {
                        v["scan_time"] = json!(t.timestamp());
                    }
                    v
                })
                .collect();
            let mut data = json!({
                "attribute": m.attribute,
                "value": { "device_list": device_list },
            });
            if let Some(mac) = &m.device_mac {
                data["mac"] = json!(mac);
            }
            let mut v = json!({
                "from": "BLE",
                "to": "CLOUD",
                "deviceCode": m.gateway_mac,
                "mac": m.gateway_mac,
                "type": "reportAttribute",
                "data": data,
            });
            if let Some(t) = m.envelope_time {
                v["time"] = json!(t.timestamp());
            }
            v
        }
        Decoded::WatchVitals(w) => {
            let mut v = json!({ "IMEI": w.imei });
            if let Some(hr) = w.heart_rate {
                v["heartRate"] = json!(hr);
            }
            if let Some(bp) = w.blood_pressure {
                v["bloodPressure"] = json!({ "bp_sys": bp.bp_sys, "bp_dia": bp.bp_dia });
            }
            if let Some(s) = w.spo2 {
                v["spO2"] = json!(s);
            }
            if let Some(t) = w.body_temperature {
                v["bodyTemperature"] = json!(t);
            }
            if let Some(b) = w.battery {
                v["battery"] = json!(b);
            }
            if let Some(s) = w.signal_gsm {
                v["signalGSM"] = json!(s);
            }
            if let Some(s) = w.steps {
                v["step"] = json!(s);
            }
            if let Some(ts) = w.measured_at {
                v["timeStamps"] = json!(bangkok_local_string(ts));
            }
            v
        }
        Decoded::WatchBatch(b) => {
            let data: Vec<serde_json::Value> = b
                .samples
                .iter()
                .map(|s| {
                    let mut v = json!({ "timestamp": s.measured_at.timestamp() });
                    if let Some(hr) = s.heart_rate {
                        v["heartRate"] = json!(hr);
                    }
                    if let Some(bp) = s.blood_pressure {
                        v["bloodPressure"] = json!({ "bp_sys": bp.bp_sys, "bp_dia": bp.bp_dia });
                    }
                    if let Some(sp) = s.spo2 {
                        v["spO2"] = json!(sp);
                    }
                    if let Some(t) = s.body_temperature {
                        v["bodyTemperature"] = json!(t);
                    }
                    v
                })
                .collect();
            json!({ "IMEI": b.imei, "num_datas": b.samples.len(), "data": data })
        }
        Decoded::WatchStatus(s) => {
            let mut v = json!({ "IMEI": s.imei });
            if let Some(b) = s.battery {
                v["battery"] = json!(b);
            }
            if let Some(g) = s.signal_gsm {
                v["signalGSM"] = json!(g);
            }
            if let Some(st) = s.steps {
                v["step"] = json!(st);
            }
            if let Some(t) = s.envelope_time {
                v["time"] = json!(t.timestamp());
            }
            v
        }
        Decoded::WatchLocation(l) => {
            let mut v = json!({ "IMEI": l.imei });
            if let Some(loc) = &l.location {
                v["location"] =
                    serde_json::to_value(RawLocationBlock::from_location(loc)).unwrap_or_default();
            }
            if let Some(t) = l.envelope_time {
                v["time"] = json!(t.timestamp());
            }
            v
        }
        Decoded::WatchSleep(s) => {
            let mut v = json!({ "IMEI": s.imei, "sleep": s.data });
            if let Some(t) = s.envelope_time {
                v["time"] = json!(t.timestamp());
            }
            v
        }
        Decoded::WatchEmergency(e) => {
            let mut v = json!({ "IMEI": e.imei });
            if let Some(loc) = &e.location {
                v["location"] =
                    serde_json::to_value(RawLocationBlock::from_location(loc)).unwrap_or_default();
            }
            if let Some(t) = e.envelope_time {
                v["time"] = json!(t.timestamp());
            }
            v
        }
        Decoded::WatchOnline(o) => json!({ "IMEI": o.imei }),
        Decoded::Kiosk(k) => {
            let mut value = serde_json::to_value(&k.vitals).unwrap_or_default();
            if let Some(t) = k.measured_at {
                value["scan_time"] = json!(t.timestamp());
            }
            json!({
                "type": "reportAttribute",
                "mac": k.kiosk_mac,
                "citizen_id": k.citizen_id,
                "attribute": k.attribute,
                "value": value,
            })
        }
    };
    serde_json::to_vec(&value).unwrap_or_default()
}

fn bangkok_local_string(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&chrono_tz::Asia::Bangkok)
        .format("%d/%m/%Y %H:%M:%S")
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// The representative gateway medical envelope from the wire contract.
    const GATEWAY_BP: &str = r#"{"from":"BLE","to":"CLOUD","time":1836942771,"deviceCode":"AA:BB:CC:DD:EE:FF","mac":"AA:BB:CC:DD:EE:FF","type":"reportAttribute","device":"WBP BIOLIGHT","data":{"attribute":"BP_BIOLIGTH","mac":"AA:BB:CC:DD:EE:FF","value":{"device_list":[{"scan_time":1836942771,"ble_addr":"d616f9641622","bp_high":137,"bp_low":95,"PR":74}]}}}"#;

    #[test]
    fn gateway_medical_decodes_the_contract_example() {
        let decoded = decode("dusun_pub", GATEWAY_BP.as_bytes()).unwrap();
        let Decoded::GatewayMedical(m) = decoded else {
            panic!("expected GatewayMedical");
        };
        assert_eq!(m.gateway_mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(m.attribute, "BP_BIOLIGTH");
        assert_eq!(m.device_list.len(), 1);
        let reading = &m.device_list[0];
        assert_eq!(reading.ble_addr, "d616f9641622");
        assert_eq!(reading.vitals.bp_high, Some(137));
        assert_eq!(reading.vitals.bp_low, Some(95));
        assert_eq!(reading.vitals.pr, Some(74));
        assert_eq!(
            reading.scan_time.unwrap().to_rfc3339(),
            "2028-03-14T06:32:51+00:00"
        );
    }

    #[test]
    fn gateway_medical_without_ble_addr_is_rejected() {
        let payload = r#"{"mac":"AA","data":{"attribute":"BP_BIOLIGTH","value":{"device_list":[{"bp_high":120}]}}}"#;
        let err = decode("dusun_pub", payload.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), "missing_field");
    }

    #[test]
    fn watch_vitals_decodes_local_timestamp() {
        let payload = r#"{"IMEI":"861265061482607","heartRate":75,"bloodPressure":{"bp_sys":120,"bp_dia":80},"spO2":98,"bodyTemperature":36.5,"battery":85,"signalGSM":4,"step":5000,"timeStamps":"13/07/2025 08:50:59"}"#;
        let decoded = decode("iMEDE_watch/VitalSign", payload.as_bytes()).unwrap();
        let Decoded::WatchVitals(w) = decoded else {
            panic!("expected WatchVitals");
        };
        assert_eq!(w.imei, "861265061482607");
        assert_eq!(w.heart_rate, Some(75));
        assert_eq!(
            w.blood_pressure,
            Some(WatchBp {
                bp_sys: 120,
                bp_dia: 80
            })
        );
        assert_eq!(
            w.measured_at.unwrap().to_rfc3339(),
            "2025-07-13T01:50:59+00:00"
        );
    }

    #[test]
    fn batch_count_mismatch_is_a_step2_rejection() {
        let payload = r#"{"IMEI":"861265061482607","num_datas":3,"data":[{"heartRate":70,"timestamp":1752371459},{"heartRate":72,"timestamp":1752371519}]}"#;
        let err = decode("iMEDE_watch/AP55", payload.as_bytes()).unwrap_err();
        match err {
            DecodeError::BatchCountMismatch { declared, actual } => {
                assert_eq!(declared, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected BatchCountMismatch, got {other:?}"),
        }
    }

    #[test]
    fn batch_preserves_sample_order() {
        let payload = r#"{"IMEI":"1","num_datas":3,"data":[{"heartRate":70,"timestamp":100000},{"heartRate":72,"timestamp":100060},{"heartRate":75,"timestamp":100120}]}"#;
        let Decoded::WatchBatch(b) = decode("iMEDE_watch/AP55", payload.as_bytes()).unwrap() else {
            panic!("expected WatchBatch");
        };
        let rates: Vec<_> = b.samples.iter().map(|s| s.heart_rate.unwrap()).collect();
        assert_eq!(rates, vec![70, 72, 75]);
        assert!(b.samples[0].measured_at < b.samples[2].measured_at);
    }

    #[test]
    fn sos_decodes_with_gps_preference() {
        let payload = r#"{"IMEI":"861265061482607","location":{"GPS":{"latitude":13.7563,"longitude":100.5018,"speed":0.1},"LBS":{"mcc":520,"mnc":3,"lac":1234,"cid":56789}},"time":1752371459}"#;
        let Decoded::WatchEmergency(e) = decode("iMEDE_watch/SOS", payload.as_bytes()).unwrap()
        else {
            panic!("expected WatchEmergency");
        };
        assert_eq!(e.kind, EmergencyKind::Panic);
        match e.location.unwrap() {
            Location::Gps { lat, lng, .. } => {
                assert_eq!(lat, 13.7563);
                assert_eq!(lng, 100.5018);
            }
            other => panic!("expected gps, got {other:?}"),
        }
    }

    #[test]
    fn fall_down_maps_to_fall_kind() {
        let payload = r#"{"IMEI":"861265061482607"}"#;
        let Decoded::WatchEmergency(e) =
            decode("iMEDE_watch/fallDown", payload.as_bytes()).unwrap()
        else {
            panic!("expected WatchEmergency");
        };
        assert_eq!(e.kind, EmergencyKind::Fall);
        assert!(e.location.is_none());
    }

    #[test]
    fn kiosk_decodes_glucose_report() {
        let payload = r#"{"type":"reportAttribute","mac":"CM:4B:LE:00:00:01","time":1752371459,"citizen_id":"C9","attribute":"CONTOUR","value":{"blood_glucose":142.0}}"#;
        let Decoded::Kiosk(k) = decode("CM4_BLE_GW_TX", payload.as_bytes()).unwrap() else {
            panic!("expected Kiosk");
        };
        assert_eq!(k.citizen_id, "C9");
        assert_eq!(k.attribute, "CONTOUR");
        assert_eq!(k.vitals.blood_glucose, Some(142.0));
        assert!(k.measured_at.is_some());
    }

    #[test]
    fn invalid_json_and_unknown_topic_are_distinct_kinds() {
        assert_eq!(
            decode("dusun_pub", b"{not json").unwrap_err().kind(),
            "json"
        );
        assert_eq!(
            decode("unrelated/topic", b"{}").unwrap_err().kind(),
            "unknown_topic"
        );
    }

    #[test]
    fn decode_encode_round_trips_on_the_closed_set() {
        let t = Utc.with_ymd_and_hms(2028, 3, 14, 6, 32, 51).unwrap();
        let variants = vec![
            Decoded::GatewayStatus(GatewayStatus {
                gateway_mac: "AA:BB".to_owned(),
                envelope_time: Some(t),
            }),
            Decoded::GatewayMedical(GatewayMedical {
                gateway_mac: "AA:BB".to_owned(),
                attribute: "Oximeter JUMPER".to_owned(),
                device_mac: Some("AA:BB".to_owned()),
                envelope_time: Some(t),
                device_list: vec![SubDeviceReading {
                    ble_addr: "d616f9641622".to_owned(),
                    scan_time: Some(t),
                    vitals: VitalsFields {
                        spo2: Some(98),
                        pulse: Some(72),
                        pi: Some(4.0),
                        ..VitalsFields::default()
                    },
                }],
            }),
            Decoded::WatchVitals(WatchVitals {
                imei: "861265061482607".to_owned(),
                heart_rate: Some(75),
                blood_pressure: Some(WatchBp {
                    bp_sys: 120,
                    bp_dia: 80,
                }),
                spo2: Some(98),
                body_temperature: Some(36.5),
                battery: Some(85),
                signal_gsm: Some(4),
                steps: Some(5000),
                measured_at: Some(t),
            }),
            Decoded::WatchBatch(WatchBatch {
                imei: "861265061482607".to_owned(),
                samples: vec![WatchBatchSample {
                    heart_rate: Some(70),
                    blood_pressure: None,
                    spo2: Some(97),
                    body_temperature: None,
                    measured_at: t,
                }],
            }),
            Decoded::WatchStatus(WatchStatus {
                imei: "861265061482607".to_owned(),
                battery: Some(60),
                signal_gsm: Some(3),
                steps: Some(1200),
                envelope_time: Some(t),
            }),
            Decoded::WatchLocation(WatchLocation {
                imei: "861265061482607".to_owned(),
                location: Some(Location::CellTriangulation {
                    mcc: 520,
                    mnc: 3,
                    lac: 1,
                    cid: 2,
                }),
                envelope_time: None,
            }),
            Decoded::WatchSleep(WatchSleep {
                imei: "861265061482607".to_owned(),
                data: serde_json::json!({"stages": [1, 2, 3]})
                    .as_object()
                    .cloned()
                    .unwrap(),
                envelope_time: Some(t),
            }),
            Decoded::WatchEmergency(WatchEmergency {
                imei: "861265061482607".to_owned(),
                kind: EmergencyKind::Fall,
                location: Some(Location::Gps {
                    lat: 13.75,
                    lng: 100.5,
                    speed: None,
                    heading: Some(90.0),
                }),
                envelope_time: Some(t),
            }),
            Decoded::WatchOnline(WatchOnline {
                imei: "861265061482607".to_owned(),
            }),
            Decoded::Kiosk(KioskObservation {
                kiosk_mac: "CM:4B".to_owned(),
                citizen_id: "C9".to_owned(),
                attribute: "CONTOUR".to_owned(),
                vitals: VitalsFields {
                    blood_glucose: Some(142.0),
                    ..VitalsFields::default()
                },
                measured_at: Some(t),
            }),
        ];
        for expected in variants {
            let bytes = encode(&expected);
            let round = decode(expected.topic(), &bytes).unwrap();
            assert_eq!(round, expected, "round trip for {:?}", expected.topic());
        }
    }
}
