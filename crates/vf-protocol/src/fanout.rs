//! Fanout WebSocket frame types and the room grammar.
//!
//! JSON text frames, discriminated by a top-level `type` field.
//! Inbound frames above `MAX_FRAME_BYTES` are rejected with close code
//! 1009; shutdown closes with 1001.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vf_model::{DeviceFamily, EmergencyEvent, FlowEvent, Observation};

/// Largest accepted inbound text frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Close code for oversized frames.
pub const CLOSE_TOO_BIG: u16 = 1009;
/// Close code sent on graceful shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { room: String },
    Unsubscribe { room: String },
    Ping,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// One bucket in an aggregate count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCount {
    pub key: String,
    pub count: u64,
}

/// Aggregate flow statistics over the trailing hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutStats {
    pub window_secs: u64,
    pub by_family: Vec<StatCount>,
    pub by_status: Vec<StatCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after a successful connect.
    InitialData {
        recent_flow_events: Vec<FlowEvent>,
        stats: FanoutStats,
        active_emergencies: Vec<EmergencyEvent>,
        server_time: DateTime<Utc>,
    },
    FlowEvent {
        event: FlowEvent,
    },
    VitalsUpdate {
        observation: Observation,
    },
    PatientAlert {
        emergency: EmergencyEvent,
    },
    EmergencyAlert {
        emergency: EmergencyEvent,
    },
    Subscription {
        room: String,
        subscribed: bool,
    },
    Pong,
}

// ---------------------------------------------------------------------------
// Room grammar
// ---------------------------------------------------------------------------

/// Closed room grammar.  Subscribe requests with any other shape are
/// rejected with `subscribed: false`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Patient(String),
    PatientVitals(String),
    PatientAlerts(String),
    Hospital(String),
    HospitalAlerts(String),
    HospitalDevices(String),
    Device { family: DeviceFamily, id: String },
    SystemAlerts,
    AdminUpdates,
}

impl Room {
    pub fn parse(name: &str) -> Option<Room> {
        match name {
            "system:alerts" => return Some(Room::SystemAlerts),
            "admin:updates" => return Some(Room::AdminUpdates),
            _ => {}
        }
        let mut parts = name.splitn(3, ':');
        let scope = parts.next()?;
        let id = parts.next()?;
        if id.is_empty() {
            return None;
        }
        let qualifier = parts.next();
        match (scope, qualifier) {
            ("patient", None) => Some(Room::Patient(id.to_owned())),
            ("patient", Some("vitals")) => Some(Room::PatientVitals(id.to_owned())),
            ("patient", Some("alerts")) => Some(Room::PatientAlerts(id.to_owned())),
            ("hospital", None) => Some(Room::Hospital(id.to_owned())),
            ("hospital", Some("alerts")) => Some(Room::HospitalAlerts(id.to_owned())),
            ("hospital", Some("devices")) => Some(Room::HospitalDevices(id.to_owned())),
            ("device", Some(device_id)) if !device_id.is_empty() => {
                let family = match id {
                    "gateway_box" => DeviceFamily::GatewayBox,
                    "watch" => DeviceFamily::Watch,
                    "hospital_kiosk" => DeviceFamily::HospitalKiosk,
                    _ => return None,
                };
                Some(Room::Device {
                    family,
                    id: device_id.to_owned(),
                })
            }
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Room::Patient(id) => format!("patient:{id}"),
            Room::PatientVitals(id) => format!("patient:{id}:vitals"),
            Room::PatientAlerts(id) => format!("patient:{id}:alerts"),
            Room::Hospital(id) => format!("hospital:{id}"),
            Room::HospitalAlerts(id) => format!("hospital:{id}:alerts"),
            Room::HospitalDevices(id) => format!("hospital:{id}:devices"),
            Room::Device { family, id } => format!("device:{}:{id}", family.as_str()),
            Room::SystemAlerts => "system:alerts".to_owned(),
            Room::AdminUpdates => "admin:updates".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_model::FlowStep;

    #[test]
    fn client_messages_parse_by_type_tag() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","room":"patient:P1:vitals"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                room: "patient:P1:vitals".to_owned()
            }
        );
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn server_messages_carry_type_tags() {
        let event = FlowEvent::success(FlowStep::Received, DeviceFamily::Watch, "iMEDE_watch/hb");
        let json = serde_json::to_value(ServerMessage::FlowEvent { event }).unwrap();
        assert_eq!(json["type"], "flow_event");
        assert_eq!(json["event"]["status"], "success");

        let json = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(json["type"], "pong");
    }

    #[test]
    fn room_grammar_round_trips() {
        let rooms = [
            "patient:P1",
            "patient:P1:vitals",
            "patient:P1:alerts",
            "hospital:H9",
            "hospital:H9:alerts",
            "hospital:H9:devices",
            "device:watch:861265061482607",
            "system:alerts",
            "admin:updates",
        ];
        for name in rooms {
            let room = Room::parse(name).unwrap_or_else(|| panic!("should parse: {name}"));
            assert_eq!(room.name(), name);
        }
    }

    #[test]
    fn malformed_rooms_are_rejected() {
        for name in [
            "patient:",
            "patient:P1:unknown",
            "device:spaceship:x",
            "device:watch:",
            "hospitals:H9",
            "",
        ] {
            assert!(Room::parse(name).is_none(), "should reject: {name}");
        }
    }
}
