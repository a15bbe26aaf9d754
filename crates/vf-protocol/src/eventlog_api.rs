//! Event-log HTTP API types (frozen schema definitions).
//!
//! `POST /api/event-log` ingests one flow event; `GET /api/event-log`
//! serves paginated, filtered queries; `GET /api/event-log/stats`
//! serves trailing-24-hour aggregates.

use serde::{Deserialize, Serialize};
use vf_model::{EventLogRecord, FlowEvent};

/// Ingest body: the flow event plus the emitting source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogIngest {
    pub source: String,
    #[serde(flatten)]
    pub event: FlowEvent,
}

/// Pagination envelope on query responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

/// Response body for `GET /api/event-log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogPage {
    pub events: Vec<EventLogRecord>,
    pub pagination: Pagination,
}

/// One aggregate bucket; `_id` matches the grouping value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBucket {
    #[serde(rename = "_id")]
    pub id: String,
    pub count: u64,
}

/// Response body for `GET /api/event-log/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogStats {
    pub total_24h: u64,
    pub sources: Vec<StatBucket>,
    pub statuses: Vec<StatBucket>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_model::{DeviceFamily, FlowStep};

    #[test]
    fn ingest_body_flattens_the_event() {
        let body = EventLogIngest {
            source: "gateway_pipeline".to_owned(),
            event: FlowEvent::success(FlowStep::Persisted, DeviceFamily::GatewayBox, "dusun_pub"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["source"], "gateway_pipeline");
        assert_eq!(json["step"], "5_persisted");
        let back: EventLogIngest = serde_json::from_value(json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn stat_bucket_uses_mongo_style_id() {
        let bucket = StatBucket {
            id: "watch_pipeline".to_owned(),
            count: 12,
        };
        let json = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["_id"], "watch_pipeline");
    }
}
