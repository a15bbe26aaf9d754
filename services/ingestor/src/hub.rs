//! Fanout hub: connection registry, rooms, and broadcasts.
//!
//! One coarse lock guards the registry; broadcasts snapshot the
//! membership under the lock and enqueue outside it.  Each connection
//! has a bounded outbound buffer (drop-oldest on overflow, connection
//! marked degraded but kept open); the WebSocket writer task drains it.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;
use vf_model::{DeviceFamily, EmergencyEvent, FlowEvent, FlowStatus, Observation};
use vf_protocol::{FanoutStats, Room, ServerMessage, StatCount};

/// Flow events retained for `initial_data`.
const RECENT_EVENTS: usize = 50;
/// Aggregation window for `initial_data` statistics.
const STATS_WINDOW: i64 = 3600;

pub type ConnId = u64;

// ---------------------------------------------------------------------------
// Per-connection outbound queue
// ---------------------------------------------------------------------------

struct QueueState {
    buf: VecDeque<ServerMessage>,
    closed: bool,
}

/// Bounded outbound buffer with a drop-oldest overflow policy.
pub struct ConnQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    degraded: AtomicBool,
}

impl ConnQueue {
    fn new(capacity: usize) -> ConnQueue {
        ConnQueue {
            state: Mutex::new(QueueState {
                buf: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            degraded: AtomicBool::new(false),
        }
    }

    /// Enqueue a message.  On overflow the oldest message is dropped
    /// and the connection is marked degraded, never disconnected.
    pub fn push(&self, message: ServerMessage) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            if state.buf.len() >= self.capacity {
                state.buf.pop_front();
                self.degraded.store(true, Ordering::Relaxed);
                debug!("fanout backlog full; dropped oldest message");
            }
            state.buf.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Await the next message; `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(message) = state.buf.pop_front() {
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.notify.notify_one();
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

struct HubState {
    next_conn_id: ConnId,
    connections: HashMap<ConnId, Arc<ConnQueue>>,
    rooms: HashMap<String, HashSet<ConnId>>,
    recent_events: VecDeque<FlowEvent>,
    flow_window: VecDeque<(DateTime<Utc>, DeviceFamily, FlowStatus)>,
}

pub struct FanoutHub {
    state: Mutex<HubState>,
    outbound_buffer: usize,
}

impl FanoutHub {
    pub fn new(outbound_buffer: usize) -> FanoutHub {
        FanoutHub {
            state: Mutex::new(HubState {
                next_conn_id: 1,
                connections: HashMap::new(),
                rooms: HashMap::new(),
                recent_events: VecDeque::new(),
                flow_window: VecDeque::new(),
            }),
            outbound_buffer,
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    pub fn register(&self) -> (ConnId, Arc<ConnQueue>) {
        let queue = Arc::new(ConnQueue::new(self.outbound_buffer));
        let mut state = self.state.lock().unwrap();
        let conn_id = state.next_conn_id;
        state.next_conn_id += 1;
        state.connections.insert(conn_id, queue.clone());
        (conn_id, queue)
    }

    pub fn unregister(&self, conn_id: ConnId) {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.connections.remove(&conn_id) {
            queue.close();
        }
        for members in state.rooms.values_mut() {
            members.remove(&conn_id);
        }
        state.rooms.retain(|_, members| !members.is_empty());
    }

    /// Subscribe a connection; rejects room names outside the grammar.
    pub fn subscribe(&self, conn_id: ConnId, room: &str) -> bool {
        let Some(parsed) = Room::parse(room) else {
            return false;
        };
        let mut state = self.state.lock().unwrap();
        if !state.connections.contains_key(&conn_id) {
            return false;
        }
        state
            .rooms
            .entry(parsed.name())
            .or_default()
            .insert(conn_id);
        true
    }

    pub fn unsubscribe(&self, conn_id: ConnId, room: &str) -> bool {
        let Some(parsed) = Room::parse(room) else {
            return false;
        };
        let mut state = self.state.lock().unwrap();
        match state.rooms.get_mut(&parsed.name()) {
            Some(members) => {
                let removed = members.remove(&conn_id);
                if members.is_empty() {
                    state.rooms.remove(&parsed.name());
                }
                removed
            }
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Close every connection queue (graceful shutdown).
    pub fn close_all(&self) {
        let state = self.state.lock().unwrap();
        for queue in state.connections.values() {
            queue.close();
        }
    }

    // -----------------------------------------------------------------------
    // Broadcasts
    // -----------------------------------------------------------------------

    /// Flow events go to every connection and feed the initial-data
    /// ring buffer and the rolling stats window.
    pub fn broadcast_flow(&self, event: &FlowEvent) {
        let targets: Vec<Arc<ConnQueue>> = {
            let mut state = self.state.lock().unwrap();
            state.recent_events.push_back(event.clone());
            while state.recent_events.len() > RECENT_EVENTS {
                state.recent_events.pop_front();
            }
            state
                .flow_window
                .push_back((event.timestamp, event.device_family, event.status));
            let cutoff = Utc::now() - Duration::seconds(STATS_WINDOW);
            while state
                .flow_window
                .front()
                .is_some_and(|(ts, _, _)| *ts < cutoff)
            {
                state.flow_window.pop_front();
            }
            state.connections.values().cloned().collect()
        };
        for queue in targets {
            queue.push(ServerMessage::FlowEvent {
                event: event.clone(),
            });
        }
    }

    /// Observations go to the patient rooms and the hospital room.
    pub fn broadcast_observation(&self, observation: &Observation) {
        let mut rooms = vec![
            format!("patient:{}", observation.patient_id),
            format!("patient:{}:vitals", observation.patient_id),
        ];
        if let Some(hospital_id) = &observation.hospital_id {
            rooms.push(format!("hospital:{hospital_id}"));
        }
        self.push_to_rooms(
            &rooms,
            ServerMessage::VitalsUpdate {
                observation: observation.clone(),
            },
        );
    }

    /// Emergencies alert the patient rooms, the hospital alert room,
    /// and always `system:alerts`.
    pub fn broadcast_emergency(&self, emergency: &EmergencyEvent, hospital_id: Option<&str>) {
        if let Some(patient_id) = &emergency.patient_id {
            self.push_to_rooms(
                &[
                    format!("patient:{patient_id}"),
                    format!("patient:{patient_id}:alerts"),
                ],
                ServerMessage::PatientAlert {
                    emergency: emergency.clone(),
                },
            );
        }
        let mut rooms = vec!["system:alerts".to_owned()];
        if let Some(hospital_id) = hospital_id {
            rooms.push(format!("hospital:{hospital_id}:alerts"));
        }
        self.push_to_rooms(
            &rooms,
            ServerMessage::EmergencyAlert {
                emergency: emergency.clone(),
            },
        );
    }

    fn push_to_rooms(&self, rooms: &[String], message: ServerMessage) {
        let targets: Vec<Arc<ConnQueue>> = {
            let state = self.state.lock().unwrap();
            let mut seen = HashSet::new();
            let mut targets = Vec::new();
            for room in rooms {
                if let Some(members) = state.rooms.get(room) {
                    for conn_id in members {
                        if seen.insert(*conn_id) {
                            if let Some(queue) = state.connections.get(conn_id) {
                                targets.push(queue.clone());
                            }
                        }
                    }
                }
            }
            targets
        };
        for queue in targets {
            queue.push(message.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Initial data
    // -----------------------------------------------------------------------

    pub fn recent_events(&self) -> Vec<FlowEvent> {
        self.state
            .lock()
            .unwrap()
            .recent_events
            .iter()
            .cloned()
            .collect()
    }

    /// Per-family and per-status counts over the trailing hour.
    pub fn stats(&self, now: DateTime<Utc>) -> FanoutStats {
        let state = self.state.lock().unwrap();
        let cutoff = now - Duration::seconds(STATS_WINDOW);
        let mut by_family: HashMap<&'static str, u64> = HashMap::new();
        let mut by_status: HashMap<&'static str, u64> = HashMap::new();
        for (ts, family, status) in &state.flow_window {
            if *ts < cutoff {
                continue;
            }
            *by_family.entry(family.as_str()).or_default() += 1;
            let status_key = match status {
                FlowStatus::Success => "success",
                FlowStatus::Error => "error",
                FlowStatus::Info => "info",
            };
            *by_status.entry(status_key).or_default() += 1;
        }
        let collect = |map: HashMap<&'static str, u64>| {
            let mut counts: Vec<StatCount> = map
                .into_iter()
                .map(|(key, count)| StatCount {
                    key: key.to_owned(),
                    count,
                })
                .collect();
            counts.sort_by(|a, b| a.key.cmp(&b.key));
            counts
        };
        FanoutStats {
            window_secs: STATS_WINDOW as u64,
            by_family: collect(by_family),
            by_status: collect(by_status),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vf_model::{EmergencyKind, FlowStep};

    fn flow_event() -> FlowEvent {
        FlowEvent::success(FlowStep::Received, DeviceFamily::Watch, "iMEDE_watch/hb")
    }

    #[test]
    fn flow_events_reach_every_connection() {
        let hub = FanoutHub::new(256);
        let (_id_a, queue_a) = hub.register();
        let (_id_b, queue_b) = hub.register();

        hub.broadcast_flow(&flow_event());
        assert_eq!(queue_a.len(), 1);
        assert_eq!(queue_b.len(), 1);
    }

    #[test]
    fn observations_only_reach_subscribed_rooms() {
        let hub = FanoutHub::new(256);
        let (vitals_conn, vitals_queue) = hub.register();
        let (other_conn, other_queue) = hub.register();
        assert!(hub.subscribe(vitals_conn, "patient:P1:vitals"));
        assert!(hub.subscribe(other_conn, "patient:P2:vitals"));

        let obs = Observation::new(
            "P1",
            DeviceFamily::Watch,
            "861265061482607",
            Utc::now(),
            vf_model::ObservationValues::HeartRate { bpm: 75 },
            Some("H1".to_owned()),
            "fp",
        );
        hub.broadcast_observation(&obs);
        assert_eq!(vitals_queue.len(), 1);
        assert!(other_queue.is_empty());
    }

    #[test]
    fn duplicate_room_membership_delivers_once() {
        let hub = FanoutHub::new(256);
        let (conn, queue) = hub.register();
        assert!(hub.subscribe(conn, "patient:P1"));
        assert!(hub.subscribe(conn, "patient:P1:vitals"));

        let obs = Observation::new(
            "P1",
            DeviceFamily::Watch,
            "861265061482607",
            Utc::now(),
            vf_model::ObservationValues::HeartRate { bpm: 75 },
            None,
            "fp",
        );
        hub.broadcast_observation(&obs);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn emergencies_always_reach_system_alerts() {
        let hub = FanoutHub::new(256);
        let (conn, queue) = hub.register();
        assert!(hub.subscribe(conn, "system:alerts"));

        let event = EmergencyEvent::new(
            Some("P3".to_owned()),
            "861265061482607",
            EmergencyKind::Panic,
            None,
            Utc::now(),
            serde_json::Value::Null,
        );
        hub.broadcast_emergency(&event, Some("H1"));
        assert_eq!(queue.len(), 1);
        match queue.state.lock().unwrap().buf.front().unwrap() {
            ServerMessage::EmergencyAlert { emergency } => {
                assert_eq!(emergency.kind, EmergencyKind::Panic);
            }
            other => panic!("expected emergency_alert, got {other:?}"),
        };
    }

    #[test]
    fn overflow_drops_oldest_and_degrades_without_disconnecting() {
        let hub = FanoutHub::new(3);
        let (_conn, queue) = hub.register();

        for _ in 0..5 {
            hub.broadcast_flow(&flow_event());
        }
        assert_eq!(queue.len(), 3);
        assert!(queue.is_degraded());
        // Still registered and still receiving.
        assert_eq!(hub.connection_count(), 1);
        hub.broadcast_flow(&flow_event());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn invalid_rooms_are_rejected() {
        let hub = FanoutHub::new(256);
        let (conn, _queue) = hub.register();
        assert!(!hub.subscribe(conn, "spaceship:42"));
        assert!(!hub.unsubscribe(conn, "patient:P1"));
    }

    #[test]
    fn unregister_clears_room_membership() {
        let hub = FanoutHub::new(256);
        let (conn, queue) = hub.register();
        assert!(hub.subscribe(conn, "system:alerts"));
        hub.unregister(conn);
        assert_eq!(hub.connection_count(), 0);

        let event = EmergencyEvent::new(
            None,
            "dev",
            EmergencyKind::Fall,
            None,
            Utc::now(),
            serde_json::Value::Null,
        );
        hub.broadcast_emergency(&event, None);
        // Queue is closed; nothing is delivered.
        assert!(queue.is_empty());
    }

    #[test]
    fn recent_events_ring_buffer_caps_at_fifty() {
        let hub = FanoutHub::new(256);
        for _ in 0..75 {
            hub.broadcast_flow(&flow_event());
        }
        assert_eq!(hub.recent_events().len(), 50);
        let stats = hub.stats(Utc::now());
        assert_eq!(stats.by_family[0].key, "watch");
        assert_eq!(stats.by_family[0].count, 75);
    }

    #[tokio::test]
    async fn pop_returns_none_after_close_and_drain() {
        let hub = FanoutHub::new(256);
        let (_conn, queue) = hub.register();
        queue.push(ServerMessage::Pong);
        queue.close();
        assert!(matches!(queue.pop().await, Some(ServerMessage::Pong)));
        assert!(queue.pop().await.is_none());
    }
}
