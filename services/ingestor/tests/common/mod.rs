//! Shared harness for pipeline integration tests.
//!
//! Runs the real pipelines over the in-memory store with a scripted
//! bus (direct sends into the per-family channels).  Flow events are
//! observed through a tapped fanout connection, exactly as a dashboard
//! would see them.

#![allow(dead_code)]

use ingestor::bus::{BusMessage, BusRouter};
use ingestor::config::{load_config_from_str, IngestorConfig};
use ingestor::hub::ConnQueue;
use ingestor::pipeline;
use ingestor::state::AppState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vf_model::{DeviceFamily, FlowEvent};
use vf_protocol::ServerMessage;
use vf_test_utils::MemStore;

const TEST_CONFIG: &str = r#"
    schema_version = 1
    default_hospital_id = "H-DEFAULT"

    [bus]
    endpoint = "mqtt://unused:1883"

    [store]
    uri = "mongodb://unused"
"#;

pub struct Harness {
    pub store: Arc<MemStore>,
    pub state: AppState,
    router: BusRouter,
    shutdown: watch::Sender<bool>,
    pipelines: Vec<JoinHandle<()>>,
}

impl Harness {
    pub fn config() -> IngestorConfig {
        load_config_from_str(TEST_CONFIG).expect("test config parses")
    }

    pub async fn start() -> Harness {
        Harness::start_with(Harness::config()).await
    }

    pub async fn start_with(config: IngestorConfig) -> Harness {
        let store = Arc::new(MemStore::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = AppState::new(
            Arc::new(config),
            store.clone(),
            store.clone(),
            store.clone(),
            shutdown_rx,
        );

        let (gateway_tx, gateway_rx) = mpsc::channel(16);
        let (watch_tx, watch_rx) = mpsc::channel(16);
        let (kiosk_tx, kiosk_rx) = mpsc::channel(16);
        let router = BusRouter::new(gateway_tx, watch_tx, kiosk_tx);
        let pipelines = vec![
            tokio::spawn(pipeline::run(
                state.clone(),
                DeviceFamily::GatewayBox,
                gateway_rx,
            )),
            tokio::spawn(pipeline::run(state.clone(), DeviceFamily::Watch, watch_rx)),
            tokio::spawn(pipeline::run(
                state.clone(),
                DeviceFamily::HospitalKiosk,
                kiosk_rx,
            )),
        ];

        Harness {
            store,
            state,
            router,
            shutdown,
            pipelines,
        }
    }

    /// Inject one raw bus message, as the broker session would.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) {
        self.router
            .route(BusMessage {
                topic: topic.to_owned(),
                payload,
                received_at: Utc::now(),
            })
            .await;
    }

    /// Attach a fanout tap that receives every broadcast; the
    /// connection id can be used to subscribe the tap to rooms.
    pub fn tap(&self) -> (u64, Arc<ConnQueue>) {
        self.state.hub.register()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.pipelines {
            let _ = handle.await;
        }
    }
}

/// Poll until `predicate` holds or the timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Drain whatever is currently queued on a tap, keeping only flow
/// events.
pub async fn drain_flow_events(queue: &Arc<ConnQueue>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(50), queue.pop()).await
    {
        if let ServerMessage::FlowEvent { event } = message {
            events.push(event);
        }
    }
    events
}

/// Drain every queued message of any kind.
pub async fn drain_messages(queue: &Arc<ConnQueue>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(50), queue.pop()).await
    {
        messages.push(message);
    }
    messages
}
