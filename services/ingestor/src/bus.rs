//! MQTT bus adapter.
//!
//! Maintains one long-lived broker session subscribed to the closed
//! topic set and routes publishes into bounded per-family channels
//! (backpressure: a full pipeline slows the bus read, not the broker).
//!
//! Reconnect: 1 s doubling to a 30 s cap, with up to 50% jitter.
//! Keepalive 60 s.  Subscriptions are re-issued on every ConnAck.

use crate::config::{BusConfig, BusQos};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use vf_model::DeviceFamily;
use vf_protocol::topics;

/// One raw bus message handed to a pipeline.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes messages to the per-family pipeline channels.
pub struct BusRouter {
    senders: HashMap<DeviceFamily, mpsc::Sender<BusMessage>>,
}

impl BusRouter {
    pub fn new(
        gateway: mpsc::Sender<BusMessage>,
        watch: mpsc::Sender<BusMessage>,
        kiosk: mpsc::Sender<BusMessage>,
    ) -> BusRouter {
        let mut senders = HashMap::new();
        senders.insert(DeviceFamily::GatewayBox, gateway);
        senders.insert(DeviceFamily::Watch, watch);
        senders.insert(DeviceFamily::HospitalKiosk, kiosk);
        BusRouter { senders }
    }

    /// Deliver to the owning pipeline; awaits when the channel is full.
    /// Unknown topics are dropped.
    pub async fn route(&self, message: BusMessage) {
        let Some(family) = topics::family_for_topic(&message.topic) else {
            debug!(topic = %message.topic, "dropping message on unmapped topic");
            return;
        };
        if let Some(tx) = self.senders.get(&family) {
            // A closed channel means that pipeline has shut down.
            let _ = tx.send(message).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Broker session
// ---------------------------------------------------------------------------

const KEEPALIVE: Duration = Duration::from_secs(60);
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

fn qos_of(qos: BusQos) -> QoS {
    match qos {
        BusQos::AtMostOnce => QoS::AtMostOnce,
        BusQos::AtLeastOnce => QoS::AtLeastOnce,
        BusQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Parse `mqtt://host:port`, `host:port`, or bare `host` (port 1883).
pub fn parse_endpoint(endpoint: &str) -> (String, u16) {
    let stripped = endpoint
        .strip_prefix("mqtt://")
        .or_else(|| endpoint.strip_prefix("tcp://"))
        .unwrap_or(endpoint);
    match stripped.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_owned(), port),
            Err(_) => (stripped.to_owned(), 1883),
        },
        None => (stripped.to_owned(), 1883),
    }
}

/// Next reconnect delay: doubled up to the cap, plus up to 50% jitter.
pub fn next_backoff(current: Duration) -> (Duration, Duration) {
    let jitter = current.mul_f64(rand::random::<f64>() * 0.5);
    let next = (current * 2).min(BACKOFF_CAP);
    (current + jitter, next)
}

/// Run the broker session until shutdown.  Never returns on broker
/// errors; they are logged and retried with backoff.
pub async fn run(cfg: BusConfig, router: BusRouter, mut shutdown: watch::Receiver<bool>) {
    let (host, port) = parse_endpoint(&cfg.endpoint);
    let mut options = MqttOptions::new(cfg.client_id.clone(), host, port);
    options.set_keep_alive(KEEPALIVE);
    if let (Some(username), Some(password)) = (cfg.username.clone(), cfg.password.clone()) {
        options.set_credentials(username, password);
    }
    let (client, mut eventloop) = AsyncClient::new(options, 64);
    let qos = qos_of(cfg.qos);

    let mut backoff = BACKOFF_START;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("bus adapter stopping");
                let _ = client.disconnect().await;
                return;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(endpoint = %cfg.endpoint, "broker connected; subscribing");
                    backoff = BACKOFF_START;
                    subscribe_all(&client, qos).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    router
                        .route(BusMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                            received_at: Utc::now(),
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    let (delay, next) = next_backoff(backoff);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "broker error; reconnecting");
                    backoff = next;
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

async fn subscribe_all(client: &AsyncClient, qos: QoS) {
    let all = topics::GATEWAY_TOPICS
        .iter()
        .chain(topics::WATCH_TOPICS.iter())
        .chain(topics::KIOSK_TOPICS.iter());
    for topic in all {
        if let Err(e) = client.subscribe(*topic, qos).await {
            warn!(topic, error = %e, "subscribe failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_forms_parse() {
        assert_eq!(
            parse_endpoint("mqtt://broker.local:1883"),
            ("broker.local".to_owned(), 1883)
        );
        assert_eq!(parse_endpoint("10.0.0.5:2883"), ("10.0.0.5".to_owned(), 2883));
        assert_eq!(parse_endpoint("broker"), ("broker".to_owned(), 1883));
    }

    #[test]
    fn backoff_doubles_to_the_cap_with_bounded_jitter() {
        let mut current = BACKOFF_START;
        for _ in 0..10 {
            let (delay, next) = next_backoff(current);
            assert!(delay >= current);
            assert!(delay <= current + current.mul_f64(0.5));
            current = next;
        }
        assert_eq!(current, BACKOFF_CAP);
    }

    #[tokio::test]
    async fn router_routes_by_family_and_drops_unknown_topics() {
        let (gw_tx, mut gw_rx) = mpsc::channel(8);
        let (watch_tx, mut watch_rx) = mpsc::channel(8);
        let (kiosk_tx, mut kiosk_rx) = mpsc::channel(8);
        let router = BusRouter::new(gw_tx, watch_tx, kiosk_tx);

        let message = |topic: &str| BusMessage {
            topic: topic.to_owned(),
            payload: b"{}".to_vec(),
            received_at: Utc::now(),
        };

        router.route(message("dusun_pub")).await;
        router.route(message("iMEDE_watch/VitalSign")).await;
        router.route(message("CM4_BLE_GW_TX")).await;
        router.route(message("not/a/device/topic")).await;

        assert_eq!(gw_rx.recv().await.unwrap().topic, "dusun_pub");
        assert_eq!(
            watch_rx.recv().await.unwrap().topic,
            "iMEDE_watch/VitalSign"
        );
        assert_eq!(kiosk_rx.recv().await.unwrap().topic, "CM4_BLE_GW_TX");
        assert!(gw_rx.try_recv().is_err());
        assert!(watch_rx.try_recv().is_err());
        assert!(kiosk_rx.try_recv().is_err());
    }
}
