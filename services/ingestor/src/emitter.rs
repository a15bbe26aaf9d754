//! Flow-event emitter.
//!
//! Every emitted event is broadcast to the fanout hub immediately and
//! queued for delivery to the event-log ingestion endpoint.  The queue
//! is bounded (drop-oldest, drops counted); delivery uses a 5 s POST
//! timeout and never propagates failure into the pipelines.

use crate::hub::FanoutHub;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};
use vf_model::FlowEvent;
use vf_protocol::EventLogIngest;

const POST_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for draining the queue on shutdown.
pub const FLUSH_BUDGET: Duration = Duration::from_secs(2);

struct QueueState {
    buf: VecDeque<EventLogIngest>,
    closed: bool,
}

struct EmitterShared {
    queue: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    hub: Arc<FanoutHub>,
}

/// Cloneable emitter handle used by the pipelines.
#[derive(Clone)]
pub struct FlowEmitter {
    shared: Arc<EmitterShared>,
}

impl FlowEmitter {
    pub fn new(hub: Arc<FanoutHub>, queue_capacity: usize) -> FlowEmitter {
        FlowEmitter {
            shared: Arc::new(EmitterShared {
                queue: Mutex::new(QueueState {
                    buf: VecDeque::new(),
                    closed: false,
                }),
                notify: Notify::new(),
                capacity: queue_capacity,
                dropped: AtomicU64::new(0),
                hub,
            }),
        }
    }

    /// Emit one flow event: fan out now, queue for the event log.
    /// Never blocks and never fails.
    pub fn emit(&self, source: &str, event: FlowEvent) {
        self.shared.hub.broadcast_flow(&event);
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.closed {
                return;
            }
            if queue.buf.len() >= self.shared.capacity {
                queue.buf.pop_front();
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "emitter queue full; dropped oldest event");
            }
            queue.buf.push_back(EventLogIngest {
                source: source.to_owned(),
                event,
            });
        }
        self.shared.notify.notify_one();
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue.lock().unwrap().buf.len()
    }

    /// Stop accepting events and wake the delivery task so it can
    /// drain within the flush budget.
    pub fn close(&self) {
        self.shared.queue.lock().unwrap().closed = true;
        self.shared.notify.notify_one();
    }

    fn pop(&self) -> Option<EventLogIngest> {
        self.shared.queue.lock().unwrap().buf.pop_front()
    }

    fn is_closed(&self) -> bool {
        self.shared.queue.lock().unwrap().closed
    }

    /// Run the delivery loop: POST each queued event to the event-log
    /// ingestion endpoint.  Delivery failures are logged and the event
    /// is dropped; persistence never depends on this path.
    pub async fn run_delivery(self, ingest_url: String) {
        let client = match reqwest::Client::builder().timeout(POST_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "emitter HTTP client unavailable; event-log delivery disabled");
                return;
            }
        };
        loop {
            while let Some(ingest) = self.pop() {
                match client.post(&ingest_url).json(&ingest).send().await {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        debug!(status = %response.status(), "event-log ingest rejected event");
                    }
                    Err(e) => {
                        debug!(error = %e, "event-log ingest unreachable; event dropped");
                    }
                }
            }
            if self.is_closed() {
                return;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Drain what remains within the shutdown budget.
    pub async fn flush(&self, budget: Duration) {
        self.close();
        let deadline = tokio::time::Instant::now() + budget;
        while self.queue_depth() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vf_model::{DeviceFamily, FlowStep};

    fn event() -> FlowEvent {
        FlowEvent::success(FlowStep::Received, DeviceFamily::Watch, "iMEDE_watch/hb")
    }

    #[test]
    fn emit_broadcasts_and_queues() {
        let hub = Arc::new(FanoutHub::new(256));
        let (_conn, queue) = hub.register();
        let emitter = FlowEmitter::new(hub, 1024);

        emitter.emit("watch_pipeline", event());
        assert_eq!(queue.len(), 1, "hub broadcast happens immediately");
        assert_eq!(emitter.queue_depth(), 1);
        assert_eq!(emitter.dropped(), 0);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let hub = Arc::new(FanoutHub::new(256));
        let emitter = FlowEmitter::new(hub, 4);
        for _ in 0..10 {
            emitter.emit("watch_pipeline", event());
        }
        assert_eq!(emitter.queue_depth(), 4);
        assert_eq!(emitter.dropped(), 6);
    }

    #[test]
    fn closed_emitter_ignores_new_events() {
        let hub = Arc::new(FanoutHub::new(256));
        let emitter = FlowEmitter::new(hub, 4);
        emitter.emit("watch_pipeline", event());
        emitter.close();
        emitter.emit("watch_pipeline", event());
        assert_eq!(emitter.queue_depth(), 1);
    }
}
