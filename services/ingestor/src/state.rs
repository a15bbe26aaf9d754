//! Shared application state.
//!
//! Capabilities (store traits, hub, emitter) are constructed once at
//! startup and injected everywhere; nothing reaches for a global.

use crate::config::IngestorConfig;
use crate::emitter::FlowEmitter;
use crate::hub::FanoutHub;
use crate::persister::Persister;
use crate::resolver::Resolver;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use vf_model::DeviceFamily;
use vf_store::{DirectoryStore, EventLogStore, ObservationStore};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PipelineCounters {
    processed: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub errors: u64,
}

pub struct IngestStats {
    started: Instant,
    gateway: PipelineCounters,
    watch: PipelineCounters,
    kiosk: PipelineCounters,
}

impl IngestStats {
    pub fn new() -> IngestStats {
        IngestStats {
            started: Instant::now(),
            gateway: PipelineCounters::default(),
            watch: PipelineCounters::default(),
            kiosk: PipelineCounters::default(),
        }
    }

    fn of(&self, family: DeviceFamily) -> &PipelineCounters {
        match family {
            DeviceFamily::GatewayBox => &self.gateway,
            DeviceFamily::Watch => &self.watch,
            DeviceFamily::HospitalKiosk => &self.kiosk,
        }
    }

    pub fn record_message(&self, family: DeviceFamily) {
        self.of(family).processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, family: DeviceFamily) {
        self.of(family).errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, family: DeviceFamily) -> CounterSnapshot {
        let counters = self.of(family);
        CounterSnapshot {
            processed: counters.processed.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        IngestStats::new()
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IngestorConfig>,
    pub directory: Arc<dyn DirectoryStore>,
    pub observations: Arc<dyn ObservationStore>,
    pub event_logs: Arc<dyn EventLogStore>,
    pub hub: Arc<FanoutHub>,
    pub emitter: FlowEmitter,
    pub resolver: Arc<Resolver>,
    pub persister: Arc<Persister>,
    pub stats: Arc<IngestStats>,
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: Arc<IngestorConfig>,
        directory: Arc<dyn DirectoryStore>,
        observations: Arc<dyn ObservationStore>,
        event_logs: Arc<dyn EventLogStore>,
        shutdown: watch::Receiver<bool>,
    ) -> AppState {
        let hub = Arc::new(FanoutHub::new(config.fanout.outbound_buffer));
        let emitter = FlowEmitter::new(hub.clone(), config.emitter.queue_capacity);
        let resolver = Arc::new(Resolver::new(
            directory.clone(),
            config.default_hospital_id.clone(),
        ));
        let persister = Arc::new(Persister::new(
            observations.clone(),
            config.pipeline.persist_retry_budget,
        ));
        AppState {
            config,
            directory,
            observations,
            event_logs,
            hub,
            emitter,
            resolver,
            persister,
            stats: Arc::new(IngestStats::new()),
            shutdown,
        }
    }
}
