// ingestor: vitalflow core daemon entry point.
//
// Wires the capabilities together in dependency order: store, hub,
// emitter, HTTP surface, retention sweep, bus adapter, pipelines.
// Shutdown on SIGINT: stop bus reads, drain in-flight persistence,
// flush the emitter, close fanout connections.

use ingestor::bus::{self, BusRouter};
use ingestor::config::{self, IngestorConfig};
use ingestor::emitter::FLUSH_BUDGET;
use ingestor::state::AppState;
use ingestor::{http, pipeline, retention};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use vf_model::DeviceFamily;
use vf_store::mongo::{MongoConfig, MongoStore};

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VITALFLOW_CONFIG").ok())
        .map(PathBuf::from)
}

#[tokio::main]
async fn main() {
    // Structured logging to stdout, `info` unless overridden.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "ingestor starting");

    let cfg: IngestorConfig = {
        let loaded = match config_path() {
            Some(path) => config::load_config_from_path(&path),
            None => config::load_config(),
        };
        match loaded {
            Ok(cfg) => {
                info!(
                    bus = %cfg.bus.endpoint,
                    store = %cfg.store.uri,
                    http = %cfg.http.bind,
                    "config loaded"
                );
                cfg
            }
            Err(e) => {
                eprintln!("FATAL: failed to load config: {}", e);
                std::process::exit(1);
            }
        }
    };

    let store = match MongoStore::connect(&MongoConfig {
        uri: cfg.store.uri.clone(),
        database: cfg.store.database.clone(),
        tls_ca: cfg.store.tls_ca.clone(),
        tls_client: cfg.store.tls_client.clone(),
    })
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("FATAL: failed to connect document store: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cfg = Arc::new(cfg);
    let state = AppState::new(
        cfg.clone(),
        store.clone(),
        store.clone(),
        store,
        shutdown_rx.clone(),
    );

    // Emitter delivery to the local event-log ingest endpoint.
    tokio::spawn(
        state
            .emitter
            .clone()
            .run_delivery(cfg.emitter.ingest_url.clone()),
    );

    // HTTP surface (fanout WS + event-log API + status).
    let listener = match tokio::net::TcpListener::bind(&cfg.http.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind {}: {}", cfg.http.bind, e);
            std::process::exit(1);
        }
    };
    let app = http::router(state.clone());
    let mut http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await;
    });

    tokio::spawn(retention::run_sweeper(state.clone()));

    // Bus adapter and the three pipelines.  Channel capacity at twice
    // the in-flight limit keeps backpressure on the broker session.
    let capacity = cfg.pipeline.in_flight_per_pipeline * 2;
    let (gateway_tx, gateway_rx) = mpsc::channel(capacity);
    let (watch_tx, watch_rx) = mpsc::channel(capacity);
    let (kiosk_tx, kiosk_rx) = mpsc::channel(capacity);
    tokio::spawn(bus::run(
        cfg.bus.clone(),
        BusRouter::new(gateway_tx, watch_tx, kiosk_tx),
        shutdown_rx.clone(),
    ));
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

    info!("ingestor ready");
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");

    // Stop bus reads and let pipelines drain in-flight work (5 s
    // budget inside pipeline::run), then flush the emitter and close
    // the fanout connections.
    let _ = shutdown_tx.send(true);
    for handle in pipelines {
        let _ = handle.await;
    }
    state.emitter.flush(FLUSH_BUDGET).await;
    state.hub.close_all();
    info!("ingestor stopped");
}
