//! Ingestor configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/vitalflow/ingestor.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `bus.endpoint`
//! - `store.uri`
//! - `default_hospital_id`
//!
//! Everything else has documented defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Top-level ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub schema_version: u32,
    /// Used when every hospital lookup in a resolution chain fails.
    pub default_hospital_id: String,
    pub bus: BusConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub fanout: FanoutConfig,
    pub emitter: EmitterConfig,
    pub eventlog: EventLogConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusQos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker endpoint, `mqtt://host:port` or `host:port`.
    pub endpoint: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: BusQos,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub tls_ca: Option<PathBuf>,
    pub tls_client: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub in_flight_per_pipeline: usize,
    pub persist_retry_budget: u32,
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub queue_capacity: usize,
    /// Event-log ingestion endpoint; defaults to the local HTTP bind.
    pub ingest_url: String,
}

#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub retention_days: i64,
    pub page_limit_max: u64,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    default_hospital_id: Option<String>,
    bus: Option<RawBusConfig>,
    store: Option<RawStoreConfig>,
    pipeline: Option<RawPipelineConfig>,
    fanout: Option<RawFanoutConfig>,
    emitter: Option<RawEmitterConfig>,
    eventlog: Option<RawEventLogConfig>,
    http: Option<RawHttpConfig>,
}

#[derive(Debug, Deserialize)]
struct RawBusConfig {
    endpoint: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    qos: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStoreConfig {
    uri: Option<String>,
    database: Option<String>,
    tls_ca: Option<PathBuf>,
    tls_client: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawPipelineConfig {
    in_flight_per_pipeline: Option<usize>,
    persist_retry_budget: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawFanoutConfig {
    outbound_buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawEmitterConfig {
    queue_capacity: Option<usize>,
    ingest_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEventLogConfig {
    retention_days: Option<i64>,
    page_limit_max: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawHttpConfig {
    bind: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load ingestor config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<IngestorConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load ingestor config from the default path `/etc/vitalflow/ingestor.toml`.
pub fn load_config() -> Result<IngestorConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/vitalflow/ingestor.toml"))
}

/// Load ingestor config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<IngestorConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let default_hospital_id = raw
        .default_hospital_id
        .ok_or_else(|| ConfigError::MissingField("default_hospital_id".to_owned()))?;

    let raw_bus = raw
        .bus
        .ok_or_else(|| ConfigError::MissingField("bus".to_owned()))?;
    let endpoint = raw_bus
        .endpoint
        .ok_or_else(|| ConfigError::MissingField("bus.endpoint".to_owned()))?;
    let qos = match raw_bus.qos.as_deref() {
        None | Some("at_least_once") => BusQos::AtLeastOnce,
        Some("at_most_once") => BusQos::AtMostOnce,
        Some("exactly_once") => BusQos::ExactlyOnce,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "bus.qos must be at_most_once|at_least_once|exactly_once, got {}",
                other
            )));
        }
    };
    let bus = BusConfig {
        endpoint,
        client_id: raw_bus
            .client_id
            .unwrap_or_else(|| "vitalflow-ingestor".to_owned()),
        username: raw_bus.username,
        password: raw_bus.password,
        qos,
    };

    let raw_store = raw
        .store
        .ok_or_else(|| ConfigError::MissingField("store".to_owned()))?;
    let store = StoreConfig {
        uri: raw_store
            .uri
            .ok_or_else(|| ConfigError::MissingField("store.uri".to_owned()))?,
        database: raw_store.database.unwrap_or_else(|| "vitalflow".to_owned()),
        tls_ca: raw_store.tls_ca,
        tls_client: raw_store.tls_client,
    };
    if store.tls_client.is_some() && store.tls_ca.is_none() {
        return Err(ConfigError::InvalidValue(
            "store.tls_client requires store.tls_ca".to_owned(),
        ));
    }

    let pipeline = match raw.pipeline {
        Some(p) => PipelineConfig {
            in_flight_per_pipeline: p.in_flight_per_pipeline.unwrap_or(4),
            persist_retry_budget: p.persist_retry_budget.unwrap_or(3),
        },
        None => PipelineConfig {
            in_flight_per_pipeline: 4,
            persist_retry_budget: 3,
        },
    };
    if pipeline.in_flight_per_pipeline == 0 {
        return Err(ConfigError::InvalidValue(
            "pipeline.in_flight_per_pipeline must be at least 1".to_owned(),
        ));
    }

    let fanout = FanoutConfig {
        outbound_buffer: raw
            .fanout
            .and_then(|f| f.outbound_buffer)
            .unwrap_or(256),
    };

    let http = HttpConfig {
        bind: raw
            .http
            .and_then(|h| h.bind)
            .unwrap_or_else(|| "0.0.0.0:8090".to_owned()),
    };

    let emitter = match raw.emitter {
        Some(e) => EmitterConfig {
            queue_capacity: e.queue_capacity.unwrap_or(1024),
            ingest_url: e
                .ingest_url
                .unwrap_or_else(|| default_ingest_url(&http.bind)),
        },
        None => EmitterConfig {
            queue_capacity: 1024,
            ingest_url: default_ingest_url(&http.bind),
        },
    };

    let eventlog = match raw.eventlog {
        Some(e) => EventLogConfig {
            retention_days: e.retention_days.unwrap_or(30),
            page_limit_max: e.page_limit_max.unwrap_or(500),
        },
        None => EventLogConfig {
            retention_days: 30,
            page_limit_max: 500,
        },
    };

    Ok(IngestorConfig {
        schema_version,
        default_hospital_id,
        bus,
        store,
        pipeline,
        fanout,
        emitter,
        eventlog,
        http,
    })
}

/// The emitter posts to the local HTTP server unless overridden;
/// a wildcard bind is reached via loopback.
fn default_ingest_url(bind: &str) -> String {
    let local = match bind.rsplit_once(':') {
        Some(("0.0.0.0" | "::" | "[::]", port)) => format!("127.0.0.1:{port}"),
        _ => bind.to_owned(),
    };
    format!("http://{local}/api/event-log")
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        schema_version = 1
        default_hospital_id = "H-DEFAULT"

        [bus]
        endpoint = "mqtt://broker.local:1883"

        [store]
        uri = "mongodb://127.0.0.1:27017"
    "#;

    #[test]
    fn minimal_config_gets_documented_defaults() {
        let cfg = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(cfg.default_hospital_id, "H-DEFAULT");
        assert_eq!(cfg.bus.qos, BusQos::AtLeastOnce);
        assert_eq!(cfg.bus.client_id, "vitalflow-ingestor");
        assert_eq!(cfg.store.database, "vitalflow");
        assert_eq!(cfg.pipeline.in_flight_per_pipeline, 4);
        assert_eq!(cfg.pipeline.persist_retry_budget, 3);
        assert_eq!(cfg.fanout.outbound_buffer, 256);
        assert_eq!(cfg.emitter.queue_capacity, 1024);
        assert_eq!(
            cfg.emitter.ingest_url,
            "http://127.0.0.1:8090/api/event-log"
        );
        assert_eq!(cfg.eventlog.retention_days, 30);
        assert_eq!(cfg.eventlog.page_limit_max, 500);
        assert_eq!(cfg.http.bind, "0.0.0.0:8090");
    }

    #[test]
    fn missing_required_fields_are_reported_by_name() {
        let err = load_config_from_str("schema_version = 1").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "default_hospital_id"));

        let err = load_config_from_str(
            r#"
            schema_version = 2
            default_hospital_id = "H"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn invalid_qos_is_rejected() {
        let toml = r#"
            schema_version = 1
            default_hospital_id = "H"
            [bus]
            endpoint = "broker:1883"
            qos = "qos9"
            [store]
            uri = "mongodb://x"
        "#;
        assert!(matches!(
            load_config_from_str(toml).unwrap_err(),
            ConfigError::InvalidValue(_)
        ));
    }

    #[test]
    fn tls_client_without_ca_is_rejected() {
        let toml = r#"
            schema_version = 1
            default_hospital_id = "H"
            [bus]
            endpoint = "broker:1883"
            [store]
            uri = "mongodb://x"
            tls_client = "/etc/certs/client.pem"
        "#;
        assert!(matches!(
            load_config_from_str(toml).unwrap_err(),
            ConfigError::InvalidValue(_)
        ));
    }
}
