//! MongoDB implementation of the store capabilities.
//!
//! One `MongoStore` per process, constructed at startup.  Index
//! bootstrap runs once on connect: the duplicate-suppression key is a
//! unique index on every history collection, and the citizen-id
//! uniqueness backing kiosk auto-create is a partial unique index on
//! `patients`.

mod directory;
mod eventlog;
mod observations;

use crate::documents::{collections, EmergencyDoc, EventLogDoc, HistoryDoc, PatientDoc};
use crate::traits::{StoreError, StoreResult};
use bson::doc;
use mongodb::options::{ClientOptions, IndexOptions, Tls, TlsOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use vf_model::ObservationType;

/// Connection settings for the document store.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    /// CA bundle path; enables TLS when set.
    pub tls_ca: Option<PathBuf>,
    /// Client certificate/key PEM path (required when TLS is enabled
    /// against a mutual-TLS cluster).
    pub tls_client: Option<PathBuf>,
}

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect, apply timeouts, and bootstrap indexes.
    pub async fn connect(cfg: &MongoConfig) -> StoreResult<MongoStore> {
        let mut options = ClientOptions::parse(&cfg.uri)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        options.app_name = Some("vitalflow-ingestor".to_owned());
        options.server_selection_timeout = Some(Duration::from_secs(5));
        options.connect_timeout = Some(Duration::from_secs(5));
        if cfg.tls_ca.is_some() || cfg.tls_client.is_some() {
            let tls = TlsOptions::builder()
                .ca_file_path(cfg.tls_ca.clone())
                .cert_key_file_path(cfg.tls_client.clone())
                .build();
            options.tls = Some(Tls::Enabled(tls));
        }
        let client = Client::with_options(options).map_err(|e| StoreError::Backend(e.to_string()))?;
        let store = MongoStore {
            db: client.database(&cfg.database),
        };
        store.ensure_indexes().await?;
        info!(database = %cfg.database, "document store connected");
        Ok(store)
    }

    pub(crate) fn patients(&self) -> Collection<PatientDoc> {
        self.db.collection(collections::PATIENTS)
    }

    pub(crate) fn history(&self, observation_type: ObservationType) -> Collection<HistoryDoc> {
        self.db.collection(observation_type.history_collection())
    }

    pub(crate) fn emergencies(&self) -> Collection<EmergencyDoc> {
        self.db.collection(collections::EMERGENCY)
    }

    pub(crate) fn event_logs(&self) -> Collection<EventLogDoc> {
        self.db.collection(collections::EVENT_LOGS)
    }

    pub(crate) fn typed<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    /// Create the unique and query indexes the core relies on.
    async fn ensure_indexes(&self) -> StoreResult<()> {
        let all_types = [
            ObservationType::BloodPressure,
            ObservationType::BloodGlucose,
            ObservationType::Spo2,
            ObservationType::BodyTemperature,
            ObservationType::BodyWeight,
            ObservationType::HeartRate,
            ObservationType::StepCount,
            ObservationType::Sleep,
            ObservationType::UricAcid,
            ObservationType::Cholesterol,
        ];
        for observation_type in all_types {
            let keys = doc! {
                "source_device_id": 1,
                "measured_at": 1,
                "observation_type": 1,
                "raw_fingerprint": 1,
            };
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build();
            self.history(observation_type)
                .create_index(index)
                .await
                .map_err(map_err)?;
        }

        // Kiosk auto-create relies on citizen_id uniqueness; the field
        // is optional on registered patients, hence partial.
        let citizen_index = IndexModel::builder()
            .keys(doc! { "citizen_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "citizen_id": { "$type": "string" } })
                    .build(),
            )
            .build();
        self.patients()
            .create_index(citizen_index)
            .await
            .map_err(map_err)?;

        self.event_logs()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "server_timestamp": 1 })
                    .build(),
            )
            .await
            .map_err(map_err)?;

        self.emergencies()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "status": 1, "occurred_at": -1 })
                    .build(),
            )
            .await
            .map_err(map_err)?;

        Ok(())
    }
}

/// True when the server rejected a write for a unique-index conflict.
pub(crate) fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match &*e.kind {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        _ => false,
    }
}

pub(crate) fn map_err(e: mongodb::error::Error) -> StoreError {
    if is_duplicate_key(&e) {
        StoreError::DuplicateKey
    } else {
        StoreError::Backend(e.to_string())
    }
}
