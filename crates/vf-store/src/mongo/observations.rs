//! `ObservationStore` over the owned collections.

use super::{map_err, MongoStore};
use crate::documents::{collections, EmergencyDoc, HistoryDoc, LocationSnapshotDoc, SnapshotDoc};
use crate::fhir;
use crate::traits::{
    AppendOutcome, DuplicateKey, ObservationStore, SnapshotOutcome, StoreError, StoreResult,
};
use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use vf_model::{EmergencyEvent, Location, Observation};

#[async_trait]
impl ObservationStore for MongoStore {
    async fn history_contains(&self, key: &DuplicateKey) -> StoreResult<bool> {
        let filter = doc! {
            "source_device_id": &key.source_device_id,
            "measured_at": bson::DateTime::from_chrono(key.measured_at),
            "observation_type": key.observation_type.as_str(),
            "raw_fingerprint": &key.raw_fingerprint,
        };
        let count = self
            .history(key.observation_type)
            .count_documents(filter)
            .await
            .map_err(map_err)?;
        Ok(count > 0)
    }

    async fn append_history(&self, obs: &Observation) -> StoreResult<AppendOutcome> {
        let row = HistoryDoc::from_observation(obs);
        match self.history(obs.observation_type).insert_one(&row).await {
            Ok(_) => Ok(AppendOutcome::Inserted),
            Err(e) if super::is_duplicate_key(&e) => Ok(AppendOutcome::Duplicate),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn update_snapshot(&self, obs: &Observation) -> StoreResult<SnapshotOutcome> {
        let Some(field) = obs.observation_type.snapshot_field() else {
            return Ok(SnapshotOutcome::NoField);
        };
        let ts = bson::DateTime::from_chrono(obs.measured_at);
        let ts_key = format!("{field}.measured_at");
        // Conditional update: a stored snapshot newer than this
        // observation leaves the filter unmatched.
        let filter = doc! {
            "_id": &obs.patient_id,
            "$or": [
                { ts_key: { "$lte": ts } },
                { field: bson::Bson::Null },
            ],
        };
        let snapshot = bson::to_bson(&SnapshotDoc::from_observation(obs))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let result = self
            .patients()
            .update_one(filter, doc! { "$set": { field: snapshot } })
            .await
            .map_err(map_err)?;
        if result.matched_count == 0 {
            Ok(SnapshotOutcome::Stale)
        } else {
            Ok(SnapshotOutcome::Updated)
        }
    }

    async fn update_location_snapshot(
        &self,
        patient_id: &str,
        location: &Location,
        measured_at: DateTime<Utc>,
    ) -> StoreResult<SnapshotOutcome> {
        let ts = bson::DateTime::from_chrono(measured_at);
        let filter = doc! {
            "_id": patient_id,
            "$or": [
                { "last_location.measured_at": { "$lte": ts } },
                { "last_location": bson::Bson::Null },
            ],
        };
        let snapshot = bson::to_bson(&LocationSnapshotDoc {
            location: location.clone(),
            measured_at: ts,
        })
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        let result = self
            .patients()
            .update_one(filter, doc! { "$set": { "last_location": snapshot } })
            .await
            .map_err(map_err)?;
        if result.matched_count == 0 {
            Ok(SnapshotOutcome::Stale)
        } else {
            Ok(SnapshotOutcome::Updated)
        }
    }

    async fn write_fhir(&self, obs: &Observation) -> StoreResult<()> {
        let resource = fhir::observation_resource(obs);
        let document =
            bson::to_document(&resource).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.typed::<Document>(collections::FHIR_OBSERVATIONS)
            .insert_one(document)
            .await
            .map_err(map_err)?;

        if let Some(hospital_id) = &obs.hospital_id {
            use crate::traits::DirectoryStore;
            let hospital = self.hospital_by_id(hospital_id).await?;
            let name = hospital.as_ref().and_then(|h| h.name.clone());
            let organization =
                bson::to_document(&fhir::organization_resource(hospital_id, name.as_deref()))
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            self.typed::<Document>(collections::FHIR_ORGANIZATIONS)
                .update_one(
                    doc! { "_id": hospital_id },
                    doc! { "$setOnInsert": organization },
                )
                .upsert(true)
                .await
                .map_err(map_err)?;
            if let Some((lat, lng)) = hospital.as_ref().and_then(|h| h.lat.zip(h.lng)) {
                let location = bson::to_document(&fhir::location_resource(
                    hospital_id,
                    name.as_deref(),
                    lat,
                    lng,
                ))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
                self.typed::<Document>(collections::FHIR_LOCATIONS)
                    .update_one(doc! { "_id": hospital_id }, doc! { "$setOnInsert": location })
                    .upsert(true)
                    .await
                    .map_err(map_err)?;
            }
        }
        Ok(())
    }

    async fn insert_emergency(&self, event: &EmergencyEvent) -> StoreResult<()> {
        self.emergencies()
            .insert_one(EmergencyDoc::from_event(event))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn active_emergencies(&self, limit: usize) -> StoreResult<Vec<EmergencyEvent>> {
        let mut cursor = self
            .emergencies()
            .find(doc! { "status": "active" })
            .sort(doc! { "occurred_at": -1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(map_err)?;
        let mut events = Vec::new();
        while let Some(row) = cursor.try_next().await.map_err(map_err)? {
            events.push(row.into_event());
        }
        Ok(events)
    }
}
