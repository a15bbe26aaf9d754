//! `DirectoryStore` over the shared collections.

use super::{map_err, MongoStore};
use crate::documents::{
    collections, GatewayRegistryDoc, HospitalDoc, KioskDoc, NameDoc, OperatorTokenDoc, PatientDoc,
    SubDeviceDoc, WatchDoc, SUB_DEVICE_MAC_FIELDS, UNREGISTERED_MARKER,
};
use crate::traits::{DirectoryStore, StoreError, StoreResult, UnregisteredPatient};
use async_trait::async_trait;
use bson::doc;
use tracing::info;
use uuid::Uuid;

#[async_trait]
impl DirectoryStore for MongoStore {
    async fn sub_device_by_ble_addr(&self, ble_addr: &str) -> StoreResult<Option<SubDeviceDoc>> {
        self.typed::<SubDeviceDoc>(collections::SUB_DEVICES)
            .find_one(doc! { "ble_addr": ble_addr })
            .await
            .map_err(map_err)
    }

    async fn patient_by_sub_device_mac(&self, mac: &str) -> StoreResult<Option<PatientDoc>> {
        let alternatives: Vec<bson::Document> = SUB_DEVICE_MAC_FIELDS
            .iter()
            .map(|field| doc! { *field: mac })
            .collect();
        self.patients()
            .find_one(doc! { "$or": alternatives })
            .await
            .map_err(map_err)
    }

    async fn patient_by_gateway_mac(&self, mac: &str) -> StoreResult<Option<PatientDoc>> {
        self.patients()
            .find_one(doc! { "ava_mac_address": mac })
            .await
            .map_err(map_err)
    }

    async fn patient_by_watch_imei(&self, imei: &str) -> StoreResult<Option<PatientDoc>> {
        self.patients()
            .find_one(doc! { "watch_mac_address": imei })
            .await
            .map_err(map_err)
    }

    async fn patient_by_id(&self, patient_id: &str) -> StoreResult<Option<PatientDoc>> {
        self.patients()
            .find_one(doc! { "_id": patient_id })
            .await
            .map_err(map_err)
    }

    async fn patient_by_citizen_id(&self, citizen_id: &str) -> StoreResult<Option<PatientDoc>> {
        self.patients()
            .find_one(doc! { "citizen_id": citizen_id })
            .await
            .map_err(map_err)
    }

    async fn watch_by_imei(&self, imei: &str) -> StoreResult<Option<WatchDoc>> {
        self.typed::<WatchDoc>(collections::WATCHES)
            .find_one(doc! { "imei": imei })
            .await
            .map_err(map_err)
    }

    async fn kiosk_by_mac(&self, mac: &str) -> StoreResult<Option<KioskDoc>> {
        self.typed::<KioskDoc>(collections::KIOSKS)
            .find_one(doc! { "mac": mac })
            .await
            .map_err(map_err)
    }

    async fn hospital_by_id(&self, hospital_id: &str) -> StoreResult<Option<HospitalDoc>> {
        self.typed::<HospitalDoc>(collections::HOSPITALS)
            .find_one(doc! { "_id": hospital_id })
            .await
            .map_err(map_err)
    }

    async fn hospital_by_gateway_mac(&self, mac: &str) -> StoreResult<Option<HospitalDoc>> {
        self.typed::<HospitalDoc>(collections::HOSPITALS)
            .find_one(doc! { "mac_hv01_box": mac })
            .await
            .map_err(map_err)
    }

    async fn gateway_registry_by_mac(&self, mac: &str) -> StoreResult<Option<GatewayRegistryDoc>> {
        self.typed::<GatewayRegistryDoc>(collections::GATEWAY_BOXES)
            .find_one(doc! { "mac_address": mac })
            .await
            .map_err(map_err)
    }

    async fn create_unregistered_patient(
        &self,
        scaffold: UnregisteredPatient,
    ) -> StoreResult<PatientDoc> {
        let patient = PatientDoc {
            patient_id: Uuid::new_v4().to_string(),
            name: NameDoc {
                marker: Some(UNREGISTERED_MARKER.to_owned()),
                ..NameDoc::default()
            },
            citizen_id: Some(scaffold.citizen_id.clone()),
            hospital_id: scaffold.hospital_id,
            created_by: Some("kiosk".to_owned()),
            ..PatientDoc::default()
        };
        match self.patients().insert_one(&patient).await {
            Ok(_) => {
                info!(
                    patient_id = %patient.patient_id,
                    citizen_id = %scaffold.citizen_id,
                    "auto-created unregistered patient"
                );
                Ok(patient)
            }
            Err(e) if super::is_duplicate_key(&e) => {
                // A concurrent create won the citizen-id index; reuse it.
                self.patient_by_citizen_id(&scaffold.citizen_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Backend(
                            "citizen_id conflict but no patient readable".to_owned(),
                        )
                    })
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn operator_by_token_hash(&self, hash: &str) -> StoreResult<Option<OperatorTokenDoc>> {
        self.typed::<OperatorTokenDoc>(collections::OPERATOR_TOKENS)
            .find_one(doc! { "token_hash": hash, "revoked": false })
            .await
            .map_err(map_err)
    }
}
