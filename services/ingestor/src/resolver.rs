//! Device -> patient -> hospital resolution.
//!
//! Each family has a strict fallback chain; the first hit wins.  A
//! failed patient lookup discards the message (except kiosk, which
//! auto-creates a scaffold).  A failed hospital lookup never fails the
//! message: the configured default hospital is used and the resolution
//! is flagged so the pipeline can log the downgrade.

use std::sync::Arc;
use tracing::{info, warn};
use vf_model::DeviceFamily;
use vf_protocol::GatewayMedical;
use vf_store::{DirectoryStore, PatientDoc, StoreError, UnregisteredPatient};

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("no patient mapping for device `{device_id}`")]
    PatientUnknown { device_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub patient_id: String,
    pub hospital_id: String,
    pub device_family: DeviceFamily,
    /// Family-specific device identity (sub-device BLE address,
    /// gateway MAC, IMEI, or kiosk MAC).
    pub device_id: String,
    /// True when the kiosk pipeline auto-created the patient.
    pub patient_created: bool,
    /// True when every hospital lookup failed and the default was used.
    pub hospital_defaulted: bool,
}

pub struct Resolver {
    directory: Arc<dyn DirectoryStore>,
    default_hospital_id: String,
}

impl Resolver {
    pub fn new(directory: Arc<dyn DirectoryStore>, default_hospital_id: String) -> Resolver {
        Resolver {
            directory,
            default_hospital_id,
        }
    }

    // -----------------------------------------------------------------------
    // GatewayBox
    // -----------------------------------------------------------------------

    /// Resolve a gateway medical envelope.
    ///
    /// A non-empty `device_list` resolves by the first element's BLE
    /// address; otherwise the gateway MAC is the device identity.
    pub async fn resolve_gateway(
        &self,
        medical: &GatewayMedical,
    ) -> Result<Resolution, ResolutionError> {
        let sub_mac = medical.device_list.first().map(|r| r.ble_addr.as_str());
        let device_id = sub_mac.unwrap_or(medical.gateway_mac.as_str()).to_owned();

        // 1. Sub-device registry.
        if let Some(mac) = sub_mac {
            if let Some(registered) = self.directory.sub_device_by_ble_addr(mac).await? {
                let (hospital_id, defaulted) = match registered.hospital_id {
                    Some(hospital_id) => (hospital_id, false),
                    None => {
                        self.gateway_hospital(None, &medical.gateway_mac)
                            .await?
                    }
                };
                return Ok(Resolution {
                    patient_id: registered.patient_id,
                    hospital_id,
                    device_family: DeviceFamily::GatewayBox,
                    device_id,
                    patient_created: false,
                    hospital_defaulted: defaulted,
                });
            }
            // 2. Typed MAC fields on the patient.
            if let Some(patient) = self.directory.patient_by_sub_device_mac(mac).await? {
                return self
                    .gateway_resolution(patient, &medical.gateway_mac, device_id)
                    .await;
            }
        }
        // 3. Gateway binding on the patient.
        if let Some(patient) = self
            .directory
            .patient_by_gateway_mac(&medical.gateway_mac)
            .await?
        {
            return self
                .gateway_resolution(patient, &medical.gateway_mac, device_id)
                .await;
        }
        Err(ResolutionError::PatientUnknown { device_id })
    }

    async fn gateway_resolution(
        &self,
        patient: PatientDoc,
        gateway_mac: &str,
        device_id: String,
    ) -> Result<Resolution, ResolutionError> {
        let (hospital_id, defaulted) = self
            .gateway_hospital(patient.hospital_id.clone(), gateway_mac)
            .await?;
        Ok(Resolution {
            patient_id: patient.patient_id,
            hospital_id,
            device_family: DeviceFamily::GatewayBox,
            device_id,
            patient_created: false,
            hospital_defaulted: defaulted,
        })
    }

    /// Hospital chain for gateway MACs: patient binding, then the
    /// hospital association, then the gateway registry, then default.
    async fn gateway_hospital(
        &self,
        patient_hospital: Option<String>,
        gateway_mac: &str,
    ) -> Result<(String, bool), ResolutionError> {
        if let Some(hospital_id) = patient_hospital {
            return Ok((hospital_id, false));
        }
        if let Some(hospital) = self.directory.hospital_by_gateway_mac(gateway_mac).await? {
            return Ok((hospital.hospital_id, false));
        }
        if let Some(entry) = self.directory.gateway_registry_by_mac(gateway_mac).await? {
            if let Some(hospital_id) = entry.hospital_id {
                return Ok((hospital_id, false));
            }
        }
        warn!(gateway_mac, "hospital lookup exhausted; using default");
        Ok((self.default_hospital_id.clone(), true))
    }

    // -----------------------------------------------------------------------
    // Watch
    // -----------------------------------------------------------------------

    pub async fn resolve_watch(&self, imei: &str) -> Result<Resolution, ResolutionError> {
        // 1. Watch registry.
        if let Some(watch) = self.directory.watch_by_imei(imei).await? {
            if let Some(patient_id) = watch.patient_id {
                let patient_hospital = self
                    .directory
                    .patient_by_id(&patient_id)
                    .await?
                    .and_then(|p| p.hospital_id);
                let (hospital_id, defaulted) = match patient_hospital.or(watch.hospital_id) {
                    Some(hospital_id) => (hospital_id, false),
                    None => {
                        warn!(imei, "hospital lookup exhausted; using default");
                        (self.default_hospital_id.clone(), true)
                    }
                };
                return Ok(Resolution {
                    patient_id,
                    hospital_id,
                    device_family: DeviceFamily::Watch,
                    device_id: imei.to_owned(),
                    patient_created: false,
                    hospital_defaulted: defaulted,
                });
            }
        }
        // 2. Watch binding on the patient.
        if let Some(patient) = self.directory.patient_by_watch_imei(imei).await? {
            let (hospital_id, defaulted) = match patient.hospital_id {
                Some(hospital_id) => (hospital_id, false),
                None => {
                    warn!(imei, "hospital lookup exhausted; using default");
                    (self.default_hospital_id.clone(), true)
                }
            };
            return Ok(Resolution {
                patient_id: patient.patient_id,
                hospital_id,
                device_family: DeviceFamily::Watch,
                device_id: imei.to_owned(),
                patient_created: false,
                hospital_defaulted: defaulted,
            });
        }
        Err(ResolutionError::PatientUnknown {
            device_id: imei.to_owned(),
        })
    }

    // -----------------------------------------------------------------------
    // HospitalKiosk
    // -----------------------------------------------------------------------

    /// Kiosk resolution never fails on an unknown patient: an
    /// unregistered scaffold is created and reused by later messages
    /// carrying the same citizen id.
    pub async fn resolve_kiosk(
        &self,
        kiosk_mac: &str,
        citizen_id: &str,
    ) -> Result<Resolution, ResolutionError> {
        if let Some(patient) = self.directory.patient_by_citizen_id(citizen_id).await? {
            let (hospital_id, defaulted) = match patient.hospital_id {
                Some(hospital_id) => (hospital_id, false),
                None => self.kiosk_hospital(kiosk_mac).await?,
            };
            return Ok(Resolution {
                patient_id: patient.patient_id,
                hospital_id,
                device_family: DeviceFamily::HospitalKiosk,
                device_id: kiosk_mac.to_owned(),
                patient_created: false,
                hospital_defaulted: defaulted,
            });
        }

        let (hospital_id, defaulted) = self.kiosk_hospital(kiosk_mac).await?;
        let patient = self
            .directory
            .create_unregistered_patient(UnregisteredPatient {
                citizen_id: citizen_id.to_owned(),
                hospital_id: Some(hospital_id.clone()),
            })
            .await?;
        info!(
            patient_id = %patient.patient_id,
            citizen_id,
            "kiosk resolution created unregistered patient"
        );
        Ok(Resolution {
            patient_id: patient.patient_id,
            hospital_id,
            device_family: DeviceFamily::HospitalKiosk,
            device_id: kiosk_mac.to_owned(),
            patient_created: true,
            hospital_defaulted: defaulted,
        })
    }

    /// Hospital chain for kiosks: kiosk registry, hospital association,
    /// gateway registry, default.
    async fn kiosk_hospital(&self, kiosk_mac: &str) -> Result<(String, bool), ResolutionError> {
        if let Some(kiosk) = self.directory.kiosk_by_mac(kiosk_mac).await? {
            if let Some(hospital_id) = kiosk.hospital_id {
                return Ok((hospital_id, false));
            }
        }
        if let Some(hospital) = self.directory.hospital_by_gateway_mac(kiosk_mac).await? {
            return Ok((hospital.hospital_id, false));
        }
        if let Some(entry) = self.directory.gateway_registry_by_mac(kiosk_mac).await? {
            if let Some(hospital_id) = entry.hospital_id {
                return Ok((hospital_id, false));
            }
        }
        warn!(kiosk_mac, "hospital lookup exhausted; using default");
        Ok((self.default_hospital_id.clone(), true))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
