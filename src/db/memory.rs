//! In-process backends for demo mode (`STORE_BACKEND=memory`) and tests.

use crate::db::directory::Directory;
use crate::db::store::{parse_request_id, request_not_found, stale_status, EmergencyStore};
use crate::error::{DispatchError, DispatchResult};
use crate::models::emergency::{Coordinate, EmergencyRequest, StatusUpdate};
use crate::models::user::{Contact, HospitalCandidate, PatientProfile};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryEmergencyStore {
    records: RwLock<HashMap<Uuid, EmergencyRequest>>,
}

impl MemoryEmergencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl EmergencyStore for MemoryEmergencyStore {
    async fn insert(&self, record: &EmergencyRequest) -> DispatchResult<EmergencyRequest> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(DispatchError::Conflict(format!(
                "Emergency request {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn get_by_id(&self, id: &str) -> DispatchResult<EmergencyRequest> {
        let id = parse_request_id(id)?;
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(request_not_found)
    }

    async fn update_status(&self, id: Uuid, update: &StatusUpdate) -> DispatchResult<EmergencyRequest> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or_else(request_not_found)?;

        if record.status != update.expected_status {
            return Err(stale_status(id, update.expected_status, record.status));
        }

        record.status = update.status;
        if let Some(ambulance_id) = &update.ambulance_id {
            record.ambulance_id = Some(ambulance_id.clone());
        }
        record.updated_at = update.updated_at;
        Ok(record.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemoPatient {
    pub user_id: Uuid,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemoHospital {
    pub user_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub emergency_services: bool,
    #[serde(default)]
    pub location: Option<Coordinate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemoData {
    #[serde(default)]
    pub patients: Vec<DemoPatient>,
    #[serde(default)]
    pub hospitals: Vec<DemoHospital>,
}

impl DemoData {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading demo data from {}", path.display()))?;
        let data = serde_json::from_str(&content)
            .with_context(|| format!("parsing demo data in {}", path.display()))?;
        Ok(data)
    }
}

/// Directory over a fixed set of patients and hospitals. Hospitals keep their
/// insertion order, which is the order candidates are offered in.
#[derive(Default)]
pub struct MemoryDirectory {
    patients: HashMap<Uuid, DemoPatient>,
    hospitals: Vec<DemoHospital>,
}

impl MemoryDirectory {
    pub fn new(data: DemoData) -> Self {
        let mut directory = Self::default();
        for patient in data.patients {
            directory = directory.with_patient(patient);
        }
        for hospital in data.hospitals {
            directory = directory.with_hospital(hospital);
        }
        directory
    }

    pub fn with_patient(mut self, patient: DemoPatient) -> Self {
        self.patients.insert(patient.user_id, patient);
        self
    }

    pub fn with_hospital(mut self, hospital: DemoHospital) -> Self {
        self.hospitals.retain(|h| h.user_id != hospital.user_id);
        self.hospitals.push(hospital);
        self
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_patient(&self, user_id: Uuid) -> DispatchResult<Option<PatientProfile>> {
        Ok(self.patients.get(&user_id).map(|p| PatientProfile {
            user_id: p.user_id,
            blood_group: p.blood_group.clone(),
            allergies: p.allergies.clone(),
        }))
    }

    async fn list_emergency_hospitals(&self) -> DispatchResult<Vec<HospitalCandidate>> {
        Ok(self
            .hospitals
            .iter()
            .filter(|h| h.emergency_services)
            .filter_map(|h| {
                Some(HospitalCandidate {
                    hospital_user_id: h.user_id,
                    location: h.location?,
                    name: h.name.clone().unwrap_or_else(|| "Unknown Hospital".to_string()),
                })
            })
            .collect())
    }

    async fn hospital_contact(&self, user_id: Uuid) -> DispatchResult<Option<Contact>> {
        Ok(self
            .hospitals
            .iter()
            .find(|h| h.user_id == user_id)
            .map(|h| Contact {
                user_id,
                phone: h.phone.clone(),
            }))
    }

    async fn patient_contact(&self, user_id: Uuid) -> DispatchResult<Option<Contact>> {
        Ok(self.patients.get(&user_id).map(|p| Contact {
            user_id,
            phone: p.phone.clone(),
        }))
    }
}
