use crate::db::store::stale_status;
use crate::db::{Directory, EmergencyStore};
use crate::error::{DispatchError, DispatchResult};
use crate::models::emergency::{
    Address, Coordinate, EmergencyRequest, EmergencyStatus, NewEmergencyRequest, StatusChangeRequest, StatusUpdate,
};
use crate::models::user::{Contact, PatientProfile, Role};
use crate::notify::{FanoutReport, NotificationFanout};
use crate::routing::estimator::with_timeout;
use crate::routing::{EstimatorSettings, Geocoder, HospitalLocator, NearbyHospital};
use anyhow::anyhow;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MAX_SEARCH_RADIUS_METERS: u32 = 50_000;

/// Postgres keeps microseconds; truncating up front keeps the returned record
/// identical to what a later read gives back.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn contact_or_log(result: DispatchResult<Option<Contact>>, who: &str, user_id: Uuid) -> Option<Contact> {
    match result {
        Ok(contact) => contact,
        Err(e) => {
            warn!("Could not load {} contact {}: {}", who, user_id, e);
            None
        }
    }
}

async fn settle(task: JoinHandle<FanoutReport>, what: &str, request_id: Uuid) {
    match task.await {
        Ok(report) => debug!("{} notifications for {} settled: {:?}", what, request_id, report),
        Err(e) if e.is_panic() => error!("{} notifications for {} panicked: {}", what, request_id, e),
        Err(e) => error!("{} notifications for {} were cancelled: {}", what, request_id, e),
    }
}

pub struct DispatchOrchestrator {
    store: Arc<dyn EmergencyStore>,
    directory: Arc<dyn Directory>,
    geocoder: Arc<dyn Geocoder>,
    locator: Arc<HospitalLocator>,
    notifier: Arc<NotificationFanout>,
    geocoder_timeout: StdDuration,
}

impl DispatchOrchestrator {
    pub fn new(
        store: Arc<dyn EmergencyStore>,
        directory: Arc<dyn Directory>,
        geocoder: Arc<dyn Geocoder>,
        locator: Arc<HospitalLocator>,
        notifier: Arc<NotificationFanout>,
    ) -> Self {
        Self {
            store,
            directory,
            geocoder,
            locator,
            notifier,
            geocoder_timeout: EstimatorSettings::default().timeout,
        }
    }

    /// Bound on every geocoder call; an overrun is handled like a provider error.
    pub fn with_geocoder_timeout(mut self, timeout: StdDuration) -> Self {
        self.geocoder_timeout = timeout;
        self
    }

    pub async fn create(&self, request: NewEmergencyRequest, acting_user: Uuid) -> DispatchResult<EmergencyRequest> {
        // 1. Validate
        let patient_id = Uuid::parse_str(request.patient_id.trim())
            .map_err(|_| DispatchError::invalid_id("patient", &request.patient_id))?;
        if !request.location.is_valid() {
            return Err(DispatchError::Validation(format!(
                "Invalid location: ({}, {})",
                request.location.latitude, request.location.longitude
            )));
        }

        // 2. Patient must exist
        let patient = self
            .directory
            .find_patient(patient_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound("Patient".to_string()))?;

        let address = match request.address.filter(|a| !a.is_empty()) {
            Some(address) => Some(address),
            None => self.lookup_address(request.location).await,
        };

        // 3. Pick the nearest emergency-capable hospital
        let candidates = self.directory.list_emergency_hospitals().await?;
        let nearest = self.locator.find_nearest(request.location, &candidates).await;

        let created_at = now();
        let (hospital_id, estimated_arrival_time) = match &nearest {
            Some(n) => {
                let eta = Duration::try_seconds(n.travel.duration_seconds)
                    .and_then(|d| created_at.checked_add_signed(d))
                    .ok_or_else(|| anyhow!("ETA out of range: {} s", n.travel.duration_seconds))?;
                (Some(n.candidate.hospital_user_id), Some(eta))
            }
            None => {
                warn!(
                    "No emergency hospital available for patient {} ({} candidates)",
                    patient_id,
                    candidates.len()
                );
                (None, None)
            }
        };

        // 4. Persist
        let record = EmergencyRequest {
            id: Uuid::new_v4(),
            patient_id,
            location: request.location,
            address,
            symptoms: request.symptoms,
            notes: request.notes.filter(|n| !n.trim().is_empty()),
            status: EmergencyStatus::Pending,
            hospital_id,
            ambulance_id: None,
            estimated_arrival_time,
            created_by: acting_user,
            created_at,
            updated_at: created_at,
        };
        let record = self.store.insert(&record).await?;
        info!(
            "Created emergency request {} for patient {} (hospital: {:?})",
            record.id, record.patient_id, record.hospital_id
        );

        // 5. Notify, never failing the request
        self.notify_created(&record, patient).await;

        Ok(record)
    }

    pub async fn update_status(&self, id: &str, change: StatusChangeRequest) -> DispatchResult<EmergencyRequest> {
        let current = self.store.get_by_id(id).await?;

        if let Some(expected) = change.expected_status {
            if expected != current.status {
                return Err(stale_status(current.id, expected, current.status));
            }
        }

        if current.status.is_terminal() {
            return Err(DispatchError::Validation(format!(
                "Emergency request is already {}",
                current.status
            )));
        }
        if !current.status.can_transition_to(change.status) {
            return Err(DispatchError::Validation(format!(
                "Cannot change status from '{}' to '{}'",
                current.status, change.status
            )));
        }

        let update = StatusUpdate {
            status: change.status,
            ambulance_id: change
                .ambulance_id
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            expected_status: current.status,
            updated_at: now(),
        };
        let updated = self.store.update_status(current.id, &update).await?;
        info!(
            "Emergency request {} moved from {} to {}",
            updated.id, current.status, updated.status
        );

        self.notify_status_change(&updated).await;

        Ok(updated)
    }

    /// Visible to admins, the patient it was raised for and the assigned hospital.
    pub async fn get(&self, id: &str, viewer_id: Uuid, viewer_role: Role) -> DispatchResult<EmergencyRequest> {
        let record = self.store.get_by_id(id).await?;

        let allowed = viewer_role == Role::Admin
            || record.patient_id == viewer_id
            || record.hospital_id == Some(viewer_id);
        if !allowed {
            return Err(DispatchError::Forbidden(
                "Not authorized to view this emergency request".to_string(),
            ));
        }
        Ok(record)
    }

    /// Provider hospitals around a free-text address. Only an address that
    /// cannot be geocoded is an error; a failing place search yields nothing.
    pub async fn nearby_hospitals(&self, address: &str, radius_meters: u32) -> DispatchResult<Vec<NearbyHospital>> {
        if address.trim().is_empty() {
            return Err(DispatchError::Validation("Address is required".to_string()));
        }
        if radius_meters == 0 || radius_meters > MAX_SEARCH_RADIUS_METERS {
            return Err(DispatchError::Validation(format!(
                "Radius must be between 1 and {} meters",
                MAX_SEARCH_RADIUS_METERS
            )));
        }

        let location = match with_timeout(self.geocoder_timeout, self.geocoder.geocode(address)).await {
            Ok(Some(location)) => location,
            Ok(None) => return Err(DispatchError::Validation("Failed to geocode address".to_string())),
            Err(e) => {
                warn!("Geocoding '{}' failed: {}", address, e);
                return Err(DispatchError::Validation("Failed to geocode address".to_string()));
            }
        };

        let search = self.geocoder.nearby_hospitals(location, radius_meters);
        match with_timeout(self.geocoder_timeout, search).await {
            Ok(hospitals) => Ok(hospitals),
            Err(e) => {
                warn!("Nearby hospital search around {} failed: {}", location, e);
                Ok(Vec::new())
            }
        }
    }

    async fn lookup_address(&self, location: Coordinate) -> Option<Address> {
        match with_timeout(self.geocoder_timeout, self.geocoder.reverse_geocode(location)).await {
            Ok(address) => address,
            Err(e) => {
                warn!("Reverse geocoding {} failed, leaving address empty: {}", location, e);
                None
            }
        }
    }

    async fn notify_created(&self, record: &EmergencyRequest, patient: PatientProfile) {
        let directory = self.directory.clone();
        let notifier = self.notifier.clone();
        let record = record.clone();
        let request_id = record.id;

        let task = tokio::spawn(async move {
            let hospital_contact = async {
                match record.hospital_id {
                    Some(hospital_id) => contact_or_log(
                        directory.hospital_contact(hospital_id).await,
                        "hospital",
                        hospital_id,
                    ),
                    None => None,
                }
            };
            let patient_contact = async {
                contact_or_log(
                    directory.patient_contact(record.patient_id).await,
                    "patient",
                    record.patient_id,
                )
            };
            let (patient_contact, hospital_contact) = futures::join!(patient_contact, hospital_contact);

            notifier
                .notify_created(
                    &record,
                    Some(&patient),
                    patient_contact.as_ref(),
                    hospital_contact.as_ref(),
                )
                .await
        });

        settle(task, "Creation", request_id).await;
    }

    async fn notify_status_change(&self, record: &EmergencyRequest) {
        let directory = self.directory.clone();
        let notifier = self.notifier.clone();
        let record = record.clone();
        let request_id = record.id;

        let task = tokio::spawn(async move {
            let patient_contact = contact_or_log(
                directory.patient_contact(record.patient_id).await,
                "patient",
                record.patient_id,
            );
            notifier
                .notify_status_change(&record, patient_contact.as_ref(), record.status)
                .await
        });

        settle(task, "Status", request_id).await;
    }
}
