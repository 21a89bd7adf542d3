//! Best-effort delivery of dispatch updates over SMS and real-time push.
//!
//! Nothing in here returns an error to the caller: each channel failure is
//! logged and counted in the returned [`FanoutReport`].

use crate::models::emergency::{EmergencyRequest, EmergencyStatus};
use crate::models::realtime::{Room, EVENT_EMERGENCY, EVENT_EMERGENCY_CONFIRMED, EVENT_EMERGENCY_STATUS};
use crate::models::user::{Contact, PatientProfile, Role};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod kafka;
pub mod twilio;

pub use kafka::{KafkaRealtimePublisher, TracingRealtimePublisher};
pub use twilio::TwilioSmsSender;

pub const SMS_PREFIX: &str = "EMERGENCY ALERT: ";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Realtime channel unavailable: {0}")]
    Unavailable(String),
    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// `true` if the provider accepted the message.
    async fn send(&self, to_number: &str, message: &str) -> bool;
}

#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn emit(&self, room: Room, event: &str, payload: &Value) -> Result<(), NotifyError>;

    async fn emit_to_user(&self, user_id: Uuid, event: &str, payload: &Value) -> Result<(), NotifyError> {
        self.emit(Room::User(user_id), event, payload).await
    }

    async fn emit_to_role(&self, role: Role, event: &str, payload: &Value) -> Result<(), NotifyError> {
        self.emit(Room::Role(role), event, payload).await
    }
}

pub fn created_patient_message(eta_minutes: Option<i64>) -> String {
    let eta = eta_minutes
        .map(|m| m.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Your emergency request has been received. An ambulance will arrive in approximately {} minutes.",
        eta
    )
}

pub fn created_hospital_message(address: &str) -> String {
    format!(
        "Emergency request received. Patient location: {}. Please dispatch ambulance immediately.",
        address
    )
}

pub fn status_message(status: EmergencyStatus) -> String {
    match status {
        EmergencyStatus::Accepted => "Your emergency request has been accepted by the hospital.".to_string(),
        EmergencyStatus::Dispatched => "An ambulance has been dispatched to your location.".to_string(),
        EmergencyStatus::Completed => "Your emergency request has been completed.".to_string(),
        EmergencyStatus::Cancelled => "Your emergency request has been cancelled.".to_string(),
        other => format!("Your emergency request status has been updated to {}.", other),
    }
}

/// Whole minutes between creation and the estimated arrival.
pub fn eta_minutes(record: &EmergencyRequest) -> Option<i64> {
    record
        .estimated_arrival_time
        .map(|eta| (eta - record.created_at).num_seconds().max(0) / 60)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub sms_sent: usize,
    pub sms_failed: usize,
    pub pushes_sent: usize,
    pub pushes_failed: usize,
}

impl FanoutReport {
    /// `None` when there was nobody to text.
    fn sms(&mut self, outcome: Option<bool>) {
        match outcome {
            Some(true) => self.sms_sent += 1,
            Some(false) => self.sms_failed += 1,
            None => {}
        }
    }

    fn push(&mut self, room: Room, event: &str, result: Result<(), NotifyError>) {
        match result {
            Ok(()) => self.pushes_sent += 1,
            Err(e) => {
                warn!("Failed to emit '{}' to {}: {}", event, room, e);
                self.pushes_failed += 1;
            }
        }
    }
}

/// Fans a dispatch update out to SMS and real-time push. Every channel is
/// attempted concurrently so a slow one does not hold up the others.
pub struct NotificationFanout {
    sms: Arc<dyn SmsSender>,
    realtime: Arc<dyn RealtimePublisher>,
}

impl NotificationFanout {
    pub fn new(sms: Arc<dyn SmsSender>, realtime: Arc<dyn RealtimePublisher>) -> Self {
        Self { sms, realtime }
    }

    async fn send_sms(&self, contact: Option<&Contact>, message: &str) -> Option<bool> {
        let contact = contact?;
        match contact.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(phone) => {
                let ok = self.sms.send(phone, &format!("{}{}", SMS_PREFIX, message)).await;
                if !ok {
                    warn!("Emergency SMS to user {} was not delivered", contact.user_id);
                }
                Some(ok)
            }
            None => {
                debug!("User {} has no phone number, skipping SMS", contact.user_id);
                None
            }
        }
    }

    pub async fn notify_created(
        &self,
        record: &EmergencyRequest,
        patient: Option<&PatientProfile>,
        patient_contact: Option<&Contact>,
        hospital_contact: Option<&Contact>,
    ) -> FanoutReport {
        let now = Utc::now().to_rfc3339();
        let patient_message = created_patient_message(eta_minutes(record));
        let hospital_message = created_hospital_message(&record.display_address());

        let confirmation = json!({
            "message": "Emergency alert sent to nearby hospitals",
            "requestId": record.id,
            "hospitalId": record.hospital_id,
            "estimatedArrivalTime": record.estimated_arrival_time,
            "timestamp": now,
        });
        let alert = json!({
            "title": "Emergency Alert",
            "message": "Emergency request from a patient",
            "type": "emergency",
            "data": {
                "requestId": record.id,
                "userId": record.patient_id,
                "location": record.location,
                "address": record.address,
                "symptoms": record.symptoms,
                "hospitalId": record.hospital_id,
                "estimatedArrivalTime": record.estimated_arrival_time,
                "timestamp": now,
                "details": {
                    "bloodGroup": patient.and_then(|p| p.blood_group.clone()),
                    "allergies": patient.map(|p| p.allergies.clone()).unwrap_or_default(),
                    "notes": record.notes,
                },
            },
        });

        let hospital_sms = async {
            match record.hospital_id {
                Some(_) => self.send_sms(hospital_contact, &hospital_message).await,
                None => None,
            }
        };
        let (patient_sent, hospital_sent, confirmed, to_hospitals, to_admins) = futures::join!(
            self.send_sms(patient_contact, &patient_message),
            hospital_sms,
            self.realtime
                .emit_to_user(record.patient_id, EVENT_EMERGENCY_CONFIRMED, &confirmation),
            self.realtime.emit_to_role(Role::Hospital, EVENT_EMERGENCY, &alert),
            self.realtime.emit_to_role(Role::Admin, EVENT_EMERGENCY, &alert),
        );

        let mut report = FanoutReport::default();
        report.sms(patient_sent);
        report.sms(hospital_sent);
        report.push(Room::User(record.patient_id), EVENT_EMERGENCY_CONFIRMED, confirmed);
        report.push(Room::Role(Role::Hospital), EVENT_EMERGENCY, to_hospitals);
        report.push(Room::Role(Role::Admin), EVENT_EMERGENCY, to_admins);

        info!("Creation notifications for {}: {:?}", record.id, report);
        report
    }

    pub async fn notify_status_change(
        &self,
        record: &EmergencyRequest,
        patient_contact: Option<&Contact>,
        new_status: EmergencyStatus,
    ) -> FanoutReport {
        let message = status_message(new_status);
        let payload = json!({
            "requestId": record.id,
            "status": new_status,
            "ambulanceId": record.ambulance_id,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let (sent, pushed) = futures::join!(
            self.send_sms(patient_contact, &message),
            self.realtime
                .emit_to_user(record.patient_id, EVENT_EMERGENCY_STATUS, &payload),
        );

        let mut report = FanoutReport::default();
        report.sms(sent);
        report.push(Room::User(record.patient_id), EVENT_EMERGENCY_STATUS, pushed);

        info!("Status notifications for {} ({}): {:?}", record.id, new_status, report);
        report
    }
}
