use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form, display-only address (formatted_address, city, state, ...).
pub type Address = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyStatus {
    Pending,
    Accepted,
    Dispatched,
    Completed,
    Cancelled,
}

impl EmergencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyStatus::Pending => "pending",
            EmergencyStatus::Accepted => "accepted",
            EmergencyStatus::Dispatched => "dispatched",
            EmergencyStatus::Completed => "completed",
            EmergencyStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step. Completed and Cancelled are terminal.
    pub fn allowed_next(&self) -> &'static [EmergencyStatus] {
        use EmergencyStatus::*;
        match self {
            Pending => &[Accepted, Cancelled],
            Accepted => &[Dispatched, Cancelled],
            Dispatched => &[Completed],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: EmergencyStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmergencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(EmergencyStatus::Pending),
            "accepted" => Ok(EmergencyStatus::Accepted),
            "dispatched" => Ok(EmergencyStatus::Dispatched),
            "completed" => Ok(EmergencyStatus::Completed),
            "cancelled" => Ok(EmergencyStatus::Cancelled),
            other => Err(format!("unknown emergency status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRequest {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub location: Coordinate,
    pub address: Option<Address>,
    pub symptoms: Vec<String>,
    pub notes: Option<String>,
    pub status: EmergencyStatus,
    pub hospital_id: Option<Uuid>,
    pub ambulance_id: Option<String>,
    pub estimated_arrival_time: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmergencyRequest {
    /// Human readable address for messages, "Unknown" when none was given.
    pub fn display_address(&self) -> String {
        match &self.address {
            Some(address) if !address.is_empty() => match address.get("formatted_address") {
                Some(formatted) => formatted.clone(),
                None => address.values().cloned().collect::<Vec<_>>().join(", "),
            },
            _ => "Unknown".to_string(),
        }
    }
}

/// Body of `POST /emergency`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEmergencyRequest {
    pub patient_id: String,
    pub location: Coordinate,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `PATCH /emergency/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub status: EmergencyStatus,
    #[serde(default)]
    pub ambulance_id: Option<String>,
    #[serde(default)]
    pub expected_status: Option<EmergencyStatus>,
}

/// Partial update applied by the store. The write only lands if the stored
/// status still equals `expected_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: EmergencyStatus,
    pub ambulance_id: Option<String>,
    pub expected_status: EmergencyStatus,
    pub updated_at: DateTime<Utc>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(v.unwrap_or_default())
}
