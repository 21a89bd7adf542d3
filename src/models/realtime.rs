use crate::models::user::Role;
use std::fmt;
use uuid::Uuid;

/// Wire format consumed by the socket gateway: one envelope per room emit.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RealtimeEnvelope {
    #[prost(string, tag = "1")]
    pub room: String,
    #[prost(string, tag = "2")]
    pub event: String,
    #[prost(string, tag = "3")]
    pub payload_json: String,
    #[prost(int64, tag = "4")]
    pub emitted_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Room {
    User(Uuid),
    Role(Role),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{}", id),
            Room::Role(role) => write!(f, "role:{}", role),
        }
    }
}

pub const EVENT_EMERGENCY: &str = "emergency";
pub const EVENT_EMERGENCY_CONFIRMED: &str = "emergency_confirmed";
pub const EVENT_EMERGENCY_STATUS: &str = "emergency_status";
