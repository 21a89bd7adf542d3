use crate::db::queries;
use crate::db::DbPool;
use crate::error::{DispatchError, DispatchResult};
use crate::models::emergency::{Address, Coordinate, EmergencyRequest, EmergencyStatus, StatusUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

/// Persistence for emergency requests. The only component allowed to write them.
#[async_trait]
pub trait EmergencyStore: Send + Sync {
    async fn insert(&self, record: &EmergencyRequest) -> DispatchResult<EmergencyRequest>;

    /// Fails with `Validation` for a malformed id and `NotFound` for a
    /// well-formed id with no record.
    async fn get_by_id(&self, id: &str) -> DispatchResult<EmergencyRequest>;

    /// Changes `status`, `ambulance_id` (when given) and `updated_at` only.
    /// Fails with `Conflict` if the stored status is no longer
    /// `update.expected_status`.
    async fn update_status(&self, id: Uuid, update: &StatusUpdate) -> DispatchResult<EmergencyRequest>;
}

pub fn parse_request_id(raw: &str) -> DispatchResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| DispatchError::invalid_id("emergency request", raw))
}

pub fn request_not_found() -> DispatchError {
    DispatchError::NotFound("Emergency request".to_string())
}

pub fn stale_status(id: Uuid, expected: EmergencyStatus, actual: EmergencyStatus) -> DispatchError {
    DispatchError::Conflict(format!(
        "Emergency request {} is '{}', expected '{}'",
        id, actual, expected
    ))
}

pub struct PgEmergencyStore {
    pool: DbPool,
}

impl PgEmergencyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_status(raw: &str) -> Result<EmergencyStatus, sqlx::Error> {
    raw.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))
}

fn row_to_request(row: &PgRow) -> Result<EmergencyRequest, sqlx::Error> {
    let address: Option<Json<Address>> = row.try_get("address")?;
    let status: String = row.try_get("status")?;

    Ok(EmergencyRequest {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        location: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
        address: address.map(|a| a.0),
        symptoms: row.try_get("symptoms")?,
        notes: row.try_get("notes")?,
        status: decode_status(&status)?,
        hospital_id: row.try_get("hospital_id")?,
        ambulance_id: row.try_get("ambulance_id")?,
        estimated_arrival_time: row.try_get::<Option<DateTime<Utc>>, _>("estimated_arrival_time")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl EmergencyStore for PgEmergencyStore {
    async fn insert(&self, record: &EmergencyRequest) -> DispatchResult<EmergencyRequest> {
        let row = sqlx::query(queries::INSERT_EMERGENCY_REQUEST)
            .bind(record.id)
            .bind(record.patient_id)
            .bind(record.location.latitude)
            .bind(record.location.longitude)
            .bind(record.address.clone().map(Json))
            .bind(&record.symptoms)
            .bind(&record.notes)
            .bind(record.status.as_str())
            .bind(record.hospital_id)
            .bind(&record.ambulance_id)
            .bind(record.estimated_arrival_time)
            .bind(record.created_by)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(row_to_request(&row)?)
    }

    async fn get_by_id(&self, id: &str) -> DispatchResult<EmergencyRequest> {
        let id = parse_request_id(id)?;
        let row = sqlx::query(queries::SELECT_EMERGENCY_REQUEST)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(request_not_found)?;

        Ok(row_to_request(&row)?)
    }

    async fn update_status(&self, id: Uuid, update: &StatusUpdate) -> DispatchResult<EmergencyRequest> {
        let updated = sqlx::query(queries::UPDATE_EMERGENCY_STATUS)
            .bind(id)
            .bind(update.status.as_str())
            .bind(&update.ambulance_id)
            .bind(update.updated_at)
            .bind(update.expected_status.as_str())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Ok(row_to_request(&row)?);
        }

        // Nothing matched: tell a vanished record apart from a lost race.
        let current = sqlx::query(queries::SELECT_EMERGENCY_STATUS)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(request_not_found)?;
        let actual: String = current.try_get("status")?;

        Err(stale_status(id, update.expected_status, decode_status(&actual)?))
    }
}
