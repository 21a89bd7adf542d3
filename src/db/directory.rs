use crate::db::queries;
use crate::db::DbPool;
use crate::error::DispatchResult;
use crate::models::emergency::Coordinate;
use crate::models::user::{Contact, HospitalCandidate, PatientProfile};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

/// Read-only view of the user/patient/hospital profiles owned by the account
/// service.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_patient(&self, user_id: Uuid) -> DispatchResult<Option<PatientProfile>>;

    /// Hospitals with emergency services enabled and a known location, in a
    /// stable order.
    async fn list_emergency_hospitals(&self) -> DispatchResult<Vec<HospitalCandidate>>;

    async fn hospital_contact(&self, user_id: Uuid) -> DispatchResult<Option<Contact>>;

    async fn patient_contact(&self, user_id: Uuid) -> DispatchResult<Option<Contact>>;
}

pub struct PgDirectory {
    pool: DbPool,
}

impl PgDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn contact(&self, query: &str, user_id: Uuid) -> DispatchResult<Option<Contact>> {
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(Contact {
                user_id: row.try_get("id")?,
                phone: row.try_get("phone")?,
            }),
            None => None,
        })
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_patient(&self, user_id: Uuid) -> DispatchResult<Option<PatientProfile>> {
        let row = sqlx::query(queries::SELECT_PATIENT)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(PatientProfile {
                user_id: row.try_get("user_id")?,
                blood_group: row.try_get("blood_group")?,
                allergies: row.try_get("allergies")?,
            }),
            None => None,
        })
    }

    async fn list_emergency_hospitals(&self) -> DispatchResult<Vec<HospitalCandidate>> {
        let rows = sqlx::query(queries::SELECT_EMERGENCY_HOSPITALS)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            candidates.push(HospitalCandidate {
                hospital_user_id: row.try_get("user_id")?,
                location: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
                name: row.try_get("name")?,
            });
        }
        Ok(candidates)
    }

    async fn hospital_contact(&self, user_id: Uuid) -> DispatchResult<Option<Contact>> {
        self.contact(queries::SELECT_HOSPITAL_CONTACT, user_id).await
    }

    async fn patient_contact(&self, user_id: Uuid) -> DispatchResult<Option<Contact>> {
        self.contact(queries::SELECT_PATIENT_CONTACT, user_id).await
    }
}
