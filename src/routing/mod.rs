//! Travel distance/ETA estimation and nearest-hospital selection.
//!
//! Everything behind [`RoutingProvider`] and [`Geocoder`] is a soft dependency:
//! callers in this module turn provider errors into fallbacks, they never
//! surface them.

use crate::models::emergency::{Address, Coordinate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod estimator;
pub mod google;
pub mod locator;

pub use estimator::{DistanceEstimator, EstimatorSettings};
pub use locator::HospitalLocator;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Routing provider not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Provider returned status {0}")]
    Status(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for RoutingError {
    fn from(e: reqwest::Error) -> Self {
        RoutingError::Http(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelEstimate {
    pub distance_meters: f64,
    pub duration_seconds: i64,
    pub source: EstimateSource,
}

impl TravelEstimate {
    pub fn from_provider(distance_meters: f64, duration_seconds: i64) -> Self {
        Self {
            distance_meters,
            duration_seconds,
            source: EstimateSource::Provider,
        }
    }

    /// Whole minutes, as shown to patients.
    pub fn duration_minutes(&self) -> i64 {
        self.duration_seconds / 60
    }
}

/// A hospital returned by the provider's place search (not necessarily
/// registered with us).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyHospital {
    pub name: String,
    pub place_id: String,
    pub location: Coordinate,
    pub vicinity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

/// Driving-mode routing backend.
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<TravelEstimate, RoutingError>;

    /// One origin against many destinations in a single round trip. The result
    /// has one slot per destination, `None` where the provider found no route.
    async fn matrix(
        &self,
        origin: Coordinate,
        destinations: &[Coordinate],
    ) -> Result<Vec<Option<TravelEstimate>>, RoutingError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, RoutingError>;

    async fn reverse_geocode(&self, location: Coordinate) -> Result<Option<Address>, RoutingError>;

    async fn nearby_hospitals(
        &self,
        location: Coordinate,
        radius_meters: u32,
    ) -> Result<Vec<NearbyHospital>, RoutingError>;
}
