use crate::models::emergency::Coordinate;
use crate::models::user::HospitalCandidate;
use crate::routing::{DistanceEstimator, TravelEstimate};
use std::sync::Arc;
use tracing::info;

/// Distances closer than this are treated as equal; the earlier candidate wins.
pub const DISTANCE_TIE_TOLERANCE_METERS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct NearestHospital {
    pub candidate: HospitalCandidate,
    pub travel: TravelEstimate,
}

pub struct HospitalLocator {
    estimator: Arc<DistanceEstimator>,
}

impl HospitalLocator {
    pub fn new(estimator: Arc<DistanceEstimator>) -> Self {
        Self { estimator }
    }

    pub async fn find_nearest(
        &self,
        origin: Coordinate,
        candidates: &[HospitalCandidate],
    ) -> Option<NearestHospital> {
        if candidates.is_empty() {
            return None;
        }

        let destinations: Vec<Coordinate> = candidates.iter().map(|c| c.location).collect();
        let estimates = self.estimator.estimate_many(origin, &destinations).await;

        let index = nearest_index(&estimates)?;
        let nearest = NearestHospital {
            candidate: candidates[index].clone(),
            travel: estimates[index],
        };

        info!(
            "Nearest hospital to {} is '{}' ({}) at {:.0} m, ~{} min ({:?})",
            origin,
            nearest.candidate.name,
            nearest.candidate.hospital_user_id,
            nearest.travel.distance_meters,
            nearest.travel.duration_minutes(),
            nearest.travel.source
        );
        Some(nearest)
    }
}

/// Index of the minimum distance, first occurrence winning ties.
pub fn nearest_index(estimates: &[TravelEstimate]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, estimate) in estimates.iter().enumerate() {
        match best {
            Some((_, best_distance))
                if estimate.distance_meters >= best_distance - DISTANCE_TIE_TOLERANCE_METERS => {}
            _ => best = Some((i, estimate.distance_meters)),
        }
    }
    best.map(|(i, _)| i)
}
