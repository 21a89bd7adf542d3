use crate::models::emergency::Coordinate;
use crate::routing::{EstimateSource, RoutingError, RoutingProvider, TravelEstimate};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Provider durations above this are treated as garbage.
pub const MAX_PLAUSIBLE_DURATION_SECS: i64 = 24 * 60 * 60;

/// Runs a provider call, turning an overrun of `timeout` into a
/// [`RoutingError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, RoutingError>
where
    F: Future<Output = Result<T, RoutingError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RoutingError::Timeout(timeout)),
    }
}

/// Great-circle distance in meters.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards asin against rounding just above 1.0 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    c * EARTH_RADIUS_METERS
}

#[derive(Debug, Clone)]
pub struct EstimatorSettings {
    pub timeout: Duration,
    pub fallback_duration_secs: i64,
    pub max_failures: u32,
    pub cooldown: Duration,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            fallback_duration_secs: 1800,
            max_failures: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Wraps a [`RoutingProvider`] so that every call yields an estimate.
///
/// Provider errors, timeouts and unusable answers fall back to haversine
/// distance with a fixed duration. After `max_failures` consecutive provider
/// failures the provider is skipped entirely for `cooldown`.
pub struct DistanceEstimator {
    provider: Arc<dyn RoutingProvider>,
    settings: EstimatorSettings,
    breaker: Mutex<BreakerState>,
}

impl DistanceEstimator {
    pub fn new(provider: Arc<dyn RoutingProvider>, settings: EstimatorSettings) -> Self {
        Self {
            provider,
            settings,
            breaker: Mutex::new(BreakerState::default()),
        }
    }

    pub async fn estimate_travel(&self, origin: Coordinate, destination: Coordinate) -> TravelEstimate {
        if self.circuit_open() {
            debug!("Routing circuit open, using haversine for {} -> {}", origin, destination);
            return self.fallback(origin, destination);
        }

        match self.bounded(self.provider.route(origin, destination)).await {
            Ok(estimate) => {
                self.record_success();
                self.accept(estimate, origin, destination)
            }
            Err(e) => {
                warn!(
                    "Routing provider '{}' failed for {} -> {}: {}. Falling back to haversine",
                    self.provider.name(),
                    origin,
                    destination,
                    e
                );
                self.record_failure();
                self.fallback(origin, destination)
            }
        }
    }

    /// Estimates for `origin` against every destination, same order and length.
    pub async fn estimate_many(&self, origin: Coordinate, destinations: &[Coordinate]) -> Vec<TravelEstimate> {
        if destinations.is_empty() {
            return Vec::new();
        }

        let all_fallback = || {
            destinations
                .iter()
                .map(|d| self.fallback(origin, *d))
                .collect::<Vec<_>>()
        };

        if self.circuit_open() {
            debug!("Routing circuit open, using haversine for {} destinations", destinations.len());
            return all_fallback();
        }

        let outcome = match self.bounded(self.provider.matrix(origin, destinations)).await {
            Ok(row) if row.len() == destinations.len() => Ok(row),
            Ok(row) => Err(RoutingError::Parse(format!(
                "matrix returned {} elements for {} destinations",
                row.len(),
                destinations.len()
            ))),
            Err(e) => Err(e),
        };

        let row = match outcome {
            Ok(row) => row,
            Err(e) => {
                warn!(
                    "Distance matrix from '{}' failed: {}. Estimating each candidate separately",
                    self.provider.name(),
                    e
                );
                self.record_failure();
                if self.circuit_open() {
                    return all_fallback();
                }
                let pairs = destinations.iter().map(|d| self.estimate_travel(origin, *d));
                return futures::future::join_all(pairs).await;
            }
        };

        self.record_success();
        row.into_iter()
            .zip(destinations)
            .map(|(element, destination)| match element {
                Some(estimate) => self.accept(estimate, origin, *destination),
                None => self.fallback(origin, *destination),
            })
            .collect()
    }

    pub fn fallback(&self, origin: Coordinate, destination: Coordinate) -> TravelEstimate {
        TravelEstimate {
            distance_meters: haversine_distance(origin, destination),
            duration_seconds: self
                .settings
                .fallback_duration_secs
                .clamp(1, MAX_PLAUSIBLE_DURATION_SECS),
            source: EstimateSource::Fallback,
        }
    }

    fn accept(&self, estimate: TravelEstimate, origin: Coordinate, destination: Coordinate) -> TravelEstimate {
        if !estimate.distance_meters.is_finite()
            || estimate.distance_meters < 0.0
            || estimate.duration_seconds > MAX_PLAUSIBLE_DURATION_SECS
        {
            warn!(
                "Discarding provider estimate {} m / {} s for {} -> {}",
                estimate.distance_meters, estimate.duration_seconds, origin, destination
            );
            return self.fallback(origin, destination);
        }
        TravelEstimate {
            duration_seconds: estimate.duration_seconds.max(1),
            ..estimate
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, RoutingError>
    where
        F: Future<Output = Result<T, RoutingError>>,
    {
        with_timeout(self.settings.timeout, call).await
    }

    fn circuit_open(&self) -> bool {
        let mut state = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        match state.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                state.open_until = None;
                state.consecutive_failures = 0;
                info!("Routing circuit breaker reset. Resuming provider calls.");
                false
            }
            None => false,
        }
    }

    fn record_success(&self) {
        let mut state = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let mut state = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures += 1;
        if self.settings.max_failures > 0 && state.consecutive_failures >= self.settings.max_failures {
            warn!(
                "Routing circuit breaker tripped ({} consecutive failures)! Skipping provider for {:?}",
                state.consecutive_failures, self.settings.cooldown
            );
            state.open_until = Some(Instant::now() + self.settings.cooldown);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const BANGALORE: Coordinate = Coordinate {
        latitude: 12.9716,
        longitude: 77.5946,
    };
    pub const KORAMANGALA: Coordinate = Coordinate {
        latitude: 12.9352,
        longitude: 77.6146,
    };

    /// Always fails, counting calls.
    #[derive(Default)]
    pub struct DownProvider {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl RoutingProvider for DownProvider {
        async fn route(&self, _: Coordinate, _: Coordinate) -> Result<TravelEstimate, RoutingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RoutingError::Http("connection refused".into()))
        }

        async fn matrix(
            &self,
            _: Coordinate,
            _: &[Coordinate],
        ) -> Result<Vec<Option<TravelEstimate>>, RoutingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RoutingError::Status("OVER_QUERY_LIMIT".into()))
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    /// Answers from a canned matrix row.
    pub struct CannedProvider {
        pub row: Vec<Option<TravelEstimate>>,
    }

    #[async_trait]
    impl RoutingProvider for CannedProvider {
        async fn route(&self, _: Coordinate, _: Coordinate) -> Result<TravelEstimate, RoutingError> {
            self.row
                .first()
                .copied()
                .flatten()
                .ok_or_else(|| RoutingError::Status("ZERO_RESULTS".into()))
        }

        async fn matrix(
            &self,
            _: Coordinate,
            _: &[Coordinate],
        ) -> Result<Vec<Option<TravelEstimate>>, RoutingError> {
            Ok(self.row.clone())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl RoutingProvider for SlowProvider {
        async fn route(&self, _: Coordinate, _: Coordinate) -> Result<TravelEstimate, RoutingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TravelEstimate::from_provider(10.0, 10))
        }

        async fn matrix(
            &self,
            _: Coordinate,
            destinations: &[Coordinate],
        ) -> Result<Vec<Option<TravelEstimate>>, RoutingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![None; destinations.len()])
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn settings() -> EstimatorSettings {
        EstimatorSettings {
            timeout: Duration::from_millis(50),
            ..EstimatorSettings::default()
        }
    }

    #[test]
    fn test_haversine_bangalore() {
        let d = haversine_distance(BANGALORE, KORAMANGALA);
        assert!((d - 4_591.0).abs() < 25.0, "got {}", d);
        assert_eq!(haversine_distance(BANGALORE, BANGALORE), 0.0);
        assert!((haversine_distance(KORAMANGALA, BANGALORE) - d).abs() < 1e-6);
    }

    #[test]
    fn test_haversine_antipodes() {
        let d = haversine_distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_provider_down_falls_back() {
        let estimator = DistanceEstimator::new(Arc::new(DownProvider::default()), settings());
        let estimate = estimator.estimate_travel(BANGALORE, KORAMANGALA).await;

        assert_eq!(estimate.source, EstimateSource::Fallback);
        assert_eq!(estimate.duration_seconds, 1800);
        assert_eq!(estimate.duration_minutes(), 30);
        assert!((4_000.0..5_000.0).contains(&estimate.distance_meters));
    }

    #[tokio::test]
    async fn test_provider_timeout_falls_back() {
        let estimator = DistanceEstimator::new(Arc::new(SlowProvider), settings());
        let started = Instant::now();
        let estimate = estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(estimate.source, EstimateSource::Fallback);

        let batch = estimator.estimate_many(BANGALORE, &[KORAMANGALA, BANGALORE]).await;
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|e| e.source == EstimateSource::Fallback));
        assert_eq!(batch[1].distance_meters, 0.0);
    }

    #[tokio::test]
    async fn test_provider_answer_is_used() {
        let provider = CannedProvider {
            row: vec![Some(TravelEstimate::from_provider(6_200.0, 960))],
        };
        let estimator = DistanceEstimator::new(Arc::new(provider), settings());
        let estimate = estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        assert_eq!(estimate, TravelEstimate::from_provider(6_200.0, 960));
    }

    #[tokio::test]
    async fn test_matrix_missing_element_uses_same_fallback() {
        let provider = CannedProvider {
            row: vec![
                Some(TravelEstimate::from_provider(7_000.0, 900)),
                None,
                Some(TravelEstimate::from_provider(-1.0, 0)),
            ],
        };
        let estimator = DistanceEstimator::new(Arc::new(provider), settings());
        let destinations = [KORAMANGALA, KORAMANGALA, KORAMANGALA];
        let estimates = estimator.estimate_many(BANGALORE, &destinations).await;

        assert_eq!(estimates[0].source, EstimateSource::Provider);
        assert_eq!(estimates[1], estimator.fallback(BANGALORE, KORAMANGALA));
        assert_eq!(estimates[2], estimator.fallback(BANGALORE, KORAMANGALA));
        let single = DistanceEstimator::new(Arc::new(DownProvider::default()), settings())
            .estimate_travel(BANGALORE, KORAMANGALA)
            .await;
        assert_eq!(estimates[1], single);
    }

    #[tokio::test]
    async fn test_matrix_wrong_length_retries_each_pair() {
        let provider = CannedProvider {
            row: vec![Some(TravelEstimate::from_provider(1.0, 1))],
        };
        let estimator = DistanceEstimator::new(Arc::new(provider), settings());
        let estimates = estimator.estimate_many(BANGALORE, &[KORAMANGALA, BANGALORE]).await;
        assert_eq!(estimates.len(), 2);
        assert!(estimates
            .iter()
            .all(|e| *e == TravelEstimate::from_provider(1.0, 1)));
    }

    #[tokio::test]
    async fn test_matrix_failure_routes_each_candidate() {
        let provider = Arc::new(DownProvider::default());
        let estimator = DistanceEstimator::new(provider.clone(), settings());

        let estimates = estimator
            .estimate_many(BANGALORE, &[KORAMANGALA, BANGALORE, KORAMANGALA])
            .await;

        // One matrix call, then one route call per candidate.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(estimates[0], estimator.fallback(BANGALORE, KORAMANGALA));
        assert_eq!(estimates[1].distance_meters, 0.0);
    }

    #[tokio::test]
    async fn test_matrix_failure_tripping_breaker_skips_pairs() {
        let provider = Arc::new(DownProvider::default());
        let estimator = DistanceEstimator::new(
            provider.clone(),
            EstimatorSettings {
                max_failures: 1,
                cooldown: Duration::from_secs(600),
                ..settings()
            },
        );

        let estimates = estimator.estimate_many(BANGALORE, &[KORAMANGALA, BANGALORE]).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(estimates.iter().all(|e| e.source == EstimateSource::Fallback));
    }

    #[tokio::test]
    async fn test_absurd_duration_falls_back() {
        let provider = CannedProvider {
            row: vec![
                Some(TravelEstimate::from_provider(4_000.0, i64::MAX / 2)),
                Some(TravelEstimate::from_provider(4_000.0, MAX_PLAUSIBLE_DURATION_SECS + 1)),
            ],
        };
        let estimator = DistanceEstimator::new(Arc::new(provider), settings());

        let single = estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        assert_eq!(single, estimator.fallback(BANGALORE, KORAMANGALA));

        let batch = estimator.estimate_many(BANGALORE, &[KORAMANGALA, KORAMANGALA]).await;
        assert!(batch.iter().all(|e| e.source == EstimateSource::Fallback));
        assert!(batch.iter().all(|e| e.duration_seconds == 1800));
    }

    #[tokio::test]
    async fn test_fallback_duration_is_bounded() {
        let estimator = DistanceEstimator::new(
            Arc::new(DownProvider::default()),
            EstimatorSettings {
                fallback_duration_secs: i64::MAX,
                ..settings()
            },
        );
        let estimate = estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        assert_eq!(estimate.duration_seconds, MAX_PLAUSIBLE_DURATION_SECS);
    }

    #[tokio::test]
    async fn test_with_timeout_reports_overrun() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, RoutingError>(())
        };
        let result = with_timeout(Duration::from_millis(20), slow).await;
        assert!(matches!(result, Err(RoutingError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_zero_duration_is_clamped_positive() {
        let provider = CannedProvider {
            row: vec![Some(TravelEstimate::from_provider(0.0, 0))],
        };
        let estimator = DistanceEstimator::new(Arc::new(provider), settings());
        let estimate = estimator.estimate_travel(BANGALORE, BANGALORE).await;
        assert_eq!(estimate.distance_meters, 0.0);
        assert_eq!(estimate.duration_seconds, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_skips_provider() {
        let provider = Arc::new(DownProvider::default());
        let estimator = DistanceEstimator::new(
            provider.clone(),
            EstimatorSettings {
                max_failures: 2,
                cooldown: Duration::from_secs(600),
                ..settings()
            },
        );

        for _ in 0..5 {
            estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        }
        estimator.estimate_many(BANGALORE, &[KORAMANGALA]).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_circuit_breaker_resets_after_cooldown() {
        let provider = Arc::new(DownProvider::default());
        let estimator = DistanceEstimator::new(
            provider.clone(),
            EstimatorSettings {
                max_failures: 1,
                cooldown: Duration::from_millis(10),
                ..settings()
            },
        );

        estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        estimator.estimate_travel(BANGALORE, KORAMANGALA).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
