//! Google Maps web-service client (directions, distance matrix, geocoding,
//! places).

use crate::models::emergency::{Address, Coordinate};
use crate::routing::{Geocoder, NearbyHospital, RoutingError, RoutingProvider, TravelEstimate};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

pub struct GoogleMapsClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleMapsClient {
    pub fn new(api_key: &str, base_url: &str, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, RoutingError> {
        if !self.is_configured() {
            error!("Google Maps client not initialized");
            return Err(RoutingError::NotConfigured);
        }

        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("key", self.api_key.clone()));

        let json: Value = self
            .client
            .get(format!("{}/{}/json", self.base_url, endpoint))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("Google Maps {} answered with status {:?}", endpoint, json.get("status"));
        Ok(json)
    }
}

fn top_level_status(json: &Value) -> Result<&str, RoutingError> {
    json.get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| RoutingError::Parse("Missing status".to_string()))
}

fn ensure_ok(json: &Value) -> Result<(), RoutingError> {
    match top_level_status(json)? {
        "OK" => Ok(()),
        other => {
            let detail = json
                .get("error_message")
                .and_then(Value::as_str)
                .map(|m| format!("{}: {}", other, m))
                .unwrap_or_else(|| other.to_string());
            Err(RoutingError::Status(detail))
        }
    }
}

fn leg_estimate(leg: &Value) -> Option<TravelEstimate> {
    let distance = leg.pointer("/distance/value").and_then(Value::as_f64)?;
    let duration = leg.pointer("/duration/value").and_then(Value::as_i64)?;
    Some(TravelEstimate::from_provider(distance, duration))
}

fn parse_location(value: &Value) -> Option<Coordinate> {
    Some(Coordinate::new(
        value.get("lat").and_then(Value::as_f64)?,
        value.get("lng").and_then(Value::as_f64)?,
    ))
}

pub fn parse_directions(json: &Value) -> Result<TravelEstimate, RoutingError> {
    ensure_ok(json)?;
    json.pointer("/routes/0/legs/0")
        .and_then(leg_estimate)
        .ok_or_else(|| RoutingError::Parse("Missing routes[0].legs[0] distance/duration".to_string()))
}

pub fn parse_distance_matrix(json: &Value, expected: usize) -> Result<Vec<Option<TravelEstimate>>, RoutingError> {
    ensure_ok(json)?;
    let elements = json
        .pointer("/rows/0/elements")
        .and_then(Value::as_array)
        .ok_or_else(|| RoutingError::Parse("Missing rows[0].elements".to_string()))?;

    if elements.len() != expected {
        return Err(RoutingError::Parse(format!(
            "Expected {} matrix elements, got {}",
            expected,
            elements.len()
        )));
    }

    Ok(elements
        .iter()
        .map(|element| match element.get("status").and_then(Value::as_str) {
            Some("OK") => leg_estimate(element),
            _ => None,
        })
        .collect())
}

pub fn parse_geocode(json: &Value) -> Result<Option<Coordinate>, RoutingError> {
    if top_level_status(json)? == "ZERO_RESULTS" {
        return Ok(None);
    }
    ensure_ok(json)?;
    Ok(json.pointer("/results/0/geometry/location").and_then(parse_location))
}

pub fn parse_reverse_geocode(json: &Value) -> Result<Option<Address>, RoutingError> {
    if top_level_status(json)? == "ZERO_RESULTS" {
        return Ok(None);
    }
    ensure_ok(json)?;

    let Some(result) = json.pointer("/results/0") else {
        return Ok(None);
    };

    let mut address = Address::new();
    if let Some(formatted) = result.get("formatted_address").and_then(Value::as_str) {
        address.insert("formatted_address".to_string(), formatted.to_string());
    }

    let components = result
        .get("address_components")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for component in &components {
        let Some(name) = component.get("long_name").and_then(Value::as_str) else {
            continue;
        };
        let types: Vec<&str> = component
            .get("types")
            .and_then(Value::as_array)
            .map(|t| t.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let key = if types.contains(&"locality") {
            "city"
        } else if types.contains(&"administrative_area_level_1") {
            "state"
        } else if types.contains(&"country") {
            "country"
        } else if types.contains(&"postal_code") {
            "postal_code"
        } else {
            continue;
        };
        address.insert(key.to_string(), name.to_string());
    }

    Ok(Some(address))
}

pub fn parse_nearby_hospitals(json: &Value) -> Result<Vec<NearbyHospital>, RoutingError> {
    if top_level_status(json)? == "ZERO_RESULTS" {
        return Ok(Vec::new());
    }
    ensure_ok(json)?;

    let results = json
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| RoutingError::Parse("Missing results".to_string()))?;

    Ok(results
        .iter()
        .filter_map(|place| {
            Some(NearbyHospital {
                name: place.get("name").and_then(Value::as_str)?.to_string(),
                place_id: place.get("place_id").and_then(Value::as_str)?.to_string(),
                location: place.pointer("/geometry/location").and_then(parse_location)?,
                vicinity: place
                    .get("vicinity")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                rating: place.get("rating").and_then(Value::as_f64),
            })
        })
        .collect())
}

#[async_trait]
impl RoutingProvider for GoogleMapsClient {
    async fn route(&self, origin: Coordinate, destination: Coordinate) -> Result<TravelEstimate, RoutingError> {
        let json = self
            .get_json(
                "directions",
                &[
                    ("origin", origin.to_string()),
                    ("destination", destination.to_string()),
                    ("mode", "driving".to_string()),
                ],
            )
            .await?;
        parse_directions(&json)
    }

    async fn matrix(
        &self,
        origin: Coordinate,
        destinations: &[Coordinate],
    ) -> Result<Vec<Option<TravelEstimate>>, RoutingError> {
        let joined = destinations
            .iter()
            .map(Coordinate::to_string)
            .collect::<Vec<_>>()
            .join("|");

        let json = self
            .get_json(
                "distancematrix",
                &[
                    ("origins", origin.to_string()),
                    ("destinations", joined),
                    ("mode", "driving".to_string()),
                    ("units", "metric".to_string()),
                ],
            )
            .await?;
        parse_distance_matrix(&json, destinations.len())
    }

    fn name(&self) -> &str {
        "google_maps"
    }
}

#[async_trait]
impl Geocoder for GoogleMapsClient {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, RoutingError> {
        let json = self.get_json("geocode", &[("address", address.to_string())]).await?;
        parse_geocode(&json)
    }

    async fn reverse_geocode(&self, location: Coordinate) -> Result<Option<Address>, RoutingError> {
        let json = self.get_json("geocode", &[("latlng", location.to_string())]).await?;
        parse_reverse_geocode(&json)
    }

    async fn nearby_hospitals(
        &self,
        location: Coordinate,
        radius_meters: u32,
    ) -> Result<Vec<NearbyHospital>, RoutingError> {
        let json = self
            .get_json(
                "place/nearbysearch",
                &[
                    ("location", location.to_string()),
                    ("radius", radius_meters.to_string()),
                    ("type", "hospital".to_string()),
                ],
            )
            .await?;
        parse_nearby_hospitals(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_directions() {
        let raw = json!({
            "status": "OK",
            "routes": [{ "legs": [{
                "distance": { "text": "6.2 km", "value": 6211 },
                "duration": { "text": "19 mins", "value": 1143 }
            }]}]
        });
        let estimate = parse_directions(&raw).unwrap();
        assert_eq!(estimate, TravelEstimate::from_provider(6211.0, 1143));
        assert_eq!(estimate.duration_minutes(), 19);
    }

    #[test]
    fn test_parse_directions_denied() {
        let raw = json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid.",
            "routes": []
        });
        match parse_directions(&raw) {
            Err(RoutingError::Status(msg)) => assert!(msg.starts_with("REQUEST_DENIED")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_distance_matrix_mixed_elements() {
        let raw = json!({
            "status": "OK",
            "rows": [{ "elements": [
                { "status": "OK", "distance": { "value": 5300 }, "duration": { "value": 840 } },
                { "status": "ZERO_RESULTS" },
                { "status": "OK", "distance": { "value": 2100 } }
            ]}]
        });
        let row = parse_distance_matrix(&raw, 3).unwrap();
        assert_eq!(row[0], Some(TravelEstimate::from_provider(5300.0, 840)));
        assert_eq!(row[1], None);
        assert_eq!(row[2], None);

        assert!(matches!(parse_distance_matrix(&raw, 2), Err(RoutingError::Parse(_))));
    }

    #[test]
    fn test_parse_geocode() {
        let raw = json!({
            "status": "OK",
            "results": [{ "geometry": { "location": { "lat": 12.9716, "lng": 77.5946 } } }]
        });
        assert_eq!(parse_geocode(&raw).unwrap(), Some(Coordinate::new(12.9716, 77.5946)));
        assert_eq!(parse_geocode(&json!({ "status": "ZERO_RESULTS", "results": [] })).unwrap(), None);
        assert!(parse_geocode(&json!({ "results": [] })).is_err());
    }

    #[test]
    fn test_parse_reverse_geocode() {
        let raw = json!({
            "status": "OK",
            "results": [{
                "formatted_address": "MG Road, Bengaluru, Karnataka 560001, India",
                "address_components": [
                    { "long_name": "MG Road", "types": ["route"] },
                    { "long_name": "Bengaluru", "types": ["locality", "political"] },
                    { "long_name": "Karnataka", "types": ["administrative_area_level_1", "political"] },
                    { "long_name": "India", "types": ["country", "political"] },
                    { "long_name": "560001", "types": ["postal_code"] }
                ]
            }]
        });
        let address = parse_reverse_geocode(&raw).unwrap().unwrap();
        assert_eq!(address.get("city").map(String::as_str), Some("Bengaluru"));
        assert_eq!(address.get("state").map(String::as_str), Some("Karnataka"));
        assert_eq!(address.get("postal_code").map(String::as_str), Some("560001"));
        assert_eq!(address.len(), 5);
    }

    #[test]
    fn test_parse_nearby_hospitals() {
        let raw = json!({
            "status": "OK",
            "results": [
                {
                    "name": "St. John's Medical College Hospital",
                    "place_id": "ChIJ-abc",
                    "geometry": { "location": { "lat": 12.9298, "lng": 77.6206 } },
                    "vicinity": "Sarjapur Road, Koramangala",
                    "rating": 4.2
                },
                { "name": "No geometry", "place_id": "ChIJ-def" }
            ]
        });
        let hospitals = parse_nearby_hospitals(&raw).unwrap();
        assert_eq!(hospitals.len(), 1);
        assert_eq!(hospitals[0].rating, Some(4.2));
        assert_eq!(hospitals[0].location, Coordinate::new(12.9298, 77.6206));
    }

    #[tokio::test]
    async fn test_unconfigured_client_errors_without_network() {
        let client = GoogleMapsClient::new("", "http://127.0.0.1:9/", reqwest::Client::new());
        assert!(!client.is_configured());
        let result = client
            .route(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0))
            .await;
        assert!(matches!(result, Err(RoutingError::NotConfigured)));
    }
}
