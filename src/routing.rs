//! Routing/geocoding collaborator: nearby facility search and the
//! origin-to-candidates route matrix. Any failure here is request-fatal.

use crate::error::AppError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// A hospital/clinic candidate for one query. Never persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityCandidate {
    pub facility_id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub maps_url: Option<String>,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteLeg {
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<f64>,
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn nearby_facilities(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        max_results: usize,
    ) -> Result<Vec<FacilityCandidate>, AppError>;

    /// Route legs keyed by destination index. Destinations without a route
    /// are simply absent.
    async fn route_matrix(
        &self,
        origin_lat: f64,
        origin_lng: f64,
        destinations: &[FacilityCandidate],
    ) -> Result<HashMap<usize, RouteLeg>, AppError>;
}

/// Apply a route matrix back onto the candidate list by index.
pub fn apply_route_matrix(
    candidates: &mut [FacilityCandidate],
    legs: &HashMap<usize, RouteLeg>,
) {
    for (index, candidate) in candidates.iter_mut().enumerate() {
        if let Some(leg) = legs.get(&index) {
            candidate.distance_km = leg.distance_km;
            candidate.eta_minutes = leg.eta_minutes;
        }
    }
}

/// Durations arrive as `"745s"`.
pub fn parse_duration_seconds(raw: &str) -> Option<f64> {
    raw.strip_suffix('s')?.parse::<f64>().ok()
}

const PLACES_FIELD_MASK: &str =
    "places.id,places.displayName,places.location,places.googleMapsUri,places.name";
const MATRIX_FIELD_MASK: &str =
    "originIndex,destinationIndex,status,condition,distanceMeters,duration";

pub struct GoogleRoutingClient {
    client: Client,
    api_key: String,
    places_url: String,
    routes_url: String,
}

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    places: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "displayName")]
    display_name: Option<DisplayName>,
    #[serde(default)]
    location: Option<PlaceLocation>,
    #[serde(default, rename = "googleMapsUri")]
    maps_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisplayName {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaceLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(default, rename = "destinationIndex")]
    destination_index: Option<usize>,
    #[serde(default)]
    status: Option<MatrixStatus>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default, rename = "distanceMeters")]
    distance_meters: Option<f64>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixStatus {
    #[serde(default)]
    code: Option<i64>,
}

impl GoogleRoutingClient {
    pub fn new(client: Client, api_key: String, places_url: &str, routes_url: &str) -> Self {
        Self {
            client,
            api_key,
            places_url: places_url.to_string(),
            routes_url: routes_url.to_string(),
        }
    }
}

#[async_trait]
impl RoutingProvider for GoogleRoutingClient {
    async fn nearby_facilities(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        max_results: usize,
    ) -> Result<Vec<FacilityCandidate>, AppError> {
        let body = json!({
            "includedTypes": ["hospital"],
            "maxResultCount": max_results,
            "locationRestriction": {
                "circle": {
                    "center": {"latitude": lat, "longitude": lng},
                    "radius": radius_m,
                }
            }
        });

        let response = self
            .client
            .post(&self.places_url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", PLACES_FIELD_MASK)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Routing(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Routing(format!(
                "nearby search returned {status}: {text}"
            )));
        }

        let parsed: PlacesResponse = response
            .json()
            .await
            .map_err(|e| AppError::Routing(e.to_string()))?;

        let mut candidates = Vec::with_capacity(parsed.places.len());
        for place in parsed.places {
            let Some(name) = place.display_name.and_then(|d| d.text) else {
                continue;
            };
            let Some(location) = place.location else {
                continue;
            };
            // Fall back to the trailing segment of the resource name.
            let facility_id = match place.id {
                Some(id) => id,
                None => match place
                    .name
                    .as_deref()
                    .and_then(|n| n.rsplit('/').next())
                    .filter(|s| !s.is_empty())
                {
                    Some(id) => id.to_string(),
                    None => continue,
                },
            };
            candidates.push(FacilityCandidate {
                facility_id,
                name,
                lat: location.latitude,
                lng: location.longitude,
                maps_url: place.maps_uri,
                distance_km: None,
                eta_minutes: None,
            });
        }
        debug!(count = candidates.len(), "nearby search answered");
        Ok(candidates)
    }

    async fn route_matrix(
        &self,
        origin_lat: f64,
        origin_lng: f64,
        destinations: &[FacilityCandidate],
    ) -> Result<HashMap<usize, RouteLeg>, AppError> {
        if destinations.is_empty() {
            return Ok(HashMap::new());
        }

        let body = json!({
            "origins": [{"waypoint": {"location": {"latLng": {
                "latitude": origin_lat, "longitude": origin_lng,
            }}}}],
            "destinations": destinations.iter().map(|d| json!({
                "waypoint": {"location": {"latLng": {
                    "latitude": d.lat, "longitude": d.lng,
                }}}
            })).collect::<Vec<_>>(),
            "travelMode": "DRIVE",
            "routingPreference": "TRAFFIC_AWARE_OPTIMAL",
        });

        let response = self
            .client
            .post(&self.routes_url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", MATRIX_FIELD_MASK)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Routing(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Routing(format!(
                "route matrix returned {status}: {text}"
            )));
        }

        let rows: Vec<MatrixRow> = response
            .json()
            .await
            .map_err(|e| AppError::Routing(e.to_string()))?;

        let mut legs = HashMap::new();
        for row in rows {
            if row.status.as_ref().is_some_and(|s| s.code.unwrap_or(0) != 0) {
                continue;
            }
            if row.condition.as_deref() != Some("ROUTE_EXISTS") {
                continue;
            }
            let Some(index) = row.destination_index else {
                continue;
            };
            let distance_km = row.distance_meters.map(|m| (m / 1000.0 * 100.0).round() / 100.0);
            let eta_minutes = row
                .duration
                .as_deref()
                .and_then(parse_duration_seconds)
                .map(|s| (s / 60.0 * 10.0).round() / 10.0);
            legs.insert(
                index,
                RouteLeg {
                    distance_km,
                    eta_minutes,
                },
            );
        }
        Ok(legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_suffix_parses() {
        assert_eq!(parse_duration_seconds("745s"), Some(745.0));
        assert_eq!(parse_duration_seconds("0s"), Some(0.0));
        assert_eq!(parse_duration_seconds("745"), None);
        assert_eq!(parse_duration_seconds("abc"), None);
        assert_eq!(parse_duration_seconds(""), None);
    }

    #[test]
    fn matrix_applies_by_destination_index() {
        let mut candidates = vec![
            FacilityCandidate {
                facility_id: "a".to_string(),
                name: "A".to_string(),
                lat: 0.0,
                lng: 0.0,
                maps_url: None,
                distance_km: None,
                eta_minutes: None,
            },
            FacilityCandidate {
                facility_id: "b".to_string(),
                name: "B".to_string(),
                lat: 0.0,
                lng: 0.0,
                maps_url: None,
                distance_km: None,
                eta_minutes: None,
            },
        ];
        let legs = HashMap::from([(
            1,
            RouteLeg {
                distance_km: Some(2.5),
                eta_minutes: Some(7.0),
            },
        )]);

        apply_route_matrix(&mut candidates, &legs);

        assert_eq!(candidates[0].eta_minutes, None);
        assert_eq!(candidates[1].eta_minutes, Some(7.0));
        assert_eq!(candidates[1].distance_km, Some(2.5));
    }

    #[test]
    fn matrix_rows_filter_on_condition_and_status() {
        let rows: Vec<MatrixRow> = serde_json::from_value(serde_json::json!([
            {"destinationIndex": 0, "condition": "ROUTE_EXISTS",
             "distanceMeters": 1234.0, "duration": "300s"},
            {"destinationIndex": 1, "condition": "ROUTE_NOT_FOUND"},
            {"destinationIndex": 2, "condition": "ROUTE_EXISTS",
             "status": {"code": 3}, "duration": "60s"},
        ]))
        .expect("parse rows");

        let usable: Vec<&MatrixRow> = rows
            .iter()
            .filter(|r| !r.status.as_ref().is_some_and(|s| s.code.unwrap_or(0) != 0))
            .filter(|r| r.condition.as_deref() == Some("ROUTE_EXISTS"))
            .collect();

        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].destination_index, Some(0));
        assert_eq!(usable[0].duration.as_deref(), Some("300s"));
    }
}
