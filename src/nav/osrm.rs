//! OSRM-backed [`Router`] implementation.
//!
//! Talks to an OSRM `route/v1/driving` endpoint and maps the response into
//! the engine's route model: polyline thinned to a bounded waypoint count,
//! human instruction text and a maneuver key derived from the OSRM maneuver
//! type/modifier.

use crate::error::{Error, Result};
use crate::nav::engine::{Route, RouteStep, Router};
use crate::nav::geo::LatLng;
use serde::Deserialize;
use std::time::Duration;

const ROUTE_TIMEOUT: Duration = Duration::from_secs(15);

/// Keep the transmitted polyline to roughly this many waypoints
const MAX_WAYPOINTS: usize = 500;

pub struct OsrmRouter {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl OsrmRouter {
    /// `base_url` is the OSRM root, e.g. `https://router.project-osrm.org`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(ROUTE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Router for OsrmRouter {
    fn compute_route(&self, origin: LatLng, destination: LatLng) -> Result<Route> {
        // OSRM takes lng,lat pairs
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson&steps=true",
            self.base_url, origin.lng, origin.lat, destination.lng, destination.lat
        );
        log::debug!("Requesting route: {}", url);
        let response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            return Err(Error::Router(format!(
                "OSRM returned {}",
                response.status()
            )));
        }
        let body = response.text()?;
        parse_route_response(&body)
    }
}

#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Deserialize)]
struct OsrmGeometry {
    /// GeoJSON order: [lng, lat]
    coordinates: Vec<[f64; 2]>,
}

#[derive(Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Deserialize)]
struct OsrmStep {
    distance: f64,
    #[serde(default)]
    name: String,
    maneuver: OsrmManeuver,
}

#[derive(Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    modifier: Option<String>,
    /// [lng, lat]
    location: [f64; 2],
}

/// Map an OSRM JSON body to the engine's route model. Split out from the
/// HTTP path so it is testable against fixture bodies.
pub fn parse_route_response(body: &str) -> Result<Route> {
    let response: OsrmResponse =
        serde_json::from_str(body).map_err(|e| Error::Router(format!("bad OSRM body: {}", e)))?;
    if response.code != "Ok" {
        return Err(Error::Router(format!("OSRM code {}", response.code)));
    }
    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| Error::Router("OSRM returned no routes".to_string()))?;

    let waypoints = thin_waypoints(
        route
            .geometry
            .coordinates
            .iter()
            .map(|&[lng, lat]| LatLng::new(lat, lng))
            .collect(),
    );

    let steps = route
        .legs
        .iter()
        .flat_map(|leg| &leg.steps)
        .map(|step| {
            let modifier = step.maneuver.modifier.as_deref();
            let [lng, lat] = step.maneuver.location;
            RouteStep {
                instruction: instruction_text(&step.maneuver.kind, modifier, &step.name),
                maneuver: maneuver_key(&step.maneuver.kind, modifier),
                distance: step.distance,
                location: LatLng::new(lat, lng),
            }
        })
        .collect();

    Ok(Route {
        waypoints,
        steps,
        total_distance: route.distance,
        total_duration: route.duration,
    })
}

/// Subsample a long polyline to a bounded size, always keeping the final
/// coordinate so the drawn route reaches the destination.
fn thin_waypoints(points: Vec<LatLng>) -> Vec<LatLng> {
    let stride = (points.len() / MAX_WAYPOINTS).max(1);
    if stride == 1 {
        return points;
    }
    let last = points.last().copied();
    let mut thinned: Vec<LatLng> = points.into_iter().step_by(stride).collect();
    if let Some(last) = last {
        if thinned.last() != Some(&last) {
            thinned.push(last);
        }
    }
    thinned
}

/// Short key the display maps to a maneuver icon.
fn maneuver_key(kind: &str, modifier: Option<&str>) -> String {
    match kind {
        "depart" => "depart".to_string(),
        "arrive" => "arrive".to_string(),
        "roundabout" | "rotary" | "roundabout turn" => "roundabout".to_string(),
        "merge" => "merge".to_string(),
        "on ramp" | "off ramp" => "ramp".to_string(),
        "fork" => "fork".to_string(),
        _ => match modifier {
            Some("uturn") => "uturn".to_string(),
            Some("left") => "turn_left".to_string(),
            Some("right") => "turn_right".to_string(),
            Some("slight left") => "turn_slight_left".to_string(),
            Some("slight right") => "turn_slight_right".to_string(),
            Some("sharp left") => "turn_sharp_left".to_string(),
            Some("sharp right") => "turn_sharp_right".to_string(),
            _ => "straight".to_string(),
        },
    }
}

/// Human-readable instruction for a maneuver, with the road name appended
/// when OSRM supplies one.
fn instruction_text(kind: &str, modifier: Option<&str>, name: &str) -> String {
    let base = match kind {
        "depart" => "Head out".to_string(),
        "arrive" => return "Arrive at your destination".to_string(),
        "roundabout" | "rotary" | "roundabout turn" => "Enter the roundabout".to_string(),
        "merge" => match modifier {
            Some(m) => format!("Merge {}", m),
            None => "Merge".to_string(),
        },
        "on ramp" => "Take the ramp".to_string(),
        "off ramp" => "Take the exit".to_string(),
        "fork" => match modifier {
            Some("left") | Some("slight left") => "Keep left at the fork".to_string(),
            Some("right") | Some("slight right") => "Keep right at the fork".to_string(),
            _ => "Continue at the fork".to_string(),
        },
        "end of road" => match modifier {
            Some(m) => format!("Turn {} at the end of the road", m),
            None => "Continue at the end of the road".to_string(),
        },
        "turn" => match modifier {
            Some("uturn") => "Make a U-turn".to_string(),
            Some(m) => format!("Turn {}", m),
            None => "Turn".to_string(),
        },
        "continue" | "new name" => "Continue straight".to_string(),
        _ => "Continue".to_string(),
    };
    if name.is_empty() {
        base
    } else {
        format!("{} onto {}", base, name)
    }
}
