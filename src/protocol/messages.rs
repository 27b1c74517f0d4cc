//! Message types carried over the link.
//!
//! This is the full catalogue multiplexed over the single line stream:
//! - Telemetry (outbound from handheld): position, route, step, notification
//! - Configuration: display settings, Wi-Fi credentials
//! - Tile proxy traffic: request (from display), response (from handheld)
//! - Bulk transfer: package start/chunk/end framing

use serde::{Deserialize, Serialize};

/// Top-level protocol message, one per line on the wire.
///
/// Adding a variant here forces updates to both `encode` and `decode`
/// (exhaustive matches in the codec).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Message {
    /// Live position fix from the handheld's GPS
    State(StateUpdate),
    /// Full route replacement (waypoint polyline + totals)
    Route(RouteSummary),
    /// Current turn instruction
    Step(StepInfo),
    /// Forwarded device notification
    Notification(NotificationInfo),
    /// Display/audio preferences
    Settings(DisplaySettings),
    /// Wi-Fi credentials for the display's direct connection
    WifiCredentials(WifiCredentials),
    /// Map tile request (display → handheld)
    TileRequest(TileRequest),
    /// Map tile response; `data` absent means the fetch failed
    TileResponse(TileResponse),
    /// Bulk transfer: announces size and chunk count
    PackageStart(PackageStart),
    /// Bulk transfer: one base64 chunk
    PackageChunk(PackageChunk),
    /// Bulk transfer: end of payload
    PackageEnd,
    /// Unrecognized or malformed line, kept verbatim for diagnostics
    Unknown(String),
}

/// Position fix: latitude/longitude in degrees, bearing in degrees,
/// speed in m/s, accuracy in meters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StateUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    pub speed: f64,
    pub accuracy: f64,
}

/// One point of the route polyline
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Route polyline plus totals (meters, seconds)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteSummary {
    pub waypoints: Vec<Waypoint>,
    pub total_distance: f64,
    pub total_duration: f64,
}

/// Turn instruction with remaining distance to the maneuver in meters
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepInfo {
    pub instruction: String,
    pub maneuver: String,
    pub distance: f64,
}

/// Forwarded notification. Empty strings are treated as absent on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NotificationInfo {
    pub title: Option<String>,
    pub text: Option<String>,
    pub package_name: Option<String>,
    /// Epoch milliseconds
    pub time_ms: i64,
}

/// Display and audio preferences (fixed option set, forward-extensible on
/// the wire via field defaults)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub tts_enabled: bool,
    pub use_imperial: bool,
    pub use_mini_map: bool,
    pub mini_map_style: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            tts_enabled: false,
            use_imperial: false,
            use_mini_map: false,
            mini_map_style: "strip".to_string(),
        }
    }
}

/// Wi-Fi credentials pushed from the handheld
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
    pub enabled: bool,
}

/// Tile request; `id` is an opaque correlation token echoed in the response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub id: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

/// Tile response; `data` is the base64 image, `None` on fetch failure
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TileResponse {
    pub id: String,
    pub data: Option<String>,
}

/// Bulk transfer header
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PackageStart {
    pub total_size: u64,
    pub total_chunks: u32,
}

/// Bulk transfer chunk; `index` is zero-based and strictly increasing
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PackageChunk {
    pub index: u32,
    pub data: String,
}
