//! Wire codec: one self-contained JSON object per line.
//!
//! Field names are fixed short tokens; wire stability matters more than
//! readability. Text was chosen over a binary framing so the link can be
//! inspected with a terminal and heterogeneous endpoints never disagree on
//! byte order.
//!
//! `encode` is total and deterministic. `decode` never fails: anything it
//! cannot recognize (bad JSON, unknown tag, missing required field) comes
//! back as [`Message::Unknown`] carrying the original line.

use crate::protocol::messages::*;
use serde_json::{Value, json};

/// Type tag field
const FIELD_TYPE: &str = "t";

const FIELD_LATITUDE: &str = "lat";
const FIELD_LONGITUDE: &str = "lng";
const FIELD_BEARING: &str = "bearing";
const FIELD_SPEED: &str = "speed";
const FIELD_ACCURACY: &str = "accuracy";
const FIELD_WAYPOINTS: &str = "waypoints";
const FIELD_DISTANCE: &str = "distance";
const FIELD_DURATION: &str = "duration";
const FIELD_INSTRUCTION: &str = "instruction";
const FIELD_MANEUVER: &str = "maneuver";
const FIELD_STEP_DISTANCE: &str = "stepDistance";
const FIELD_TITLE: &str = "title";
const FIELD_TEXT: &str = "text";
const FIELD_PACKAGE_NAME: &str = "packageName";
const FIELD_TIME_MS: &str = "timeMs";
const FIELD_TTS_ENABLED: &str = "ttsEnabled";
const FIELD_USE_IMPERIAL: &str = "useImperial";
const FIELD_USE_MINI_MAP: &str = "useMiniMap";
const FIELD_MINI_MAP_STYLE: &str = "miniMapStyle";
const FIELD_WIFI_SSID: &str = "wifiSsid";
const FIELD_WIFI_PASS: &str = "wifiPass";
const FIELD_WIFI_ENABLED: &str = "wifiEnabled";
const FIELD_TILE_ID: &str = "id";
const FIELD_TILE_Z: &str = "z";
const FIELD_TILE_X: &str = "x";
const FIELD_TILE_Y: &str = "y";
const FIELD_DATA: &str = "data";
const FIELD_PKG_SIZE: &str = "size";
const FIELD_PKG_CHUNKS: &str = "chunks";
const FIELD_PKG_INDEX: &str = "index";

const TAG_STATE: &str = "state";
const TAG_ROUTE: &str = "route";
const TAG_STEP: &str = "step";
const TAG_NOTIFICATION: &str = "notification";
const TAG_SETTINGS: &str = "settings";
const TAG_WIFI_CREDS: &str = "wifi_creds";
const TAG_TILE_REQ: &str = "tile_req";
const TAG_TILE_RESP: &str = "tile_resp";
const TAG_PKG_START: &str = "pkg_start";
const TAG_PKG_CHUNK: &str = "pkg_chunk";
const TAG_PKG_END: &str = "pkg_end";

/// Serialize a message to exactly one line of text (no trailing newline).
///
/// `Unknown` re-emits its raw line unchanged so diagnostic traffic can be
/// forwarded verbatim.
pub fn encode(msg: &Message) -> String {
    let value = match msg {
        Message::State(m) => json!({
            FIELD_TYPE: TAG_STATE,
            FIELD_LATITUDE: m.latitude,
            FIELD_LONGITUDE: m.longitude,
            FIELD_BEARING: m.bearing,
            FIELD_SPEED: m.speed,
            FIELD_ACCURACY: m.accuracy,
        }),
        Message::Route(m) => {
            let waypoints: Vec<Value> = m
                .waypoints
                .iter()
                .map(|wp| {
                    json!({
                        FIELD_LATITUDE: wp.latitude,
                        FIELD_LONGITUDE: wp.longitude,
                    })
                })
                .collect();
            json!({
                FIELD_TYPE: TAG_ROUTE,
                FIELD_WAYPOINTS: waypoints,
                FIELD_DISTANCE: m.total_distance,
                FIELD_DURATION: m.total_duration,
            })
        }
        Message::Step(m) => json!({
            FIELD_TYPE: TAG_STEP,
            FIELD_INSTRUCTION: m.instruction,
            FIELD_MANEUVER: m.maneuver,
            FIELD_STEP_DISTANCE: m.distance,
        }),
        Message::Notification(m) => json!({
            FIELD_TYPE: TAG_NOTIFICATION,
            FIELD_TITLE: m.title.as_deref().unwrap_or(""),
            FIELD_TEXT: m.text.as_deref().unwrap_or(""),
            FIELD_PACKAGE_NAME: m.package_name.as_deref().unwrap_or(""),
            FIELD_TIME_MS: m.time_ms,
        }),
        Message::Settings(m) => json!({
            FIELD_TYPE: TAG_SETTINGS,
            FIELD_TTS_ENABLED: m.tts_enabled,
            FIELD_USE_IMPERIAL: m.use_imperial,
            FIELD_USE_MINI_MAP: m.use_mini_map,
            FIELD_MINI_MAP_STYLE: m.mini_map_style,
        }),
        Message::WifiCredentials(m) => json!({
            FIELD_TYPE: TAG_WIFI_CREDS,
            FIELD_WIFI_SSID: m.ssid,
            FIELD_WIFI_PASS: m.passphrase,
            FIELD_WIFI_ENABLED: m.enabled,
        }),
        Message::TileRequest(m) => json!({
            FIELD_TYPE: TAG_TILE_REQ,
            FIELD_TILE_ID: m.id,
            FIELD_TILE_Z: m.z,
            FIELD_TILE_X: m.x,
            FIELD_TILE_Y: m.y,
        }),
        Message::TileResponse(m) => json!({
            FIELD_TYPE: TAG_TILE_RESP,
            FIELD_TILE_ID: m.id,
            FIELD_DATA: m.data.as_deref().unwrap_or(""),
        }),
        Message::PackageStart(m) => json!({
            FIELD_TYPE: TAG_PKG_START,
            FIELD_PKG_SIZE: m.total_size,
            FIELD_PKG_CHUNKS: m.total_chunks,
        }),
        Message::PackageChunk(m) => json!({
            FIELD_TYPE: TAG_PKG_CHUNK,
            FIELD_PKG_INDEX: m.index,
            FIELD_DATA: m.data,
        }),
        Message::PackageEnd => json!({ FIELD_TYPE: TAG_PKG_END }),
        Message::Unknown(raw) => return raw.clone(),
    };
    value.to_string()
}

/// Parse one line into a message. Total: never panics, never errors.
pub fn decode(line: &str) -> Message {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Message::Unknown(line.to_string());
    };
    let Some(tag) = value.get(FIELD_TYPE).and_then(Value::as_str) else {
        return Message::Unknown(line.to_string());
    };

    let parsed = match tag {
        TAG_STATE => decode_state(&value),
        TAG_ROUTE => decode_route(&value),
        TAG_STEP => decode_step(&value),
        TAG_NOTIFICATION => decode_notification(&value),
        TAG_SETTINGS => Some(decode_settings(&value)),
        TAG_WIFI_CREDS => Some(decode_wifi_creds(&value)),
        TAG_TILE_REQ => decode_tile_req(&value),
        TAG_TILE_RESP => decode_tile_resp(&value),
        TAG_PKG_START => decode_pkg_start(&value),
        TAG_PKG_CHUNK => decode_pkg_chunk(&value),
        TAG_PKG_END => Some(Message::PackageEnd),
        _ => None,
    };

    parsed.unwrap_or_else(|| Message::Unknown(line.to_string()))
}

fn decode_state(v: &Value) -> Option<Message> {
    Some(Message::State(StateUpdate {
        latitude: num(v, FIELD_LATITUDE)?,
        longitude: num(v, FIELD_LONGITUDE)?,
        bearing: num(v, FIELD_BEARING)?,
        speed: num(v, FIELD_SPEED)?,
        accuracy: num(v, FIELD_ACCURACY)?,
    }))
}

fn decode_route(v: &Value) -> Option<Message> {
    let array = v.get(FIELD_WAYPOINTS)?.as_array()?;
    let mut waypoints = Vec::with_capacity(array.len());
    for wp in array {
        waypoints.push(Waypoint {
            latitude: num(wp, FIELD_LATITUDE)?,
            longitude: num(wp, FIELD_LONGITUDE)?,
        });
    }
    Some(Message::Route(RouteSummary {
        waypoints,
        total_distance: num(v, FIELD_DISTANCE)?,
        total_duration: num(v, FIELD_DURATION)?,
    }))
}

fn decode_step(v: &Value) -> Option<Message> {
    Some(Message::Step(StepInfo {
        instruction: string(v, FIELD_INSTRUCTION)?,
        maneuver: string(v, FIELD_MANEUVER)?,
        distance: num(v, FIELD_STEP_DISTANCE)?,
    }))
}

fn decode_notification(v: &Value) -> Option<Message> {
    Some(Message::Notification(NotificationInfo {
        title: opt_string(v, FIELD_TITLE),
        text: opt_string(v, FIELD_TEXT),
        package_name: opt_string(v, FIELD_PACKAGE_NAME),
        time_ms: v.get(FIELD_TIME_MS)?.as_i64()?,
    }))
}

fn decode_settings(v: &Value) -> Message {
    // All fields defaulted: settings from an older peer stay usable.
    Message::Settings(DisplaySettings {
        tts_enabled: boolean(v, FIELD_TTS_ENABLED),
        use_imperial: boolean(v, FIELD_USE_IMPERIAL),
        use_mini_map: boolean(v, FIELD_USE_MINI_MAP),
        mini_map_style: string(v, FIELD_MINI_MAP_STYLE).unwrap_or_else(|| "strip".to_string()),
    })
}

fn decode_wifi_creds(v: &Value) -> Message {
    Message::WifiCredentials(WifiCredentials {
        ssid: string(v, FIELD_WIFI_SSID).unwrap_or_default(),
        passphrase: string(v, FIELD_WIFI_PASS).unwrap_or_default(),
        enabled: boolean(v, FIELD_WIFI_ENABLED),
    })
}

fn decode_tile_req(v: &Value) -> Option<Message> {
    Some(Message::TileRequest(TileRequest {
        id: string(v, FIELD_TILE_ID)?,
        z: uint(v, FIELD_TILE_Z)?,
        x: uint(v, FIELD_TILE_X)?,
        y: uint(v, FIELD_TILE_Y)?,
    }))
}

fn decode_tile_resp(v: &Value) -> Option<Message> {
    Some(Message::TileResponse(TileResponse {
        id: string(v, FIELD_TILE_ID)?,
        data: opt_string(v, FIELD_DATA),
    }))
}

fn decode_pkg_start(v: &Value) -> Option<Message> {
    Some(Message::PackageStart(PackageStart {
        total_size: v.get(FIELD_PKG_SIZE)?.as_u64()?,
        total_chunks: uint(v, FIELD_PKG_CHUNKS)?,
    }))
}

fn decode_pkg_chunk(v: &Value) -> Option<Message> {
    Some(Message::PackageChunk(PackageChunk {
        index: uint(v, FIELD_PKG_INDEX)?,
        data: string(v, FIELD_DATA)?,
    }))
}

fn num(v: &Value, key: &str) -> Option<f64> {
    v.get(key)?.as_f64()
}

fn uint(v: &Value, key: &str) -> Option<u32> {
    v.get(key)?.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn boolean(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn string(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Optional string: absent or empty on the wire maps to `None`
fn opt_string(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
