//! API data types.
//!
//! Byte-carrying mesh fields serialize as base64 strings so the JSON shape
//! matches what AR clients send over both the ingest endpoint and the
//! WebSocket stream.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serde adapter encoding `Vec<u8>` as a standard-alphabet base64 string.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A batch of spatial data uploaded by one session in a single request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpatialEvent {
    pub session_id: String,
    pub event_id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub anchors: Vec<Anchor>,
    #[serde(default)]
    pub meshes: Vec<Mesh>,
}

/// A client-named rigid pose in a session's coordinate frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub session_id: String,
    pub pose: Pose,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Position and orientation in 3D space. `rotation` is a quaternion in
/// x, y, z, w order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: Vec<f64>,
}

/// Geometry attached to an anchor, either full or delta-encoded.
///
/// A stored delta row carries its payload in `vertices` and links to its
/// base through `base_mesh_id`; `faces` and `normals` are empty for deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub id: String,
    pub anchor_id: String,
    #[serde(
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub vertices: Vec<u8>,
    #[serde(
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub faces: Vec<u8>,
    #[serde(
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub normals: Vec<u8>,
    /// Content hash assigned by the service, lowercase hex SHA-256.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    #[serde(default)]
    pub is_delta: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_mesh_id: String,
    #[serde(
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub delta_data: Vec<u8>,
    #[serde(default)]
    pub compression_level: i32,
    #[serde(default)]
    pub timestamp: i64,
}

impl Mesh {
    /// Total geometry payload size in bytes.
    pub fn geometry_len(&self) -> usize {
        self.vertices.len() + self.faces.len() + self.normals.len()
    }
}

/// Parameters accepted by the spatial query endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub anchor_id: String,
    /// Spatial radius in meters, used together with `anchor_id`.
    #[serde(default)]
    pub radius: f64,
    /// Lower timestamp bound, milliseconds since epoch.
    #[serde(default)]
    pub since: i64,
    /// Upper timestamp bound, milliseconds since epoch.
    #[serde(default)]
    pub until: i64,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub include_meshes: bool,
    #[serde(default)]
    pub include_deleted: bool,
}

/// Results of a spatial query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub anchors: Vec<Anchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meshes: Option<Vec<Mesh>>,
    pub count: usize,
    pub has_more: bool,
}

/// The envelope framing every WebSocket text message.
///
/// `data` is kept as raw JSON; only the dispatch branch that expects a
/// specific payload shape parses it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
}

/// Known WebSocket message types. `subscribe` and `unsubscribe` are
/// reserved and currently treated as no-ops.
pub mod ws_type {
    pub const ANCHOR_UPDATE: &str = "anchor_update";
    pub const MESH_UPDATE: &str = "mesh_update";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
}

/// Inner payload of an `anchor_update` message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnchorUpdate {
    pub id: String,
    pub pose: Pose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Inner payload of a `mesh_update` message. Geometry fields are base64
/// strings on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshUpdate {
    pub id: String,
    pub anchor_id: String,
    #[serde(default)]
    pub vertices: String,
    #[serde(default)]
    pub faces: String,
    #[serde(default)]
    pub normals: String,
    #[serde(default)]
    pub compression_level: i32,
    #[serde(default)]
    pub is_delta: bool,
    #[serde(default)]
    pub base_mesh_id: String,
}

/// Structured error payload, used both in HTTP bodies and in
/// `{"type":"error"}` WebSocket frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub database: String,
}

/// Aggregate counters returned by the service-level metrics endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsInfo {
    pub active_connections: usize,
    pub total_anchors: i64,
    pub total_meshes: i64,
    pub storage_size_bytes: i64,
    pub compression_ratio: f64,
}
