//! stag-types -- wire and storage types for the STAG spatial service.
//!
//! Everything that crosses a process boundary lives here: the ingest batch
//! envelope, anchors and meshes as they are persisted, query parameters and
//! responses, the WebSocket message envelope, and the error taxonomy shared
//! by the HTTP handlers and the streaming path.

pub mod api;
pub mod error;

pub use api::{
    Anchor, AnchorUpdate, ErrorBody, HealthResponse, Mesh, MeshUpdate, MetricsInfo, Pose,
    QueryParams, QueryResponse, SpatialEvent, WsMessage,
};
pub use error::{ApiError, Result};
