//! stag-store -- ArangoDB driver layer for the STAG spatial service.
//!
//! Talks to the store over its HTTP API: AQL cursors with batch
//! continuation, document reads and inserts by primary key, and the
//! idempotent schema migrations (collections, indexes, topology graph).

pub mod connection;
pub mod error;
pub mod migrations;

pub use connection::{CollectionKind, Connection, StoreConfig};
pub use error::StoreError;

/// Document collection holding anchors.
pub const ANCHORS_COLLECTION: &str = "anchors";
/// Document collection holding meshes.
pub const MESHES_COLLECTION: &str = "meshes";
/// Edge collection reserved for anchor topology.
pub const TOPOLOGY_EDGES: &str = "topology_edges";
/// Named graph over the topology edges.
pub const TOPOLOGY_GRAPH: &str = "topology";
