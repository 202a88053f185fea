//! Idempotent schema migrations.
//!
//! Creates the document and edge collections, the secondary and geo
//! indexes, and the topology graph. Every step swallows already-exists
//! conflicts so the migration can run on every startup.

use std::time::Duration;

use crate::connection::{CollectionKind, Connection, EdgeDefinition};
use crate::error::StoreError;
use crate::{ANCHORS_COLLECTION, MESHES_COLLECTION, TOPOLOGY_EDGES, TOPOLOGY_GRAPH};

const MIGRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Run all migrations under the migration deadline.
pub async fn migrate(conn: &Connection) -> Result<(), StoreError> {
    tokio::time::timeout(MIGRATION_TIMEOUT, run(conn))
        .await
        .map_err(|_| StoreError::Timeout)?
}

async fn run(conn: &Connection) -> Result<(), StoreError> {
    create_collections(conn).await?;
    create_indexes(conn).await?;
    create_graph(conn).await?;
    tracing::info!("store migrations complete");
    Ok(())
}

/// Ignore already-exists conflicts; anything else is fatal.
fn idempotent(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(e) if e.is_conflict() => Ok(()),
        other => other,
    }
}

async fn create_collections(conn: &Connection) -> Result<(), StoreError> {
    idempotent(
        conn.create_collection(ANCHORS_COLLECTION, CollectionKind::Document)
            .await,
    )?;
    idempotent(
        conn.create_collection(MESHES_COLLECTION, CollectionKind::Document)
            .await,
    )?;
    idempotent(
        conn.create_collection(TOPOLOGY_EDGES, CollectionKind::Edge)
            .await,
    )?;
    Ok(())
}

async fn create_indexes(conn: &Connection) -> Result<(), StoreError> {
    // Anchors: session partition, time range, and spatial lookups.
    idempotent(
        conn.ensure_persistent_index(ANCHORS_COLLECTION, "idx_session_id", &["session_id"], false)
            .await,
    )?;
    idempotent(
        conn.ensure_persistent_index(ANCHORS_COLLECTION, "idx_timestamp", &["timestamp"], false)
            .await,
    )?;
    idempotent(
        conn.ensure_geo_index(ANCHORS_COLLECTION, "idx_geo_pose", &["pose.x", "pose.y"])
            .await,
    )?;

    // Meshes: anchor attachment, dedup hash, delta chains.
    idempotent(
        conn.ensure_persistent_index(MESHES_COLLECTION, "idx_anchor_id", &["anchor_id"], false)
            .await,
    )?;
    idempotent(
        conn.ensure_persistent_index(MESHES_COLLECTION, "idx_mesh_hash", &["hash"], true)
            .await,
    )?;
    idempotent(
        conn.ensure_persistent_index(
            MESHES_COLLECTION,
            "idx_base_mesh_id",
            &["base_mesh_id"],
            true,
        )
        .await,
    )?;
    Ok(())
}

async fn create_graph(conn: &Connection) -> Result<(), StoreError> {
    idempotent(
        conn.create_graph(
            TOPOLOGY_GRAPH,
            &[EdgeDefinition {
                collection: TOPOLOGY_EDGES.to_string(),
                from: vec![ANCHORS_COLLECTION.to_string()],
                to: vec![ANCHORS_COLLECTION.to_string()],
            }],
        )
        .await,
    )
}
