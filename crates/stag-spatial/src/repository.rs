//! The repository facade over the store.
//!
//! Orchestrates the ingest, query, and WebSocket-update paths and emits the
//! database and business metrics along the way. Anchors upsert by their
//! client-chosen id; meshes are immutable and idempotent on id.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use stag_metrics::Metrics;
use stag_store::{Connection, StoreError, ANCHORS_COLLECTION, MESHES_COLLECTION};
use stag_types::api::ws_type;
use stag_types::{
    Anchor, AnchorUpdate, ApiError, Mesh, MeshUpdate, MetricsInfo, QueryParams, QueryResponse,
    Result, SpatialEvent, WsMessage,
};

use crate::delta::{resolve_delta_mesh, MeshSource};
use crate::mesh::MeshProcessor;
use crate::query;

const UPSERT_ANCHOR: &str = "UPSERT { id: @id }\nINSERT @anchor\nUPDATE @anchor\nIN @@collection\nRETURN NEW";

// Per-row storage estimates for the metrics snapshot.
const ANCHOR_SIZE_ESTIMATE: i64 = 500;
const MESH_SIZE_ESTIMATE: i64 = 50_000;

fn db_error(context: &str, err: StoreError) -> ApiError {
    ApiError::Database(format!("{context}: {err}"))
}

/// Spatial data repository.
pub struct Repository {
    store: Arc<Connection>,
    metrics: Arc<Metrics>,
    processor: MeshProcessor,
}

impl Repository {
    pub fn new(store: Arc<Connection>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            processor: MeshProcessor::new(),
        }
    }

    /// Ingest a spatial event: anchors in order, then meshes in order. Any
    /// failure aborts the batch naming the failing entity.
    pub async fn ingest(&self, event: &SpatialEvent) -> Result<()> {
        let start = Instant::now();
        let result = self.ingest_inner(event).await;
        self.metrics
            .db_operation_duration_seconds
            .with_label_values(&["ingest", "spatial_event"])
            .observe(start.elapsed().as_secs_f64());
        result
    }

    async fn ingest_inner(&self, event: &SpatialEvent) -> Result<()> {
        for anchor in &event.anchors {
            if let Err(e) = self.ingest_anchor(anchor).await {
                self.metrics
                    .db_operations_total
                    .with_label_values(&["ingest", "anchors", "error"])
                    .inc();
                return Err(e.with_context(&format!("failed to ingest anchor {}", anchor.id)));
            }
            self.metrics
                .anchors_total
                .with_label_values(&[&event.session_id, "ingest"])
                .inc();
        }

        for mesh in &event.meshes {
            let mesh_type = if mesh.is_delta { "delta" } else { "full" };

            let (processed, saved) = match self.processor.process_for_storage(mesh.clone()) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.metrics
                        .db_operations_total
                        .with_label_values(&["ingest", "meshes", "error"])
                        .inc();
                    return Err(e.with_context(&format!("failed to process mesh {}", mesh.id)));
                }
            };

            if let Err(e) = self.ingest_mesh(&processed).await {
                self.metrics
                    .db_operations_total
                    .with_label_values(&["ingest", "meshes", "error"])
                    .inc();
                return Err(e.with_context(&format!("failed to ingest mesh {}", mesh.id)));
            }

            if saved > 0 {
                self.metrics
                    .mesh_dedup_saved_bytes
                    .with_label_values(&[&event.session_id])
                    .inc_by(saved);
            }
            self.metrics
                .meshes_total
                .with_label_values(&[&event.session_id, mesh_type, "ingest"])
                .inc();
        }

        self.metrics
            .db_operations_total
            .with_label_values(&["ingest", "spatial_event", "success"])
            .inc();
        Ok(())
    }

    async fn ingest_anchor(&self, anchor: &Anchor) -> Result<()> {
        let binds = json!({
            "id": anchor.id,
            "anchor": anchor,
            "@collection": ANCHORS_COLLECTION,
        });
        self.store
            .query::<serde_json::Value>(UPSERT_ANCHOR, binds)
            .await
            .map_err(|e| db_error("failed to upsert anchor", e))?;
        Ok(())
    }

    /// Insert a mesh unless a row with its id already exists. The pre-read
    /// makes the write idempotent, which the dedup path relies on.
    async fn ingest_mesh(&self, mesh: &Mesh) -> Result<()> {
        let existing = self
            .store
            .read_document::<Mesh>(MESHES_COLLECTION, &mesh.id)
            .await
            .map_err(|e| db_error("failed to check existing mesh", e))?;
        if existing.is_some() {
            return Ok(());
        }

        self.store
            .insert_document(MESHES_COLLECTION, &mesh.id, mesh)
            .await
            .map_err(|e| db_error("failed to create mesh", e))?;

        self.metrics
            .storage_size_bytes
            .with_label_values(&["meshes"])
            .add(mesh.geometry_len() as i64);
        Ok(())
    }

    /// Run a spatial query and decode the matching anchors, optionally with
    /// their meshes (deltas resolved).
    pub async fn query(&self, params: &QueryParams) -> Result<QueryResponse> {
        let start = Instant::now();
        let result = self.query_inner(params).await;
        self.metrics
            .db_operation_duration_seconds
            .with_label_values(&["query", "spatial"])
            .observe(start.elapsed().as_secs_f64());
        result
    }

    async fn query_inner(&self, params: &QueryParams) -> Result<QueryResponse> {
        let (aql, binds) = query::build_anchor_query(params);
        let anchors: Vec<Anchor> = match self.store.query(&aql, binds).await {
            Ok(rows) => rows,
            Err(e) => {
                self.metrics
                    .db_operations_total
                    .with_label_values(&["query", "spatial", "error"])
                    .inc();
                return Err(db_error("failed to execute query", e));
            }
        };

        let count = anchors.len();
        let has_more = count as i64 >= query::effective_limit(params.limit);

        let meshes = if params.include_meshes && !anchors.is_empty() {
            Some(self.load_meshes_for_anchors(&anchors).await?)
        } else {
            None
        };

        self.metrics
            .db_operations_total
            .with_label_values(&["query", "spatial", "success"])
            .inc();

        Ok(QueryResponse {
            anchors,
            meshes,
            count,
            has_more,
        })
    }

    /// Point lookup of one anchor by id.
    pub async fn get_anchor(&self, anchor_id: &str) -> Result<Option<Anchor>> {
        let (aql, binds) = query::build_anchor_lookup(anchor_id);
        let mut rows: Vec<Anchor> = self
            .store
            .query(&aql, binds)
            .await
            .map_err(|e| db_error("failed to look up anchor", e))?;
        Ok(rows.pop())
    }

    async fn load_meshes_for_anchors(&self, anchors: &[Anchor]) -> Result<Vec<Mesh>> {
        let anchor_ids: Vec<String> = anchors.iter().map(|a| a.id.clone()).collect();
        let (aql, binds) = query::build_mesh_query(&anchor_ids);
        let meshes: Vec<Mesh> = self
            .store
            .query(&aql, binds)
            .await
            .map_err(|e| db_error("failed to query meshes", e))?;

        let mut resolved = Vec::with_capacity(meshes.len());
        for mesh in meshes {
            if mesh.is_delta {
                match resolve_delta_mesh(self, &mesh).await {
                    Ok(full) => resolved.push(full),
                    // A broken delta chain degrades the mesh set, not the query.
                    Err(e) => {
                        tracing::warn!(mesh_id = %mesh.id, error = %e, "failed to resolve delta mesh")
                    }
                }
            } else {
                resolved.push(mesh);
            }
        }
        Ok(resolved)
    }

    /// Handle one data-plane WebSocket message. Unknown types are accepted
    /// as no-ops for forward compatibility.
    pub async fn process_ws_message(&self, msg: &WsMessage) -> Result<()> {
        match msg.kind.as_str() {
            ws_type::ANCHOR_UPDATE => self.process_anchor_update(msg).await,
            ws_type::MESH_UPDATE => self.process_mesh_update(msg).await,
            _ => Ok(()),
        }
    }

    async fn process_anchor_update(&self, msg: &WsMessage) -> Result<()> {
        let update: AnchorUpdate = serde_json::from_value(msg.data.clone())
            .map_err(|e| ApiError::Validation(format!("invalid anchor update: {e}")))?;

        let anchor = Anchor {
            id: update.id,
            session_id: msg.session_id.clone(),
            pose: update.pose,
            timestamp: msg.timestamp,
            metadata: update.metadata,
        };
        self.ingest_anchor(&anchor).await
    }

    async fn process_mesh_update(&self, msg: &WsMessage) -> Result<()> {
        let update: MeshUpdate = serde_json::from_value(msg.data.clone())
            .map_err(|e| ApiError::Validation(format!("invalid mesh update: {e}")))?;

        let vertices = BASE64
            .decode(update.vertices.as_bytes())
            .map_err(|e| ApiError::Validation(format!("invalid vertices encoding: {e}")))?;
        let faces = BASE64
            .decode(update.faces.as_bytes())
            .map_err(|e| ApiError::Validation(format!("invalid faces encoding: {e}")))?;
        let normals = BASE64
            .decode(update.normals.as_bytes())
            .map_err(|e| ApiError::Validation(format!("invalid normals encoding: {e}")))?;

        let mut mesh = Mesh {
            id: update.id,
            anchor_id: update.anchor_id,
            vertices,
            faces,
            normals,
            is_delta: update.is_delta,
            base_mesh_id: update.base_mesh_id,
            compression_level: update.compression_level,
            timestamp: msg.timestamp,
            ..Default::default()
        };
        // For deltas the decoded vertices are the delta payload.
        if mesh.is_delta {
            mesh.delta_data = mesh.vertices.clone();
        }

        let (processed, saved) = self.processor.process_for_storage(mesh)?;
        self.ingest_mesh(&processed).await?;

        if saved > 0 {
            self.metrics
                .mesh_dedup_saved_bytes
                .with_label_values(&[&msg.session_id])
                .inc_by(saved);
        }
        Ok(())
    }

    /// Aggregate counts for the service-level metrics endpoint. The live
    /// connection count is filled in by the WebSocket hub.
    pub async fn get_metrics(&self) -> Result<MetricsInfo> {
        let total_anchors = self.count_documents(ANCHORS_COLLECTION).await?;
        let total_meshes = self.count_documents(MESHES_COLLECTION).await?;

        Ok(MetricsInfo {
            active_connections: 0,
            total_anchors,
            total_meshes,
            storage_size_bytes: total_anchors * ANCHOR_SIZE_ESTIMATE
                + total_meshes * MESH_SIZE_ESTIMATE,
            compression_ratio: 0.6,
        })
    }

    async fn count_documents(&self, collection: &str) -> Result<i64> {
        let (aql, binds) = query::build_count_query(collection);
        let rows: Vec<i64> = self
            .store
            .query(&aql, binds)
            .await
            .map_err(|e| db_error("failed to count documents", e))?;
        Ok(rows.into_iter().next().unwrap_or(0))
    }
}

#[async_trait]
impl MeshSource for Repository {
    async fn mesh_by_id(&self, id: &str) -> Result<Option<Mesh>> {
        self.store
            .read_document(MESHES_COLLECTION, id)
            .await
            .map_err(|e| db_error("failed to load base mesh", e))
    }
}
