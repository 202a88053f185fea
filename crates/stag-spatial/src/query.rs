//! AQL planning for spatial and temporal queries.
//!
//! Builds parameterized queries over the anchors collection: every
//! user-supplied value travels through the bindings map, never through
//! string interpolation.

use serde_json::{json, Map, Value};
use stag_store::{ANCHORS_COLLECTION, MESHES_COLLECTION};
use stag_types::QueryParams;

/// Applied when the caller does not set a limit.
pub const DEFAULT_LIMIT: i64 = 100;
/// Hard ceiling enforced by the query handler.
pub const MAX_LIMIT: i64 = 1000;

/// The limit actually applied to a query.
pub fn effective_limit(limit: i64) -> i64 {
    if limit > 0 {
        limit
    } else {
        DEFAULT_LIMIT
    }
}

/// Build the anchor query for the given parameters.
///
/// Filters are conjoined in declaration order: session equality, time
/// range, then the spatial clause. The spatial clause first resolves the
/// reference anchor as a sub-query, guards against it being absent, and
/// compares geodesic distance against the radius converted from meters to
/// the store's millimeter unit.
pub fn build_anchor_query(params: &QueryParams) -> (String, Value) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut binds = Map::new();
    binds.insert("@collection".into(), json!(ANCHORS_COLLECTION));

    if !params.session_id.is_empty() {
        conditions.push("doc.session_id == @session_id");
        binds.insert("session_id".into(), json!(params.session_id));
    }
    if params.since > 0 {
        conditions.push("doc.timestamp >= @since");
        binds.insert("since".into(), json!(params.since));
    }
    if params.until > 0 {
        conditions.push("doc.timestamp <= @until");
        binds.insert("until".into(), json!(params.until));
    }

    let spatial = !params.anchor_id.is_empty() && params.radius > 0.0;
    if spatial {
        conditions.push("refAnchor != null");
        conditions.push(
            "GEO_DISTANCE([refAnchor.pose.x, refAnchor.pose.y], [doc.pose.x, doc.pose.y]) <= @radius",
        );
        binds.insert("anchor_id".into(), json!(params.anchor_id));
        binds.insert("radius".into(), json!(params.radius * 1000.0));
    }

    let mut query = String::from("FOR doc IN @@collection");
    if spatial {
        query.push_str(
            "\nLET refAnchor = FIRST(FOR a IN @@collection FILTER a.id == @anchor_id RETURN a)",
        );
    }
    for (i, condition) in conditions.iter().enumerate() {
        query.push_str(if i == 0 { "\nFILTER " } else { "\nAND " });
        query.push_str(condition);
    }
    query.push_str("\nSORT doc.timestamp DESC");
    query.push_str("\nLIMIT @limit");
    query.push_str("\nRETURN doc");
    binds.insert("limit".into(), json!(effective_limit(params.limit)));

    (query, Value::Object(binds))
}

/// Query loading all meshes attached to the given anchors.
pub fn build_mesh_query(anchor_ids: &[String]) -> (String, Value) {
    let query = "FOR doc IN @@collection\nFILTER doc.anchor_id IN @anchor_ids\nRETURN doc";
    let binds = json!({
        "@collection": MESHES_COLLECTION,
        "anchor_ids": anchor_ids,
    });
    (query.to_string(), binds)
}

/// Point lookup of a single anchor by its client-chosen id.
pub fn build_anchor_lookup(anchor_id: &str) -> (String, Value) {
    let query = "FOR doc IN @@collection\nFILTER doc.id == @id\nLIMIT 1\nRETURN doc";
    let binds = json!({
        "@collection": ANCHORS_COLLECTION,
        "id": anchor_id,
    });
    (query.to_string(), binds)
}

/// Count query used by the metrics snapshot.
pub fn build_count_query(collection: &str) -> (String, Value) {
    let query = "RETURN COUNT(FOR doc IN @@collection RETURN 1)";
    let binds = json!({ "@collection": collection });
    (query.to_string(), binds)
}
