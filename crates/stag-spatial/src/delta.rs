//! Delta-mesh reconstruction.
//!
//! A delta row references its base through `base_mesh_id`; bases may
//! themselves be deltas, so resolution walks the chain to the first full
//! mesh. Delta payloads are opaque to the service: reconstruction returns
//! the base geometry stamped with the delta's id and timestamp. A visited
//! set guards against reference cycles, which the store does not prevent.

use std::collections::HashSet;

use async_trait::async_trait;
use stag_types::{ApiError, Mesh, Result};

/// Source of meshes by primary key, implemented by the repository.
#[async_trait]
pub trait MeshSource: Send + Sync {
    async fn mesh_by_id(&self, id: &str) -> Result<Option<Mesh>>;
}

/// Reconstruct a full mesh from a delta chain.
pub async fn resolve_delta_mesh(source: &dyn MeshSource, delta: &Mesh) -> Result<Mesh> {
    if !delta.is_delta || delta.base_mesh_id.is_empty() {
        return Ok(delta.clone());
    }

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(delta.id.clone());

    let mut base_id = delta.base_mesh_id.clone();
    loop {
        if !visited.insert(base_id.clone()) {
            return Err(ApiError::Database(format!(
                "delta cycle detected at mesh {base_id}"
            )));
        }

        let base = source
            .mesh_by_id(&base_id)
            .await?
            .ok_or_else(|| ApiError::Database(format!("failed to load base mesh {base_id}")))?;

        if base.is_delta && !base.base_mesh_id.is_empty() {
            base_id = base.base_mesh_id.clone();
            continue;
        }

        let mut resolved = base;
        resolved.id = delta.id.clone();
        resolved.timestamp = delta.timestamp;
        return Ok(resolved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapSource(HashMap<String, Mesh>);

    #[async_trait]
    impl MeshSource for MapSource {
        async fn mesh_by_id(&self, id: &str) -> Result<Option<Mesh>> {
            Ok(self.0.get(id).cloned())
        }
    }

    fn full(id: &str, vertices: Vec<u8>) -> Mesh {
        Mesh {
            id: id.into(),
            anchor_id: "anchor1".into(),
            vertices,
            faces: vec![0, 1, 2],
            timestamp: 1000,
            ..Default::default()
        }
    }

    fn delta(id: &str, base: &str, payload: Vec<u8>, timestamp: i64) -> Mesh {
        Mesh {
            id: id.into(),
            anchor_id: "anchor1".into(),
            is_delta: true,
            base_mesh_id: base.into(),
            vertices: payload,
            timestamp,
            ..Default::default()
        }
    }

    fn source(meshes: Vec<Mesh>) -> MapSource {
        MapSource(meshes.into_iter().map(|m| (m.id.clone(), m)).collect())
    }

    #[tokio::test]
    async fn non_delta_passes_through() {
        let src = source(vec![]);
        let mesh = full("m1", vec![1, 2, 3]);
        let resolved = resolve_delta_mesh(&src, &mesh).await.unwrap();
        assert_eq!(resolved.id, "m1");
        assert_eq!(resolved.vertices, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn delta_takes_base_geometry_and_own_identity() {
        let src = source(vec![full("m1", vec![1, 2, 3])]);
        let d = delta("d1", "m1", vec![9], 2000);

        let resolved = resolve_delta_mesh(&src, &d).await.unwrap();
        assert_eq!(resolved.id, "d1");
        assert_eq!(resolved.timestamp, 2000);
        assert_eq!(resolved.vertices, vec![1, 2, 3]);
        assert_eq!(resolved.faces, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn chains_resolve_to_the_root_base() {
        let src = source(vec![
            full("m1", vec![1, 2, 3]),
            delta("d1", "m1", vec![8], 2000),
        ]);
        let d2 = delta("d2", "d1", vec![9], 3000);

        let resolved = resolve_delta_mesh(&src, &d2).await.unwrap();
        assert_eq!(resolved.id, "d2");
        assert_eq!(resolved.timestamp, 3000);
        assert_eq!(resolved.vertices, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cycles_are_detected() {
        let src = source(vec![
            delta("d1", "d2", vec![1], 1000),
            delta("d2", "d1", vec![2], 2000),
        ]);
        let d = delta("d1", "d2", vec![1], 1000);

        let err = resolve_delta_mesh(&src, &d).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert!(err.to_string().contains("delta cycle"));
    }

    #[tokio::test]
    async fn self_referencing_delta_is_a_cycle() {
        let src = source(vec![delta("d1", "d1", vec![1], 1000)]);
        let d = delta("d1", "d1", vec![1], 1000);

        let err = resolve_delta_mesh(&src, &d).await.unwrap_err();
        assert!(err.to_string().contains("delta cycle"));
    }

    #[tokio::test]
    async fn missing_base_is_a_database_error() {
        let src = source(vec![]);
        let d = delta("d1", "gone", vec![1], 1000);

        let err = resolve_delta_mesh(&src, &d).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert!(err.to_string().contains("failed to load base mesh"));
    }
}
