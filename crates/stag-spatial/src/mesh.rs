//! Mesh hashing and storage preparation.
//!
//! Full meshes are fingerprinted with SHA-256 over their geometry bytes and
//! deduplicated through a process-wide hash -> canonical-id map. Delta
//! meshes are normalized so the stored row is a pure delta payload: the
//! payload moves into `vertices` and the topology fields are cleared.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use stag_types::{ApiError, Mesh, Result};

/// Prepares meshes for storage: dedup lookup and delta normalization.
///
/// The map is a best-effort cache; the mesh insert is idempotent on id, so
/// losing an entry only costs a duplicate-row pre-read downstream.
pub struct MeshProcessor {
    dedup: DashMap<String, String>,
}

impl MeshProcessor {
    pub fn new() -> Self {
        Self {
            dedup: DashMap::new(),
        }
    }

    /// SHA-256 over `vertices ‖ faces ‖ normals` (normals only when
    /// present), lowercase hex.
    pub fn compute_hash(mesh: &Mesh) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&mesh.vertices);
        hasher.update(&mesh.faces);
        if !mesh.normals.is_empty() {
            hasher.update(&mesh.normals);
        }
        hex::encode(hasher.finalize())
    }

    /// Process one mesh for storage.
    ///
    /// Returns the mesh to store (its id rewritten to the canonical one on
    /// a dedup hit) and the number of geometry bytes saved by dedup.
    pub fn process_for_storage(&self, mut mesh: Mesh) -> Result<(Mesh, u64)> {
        if mesh.is_delta {
            if mesh.base_mesh_id.is_empty() {
                return Err(ApiError::Validation(
                    "delta mesh missing base_mesh_id".into(),
                ));
            }
            if !mesh.delta_data.is_empty() {
                mesh.vertices = mesh.delta_data.clone();
                mesh.faces.clear();
                mesh.normals.clear();
            }
            return Ok((mesh, 0));
        }

        let hash = Self::compute_hash(&mesh);
        mesh.hash = hash.clone();

        match self.dedup.entry(hash) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                tracing::debug!(mesh_id = %mesh.id, canonical = %existing.get(), "duplicate mesh");
                let saved = mesh.geometry_len() as u64;
                mesh.id = existing.get().clone();
                Ok((mesh, saved))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(mesh.id.clone());
                Ok((mesh, 0))
            }
        }
    }
}

impl Default for MeshProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_mesh(id: &str, vertices: Vec<u8>, faces: Vec<u8>) -> Mesh {
        Mesh {
            id: id.into(),
            anchor_id: "anchor1".into(),
            vertices,
            faces,
            compression_level: 5,
            timestamp: 1_700_000_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn identical_geometry_hashes_identically() {
        let m1 = full_mesh("mesh1", vec![1, 2, 3, 4, 5, 6], vec![0, 1, 2]);
        let m2 = full_mesh("mesh2", vec![1, 2, 3, 4, 5, 6], vec![0, 1, 2]);
        assert_eq!(MeshProcessor::compute_hash(&m1), MeshProcessor::compute_hash(&m2));

        let m3 = full_mesh("mesh3", vec![7, 8, 9, 10, 11, 12], vec![0, 1, 2]);
        assert_ne!(MeshProcessor::compute_hash(&m1), MeshProcessor::compute_hash(&m3));
    }

    #[test]
    fn hash_is_the_documented_digest() {
        // SHA-256("\x01\x02\x03\x04\x05\x06\x00\x01\x02")
        let mesh = full_mesh("mesh1", vec![1, 2, 3, 4, 5, 6], vec![0, 1, 2]);
        assert_eq!(
            MeshProcessor::compute_hash(&mesh),
            "ff06acabc8eff733920050af247e22c2330b80d5eba1bff4c0c737c346cc3526"
        );
    }

    #[test]
    fn normals_participate_only_when_present() {
        let bare = full_mesh("m", vec![1, 2], vec![3]);
        let mut with_normals = bare.clone();
        with_normals.normals = vec![9, 9];
        assert_ne!(
            MeshProcessor::compute_hash(&bare),
            MeshProcessor::compute_hash(&with_normals)
        );
    }

    #[test]
    fn duplicate_mesh_is_rewritten_to_canonical_id() {
        let processor = MeshProcessor::new();

        let (first, saved) = processor
            .process_for_storage(full_mesh("mesh-A", vec![1, 2, 3, 4, 5, 6], vec![0, 1, 2]))
            .unwrap();
        assert_eq!(first.id, "mesh-A");
        assert_eq!(saved, 0);
        assert!(!first.hash.is_empty());

        let (second, saved) = processor
            .process_for_storage(full_mesh("mesh-B", vec![1, 2, 3, 4, 5, 6], vec![0, 1, 2]))
            .unwrap();
        assert_eq!(second.id, "mesh-A");
        assert_eq!(saved, 9);
        assert_eq!(second.hash, first.hash);
    }

    #[test]
    fn delta_without_base_is_rejected() {
        let processor = MeshProcessor::new();
        let mesh = Mesh {
            id: "delta1".into(),
            anchor_id: "anchor1".into(),
            is_delta: true,
            delta_data: vec![1, 2, 3],
            timestamp: 1_700_000_000_000,
            ..Default::default()
        };

        let err = processor.process_for_storage(mesh).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn delta_payload_moves_into_vertices() {
        let processor = MeshProcessor::new();
        let mesh = Mesh {
            id: "delta1".into(),
            anchor_id: "anchor1".into(),
            is_delta: true,
            base_mesh_id: "base1".into(),
            vertices: vec![8, 8, 8],
            faces: vec![7],
            normals: vec![6],
            delta_data: vec![1, 2, 3],
            ..Default::default()
        };

        let (processed, saved) = processor.process_for_storage(mesh).unwrap();
        assert_eq!(saved, 0);
        assert_eq!(processed.vertices, vec![1, 2, 3]);
        assert!(processed.faces.is_empty());
        assert!(processed.normals.is_empty());
        // Deltas are stored as-is, never hashed for dedup.
        assert!(processed.hash.is_empty());
    }
}
