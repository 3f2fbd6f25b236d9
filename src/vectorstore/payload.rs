//! Payload construction and deterministic point-id derivation.

use serde_json::{Value, json};
use uuid::Uuid;

use super::types::PointInsert;

/// Namespace UUID used to derive deterministic point ids from `chunk_id`.
/// Fixed so that point ids are stable across process restarts.
const POINT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x1f, 0x4e, 0x6a, 0x02, 0x9c, 0x3d, 0x47, 0x1a, 0x8b, 0x55, 0x6e, 0x0d, 0x2f, 0x9a, 0x7c, 0x11,
]);

/// Derive a deterministic point id from `chunk_id`: repeated upserts of the
/// same chunk resolve to the same point, making ingestion idempotent.
pub fn point_id_from_chunk_id(chunk_id: &str) -> String {
    Uuid::new_v5(&POINT_ID_NAMESPACE, chunk_id.as_bytes()).to_string()
}

/// Build the payload attached to each point: `{source_id, session_id,
/// chunk_id, content}`.
pub fn build_payload(point: &PointInsert) -> Value {
    json!({
        "source_id": point.source_id,
        "session_id": point.session_id,
        "chunk_id": point.chunk_id,
        "content": point.content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_deterministic_for_the_same_chunk_id() {
        let a = point_id_from_chunk_id("chunk-abc");
        let b = point_id_from_chunk_id("chunk-abc");
        assert_eq!(a, b);
    }

    #[test]
    fn point_id_differs_across_chunk_ids() {
        let a = point_id_from_chunk_id("chunk-abc");
        let b = point_id_from_chunk_id("chunk-xyz");
        assert_ne!(a, b);
    }
}
