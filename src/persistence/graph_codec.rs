//! Graph <-> byte encoding used by the snapshot file.
//!
//! Kept separate from [`crate::graph::GraphStore`] itself: the live store's
//! capacity/resize invariants are its own concern, while this module only
//! needs a flat, versionable dump of every node's multi-layer adjacency.

use crate::error::{OmenError, Result};
use crate::graph::GraphStore;
use crate::types::InternalIndex;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct GraphDump {
    capacity: usize,
    m: usize,
    mmax0: usize,
    nodes: Vec<(InternalIndex, u8, Vec<Vec<InternalIndex>>)>,
}

pub fn encode(graph: &GraphStore) -> Vec<u8> {
    let dump = GraphDump {
        capacity: graph.capacity(),
        m: graph.m(),
        mmax0: graph.mmax0(),
        nodes: graph.export_nodes(),
    };
    bincode::serialize(&dump).expect("in-memory graph dump cannot fail to serialize")
}

pub fn decode(bytes: &[u8]) -> Result<GraphStore> {
    let dump: GraphDump =
        bincode::deserialize(bytes).map_err(|e| OmenError::CorruptedState(format!("graph snapshot: {e}")))?;
    Ok(GraphStore::import(dump.capacity, dump.m, dump.mmax0, dump.nodes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_topology() {
        let mut graph = GraphStore::new(8, 4, 8);
        graph.insert_node(0, 1);
        graph.insert_node(1, 1);
        graph.add_edge(0, 0, 1);
        graph.add_edge(1, 0, 0);
        let bytes = encode(&graph);
        let restored = decode(&bytes).unwrap();
        assert_eq!(restored.neighbors(0, 0), &[1]);
        assert_eq!(restored.capacity(), 8);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"not a graph").is_err());
    }
}
