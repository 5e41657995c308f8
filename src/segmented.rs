//! Segmented parallel builder: disjoint per-segment graphs built
//! concurrently with rayon, merged in a single-threaded phase.
//!
//! Parallel writers never share a mutable graph or edge list — each segment
//! gets its own [`HnswEngine`] over isolated memory. Only the merge phase
//! touches a shared structure, and it runs on one thread.

use crate::hnsw::{HnswEngine, HnswParams, VectorSource};
use crate::types::{InternalIndex, NO_ENTRY_POINT};
use rayon::prelude::*;

/// Partitions `ids` into `min(num_cores, ceil(ids.len() / segment_size))`
/// disjoint segments, builds one graph per segment in parallel, then merges
/// them into a single graph sized to hold every id.
pub fn build(
    ids: &[InternalIndex],
    vectors: &(impl VectorSource + Sync),
    params: HnswParams,
    seed: u64,
    num_cores: usize,
    segment_size: usize,
) -> HnswEngine {
    let capacity = ids.iter().copied().max().map(|m| m as usize + 1).unwrap_or(0);
    if ids.is_empty() {
        return HnswEngine::new(capacity, params, seed);
    }

    let num_segments = num_cores.max(1).min(ids.len().div_ceil(segment_size.max(1)).max(1));
    let chunk_len = ids.len().div_ceil(num_segments);

    let segments: Vec<HnswEngine> = ids
        .par_chunks(chunk_len)
        .enumerate()
        .map(|(i, chunk)| {
            let mut engine = HnswEngine::new(capacity, params, seed.wrapping_add(i as u64 + 1));
            for &id in chunk {
                engine.insert(id, vectors);
            }
            engine
        })
        .collect();

    merge(segments, capacity, params, seed, vectors)
}

/// Chooses the largest segment as the base graph, then reinserts every other
/// segment's nodes into it at their already-sampled level (search + robust
/// prune + bidirectional connect — the same path as a single-threaded
/// insert). The merged entry point is the argmax of `max_level` across all
/// segments.
fn merge(
    mut segments: Vec<HnswEngine>,
    capacity: usize,
    params: HnswParams,
    seed: u64,
    vectors: &impl VectorSource,
) -> HnswEngine {
    if segments.is_empty() {
        return HnswEngine::new(capacity, params, seed);
    }

    let base_idx = segments
        .iter()
        .enumerate()
        .max_by_key(|(_, e)| e.graph().node_count())
        .map(|(i, _)| i)
        .expect("segments is non-empty");
    let mut base = segments.remove(base_idx);

    let mut best_entry = base.entry_point();
    let mut best_level = base.entry_point_level();

    for segment in &segments {
        if segment.entry_point() != NO_ENTRY_POINT {
            let seg_level = segment.entry_point_level();
            if seg_level > best_level {
                best_level = seg_level;
                best_entry = segment.entry_point();
            }
        }

        for node in segment.graph().node_indices().collect::<Vec<_>>() {
            if base.graph().contains(node) {
                continue;
            }
            let level = segment.graph().max_level(node).unwrap_or(0);
            base.insert_with_level(node, level, vectors);
        }
    }

    if best_entry != NO_ENTRY_POINT && best_entry != base.entry_point() {
        base.set_entry_point(best_entry);
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance;

    struct InMemoryVectors {
        data: Vec<Vec<f32>>,
    }

    impl VectorSource for InMemoryVectors {
        fn distance(&self, a: InternalIndex, b: InternalIndex) -> f32 {
            distance::l2_sq(&self.data[a as usize], &self.data[b as usize])
        }
        fn distance_to_query(&self, query: &[f32], node: InternalIndex) -> f32 {
            distance::l2_sq(query, &self.data[node as usize])
        }
    }

    fn grid_vectors(n: usize) -> InMemoryVectors {
        InMemoryVectors {
            data: (0..n).map(|i| vec![i as f32, (i * 3) as f32]).collect(),
        }
    }

    #[test]
    fn merged_graph_contains_every_node() {
        let n = 400;
        let vectors = grid_vectors(n);
        let ids: Vec<InternalIndex> = (0..n as u32).collect();
        let engine = build(&ids, &vectors, HnswParams::default(), 11, 4, 50);
        for &id in &ids {
            assert!(engine.graph().contains(id), "node {id} missing after merge");
        }
    }

    #[test]
    fn merged_graph_finds_exact_matches() {
        let n = 400;
        let vectors = grid_vectors(n);
        let ids: Vec<InternalIndex> = (0..n as u32).collect();
        let engine = build(&ids, &vectors, HnswParams::default(), 5, 4, 50);
        let query = vectors.data[123].clone();
        let results = engine.search(&query, 1, 50, &vectors);
        assert_eq!(results[0].0, 123);
    }

    #[test]
    fn entry_point_level_is_max_across_segments() {
        let n = 400;
        let vectors = grid_vectors(n);
        let ids: Vec<InternalIndex> = (0..n as u32).collect();
        let engine = build(&ids, &vectors, HnswParams::default(), 11, 4, 50);
        let ep_level = engine.entry_point_level();
        for &id in &ids {
            assert!(engine.graph().max_level(id).unwrap() <= ep_level);
        }
    }

    #[test]
    fn empty_input_produces_empty_graph() {
        let vectors = grid_vectors(1);
        let engine = build(&[], &vectors, HnswParams::default(), 1, 4, 50);
        assert_eq!(engine.entry_point(), NO_ENTRY_POINT);
    }
}
