//! HNSW engine: layer assignment, insertion with robust pruning, and
//! hierarchical search over a [`GraphStore`].
//!
//! Distance computation is abstracted behind [`VectorSource`] so this module
//! never depends on how vectors are stored or quantized — the hybrid
//! coordinator and the segmented builder each supply their own source.

use crate::graph::GraphStore;
use crate::types::{InternalIndex, NO_ENTRY_POINT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tracing::warn;

/// Supplies distances between internal indices and from an arbitrary query
/// vector to a stored internal index.
pub trait VectorSource {
    fn distance(&self, a: InternalIndex, b: InternalIndex) -> f32;
    fn distance_to_query(&self, query: &[f32], node: InternalIndex) -> f32;
}

#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub m: usize,
    pub mmax0: usize,
    pub ef_construction: usize,
    pub alpha: f32,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            mmax0: 32,
            ef_construction: 200,
            alpha: 1.2,
        }
    }
}

pub struct HnswEngine {
    params: HnswParams,
    graph: GraphStore,
    entry_point: InternalIndex,
    rng: StdRng,
}

impl HnswEngine {
    pub fn new(capacity: usize, params: HnswParams, seed: u64) -> Self {
        Self {
            graph: GraphStore::new(capacity, params.m, params.mmax0),
            entry_point: NO_ENTRY_POINT,
            rng: StdRng::seed_from_u64(seed),
            params,
        }
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut GraphStore {
        &mut self.graph
    }

    pub fn entry_point(&self) -> InternalIndex {
        self.entry_point
    }

    pub fn entry_point_level(&self) -> u8 {
        if self.entry_point == NO_ENTRY_POINT {
            0
        } else {
            self.graph.max_level(self.entry_point).unwrap_or(0)
        }
    }

    /// Restores an engine from a loaded graph and recorded entry point
    /// (used by persistence recovery).
    pub fn from_parts(graph: GraphStore, entry_point: InternalIndex, params: HnswParams, seed: u64) -> Self {
        Self {
            graph,
            entry_point,
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn cap_for_layer(&self, layer: u8) -> usize {
        if layer == 0 { self.params.mmax0 } else { self.params.m }
    }

    /// `L = floor(-ln(U(0,1]) / ln(M))`, clamped to `[0, 32]`.
    fn sample_level(&mut self) -> u8 {
        let u: f64 = 1.0 - self.rng.random::<f64>(); // (0, 1]
        let m = self.params.m.max(2) as f64;
        let level = (-u.ln() / m.ln()).floor();
        level.clamp(0.0, 32.0) as u8
    }

    /// Inserts a new node at internal index `idx` whose vector is already
    /// available through `vectors`. Returns the sampled level.
    pub fn insert(&mut self, idx: InternalIndex, vectors: &impl VectorSource) -> u8 {
        let level = self.sample_level();
        self.insert_at_level(idx, level, vectors);
        level
    }

    /// Inserts `idx` at a caller-supplied level instead of sampling one —
    /// used by the segmented builder's merge phase, where each node's level
    /// was already decided during its segment's independent build.
    pub fn insert_with_level(&mut self, idx: InternalIndex, level: u8, vectors: &impl VectorSource) {
        self.insert_at_level(idx, level, vectors);
    }

    /// Force-sets the entry point without re-deriving it, for the segmented
    /// merge phase's argmax-over-segments rule.
    pub fn set_entry_point(&mut self, idx: InternalIndex) {
        self.entry_point = idx;
    }

    fn insert_at_level(&mut self, idx: InternalIndex, level: u8, vectors: &impl VectorSource) {
        if self.entry_point == NO_ENTRY_POINT {
            self.graph.insert_node(idx, level);
            self.entry_point = idx;
            return;
        }

        let top = self.graph.max_level(self.entry_point).unwrap_or(0);
        let mut current = self.entry_point;

        // ef=1 greedy descent through layers strictly above `level`.
        for layer in ((level + 1)..=top).rev() {
            let found = self.search_layer_internal(idx, &[current], 1, layer, vectors);
            if let Some((best, _)) = found.first() {
                current = *best;
            }
        }

        self.graph.insert_node(idx, level);

        for layer in (0..=level.min(top)).rev() {
            let candidates = self.search_layer_internal(idx, &[current], self.params.ef_construction, layer, vectors);
            let cap = self.cap_for_layer(layer);
            let neighbors = robust_prune(idx, candidates.clone(), cap, self.params.alpha, vectors);
            self.graph.set_neighbors(idx, layer, neighbors.clone());

            for &v in &neighbors {
                self.graph.add_edge(v, layer, idx);
                let v_cap = self.cap_for_layer(layer);
                if self.graph.outdegree(v, layer) > v_cap {
                    self.reprune_node(v, layer, vectors);
                }
            }

            if let Some((best, _)) = candidates.first() {
                current = *best;
            }
        }

        if level > top {
            self.entry_point = idx;
        }
    }

    /// Re-derives `v`'s neighbor set at `layer` via `robust_prune` once it
    /// exceeds the layer cap, dropping the losing edges on both sides.
    fn reprune_node(&mut self, v: InternalIndex, layer: u8, vectors: &impl VectorSource) {
        let before: HashSet<InternalIndex> = self.graph.neighbors(v, layer).iter().copied().collect();
        let candidates: Vec<(InternalIndex, f32)> = before.iter().map(|&n| (n, vectors.distance(v, n))).collect();
        let mut sorted = candidates;
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        let cap = self.cap_for_layer(layer);
        let kept = robust_prune(v, sorted, cap, self.params.alpha, vectors);
        let kept_set: HashSet<InternalIndex> = kept.iter().copied().collect();

        for &dropped in before.difference(&kept_set) {
            self.graph.remove_edge(dropped, layer, v);
        }
        self.graph.set_neighbors(v, layer, kept);
    }

    /// Full hierarchical search: greedy `ef=1` descent from the entry point
    /// down to layer 1, then a bounded search at layer 0.
    pub fn search(&self, query: &[f32], k: usize, ef: usize, vectors: &impl VectorSource) -> Vec<(InternalIndex, f32)> {
        if self.entry_point == NO_ENTRY_POINT {
            return Vec::new();
        }
        let top = self.graph.max_level(self.entry_point).unwrap_or(0);
        let mut current = self.entry_point;

        for layer in (1..=top).rev() {
            let found = self.search_layer_query(query, &[current], 1, layer, vectors);
            if let Some((best, _)) = found.first() {
                current = *best;
            }
        }

        let ef = ef.max(k);
        let mut result = self.search_layer_query(query, &[current], ef, 0, vectors);
        result.truncate(k);

        if result.is_empty() && self.graph.node_count() > 0 {
            warn!(
                entry_point = self.entry_point,
                entry_point_level = top,
                node_count = self.graph.node_count(),
                "search returned empty result on a non-empty graph; possible broken entry point"
            );
        }
        result
    }

    fn search_layer_internal(
        &self,
        q_idx: InternalIndex,
        entry_points: &[InternalIndex],
        ef: usize,
        layer: u8,
        vectors: &impl VectorSource,
    ) -> Vec<(InternalIndex, f32)> {
        self.search_layer(entry_points, ef, layer, |node| vectors.distance(q_idx, node))
    }

    fn search_layer_query(
        &self,
        query: &[f32],
        entry_points: &[InternalIndex],
        ef: usize,
        layer: u8,
        vectors: &impl VectorSource,
    ) -> Vec<(InternalIndex, f32)> {
        self.search_layer(entry_points, ef, layer, |node| vectors.distance_to_query(query, node))
    }

    /// Min-heap of candidates to expand (`C`), bounded max-heap of current
    /// best (`W`). Returns `W` sorted ascending by distance with an
    /// internal-index tie-break.
    fn search_layer(
        &self,
        entry_points: &[InternalIndex],
        ef: usize,
        layer: u8,
        dist: impl Fn(InternalIndex) -> f32,
    ) -> Vec<(InternalIndex, f32)> {
        let mut visited: HashSet<InternalIndex> = entry_points.iter().copied().collect();
        let mut candidates: BinaryHeap<Reverse<Entry>> = BinaryHeap::new();
        let mut w: BinaryHeap<Entry> = BinaryHeap::new();

        for &ep in entry_points {
            let d = dist(ep);
            candidates.push(Reverse(Entry { dist: d, idx: ep }));
            w.push(Entry { dist: d, idx: ep });
        }

        while let Some(Reverse(c)) = candidates.pop() {
            if let Some(worst) = w.peek() {
                if w.len() >= ef && c.dist > worst.dist {
                    break;
                }
            }
            for &neighbor in self.graph.neighbors(c.idx, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = dist(neighbor);
                let should_push = w.len() < ef || w.peek().is_some_and(|worst| d < worst.dist);
                if should_push {
                    candidates.push(Reverse(Entry { dist: d, idx: neighbor }));
                    w.push(Entry { dist: d, idx: neighbor });
                    if w.len() > ef {
                        w.pop();
                    }
                }
            }
        }

        w.into_sorted_vec().into_iter().map(|e| (e.idx, e.dist)).collect()
    }
}

/// Greedily admits candidates (already sorted ascending by distance to `q`)
/// iff they are not dominated, by factor `alpha`, by an already-admitted
/// neighbor.
fn robust_prune(
    q: InternalIndex,
    candidates: Vec<(InternalIndex, f32)>,
    m_l: usize,
    alpha: f32,
    vectors: &impl VectorSource,
) -> Vec<InternalIndex> {
    let mut result: Vec<InternalIndex> = Vec::with_capacity(m_l);
    for (c, dist_c_q) in candidates {
        if c == q {
            continue;
        }
        let admitted = result.iter().all(|&r| dist_c_q < alpha * vectors.distance(c, r));
        if admitted {
            result.push(c);
            if result.len() >= m_l {
                break;
            }
        }
    }
    result
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    dist: f32,
    idx: InternalIndex,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.idx == other.idx
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.idx.cmp(&other.idx))
    }
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
            data: (0..n).map(|i| vec![i as f32, (i * 2) as f32]).collect(),
        }
    }

    #[test]
    fn first_insert_becomes_entry_point_with_no_edges() {
        let vectors = grid_vectors(1);
        let mut engine = HnswEngine::new(16, HnswParams::default(), 1);
        engine.insert(0, &vectors);
        assert_eq!(engine.entry_point(), 0);
    }

    #[test]
    fn search_finds_exact_match_among_inserted_points() {
        let vectors = grid_vectors(200);
        let mut engine = HnswEngine::new(256, HnswParams::default(), 42);
        for i in 0..200u32 {
            engine.insert(i, &vectors);
        }
        let query = vectors.data[57].clone();
        let results = engine.search(&query, 1, 50, &vectors);
        assert_eq!(results[0].0, 57);
        assert!(results[0].1 < 1e-6);
    }

    #[test]
    fn edges_are_bidirectional_or_both_sides_pruned() {
        let vectors = grid_vectors(100);
        let mut engine = HnswEngine::new(128, HnswParams::default(), 7);
        for i in 0..100u32 {
            engine.insert(i, &vectors);
        }
        for u in engine.graph().node_indices() {
            let max_level = engine.graph().max_level(u).unwrap();
            for layer in 0..=max_level {
                for &v in engine.graph().neighbors(u, layer) {
                    let back: Vec<_> = engine.graph().neighbors(v, layer).to_vec();
                    assert!(back.contains(&u), "edge {u}->{v} at layer {layer} has no back-edge");
                }
            }
        }
    }

    #[test]
    fn entry_point_level_is_max_over_all_nodes() {
        let vectors = grid_vectors(300);
        let mut engine = HnswEngine::new(320, HnswParams::default(), 3);
        for i in 0..300u32 {
            engine.insert(i, &vectors);
        }
        let ep_level = engine.entry_point_level();
        for idx in engine.graph().node_indices() {
            assert!(engine.graph().max_level(idx).unwrap() <= ep_level);
        }
    }

    #[test]
    fn identical_seed_and_order_produce_identical_topology() {
        let vectors = grid_vectors(150);
        let mut a = HnswEngine::new(160, HnswParams::default(), 99);
        let mut b = HnswEngine::new(160, HnswParams::default(), 99);
        for i in 0..150u32 {
            a.insert(i, &vectors);
            b.insert(i, &vectors);
        }
        for idx in 0..150u32 {
            assert_eq!(a.graph().max_level(idx), b.graph().max_level(idx));
            let max_level = a.graph().max_level(idx).unwrap();
            for layer in 0..=max_level {
                assert_eq!(a.graph().neighbors(idx, layer), b.graph().neighbors(idx, layer));
            }
        }
    }

    #[test]
    fn search_on_empty_graph_returns_empty() {
        let vectors = grid_vectors(1);
        let engine = HnswEngine::new(8, HnswParams::default(), 1);
        assert!(engine.search(&[0.0, 0.0], 5, 50, &vectors).is_empty());
    }
}
