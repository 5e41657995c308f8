//! CSR-like graph store.
//!
//! The live, mutable adjacency lives as one growable edge list per
//! `(node, layer)` — `Vec::push` already gives the amortized O(1) append
//! with a >=1.5x growth factor, and per-layer caps (`Mmax0` at layer 0, `M`
//! above) are enforced by the HNSW engine's pruning, not by the store itself.
//!
//! Bulk load and persistence go through [`GraphStore::to_csr`] /
//! [`GraphStore::from_csr`], a true compressed-sparse-row encoding of layer
//! 0 (the layer with the most edges and the only one every node has). The
//! CSR's row-offset array is always sized `capacity + 1`: prior
//! implementations in this codebase's history derived that array's length
//! from the live node count instead of the store's declared capacity, which
//! corrupted memory the moment the store held exactly `capacity` nodes and
//! something else still dereferenced offset `capacity`. `GraphStore::capacity`
//! is authoritative and is never silently re-derived.

use crate::types::InternalIndex;

#[derive(Debug, Clone)]
struct Node {
    max_level: u8,
    /// `edges[layer]` — present for `layer` in `0..=max_level`.
    edges: Vec<Vec<InternalIndex>>,
}

/// CSR-like adjacency store for layer 0, parameterized by `(capacity, M, Mmax0)`.
pub struct GraphStore {
    capacity: usize,
    m: usize,
    mmax0: usize,
    nodes: Vec<Option<Node>>,
}

impl GraphStore {
    pub fn new(capacity: usize, m: usize, mmax0: usize) -> Self {
        Self {
            capacity,
            m,
            mmax0,
            nodes: (0..capacity + 1).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn mmax0(&self) -> usize {
        self.mmax0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn cap_for_layer(&self, layer: u8) -> usize {
        if layer == 0 { self.mmax0 } else { self.m }
    }

    /// Resize policy: grow to `max(capacity*2, needed + 100)`, copying the
    /// used prefix exactly and zeroing (here: `None`-ing) the new tail.
    /// `self.capacity` is set to the new value directly — it is never
    /// re-derived from `node_count()`.
    pub fn ensure_capacity(&mut self, needed: usize) {
        if needed <= self.capacity {
            return;
        }
        let new_capacity = (self.capacity * 2).max(needed + 100);
        let mut new_nodes: Vec<Option<Node>> = (0..new_capacity + 1).map(|_| None).collect();
        for (i, n) in self.nodes.drain(..).enumerate() {
            if i < new_nodes.len() {
                new_nodes[i] = n;
            }
        }
        self.nodes = new_nodes;
        self.capacity = new_capacity;
    }

    /// Inserts a brand-new node with the given max level and empty edge
    /// lists at every layer `0..=max_level`.
    pub fn insert_node(&mut self, idx: InternalIndex, max_level: u8) {
        let i = idx as usize;
        self.ensure_capacity(i + 1);
        let edges = (0..=max_level)
            .map(|l| Vec::with_capacity(self.cap_for_layer(l).min(8)))
            .collect();
        self.nodes[i] = Some(Node { max_level, edges });
    }

    pub fn contains(&self, idx: InternalIndex) -> bool {
        self.nodes.get(idx as usize).is_some_and(|n| n.is_some())
    }

    pub fn max_level(&self, idx: InternalIndex) -> Option<u8> {
        self.nodes.get(idx as usize)?.as_ref().map(|n| n.max_level)
    }

    pub fn neighbors(&self, idx: InternalIndex, layer: u8) -> &[InternalIndex] {
        match self.nodes.get(idx as usize).and_then(|n| n.as_ref()) {
            Some(n) if (layer as usize) < n.edges.len() => &n.edges[layer as usize],
            _ => &[],
        }
    }

    pub fn outdegree(&self, idx: InternalIndex, layer: u8) -> usize {
        self.neighbors(idx, layer).len()
    }

    /// Appends a directed edge `u -> v` at `layer`, amortized O(1). Does not
    /// enforce the per-layer cap; callers invoke `robust_prune` once the cap
    /// is exceeded.
    pub fn add_edge(&mut self, u: InternalIndex, layer: u8, v: InternalIndex) {
        if let Some(Some(node)) = self.nodes.get_mut(u as usize) {
            if (layer as usize) < node.edges.len() && !node.edges[layer as usize].contains(&v) {
                node.edges[layer as usize].push(v);
            }
        }
    }

    /// Removes a directed edge `u -> v` at `layer` in O(outdegree).
    pub fn remove_edge(&mut self, u: InternalIndex, layer: u8, v: InternalIndex) {
        if let Some(Some(node)) = self.nodes.get_mut(u as usize) {
            if (layer as usize) < node.edges.len() {
                node.edges[layer as usize].retain(|&n| n != v);
            }
        }
    }

    /// Replaces `u`'s entire neighbor list at `layer` (used after
    /// `robust_prune` recomputes the kept set).
    pub fn set_neighbors(&mut self, u: InternalIndex, layer: u8, neighbors: Vec<InternalIndex>) {
        if let Some(Some(node)) = self.nodes.get_mut(u as usize) {
            if (layer as usize) < node.edges.len() {
                node.edges[layer as usize] = neighbors;
            }
        }
    }

    /// All internal indices with an allocated node, for iteration during
    /// merge/compaction.
    pub fn node_indices(&self) -> impl Iterator<Item = InternalIndex> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| i as InternalIndex))
    }

    /// Exports every node's full multi-layer adjacency, for persistence
    /// (unlike [`GraphStore::to_csr`], which covers layer 0 only).
    pub fn export_nodes(&self) -> Vec<(InternalIndex, u8, Vec<Vec<InternalIndex>>)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|node| (i as InternalIndex, node.max_level, node.edges.clone())))
            .collect()
    }

    /// Rebuilds a store from an `export_nodes` dump.
    pub fn import(
        capacity: usize,
        m: usize,
        mmax0: usize,
        nodes: Vec<(InternalIndex, u8, Vec<Vec<InternalIndex>>)>,
    ) -> Self {
        let mut store = Self::new(capacity, m, mmax0);
        for (idx, max_level, edges) in nodes {
            let i = idx as usize;
            store.ensure_capacity(i + 1);
            store.nodes[i] = Some(Node { max_level, edges });
        }
        store
    }

    /// Encodes layer 0's adjacency as compressed sparse row: `row_offsets`
    /// has exactly `capacity + 1` entries (the sizing invariant this module
    /// exists to enforce), `col_indices` is the flattened neighbor list.
    pub fn to_csr(&self) -> Csr {
        let mut row_offsets = Vec::with_capacity(self.capacity + 1);
        let mut col_indices = Vec::new();
        row_offsets.push(0u32);
        for i in 0..self.capacity {
            if let Some(Some(node)) = self.nodes.get(i) {
                if let Some(l0) = node.edges.first() {
                    col_indices.extend_from_slice(l0);
                }
            }
            row_offsets.push(col_indices.len() as u32);
        }
        Csr {
            capacity: self.capacity,
            row_offsets,
            col_indices,
        }
    }

    /// Rebuilds layer-0 adjacency from a CSR snapshot. Nodes must already
    /// exist (from `insert_node`) with at least one layer allocated.
    pub fn apply_csr(&mut self, csr: &Csr) {
        debug_assert_eq!(csr.row_offsets.len(), csr.capacity + 1);
        for i in 0..csr.capacity.min(self.nodes.len()) {
            let start = csr.row_offsets[i] as usize;
            let end = csr.row_offsets[i + 1] as usize;
            if let Some(Some(node)) = self.nodes.get_mut(i) {
                if !node.edges.is_empty() {
                    node.edges[0] = csr.col_indices[start..end].to_vec();
                }
            }
        }
    }
}

/// Compressed sparse row encoding of one graph layer.
#[derive(Debug, Clone)]
pub struct Csr {
    pub capacity: usize,
    pub row_offsets: Vec<u32>,
    pub col_indices: Vec<u32>,
}
