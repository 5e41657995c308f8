//! Hybrid coordinator: owns the buffer/graph state machine, the background
//! drain worker, and the public read/write API the rest of this crate exists
//! to serve.
//!
//! Writes land in the flat buffer and return immediately; a background
//! task migrates them into the HNSW graph in batches. Searches cover both
//! regions and merge results by distance, so a vector is found whether or
//! not it has been migrated yet. The short critical sections are
//! `parking_lot::RwLock` rather than `std::sync` — never held across an
//! `.await`, so the choice only matters for uncontended-lock latency.

use crate::config::{Metric, OpenConfig};
use crate::distance;
use crate::error::{OmenError, Result};
use crate::flat_buffer::FlatBuffer;
use crate::hnsw::{HnswEngine, HnswParams, VectorSource};
use crate::id_directory::IdDirectory;
use crate::persistence;
use crate::quantize::{Code, Quantizer};
use crate::types::{ExternalId, InternalIndex, SearchHit, Stats, NO_ENTRY_POINT};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{info, warn};

/// The coordinator's three-state lifecycle. Nothing outside this module
/// inspects it directly; `Stats` exposes the observable parts (`node_count`,
/// `buffer_count`) a caller needs to tell the states apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Empty,
    BufferOnly,
    BufferAndGraph,
    GraphOnly,
}

struct State {
    ids: IdDirectory,
    buffer: FlatBuffer,
    engine: HnswEngine,
    vectors: Vec<Option<Vec<f32>>>,
    quantizer: Quantizer,
    encoded: Vec<Option<Code>>,
    tombstones: HashSet<InternalIndex>,
    next_index: InternalIndex,
    phase: Phase,
}

impl State {
    fn vector(&self, idx: InternalIndex) -> &[f32] {
        self.vectors[idx as usize]
            .as_deref()
            .expect("internal index with no stored vector")
    }

    fn advance_phase(&mut self) {
        let has_buffer = self.buffer.unmigrated_count() > 0;
        let has_graph = self.engine.graph().node_count() > 0;
        self.phase = match (has_buffer, has_graph) {
            (false, false) => Phase::Empty,
            (true, false) => Phase::BufferOnly,
            (true, true) => Phase::BufferAndGraph,
            (false, true) => Phase::GraphOnly,
        };
    }
}

/// Wraps `State` so `HnswEngine`/`FlatBuffer` can compute distances without
/// knowing how vectors are stored or which metric is configured.
///
/// Borrows only the `vectors` field (not the whole `State`) so callers can
/// hold this view alongside a mutable borrow of `state.engine`.
struct StateVectors<'a> {
    vectors: &'a [Option<Vec<f32>>],
    metric: Metric,
}

impl StateVectors<'_> {
    fn vector(&self, idx: InternalIndex) -> &[f32] {
        self.vectors[idx as usize]
            .as_deref()
            .expect("internal index with no stored vector")
    }
}

impl VectorSource for StateVectors<'_> {
    fn distance(&self, a: InternalIndex, b: InternalIndex) -> f32 {
        distance::metric_distance(self.metric, self.vector(a), self.vector(b))
    }

    fn distance_to_query(&self, query: &[f32], node: InternalIndex) -> f32 {
        distance::metric_distance(self.metric, query, self.vector(node))
    }
}

fn vectors_view(vectors: &[Option<Vec<f32>>], metric: Metric) -> StateVectors<'_> {
    StateVectors { vectors, metric }
}

/// Options for `search`; `Default` matches the documented call-time
/// defaults (`ef = max(k, 50)`, buffer included, no deadline).
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub ef: Option<usize>,
    pub include_buffer: bool,
    pub deadline: Option<Instant>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            ef: None,
            include_buffer: true,
            deadline: None,
        }
    }
}

struct Shared {
    config: OpenConfig,
    path: PathBuf,
    state: RwLock<State>,
    stop: AtomicBool,
    notify: Notify,
}

/// Drains up to `drain_batch` unmigrated buffer entries into the graph,
/// choosing the segmented builder over a plain per-item insert once a batch
/// reaches `segment_threshold`. Shared by the explicit `flush` path and the
/// background worker so the two never drift apart.
fn migrate_batch(shared: &Shared, state: &mut State, batch: Vec<(usize, InternalIndex, Vec<f32>)>) {
    if batch.is_empty() {
        return;
    }
    let metric = shared.config.metric;
    let segment_threshold = shared.config.segment_threshold as usize;
    let before_entry = state.engine.entry_point();

    if batch.len() >= segment_threshold && batch.len() > 1 {
        let ids: Vec<InternalIndex> = batch.iter().map(|(_, idx, _)| *idx).collect();
        let params = HnswParams {
            m: shared.config.m as usize,
            mmax0: shared.config.mmax0 as usize,
            ef_construction: shared.config.ef_construction as usize,
            alpha: 1.2,
        };
        let built = {
            let vectors = vectors_view(&state.vectors, metric);
            crate::segmented::build(
                &ids,
                &vectors,
                params,
                shared.config.seed,
                shared.config.worker_threads as usize,
                shared.config.segment_size as usize,
            )
        };
        let entry_candidate = built.entry_point();
        let entry_level = built.entry_point_level();
        let current_level = state.engine.entry_point_level();
        for idx in built.graph().node_indices().collect::<Vec<_>>() {
            if state.engine.graph().contains(idx) {
                continue;
            }
            let level = built.graph().max_level(idx).unwrap_or(0);
            let vectors = vectors_view(&state.vectors, metric);
            state.engine.insert_with_level(idx, level, &vectors);
        }
        if state.engine.entry_point() == NO_ENTRY_POINT
            || (entry_candidate != NO_ENTRY_POINT && entry_level > current_level)
        {
            state.engine.set_entry_point(entry_candidate);
        }
    } else {
        for (_, idx, _) in &batch {
            let vectors = vectors_view(&state.vectors, metric);
            state.engine.insert(*idx, &vectors);
        }
    }

    for (slot, idx, _) in &batch {
        state.buffer.mark_migrated(*slot);
        if let Err(e) = persistence::append_wal(&shared.path, &persistence::WalOp::Migrate { internal_index: *idx }) {
            warn!(error = %e, "failed to append WAL record for migrate");
        }
    }
    if state.engine.entry_point() != before_entry {
        if let Err(e) = persistence::append_wal(
            &shared.path,
            &persistence::WalOp::UpdateEntryPoint { internal_index: state.engine.entry_point() },
        ) {
            warn!(error = %e, "failed to append WAL record for entry point update");
        }
    }

    state.advance_phase();
}

async fn drain_loop(shared: Arc<Shared>) {
    let interval = Duration::from_millis(shared.config.drain_interval_ms.max(1) as u64);
    loop {
        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }
        if shared.stop.load(AtomicOrdering::Acquire) {
            return;
        }

        let batch_size = shared.config.drain_batch as usize;
        let mut state = shared.state.write();
        let batch = state.buffer.drain_unmigrated(batch_size);
        migrate_batch(&shared, &mut state, batch);
    }
}

/// An open vector index. Cheaply cloneable — every clone shares the same
/// background worker and on-disk files.
#[derive(Clone)]
pub struct Index {
    shared: Arc<Shared>,
    runtime: Arc<tokio::runtime::Runtime>,
    worker: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl Index {
    /// Opens (or creates) an index at `config.path`. If a snapshot exists it
    /// is loaded and any append-log records on top of it are replayed.
    pub fn open(config: OpenConfig) -> Result<Self> {
        config.validate()?;
        let path = PathBuf::from(&config.path);
        let params = HnswParams {
            m: config.m as usize,
            mmax0: config.mmax0 as usize,
            ef_construction: config.ef_construction as usize,
            alpha: 1.2,
        };

        let state = if path.join("index.meta").exists() {
            Self::recover(&config, &path, params)?
        } else {
            State {
                ids: IdDirectory::new(),
                buffer: FlatBuffer::new(config.dimension as usize, config.buffer_capacity as usize),
                engine: HnswEngine::new(1024, params, config.seed),
                vectors: Vec::new(),
                quantizer: Quantizer::from_config(config.quantization),
                encoded: Vec::new(),
                tombstones: HashSet::new(),
                next_index: 0,
                phase: Phase::Empty,
            }
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1) as usize)
            .enable_time()
            .build()
            .map_err(OmenError::IOFailed)?;

        let shared = Arc::new(Shared {
            config,
            path,
            state: RwLock::new(state),
            stop: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let worker_shared = shared.clone();
        let handle = runtime.spawn(async move { drain_loop(worker_shared).await });

        Ok(Self {
            shared,
            runtime: Arc::new(runtime),
            worker: Arc::new(RwLock::new(Some(handle))),
        })
    }

    fn recover(config: &OpenConfig, path: &std::path::Path, params: HnswParams) -> Result<State> {
        let loaded = persistence::load(path)?;
        if loaded.header.dimension != config.dimension {
            return Err(OmenError::DimensionMismatch {
                expected: config.dimension,
                actual: loaded.header.dimension,
            });
        }

        let mut engine = HnswEngine::from_parts(loaded.graph, loaded.header.entry_point, params, config.seed);

        let max_idx = loaded
            .ids
            .iter()
            .map(|(_, v)| v)
            .chain(loaded.buffer.iter().map(|(idx, _)| *idx))
            .max()
            .unwrap_or(0);
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; max_idx as usize + 1];
        for (idx, v) in &loaded.vectors {
            vectors[*idx as usize] = Some(v.clone());
        }
        for (idx, v) in &loaded.buffer {
            vectors[*idx as usize] = Some(v.clone());
        }

        let mut encoded: Vec<Option<Code>> = vec![None; max_idx as usize + 1];
        for (idx, c) in loaded.encoded {
            encoded[idx as usize] = Some(c);
        }

        let mut buffer = FlatBuffer::new(config.dimension as usize, config.buffer_capacity as usize);
        for (idx, v) in &loaded.buffer {
            buffer.append(*idx, v)?;
        }

        let mut ids = loaded.ids;
        let mut next_index = max_idx + 1;
        let mut tombstones: HashSet<InternalIndex> = loaded.tombstones.into_iter().collect();

        for op in loaded.wal_ops {
            match op {
                persistence::WalOp::Add { internal_index, external_id, vector } => {
                    if internal_index as usize >= vectors.len() {
                        vectors.resize(internal_index as usize + 1, None);
                        encoded.resize(internal_index as usize + 1, None);
                    }
                    vectors[internal_index as usize] = Some(vector.clone());
                    if ids.get(&external_id).is_none() {
                        ids.insert(external_id, internal_index);
                    }
                    let _ = buffer.append(internal_index, &vector);
                    next_index = next_index.max(internal_index + 1);
                }
                persistence::WalOp::Migrate { .. } => {
                    // Already reflected in the snapshot's graph/buffer split
                    // for records covered by it; a WAL-only migrate (crash
                    // between migrate and the next snapshot) has no buffer
                    // slot left to mark since the replayed `Add` above
                    // reappended it fresh — nothing further to do here.
                }
                persistence::WalOp::Delete { internal_index } => {
                    tombstones.insert(internal_index);
                }
                persistence::WalOp::UpdateEntryPoint { internal_index } => {
                    engine.set_entry_point(internal_index);
                }
            }
        }

        let mut state = State {
            ids,
            buffer,
            engine,
            vectors,
            quantizer: loaded.quantizer,
            encoded,
            tombstones,
            next_index,
            phase: Phase::Empty,
        };
        state.advance_phase();
        Ok(state)
    }

    /// Inserts a new vector under `external_id`. Returns `DuplicateId` if
    /// the id is already present, `DimensionMismatch` if `vector.len()`
    /// doesn't match the configured dimension, and `BufferFull` if the flat
    /// buffer has no room — in both error cases the index is left
    /// unmodified.
    pub fn add(&self, external_id: ExternalId, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.shared.config.dimension as usize {
            return Err(OmenError::DimensionMismatch {
                expected: self.shared.config.dimension,
                actual: vector.len() as u32,
            });
        }
        if external_id.len() > crate::types::MAX_EXTERNAL_ID_LEN {
            return Err(OmenError::ConfigInvalid("external id exceeds 255 bytes".into()));
        }

        let mut state = self.shared.state.write();
        if state.ids.get(&external_id).is_some() {
            return Err(OmenError::DuplicateId);
        }

        let candidate_index = state.next_index;
        // Append to the buffer first: on `BufferFull` nothing else has been
        // mutated yet, so the index is left exactly as it was.
        state.buffer.append(candidate_index, &vector)?;

        state.ids.insert(external_id.clone(), candidate_index);
        if candidate_index as usize >= state.vectors.len() {
            state.vectors.resize(candidate_index as usize + 1, None);
            state.encoded.resize(candidate_index as usize + 1, None);
        }
        state.vectors[candidate_index as usize] = Some(vector.clone());
        state.next_index += 1;

        let code = state.quantizer.encode(&vector);
        state.encoded[candidate_index as usize] = Some(code);
        self.maybe_fit_pq(&mut state);
        state.advance_phase();

        if let Err(e) = persistence::append_wal(
            &self.shared.path,
            &persistence::WalOp::Add {
                internal_index: candidate_index,
                external_id,
                vector,
            },
        ) {
            warn!(error = %e, "failed to append WAL record for add; durability window widened");
        }

        drop(state);
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Inserts many vectors. Each item succeeds or fails independently;
    /// the returned `Vec` is in input order.
    pub fn add_batch(&self, items: Vec<(ExternalId, Vec<f32>)>) -> Vec<Result<()>> {
        items.into_iter().map(|(id, v)| self.add(id, v)).collect()
    }

    fn maybe_fit_pq(&self, state: &mut State) {
        if let Quantizer::Pq(codebook) = &state.quantizer {
            if codebook.sub_dim == 0 {
                let sample_target = codebook.k.max(1) as usize;
                let samples: Vec<Vec<f32>> = state.vectors.iter().flatten().cloned().collect();
                if samples.len() >= sample_target {
                    state.quantizer.fit(&samples, self.shared.config.seed);
                    for (idx, v) in state.vectors.iter().enumerate() {
                        if let Some(v) = v {
                            state.encoded[idx] = Some(state.quantizer.encode(v));
                        }
                    }
                    info!(samples = samples.len(), "trained PQ codebook");
                }
            }
        }
    }

    /// Returns the stored vector for `external_id`, or `NotFound` if it is
    /// absent or has been deleted.
    pub fn get(&self, external_id: &[u8]) -> Result<Vec<f32>> {
        let state = self.shared.state.read();
        let idx = state.ids.get(external_id).ok_or(OmenError::NotFound)?;
        if state.tombstones.contains(&idx) {
            return Err(OmenError::NotFound);
        }
        state.vectors[idx as usize].clone().ok_or(OmenError::NotFound)
    }

    /// Logically deletes `external_id`: the id mapping is removed
    /// immediately and the internal node is excluded from future search
    /// results, but its graph edges are left in place until the next
    /// flush-triggered compaction.
    pub fn delete(&self, external_id: &[u8]) -> Result<()> {
        let mut state = self.shared.state.write();
        let idx = state.ids.remove(external_id).ok_or(OmenError::NotFound)?;
        state.tombstones.insert(idx);

        if let Err(e) = persistence::append_wal(&self.shared.path, &persistence::WalOp::Delete { internal_index: idx }) {
            warn!(error = %e, "failed to append WAL record for delete");
        }
        Ok(())
    }

    /// Searches for the `k` nearest neighbors of `query`, covering both the
    /// graph and any not-yet-migrated buffer entries.
    pub fn search(&self, query: &[f32], k: usize, opts: SearchOptions) -> Result<Vec<SearchHit>> {
        if query.len() != self.shared.config.dimension as usize {
            return Err(OmenError::DimensionMismatch {
                expected: self.shared.config.dimension,
                actual: query.len() as u32,
            });
        }
        let state = self.shared.state.read();
        let metric = self.shared.config.metric;
        let ef = OpenConfig::default_ef_search(k).max(opts.ef.unwrap_or(0));
        let vectors = vectors_view(&state.vectors, metric);

        let mut merged: Vec<(InternalIndex, f32)> = Vec::new();
        let deadline_expired = opts.deadline.is_some_and(|d| Instant::now() >= d);

        if !deadline_expired && state.engine.graph().node_count() > 0 {
            merged.extend(state.engine.search(query, k, ef, &vectors));
        }

        let deadline_expired_after_graph = opts.deadline.is_some_and(|d| Instant::now() >= d);
        if !deadline_expired_after_graph && opts.include_buffer && state.buffer.unmigrated_count() > 0 {
            merged.extend(state.buffer.search_topk(query, k, true));
        }

        merged.retain(|(idx, _)| !state.tombstones.contains(idx));
        merged.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        merged.dedup_by_key(|(idx, _)| *idx);
        merged.truncate(k);

        Ok(merged
            .into_iter()
            .filter_map(|(idx, d)| state.ids.external_id(idx).map(|id| SearchHit::new(id.clone(), d)))
            .collect())
    }

    /// Synchronously drains every unmigrated buffer entry into the graph and
    /// writes a full snapshot, truncating the append log.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        loop {
            let batch = state.buffer.drain_unmigrated(self.shared.config.drain_batch as usize);
            if batch.is_empty() {
                break;
            }
            migrate_batch(&self.shared, &mut state, batch);
        }
        self.snapshot_locked(&state)?;
        Ok(())
    }

    fn snapshot_locked(&self, state: &State) -> Result<()> {
        let originals: Vec<(InternalIndex, Vec<f32>)> = state
            .ids
            .iter()
            .filter(|(_, idx)| !state.tombstones.contains(idx))
            .map(|(_, idx)| (idx, state.vectors[idx as usize].clone().unwrap_or_default()))
            .collect();
        let encoded: Vec<(InternalIndex, Code)> = state
            .encoded
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.clone().map(|c| (i as InternalIndex, c)))
            .collect();
        let buffer_dump: Vec<(InternalIndex, Vec<f32>)> = state
            .buffer
            .unmigrated_entries()
            .into_iter()
            .filter(|(idx, _)| !state.tombstones.contains(idx))
            .collect();
        let tombstones: Vec<InternalIndex> = state.tombstones.iter().copied().collect();

        persistence::snapshot(
            &self.shared.path,
            self.shared.config.dimension,
            self.shared.config.m,
            self.shared.config.mmax0,
            state.engine.entry_point(),
            &state.ids,
            state.engine.graph(),
            originals,
            encoded,
            state.quantizer.clone(),
            buffer_dump,
            tombstones,
        )
    }

    /// Current runtime statistics.
    pub fn stats(&self) -> Stats {
        let state = self.shared.state.read();
        let node_count = state.engine.graph().node_count() as u64;
        let buffer_count = state.buffer.unmigrated_count() as u64;
        let per_vector_bytes = state.quantizer.encoded_size_bytes(self.shared.config.dimension) as u64;
        let memory_bytes = state.ids.memory_bytes()
            + node_count * per_vector_bytes
            + buffer_count * self.shared.config.dimension as u64 * std::mem::size_of::<f32>() as u64;
        Stats {
            node_count,
            buffer_count,
            tombstones: state.tombstones.len() as u64,
            memory_bytes,
            entry_point_level: state.engine.entry_point_level(),
        }
    }

    /// Signals the background drain worker to stop at its next batch
    /// boundary, flushes, and waits for the worker to exit.
    pub fn close(self) -> Result<()> {
        self.shared.stop.store(true, AtomicOrdering::Release);
        self.shared.notify.notify_one();
        self.flush()?;
        if let Some(handle) = self.worker.write().take() {
            self.runtime.block_on(async {
                let _ = handle.await;
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quantization;

    fn open_tmp(dimension: u32) -> (Index, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = OpenConfig::new(dimension, dir.path().to_str().unwrap())
            .with_metric(Metric::L2)
            .with_buffer_capacity(1_024);
        let index = Index::open(config).unwrap();
        (index, dir)
    }

    #[test]
    fn add_then_get_round_trips() {
        let (index, _dir) = open_tmp(4);
        index.add(b"a".to_vec(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(index.get(b"a").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn duplicate_id_is_rejected_and_index_stays_consistent() {
        let (index, _dir) = open_tmp(2);
        index.add(b"a".to_vec(), vec![1.0, 2.0]).unwrap();
        assert!(matches!(index.add(b"a".to_vec(), vec![3.0, 4.0]), Err(OmenError::DuplicateId)));
        assert_eq!(index.get(b"a").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn dimension_mismatch_on_add_is_rejected() {
        let (index, _dir) = open_tmp(4);
        assert!(matches!(
            index.add(b"a".to_vec(), vec![1.0, 2.0]),
            Err(OmenError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn search_finds_buffered_entry_before_drain() {
        let (index, _dir) = open_tmp(2);
        index.add(b"a".to_vec(), vec![1.0, 1.0]).unwrap();
        index.add(b"b".to_vec(), vec![9.0, 9.0]).unwrap();
        let hits = index.search(&[1.0, 1.0], 1, SearchOptions::default()).unwrap();
        assert_eq!(hits[0].id, b"a".to_vec());
    }

    #[test]
    fn flush_migrates_buffer_into_graph() {
        let (index, _dir) = open_tmp(2);
        for i in 0..50u32 {
            index.add(i.to_le_bytes().to_vec(), vec![i as f32, i as f32]).unwrap();
        }
        index.flush().unwrap();
        let stats = index.stats();
        assert_eq!(stats.node_count, 50);
        assert_eq!(stats.buffer_count, 0);
    }

    #[test]
    fn delete_removes_from_get_and_search() {
        let (index, _dir) = open_tmp(2);
        index.add(b"a".to_vec(), vec![1.0, 1.0]).unwrap();
        index.flush().unwrap();
        index.delete(b"a").unwrap();
        assert!(matches!(index.get(b"a"), Err(OmenError::NotFound)));
        let hits = index.search(&[1.0, 1.0], 5, SearchOptions::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn buffer_full_leaves_index_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let config = OpenConfig::new(2, dir.path().to_str().unwrap()).with_buffer_capacity(1_024);
        let index = Index::open(config).unwrap();
        for i in 0..1_024u32 {
            index.add(i.to_le_bytes().to_vec(), vec![i as f32, i as f32]).unwrap();
        }
        let before = index.stats();
        let result = index.add(b"overflow".to_vec(), vec![0.0, 0.0]);
        assert!(matches!(result, Err(OmenError::BufferFull)));
        assert!(index.get(b"overflow").is_err());
        assert_eq!(index.stats().buffer_count, before.buffer_count);
    }

    #[test]
    fn persists_and_reopens_with_same_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        {
            let config = OpenConfig::new(3, path.clone());
            let index = Index::open(config).unwrap();
            for i in 0..20u32 {
                index
                    .add(i.to_le_bytes().to_vec(), vec![i as f32, i as f32 * 2.0, 1.0])
                    .unwrap();
            }
            index.close().unwrap();
        }
        {
            let config = OpenConfig::new(3, path);
            let index = Index::open(config).unwrap();
            let stats = index.stats();
            assert_eq!(stats.node_count + stats.buffer_count, 20);
            assert_eq!(index.get(&5u32.to_le_bytes()).unwrap(), vec![5.0, 10.0, 1.0]);
        }
    }

    #[test]
    fn pq_quantizer_trains_once_enough_samples_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let config = OpenConfig::new(4, dir.path().to_str().unwrap())
            .with_quantization(Quantization::Pq { m_sub: 2, k: 4 });
        let index = Index::open(config).unwrap();
        for i in 0..10u32 {
            index
                .add(i.to_le_bytes().to_vec(), vec![i as f32, -(i as f32), i as f32 * 2.0, 1.0])
                .unwrap();
        }
        let state = index.shared.state.read();
        if let Quantizer::Pq(codebook) = &state.quantizer {
            assert!(codebook.sub_dim > 0, "codebook should have trained once 4+ samples accumulated");
        } else {
            panic!("expected PQ quantizer");
        }
    }
}
