//! On-disk snapshot + append log.
//!
//! Layout under `path/`: `index.meta` (bit-exact 512-byte header),
//! `index.ids`, `index.graph`, `index.vectors` (each a bincode blob), and
//! an optional `index.wal` append log. Snapshots are written to a temp file
//! and renamed into place so a crash mid-write never leaves a half-written
//! file at the real path.

mod graph_codec;

use crate::error::{OmenError, Result};
use crate::graph::GraphStore;
use crate::id_directory::IdDirectory;
use crate::quantize::{Code, Quantizer};
use crate::types::{ExternalId, InternalIndex};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"OMEN";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 512;

pub struct Header {
    pub dimension: u32,
    pub m: u32,
    pub mmax0: u32,
    pub entry_point: InternalIndex,
    pub node_count: u64,
    pub quantizer_tag: u8,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dimension.to_le_bytes());
        buf[12..16].copy_from_slice(&self.m.to_le_bytes());
        buf[16..20].copy_from_slice(&self.mmax0.to_le_bytes());
        buf[20..24].copy_from_slice(&self.entry_point.to_le_bytes());
        buf[24..32].copy_from_slice(&self.node_count.to_le_bytes());
        buf[32] = self.quantizer_tag;
        // 33..48: reserved quantizer-params offset; quantizer state itself
        // travels inside index.vectors, so this stays zeroed.
        // 48..512: reserved, zeroed.
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(OmenError::CorruptedState("meta file shorter than header".into()));
        }
        if buf[0..4] != MAGIC {
            return Err(OmenError::CorruptedState("bad magic in meta file".into()));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(OmenError::CorruptedState(format!("unsupported meta version {version}")));
        }
        Ok(Header {
            dimension: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            m: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            mmax0: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            entry_point: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            node_count: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            quantizer_tag: buf[32],
        })
    }
}

/// Everything needed to reconstruct an open index.
pub struct LoadedIndex {
    pub header: Header,
    pub ids: IdDirectory,
    pub graph: GraphStore,
    pub vectors: Vec<(InternalIndex, Vec<f32>)>,
    pub encoded: Vec<(InternalIndex, Code)>,
    pub quantizer: Quantizer,
    pub buffer: Vec<(InternalIndex, Vec<f32>)>,
    pub tombstones: Vec<InternalIndex>,
    pub wal_ops: Vec<WalOp>,
}

#[derive(Serialize, Deserialize)]
struct IdsDump {
    pairs: Vec<(ExternalId, InternalIndex)>,
}

#[derive(Serialize, Deserialize)]
struct VectorsDump {
    originals: Vec<(InternalIndex, Vec<f32>)>,
    encoded: Vec<(InternalIndex, Code)>,
    quantizer: Quantizer,
    buffer: Vec<(InternalIndex, Vec<f32>)>,
    tombstones: Vec<InternalIndex>,
}

fn meta_path(dir: &Path) -> PathBuf {
    dir.join("index.meta")
}
fn ids_path(dir: &Path) -> PathBuf {
    dir.join("index.ids")
}
fn graph_path(dir: &Path) -> PathBuf {
    dir.join("index.graph")
}
fn vectors_path(dir: &Path) -> PathBuf {
    dir.join("index.vectors")
}
fn wal_path(dir: &Path) -> PathBuf {
    dir.join("index.wal")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Writes a full point-in-time snapshot, then truncates the append log
/// (valid once the snapshot is durable on disk).
#[allow(clippy::too_many_arguments)]
pub fn snapshot(
    dir: &Path,
    dimension: u32,
    m: u32,
    mmax0: u32,
    entry_point: InternalIndex,
    ids: &IdDirectory,
    graph: &GraphStore,
    originals: Vec<(InternalIndex, Vec<f32>)>,
    encoded: Vec<(InternalIndex, Code)>,
    quantizer: Quantizer,
    buffer: Vec<(InternalIndex, Vec<f32>)>,
    tombstones: Vec<InternalIndex>,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    let header = Header {
        dimension,
        m,
        mmax0,
        entry_point,
        node_count: graph.node_count() as u64,
        quantizer_tag: quantizer_tag(&quantizer),
    };
    write_atomic(&meta_path(dir), &header.encode())?;

    let ids_dump = IdsDump {
        pairs: ids.iter().map(|(k, v)| (k.clone(), v)).collect(),
    };
    let ids_bytes = bincode::serialize(&ids_dump).map_err(|e| OmenError::CorruptedState(e.to_string()))?;
    write_atomic(&ids_path(dir), &ids_bytes)?;

    write_atomic(&graph_path(dir), &graph_codec::encode(graph))?;

    let vectors_dump = VectorsDump {
        originals,
        encoded,
        quantizer,
        buffer,
        tombstones,
    };
    let vectors_bytes = bincode::serialize(&vectors_dump).map_err(|e| OmenError::CorruptedState(e.to_string()))?;
    write_atomic(&vectors_path(dir), &vectors_bytes)?;

    truncate_wal(dir)?;
    Ok(())
}

/// Loads the most recent snapshot and replays the append log on top of it.
pub fn load(dir: &Path) -> Result<LoadedIndex> {
    let header_bytes = fs::read(meta_path(dir))?;
    let header = Header::decode(&header_bytes)?;

    let ids_bytes = fs::read(ids_path(dir))?;
    let ids_dump: IdsDump = bincode::deserialize(&ids_bytes).map_err(|e| OmenError::CorruptedState(e.to_string()))?;
    let mut ids = IdDirectory::with_capacity((ids_dump.pairs.len() * 2).max(16));
    for (key, value) in ids_dump.pairs {
        ids.insert(key, value);
    }

    let graph_bytes = fs::read(graph_path(dir))?;
    let graph = graph_codec::decode(&graph_bytes)?;

    let vectors_bytes = fs::read(vectors_path(dir))?;
    let vectors_dump: VectorsDump =
        bincode::deserialize(&vectors_bytes).map_err(|e| OmenError::CorruptedState(e.to_string()))?;

    let wal_ops = replay_wal(dir)?;

    Ok(LoadedIndex {
        header,
        ids,
        graph,
        vectors: vectors_dump.originals,
        encoded: vectors_dump.encoded,
        quantizer: vectors_dump.quantizer,
        buffer: vectors_dump.buffer,
        tombstones: vectors_dump.tombstones,
        wal_ops,
    })
}

fn quantizer_tag(q: &Quantizer) -> u8 {
    match q {
        Quantizer::None => 0,
        Quantizer::Scalar8 => 1,
        Quantizer::Binary1 => 2,
        Quantizer::Pq(_) => 3,
    }
}

/// One post-snapshot mutation recorded in the append log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    Add { internal_index: InternalIndex, external_id: ExternalId, vector: Vec<f32> },
    Delete { internal_index: InternalIndex },
    Migrate { internal_index: InternalIndex },
    UpdateEntryPoint { internal_index: InternalIndex },
}

/// Appends one record: `[len: u32 LE][crc32: u32 LE][bincode payload]`.
pub fn append_wal(dir: &Path, op: &WalOp) -> Result<()> {
    let payload = bincode::serialize(op).map_err(|e| OmenError::CorruptedState(e.to_string()))?;
    let crc = crc32fast::hash(&payload);
    let mut f = OpenOptions::new().create(true).append(true).open(wal_path(dir))?;
    f.write_all(&(payload.len() as u32).to_le_bytes())?;
    f.write_all(&crc.to_le_bytes())?;
    f.write_all(&payload)?;
    Ok(())
}

/// Replays records until the first length/CRC mismatch or truncated tail,
/// then stops — it does not error, since a torn final record is the
/// expected shape of a crash mid-append.
pub fn replay_wal(dir: &Path) -> Result<Vec<WalOp>> {
    let path = wal_path(dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut bytes = Vec::new();
    File::open(&path)?.read_to_end(&mut bytes)?;

    let mut ops = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap());
        let payload_start = pos + 8;
        if payload_start + len > bytes.len() {
            break; // torn write at the tail
        }
        let payload = &bytes[payload_start..payload_start + len];
        if crc32fast::hash(payload) != crc {
            break; // first CRC failure: truncate here
        }
        match bincode::deserialize::<WalOp>(payload) {
            Ok(op) => ops.push(op),
            Err(_) => break,
        }
        pos = payload_start + len;
    }
    Ok(ops)
}

/// Truncates the append log to empty, valid once a snapshot covering its
/// contents is durable.
pub fn truncate_wal(dir: &Path) -> Result<()> {
    let path = wal_path(dir);
    if path.exists() {
        File::create(&path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quantization;
    use crate::types::NO_ENTRY_POINT;
    use tempfile::tempdir;

    #[test]
    fn snapshot_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut ids = IdDirectory::new();
        ids.insert(b"a".to_vec(), 0);
        ids.insert(b"b".to_vec(), 1);

        let mut graph = GraphStore::new(8, 4, 8);
        graph.insert_node(0, 0);
        graph.insert_node(1, 0);
        graph.add_edge(0, 0, 1);
        graph.add_edge(1, 0, 0);

        snapshot(
            dir.path(),
            4,
            4,
            8,
            0,
            &ids,
            &graph,
            vec![(0, vec![1.0, 2.0, 3.0, 4.0]), (1, vec![5.0, 6.0, 7.0, 8.0])],
            Vec::new(),
            Quantizer::from_config(Quantization::None),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.header.dimension, 4);
        assert_eq!(loaded.header.node_count, 2);
        assert_eq!(loaded.ids.get(b"a"), Some(0));
        assert_eq!(loaded.graph.neighbors(0, 0), &[1]);
        assert_eq!(loaded.vectors.len(), 2);
        assert!(loaded.wal_ops.is_empty());
    }

    #[test]
    fn wal_replays_until_first_corruption() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        append_wal(
            dir.path(),
            &WalOp::Add {
                internal_index: 0,
                external_id: b"a".to_vec(),
                vector: vec![1.0],
            },
        )
        .unwrap();
        append_wal(dir.path(), &WalOp::Migrate { internal_index: 0 }).unwrap();

        // Corrupt the tail by appending a few garbage bytes (simulates a
        // crash mid-write of a third record).
        let mut f = OpenOptions::new().append(true).open(wal_path(dir.path())).unwrap();
        f.write_all(&[1, 2, 3]).unwrap();

        let ops = replay_wal(dir.path()).unwrap();
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn snapshot_truncates_wal() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        append_wal(dir.path(), &WalOp::Migrate { internal_index: 0 }).unwrap();
        assert_eq!(replay_wal(dir.path()).unwrap().len(), 1);

        let ids = IdDirectory::new();
        let graph = GraphStore::new(1, 4, 8);
        snapshot(
            dir.path(),
            4,
            4,
            8,
            NO_ENTRY_POINT,
            &ids,
            &graph,
            Vec::new(),
            Vec::new(),
            Quantizer::from_config(Quantization::None),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        assert!(replay_wal(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(b"NOPE");
        assert!(Header::decode(&buf).is_err());
    }
}
