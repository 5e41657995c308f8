//! `omen`: an embedded approximate-nearest-neighbor vector index.
//!
//! A hybrid flat-buffer/HNSW ingestion pipeline takes writes immediately
//! into an append-only buffer and migrates them into a navigable-small-world
//! graph in the background, so inserts never block on graph maintenance.
//! Reads see both regions until migration catches up.
//!
//! # Example
//!
//! ```rust,no_run
//! use omen::{Index, OpenConfig, SearchOptions};
//!
//! # fn example() -> omen::Result<()> {
//! let index = Index::open(OpenConfig::new(384, "./data/my-index"))?;
//! index.add(b"doc-1".to_vec(), vec![0.1; 384])?;
//!
//! let hits = index.search(&[0.1; 384], 10, SearchOptions::default())?;
//! for hit in hits {
//!     println!("{:?} at distance {}", hit.id, hit.distance);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod coordinator;
mod distance;
mod error;
mod flat_buffer;
mod graph;
mod hnsw;
mod id_directory;
mod persistence;
mod quantize;
mod segmented;
mod types;

pub use config::{Metric, OpenConfig, Quantization};
pub use coordinator::{Index, SearchOptions};
pub use error::{OmenError, Result};
pub use types::{ExternalId, SearchHit, Stats};
