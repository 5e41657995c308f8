//! Index configuration.

use crate::error::{OmenError, Result};
use serde::{Deserialize, Serialize};

/// Distance metric used for graph construction and search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    L2,
    Cosine,
    Dot,
}

/// Quantization strategy. `None` keeps full f32 vectors as the only
/// searchable representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantization {
    None,
    Scalar8,
    Binary1,
    Pq { m_sub: u32, k: u32 },
}

impl Default for Quantization {
    fn default() -> Self {
        Quantization::None
    }
}

/// Configuration for `open`. Fixed for the life of the index once passed to
/// `open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenConfig {
    pub dimension: u32,
    pub metric: Metric,
    pub m: u32,
    pub mmax0: u32,
    pub ef_construction: u32,
    pub buffer_capacity: u64,
    pub quantization: Quantization,
    pub path: String,
    pub seed: u64,
    pub drain_batch: u32,
    pub drain_interval_ms: u32,
    pub worker_threads: u32,
    pub segment_threshold: u64,
    pub segment_size: u64,
}

impl OpenConfig {
    /// Start from required fields, filling every other field with its
    /// documented default.
    pub fn new(dimension: u32, path: impl Into<String>) -> Self {
        let m = 16;
        Self {
            dimension,
            metric: Metric::Cosine,
            m,
            mmax0: m * 2,
            ef_construction: 200,
            buffer_capacity: 100_000,
            quantization: Quantization::None,
            path: path.into(),
            seed: 0,
            drain_batch: 1_000,
            drain_interval_ms: 100,
            worker_threads: num_cpus(),
            segment_threshold: 10_000,
            segment_size: 1_000,
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_m(mut self, m: u32) -> Self {
        self.m = m;
        self.mmax0 = m * 2;
        self
    }

    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: u64) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Serializes to the JSON sidecar format used to stash a config
    /// alongside an index directory for inspection or reuse across `open`
    /// calls, independent of the binary snapshot format.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| OmenError::ConfigInvalid(e.to_string()))
    }

    /// Parses a config previously written by [`OpenConfig::to_json`].
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| OmenError::ConfigInvalid(e.to_string()))
    }

    /// `ef_search` has a call-time default of `max(k, 50)`; it is not part of
    /// the fixed-at-open configuration.
    pub fn default_ef_search(k: usize) -> usize {
        k.max(50)
    }

    /// Validates the configuration, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > 65_535 {
            return Err(OmenError::ConfigInvalid(format!(
                "dimension must be in [1, 65535], got {}",
                self.dimension
            )));
        }
        if self.m < 2 {
            return Err(OmenError::ConfigInvalid(format!(
                "M must be >= 2, got {}",
                self.m
            )));
        }
        if self.mmax0 < self.m {
            return Err(OmenError::ConfigInvalid(
                "Mmax0 must be >= M".to_string(),
            ));
        }
        if self.buffer_capacity < 1_024 {
            return Err(OmenError::ConfigInvalid(format!(
                "buffer_capacity must be >= 1024, got {}",
                self.buffer_capacity
            )));
        }
        if self.path.is_empty() {
            return Err(OmenError::ConfigInvalid("path is required".to_string()));
        }
        if let Quantization::Pq { m_sub, k } = self.quantization {
            if m_sub == 0 || self.dimension % m_sub != 0 {
                return Err(OmenError::ConfigInvalid(format!(
                    "PQ requires dimension % m_sub == 0, got dimension={} m_sub={}",
                    self.dimension, m_sub
                )));
            }
            if k == 0 || k > 256 {
                return Err(OmenError::ConfigInvalid(format!(
                    "PQ K must be in [1, 256], got {}",
                    k
                )));
            }
        }
        Ok(())
    }
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
