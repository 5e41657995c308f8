//! Quantizer dispatch.
//!
//! The three variants are statically known once an index is opened, so
//! dispatch is a tagged enum rather than a trait object — keeps each
//! variant's distance kernel monomorphized and inlinable instead of routing
//! every comparison through a vtable.

pub mod binary1;
pub mod pq;
pub mod scalar8;

use crate::config::Quantization;
use serde::{Deserialize, Serialize};

/// A fitted quantizer, ready to encode vectors and answer queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Quantizer {
    None,
    Scalar8,
    Binary1,
    Pq(pq::PqCodebook),
}

/// One vector's quantized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Code {
    None(Vec<f32>),
    Scalar8(scalar8::Scalar8Code),
    Binary1(binary1::Binary1Code),
    Pq(Vec<u8>),
}

/// A per-query precomputed structure used to answer `distance` without
/// re-deriving anything from the raw query vector.
#[derive(Debug, Clone)]
pub enum QueryTable {
    None(Vec<f32>),
    Scalar8(scalar8::Scalar8Code),
    Binary1(binary1::Binary1Code),
    Pq(Vec<f32>),
}

impl Quantizer {
    /// Builds the runtime quantizer from config. PQ is left untrained
    /// (`fit` must be called once enough samples are available) because its
    /// codebook is estimated from data, unlike scalar/binary which are
    /// purely per-vector.
    pub fn from_config(q: Quantization) -> Self {
        match q {
            Quantization::None => Quantizer::None,
            Quantization::Scalar8 => Quantizer::Scalar8,
            Quantization::Binary1 => Quantizer::Binary1,
            Quantization::Pq { m_sub, k } => Quantizer::Pq(pq::PqCodebook::empty(m_sub, k)),
        }
    }

    pub fn fit(&mut self, samples: &[Vec<f32>], seed: u64) {
        if let Quantizer::Pq(codebook) = self {
            *codebook = pq::fit(samples, codebook.m_sub, codebook.k, seed);
        }
    }

    pub fn encode(&self, vec: &[f32]) -> Code {
        match self {
            Quantizer::None => Code::None(vec.to_vec()),
            Quantizer::Scalar8 => Code::Scalar8(scalar8::encode(vec)),
            Quantizer::Binary1 => Code::Binary1(binary1::encode(vec)),
            Quantizer::Pq(codebook) => Code::Pq(pq::encode(codebook, vec)),
        }
    }

    pub fn decode(&self, code: &Code) -> Vec<f32> {
        match (self, code) {
            (Quantizer::None, Code::None(v)) => v.clone(),
            (Quantizer::Scalar8, Code::Scalar8(c)) => scalar8::decode(c),
            (Quantizer::Binary1, Code::Binary1(c)) => binary1::decode(c),
            (Quantizer::Pq(codebook), Code::Pq(codes)) => pq::decode(codebook, codes),
            _ => panic!("quantizer/code variant mismatch"),
        }
    }

    pub fn build_query_table(&self, query: &[f32]) -> QueryTable {
        match self {
            Quantizer::None => QueryTable::None(query.to_vec()),
            Quantizer::Scalar8 => QueryTable::Scalar8(scalar8::build_query_table(query)),
            Quantizer::Binary1 => QueryTable::Binary1(binary1::build_query_table(query)),
            Quantizer::Pq(codebook) => QueryTable::Pq(pq::build_query_table(codebook, query)),
        }
    }

    pub fn distance(&self, code: &Code, table: &QueryTable) -> f32 {
        match (self, code, table) {
            (Quantizer::None, Code::None(v), QueryTable::None(q)) => crate::distance::l2_sq(v, q),
            (Quantizer::Scalar8, Code::Scalar8(c), QueryTable::Scalar8(t)) => scalar8::distance(c, t),
            (Quantizer::Binary1, Code::Binary1(c), QueryTable::Binary1(t)) => binary1::distance(c, t),
            (Quantizer::Pq(codebook), Code::Pq(c), QueryTable::Pq(t)) => pq::distance(c, t, codebook.k),
            _ => panic!("quantizer/code/table variant mismatch"),
        }
    }

    /// Estimated bytes occupied by one encoded vector (for `stats.memory_bytes`).
    pub fn encoded_size_bytes(&self, dimension: u32) -> usize {
        match self {
            Quantizer::None => dimension as usize * std::mem::size_of::<f32>(),
            Quantizer::Scalar8 => dimension as usize + 2 * std::mem::size_of::<f32>(),
            Quantizer::Binary1 => (dimension as usize).div_ceil(64) * std::mem::size_of::<u64>(),
            Quantizer::Pq(codebook) => codebook.m_sub as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_quantizer_round_trips_exactly() {
        let q = Quantizer::None;
        let v = vec![1.0, 2.0, 3.0];
        let code = q.encode(&v);
        assert_eq!(q.decode(&code), v);
    }

    #[test]
    fn scalar8_distance_between_identical_vectors_is_near_zero() {
        let q = Quantizer::Scalar8;
        let v = vec![1.0, 5.0, 2.0, 9.0];
        let code = q.encode(&v);
        let table = q.build_query_table(&v);
        assert!(q.distance(&code, &table) < 1.0);
    }

    #[test]
    fn binary1_distance_between_identical_vectors_is_zero() {
        let q = Quantizer::Binary1;
        let v = vec![1.0, -1.0, 2.0, -2.0];
        let code = q.encode(&v);
        let table = q.build_query_table(&v);
        assert_eq!(q.distance(&code, &table), 0.0);
    }

    #[test]
    fn pq_quantizer_fits_and_encodes() {
        let mut q = Quantizer::from_config(Quantization::Pq { m_sub: 2, k: 4 });
        let samples: Vec<Vec<f32>> = (0..32).map(|i| vec![i as f32, -(i as f32), i as f32 * 2.0, 1.0]).collect();
        q.fit(&samples, 1);
        let v = &samples[0];
        let code = q.encode(v);
        let table = q.build_query_table(v);
        let d = q.distance(&code, &table);
        assert!(d >= 0.0);
    }
}
