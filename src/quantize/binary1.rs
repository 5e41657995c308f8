//! Per-vector 1-bit (binary) quantization with Hamming distance.

use crate::distance;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binary1Code {
    pub dimension: u32,
    pub packed: Vec<u64>,
}

pub fn encode(vec: &[f32]) -> Binary1Code {
    let d = vec.len();
    let min = vec.iter().copied().fold(f32::INFINITY, f32::min);
    let max = vec.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let constant = max <= min;
    let mean = vec.iter().sum::<f32>() / d as f32;

    let words = d.div_ceil(64);
    let mut packed = vec![0u64; words];
    for (i, &x) in vec.iter().enumerate() {
        let bit = if constant { i % 2 == 0 } else { x > mean };
        if bit {
            packed[i / 64] |= 1u64 << (i % 64);
        }
    }
    Binary1Code {
        dimension: d as u32,
        packed,
    }
}

/// Lossy: each bit maps back to `0.0`/`1.0`, not the original magnitude.
pub fn decode(code: &Binary1Code) -> Vec<f32> {
    (0..code.dimension as usize)
        .map(|i| {
            let word = code.packed[i / 64];
            if (word >> (i % 64)) & 1 == 1 { 1.0 } else { 0.0 }
        })
        .collect()
}

pub fn build_query_table(query: &[f32]) -> Binary1Code {
    encode(query)
}

pub fn distance(code: &Binary1Code, table: &Binary1Code) -> f32 {
    distance::hamming_u64_packed(&code.packed, &table.packed) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_idempotent_on_sign() {
        let v = vec![-1.0, 2.0, -3.0, 4.0, 5.0, -6.0, 7.0, 8.0, 9.0];
        let code = encode(&v);
        let decoded = decode(&code);
        let redecoded = encode(&decoded);
        assert_eq!(code.packed, redecoded.packed);
    }

    #[test]
    fn constant_vector_alternates_bits() {
        let v = vec![5.0; 8];
        let code = encode(&v);
        let decoded = decode(&code);
        assert_eq!(decoded, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn tail_bits_are_zero_padded() {
        let v = vec![1.0; 9];
        let code = encode(&v);
        assert_eq!(code.packed.len(), 1);
        assert_eq!(code.packed[0] & !0x1FF, 0);
    }

    #[test]
    fn hamming_distance_counts_differing_bits() {
        let a = encode(&[1.0, -1.0, 1.0, -1.0]);
        let b = encode(&[1.0, 1.0, -1.0, -1.0]);
        assert_eq!(distance(&a, &b), 2.0);
    }
}
