//! Per-vector 8-bit scalar quantization.

use crate::distance;
use serde::{Deserialize, Serialize};

/// One vector's scalar-quantized form: per-vector `(scale, offset)` plus one
/// byte per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scalar8Code {
    pub scale: f32,
    pub offset: f32,
    pub codes: Vec<u8>,
}

pub fn encode(vec: &[f32]) -> Scalar8Code {
    let min = vec.iter().copied().fold(f32::INFINITY, f32::min);
    let max = vec.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max <= min {
        return Scalar8Code {
            scale: 1.0,
            offset: min,
            codes: vec![0u8; vec.len()],
        };
    }
    let scale = (max - min) / 255.0;
    let offset = min;
    let codes = vec
        .iter()
        .map(|&x| (((x - offset) / scale).round().clamp(0.0, 255.0)) as u8)
        .collect();
    Scalar8Code { scale, offset, codes }
}

pub fn decode(code: &Scalar8Code) -> Vec<f32> {
    code.codes
        .iter()
        .map(|&c| code.offset + c as f32 * code.scale)
        .collect()
}

/// Per-dimension absolute error is bounded by half the quantization step.
pub fn error_envelope(code: &Scalar8Code) -> f32 {
    code.scale / 2.0
}

pub fn build_query_table(query: &[f32]) -> Scalar8Code {
    encode(query)
}

pub fn distance(code: &Scalar8Code, table: &Scalar8Code) -> f32 {
    distance::l2_sq_i8(&code.codes, &table.codes, code.scale, table.scale, code.offset, table.offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_idempotent() {
        let v = vec![0.0, 10.0, 5.0, 2.5];
        let code = encode(&v);
        let decoded = decode(&code);
        for (orig, got) in v.iter().zip(decoded.iter()) {
            assert!((orig - got).abs() <= error_envelope(&code) + 1e-5);
        }
    }

    #[test]
    fn constant_vector_is_degenerate_all_zero() {
        let v = vec![3.0; 8];
        let code = encode(&v);
        assert_eq!(code.scale, 1.0);
        assert_eq!(code.offset, 3.0);
        assert!(code.codes.iter().all(|&c| c == 0));
    }

    #[test]
    fn distance_between_identical_vectors_is_zero() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        let code = encode(&v);
        let table = build_query_table(&v);
        assert!(distance(&code, &table) < 1e-3);
    }
}
