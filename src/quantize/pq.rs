//! Product quantization: `M` subspaces, each with its own 256-centroid
//! codebook trained by Lloyd k-means.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

const ITERATIONS: usize = 20;

/// Trained codebooks for every subspace, row-major `[subspace][centroid][dim]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqCodebook {
    pub m_sub: u32,
    pub k: u32,
    pub sub_dim: u32,
    centroids: Vec<f32>,
}

impl PqCodebook {
    /// An untrained placeholder codebook, used to hold `(m_sub, k)` between
    /// `open` and the first `fit` call once enough samples exist.
    pub(crate) fn empty(m_sub: u32, k: u32) -> Self {
        PqCodebook {
            m_sub,
            k,
            sub_dim: 0,
            centroids: Vec::new(),
        }
    }

    fn centroid(&self, subspace: usize, centroid: usize) -> &[f32] {
        let sd = self.sub_dim as usize;
        let base = (subspace * self.k as usize + centroid) * sd;
        &self.centroids[base..base + sd]
    }
}

/// Trains one codebook per subspace via Lloyd k-means on `samples`. Requires
/// `dimension % m_sub == 0`. Centroid count is `k`, clamped down to
/// `samples.len()` if the sample pool is smaller (degenerate training set).
/// Deterministic given `seed`.
pub fn fit(samples: &[Vec<f32>], m_sub: u32, k: u32, seed: u64) -> PqCodebook {
    assert!(!samples.is_empty(), "PQ training requires at least one sample");
    let dimension = samples[0].len();
    let sub_dim = dimension / m_sub as usize;
    let k_eff = (k as usize).min(samples.len()).max(1);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = vec![0f32; m_sub as usize * k as usize * sub_dim];

    for m in 0..m_sub as usize {
        let sub_samples: Vec<&[f32]> = samples
            .iter()
            .map(|v| &v[m * sub_dim..(m + 1) * sub_dim])
            .collect();

        let init_idx = sample(&mut rng, sub_samples.len(), k_eff).into_vec();
        let mut sub_centroids: Vec<Vec<f32>> = init_idx
            .iter()
            .map(|&i| sub_samples[i].to_vec())
            .collect();
        while sub_centroids.len() < k as usize {
            // Fewer distinct samples than k: pad with a copy of the last
            // centroid so the codebook always has exactly k rows.
            sub_centroids.push(sub_centroids.last().cloned().unwrap_or(vec![0.0; sub_dim]));
        }

        let mut assignments = vec![0usize; sub_samples.len()];
        for _ in 0..ITERATIONS {
            let mut changed = false;
            for (i, s) in sub_samples.iter().enumerate() {
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for (c, centroid) in sub_centroids.iter().enumerate() {
                    let d = sq_dist(s, centroid);
                    if d < best_dist {
                        best_dist = d;
                        best = c;
                    }
                }
                if assignments[i] != best {
                    assignments[i] = best;
                    changed = true;
                }
            }

            let mut sums = vec![vec![0f32; sub_dim]; k as usize];
            let mut counts = vec![0u32; k as usize];
            for (i, s) in sub_samples.iter().enumerate() {
                let c = assignments[i];
                counts[c] += 1;
                for (acc, &x) in sums[c].iter_mut().zip(s.iter()) {
                    *acc += x;
                }
            }
            for c in 0..k as usize {
                if counts[c] > 0 {
                    for (centroid_x, sum_x) in sub_centroids[c].iter_mut().zip(sums[c].iter()) {
                        *centroid_x = sum_x / counts[c] as f32;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        for (c, centroid) in sub_centroids.iter().enumerate() {
            let base = (m * k as usize + c) * sub_dim;
            centroids[base..base + sub_dim].copy_from_slice(centroid);
        }
    }

    PqCodebook {
        m_sub,
        k,
        sub_dim: sub_dim as u32,
        centroids,
    }
}

pub fn encode(codebook: &PqCodebook, vec: &[f32]) -> Vec<u8> {
    let sd = codebook.sub_dim as usize;
    (0..codebook.m_sub as usize)
        .map(|m| {
            let sub = &vec[m * sd..(m + 1) * sd];
            let mut best = 0u8;
            let mut best_dist = f32::INFINITY;
            for c in 0..codebook.k as usize {
                let d = sq_dist(sub, codebook.centroid(m, c));
                if d < best_dist {
                    best_dist = d;
                    best = c as u8;
                }
            }
            best
        })
        .collect()
}

pub fn decode(codebook: &PqCodebook, codes: &[u8]) -> Vec<f32> {
    let mut out = Vec::with_capacity(codebook.sub_dim as usize * codebook.m_sub as usize);
    for (m, &code) in codes.iter().enumerate() {
        out.extend_from_slice(codebook.centroid(m, code as usize));
    }
    out
}

/// Asymmetric `M x K` squared-distance lookup table for one query.
pub fn build_query_table(codebook: &PqCodebook, query: &[f32]) -> Vec<f32> {
    let sd = codebook.sub_dim as usize;
    let mut table = vec![0f32; codebook.m_sub as usize * codebook.k as usize];
    for m in 0..codebook.m_sub as usize {
        let sub = &query[m * sd..(m + 1) * sd];
        for c in 0..codebook.k as usize {
            table[m * codebook.k as usize + c] = sq_dist(sub, codebook.centroid(m, c));
        }
    }
    table
}

/// Looks up the aggregate squared distance and returns its square root,
/// matching the L2 distance convention used elsewhere in the index.
pub fn distance(codes: &[u8], table: &[f32], k: u32) -> f32 {
    crate::distance::pq_lut_lookup(codes, table, k as usize).sqrt()
}

fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(&x, &y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        use rand::Rng;
        (0..n)
            .map(|_| (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect())
            .collect()
    }

    #[test]
    fn encode_decode_reduces_but_bounds_error() {
        let samples = sample_vectors(64, 8, 7);
        let codebook = fit(&samples, 2, 16, 7);
        let v = &samples[0];
        let codes = encode(&codebook, v);
        assert_eq!(codes.len(), 2);
        let decoded = decode(&codebook, &codes);
        assert_eq!(decoded.len(), v.len());
    }

    #[test]
    fn fit_is_deterministic_given_seed() {
        let samples = sample_vectors(64, 8, 7);
        let a = fit(&samples, 2, 16, 42);
        let b = fit(&samples, 2, 16, 42);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn query_table_distance_matches_direct_centroid_distance() {
        let samples = sample_vectors(64, 8, 7);
        let codebook = fit(&samples, 2, 16, 7);
        let v = &samples[3];
        let codes = encode(&codebook, v);
        let table = build_query_table(&codebook, v);
        let d = distance(&codes, &table, codebook.k);
        assert!(d >= 0.0);
    }

    #[test]
    fn degenerate_sample_pool_smaller_than_k_still_produces_k_rows() {
        let samples = sample_vectors(3, 4, 1);
        let codebook = fit(&samples, 1, 16, 1);
        assert_eq!(codebook.centroids.len(), 1 * 16 * 4);
    }
}
