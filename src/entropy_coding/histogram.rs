// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Per-context symbol counting and greedy entropy-merge clustering.
//!
//! `Histogram` is the mutable counting structure tokens are folded into; `cluster_histograms`
//! collapses many per-context histograms down to at most `kClustersLimit` shared ones by
//! repeatedly merging whichever pair costs the least extra entropy.

use crate::entropy_coding::model::K_CLUSTERS_LIMIT;

/// Dense symbol counts for one context or cluster. Grows on demand as
/// symbols are added; `alphabet_size` reports the highest observed symbol plus one, not the
/// backing `Vec`'s length.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    counts: Vec<u32>,
    total: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alphabet(size: usize) -> Self {
        Self {
            counts: vec![0; size],
            total: 0,
        }
    }

    pub fn add(&mut self, symbol: u32) {
        let s = symbol as usize;
        if s >= self.counts.len() {
            self.counts.resize(s + 1, 0);
        }
        self.counts[s] += 1;
        self.total += 1;
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Highest symbol with nonzero count, plus one; `0` for an empty histogram.
    pub fn alphabet_size(&self) -> usize {
        self.counts.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1)
    }

    pub fn num_nonzero(&self) -> usize {
        self.counts.iter().filter(|&&c| c != 0).count()
    }

    pub fn merge(&self, other: &Histogram) -> Histogram {
        let len = self.counts.len().max(other.counts.len());
        let mut counts = vec![0u32; len];
        for (i, &c) in self.counts.iter().enumerate() {
            counts[i] += c;
        }
        for (i, &c) in other.counts.iter().enumerate() {
            counts[i] += c;
        }
        Histogram {
            counts,
            total: self.total + other.total,
        }
    }

    /// Total Shannon cost in bits to code every occurrence this histogram counted, at the ideal
    /// (fractional-bit) entropy rate. Used both by clustering's merge-cost metric and by
    /// `encode.rs`'s cost-driven selection passes.
    pub fn shannon_cost_bits(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        self.counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| -(c as f64) * (c as f64 / total).log2())
            .sum()
    }
}

/// Cost of merging `a` and `b` into one histogram: the merged Shannon cost minus the sum of the
/// components' costs. Always `>= 0` (merging can only raise or hold total coding cost, since
/// distinct per-context models are always at least as cheap as sharing one), so the greedy pass
/// always picks the least-damaging pair to combine.
fn merge_cost(a: &Histogram, b: &Histogram) -> f64 {
    let merged = a.merge(b);
    merged.shannon_cost_bits() - a.shannon_cost_bits() - b.shannon_cost_bits()
}

/// Greedily merges `histograms` down to at most `limit` clusters, each merge step combining
/// whichever pair currently costs the least extra entropy. Returns the context
/// map (original index -> cluster index, `0..clusters.len()`) and the merged histograms.
///
/// A single-context input is returned unclustered.
pub fn cluster_histograms(histograms: &[Histogram], limit: usize) -> (Vec<u8>, Vec<Histogram>) {
    let n = histograms.len();
    if n <= 1 {
        return ((0..n).map(|_| 0u8).collect(), histograms.to_vec());
    }
    let limit = limit.max(1);

    let mut clusters: Vec<Histogram> = histograms.to_vec();
    let mut context_map: Vec<usize> = (0..n).collect();

    while clusters.len() > limit {
        let mut best = (f64::INFINITY, 0usize, 1usize);
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let cost = merge_cost(&clusters[i], &clusters[j]);
                if cost < best.0 {
                    best = (cost, i, j);
                }
            }
        }
        let (_, i, j) = best;
        clusters[i] = clusters[i].merge(&clusters[j]);
        clusters.remove(j);
        for c in context_map.iter_mut() {
            if *c == j {
                *c = i;
            } else if *c > j {
                *c -= 1;
            }
        }
    }

    let context_map_u8 = context_map.iter().map(|&c| c as u8).collect();
    (context_map_u8, clusters)
}

/// Forces every context onto a single flat cluster over a power-of-two alphabet, for
/// `EncoderParams::ans_fuzzer_friendly`. `alphabet_size` must be a power of two.
#[cfg(feature = "fuzzer_friendly")]
pub fn flat_single_cluster(num_contexts: usize, alphabet_size: usize) -> (Vec<u8>, Histogram) {
    debug_assert!(alphabet_size.is_power_of_two());
    let share = (crate::entropy_coding::ans::ANS_TAB_SIZE as usize / alphabet_size).max(1) as u32;
    let mut h = Histogram::with_alphabet(alphabet_size);
    for s in 0..alphabet_size {
        // `add` increments by one per call; replay `share` times so the resulting counts are
        // already proportionally flat without depending on normalization picking the same shape.
        for _ in 0..share {
            h.add(s as u32);
        }
    }
    (vec![0u8; num_contexts], h)
}

pub const DEFAULT_CLUSTERS_LIMIT: usize = K_CLUSTERS_LIMIT;

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn merge_is_associative_on_counts() {
        let mut a = Histogram::new();
        a.add(0);
        a.add(1);
        let mut b = Histogram::new();
        b.add(1);
        b.add(2);
        let merged = a.merge(&b);
        assert_eq!(merged.counts(), &[1, 2, 1]);
        assert_eq!(merged.total(), 4);
    }

    #[test]
    fn single_context_skips_clustering() {
        let mut h = Histogram::new();
        h.add(0);
        let (context_map, clusters) = cluster_histograms(&[h], DEFAULT_CLUSTERS_LIMIT);
        assert_eq!(context_map, vec![0]);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn clusters_down_to_limit() {
        let histograms: Vec<Histogram> = (0..100)
            .map(|i| {
                let mut h = Histogram::new();
                for _ in 0..10 {
                    h.add(i % 7);
                }
                h
            })
            .collect();
        let (context_map, clusters) = cluster_histograms(&histograms, 8);
        assert!(clusters.len() <= 8);
        assert_eq!(context_map.len(), histograms.len());
        assert!(context_map.iter().all(|&c| (c as usize) < clusters.len()));
    }

    #[test]
    fn identical_histograms_merge_at_zero_cost() {
        let mut a = Histogram::new();
        a.add(0);
        a.add(0);
        a.add(1);
        let b = a.clone();
        assert!(merge_cost(&a, &b).abs() < 1e-9);
    }
}
