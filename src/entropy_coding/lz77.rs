// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! LZ77-style back-reference pre-pass over a token stream: RLE, greedy
//! hash-chain matching with one-token lazy lookahead, and an optimal shortest-path parse, plus
//! the special-distance table and the decode-side window reader that undoes them.
//!
//! Matches operate on the flat sequence of `Token::value`s in one stream, independent of which
//! context each position carries — a match's length token is still coded under the context the
//! literal at that position would have used, and only the dedicated distance context differs.
//! This mirrors the reference decoder's `window: Vec<u32>`, which is indexed purely by decode
//! position and has no notion of per-slot context (see `Lz77Reader::read`, below).

use tracing::debug;

use crate::entropy_coding::model::Lz77Params;
use crate::entropy_coding::token::Token;
use crate::error::{Error, Result};

/// 120 precomputed `(dx, dy)` 2D offsets, ordered by decreasing locality frequency in natural
/// images, used to compactly signal distances near the image width or the origin.
#[rustfmt::skip]
pub const SPECIAL_DISTANCES: [(i8, u8); 120] = [
    ( 0, 1), ( 1, 0), ( 1, 1), (-1, 1), ( 0, 2), ( 2, 0), ( 1, 2), (-1, 2), ( 2, 1), (-2, 1),
    ( 2, 2), (-2, 2), ( 0, 3), ( 3, 0), ( 1, 3), (-1, 3), ( 3, 1), (-3, 1), ( 2, 3), (-2, 3),
    ( 3, 2), (-3, 2), ( 0, 4), ( 4, 0), ( 1, 4), (-1, 4), ( 4, 1), (-4, 1), ( 3, 3), (-3, 3),
    ( 2, 4), (-2, 4), ( 4, 2), (-4, 2), ( 0, 5), ( 3, 4), (-3, 4), ( 4, 3), (-4, 3), ( 5, 0),
    ( 1, 5), (-1, 5), ( 5, 1), (-5, 1), ( 2, 5), (-2, 5), ( 5, 2), (-5, 2), ( 4, 4), (-4, 4),
    ( 3, 5), (-3, 5), ( 5, 3), (-5, 3), ( 0, 6), ( 6, 0), ( 1, 6), (-1, 6), ( 6, 1), (-6, 1),
    ( 2, 6), (-2, 6), ( 6, 2), (-6, 2), ( 4, 5), (-4, 5), ( 5, 4), (-5, 4), ( 3, 6), (-3, 6),
    ( 6, 3), (-6, 3), ( 0, 7), ( 7, 0), ( 1, 7), (-1, 7), ( 5, 5), (-5, 5), ( 7, 1), (-7, 1),
    ( 4, 6), (-4, 6), ( 6, 4), (-6, 4), ( 2, 7), (-2, 7), ( 7, 2), (-7, 2), ( 3, 7), (-3, 7),
    ( 7, 3), (-7, 3), ( 5, 6), (-5, 6), ( 6, 5), (-6, 5), ( 8, 0), ( 4, 7), (-4, 7), ( 7, 4),
    (-7, 4), ( 8, 1), ( 8, 2), ( 6, 6), (-6, 6), ( 8, 3), ( 5, 7), (-5, 7), ( 7, 5), (-7, 5),
    ( 8, 4), ( 6, 7), (-6, 7), ( 7, 6), (-7, 6), ( 8, 5), ( 7, 7), (-7, 7), ( 8, 6), ( 8, 7),
];

pub const WINDOW_SIZE: usize = crate::entropy_coding::model::K_WINDOW_SIZE;
const MAX_CHAIN_LENGTH: usize = 256;
const HASH_LOG: u32 = 15;
const HASH_SIZE: usize = 1 << HASH_LOG;

/// Maps a raw distance (`>= 1`) to its wire symbol, the inverse of the reference decoder's
/// distance reconstruction. Prefers a special-distance
/// symbol (smallest matching table index) over the plain `120 + distance - 1` fallback.
pub fn encode_distance_symbol(distance: u32, dist_multiplier: u32) -> u32 {
    let distance_sub_1 = distance - 1;
    if dist_multiplier == 0 {
        return distance_sub_1;
    }
    for (i, &(offset, dist)) in SPECIAL_DISTANCES.iter().enumerate() {
        let candidate = (dist_multiplier as i64 * dist as i64) + offset as i64 - 1;
        if candidate >= 0 && candidate as u32 == distance_sub_1 {
            return i as u32;
        }
    }
    120 + distance_sub_1
}

/// Inverse of [`encode_distance_symbol`], matching the reference decoder's reconstruction
/// exactly (`Lz77Reader::read`, below, and `jxl::entropy_coding::lz77`).
pub fn decode_distance_symbol(distance_sym: u32, dist_multiplier: u32) -> u32 {
    let distance_sub_1 = if dist_multiplier == 0 {
        distance_sym
    } else if let Some(d) = distance_sym.checked_sub(120) {
        d
    } else {
        let (offset, dist) = SPECIAL_DISTANCES[distance_sym as usize];
        (dist_multiplier * dist as u32).checked_add_signed(offset as i32 - 1).unwrap_or(0)
    };
    distance_sub_1 + 1
}

/// A single run-length-encoded cost model over raw token values, coarse enough to drive match
/// decisions without the full per-cluster hybrid-uint/ANS machinery: a cost estimator built from
/// a fast preliminary histogram.
pub struct CostModel {
    /// `bits[v]` is the estimated coding cost, in bits, of literal value `v`, for `v` below the
    /// cap; larger values fall back to a `log2`-based estimate.
    bits: Vec<f64>,
    total: f64,
}

impl CostModel {
    pub fn from_values(values: &[u32]) -> Self {
        let cap = 1024usize;
        let mut counts = vec![0u64; cap];
        let mut total = 0u64;
        let mut overflow = 0u64;
        for &v in values {
            total += 1;
            if (v as usize) < cap {
                counts[v as usize] += 1;
            } else {
                overflow += 1;
            }
        }
        let total_f = total.max(1) as f64;
        let bits = counts
            .iter()
            .map(|&c| {
                if c == 0 {
                    Self::fallback_bits(0)
                } else {
                    -(c as f64 / total_f).log2()
                }
            })
            .collect();
        let _ = overflow;
        Self { bits, total: total_f }
    }

    fn fallback_bits(value: u32) -> f64 {
        (value as f64 + 2.0).log2() * 2.0
    }

    pub fn cost(&self, value: u32) -> f64 {
        self.bits
            .get(value as usize)
            .copied()
            .unwrap_or_else(|| Self::fallback_bits(value))
    }
}

struct HashChain {
    head: Vec<i32>,
    prev: Vec<i32>,
}

impl HashChain {
    fn new(len: usize) -> Self {
        Self {
            head: vec![-1; HASH_SIZE],
            prev: vec![-1; len],
        }
    }

    fn hash(values: &[u32], pos: usize) -> usize {
        let a = values[pos] as u64;
        let b = values[pos + 1] as u64;
        let c = values[pos + 2] as u64;
        let h = a.wrapping_mul(506832829).wrapping_add(b.wrapping_mul(2654435761)).wrapping_add(c);
        (h as usize) & (HASH_SIZE - 1)
    }

    fn insert(&mut self, values: &[u32], pos: usize) {
        if pos + 3 > values.len() {
            return;
        }
        let h = Self::hash(values, pos);
        self.prev[pos] = self.head[h];
        self.head[h] = pos as i32;
    }

    /// Candidate predecessor positions for the 3-symbol hash starting at `pos`, nearest first,
    /// capped at `MAX_CHAIN_LENGTH` and to `WINDOW_SIZE` back.
    fn candidates(&self, values: &[u32], pos: usize) -> Vec<usize> {
        if pos + 3 > values.len() {
            return Vec::new();
        }
        let h = Self::hash(values, pos);
        let mut out = Vec::new();
        let mut cur = self.head[h];
        let min_pos = pos.saturating_sub(WINDOW_SIZE);
        while cur >= 0 && out.len() < MAX_CHAIN_LENGTH {
            let p = cur as usize;
            if p < min_pos {
                break;
            }
            out.push(p);
            cur = self.prev[p];
        }
        out
    }
}

fn match_length(values: &[u32], a: usize, b: usize, max_len: usize) -> usize {
    let mut len = 0;
    while len < max_len && values[a + len] == values[b + len] {
        len += 1;
    }
    len
}

/// One back-reference: `[pos, pos+len)` in `values` is a copy of `[pos-distance, pos-distance+len)`.
#[derive(Debug, Clone, Copy)]
struct Match {
    pos: usize,
    len: usize,
    distance: usize,
}

/// Finds, for every position, the longest match reachable via the hash chain (bounded by
/// `min_length`), used by both the greedy and optimal passes.
fn find_best_matches(values: &[u32], min_length: usize) -> Vec<Option<Match>> {
    let n = values.len();
    let mut chain = HashChain::new(n);
    let mut best = vec![None; n];
    for pos in 0..n {
        let candidates = chain.candidates(values, pos);
        let mut best_here: Option<Match> = None;
        for cand in candidates {
            let max_len = n - pos;
            let len = match_length(values, cand, pos, max_len);
            if len >= min_length && best_here.is_none_or(|m| len > m.len) {
                best_here = Some(Match {
                    pos,
                    len,
                    distance: pos - cand,
                });
            }
        }
        best[pos] = best_here;
        chain.insert(values, pos);
    }
    best
}

fn match_cost(cost: &CostModel, len: usize, distance: usize, min_length: u32, dist_multiplier: u32) -> f64 {
    let length_sym = (len as u32).saturating_sub(min_length);
    let distance_sym = encode_distance_symbol(distance as u32, dist_multiplier);
    // A length/distance pair still costs roughly log2(n) bits for its token regardless of the
    // shared cost model below min_length's split; approximate with the same per-value estimator
    // used for literals, which is conservative enough to drive accept/reject decisions.
    cost.cost(length_sym) + cost.cost(distance_sym)
}

/// One pre-pass outcome: the rewritten token stream (literals replaced by length/distance pairs)
/// plus the estimated bit savings used by the enable rule.
pub struct Lz77Pass {
    pub tokens: Vec<Token>,
    pub bit_decrease: f64,
}

/// Scans for runs of an identical value and replaces runs longer than `min_length` with a
/// length/distance-1 pair when cheaper than the literal run.
pub fn rle_pass(tokens: &[Token], min_length: u32, distance_context: u32, dist_multiplier: u32) -> Lz77Pass {
    let values: Vec<u32> = tokens.iter().map(|t| t.value).collect();
    let cost = CostModel::from_values(&values);
    let mut out = Vec::with_capacity(tokens.len());
    let mut bit_decrease = 0.0;
    let mut i = 0;
    while i < tokens.len() {
        let mut run = 1;
        while i + run < tokens.len() && values[i + run] == values[i] {
            run += 1;
        }
        if run as u32 >= min_length.max(1) {
            let literal_cost = run as f64 * cost.cost(values[i]);
            let replace_cost = match_cost(&cost, run, 1, min_length, dist_multiplier);
            if replace_cost < literal_cost {
                out.push(Token::lz77_length(tokens[i].context, run as u32 - min_length));
                out.push(Token::new(distance_context, encode_distance_symbol(1, dist_multiplier)));
                bit_decrease += literal_cost - replace_cost;
                i += run;
                continue;
            }
        }
        out.push(tokens[i]);
        i += 1;
    }
    Lz77Pass {
        tokens: out,
        bit_decrease,
    }
}

/// Greedy left-to-right matcher with one-token lazy lookahead: a match is taken unless starting
/// one token later would find a strictly longer one, and only when it is cheaper than coding the
/// covered literals directly.
pub fn greedy_pass(tokens: &[Token], min_length: u32, distance_context: u32, dist_multiplier: u32) -> Lz77Pass {
    let values: Vec<u32> = tokens.iter().map(|t| t.value).collect();
    let matches = find_best_matches(&values, min_length as usize);
    let cost = CostModel::from_values(&values);

    let mut out = Vec::with_capacity(tokens.len());
    let mut bit_decrease = 0.0;
    let mut i = 0;
    while i < tokens.len() {
        let here = matches[i];
        let better_next = i + 1 < tokens.len()
            && matches[i + 1].is_some_and(|next| here.is_none_or(|m| next.len > m.len));
        if let Some(m) = here {
            if !better_next {
                let literal_cost: f64 = (0..m.len).map(|k| cost.cost(values[i + k])).sum();
                let replace_cost = match_cost(&cost, m.len, m.distance, min_length, dist_multiplier);
                if replace_cost < literal_cost {
                    out.push(Token::lz77_length(tokens[i].context, m.len as u32 - min_length));
                    out.push(Token::new(
                        distance_context,
                        encode_distance_symbol(m.distance as u32, dist_multiplier),
                    ));
                    bit_decrease += literal_cost - replace_cost;
                    i += m.len;
                    continue;
                }
            }
        }
        out.push(tokens[i]);
        i += 1;
    }
    Lz77Pass {
        tokens: out,
        bit_decrease,
    }
}

/// Shortest-path DP over token positions: each edge is either one literal or a match of length
/// `k >= min_length` from [`find_best_matches`]. Backtracks from
/// the end to reconstruct the cheapest token sequence.
pub fn optimal_pass(tokens: &[Token], min_length: u32, distance_context: u32, dist_multiplier: u32) -> Lz77Pass {
    let values: Vec<u32> = tokens.iter().map(|t| t.value).collect();
    let matches = find_best_matches(&values, min_length as usize);
    let cost = CostModel::from_values(&values);
    let n = tokens.len();

    // dp[i]: minimum cost to encode values[i..]. choice[i]: None = literal, Some(len) = a match
    // of that length starting at i (using the best-distance match recorded for that position).
    let mut dp = vec![0.0f64; n + 1];
    let mut choice: Vec<Option<usize>> = vec![None; n];
    for i in (0..n).rev() {
        let literal_cost = cost.cost(values[i]) + dp[i + 1];
        let mut best_cost = literal_cost;
        let mut best_choice = None;
        if let Some(m) = matches[i] {
            // RLE acceleration: a long run at the RLE distance only needs its
            // length evaluated once; shorter prefixes of the same run are dominated by it.
            let replace_cost = match_cost(&cost, m.len, m.distance, min_length, dist_multiplier) + dp[i + m.len];
            if replace_cost < best_cost {
                best_cost = replace_cost;
                best_choice = Some(m.len);
            }
        }
        dp[i] = best_cost;
        choice[i] = best_choice;
    }

    let mut out = Vec::with_capacity(n);
    let mut bit_decrease = 0.0;
    let mut i = 0;
    while i < n {
        match choice[i] {
            Some(len) => {
                let m = matches[i].expect("choice[i] implies a recorded match");
                let literal_cost: f64 = (0..len).map(|k| cost.cost(values[i + k])).sum();
                let replace_cost = match_cost(&cost, len, m.distance, min_length, dist_multiplier);
                bit_decrease += literal_cost - replace_cost;
                out.push(Token::lz77_length(tokens[i].context, len as u32 - min_length));
                out.push(Token::new(
                    distance_context,
                    encode_distance_symbol(m.distance as u32, dist_multiplier),
                ));
                i += len;
            }
            None => {
                out.push(tokens[i]);
                i += 1;
            }
        }
    }
    Lz77Pass {
        tokens: out,
        bit_decrease,
    }
}

/// `bit_decrease > total_symbols * 0.2 + 16`.
pub fn should_enable(bit_decrease: f64, total_symbols: usize) -> bool {
    let enable = bit_decrease > total_symbols as f64 * 0.2 + 16.0;
    debug!(bit_decrease, total_symbols, enable, "lz77 enable decision");
    enable
}

/// Undoes a (possibly multi-stream) LZ77 pre-pass while decoding: a flat, context-agnostic
/// window indexed purely by decode position, mirroring the reference decoder's `window:
/// Vec<u32>` state. Control flow (deciding whether a just-read token is a literal or a length
/// symbol, and pulling the matching distance) lives in `model::Reader::read_with_lz77`, which
/// owns the cluster tables this type doesn't know about.
pub struct Lz77Reader {
    pub min_symbol: u32,
    pub min_length: u32,
    dist_multiplier: u32,
    window: Vec<u32>,
    num_to_copy: u32,
    copy_pos: u32,
    num_decoded: u32,
}

impl Lz77Reader {
    pub fn new(params: &Lz77Params, dist_multiplier: u32) -> Self {
        Self {
            min_symbol: params.min_symbol,
            min_length: params.min_length,
            dist_multiplier,
            window: Vec::new(),
            num_to_copy: 0,
            copy_pos: 0,
            num_decoded: 0,
        }
    }

    /// `None` when `raw_token` is an ordinary literal symbol; `Some(lz77_token)` when it names an
    /// lz77 length.
    pub fn classify(&self, raw_token: u32) -> Option<u32> {
        raw_token.checked_sub(self.min_symbol)
    }

    pub fn push(&mut self, value: u32) {
        self.window.push(value);
        self.num_decoded += 1;
    }

    pub fn pull(&mut self) -> Option<u32> {
        if self.num_to_copy == 0 {
            return None;
        }
        let v = self.window[self.copy_pos as usize];
        self.copy_pos += 1;
        self.num_to_copy -= 1;
        Some(v)
    }

    pub fn num_decoded(&self) -> u32 {
        self.num_decoded
    }

    /// Starts a copy of `length` symbols from `distance_sym` (as read under the dedicated
    /// distance cluster); errors if no symbol has been decoded yet.
    pub fn begin_copy(&mut self, length: u32, distance_sym: u32) -> Result<()> {
        if self.num_decoded == 0 {
            return Err(Error::UnexpectedLz77Repeat);
        }
        let distance_sub_1 = decode_distance_symbol(distance_sym, self.dist_multiplier) - 1;
        let distance = ((WINDOW_SIZE as u32 - 1).min(distance_sub_1) + 1).min(self.num_decoded);
        self.copy_pos = self.num_decoded - distance;
        self.num_to_copy = length;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn distance_symbol_roundtrip_no_multiplier() {
        for d in 1..5000u32 {
            let sym = encode_distance_symbol(d, 0);
            assert_eq!(decode_distance_symbol(sym, 0), d);
        }
    }

    #[test]
    fn distance_symbol_roundtrip_with_multiplier() {
        for d in [1u32, 2, 3, 4, 8, 16, 100, 5000] {
            let sym = encode_distance_symbol(d, 8);
            assert_eq!(decode_distance_symbol(sym, 8), d);
        }
    }

    fn tokens_from_values(values: &[u32]) -> Vec<Token> {
        values.iter().map(|&v| Token::new(0, v)).collect()
    }

    #[test]
    fn rle_collapses_zero_run() {
        let values = vec![0u32; 1024];
        let tokens = tokens_from_values(&values);
        let pass = rle_pass(&tokens, 3, 1, 0);
        assert!(pass.tokens.len() < tokens.len());
        assert!(pass.bit_decrease > 0.0);
    }

    #[test]
    fn greedy_finds_repeated_pattern() {
        let mut values = Vec::new();
        for _ in 0..64 {
            values.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        }
        let tokens = tokens_from_values(&values);
        let pass = greedy_pass(&tokens, 3, 1, 0);
        assert!(pass.tokens.len() < tokens.len());
    }

    #[test]
    fn optimal_at_least_as_good_as_greedy() {
        let mut values = Vec::new();
        for i in 0..64 {
            values.extend_from_slice(&[1, 2, 3, (i % 5) as u32]);
        }
        let tokens = tokens_from_values(&values);
        let greedy = greedy_pass(&tokens, 3, 1, 0);
        let optimal = optimal_pass(&tokens, 3, 1, 0);
        assert!(optimal.bit_decrease >= greedy.bit_decrease - 1e-6);
    }

    #[test]
    fn alternating_stream_no_trivial_rle_match() {
        let values: Vec<u32> = (0..16).map(|i| i % 2).collect();
        let tokens = tokens_from_values(&values);
        let pass = rle_pass(&tokens, 3, 1, 0);
        // Period-2 alternation never produces a run of >= 3 identical values.
        assert_eq!(pass.tokens.len(), tokens.len());
    }
}
