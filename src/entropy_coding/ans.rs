// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Table-based rANS (asymmetric numeral system) coding with alias-method
//! sampling.
//!
//! `AnsCodes::decode(num_histograms, log_alpha_size, br)` builds the per-cluster decode tables;
//! `AnsReader` is the stateful forward decoder, checked for a clean finish via
//! `check_final_state`.

use tracing::trace;

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::error::{Error, Result};
use crate::util::{CeilLog2, Log2Table, floor_log2};

pub const ANS_LOG_TAB_SIZE: u32 = 12;
pub const ANS_TAB_SIZE: u32 = 1 << ANS_LOG_TAB_SIZE;
pub const ANS_MAX_ALPHABET_SIZE: usize = 256;
const ANS_INITIAL_STATE: u64 = 1 << 16;
const ANS_RENORM_WORD_BITS: usize = 16;

/// Allowed-counts set for a given `shift`: the set of counts `c` such that rounding `c` down to
/// its top `prec` bits (where `prec = min(b, max(0, b - shift))`, `b = floor_log2(c)`) leaves it
/// unchanged. Pre-sorted descending with entropy deltas.
pub struct AllowedCounts {
    shift: u32,
    /// All valid non-zero counts for this shift, ascending.
    values: Vec<u32>,
}

impl AllowedCounts {
    pub fn new(shift: u32, log_tab_size: u32) -> Self {
        let tab_size = 1u32 << log_tab_size;
        let mut values = vec![1u32];
        for c in 2..tab_size {
            let b = floor_log2(c);
            let prec = (b as i64 - shift as i64).max(0).min(b as i64) as u32;
            let mask_bits = b - prec;
            if mask_bits == 0 || (c >> mask_bits) << mask_bits == c {
                values.push(c);
            }
        }
        values.push(tab_size);
        Self { shift, values }
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// The largest allowed count `<= target` (and `>= 1`).
    pub fn snap_down(&self, target: u32) -> u32 {
        match self.values.binary_search(&target) {
            Ok(i) => self.values[i],
            Err(0) => 1,
            Err(i) => self.values[i - 1],
        }
    }

    pub fn contains(&self, count: u32) -> bool {
        self.values.binary_search(&count).is_ok()
    }

    /// Neighbouring allowed counts strictly above/below `count`, used by the rebalancing loop to
    /// evaluate single-step increases/decreases.
    pub fn step_up(&self, count: u32) -> Option<u32> {
        let i = self.values.binary_search(&count).ok()?;
        self.values.get(i + 1).copied()
    }
    pub fn step_down(&self, count: u32) -> Option<u32> {
        let i = self.values.binary_search(&count).ok()?;
        if i == 0 { None } else { Some(self.values[i - 1]) }
    }
}

/// A histogram normalized so non-zero counts sum to exactly `2^log_tab_size` and each belongs to
/// the `shift`-indexed allowed-counts set.
#[derive(Debug, Clone)]
pub struct NormalizedHistogram {
    pub counts: Vec<u32>,
    pub omit_pos: usize,
    pub shift: u32,
}

/// Rebalances `raw_counts` (summing to `total`) to a normalized histogram summing to exactly
/// `2^log_tab_size`. `raw_counts` may contain zeros; histograms with 0 or 1
/// non-zero symbol are rejected (callers use the short-tree path instead, see `histogram.rs`).
pub fn rebalance_histogram(
    raw_counts: &[u32],
    shift: u32,
    log_tab_size: u32,
    log2_table: &Log2Table,
) -> Result<NormalizedHistogram> {
    let total: u64 = raw_counts.iter().map(|&c| c as u64).sum();
    let tab_size = 1u32 << log_tab_size;
    let nonzero: Vec<usize> = raw_counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c != 0)
        .map(|(i, _)| i)
        .collect();
    if nonzero.len() < 2 {
        return Err(Error::RebalanceFailed);
    }
    let allowed = AllowedCounts::new(shift, log_tab_size);

    let mut counts = vec![0u32; raw_counts.len()];
    for &s in &nonzero {
        let c = raw_counts[s] as u64;
        let target = ((c * tab_size as u64) as f64 / total as f64).round() as u32;
        let target = target.clamp(1, tab_size - 1);
        counts[s] = allowed.snap_down(target);
    }

    // The balancing bin is the one with the largest raw count; it absorbs the remainder and is
    // never transmitted (the "omit position", recovered by the decoder as 2^L - sum(others)).
    let omit_pos = *nonzero
        .iter()
        .max_by_key(|&&s| raw_counts[s])
        .expect("nonzero has >= 2 elements");

    let adjustable: Vec<usize> = nonzero.iter().copied().filter(|&s| s != omit_pos).collect();

    let sum_adjustable = |counts: &[u32]| -> i64 { adjustable.iter().map(|&s| counts[s] as i64).sum() };

    loop {
        let rest = tab_size as i64 - sum_adjustable(&counts);
        // Guardrails: if rest is out of [1, 2^L), only moves that pull it back
        // in are permitted.
        let allow_increase = rest > 0;
        let allow_decrease = rest < (tab_size as i64);

        let mut best_gain = 0i64;
        let mut best_move: Option<(usize, u32)> = None;
        for &s in &adjustable {
            let cur = counts[s];
            if allow_increase {
                if let Some(next) = allowed.step_up(cur) {
                    let gain = log2_table.bits_scaled(cur) - log2_table.bits_scaled(next);
                    if gain > best_gain {
                        best_gain = gain;
                        best_move = Some((s, next));
                    }
                }
            }
            if allow_decrease {
                if let Some(next) = allowed.step_down(cur) {
                    let gain = log2_table.bits_scaled(cur) - log2_table.bits_scaled(next);
                    if gain > best_gain {
                        best_gain = gain;
                        best_move = Some((s, next));
                    }
                }
            }
        }

        match best_move {
            Some((s, next)) => counts[s] = next,
            None => {
                let rest = tab_size as i64 - sum_adjustable(&counts);
                if rest >= 1 && rest < tab_size as i64 {
                    counts[omit_pos] = rest as u32;
                    break;
                }
                // No improving step and rest is out of range: nothing more can be done.
                return Err(Error::RebalanceFailed);
            }
        }
    }

    debug_assert_eq!(counts.iter().map(|&c| c as u64).sum::<u64>(), tab_size as u64);
    trace!(shift, omit_pos, "rebalanced histogram");
    Ok(NormalizedHistogram { counts, omit_pos, shift })
}

/// Builds the wire-ready [`NormalizedHistogram`] for `counts`, routing degenerate alphabets (0,
/// 1 or 2 non-zero symbols) to the short-tree shapes `encode_counts`/`decode_counts` use directly
/// rather than through the general rebalancing loop, which requires at least 2 symbols and
/// produces allowed-set-snapped counts that the two-symbol wire shape doesn't need.
pub fn build_normalized(
    counts: &[u32],
    shift: u32,
    log_tab_size: u32,
    log2_table: &Log2Table,
) -> Result<NormalizedHistogram> {
    let tab_size = 1u32 << log_tab_size;
    let nonzero: Vec<usize> = counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c != 0)
        .map(|(i, _)| i)
        .collect();
    match nonzero.len() {
        0 => Ok(NormalizedHistogram {
            counts: {
                let mut c = vec![0u32; counts.len().max(1)];
                c[0] = tab_size;
                c
            },
            omit_pos: 0,
            shift,
        }),
        1 => {
            let mut c = vec![0u32; counts.len()];
            c[nonzero[0]] = tab_size;
            Ok(NormalizedHistogram {
                counts: c,
                omit_pos: nonzero[0],
                shift,
            })
        }
        2 => {
            let total: u64 = nonzero.iter().map(|&s| counts[s] as u64).sum();
            let lo = nonzero[0];
            let hi = nonzero[1];
            let target = (((counts[lo] as u64 * tab_size as u64) as f64 / total as f64).round() as u32)
                .clamp(1, tab_size - 1);
            let mut c = vec![0u32; counts.len()];
            c[lo] = target;
            c[hi] = tab_size - target;
            Ok(NormalizedHistogram {
                counts: c,
                omit_pos: hi,
                shift,
            })
        }
        _ => rebalance_histogram(counts, shift, log_tab_size, log2_table),
    }
}

/// Alias-method sampling table: `2^log_alpha_size` entries, each covering
/// `2^(ANS_LOG_TAB_SIZE - log_alpha_size)` sub-slots.
#[derive(Debug, Clone, Copy)]
struct AliasEntry {
    cutoff: u32,
    right_value: u16,
    offset: u32,
}

#[derive(Debug, Clone)]
pub struct AliasTable {
    log_alpha_size: u32,
    entries: Vec<AliasEntry>,
    freqs: Vec<u32>,
    /// `reverse_map[s]` holds the `counts[s]` distinct table slots assigned to symbol `s`,
    /// indexed by "occurrence number" — the encoder's half of the alias table.
    reverse_map: Vec<Vec<u32>>,
}

impl AliasTable {
    /// Builds the alias table for a normalized histogram, via the classic overfull/underfull
    /// worklist construction (Vose's algorithm), adapted to fixed-point frequencies.
    pub fn build(counts: &[u32], log_alpha_size: u32) -> Self {
        let log_entry_size = ANS_LOG_TAB_SIZE - log_alpha_size;
        let entry_size = 1u32 << log_entry_size;
        let n = 1usize << log_alpha_size;

        let mut remaining = vec![0u32; n];
        for (s, &c) in counts.iter().enumerate().take(n) {
            remaining[s] = c;
        }

        let mut entries = vec![
            AliasEntry {
                cutoff: entry_size,
                right_value: 0,
                offset: 0,
            };
            n
        ];
        let mut underfull: Vec<usize> = Vec::new();
        let mut overfull: Vec<usize> = Vec::new();
        for s in 0..n {
            match remaining[s].cmp(&entry_size) {
                std::cmp::Ordering::Less => underfull.push(s),
                std::cmp::Ordering::Greater => overfull.push(s),
                std::cmp::Ordering::Equal => {}
            }
        }

        while let Some(o) = overfull.pop() {
            let Some(u) = underfull.pop() else {
                // Only possible if total frequency doesn't sum to n * entry_size; rebalancing
                // upstream guarantees this doesn't happen.
                break;
            };
            let needed = entry_size - remaining[u];
            entries[u] = AliasEntry {
                cutoff: remaining[u],
                right_value: o as u16,
                offset: remaining[o] - needed,
            };
            remaining[o] -= needed;
            match remaining[o].cmp(&entry_size) {
                std::cmp::Ordering::Less => underfull.push(o),
                std::cmp::Ordering::Greater => overfull.push(o),
                std::cmp::Ordering::Equal => {}
            }
        }

        let mut freqs = vec![0u32; n];
        for (s, &c) in counts.iter().enumerate().take(n) {
            freqs[s] = c;
        }

        // Indexed by decode `offset`, not by table-traversal order: `lookup` maps
        // `index -> (s, offset)`, and encoding needs the exact inverse, `(s, offset) -> index`.
        // Table-traversal order only coincides with offset order for a symbol's own bucket;
        // any range aliased in from a donor bucket breaks that, so each `index` must be
        // written to `reverse_map[s][offset]` directly rather than appended.
        let mut reverse_map: Vec<Vec<u32>> = freqs.iter().map(|&f| vec![0u32; f as usize]).collect();
        for index in 0..(1u32 << ANS_LOG_TAB_SIZE) {
            let bucket = (index >> log_entry_size) as usize;
            let local = index & (entry_size - 1);
            let e = &entries[bucket];
            let (s, offset) = if local < e.cutoff {
                (bucket, local)
            } else {
                (e.right_value as usize, e.offset + (local - e.cutoff))
            };
            reverse_map[s][offset as usize] = index;
        }

        Self {
            log_alpha_size,
            entries,
            freqs,
            reverse_map,
        }
    }

    fn lookup(&self, index: u32) -> (usize, u32) {
        let log_entry_size = ANS_LOG_TAB_SIZE - self.log_alpha_size;
        let entry_size = 1u32 << log_entry_size;
        let bucket = (index >> log_entry_size) as usize;
        let local = index & (entry_size - 1);
        let e = &self.entries[bucket];
        if local < e.cutoff {
            (bucket, local)
        } else {
            (e.right_value as usize, e.offset + (local - e.cutoff))
        }
    }

    pub fn freq(&self, symbol: usize) -> u32 {
        self.freqs[symbol]
    }
}

/// Per-cluster rANS encoding/decoding tables, derived once from a normalized histogram.
#[derive(Debug, Clone)]
pub struct AnsTable {
    alias: AliasTable,
}

impl AnsTable {
    pub fn from_normalized(hist: &NormalizedHistogram, log_alpha_size: u32) -> Self {
        Self {
            alias: AliasTable::build(&hist.counts, log_alpha_size),
        }
    }
}

/// Accumulates rANS-coded symbols and flushes them to a [`BitWriter`].
///
/// Tokens must be fed in reverse order relative to the original stream; call
/// [`Self::encode_symbol`] once per token from last to first, then [`Self::finish`].
pub struct AnsWriter {
    state: u64,
    /// One forward-ordered group of writes per token, pushed in reverse processing order;
    /// flushed in reverse at the end to restore the original token order.
    groups: Vec<Vec<(usize, u64)>>,
}

impl Default for AnsWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsWriter {
    pub fn new() -> Self {
        Self {
            state: ANS_INITIAL_STATE,
            groups: Vec::new(),
        }
    }

    /// Encodes one symbol (the hybrid-uint token) under `table`, and the `nbits` raw bits that
    /// follow it in read order. Tokens must be supplied in reverse stream order.
    pub fn encode_symbol(&mut self, table: &AnsTable, symbol: u32, nbits: u32, bits: u32) {
        let freq = table.alias.freq(symbol as usize);
        debug_assert!(freq > 0, "symbol with zero frequency cannot be encoded");

        let mut renorm_words = Vec::new();
        while self.state >= (freq as u64) << 16 {
            // The update below would overflow 32 bits unless we shed a word first.
            renorm_words.push(self.state & 0xffff);
            self.state >>= 16;
        }

        let x = self.state as u32;
        let slot_index = table.alias.reverse_map[symbol as usize][(x % freq) as usize];
        self.state = (((x / freq) << ANS_LOG_TAB_SIZE) | slot_index) as u64;

        let mut group = Vec::with_capacity(renorm_words.len() + 1);
        for w in renorm_words.into_iter().rev() {
            group.push((ANS_RENORM_WORD_BITS, w));
        }
        if nbits > 0 {
            group.push((nbits as usize, bits as u64));
        }
        self.groups.push(group);
    }

    /// Like [`Self::encode_symbol`] but looking the table up in `codes` by cluster, mirroring
    /// `AnsReader::read`'s calling convention.
    pub fn encode_symbol_in(&mut self, codes: &AnsCodes, cluster: usize, symbol: u32, nbits: u32, bits: u32) {
        self.encode_symbol(codes.table(cluster), symbol, nbits, bits);
    }

    /// Flushes the final 32-bit state followed by the reversed scratch buffer.
    /// Returns the number of bits written.
    pub fn finish(self, bw: &mut BitWriter) -> Result<usize> {
        let start = bw.total_bits_written();
        bw.write(32, self.state)?;
        for group in self.groups.iter().rev() {
            for &(nbits, bits) in group {
                bw.write(nbits, bits)?;
            }
        }
        Ok(bw.total_bits_written() - start)
    }
}

/// Forward (decode-order) rANS reader, the completion of `entropy_coding::decode`'s
/// `Codes::Ans` path.
#[derive(Debug)]
pub struct AnsReader {
    state: u64,
}

impl AnsReader {
    pub fn init(br: &mut BitReader) -> Result<Self> {
        Ok(Self {
            state: br.read(32)?,
        })
    }

    pub fn new_unused() -> Self {
        Self { state: 0 }
    }

    /// Decodes one symbol under cluster `cluster`'s table, matching the reference decoder's
    /// `ans_reader.read(ans, br, cluster)` call shape.
    pub fn read(&mut self, codes: &AnsCodes, br: &mut BitReader, cluster: usize) -> Result<u32> {
        self.read_table(&codes.tables[cluster], br)
    }

    fn read_table(&mut self, table: &AnsTable, br: &mut BitReader) -> Result<u32> {
        let index = (self.state & (ANS_TAB_SIZE as u64 - 1)) as u32;
        let (symbol, offset) = table.alias.lookup(index);
        let freq = table.alias.freq(symbol);
        self.state = freq as u64 * (self.state >> ANS_LOG_TAB_SIZE) + offset as u64;
        while self.state < ANS_INITIAL_STATE {
            let word = br.read(ANS_RENORM_WORD_BITS)?;
            self.state = (self.state << ANS_RENORM_WORD_BITS) | word;
        }
        Ok(symbol as u32)
    }

    pub fn check_final_state(&self) -> Result<()> {
        if self.state == ANS_INITIAL_STATE {
            Ok(())
        } else {
            Err(Error::ArithmeticOverflow)
        }
    }
}

/// The static canonical code used to entropy-code per-symbol `logcount` values when serializing
/// a histogram. 14 symbols: logcount values `0..=12` plus an RLE-escape symbol
/// (`13`) for runs of 5 or more equal logcounts. Two length-3 codes for the most common small
/// values, twelve length-4 codes for the rest; `2*2^-3 + 12*2^-4 == 1`, so the code is complete.
const LOGCOUNT_NUM_SYMBOLS: usize = 14;
const LOGCOUNT_RLE_ESCAPE: u16 = 13;
const LOGCOUNT_CODE_LENGTHS: [u8; LOGCOUNT_NUM_SYMBOLS] = [3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4];
const LOGCOUNT_MIN_RUN: usize = 5;

fn logcount_of(count: u32) -> u32 {
    if count == 0 { 0 } else { floor_log2(count) + 1 }
}

/// Builds canonical codewords (MSB-first) for [`LOGCOUNT_CODE_LENGTHS`], in symbol order.
fn logcount_canonical_codes() -> [(u8, u16); LOGCOUNT_NUM_SYMBOLS] {
    let mut order: Vec<usize> = (0..LOGCOUNT_NUM_SYMBOLS).collect();
    order.sort_by_key(|&s| (LOGCOUNT_CODE_LENGTHS[s], s));
    let mut codes = [(0u8, 0u16); LOGCOUNT_NUM_SYMBOLS];
    let mut code: u32 = 0;
    let mut prev_len = LOGCOUNT_CODE_LENGTHS[order[0]];
    for &s in &order {
        let len = LOGCOUNT_CODE_LENGTHS[s];
        code <<= len - prev_len;
        codes[s] = (len, code as u16);
        code += 1;
        prev_len = len;
    }
    codes
}

fn write_logcount_symbol(bw: &mut BitWriter, codes: &[(u8, u16); LOGCOUNT_NUM_SYMBOLS], symbol: u16) -> Result<()> {
    let (len, code) = codes[symbol as usize];
    bw.write(len as usize, code as u64)
}

fn read_logcount_symbol(br: &mut BitReader, codes: &[(u8, u16); LOGCOUNT_NUM_SYMBOLS]) -> Result<u16> {
    let mut len = 0u8;
    let mut code = 0u16;
    loop {
        code = (code << 1) | br.read(1)? as u16;
        len += 1;
        if let Some(symbol) = codes
            .iter()
            .position(|&(l, c)| l == len && c == code)
        {
            return Ok(symbol as u16);
        }
        if len as usize > *LOGCOUNT_CODE_LENGTHS.iter().max().unwrap() as usize {
            return Err(Error::InvalidHuffman);
        }
    }
}

/// A normalized histogram is "flat" when every one of its `alphabet_size` symbols (a power of
/// two) shares the count `2^log_tab_size / alphabet_size`. Cheap to recognize and to signal:
/// just the alphabet size, no per-symbol counts at all.
pub fn is_flat(counts: &[u32], log_tab_size: u32) -> Option<usize> {
    let alphabet_size = counts.iter().rposition(|&c| c != 0)? + 1;
    if !alphabet_size.is_power_of_two() {
        return None;
    }
    let tab_size = 1u32 << log_tab_size;
    let expected = tab_size / alphabet_size as u32;
    if expected == 0 || tab_size % alphabet_size as u32 != 0 {
        return None;
    }
    if counts[..alphabet_size].iter().all(|&c| c == expected) {
        Some(alphabet_size)
    } else {
        None
    }
}

/// True uniformity check on *raw*, pre-normalization counts: every symbol in a power-of-two
/// alphabet shares the same nonzero count (any total, not necessarily `2^log_tab_size`). Distinct
/// from [`is_flat`], which recognizes an *already-normalized* histogram's flat shape at
/// serialization time; this one lets the encoder skip straight to [`build_flat_normalized`]
/// instead of routing a uniform raw histogram through the general rebalancing search.
pub fn is_uniform_raw(counts: &[u32]) -> Option<usize> {
    let alphabet_size = counts.iter().rposition(|&c| c != 0)? + 1;
    if !alphabet_size.is_power_of_two() {
        return None;
    }
    let share = counts[0];
    if share == 0 || !counts[..alphabet_size].iter().all(|&c| c == share) {
        return None;
    }
    Some(alphabet_size)
}

/// Builds the wire-ready flat [`NormalizedHistogram`] directly for a uniform `alphabet_size`
/// (must be a power of two): every symbol gets the equal share `2^log_tab_size / alphabet_size`
///. `shift` is irrelevant to a flat histogram's shape, so it's recorded
/// as `0`.
pub fn build_flat_normalized(alphabet_size: usize, log_tab_size: u32) -> NormalizedHistogram {
    debug_assert!(alphabet_size.is_power_of_two());
    let tab_size = 1u32 << log_tab_size;
    let share = tab_size / alphabet_size as u32;
    NormalizedHistogram {
        counts: vec![share; alphabet_size],
        omit_pos: alphabet_size - 1,
        shift: 0,
    }
}

/// Serializes one cluster's normalized counts. `omit_pos`'s count is never
/// transmitted; the decoder recovers it as `2^log_tab_size - sum(others)`.
fn encode_counts(bw: &mut BitWriter, counts: &[u32], omit_pos: usize, shift: u32) -> Result<()> {
    let alphabet_size = counts.len();
    let nonzero = counts.iter().filter(|&&c| c != 0).count();

    if nonzero > 2 {
        if let Some(flat_alphabet_size) = is_flat(counts, ANS_LOG_TAB_SIZE) {
            bw.write(2, 3)?;
            crate::entropy_coding::model::write_varint(bw, flat_alphabet_size as u32 - 1)?;
            return Ok(());
        }
    }

    if nonzero <= 1 {
        // Single (or zero, degenerate) symbol: write its index; its count is implicitly the
        // whole table.
        bw.write(2, 0)?;
        let only = (0..alphabet_size).find(|&s| counts[s] != 0).unwrap_or(0);
        crate::entropy_coding::model::write_varint(bw, only as u32)?;
        return Ok(());
    }
    if nonzero == 2 {
        // Two-symbol alphabet: name both indices and the first count; the second is implied.
        bw.write(2, 1)?;
        let mut it = (0..alphabet_size).filter(|&s| counts[s] != 0);
        let lo = it.next().unwrap();
        let hi = it.next().unwrap();
        crate::entropy_coding::model::write_varint(bw, lo as u32)?;
        crate::entropy_coding::model::write_varint(bw, hi as u32)?;
        crate::entropy_coding::model::write_varint(bw, counts[lo])?;
        return Ok(());
    }

    bw.write(2, 2)?;
    let nbits = (alphabet_size as u32).max(1).ceil_log2_for_ans();
    bw.write(nbits as usize, omit_pos as u64)?;
    bw.write(4, shift as u64)?;
    crate::entropy_coding::model::write_varint(bw, alphabet_size as u32 - 1)?;

    let codes = logcount_canonical_codes();
    let symbols: Vec<u32> = (0..alphabet_size)
        .filter(|&s| s != omit_pos)
        .map(|s| logcount_of(counts[s]))
        .collect();

    let mut i = 0;
    while i < symbols.len() {
        let v = symbols[i];
        let mut run = 1;
        while i + run < symbols.len() && symbols[i + run] == v {
            run += 1;
        }
        write_logcount_symbol(bw, &codes, v as u16)?;
        if run >= LOGCOUNT_MIN_RUN {
            write_logcount_symbol(bw, &codes, LOGCOUNT_RLE_ESCAPE)?;
            crate::entropy_coding::model::write_varint(bw, (run - LOGCOUNT_MIN_RUN) as u32)?;
        } else {
            for _ in 1..run {
                write_logcount_symbol(bw, &codes, v as u16)?;
            }
        }
        i += run;
    }

    for s in (0..alphabet_size).filter(|&s| s != omit_pos) {
        let logcount = logcount_of(counts[s]);
        if logcount >= 1 {
            let base = 1u32 << (logcount - 1);
            bw.write((logcount - 1) as usize, (counts[s] - base) as u64)?;
        }
    }
    Ok(())
}

fn decode_counts(br: &mut BitReader, alphabet_size: usize, log_tab_size: u32) -> Result<(Vec<u32>, u32)> {
    let tab_size = 1u32 << log_tab_size;
    match br.read(2)? {
        0 => {
            let mut counts = vec![0u32; alphabet_size];
            let only = crate::entropy_coding::model::read_varint(br)? as usize;
            if only >= alphabet_size {
                return Err(Error::RebalanceFailed);
            }
            counts[only] = tab_size;
            Ok((counts, 0))
        }
        1 => {
            let mut counts = vec![0u32; alphabet_size];
            let lo = crate::entropy_coding::model::read_varint(br)? as usize;
            let hi = crate::entropy_coding::model::read_varint(br)? as usize;
            let lo_count = crate::entropy_coding::model::read_varint(br)?;
            if lo >= alphabet_size || hi >= alphabet_size || lo == hi || lo_count == 0 || lo_count >= tab_size {
                return Err(Error::RebalanceFailed);
            }
            counts[lo] = lo_count;
            counts[hi] = tab_size - lo_count;
            Ok((counts, 0))
        }
        3 => {
            let flat_alphabet_size = crate::entropy_coding::model::read_varint(br)? as usize + 1;
            if flat_alphabet_size > alphabet_size || !flat_alphabet_size.is_power_of_two() {
                return Err(Error::RebalanceFailed);
            }
            let mut counts = vec![0u32; alphabet_size];
            let share = tab_size / flat_alphabet_size as u32;
            counts[..flat_alphabet_size].fill(share);
            Ok((counts, 0))
        }
        2 => {
            let nbits = (alphabet_size as u32).max(1).ceil_log2_for_ans();
            let omit_pos = br.read(nbits as usize)? as usize;
            let shift = br.read(4)? as u32;
            let declared = crate::entropy_coding::model::read_varint(br)? as usize + 1;
            if declared != alphabet_size || omit_pos >= alphabet_size {
                return Err(Error::InvalidContextMap(declared as u32, alphabet_size as u32));
            }

            let codes = logcount_canonical_codes();
            let mut logcounts = vec![0u32; alphabet_size];
            let order: Vec<usize> = (0..alphabet_size).filter(|&s| s != omit_pos).collect();
            let mut i = 0;
            let mut pending: Option<u16> = None;
            while i < order.len() {
                let v = match pending.take() {
                    Some(v) => v,
                    None => read_logcount_symbol(br, &codes)?,
                };
                if v == LOGCOUNT_RLE_ESCAPE {
                    return Err(Error::InvalidHuffman);
                }
                logcounts[order[i]] = v as u32;
                i += 1;
                if i >= order.len() {
                    break;
                }
                let next = read_logcount_symbol(br, &codes)?;
                if next == LOGCOUNT_RLE_ESCAPE {
                    let run_extra = crate::entropy_coding::model::read_varint(br)?;
                    let run = run_extra as usize + LOGCOUNT_MIN_RUN - 1;
                    for _ in 0..run {
                        if i >= order.len() {
                            return Err(Error::InvalidHuffman);
                        }
                        logcounts[order[i]] = v as u32;
                        i += 1;
                    }
                } else {
                    pending = Some(next);
                }
            }

            let mut counts = vec![0u32; alphabet_size];
            for &s in &order {
                let logcount = logcounts[s];
                if logcount == 0 {
                    counts[s] = 0;
                } else {
                    let base = 1u32 << (logcount - 1);
                    let extra = if logcount > 1 { br.read((logcount - 1) as usize)? as u32 } else { 0 };
                    counts[s] = base + extra;
                }
            }
            let sum: u32 = counts.iter().sum();
            if sum >= tab_size {
                return Err(Error::RebalanceFailed);
            }
            counts[omit_pos] = tab_size - sum;
            Ok((counts, shift))
        }
        _ => Err(Error::InvalidHuffman),
    }
}

/// Per-histogram decoded/encoded ANS tables for one `Histograms` block.
#[derive(Debug)]
pub struct AnsCodes {
    histograms: Vec<NormalizedHistogram>,
    tables: Vec<AnsTable>,
}

impl AnsCodes {
    pub fn decode(num_histograms: usize, log_alpha_size: usize, br: &mut BitReader) -> Result<Self> {
        let alphabet_size = 1usize << log_alpha_size;
        let mut histograms = Vec::with_capacity(num_histograms);
        let mut tables = Vec::with_capacity(num_histograms);
        for _ in 0..num_histograms {
            let (counts, _shift) = decode_counts(br, alphabet_size, ANS_LOG_TAB_SIZE)?;
            let alias = AliasTable::build(&counts, log_alpha_size as u32);
            tables.push(AnsTable { alias });
            histograms.push(NormalizedHistogram {
                omit_pos: counts.iter().enumerate().max_by_key(|&(_, &c)| c).map(|(i, _)| i).unwrap_or(0),
                counts,
                shift: _shift,
            });
        }
        Ok(Self { histograms, tables })
    }

    /// Builds an `AnsCodes` directly from already-rebalanced histograms (the encoder path,
    /// skipping the bitstream round-trip).
    pub fn from_histograms(histograms: Vec<NormalizedHistogram>, log_alpha_size: u32) -> Self {
        let tables = histograms
            .iter()
            .map(|h| AnsTable::from_normalized(h, log_alpha_size))
            .collect();
        Self { histograms, tables }
    }

    pub fn encode(&self, bw: &mut BitWriter) -> Result<()> {
        for hist in &self.histograms {
            encode_counts(bw, &hist.counts, hist.omit_pos, hist.shift)?;
        }
        Ok(())
    }

    pub fn table(&self, cluster: usize) -> &AnsTable {
        &self.tables[cluster]
    }

    /// Bits `self.encode` would write for this block, used by `histogram.rs` to compare the ANS
    /// and prefix-code paths without actually writing anything.
    pub fn header_cost_bits(&self) -> Result<u64> {
        let mut bw = BitWriter::new();
        self.encode(&mut bw)?;
        Ok(bw.total_bits_written() as u64)
    }

    /// Estimated bits to code `histogram`'s tokens under cluster `cluster`'s table (ideal entropy,
    /// no raw extra bits), used by `histogram.rs` to compare ANS against prefix coding.
    pub fn cost_bits(&self, cluster: usize, histogram: &[u32], log2_table: &Log2Table) -> u64 {
        let table = &self.tables[cluster];
        histogram
            .iter()
            .enumerate()
            .map(|(s, &c)| {
                if c == 0 {
                    0
                } else {
                    (c as f64 * log2_table.bits(table.alias.freq(s))).ceil() as u64
                }
            })
            .sum()
    }
}

trait CeilLog2ForAns {
    fn ceil_log2_for_ans(self) -> u32;
}
impl CeilLog2ForAns for u32 {
    fn ceil_log2_for_ans(self) -> u32 {
        use crate::util::CeilLog2;
        self.ceil_log2() as u32
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    fn log2_table() -> Log2Table {
        Log2Table::new(ANS_LOG_TAB_SIZE)
    }

    #[test]
    fn rebalance_sums_to_table_size() {
        let log2 = log2_table();
        let raw = [100u32, 50, 25, 10, 1];
        for shift in 0..ANS_LOG_TAB_SIZE {
            let hist = rebalance_histogram(&raw, shift, ANS_LOG_TAB_SIZE, &log2).unwrap();
            assert_eq!(hist.counts.iter().sum::<u32>(), ANS_TAB_SIZE);
        }
    }

    #[test]
    fn rebalance_pathological_near_geometric() {
        let log2 = log2_table();
        let mut raw = vec![0u32; 256];
        raw[0] = 99_000;
        for (i, c) in raw.iter_mut().enumerate().skip(1) {
            *c = 1 + (i as u32 % 3);
        }
        let hist = rebalance_histogram(&raw, 4, ANS_LOG_TAB_SIZE, &log2).unwrap();
        assert_eq!(hist.counts.iter().sum::<u32>(), ANS_TAB_SIZE);
        assert_eq!(hist.omit_pos, 0);
    }

    #[test]
    fn alias_table_reverse_map_covers_each_symbol_exactly() {
        let log2 = log2_table();
        let raw = [10u32, 20, 5, 1];
        let hist = rebalance_histogram(&raw, 0, ANS_LOG_TAB_SIZE, &log2).unwrap();
        let alias = AliasTable::build(&hist.counts, 2);
        for (s, &count) in hist.counts.iter().enumerate() {
            assert_eq!(alias.reverse_map[s].len(), count as usize);
            let mut sorted = alias.reverse_map[s].clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), count as usize);
        }
    }

    #[test]
    fn ans_roundtrip_single_symbol_stream() {
        let log2 = log2_table();
        let raw = [1u32, 1];
        let hist = rebalance_histogram(&raw, 0, ANS_LOG_TAB_SIZE, &log2).unwrap();
        let codes = AnsCodes::from_histograms(vec![hist], 1);

        let symbols = [0u32, 1, 0, 1, 1, 0];
        let mut writer = AnsWriter::new();
        for &s in symbols.iter().rev() {
            writer.encode_symbol_in(&codes, 0, s, 0, 0);
        }
        let mut bw = BitWriter::new();
        writer.finish(&mut bw).unwrap();
        let bytes = bw.finalize().unwrap();

        let mut br = BitReader::new(&bytes);
        let mut reader = AnsReader::init(&mut br).unwrap();
        let mut decoded = Vec::new();
        for _ in 0..symbols.len() {
            decoded.push(reader.read(&codes, &mut br, 0).unwrap());
        }
        assert_eq!(decoded, symbols);
        reader.check_final_state().unwrap();
    }

    #[test]
    fn ans_roundtrip_skewed_distribution() {
        let log2 = log2_table();
        let raw = [900u32, 80, 15, 4, 1];
        let hist = rebalance_histogram(&raw, 2, ANS_LOG_TAB_SIZE, &log2).unwrap();
        let codes = AnsCodes::from_histograms(vec![hist], 3);

        let mut rng_state = 12345u32;
        let mut next = || {
            rng_state = rng_state.wrapping_mul(1664525).wrapping_add(1013904223);
            rng_state
        };
        let symbols: Vec<u32> = (0..2000)
            .map(|_| {
                let r = next() % 1000;
                if r < 900 {
                    0
                } else if r < 980 {
                    1
                } else if r < 995 {
                    2
                } else if r < 999 {
                    3
                } else {
                    4
                }
            })
            .collect();

        let mut writer = AnsWriter::new();
        for &s in symbols.iter().rev() {
            writer.encode_symbol_in(&codes, 0, s, 0, 0);
        }
        let mut bw = BitWriter::new();
        writer.finish(&mut bw).unwrap();
        let bytes = bw.finalize().unwrap();

        let mut br = BitReader::new(&bytes);
        let mut reader = AnsReader::init(&mut br).unwrap();
        let decoded: Vec<u32> = (0..symbols.len())
            .map(|_| reader.read(&codes, &mut br, 0).unwrap())
            .collect();
        assert_eq!(decoded, symbols);
        reader.check_final_state().unwrap();
    }

    #[test]
    fn counts_roundtrip_general_path() {
        let log2 = log2_table();
        let raw = [900u32, 80, 15, 4, 1];
        let hist = rebalance_histogram(&raw, 2, ANS_LOG_TAB_SIZE, &log2).unwrap();

        let mut bw = BitWriter::new();
        encode_counts(&mut bw, &hist.counts, hist.omit_pos, 2).unwrap();
        let bytes = bw.finalize().unwrap();
        let mut br = BitReader::new(&bytes);
        let (counts, _shift) = decode_counts(&mut br, hist.counts.len(), ANS_LOG_TAB_SIZE).unwrap();
        assert_eq!(counts, hist.counts);
    }

    #[test]
    fn counts_roundtrip_with_long_run() {
        let mut counts = vec![0u32; 32];
        counts[0] = ANS_TAB_SIZE - 31;
        for c in counts.iter_mut().skip(1) {
            *c = 1;
        }
        let omit_pos = 0;

        let mut bw = BitWriter::new();
        encode_counts(&mut bw, &counts, omit_pos, 0).unwrap();
        let bytes = bw.finalize().unwrap();
        let mut br = BitReader::new(&bytes);
        let (decoded, _shift) = decode_counts(&mut br, counts.len(), ANS_LOG_TAB_SIZE).unwrap();
        assert_eq!(decoded, counts);
    }

    #[test]
    fn counts_roundtrip_two_symbols() {
        let counts = {
            let mut c = vec![0u32; 4];
            c[1] = 3000;
            c[3] = ANS_TAB_SIZE - 3000;
            c
        };
        let mut bw = BitWriter::new();
        encode_counts(&mut bw, &counts, 3, 0).unwrap();
        let bytes = bw.finalize().unwrap();
        let mut br = BitReader::new(&bytes);
        let (decoded, _shift) = decode_counts(&mut br, counts.len(), ANS_LOG_TAB_SIZE).unwrap();
        assert_eq!(decoded, counts);
    }
}
