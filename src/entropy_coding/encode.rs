// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Top-level encoder entry points: given per-context token streams, picks an
//! LZ77 pre-pass, clusters contexts into histograms, selects hybrid-uint configs and a prefix or
//! ANS code per cluster, writes the model header, then writes the tokens themselves.

use tracing::{debug, instrument};

use crate::bit_writer::BitWriter;
use crate::entropy_coding::ans::{
    AnsCodes, AnsWriter, NormalizedHistogram, build_flat_normalized, build_normalized,
    is_uniform_raw,
};
use crate::entropy_coding::histogram::{Histogram, cluster_histograms};
use crate::entropy_coding::huffman::EncodeHuffmanCodes;
use crate::entropy_coding::hybrid_uint::{HYBRID_UINT_METHOD_CANDIDATES, HybridUintConfig};
use crate::entropy_coding::lz77::{self, Lz77Pass};
use crate::entropy_coding::model::{
    AnsHistogramStrategy, Codes, EncoderParams, EntropyEncodingData, HybridUintMethod, Lz77Method,
    Lz77Params,
};
use crate::entropy_coding::token::Token;
use crate::error::{Error, Result};
use crate::util::Log2Table;

/// Distance context index: one past every real per-context slot once LZ77 is enabled, matching
/// `Reader::read_with_lz77`'s `*context_map.last().unwrap()` lookup.
fn distance_context(num_contexts: usize) -> u32 {
    num_contexts as u32
}

/// Runs the configured LZ77 pre-pass (if any) over every stream and returns the rewritten token
/// streams plus whether the pre-pass was kept, per the enable rule comparing estimated bit
/// savings against the pre-pass's own signaling overhead.
///
/// `dist_multipliers` gives each stream its own distance-symbol multiplier (typically the image
/// width of the component that stream belongs to), so streams sharing one model can still
/// disagree on how raw match distances map to distance symbols. Must have one entry per `tokens`
/// stream.
fn run_lz77_prepass(
    params: &EncoderParams,
    num_contexts: usize,
    tokens: &[Vec<Token>],
    dist_multipliers: &[u32],
) -> (Vec<Vec<Token>>, Option<Lz77Params>) {
    if matches!(params.lz77_method, Lz77Method::Disabled) {
        return (tokens.to_vec(), None);
    }
    debug_assert_eq!(dist_multipliers.len(), tokens.len());

    let min_symbol = 224u32;
    let min_length = 3u32;
    let dist_ctx = distance_context(num_contexts);

    let total_symbols: usize = tokens.iter().map(|t| t.len()).sum();
    let mut rewritten = Vec::with_capacity(tokens.len());
    let mut total_bit_decrease = 0.0;
    for (stream, &dist_multiplier) in tokens.iter().zip(dist_multipliers) {
        let pass: Lz77Pass = match params.lz77_method {
            Lz77Method::Disabled => unreachable!(),
            Lz77Method::Rle => lz77::rle_pass(stream, min_length, dist_ctx, dist_multiplier),
            Lz77Method::Greedy => lz77::greedy_pass(stream, min_length, dist_ctx, dist_multiplier),
            Lz77Method::Optimal => lz77::optimal_pass(stream, min_length, dist_ctx, dist_multiplier),
        };
        total_bit_decrease += pass.bit_decrease;
        rewritten.push(pass.tokens);
    }

    if lz77::should_enable(total_bit_decrease, total_symbols) {
        let params = Lz77Params {
            enabled: true,
            min_symbol,
            min_length,
        };
        (rewritten, Some(params))
    } else {
        debug!("lz77 pre-pass rejected by enable rule, falling back to literal streams");
        (tokens.to_vec(), None)
    }
}

/// Picks the cheapest [`HybridUintConfig`] for `histogram`'s raw values, per
/// `EncoderParams::hybrid_uint_method`. `log_alpha_size` bounds both the
/// config's own `split_exponent` and every resulting token: a candidate whose token for any
/// value would reach `2^log_alpha_size` invalidates it for this cluster.
fn select_hybrid_uint_config(values: &[u32], method: HybridUintMethod, log_alpha_size: usize) -> HybridUintConfig {
    if matches!(method, HybridUintMethod::Default) {
        return HybridUintConfig::new(4, 2, 0);
    }
    let max_token = 1u32 << log_alpha_size;
    let mut best: Option<(u64, HybridUintConfig)> = None;
    for &(split, msb, lsb) in HYBRID_UINT_METHOD_CANDIDATES {
        if split as usize > log_alpha_size {
            continue;
        }
        let config = HybridUintConfig::new(split, msb, lsb);
        let mut cost = 0u64;
        for &v in values {
            match config.encode(v) {
                Ok((token, nbits, _)) if token < max_token => cost += nbits as u64,
                _ => {
                    cost = u64::MAX;
                    break;
                }
            }
        }
        if cost < best.as_ref().map_or(u64::MAX, |(c, _)| *c) {
            best = Some((cost, config));
        }
    }
    // Every candidate was invalidated by the alphabet bound (e.g. an empty cluster, or one
    // whose values all exceed what `log_alpha_size` can address): fall back to the smallest
    // binary split that still respects the bound.
    best.map(|(_, c)| c).unwrap_or_else(|| HybridUintConfig::new(0, 0, 0))
}

/// Tries every normalization shift (or a representative subset, per
/// `EncoderParams::histogram_strategy`) plus the flat alternative, keeping whichever is cheapest
/// under `log2_table`.
fn best_normalized_histogram(
    counts: &[u32],
    strategy: AnsHistogramStrategy,
    log_tab_size: u32,
    log2_table: &Log2Table,
) -> Result<NormalizedHistogram> {
    let shifts: &[u32] = match strategy {
        AnsHistogramStrategy::Precise => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
        AnsHistogramStrategy::Approximate => &[0, 4, 8, 12],
        AnsHistogramStrategy::Fast => &[log_tab_size.saturating_sub(1)],
    };

    let mut best: Option<(u64, NormalizedHistogram)> = None;
    for &shift in shifts {
        if shift > log_tab_size {
            continue;
        }
        let candidate = build_normalized(counts, shift, log_tab_size, log2_table)?;
        let cost = estimate_cost_bits(counts, &candidate, log2_table);
        if cost < best.as_ref().map_or(u64::MAX, |(c, _)| *c) {
            best = Some((cost, candidate));
        }
    }
    best.map(|(_, h)| h).ok_or(Error::RebalanceFailed)
}

fn estimate_cost_bits(counts: &[u32], normalized: &NormalizedHistogram, log2_table: &Log2Table) -> u64 {
    counts
        .iter()
        .enumerate()
        .map(|(s, &c)| {
            if c == 0 {
                0
            } else {
                let freq = normalized.counts.get(s).copied().unwrap_or(0).max(1);
                (c as f64 * log2_table.bits(freq)).ceil() as u64
            }
        })
        .sum()
}

/// Builds the entropy model for `tokens` (one `Vec<Token>` per context) and writes its header to
/// `writer`, returning the model plus the header bytes actually written.
///
/// `tokens` is mutated in place to the (possibly LZ77-rewritten) stream the returned model
/// expects `write_tokens` to be called with next.
#[instrument(skip(params, tokens, writer))]
pub fn build_and_encode_histograms(
    params: &EncoderParams,
    num_contexts: usize,
    tokens: &mut [Vec<Token>],
    writer: &mut BitWriter,
) -> Result<(EntropyEncodingData, Vec<u8>)> {
    // No per-stream distance-multiplier signal crosses this API boundary today (callers that need
    // image-width-aware special distances should go through `run_lz77_prepass` directly); default
    // every stream to the plain `distance - 1` mapping.
    let dist_multipliers = vec![0u32; tokens.len()];
    let (rewritten, lz77_params) = run_lz77_prepass(params, num_contexts, tokens, &dist_multipliers);
    let lz77 = lz77_params.unwrap_or(Lz77Params::DISABLED);
    lz77.write(writer)?;

    let total_contexts = if lz77.enabled { num_contexts + 1 } else { num_contexts };

    let lz77_length_uint = if lz77.enabled {
        let length_values: Vec<u32> = rewritten
            .iter()
            .flatten()
            .filter(|t| t.is_lz77_length)
            .map(|t| t.value)
            .collect();
        let config = select_hybrid_uint_config(&length_values, HybridUintMethod::Default, 8);
        config.write_config(8, writer)?;
        Some(config)
    } else {
        None
    };

    let mut raw_histograms: Vec<Histogram> = (0..total_contexts).map(|_| Histogram::new()).collect();
    for stream in &rewritten {
        for t in stream {
            raw_histograms[t.context as usize].add(t.value);
        }
    }

    #[cfg(feature = "fuzzer_friendly")]
    let (context_map, clusters) = if params.ans_fuzzer_friendly {
        let (context_map, flat) = crate::entropy_coding::histogram::flat_single_cluster(
            total_contexts,
            crate::entropy_coding::ans::ANS_MAX_ALPHABET_SIZE,
        );
        (context_map, vec![flat])
    } else if total_contexts > 1 {
        cluster_histograms(&raw_histograms, crate::entropy_coding::model::K_CLUSTERS_LIMIT)
    } else {
        (vec![0u8], raw_histograms.clone())
    };
    #[cfg(not(feature = "fuzzer_friendly"))]
    let (context_map, clusters) = if total_contexts > 1 {
        cluster_histograms(&raw_histograms, crate::entropy_coding::model::K_CLUSTERS_LIMIT)
    } else {
        (vec![0u8], raw_histograms.clone())
    };

    if total_contexts > 1 {
        crate::entropy_coding::context_map::write_context_map(writer, &context_map, clusters.len())?;
    }

    let use_prefix_code = params.force_huffman;
    writer.write(1, use_prefix_code as u64)?;

    let log_alpha_size = if use_prefix_code {
        crate::entropy_coding::huffman::PREFIX_MAX_BITS
    } else if params.streaming_mode {
        // Still consumes the 2-bit selector `EntropyEncodingData::decode` always reads in the
        // non-prefix-code path; streaming mode only fixes the field's *value* to 8, not its
        // presence on the wire.
        writer.write(2, 3)?;
        8
    } else {
        let max_alphabet = clusters.iter().map(Histogram::alphabet_size).max().unwrap_or(1).max(1);
        let bits = (32 - (max_alphabet as u32 - 1).leading_zeros()).clamp(5, 8) as usize;
        writer.write(2, (bits - 5) as u64)?;
        bits
    };

    // Per-cluster hybrid-uint config selection needs each cluster's raw (pre-tokenization)
    // values, not just its counts; recompute them context by context and fold into cluster order.
    let mut cluster_values: Vec<Vec<u32>> = vec![Vec::new(); clusters.len()];
    for stream in &rewritten {
        for t in stream {
            if t.is_lz77_length {
                continue;
            }
            let cluster = context_map[t.context as usize] as usize;
            cluster_values[cluster].push(t.value);
        }
    }

    let uint_configs: Vec<HybridUintConfig> = cluster_values
        .iter()
        .map(|values| select_hybrid_uint_config(values, params.hybrid_uint_method, log_alpha_size))
        .collect();
    for config in &uint_configs {
        config.write_config(log_alpha_size, writer)?;
    }

    // Each cluster's code serves both its literal tokens (split via its own hybrid-uint config)
    // and any LZ77 length tokens whose literal context maps to it (split via the shared
    // `lz77_length_uint` config instead) — both land in the same per-cluster alphabet, since one
    // entropy code reads both raw symbols back.
    let mut tokenized_histograms: Vec<Histogram> = uint_configs.iter().map(|_| Histogram::new()).collect();
    for stream in &rewritten {
        for t in stream {
            if t.is_lz77_length {
                let cluster = context_map[t.context as usize] as usize;
                let length_config = lz77_length_uint.as_ref().expect("lz77-length token implies lz77 enabled");
                let (hybrid_token, _, _) = length_config.encode(t.value)?;
                tokenized_histograms[cluster].add(lz77.min_symbol + hybrid_token);
            } else {
                let cluster = context_map[t.context as usize] as usize;
                let (token, _, _) = uint_configs[cluster].encode(t.value)?;
                tokenized_histograms[cluster].add(token);
            }
        }
    }

    // Only reachable behind the `fuzzer_friendly` feature: forces every ANS cluster's
    // histogram to the flat shape regardless of observed data, so a fuzzer corpus that never hits
    // some rare symbol still gets a model where that symbol is reachable and the distribution is
    // deterministic run to run.
    #[cfg(feature = "fuzzer_friendly")]
    let fuzzer_friendly_flat = params.ans_fuzzer_friendly;
    #[cfg(not(feature = "fuzzer_friendly"))]
    let fuzzer_friendly_flat = false;

    let codes = if use_prefix_code {
        let encode_table = EncodeHuffmanCodes::build(&tokenized_histograms);
        let alphabet_sizes: Vec<usize> = tokenized_histograms
            .iter()
            .map(|h| h.alphabet_size().max(1))
            .collect();
        encode_table.write(writer, &alphabet_sizes)?;
        Codes::Huffman(encode_table)
    } else {
        let log2_table = Log2Table::new(crate::entropy_coding::model::ANS_LOG_TAB_SIZE);
        let mut normalized = Vec::with_capacity(tokenized_histograms.len());
        for h in &tokenized_histograms {
            let counts = h.counts();
            let mut n = if fuzzer_friendly_flat {
                build_flat_normalized(1usize << log_alpha_size, crate::entropy_coding::model::ANS_LOG_TAB_SIZE)
            } else if let Some(alphabet_size) = is_uniform_raw(counts) {
                build_flat_normalized(alphabet_size, crate::entropy_coding::model::ANS_LOG_TAB_SIZE)
            } else {
                best_normalized_histogram(counts, params.histogram_strategy, crate::entropy_coding::model::ANS_LOG_TAB_SIZE, &log2_table)?
            };
            // `build_flat_normalized`/`best_normalized_histogram` size `counts` to the cluster's
            // own observed alphabet, but `decode_counts`/`AliasTable::build` on the read side always
            // work in the declared `2^log_alpha_size` alphabet (see `AnsCodes::decode`). Pad with
            // zero-frequency trailing symbols so both sides agree on `counts.len()`; hybrid-uint
            // token values never reach `2^log_alpha_size` (`select_hybrid_uint_config` bounds them),
            // so this never truncates a real count.
            n.counts.resize(1usize << log_alpha_size, 0);
            normalized.push(n);
        }
        let ans_codes = AnsCodes::from_histograms(normalized, log_alpha_size as u32);
        ans_codes.encode(writer)?;
        Codes::Ans(ans_codes)
    };

    // The rewritten streams (post-LZ77) are exactly what `write_tokens` must see next; copy them
    // back into the caller's slice so the encoder and decoder stay in lockstep.
    for (dst, src) in tokens.iter_mut().zip(rewritten) {
        *dst = src;
    }

    let header_bits = writer.total_bits_written();
    let model = EntropyEncodingData {
        lz77,
        lz77_length_uint,
        context_map: context_map.clone(),
        log_alpha_size,
        uint_configs,
        codes,
    };
    Ok((model, header_bits.to_le_bytes().to_vec()))
}

/// Writes `tokens` (one context's stream, already rewritten by the LZ77 pre-pass if enabled)
/// under `model`, using `context_map` to pick each token's cluster. `context_map`
/// is the *per-stream* slice the caller is writing for; `context_offset` lets multi-stream callers
/// (distinct images sharing one model) select the right context_map entries.
///
/// Returns the number of bits written.
#[instrument(skip(tokens, model, context_map, writer))]
pub fn write_tokens(
    tokens: &[Token],
    model: &EntropyEncodingData,
    context_map: &[u8],
    context_offset: usize,
    writer: &mut BitWriter,
) -> Result<usize> {
    let start = writer.total_bits_written();

    // `context_map`/`context_offset` (not `model.context_map`) is authoritative here: callers
    // writing several streams under one shared model pass the same model with a different
    // `context_offset` per stream, so cluster lookups must go through the caller-supplied map.
    // A length token's raw symbol is still read off its literal's own cluster code; only the
    // *meaning* of that symbol (a copy length, via `lz77_length_uint`) differs from a literal.
    let split = |t: &Token| -> Result<(usize, u32, u32, u32)> {
        let cluster = context_map[context_offset + t.context as usize] as usize;
        if t.is_lz77_length {
            let length_config = model.lz77_length_uint.as_ref().ok_or(Error::LZ77Disallowed)?;
            let (hybrid_token, nbits, bits) = length_config.encode(t.value)?;
            Ok((cluster, model.lz77.min_symbol + hybrid_token, nbits, bits))
        } else {
            let (token, nbits, bits) = model.uint_configs[cluster].encode(t.value)?;
            Ok((cluster, token, nbits, bits))
        }
    };

    match &model.codes {
        Codes::Huffman(huff) => {
            for t in tokens {
                let (cluster, token, nbits, bits) = split(t)?;
                huff.write_symbol(writer, cluster, token)?;
                writer.write(nbits as usize, bits as u64)?;
            }
        }
        Codes::Ans(codes) => {
            // ANS must be encoded in reverse token order: feed an `AnsWriter` from
            // the last token backward; it internally reverses its scratch buffer so the final
            // bitstream still reads forward.
            let mut ans_writer = AnsWriter::new();
            for t in tokens.iter().rev() {
                let (cluster, token, nbits, bits) = split(t)?;
                ans_writer.encode_symbol_in(codes, cluster, token, nbits, bits);
            }
            ans_writer.finish(writer)?;
        }
    }
    Ok(writer.total_bits_written() - start)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::bit_reader::BitReader;
    use crate::entropy_coding::model::{EntropyEncodingData, Reader};

    /// Runs a single-context stream (no LZ77) through the full encode/decode pipeline and
    /// returns the decoded values, for comparison against the original.
    fn roundtrip_single_context(params: &EncoderParams, values: &[u32]) -> Vec<u32> {
        let original: Vec<Token> = values.iter().map(|&v| Token::new(0, v)).collect();
        let mut streams = vec![original];
        let mut writer = BitWriter::new();
        let (model, _) = build_and_encode_histograms(params, 1, &mut streams, &mut writer).unwrap();
        let context_map = model.context_map.clone();
        write_tokens(&streams[0], &model, &context_map, 0, &mut writer).unwrap();
        let bytes = writer.finalize().unwrap();

        let mut br = BitReader::new(&bytes);
        let decoded_model = EntropyEncodingData::decode(1, &mut br, false).unwrap();
        let mut reader = Reader::new(&decoded_model, &mut br).unwrap();
        let decoded: Vec<u32> = streams[0].iter().map(|t| reader.read(&mut br, t.context as usize).unwrap()).collect();
        reader.check_final_state().unwrap();
        decoded
    }

    /// Like [`roundtrip_single_context`] but allows LZ77 and drives the decoder through
    /// [`Reader::read_with_lz77`], since a fired back-reference changes how many wire symbols
    /// correspond to `values.len()` decoded outputs.
    fn roundtrip_single_context_lz77(params: &EncoderParams, values: &[u32]) -> Vec<u32> {
        let original: Vec<Token> = values.iter().map(|&v| Token::new(0, v)).collect();
        let mut streams = vec![original];
        let mut writer = BitWriter::new();
        let (model, _) = build_and_encode_histograms(params, 1, &mut streams, &mut writer).unwrap();
        let context_map = model.context_map.clone();
        write_tokens(&streams[0], &model, &context_map, 0, &mut writer).unwrap();
        let bytes = writer.finalize().unwrap();

        let mut br = BitReader::new(&bytes);
        let decoded_model = EntropyEncodingData::decode(1, &mut br, true).unwrap();
        let mut reader = Reader::new(&decoded_model, &mut br).unwrap();
        let mut lz77 = crate::entropy_coding::lz77::Lz77Reader::new(&decoded_model.lz77, 0);
        let decoded: Vec<u32> = (0..values.len())
            .map(|_| reader.read_with_lz77(&mut br, 0, &mut lz77).unwrap())
            .collect();
        reader.check_final_state().unwrap();
        decoded
    }

    fn no_lz77_params() -> EncoderParams {
        EncoderParams {
            lz77_method: Lz77Method::Disabled,
            ..EncoderParams::default()
        }
    }

    /// Boundary scenario: 10 000 identical tokens, single cluster, minimal alphabet.
    #[test]
    fn single_symbol_stream_roundtrip() {
        let values = vec![7u32; 10_000];
        let decoded = roundtrip_single_context(&no_lz77_params(), &values);
        assert_eq!(decoded, values);
    }

    #[test]
    fn single_symbol_stream_roundtrip_prefix_code() {
        let values = vec![7u32; 10_000];
        let params = EncoderParams {
            force_huffman: true,
            ..no_lz77_params()
        };
        let decoded = roundtrip_single_context(&params, &values);
        assert_eq!(decoded, values);
    }

    /// Boundary scenario: period-2 alternating stream, LZ77 greedy enabled. RLE can't find a
    /// run of >= `min_length` (period 2 never repeats the same value 3 times running), but the
    /// pipeline must still round-trip exactly whichever pass (if any) fires.
    #[test]
    fn alternating_stream_roundtrip_with_lz77() {
        let values: Vec<u32> = (0..128).map(|i| i % 2).collect();
        let params = EncoderParams {
            lz77_method: Lz77Method::Greedy,
            ..EncoderParams::default()
        };
        let decoded = roundtrip_single_context_lz77(&params, &values);
        assert_eq!(decoded, values);
    }

    /// Boundary scenario: a long zero run under the optimal LZ77 parse.
    #[test]
    fn zero_run_roundtrip_with_optimal_lz77() {
        let values = vec![0u32; 1024];
        let params = EncoderParams {
            lz77_method: Lz77Method::Optimal,
            ..EncoderParams::default()
        };
        let decoded = roundtrip_single_context_lz77(&params, &values);
        assert_eq!(decoded, values);
    }

    /// Boundary scenario: uniform distribution over a power-of-two alphabet should round-trip
    /// regardless of whether the flat shortcut or the general rebalancing path is picked.
    #[test]
    fn uniform_distribution_roundtrip() {
        let values: Vec<u32> = (0..65_536u32).map(|i| i % 256).collect();
        let decoded = roundtrip_single_context(&no_lz77_params(), &values);
        assert_eq!(decoded, values);
    }

    /// Boundary scenario: one bin holding ~99% of the mass plus a long tail of rare symbols.
    #[test]
    fn pathological_near_geometric_roundtrip() {
        let mut values = Vec::new();
        for _ in 0..99_000u32 {
            values.push(0u32);
        }
        for i in 0..1_000u32 {
            values.push(1 + (i % 255));
        }
        let decoded = roundtrip_single_context(&no_lz77_params(), &values);
        assert_eq!(decoded, values);
    }

    /// LZ77 disabled: the rewritten token stream must be byte-identical (same contexts and
    /// values, in order) to the input.
    #[test]
    fn lz77_disabled_leaves_tokens_unchanged() {
        let original: Vec<Token> = (0..256u32).map(|v| Token::new(0, v % 7)).collect();
        let mut streams = vec![original.clone()];
        let mut writer = BitWriter::new();
        build_and_encode_histograms(&no_lz77_params(), 1, &mut streams, &mut writer).unwrap();
        assert_eq!(streams[0], original);
    }

    /// Multiple contexts exercise clustering, per-cluster hybrid-uint selection, and the ANS
    /// path together. Each stream's `write_tokens` call flushes a self-contained rANS block (own
    /// initial state), so decoding re-inits a fresh [`Reader`] per stream rather than reusing one
    /// continuously across stream boundaries.
    #[test]
    fn multi_context_clustering_roundtrip_ans() {
        let num_contexts = 40;
        let mut streams: Vec<Vec<Token>> = (0..num_contexts)
            .map(|ctx| {
                (0..500u32)
                    .map(|i| Token::new(ctx as u32, (i * (ctx as u32 + 1)) % (20 + ctx as u32)))
                    .collect()
            })
            .collect();
        let mut writer = BitWriter::new();
        let params = no_lz77_params();
        let (model, _) = build_and_encode_histograms(&params, num_contexts, &mut streams, &mut writer).unwrap();
        let context_map = model.context_map.clone();

        for stream in &streams {
            let mut stream_writer = BitWriter::new();
            write_tokens(stream, &model, &context_map, 0, &mut stream_writer).unwrap();
            let bytes = stream_writer.finalize().unwrap();
            let mut br = BitReader::new(&bytes);
            let mut reader = Reader::new(&model, &mut br).unwrap();
            for t in stream {
                assert_eq!(reader.read(&mut br, t.context as usize).unwrap(), t.value);
            }
            reader.check_final_state().unwrap();
        }
    }

    /// Same as the ANS case above but forcing the canonical-prefix path, which has no
    /// cross-call state and so can share one [`Reader`] across all streams' concatenated bits.
    #[test]
    fn multi_context_clustering_roundtrip_prefix() {
        let num_contexts = 12;
        let streams: Vec<Vec<Token>> = (0..num_contexts)
            .map(|ctx| (0..300u32).map(|i| Token::new(ctx as u32, (i + ctx as u32) % 37)).collect())
            .collect();
        let mut tokens = streams.clone();
        let mut writer = BitWriter::new();
        let params = EncoderParams {
            force_huffman: true,
            ..no_lz77_params()
        };
        let (model, _) = build_and_encode_histograms(&params, num_contexts, &mut tokens, &mut writer).unwrap();
        let context_map = model.context_map.clone();

        let mut token_writer = BitWriter::new();
        for stream in &tokens {
            write_tokens(stream, &model, &context_map, 0, &mut token_writer).unwrap();
        }
        let bytes = token_writer.finalize().unwrap();
        let mut br = BitReader::new(&bytes);
        let mut reader = Reader::new(&model, &mut br).unwrap();
        for stream in &tokens {
            for t in stream {
                assert_eq!(reader.read(&mut br, t.context as usize).unwrap(), t.value);
            }
        }
        reader.check_final_state().unwrap();
    }

    /// Two streams sharing the same underlying matches but disagreeing on `distance_multiplier`
    /// must encode at least one raw distance as a different wire symbol, per
    /// [`run_lz77_prepass`]'s `dist_multipliers` contract.
    #[test]
    fn distance_multiplier_differs_per_stream() {
        let tokens: Vec<Token> = (0..40u32).map(|v| Token::new(0, v % 5)).collect();
        let streams = vec![tokens.clone(), tokens];
        let params = EncoderParams {
            lz77_method: Lz77Method::Greedy,
            ..EncoderParams::default()
        };
        let (rewritten_a, _) = run_lz77_prepass(&params, 1, &streams[..1], &[0]);
        let (rewritten_b, _) = run_lz77_prepass(&params, 1, &streams[1..], &[8]);

        let dist_a: Vec<u32> = rewritten_a[0].iter().filter(|t| t.context == 1).map(|t| t.value).collect();
        let dist_b: Vec<u32> = rewritten_b[0].iter().filter(|t| t.context == 1).map(|t| t.value).collect();
        assert!(!dist_a.is_empty(), "greedy LZ77 should find a match in a short repeating period");
        assert_ne!(dist_a, dist_b);
    }
}
