// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Seeded pseudo-random end-to-end round trips through the full encode/decode pipeline:
//! [`build_and_encode_histograms`] + [`write_tokens`] on the write side, [`EntropyEncodingData::decode`]
//! + [`Reader`] on the read side. Unlike the colocated unit tests, these exercise many contexts,
//! large streams, and every [`Lz77Method`] against the same seeded data so the pipeline is tested
//! as a whole rather than component by component.

use rand::Rng;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use test_log::test;

use jxl_entropy_coding::bit_reader::BitReader;
use jxl_entropy_coding::bit_writer::BitWriter;
use jxl_entropy_coding::entropy_coding::model::{EncoderParams, EntropyEncodingData, Lz77Method, Reader};
use jxl_entropy_coding::entropy_coding::encode::{build_and_encode_histograms, write_tokens};
use jxl_entropy_coding::entropy_coding::token::Token;

fn rng_from_seed(seed: u64) -> XorShiftRng {
    XorShiftRng::seed_from_u64(seed)
}

/// Builds `num_contexts` streams of `len` tokens each, values drawn from a skewed range so
/// clustering and ANS rebalancing both have real work to do.
fn random_streams(rng: &mut XorShiftRng, num_contexts: usize, len: usize, alphabet: u32) -> Vec<Vec<Token>> {
    (0..num_contexts)
        .map(|ctx| {
            (0..len)
                .map(|_| {
                    // Bias towards small values (geometric-ish) so the hybrid-uint split and
                    // ANS/Huffman cost models both see a realistic skew.
                    let mut v = 0u32;
                    while v + 1 < alphabet && rng.random_bool(0.6) {
                        v += 1;
                    }
                    Token::new(ctx as u32, v)
                })
                .collect()
        })
        .collect()
}

fn roundtrip(params: &EncoderParams, mut streams: Vec<Vec<Token>>, allow_lz77: bool) {
    let num_contexts = streams.len();
    // `build_and_encode_histograms` rewrites `streams` in place whenever the LZ77 pre-pass fires
    // (literal runs replaced by length/distance pairs); keep the original per-context value
    // sequences so the decode side has something to compare against regardless of which path
    // was taken.
    let original_values: Vec<Vec<u32>> = streams.iter().map(|s| s.iter().map(|t| t.value).collect()).collect();
    let original_contexts: Vec<u32> = streams.iter().map(|s| s.first().map_or(0, |t| t.context)).collect();

    let mut writer = BitWriter::new();
    let (model, _) = build_and_encode_histograms(params, num_contexts, &mut streams, &mut writer)
        .expect("header build must succeed");
    let context_map = model.context_map.clone();

    for (stream_idx, stream) in streams.iter().enumerate() {
        let mut stream_writer = BitWriter::new();
        write_tokens(stream, &model, &context_map, 0, &mut stream_writer).expect("token write must succeed");
        let bytes = stream_writer.finalize().expect("finalize must succeed");

        let mut br = BitReader::new(&bytes);
        let decoded_model = EntropyEncodingData::decode(num_contexts, &mut br, allow_lz77)
            .expect("redundant self-decode of the just-written header must succeed");
        let mut reader = Reader::new(&decoded_model, &mut br).expect("reader init must succeed");
        let context = original_contexts[stream_idx] as usize;
        let expected = &original_values[stream_idx];

        if decoded_model.lz77.enabled {
            let mut lz77 = jxl_entropy_coding::entropy_coding::lz77::Lz77Reader::new(&decoded_model.lz77, 0);
            for &want in expected {
                let got = reader
                    .read_with_lz77(&mut br, context, &mut lz77)
                    .expect("lz77 read must succeed");
                assert_eq!(got, want);
            }
        } else {
            for &want in expected {
                let got = reader.read(&mut br, context).expect("read must succeed");
                assert_eq!(got, want);
            }
        }
        reader.check_final_state().expect("final state check must succeed");
    }
}

#[test]
fn seeded_many_contexts_ans_roundtrip() {
    let mut rng = rng_from_seed(0xC0FF_EE01);
    let params = EncoderParams {
        lz77_method: Lz77Method::Disabled,
        ..EncoderParams::default()
    };
    let streams = random_streams(&mut rng, 64, 2_000, 64);
    roundtrip(&params, streams, false);
}

#[test]
fn seeded_many_contexts_prefix_roundtrip() {
    let mut rng = rng_from_seed(0xC0FF_EE02);
    let params = EncoderParams {
        lz77_method: Lz77Method::Disabled,
        force_huffman: true,
        ..EncoderParams::default()
    };
    let streams = random_streams(&mut rng, 20, 1_000, 40);
    roundtrip(&params, streams, false);
}

#[test]
fn seeded_greedy_lz77_roundtrip() {
    let mut rng = rng_from_seed(0xC0FF_EE03);
    let params = EncoderParams {
        lz77_method: Lz77Method::Greedy,
        ..EncoderParams::default()
    };
    // A small alphabet over a long stream gives the hash chain plenty of repeats to find.
    let streams = random_streams(&mut rng, 4, 5_000, 6);
    roundtrip(&params, streams, true);
}

#[test]
fn seeded_optimal_lz77_roundtrip() {
    let mut rng = rng_from_seed(0xC0FF_EE04);
    let params = EncoderParams {
        lz77_method: Lz77Method::Optimal,
        ..EncoderParams::default()
    };
    let streams = random_streams(&mut rng, 2, 3_000, 4);
    roundtrip(&params, streams, true);
}

#[test]
fn seeded_single_context_wide_alphabet_roundtrip() {
    let mut rng = rng_from_seed(0xC0FF_EE05);
    let params = EncoderParams::default();
    let streams = random_streams(&mut rng, 1, 10_000, 4096);
    roundtrip(&params, streams, params.lz77_method != Lz77Method::Disabled);
}

/// Repeats the ANS path across several independent seeds to spot-check that rebalancing and the
/// alias table construction hold up across a spread of random distributions, not just one.
#[test]
fn seeded_ans_roundtrip_multiple_seeds() {
    let params = EncoderParams {
        lz77_method: Lz77Method::Disabled,
        ..EncoderParams::default()
    };
    for seed in 0..8u64 {
        let mut rng = rng_from_seed(0xA5A5_0000 + seed);
        let streams = random_streams(&mut rng, 8, 800, 32);
        roundtrip(&params, streams, false);
    }
}
