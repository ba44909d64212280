// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Context map serialization: the per-context cluster-id sequence, optionally
//! move-to-front transformed, entropy-coded recursively through the same top-level model this
//! crate builds for ordinary token streams.

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::entropy_coding::encode::{build_and_encode_histograms, write_tokens};
use crate::entropy_coding::model::{EncoderParams, Lz77Method, Reader};
use crate::entropy_coding::token::Token;
use crate::error::{Error, Result};

/// Move-to-front encodes `values` in place, returning the MTF ranks. Recovering the original
/// sequence (`mtf_decode`) runs the same table update in reverse.
fn mtf_encode(values: &[u8]) -> Vec<u8> {
    let mut table: Vec<u8> = (0..=255).collect();
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        let pos = table.iter().position(|&t| t == v).expect("table holds every byte value");
        out.push(pos as u8);
        table.remove(pos);
        table.insert(0, v);
    }
    out
}

fn mtf_decode(ranks: &[u8]) -> Vec<u8> {
    let mut table: Vec<u8> = (0..=255).collect();
    let mut out = Vec::with_capacity(ranks.len());
    for &r in ranks {
        let v = table.remove(r as usize);
        out.push(v);
        table.insert(0, v);
    }
    out
}

/// Writes `context_map` (one cluster id per context, `context_map.len() == num_contexts`) as a
/// single bit for "use MTF", followed by the (possibly MTF-transformed) id sequence entropy-coded
/// under a synthetic single-context model. `num_clusters` is the number of
/// distinct cluster ids actually present; the recursive call always disables LZ77 since the
/// id alphabet is tiny and position-local back-references provide no benefit.
pub fn write_context_map(bw: &mut BitWriter, context_map: &[u8], num_clusters: usize) -> Result<()> {
    if num_clusters <= 1 {
        // A single cluster needs no context map at all; `EntropyEncodingData::decode` always
        // synthesizes `vec![0u8; num_contexts]` in this case and never calls this reader path.
        return Ok(());
    }

    let use_mtf = num_clusters > 2;
    bw.write(1, use_mtf as u64)?;
    let sequence: Vec<u8> = if use_mtf {
        mtf_encode(context_map)
    } else {
        context_map.to_vec()
    };

    let mut tokens = vec![sequence.iter().map(|&v| Token::new(0, v as u32)).collect::<Vec<_>>()];
    let params = EncoderParams {
        streaming_mode: true,
        lz77_method: Lz77Method::Disabled,
        ..EncoderParams::default()
    };
    let (model, encoded_header) = build_and_encode_histograms(&params, 1, &mut tokens, bw)?;
    let _ = encoded_header;
    write_tokens(&tokens[0], &model, &[0u8], 0, bw)?;
    Ok(())
}

/// Reads back a context map written by [`write_context_map`] for `num_contexts` contexts. The
/// `num_contexts <= 1` short circuit matching the writer's is handled by the caller
/// (`EntropyEncodingData::decode`), which never invokes this for a single context.
pub fn read_context_map(br: &mut BitReader, num_contexts: usize) -> Result<Vec<u8>> {
    let use_mtf = br.read(1)? != 0;

    let model = crate::entropy_coding::model::EntropyEncodingData::decode(1, br, false)?;
    let mut reader = Reader::new(&model, br)?;
    let mut sequence = Vec::with_capacity(num_contexts);
    for _ in 0..num_contexts {
        let v = reader.read(br, 0)?;
        if v > 255 {
            return Err(Error::InvalidContextMap(v, 255));
        }
        sequence.push(v as u8);
    }
    reader.check_final_state()?;

    let context_map = if use_mtf {
        mtf_decode(&sequence)
    } else {
        sequence
    };
    Ok(context_map)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn mtf_roundtrip() {
        let values = vec![3u8, 3, 1, 2, 3, 0, 0, 5];
        let ranks = mtf_encode(&values);
        assert_eq!(mtf_decode(&ranks), values);
    }

    #[test]
    fn mtf_repeated_symbol_is_always_rank_zero() {
        let values = vec![7u8, 7, 7, 7];
        let ranks = mtf_encode(&values);
        assert_eq!(ranks, vec![7, 0, 0, 0]);
    }

    #[test]
    fn context_map_roundtrip_many_clusters() {
        let context_map: Vec<u8> = (0..40u8).map(|i| i % 9).collect();
        let mut bw = BitWriter::new();
        write_context_map(&mut bw, &context_map, 9).unwrap();
        let bytes = bw.finalize().unwrap();
        let mut br = BitReader::new(&bytes);
        let decoded = read_context_map(&mut br, context_map.len()).unwrap();
        assert_eq!(decoded, context_map);
    }

    #[test]
    fn context_map_roundtrip_two_clusters_skips_mtf() {
        let context_map = vec![0u8, 1, 0, 1, 1, 0];
        let mut bw = BitWriter::new();
        write_context_map(&mut bw, &context_map, 2).unwrap();
        let bytes = bw.finalize().unwrap();
        let mut br = BitReader::new(&bytes);
        let decoded = read_context_map(&mut br, context_map.len()).unwrap();
        assert_eq!(decoded, context_map);
    }
}
