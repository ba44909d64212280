// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Shared wire-format primitives and the configuration surface for the entropy coder
//!.

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::entropy_coding::ans::AnsCodes;
use crate::entropy_coding::huffman::HuffmanCodes;
use crate::entropy_coding::hybrid_uint::HybridUintConfig;
use crate::error::{Error, Result};

/// Number of bits in the ANS probability table; shared with `ans.rs`.
pub const ANS_LOG_TAB_SIZE: u32 = crate::entropy_coding::ans::ANS_LOG_TAB_SIZE;
pub const PREFIX_MAX_ALPHABET_SIZE: usize = 4096;
pub const K_CLUSTERS_LIMIT: usize = 64;
pub const K_WINDOW_SIZE: usize = 1 << 20;

/// A self-delimiting unsigned integer: one flag bit, a 5-bit bit-count, then that many raw
/// bits. `decode_varint16` in the reference decoder is the same scheme restricted to a 4-bit
/// count; widened here to cover the larger alphabet/run-length fields this crate also needs.
pub fn read_varint(br: &mut BitReader) -> Result<u32> {
    if br.read(1)? != 0 {
        let nbits = br.read(5)? as usize;
        if nbits == 0 {
            Ok(1)
        } else {
            Ok((1u32 << nbits) + br.read(nbits)? as u32)
        }
    } else {
        Ok(0)
    }
}

pub fn write_varint(bw: &mut BitWriter, value: u32) -> Result<()> {
    if value == 0 {
        return bw.write(1, 0);
    }
    bw.write(1, 1)?;
    let nbits = crate::util::floor_log2(value);
    bw.write(5, nbits as u64)?;
    if nbits > 0 {
        let rest = value - (1 << nbits);
        bw.write(nbits as usize, rest as u64)?;
    }
    Ok(())
}

/// The same scheme as [`read_varint`]/[`write_varint`] but matching the reference decoder's
/// `decode_varint16` exactly (4-bit count, used for the LZ77 parameter fields).
pub fn read_varint16(br: &mut BitReader) -> Result<u16> {
    if br.read(1)? != 0 {
        let nbits = br.read(4)? as usize;
        if nbits == 0 {
            Ok(1)
        } else {
            Ok((1 << nbits) + br.read(nbits)? as u16)
        }
    } else {
        Ok(0)
    }
}

pub fn write_varint16(bw: &mut BitWriter, value: u16) -> Result<()> {
    if value == 0 {
        return bw.write(1, 0);
    }
    bw.write(1, 1)?;
    let nbits = crate::util::floor_log2(value as u32);
    bw.write(4, nbits as u64)?;
    if nbits > 0 {
        let rest = value as u32 - (1 << nbits);
        bw.write(nbits as usize, rest as u64)?;
    }
    Ok(())
}

/// Strategy used when choosing the ANS normalization shift per cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsHistogramStrategy {
    /// Try every shift plus the flat alternative, keep whichever is cheapest.
    Precise,
    /// Try a handful of representative shifts.
    Approximate,
    /// Use a single fixed shift; cheapest to compute, weakest compression.
    Fast,
}

/// LZ77 back-reference search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lz77Method {
    Disabled,
    Rle,
    Greedy,
    Optimal,
}

/// How a per-cluster [`HybridUintConfig`] is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HybridUintMethod {
    /// Brute-force every candidate in `HYBRID_UINT_METHOD_CANDIDATES`, keep the cheapest.
    Best,
    /// Always use the general-purpose default (split=4, msb=2, lsb=0).
    Default,
}

/// How histograms are clustered across contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringType {
    /// Run the greedy entropy-merge clustering pass.
    Greedy,
    /// Skip clustering: one histogram per context.
    None,
}

/// Encoder-wide configuration.
#[derive(Debug, Clone)]
pub struct EncoderParams {
    pub histogram_strategy: AnsHistogramStrategy,
    pub lz77_method: Lz77Method,
    pub hybrid_uint_method: HybridUintMethod,
    pub clustering: ClusteringType,
    /// Forces prefix (canonical Huffman) coding instead of ANS.
    pub force_huffman: bool,
    /// Forces `log_alpha_size = 8` for every hybrid-uint config: the streaming decoder cannot
    /// yet cope with a dynamically sized alphabet.
    pub streaming_mode: bool,
    pub initialize_global_state: bool,
    pub add_missing_symbols: bool,
    pub add_fixed_histograms: bool,
    /// Forces a single flat cluster over a power-of-two alphabet, for fuzzers that need every
    /// symbol reachable regardless of the input corpus. Unlike the reference
    /// implementation's mutable process-wide global, this is an ordinary struct field reachable
    /// only when this crate is compiled with the `fuzzer_friendly` feature, so it can never leak
    /// into a release build of a dependent.
    #[cfg(feature = "fuzzer_friendly")]
    pub ans_fuzzer_friendly: bool,
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            histogram_strategy: AnsHistogramStrategy::Precise,
            lz77_method: Lz77Method::Greedy,
            hybrid_uint_method: HybridUintMethod::Best,
            clustering: ClusteringType::Greedy,
            force_huffman: false,
            streaming_mode: false,
            initialize_global_state: true,
            add_missing_symbols: false,
            add_fixed_histograms: false,
            #[cfg(feature = "fuzzer_friendly")]
            ans_fuzzer_friendly: false,
        }
    }
}

/// LZ77 back-reference parameters, written once per histogram set.
#[derive(Debug, Clone, Copy)]
pub struct Lz77Params {
    pub enabled: bool,
    pub min_symbol: u32,
    pub min_length: u32,
}

impl Lz77Params {
    pub const DISABLED: Self = Self {
        enabled: false,
        min_symbol: 0,
        min_length: 0,
    };

    /// `min_symbol`'s selector, mirroring the reference header's
    /// `u2S(224, 512, 4096, Bits(15) + 8)`.
    fn read_min_symbol(br: &mut BitReader) -> Result<u32> {
        match br.read(2)? {
            0 => Ok(224),
            1 => Ok(512),
            2 => Ok(4096),
            _ => Ok(br.read(15)? as u32 + 8),
        }
    }

    fn write_min_symbol(bw: &mut BitWriter, value: u32) -> Result<()> {
        match value {
            224 => bw.write(2, 0),
            512 => bw.write(2, 1),
            4096 => bw.write(2, 2),
            v => {
                bw.write(2, 3)?;
                bw.write(15, (v - 8) as u64)
            }
        }
    }

    /// `min_length`'s selector: `u2S(3, 4, Bits(2) + 5, Bits(8) + 9)`. The two computed branches
    /// produce disjoint ranges (5..=8 and 9..=264), so encoding is unambiguous.
    fn read_min_length(br: &mut BitReader) -> Result<u32> {
        match br.read(2)? {
            0 => Ok(3),
            1 => Ok(4),
            2 => Ok(br.read(2)? as u32 + 5),
            _ => Ok(br.read(8)? as u32 + 9),
        }
    }

    fn write_min_length(bw: &mut BitWriter, value: u32) -> Result<()> {
        match value {
            3 => bw.write(2, 0),
            4 => bw.write(2, 1),
            5..=8 => {
                bw.write(2, 2)?;
                bw.write(2, (value - 5) as u64)
            }
            v => {
                bw.write(2, 3)?;
                bw.write(8, (v - 9) as u64)
            }
        }
    }

    pub fn read(br: &mut BitReader) -> Result<Self> {
        let enabled = br.read(1)? != 0;
        if !enabled {
            return Ok(Self::DISABLED);
        }
        let min_symbol = Self::read_min_symbol(br)?;
        let min_length = Self::read_min_length(br)?;
        Ok(Self {
            enabled,
            min_symbol,
            min_length,
        })
    }

    pub fn write(&self, bw: &mut BitWriter) -> Result<()> {
        bw.write(1, self.enabled as u64)?;
        if !self.enabled {
            return Ok(());
        }
        Self::write_min_symbol(bw, self.min_symbol)?;
        Self::write_min_length(bw, self.min_length)?;
        Ok(())
    }
}

/// The decoded entropy model for one `Histograms` block: per-cluster hybrid-uint configs plus
/// either a canonical prefix code or an ANS table per cluster.
#[derive(Debug)]
pub struct EntropyEncodingData {
    pub lz77: Lz77Params,
    pub lz77_length_uint: Option<HybridUintConfig>,
    pub context_map: Vec<u8>,
    pub log_alpha_size: usize,
    pub uint_configs: Vec<HybridUintConfig>,
    pub codes: Codes,
}

#[derive(Debug)]
pub enum Codes {
    Huffman(HuffmanCodes),
    Ans(AnsCodes),
}

impl EntropyEncodingData {
    /// Reads one model header back off the bitstream, the mirror of
    /// [`crate::entropy_coding::encode::build_and_encode_histograms`]'s header writer.
    /// `num_contexts` excludes the reserved LZ77 distance context, which this adds
    /// automatically when `lz77.enabled`.
    pub fn decode(num_contexts: usize, br: &mut BitReader, allow_lz77: bool) -> Result<Self> {
        let lz77 = Lz77Params::read(br)?;
        if !allow_lz77 && lz77.enabled {
            return Err(Error::LZ77Disallowed);
        }
        let (num_contexts, lz77_length_uint) = if lz77.enabled {
            (num_contexts + 1, Some(HybridUintConfig::decode(8, br)?))
        } else {
            (num_contexts, None)
        };

        let context_map = if num_contexts > 1 {
            crate::entropy_coding::context_map::read_context_map(br, num_contexts)?
        } else {
            vec![0u8]
        };
        if context_map.len() != num_contexts {
            return Err(Error::InvalidContextMap(context_map.len() as u32, num_contexts as u32));
        }

        let use_prefix_code = br.read(1)? != 0;
        let log_alpha_size = if use_prefix_code {
            crate::entropy_coding::huffman::PREFIX_MAX_BITS
        } else {
            br.read(2)? as usize + 5
        };
        let num_histograms = *context_map.iter().max().unwrap() as usize + 1;
        if num_histograms > K_CLUSTERS_LIMIT {
            return Err(Error::TooManyClusters(num_histograms, K_CLUSTERS_LIMIT));
        }
        let uint_configs = (0..num_histograms)
            .map(|_| HybridUintConfig::decode(log_alpha_size, br))
            .collect::<Result<_>>()?;

        let codes = if use_prefix_code {
            Codes::Huffman(HuffmanCodes::decode(num_histograms, br)?)
        } else {
            Codes::Ans(AnsCodes::decode(num_histograms, log_alpha_size, br)?)
        };

        Ok(Self {
            lz77,
            lz77_length_uint,
            context_map,
            log_alpha_size,
            uint_configs,
            codes,
        })
    }
}

/// Forward (decode-order) reader over one token stream built under a given model, the mirror of
/// `WriteTokens`.
#[derive(Debug)]
pub struct Reader<'a> {
    model: &'a EntropyEncodingData,
    ans_reader: crate::entropy_coding::ans::AnsReader,
}

impl<'a> Reader<'a> {
    pub fn new(model: &'a EntropyEncodingData, br: &mut BitReader) -> Result<Self> {
        use crate::entropy_coding::ans::AnsReader;
        let ans_reader = match &model.codes {
            Codes::Ans(_) => AnsReader::init(br)?,
            Codes::Huffman(_) => AnsReader::new_unused(),
        };
        Ok(Self { model, ans_reader })
    }

    fn read_raw_token(&mut self, br: &mut BitReader, cluster: usize) -> Result<u32> {
        match &self.model.codes {
            Codes::Huffman(h) => h.read(br, cluster),
            Codes::Ans(a) => self.ans_reader.read(a, br, cluster),
        }
    }

    /// Reads one value under `context`. Panics (via `assert!`) if the model has LZ77 enabled;
    /// use [`Self::read_with_lz77`] in that case.
    pub fn read(&mut self, br: &mut BitReader, context: usize) -> Result<u32> {
        assert!(!self.model.lz77.enabled);
        let cluster = self.model.context_map[context] as usize;
        let raw_token = self.read_raw_token(br, cluster)?;
        self.model.uint_configs[cluster].read(raw_token, br)
    }

    /// Reads one value under `context`, routing through `lz77`'s window when the model has LZ77
    /// enabled.
    pub fn read_with_lz77(
        &mut self,
        br: &mut BitReader,
        context: usize,
        lz77: &mut crate::entropy_coding::lz77::Lz77Reader,
    ) -> Result<u32> {
        if let Some(v) = lz77.pull() {
            lz77.push(v);
            return Ok(v);
        }
        let cluster = self.model.context_map[context] as usize;
        let raw_token = self.read_raw_token(br, cluster)?;
        match lz77.classify(raw_token) {
            None => {
                let v = self.model.uint_configs[cluster].read(raw_token, br)?;
                lz77.push(v);
                Ok(v)
            }
            Some(lz77_token) => {
                let length_config = self
                    .model
                    .lz77_length_uint
                    .as_ref()
                    .expect("lz77.enabled implies lz77_length_uint is Some");
                let num_to_copy = length_config.read(lz77_token, br)?;
                let dist_cluster = *self.model.context_map.last().unwrap() as usize;
                let dist_raw = self.read_raw_token(br, dist_cluster)?;
                let distance_sym = self.model.uint_configs[dist_cluster].read(dist_raw, br)?;
                lz77.begin_copy(num_to_copy + lz77.min_length, distance_sym)?;
                let v = lz77.pull().expect("begin_copy just set a positive count");
                lz77.push(v);
                Ok(v)
            }
        }
    }

    pub fn check_final_state(self) -> Result<()> {
        match &self.model.codes {
            Codes::Huffman(_) => Ok(()),
            Codes::Ans(_) => self.ans_reader.check_final_state(),
        }
    }
}
