// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::error::{Error, Result};
use crate::util::{CeilLog2, floor_log2};

/// Splits a non-negative integer into a small "token" symbol plus raw extra
/// bits. `0 <= msb_in_token + lsb_in_token <= split_exponent
/// <= log_alpha_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HybridUintConfig {
    split_exponent: u32,
    msb_in_token: u32,
    lsb_in_token: u32,
}

impl HybridUintConfig {
    pub fn new(split_exponent: u32, msb_in_token: u32, lsb_in_token: u32) -> Self {
        debug_assert!(msb_in_token + lsb_in_token <= split_exponent);
        Self {
            split_exponent,
            msb_in_token,
            lsb_in_token,
        }
    }

    pub fn split_exponent(&self) -> u32 {
        self.split_exponent
    }
    pub fn msb_in_token(&self) -> u32 {
        self.msb_in_token
    }
    pub fn lsb_in_token(&self) -> u32 {
        self.lsb_in_token
    }
    fn split_token(&self) -> u32 {
        1u32 << self.split_exponent
    }

    /// Splits `value` into `(token, nbits, bits)`: a symbol to entropy-code plus `nbits` raw
    /// bits to emit verbatim. Pure inverse of [`Self::read`].
    pub fn encode(&self, value: u32) -> Result<(u32, u32, u32)> {
        let split_token = self.split_token();
        if value < split_token {
            return Ok((value, 0, 0));
        }
        let n = floor_log2(value);
        let m = self.msb_in_token;
        let l = self.lsb_in_token;
        if n < self.split_exponent || n - m - l > 31 {
            return Err(Error::ValueTooLarge);
        }
        let top_m_bits = (value >> (n - m)) & ((1 << m) - 1);
        let nbits = n - m - l;
        let token = split_token
            + ((n - self.split_exponent) << (m + l))
            + (top_m_bits << l)
            + (value & ((1 << l) - 1));
        let bits = (value >> l) & ((1u32 << nbits) - 1);
        Ok((token, nbits, bits))
    }

    /// Reconstructs the original value given the decoded token `symbol` and a bit source. Kept
    /// bit-for-bit identical to the reference decoder.
    pub fn read(&self, symbol: u32, br: &mut BitReader) -> Result<u32> {
        if symbol < self.split_token() {
            return Ok(symbol);
        }
        let bits_in_token = self.lsb_in_token + self.msb_in_token;
        let nbits = self.split_exponent - bits_in_token
            + ((symbol - self.split_token()) >> bits_in_token);
        // To match the behaviour of libjxl, we limit nbits to 31.
        if nbits > 31 {
            return Err(Error::IntegerTooLarge(nbits));
        }
        let low = symbol & ((1 << self.lsb_in_token) - 1);
        let symbol_nolow = symbol >> self.lsb_in_token;
        let bits = br.read(nbits as usize)? as u32;
        let hi = (symbol_nolow & ((1 << self.msb_in_token) - 1)) | (1 << self.msb_in_token);
        Ok((((hi << nbits) | bits) << self.lsb_in_token) | low)
    }

    /// Number of raw bits [`Self::encode`] would emit for `value`, without computing the token.
    pub fn nbits(&self, value: u32) -> u32 {
        let split_token = self.split_token();
        if value < split_token {
            0
        } else {
            floor_log2(value) - self.msb_in_token - self.lsb_in_token
        }
    }

    /// Writes this config's header, matching [`Self::decode`]'s layout.
    pub fn write_config(&self, log_alpha_size: usize, bw: &mut BitWriter) -> Result<()> {
        bw.write(
            (log_alpha_size as u32 + 1).ceil_log2(),
            self.split_exponent as u64,
        )?;
        if self.split_exponent != log_alpha_size as u32 {
            let nbits = (self.split_exponent + 1).ceil_log2();
            bw.write(nbits, self.msb_in_token as u64)?;
            let nbits = (self.split_exponent - self.msb_in_token + 1).ceil_log2();
            bw.write(nbits, self.lsb_in_token as u64)?;
        }
        Ok(())
    }

    pub fn decode(log_alpha_size: usize, br: &mut BitReader) -> Result<HybridUintConfig> {
        let split_exponent = br.read((log_alpha_size + 1).ceil_log2() as usize)? as u32;
        let msb_in_token;
        let lsb_in_token;
        if split_exponent != log_alpha_size as u32 {
            let nbits = (split_exponent + 1).ceil_log2() as usize;
            msb_in_token = br.read(nbits)? as u32;
            if msb_in_token > split_exponent {
                return Err(Error::InvalidUintConfig(split_exponent, msb_in_token, None));
            }
            let nbits = (split_exponent - msb_in_token + 1).ceil_log2() as usize;
            lsb_in_token = br.read(nbits)? as u32;
        } else {
            msb_in_token = 0;
            lsb_in_token = 0;
        }
        if lsb_in_token + msb_in_token > split_exponent {
            return Err(Error::InvalidUintConfig(
                split_exponent,
                msb_in_token,
                Some(lsb_in_token),
            ));
        }
        Ok(HybridUintConfig {
            split_exponent,
            msb_in_token,
            lsb_in_token,
        })
    }
}

/// Fixed catalogue of `(split, msb, lsb)` triples tried by per-cluster config selection
///. Mirrors the small set of shapes libjxl's encoder brute-forces: binary
/// (all raw bits), the default general-purpose split, and signaling-light variants.
pub const HYBRID_UINT_METHOD_CANDIDATES: &[(u32, u32, u32)] = &[
    (0, 0, 0),
    (1, 0, 0),
    (2, 0, 0),
    (4, 1, 0),
    (4, 2, 0),
    (4, 1, 1),
    (5, 2, 1),
    (5, 2, 2),
    (6, 2, 1),
    (7, 3, 2),
    (8, 3, 3),
];

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    #[test]
    fn roundtrip_all_configs() {
        for &(split, msb, lsb) in HYBRID_UINT_METHOD_CANDIDATES {
            let cfg = HybridUintConfig::new(split, msb, lsb);
            for value in [0u32, 1, 2, 3, 7, 15, 255, 1 << 20, (1 << 29) - 1] {
                let (token, nbits, bits) = cfg.encode(value).unwrap();
                assert_eq!(nbits, cfg.nbits(value));
                let bytes = {
                    let mut bw = BitWriter::new();
                    bw.write(nbits as usize, bits as u64).unwrap();
                    bw.finalize().unwrap()
                };
                let mut br = BitReader::new(&bytes);
                let decoded = cfg.read(token, &mut br).unwrap();
                assert_eq!(decoded, value, "split={split} msb={msb} lsb={lsb}");
            }
        }
    }

    #[test]
    fn arbitrary_values_roundtrip() {
        arbtest::arbtest(|u| {
            let split = u.int_in_range(0..=8)?;
            let msb = u.int_in_range(0..=(8 - split).min(split))?;
            let lsb = u.int_in_range(0..=(split - msb))?;
            let cfg = HybridUintConfig::new(split, msb, lsb);
            let value: u32 = u.int_in_range(0..=(1u32 << 29))?;
            let (token, nbits, bits) = cfg.encode(value).unwrap();
            let bytes = {
                let mut bw = BitWriter::new();
                bw.write(nbits as usize, bits as u64).unwrap();
                bw.finalize().unwrap()
            };
            let mut br = BitReader::new(&bytes);
            assert_eq!(cfg.read(token, &mut br).unwrap(), value);
            Ok(())
        });
    }

    #[test]
    fn config_header_roundtrip() {
        for &(split, msb, lsb) in HYBRID_UINT_METHOD_CANDIDATES {
            if split as usize > 8 {
                continue;
            }
            let cfg = HybridUintConfig::new(split, msb, lsb);
            let mut bw = BitWriter::new();
            cfg.write_config(8, &mut bw).unwrap();
            let bytes = bw.finalize().unwrap();
            let mut br = BitReader::new(&bytes);
            let decoded = HybridUintConfig::decode(8, &mut br).unwrap();
            assert_eq!(decoded, cfg);
        }
    }
}
