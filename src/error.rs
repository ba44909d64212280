// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::TryReserveError;

use thiserror::Error;

use crate::entropy_coding::huffman::PREFIX_MAX_BITS;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Read out of bounds")]
    OutOfBounds,
    #[error("Attempted to peek more than MAX_BITS_PER_CALL bits")]
    PeekTooLarge,
    #[error("Non-zero padding bits")]
    NonZeroPadding,
    #[error("Bit sink write exceeded its reservation")]
    WriterOverflow,
    #[error("Invalid HybridUintConfig: {0} {1} {2:?}")]
    InvalidUintConfig(u32, u32, Option<u32>),
    #[error("Integer too large: nbits {0} > 31")]
    IntegerTooLarge(u32),
    #[error("Token value overflows u32 hybrid-uint encoding")]
    ValueTooLarge,
    #[error("LZ77 enabled when explicitly disallowed")]
    LZ77Disallowed,
    #[error("Unexpected LZ77 length token before any symbol was decoded")]
    UnexpectedLz77Repeat,
    #[error("Huffman alphabet too large: {0}, max is {}", 1 << PREFIX_MAX_BITS)]
    AlphabetTooLargeHuff(usize),
    #[error("ANS alphabet too large: {0}, max is {1}")]
    AlphabetTooLargeAns(usize, usize),
    #[error("Invalid Huffman code")]
    InvalidHuffman,
    #[error("Invalid context map: cluster id {0} >= num_clusters {1}")]
    InvalidContextMap(u32, u32),
    #[error("Too many clusters: {0}, limit is {1}")]
    TooManyClusters(usize, usize),
    #[error("Histogram rebalance failed to terminate with a positive omitted count")]
    RebalanceFailed,
    #[error("Run-length too long to signal: {0}")]
    EncodingRejected(usize),
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
}

pub type Result<T> = std::result::Result<T, Error>;
