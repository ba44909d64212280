// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Entropy-coding core for a JPEG XL style image codec.
//!
//! Takes context-tagged integer tokens produced by upstream image analysis
//! and writes a compact bitstream: the hybrid-uint split, histogram
//! clustering into shared probability models, ANS or canonical prefix
//! coding of the resulting symbols, and an optional LZ77 back-reference
//! pre-pass. See `entropy_coding` for the component breakdown.

pub mod bit_reader;
pub mod bit_writer;
pub mod entropy_coding;
pub mod error;
pub mod util;
