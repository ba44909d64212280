// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

/// A single context-tagged integer emitted by upstream image analysis.
///
/// `context` selects which probability model the value is coded under
/// (before clustering collapses many contexts onto few histograms).
/// `is_lz77_length` marks tokens produced by the LZ77 pre-pass to
/// stand for a back-reference length rather than a literal value; such
/// tokens are always coded with the dedicated length hybrid-uint config
/// and never re-enter the LZ77 search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub context: u32,
    pub value: u32,
    pub is_lz77_length: bool,
}

impl Token {
    pub fn new(context: u32, value: u32) -> Self {
        Self {
            context,
            value,
            is_lz77_length: false,
        }
    }

    pub fn lz77_length(context: u32, value: u32) -> Self {
        Self {
            context,
            value,
            is_lz77_length: true,
        }
    }
}
