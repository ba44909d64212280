// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Entropy-coding core: hybrid-uint token splitting, histogram
//! clustering, ANS and canonical-prefix coding, the LZ77 back-reference pre-pass, and the
//! top-level model builder/writer that ties them together.

pub mod ans;
pub mod context_map;
pub mod encode;
pub mod histogram;
pub mod huffman;
pub mod hybrid_uint;
pub mod lz77;
pub mod model;
pub mod token;
