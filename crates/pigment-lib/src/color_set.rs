//! Per-node color sets with two interchangeable encodings.
//!
//! A color set is an ordered set of color ids attached to one de Bruijn
//! graph node. Dense sets are stored as a plain bitmap over `0..=max`;
//! sparse sets are stored as the sorted ids themselves, packed at
//! `ceil(log2(max + 1))` bits per id. [`ColorSet::from_sorted_colors`]
//! picks whichever encoding is smaller, so membership stays O(1) for dense
//! colorings while sparse colorings pay only a few bits per element.
//!
//! The empty set is always stored in the packed-array encoding, which makes
//! [`ColorSet::is_empty`] constant time.

use std::io::{Read, Write};

use simple_sds_sbwt::int_vector::IntVector;
use simple_sds_sbwt::ops::{Access, Push, Vector};
use simple_sds_sbwt::raw_vector::{AccessRaw, RawVector};
use simple_sds_sbwt::serialize::Serialize;

use crate::error::{Error, Result};

/// Number of bits needed to store any value in `0..=max`, at least 1
pub(crate) fn bits_for(max: u64) -> usize {
    ((64 - max.leading_zeros()) as usize).max(1)
}

/// The two physical encodings. The tag is internal; callers only see set
/// operations.
#[derive(Clone, Debug)]
enum Repr {
    /// Bit per color over `0..=max`; never used for the empty set
    Bitmap(RawVector),
    /// Sorted color ids at a fixed bit width
    Packed(IntVector),
}

/// A compressed set of color ids
#[derive(Clone, Debug)]
pub struct ColorSet {
    repr: Repr,
}

impl ColorSet {
    /// Builds a set from strictly ascending color ids.
    ///
    /// The encoding is chosen by size: with `w = ceil(log2(max + 1))`, the
    /// bitmap wins iff the input is non-empty and `w * len > max + 1`.
    pub fn from_sorted_colors(colors: &[u64]) -> Self {
        debug_assert!(colors.windows(2).all(|w| w[0] < w[1]));

        if colors.is_empty() {
            return Self::empty();
        }

        let max = *colors.last().expect("non-empty input");
        let width = bits_for(max);
        let packed_bits = (width as u64) * colors.len() as u64;
        let bitmap_bits = max + 1;

        if packed_bits > bitmap_bits {
            let mut bits = RawVector::with_len((max + 1) as usize, false);
            for &c in colors {
                bits.set_bit(c as usize, true);
            }
            ColorSet { repr: Repr::Bitmap(bits) }
        } else {
            let mut values = IntVector::new(width).expect("width is in 1..=64");
            for &c in colors {
                values.push(c);
            }
            ColorSet { repr: Repr::Packed(values) }
        }
    }

    /// The empty color set
    pub fn empty() -> Self {
        ColorSet {
            repr: Repr::Packed(IntVector::new(1).expect("width 1 is valid")),
        }
    }

    /// True if no colors are stored. O(1): empty sets are never bitmaps.
    pub fn is_empty(&self) -> bool {
        match &self.repr {
            Repr::Bitmap(_) => false,
            Repr::Packed(values) => values.is_empty(),
        }
    }

    /// Number of stored colors. Linear in the encoding size.
    pub fn size(&self) -> usize {
        match &self.repr {
            Repr::Bitmap(bits) => bits.count_ones(),
            Repr::Packed(values) => values.len(),
        }
    }

    /// Membership test. O(1) on the bitmap encoding, O(size) on the packed
    /// encoding.
    pub fn contains(&self, color: u64) -> bool {
        match &self.repr {
            Repr::Bitmap(bits) => (color as usize) < bits.len() && bits.bit(color as usize),
            Repr::Packed(values) => values.iter().any(|v| v == color),
        }
    }

    /// Decodes the set into ascending color ids
    pub fn as_sorted_vector(&self) -> Vec<u64> {
        match &self.repr {
            Repr::Bitmap(bits) => collect_set_bits(bits),
            Repr::Packed(values) => values.iter().collect(),
        }
    }

    /// Intersection with another set. The result is re-encoded through
    /// [`ColorSet::from_sorted_colors`], so its encoding is canonical for
    /// its own content.
    pub fn intersect(&self, other: &ColorSet) -> ColorSet {
        let merged = match (&self.repr, &other.repr) {
            (Repr::Bitmap(a), Repr::Bitmap(b)) => bitmap_and(a, b),
            (Repr::Bitmap(bm), Repr::Packed(vals)) | (Repr::Packed(vals), Repr::Bitmap(bm)) => {
                // Packed values are sorted: stop at the end of the bitmap.
                let mut out = Vec::new();
                for v in vals.iter() {
                    if v as usize >= bm.len() {
                        break;
                    }
                    if bm.bit(v as usize) {
                        out.push(v);
                    }
                }
                out
            }
            (Repr::Packed(a), Repr::Packed(b)) => {
                intersect_sorted(&a.iter().collect::<Vec<_>>(), &b.iter().collect::<Vec<_>>())
            }
        };
        ColorSet::from_sorted_colors(&merged)
    }

    /// Union with another set, re-encoded canonically like
    /// [`ColorSet::intersect`]
    pub fn union_with(&self, other: &ColorSet) -> ColorSet {
        let merged = match (&self.repr, &other.repr) {
            (Repr::Bitmap(a), Repr::Bitmap(b)) => bitmap_or(a, b),
            (Repr::Bitmap(bm), Repr::Packed(vals)) | (Repr::Packed(vals), Repr::Bitmap(bm)) => {
                let widened = bitmap_or_values(bm, vals);
                collect_set_bits(&widened)
            }
            (Repr::Packed(a), Repr::Packed(b)) => {
                union_sorted(&a.iter().collect::<Vec<_>>(), &b.iter().collect::<Vec<_>>())
            }
        };
        ColorSet::from_sorted_colors(&merged)
    }

    /// Writes the set as a 1-byte tag followed by the bitmap and the packed
    /// array (the inactive part is written empty). Returns the number of
    /// bytes written.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let tag: u8 = matches!(self.repr, Repr::Bitmap(_)) as u8;
        writer.write_all(&[tag])?;

        let mut n_bytes: u64 = 1;
        match &self.repr {
            Repr::Bitmap(bits) => {
                let empty = IntVector::new(1).expect("width 1 is valid");
                bits.serialize(writer)?;
                empty.serialize(writer)?;
                n_bytes += (bits.size_in_bytes() + empty.size_in_bytes()) as u64;
            }
            Repr::Packed(values) => {
                let empty = RawVector::new();
                empty.serialize(writer)?;
                values.serialize(writer)?;
                n_bytes += (empty.size_in_bytes() + values.size_in_bytes()) as u64;
            }
        }
        Ok(n_bytes)
    }

    /// Reads a set written by [`ColorSet::serialize`]
    pub fn deserialize<R: Read>(reader: &mut R) -> Result<ColorSet> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        let bits = RawVector::load(reader)?;
        let values = IntVector::load(reader)?;
        if tag[0] != 0 {
            if bits.is_empty() {
                return Err(Error::InvariantViolated(
                    "serialized color set tagged as bitmap but the bitmap is empty".to_string(),
                ));
            }
            Ok(ColorSet { repr: Repr::Bitmap(bits) })
        } else {
            Ok(ColorSet { repr: Repr::Packed(values) })
        }
    }
}

impl PartialEq for ColorSet {
    fn eq(&self, other: &Self) -> bool {
        self.as_sorted_vector() == other.as_sorted_vector()
    }
}

impl Eq for ColorSet {}

/// Decodes the positions of the set bits in ascending order
fn collect_set_bits(bits: &RawVector) -> Vec<u64> {
    let n = bits.len();
    let words = n.div_ceil(64);
    let mut out = Vec::new();
    for w in 0..words {
        // Bits past the vector length are zero-padded.
        let mut word = bits.word(w);
        while word != 0 {
            let b = word.trailing_zeros() as usize;
            out.push((w * 64 + b) as u64);
            word &= word - 1;
        }
    }
    out
}

/// 64-bit-word intersection over the common prefix of two bitmaps. Bits
/// past either operand's length are zero, so no tail masking is needed.
fn bitmap_and(a: &RawVector, b: &RawVector) -> Vec<u64> {
    let n = a.len().min(b.len());
    let words = n.div_ceil(64);
    let mut out = Vec::new();
    for w in 0..words {
        let mut word = a.word(w) & b.word(w);
        while word != 0 {
            let bit = word.trailing_zeros() as usize;
            out.push((w * 64 + bit) as u64);
            word &= word - 1;
        }
    }
    out
}

/// 64-bit-word union over the common prefix, then the tail of the longer
/// operand
fn bitmap_or(a: &RawVector, b: &RawVector) -> Vec<u64> {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let common_words = short.len().div_ceil(64);
    let total_words = long.len().div_ceil(64);
    let mut out = Vec::new();
    for w in 0..total_words {
        let mut word = if w < common_words {
            short.word(w) | long.word(w)
        } else {
            long.word(w)
        };
        while word != 0 {
            let bit = word.trailing_zeros() as usize;
            out.push((w * 64 + bit) as u64);
            word &= word - 1;
        }
    }
    out
}

/// Widens the bitmap to cover the packed values and ORs them in
fn bitmap_or_values(bm: &RawVector, vals: &IntVector) -> RawVector {
    let mut max_val = 0usize;
    for v in vals.iter() {
        max_val = max_val.max(v as usize);
    }
    let new_len = if vals.is_empty() {
        bm.len()
    } else {
        bm.len().max(max_val + 1)
    };

    let mut result = bm.clone();
    result.resize(new_len, false);
    for v in vals.iter() {
        result.set_bit(v as usize, true);
    }
    result
}

/// Two-pointer intersection of sorted, duplicate-free slices
fn intersect_sorted(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if a[i] > b[j] {
            j += 1;
        } else {
            out.push(a[i]);
            i += 1;
            j += 1;
        }
    }
    out
}

/// Sorted set union of duplicate-free slices
pub(crate) fn union_sorted(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            out.push(a[i]);
            i += 1;
        } else if a[i] > b[j] {
            out.push(b[j]);
            j += 1;
        } else {
            out.push(a[i]);
            i += 1;
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}
