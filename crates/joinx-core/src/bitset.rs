//! # Fixed-Width Bitsets
//!
//! Vertex sets and edge sets in the join hypergraph are small (at most 64 members), dense, and
//! manipulated in the innermost loop of subset enumeration. A single `u64` per set keeps union,
//! intersection and subset tests to one machine instruction each.
//!
//! Element `i` corresponds to bit `i`. The capacity limit is enforced where vertices and edges are
//! registered (see `join_order`), not here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Sub};

/// Maximum number of elements a [`BitSet64`] can hold.
pub const MAX_SET_SIZE: usize = 64;

/// A set of small non-negative integers (`0..64`) packed into one `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BitSet64(u64);

/// Set of hypergraph vertices (base relations).
pub type VertexSet = BitSet64;

/// Set of hypergraph edges (join predicates).
pub type EdgeSet = BitSet64;

impl BitSet64 {
    pub const EMPTY: BitSet64 = BitSet64(0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// A set containing only `idx`.
    pub fn single(idx: usize) -> Self {
        debug_assert!(idx < MAX_SET_SIZE, "bitset index {idx} out of range");
        Self(1u64 << idx)
    }

    /// The set `{0, 1, .., n-1}`.
    pub fn first_n(n: usize) -> Self {
        if n >= MAX_SET_SIZE {
            Self(u64::MAX)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn insert(&mut self, idx: usize) {
        *self = self.with(idx);
    }

    pub fn remove(&mut self, idx: usize) {
        self.0 &= !(1u64 << idx);
    }

    pub fn with(self, idx: usize) -> Self {
        self.union(Self::single(idx))
    }

    pub fn contains(self, idx: usize) -> bool {
        idx < MAX_SET_SIZE && self.0 & (1u64 << idx) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_singleton(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Smallest member, if any.
    pub fn first(self) -> Option<usize> {
        self.next(0)
    }

    /// Smallest member `>= from`.
    pub fn next(self, from: usize) -> Option<usize> {
        if from >= MAX_SET_SIZE {
            return None;
        }
        let rest = self.0 >> from;
        if rest == 0 {
            None
        } else {
            Some(from + rest.trailing_zeros() as usize)
        }
    }

    /// Members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let idx = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(idx)
        })
    }

    /// Non-empty subsets of `self` in ascending numeric order.
    pub fn subsets(self) -> impl Iterator<Item = BitSet64> {
        let mask = self.0;
        let mut cur: u64 = 0;
        let mut done = mask == 0;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            cur = (cur | !mask).wrapping_add(1) & mask;
            if cur == mask {
                done = true;
            }
            Some(BitSet64(cur))
        })
    }
}

impl BitOr for BitSet64 {
    type Output = BitSet64;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitAnd for BitSet64 {
    type Output = BitSet64;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.intersection(rhs)
    }
}

impl Sub for BitSet64 {
    type Output = BitSet64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.difference(rhs)
    }
}

impl FromIterator<usize> for BitSet64 {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        iter.into_iter().fold(BitSet64::EMPTY, BitSet64::with)
    }
}

impl fmt::Display for BitSet64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, idx) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{idx}")?;
        }
        write!(f, "}}")
    }
}
