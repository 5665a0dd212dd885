//! # CPU Masks
//!
//! Fixed-width CPU bitsets and the traversal orders the preemption engine
//! needs. A mask is a plain array of words, so copying, intersecting and
//! walking one never touches the heap.
//!
//! ## Traversal
//!
//! - [`CpuMask::iter`] visits members in ascending id order.
//! - [`CpuMask::shuffle`] draws members without replacement, every member
//!   equally likely at every step. The permutation is built lazily, so a
//!   caller that stops after two draws pays for two swaps. Concurrent
//!   searches spread out instead of converging on the same CPU.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr};

use arrayvec::ArrayVec;
use static_assertions::const_assert_eq;

use crate::random::Xorshift64;
use crate::MAX_CPUS;

/// CPU identifier
pub type CpuId = u32;

/// Number of 64-bit words backing a mask
pub const MASK_WORDS: usize = MAX_CPUS / 64;

const_assert_eq!(MASK_WORDS * 64, MAX_CPUS);

// =============================================================================
// CpuMask
// =============================================================================

/// Fixed-width set of CPU ids in `0..MAX_CPUS`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuMask {
    words: [u64; MASK_WORDS],
}

impl CpuMask {
    /// Create an empty mask
    pub const fn empty() -> Self {
        Self {
            words: [0; MASK_WORDS],
        }
    }

    /// Create a mask containing CPUs `0..nr_cpus`
    pub fn first_n(nr_cpus: usize) -> Self {
        let mut mask = Self::empty();
        for cpu in 0..nr_cpus.min(MAX_CPUS) {
            mask.set(cpu as CpuId);
        }
        mask
    }

    /// Create a mask from a list of CPU ids
    ///
    /// Ids outside `0..MAX_CPUS` are ignored.
    pub fn from_cpus<I>(cpus: I) -> Self
    where
        I: IntoIterator<Item = CpuId>,
    {
        let mut mask = Self::empty();
        for cpu in cpus {
            mask.set(cpu);
        }
        mask
    }

    #[inline(always)]
    const fn split(cpu: CpuId) -> (usize, u64) {
        let cpu = cpu as usize;
        (cpu / 64, 1u64 << (cpu % 64))
    }

    /// Add a CPU to the mask
    #[inline]
    pub fn set(&mut self, cpu: CpuId) {
        if (cpu as usize) < MAX_CPUS {
            let (word, bit) = Self::split(cpu);
            self.words[word] |= bit;
        }
    }

    /// Remove a CPU from the mask
    #[inline]
    pub fn clear(&mut self, cpu: CpuId) {
        if (cpu as usize) < MAX_CPUS {
            let (word, bit) = Self::split(cpu);
            self.words[word] &= !bit;
        }
    }

    /// Check whether a CPU is in the mask
    #[inline]
    pub fn test(&self, cpu: CpuId) -> bool {
        if (cpu as usize) >= MAX_CPUS {
            return false;
        }
        let (word, bit) = Self::split(cpu);
        self.words[word] & bit != 0
    }

    /// Intersection of two masks
    #[inline]
    pub fn and(&self, other: &CpuMask) -> CpuMask {
        let mut out = *self;
        out &= *other;
        out
    }

    /// Number of CPUs in the mask
    pub fn weight(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Check whether the mask has no members
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Lowest CPU id in the mask
    pub fn first(&self) -> Option<CpuId> {
        self.iter().next()
    }

    /// Iterate over members in ascending order
    pub fn iter(&self) -> CpuMaskIter<'_> {
        CpuMaskIter {
            mask: self,
            word: 0,
            bits: self.words[0],
        }
    }

    /// Draw every member exactly once in uniformly random order
    ///
    /// Members are gathered up front; each `next` is one partial
    /// Fisher-Yates step over the members not yet drawn.
    pub fn shuffle<'r>(&self, rng: &'r mut Xorshift64) -> Shuffle<'r> {
        Shuffle {
            members: self.iter().collect(),
            drawn: 0,
            rng,
        }
    }
}

impl BitAnd for CpuMask {
    type Output = CpuMask;

    fn bitand(mut self, rhs: CpuMask) -> CpuMask {
        self &= rhs;
        self
    }
}

impl BitAndAssign for CpuMask {
    fn bitand_assign(&mut self, rhs: CpuMask) {
        for (lhs, rhs) in self.words.iter_mut().zip(rhs.words.iter()) {
            *lhs &= *rhs;
        }
    }
}

impl BitOr for CpuMask {
    type Output = CpuMask;

    fn bitor(mut self, rhs: CpuMask) -> CpuMask {
        for (lhs, rhs) in self.words.iter_mut().zip(rhs.words.iter()) {
            *lhs |= *rhs;
        }
        self
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Ascending iterator over the members of a [`CpuMask`]
#[derive(Debug, Clone)]
pub struct CpuMaskIter<'a> {
    mask: &'a CpuMask,
    word: usize,
    bits: u64,
}

impl Iterator for CpuMaskIter<'_> {
    type Item = CpuId;

    fn next(&mut self) -> Option<CpuId> {
        loop {
            if self.bits != 0 {
                let bit = self.bits.trailing_zeros();
                self.bits &= self.bits - 1;
                return Some((self.word * 64) as CpuId + bit);
            }
            self.word += 1;
            if self.word >= MASK_WORDS {
                return None;
            }
            self.bits = self.mask.words[self.word];
        }
    }
}

/// Random draw without replacement over the members of a [`CpuMask`]
///
/// Created by [`CpuMask::shuffle`].
#[derive(Debug)]
pub struct Shuffle<'r> {
    members: ArrayVec<CpuId, MAX_CPUS>,
    drawn: usize,
    rng: &'r mut Xorshift64,
}

impl Iterator for Shuffle<'_> {
    type Item = CpuId;

    fn next(&mut self) -> Option<CpuId> {
        let left = self.members.len() - self.drawn;
        if left == 0 {
            return None;
        }
        let pick = self.drawn + self.rng.next_bounded(left as u64) as usize;
        self.members.swap(self.drawn, pick);
        let cpu = self.members[self.drawn];
        self.drawn += 1;
        Some(cpu)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.members.len() - self.drawn;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Shuffle<'_> {}

// =============================================================================
// Tests
// =============================================================================
