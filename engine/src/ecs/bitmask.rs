//! Fixed-width bitset over type indices.
//!
//! Every kind of type index (component, array-element, tag) is assigned a
//! dense `u32` within its own namespace by [`crate::ecs::schema::Schema`].
//! `BitMask` is the set representation used everywhere an archetype's
//! membership in one of those namespaces needs to be tested, combined, or
//! hashed — it underlies [`crate::ecs::definition::Definition`] and the
//! query engine's include/exclude predicates.
//!
//! The width is a compile-time constant so a `Definition`'s three masks are
//! always the same size and can be hashed/compared without indirection.

use std::hash::{Hash, Hasher};

use fixedbitset::FixedBitSet;

/// Number of distinct type indices representable per kind. A 256-wide mask
/// admits at least 256 component types (or array types, or tag types) in a
/// single world, per the design's capacity guarantee.
pub const WIDTH: usize = 256;

/// A fixed-width bitset over type indices `0..WIDTH`.
///
/// Setting or testing an index `>= WIDTH` is a programmer error and is only
/// checked in debug builds, matching the design's "no runtime failure mode,
/// out-of-range is a programmer error" contract.
#[derive(Debug, Clone, Eq)]
pub struct BitMask(FixedBitSet);

impl BitMask {
    /// An empty mask.
    #[inline]
    pub fn new() -> Self {
        Self(FixedBitSet::with_capacity(WIDTH))
    }

    /// Set bit `index`.
    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < WIDTH, "bit index {index} out of range (width {WIDTH})");
        self.0.insert(index);
    }

    /// Clear bit `index`.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < WIDTH, "bit index {index} out of range (width {WIDTH})");
        self.0.set(index, false);
    }

    /// Test whether bit `index` is set.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        debug_assert!(index < WIDTH, "bit index {index} out of range (width {WIDTH})");
        self.0.contains(index)
    }

    /// Number of set bits.
    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones(..)
    }

    /// Whether every bit set in `other` is also set in `self`.
    #[inline]
    pub fn contains_all(&self, other: &BitMask) -> bool {
        other.0.is_subset(&self.0)
    }

    /// Whether `self` and `other` share no set bit.
    #[inline]
    pub fn is_disjoint(&self, other: &BitMask) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Bitwise AND, producing a new mask.
    #[inline]
    pub fn and(&self, other: &BitMask) -> BitMask {
        BitMask(&self.0 & &other.0)
    }

    /// Bitwise OR, producing a new mask.
    #[inline]
    pub fn or(&self, other: &BitMask) -> BitMask {
        BitMask(&self.0 | &other.0)
    }

    /// Bitwise XOR, producing a new mask.
    #[inline]
    pub fn xor(&self, other: &BitMask) -> BitMask {
        BitMask(&self.0 ^ &other.0)
    }

    /// Iterate the set bit indices in ascending order.
    #[inline]
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.ones()
    }
}

impl Default for BitMask {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for BitMask {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

// Hashing must be order-independent over set bits and stable across runs of
// the same build: fold each set bit's index rather than hashing the block
// words, so internal block-width choices never change the result.
impl Hash for BitMask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut acc: u64 = 0;
        for bit in self.0.ones() {
            acc ^= splitmix(bit as u64);
        }
        acc.hash(state);
    }
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}
