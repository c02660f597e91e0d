//! Compact bitset representation for taxon sets.
//!
//! # Overview
//! Bit positions are global taxon indices (alphabetical order over every
//! taxon seen in the reference trees). Reference splits and the cache keys
//! of the score oracle are both bitsets.
//!
//! # Example
//! For taxa [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Set {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Set {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset over taxon indices.
///
/// Stores bits in `Vec<u64>` words so any number of taxa fits.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed, `num_taxa.div_ceil(64)`
    ///
    /// # Example
    /// ```
    /// # use quartet_treesearch::bitset::Bitset;
    /// // 100 taxa need 2 words (128 bits)
    /// let bs = Bitset::zeros(2);
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Bitset sized for `num_taxa` with the given indices set.
    ///
    /// ```
    /// # use quartet_treesearch::bitset::Bitset;
    /// let bs = Bitset::from_indices(70, [0, 65]);
    /// assert_eq!(bs.count_ones(), 2);
    /// assert!(bs.contains(65));
    /// ```
    pub fn from_indices(num_taxa: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bs = Bitset::zeros(num_taxa.div_ceil(64));
        for i in indices {
            bs.set(i);
        }
        bs
    }

    /// Sets the bit at the given index to 1.
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6; // idx / 64
        let bit = idx & 63; // idx % 64
        self.0[word] |= 1u64 << bit;
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        let word = idx >> 6;
        let bit = idx & 63;
        self.0.get(word).is_some_and(|w| w & (1u64 << bit) != 0)
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// ```
    /// # use quartet_treesearch::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set(0);
    /// let mut right = Bitset::zeros(1);
    /// right.set(1);
    /// left.or_assign(&right);
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Counts the number of set bits (population count).
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.0[0], 0b0101);
        assert!(bs.contains(2));
        assert!(!bs.contains(1));
        assert!(!bs.contains(200));
    }

    #[test]
    fn test_bitset_or() {
        let mut bs1 = Bitset::from_indices(4, [0, 1]);
        let bs2 = Bitset::from_indices(4, [2, 3]);
        bs1.or_assign(&bs2);
        assert_eq!(bs1.0[0], 0b1111);
    }

    #[test]
    fn test_bitset_across_words() {
        let mut bs = Bitset::from_indices(130, [0, 63, 64]);
        assert_eq!(bs.0.len(), 3);
        bs.or_assign(&Bitset::from_indices(130, [64, 129]));
        assert_eq!(bs.count_ones(), 4);
        assert!(bs.contains(129));
        assert!(!bs.contains(65));
    }
}
