//! Fixed-length bitset used for segment and stripe bookkeeping.
//!
//! Bits are stored in little-endian `u64` words; the encoded form is the
//! word array, so the on-disk size is always a multiple of 8 bytes.

/// Bits per storage word.
const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-length bitset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentBitmap {
    words: Vec<u64>,
    len: usize,
}

impl SegmentBitmap {
    /// Creates a bitmap of `len` cleared bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// Number of bits tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the bitmap tracks no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the value of bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range {}", self.len);
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Sets bit `index`, returning its previous value.
    pub fn set(&mut self, index: usize) -> bool {
        let was_set = self.test(index);
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        was_set
    }

    /// Clears bit `index`, returning its previous value.
    pub fn clear(&mut self, index: usize) -> bool {
        let was_set = self.test(index);
        self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        was_set
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Finds the first clear bit at or after `start`, wrapping around once.
    #[must_use]
    pub fn find_zero_from(&self, start: usize) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let start = start % self.len;
        self.find_zero_in(start, self.len)
            .or_else(|| self.find_zero_in(0, start))
    }

    fn find_zero_in(&self, from: usize, to: usize) -> Option<usize> {
        let mut index = from;
        while index < to {
            let word = self.words[index / WORD_BITS] >> (index % WORD_BITS);
            if word == u64::MAX >> (index % WORD_BITS) {
                // rest of this word is full
                index = (index / WORD_BITS + 1) * WORD_BITS;
                continue;
            }
            let candidate = index + (!word).trailing_zeros() as usize;
            return (candidate < to).then_some(candidate);
        }
        None
    }

    /// Iterates over the indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.test(i))
    }

    /// First set bit at or after `start`.
    #[must_use]
    pub fn next_one_from(&self, start: usize) -> Option<usize> {
        (start..self.len).find(|&i| self.test(i))
    }

    /// Size of the encoded form in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::encoded_len_for(self.len)
    }

    /// Size of the encoded form of a `len`-bit bitmap.
    #[must_use]
    pub fn encoded_len_for(len: usize) -> usize {
        len.div_ceil(WORD_BITS) * 8
    }

    /// Writes the word array into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is not exactly [`Self::encoded_len`] bytes.
    pub fn encode_into(&self, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.encoded_len());
        for (chunk, word) in dst.chunks_exact_mut(8).zip(&self.words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    /// Reads a `len`-bit bitmap from its encoded form.
    ///
    /// Returns `None` if `src` has the wrong size or sets bits past `len`.
    #[must_use]
    pub fn decode(src: &[u8], len: usize) -> Option<Self> {
        if src.len() != Self::encoded_len_for(len) {
            return None;
        }
        let words: Vec<u64> = src
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            })
            .collect();

        let tail_bits = len % WORD_BITS;
        if tail_bits != 0 {
            if let Some(last) = words.last() {
                if last >> tail_bits != 0 {
                    return None;
                }
            }
        }
        Some(Self { words, len })
    }
}
