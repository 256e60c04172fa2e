//! Sparse bit set over a fixed universe, used as the pending-transmission map.
//!
//! One bit per ring position, packed into `u32` words. Besides per-bit
//! access it answers "is this whole word empty?" in O(1), which lets the
//! batch assembler skip long runs of already-delivered slots a word at a
//! time instead of testing each bit.

/// Bits per storage word.
pub const WORD_BITS: usize = u32::BITS as usize;

/// Largest universe supported (ring positions).
pub const MAX_SLOTS: usize = 4096;

const MAX_WORDS: usize = MAX_SLOTS / WORD_BITS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseBitSet {
    words: heapless::Vec<u32, MAX_WORDS>,
    len: usize,
}

impl SparseBitSet {
    /// An empty set over `0..len`. `len` is clamped to [`MAX_SLOTS`].
    pub fn new(len: usize) -> Self {
        let len = len.min(MAX_SLOTS);
        let mut words = heapless::Vec::new();
        // len <= MAX_SLOTS, so at most MAX_WORDS words
        let _ = words.resize(len.div_ceil(WORD_BITS), 0);
        Self { words, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn set(&mut self, position: usize) {
        if position < self.len {
            self.words[position / WORD_BITS] |= 1 << (position % WORD_BITS);
        }
    }

    pub fn clear(&mut self, position: usize) {
        if position < self.len {
            self.words[position / WORD_BITS] &= !(1 << (position % WORD_BITS));
        }
    }

    pub fn bit_is_set(&self, position: usize) -> bool {
        position < self.len && self.words[position / WORD_BITS] & (1 << (position % WORD_BITS)) != 0
    }

    /// Whether no bit of word `word_index` is set. Out-of-range words are empty.
    pub fn word_is_empty(&self, word_index: usize) -> bool {
        self.words.get(word_index).is_none_or(|&w| w == 0)
    }

    /// Word holding `position`.
    pub fn word_of(position: usize) -> usize {
        position / WORD_BITS
    }

    /// Whether `position` is the highest bit of its word.
    pub fn is_last_in_word(position: usize) -> bool {
        position % WORD_BITS == WORD_BITS - 1
    }

    /// Clear `start..=end`. When `start > end` the range wraps past the end
    /// of the universe and is cleared as `start..len` plus `0..=end`.
    pub fn clear_range(&mut self, start: usize, end: usize) {
        if self.len == 0 {
            return;
        }
        let start = start.min(self.len - 1);
        let end = end.min(self.len - 1);
        if start <= end {
            self.clear_linear(start, end);
        } else {
            self.clear_linear(start, self.len - 1);
            self.clear_linear(0, end);
        }
    }

    fn clear_linear(&mut self, start: usize, end: usize) {
        let mut pos = start;
        while pos <= end {
            let word = pos / WORD_BITS;
            let lo = pos % WORD_BITS;
            let hi = (end - word * WORD_BITS).min(WORD_BITS - 1);
            let span = hi - lo + 1;
            let mask = if span == WORD_BITS {
                u32::MAX
            } else {
                ((1u32 << span) - 1) << lo
            };
            self.words[word] &= !mask;
            pos = (word + 1) * WORD_BITS;
        }
    }

    /// Whether any bit is set among the `count` positions starting at
    /// `start`, wrapping modulo the universe.
    pub fn any_in_window(&self, start: usize, count: usize) -> bool {
        if self.len == 0 {
            return false;
        }
        (0..count.min(self.len)).any(|k| self.bit_is_set((start + k) % self.len))
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
