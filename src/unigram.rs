//! The negative sampling table.

use crate::vocab::Vocabulary;
use crate::Rng;

const POWER: f64 = 0.75;
const MAX_TABLE_SIZE: usize = 100_000_000;
const MIN_TABLE_SIZE: usize = 10_000;
/// Table slots per vocabulary word, before clamping.
const SLOTS_PER_WORD: usize = 1_000;

/// Vocabulary indices laid out so that a uniformly random slot picks word
/// `i` with probability proportional to `count_i^0.75`.
pub struct UnigramTable {
    table: Vec<u32>,
}

impl UnigramTable {
    pub fn new(vocab: &Vocabulary) -> Self {
        let size = (vocab.len() * SLOTS_PER_WORD).clamp(MIN_TABLE_SIZE, MAX_TABLE_SIZE);
        Self::with_size(vocab, size)
    }

    pub fn with_size(vocab: &Vocabulary, size: usize) -> Self {
        let entries = vocab.entries();
        let train_words_pow = entries
            .iter()
            .map(|e| (e.count as f64).powf(POWER))
            .sum::<f64>();

        let mut table = Vec::with_capacity(size);
        let mut i = 0;
        let mut d1 = (entries[i].count as f64).powf(POWER) / train_words_pow;
        for a in 0..size {
            table.push(i as u32);
            if (a as f64 / size as f64) > d1 && i + 1 < entries.len() {
                i += 1;
                d1 += (entries[i].count as f64).powf(POWER) / train_words_pow;
            }
        }
        UnigramTable { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn sample(&self, rng: &mut Rng) -> usize {
        self.table[rng.below(self.table.len())] as usize
    }
}
