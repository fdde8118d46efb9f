//! Multi-threaded word2vec training over a disk-resident corpus.
//!
//! The vocabulary is built in one streaming pass, then each epoch splits the
//! corpus file into byte ranges and trains one thread per range against a
//! single shared pair of weight matrices, with no locking on the hot path.

mod config;
mod error;

pub mod corpus;
pub mod huffman;
pub mod output;
pub mod params;
pub mod schedule;
pub mod trainer;
pub mod unigram;
pub mod vocab;
mod worker;

pub use config::{Architecture, Config};
pub use corpus::{CorpusFile, LineSentences, Partition};
pub use error::{Error, Result};
pub use trainer::{Progress, StopSignal, TrainedModel, Trainer, TrainingStats};
pub use vocab::{VocabEntry, Vocabulary, VocabularyBuilder};

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

/// The linear congruential generator used by word2vec.
///
/// Cheap enough to call several times per word in the inner loop.
#[derive(Clone, Debug)]
pub struct Rng(pub u64);

impl Rng {
    pub fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// Get a uniformly distributed random number in `0.0 .. 1.0`.
    ///
    /// Uses bits 16..32; the low bits of this generator have short periods.
    pub fn rand_real(&mut self) -> real {
        ((self.rand_u64() >> 16) & 0xFFFF) as real / 65536.0
    }

    /// Uniform in `0..n`, from the high bits.
    pub fn below(&mut self, n: usize) -> usize {
        (self.rand_u64() >> 16) as usize % n
    }
}

pub fn norm(v: &[real]) -> real {
    v.iter().copied().map(|e| e * e).sum::<real>().sqrt()
}

pub fn dot(a: &[real], b: &[real]) -> real {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

/// Cosine similarity; 0 if either vector is all zeros.
pub fn cosine(a: &[real], b: &[real]) -> real {
    let d = norm(a) * norm(b);
    if d == 0.0 {
        0.0
    } else {
        dot(a, b) / d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_real_stays_in_unit_interval() {
        let mut rng = Rng(7);
        for _ in 0..10_000 {
            let x = rng.rand_real();
            assert!((0.0..1.0).contains(&x), "{x} out of range");
        }
    }

    #[test]
    fn small_ranges_are_not_periodic() {
        // The lowest bit of the raw generator alternates.
        let mut rng = Rng(3);
        let draws: Vec<usize> = (0..64).map(|_| rng.below(2)).collect();
        assert!(draws.windows(2).any(|w| w[0] == w[1]), "{draws:?}");
        assert!(draws.contains(&0) && draws.contains(&1));
    }

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 3.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
