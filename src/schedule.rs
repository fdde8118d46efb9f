//! Linear learning-rate decay.

use crate::real;

/// Learning rate as a function of training progress.
///
/// Each worker computes its own rate from its own word count and its own
/// share of the total work, so the value at a given point in a worker's
/// partition doesn't depend on how the threads happen to be scheduled.
#[derive(Clone, Copy, Debug)]
pub struct LearningRate {
    start: real,
    floor: real,
    epochs: usize,
}

impl LearningRate {
    pub fn new(start: real, floor: real, epochs: usize) -> Self {
        LearningRate {
            start,
            floor,
            epochs: epochs.max(1),
        }
    }

    /// Rate after `words_done` of `words_expected` words in epoch `epoch`
    /// (counting from 0).
    pub fn at(&self, epoch: usize, words_done: u64, words_expected: u64) -> real {
        let within = if words_expected == 0 {
            1.0
        } else {
            (words_done as f64 / words_expected as f64).min(1.0)
        };
        let progress = ((epoch as f64 + within) / self.epochs as f64).min(1.0);
        let (start, floor) = (self.start as f64, self.floor as f64);
        let alpha = floor + (start - floor) * (1.0 - progress);
        (alpha as real).max(self.floor)
    }
}
