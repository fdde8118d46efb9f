//! Output layers: negative sampling and hierarchical softmax.
//!
//! Both present the same operation: given the hidden vector (a word vector,
//! or the combined context vectors for CBOW) and a target word, nudge the
//! output weights toward predicting the target and accumulate the error to
//! be applied to the input side.

use crate::params::Matrix;
use crate::unigram::UnigramTable;
use crate::vocab::Vocabulary;
use crate::{real, Rng};

const EXP_TABLE_SIZE: usize = 1000;
const MAX_EXP: real = 6.0;

/// The logistic function, 1 / (1 + e^-x), precomputed over
/// `[-MAX_EXP, MAX_EXP]` and clamped to 0 or 1 outside it.
#[derive(Clone)]
pub struct SigmoidTable {
    table: Vec<real>,
}

impl Default for SigmoidTable {
    fn default() -> Self {
        let table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let j = (i as real / EXP_TABLE_SIZE as real * 2.0 - 1.0) * MAX_EXP;
                let e = (j as f64).exp() as real; // Precompute the exp() table
                e / (e + 1.0) // Precompute f(x) = x / (x + 1)
            })
            .collect();
        SigmoidTable { table }
    }
}

impl SigmoidTable {
    #[inline]
    pub fn get(&self, x: real) -> real {
        if x >= MAX_EXP {
            1.0
        } else if x <= -MAX_EXP {
            0.0
        } else {
            let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as real / MAX_EXP / 2.0)) as usize;
            self.table[i.min(EXP_TABLE_SIZE - 1)]
        }
    }
}

/// `-ln(sigmoid(x))`, computed without overflow.
fn neg_log_sigmoid(x: real) -> real {
    let x = x as f64;
    ((-x).max(0.0) + (-x.abs()).exp().ln_1p()) as real
}

/// An output layer strategy. Chosen once per run; the worker loop is
/// generic over it.
pub trait OutputLayer: Sync {
    /// Rows the output weight matrix needs for this vocabulary.
    fn output_rows(vocab: &Vocabulary) -> usize
    where
        Self: Sized;

    /// Train `hidden` to predict `target`.
    ///
    /// Updates `weights` in place and adds the error for the input side into
    /// `error`. Returns the loss for this prediction if loss tracking is on,
    /// otherwise 0.
    fn update(
        &self,
        weights: &Matrix,
        hidden: &[real],
        target: usize,
        alpha: real,
        rng: &mut Rng,
        error: &mut [real],
    ) -> real;
}

pub struct NegativeSampling {
    table: UnigramTable,
    negative: usize,
    sigmoid: SigmoidTable,
    track_loss: bool,
}

impl NegativeSampling {
    pub fn new(vocab: &Vocabulary, negative: usize, track_loss: bool) -> Self {
        NegativeSampling {
            table: UnigramTable::new(vocab),
            negative,
            sigmoid: SigmoidTable::default(),
            track_loss,
        }
    }
}

impl OutputLayer for NegativeSampling {
    fn output_rows(vocab: &Vocabulary) -> usize {
        vocab.len()
    }

    fn update(
        &self,
        weights: &Matrix,
        hidden: &[real],
        word: usize,
        alpha: real,
        rng: &mut Rng,
        error: &mut [real],
    ) -> real {
        let mut loss = 0.0;
        for d in 0..(self.negative + 1) {
            let target;
            let label;
            if d == 0 {
                target = word;
                label = 1.0;
            } else {
                target = self.table.sample(rng);
                // Collisions with the true word are dropped, not redrawn.
                if target == word {
                    continue;
                }
                label = 0.0;
            }

            let f = weights.dot_row(target, hidden);
            let g = (label - self.sigmoid.get(f)) * alpha;
            if self.track_loss {
                loss += neg_log_sigmoid(if d == 0 { f } else { -f });
            }
            weights.accumulate_row(target, g, error);
            weights.add_scaled_to_row(target, g, hidden);
        }
        loss
    }
}

pub struct HierarchicalSoftmax<'v> {
    vocab: &'v Vocabulary,
    sigmoid: SigmoidTable,
    track_loss: bool,
}

impl<'v> HierarchicalSoftmax<'v> {
    pub fn new(vocab: &'v Vocabulary, track_loss: bool) -> Self {
        HierarchicalSoftmax {
            vocab,
            sigmoid: SigmoidTable::default(),
            track_loss,
        }
    }
}

impl OutputLayer for HierarchicalSoftmax<'_> {
    fn output_rows(vocab: &Vocabulary) -> usize {
        vocab.inner_nodes()
    }

    fn update(
        &self,
        weights: &Matrix,
        hidden: &[real],
        word: usize,
        alpha: real,
        _rng: &mut Rng,
        error: &mut [real],
    ) -> real {
        let entry = self.vocab.entry(word);
        let mut loss = 0.0;
        for (&bit, &node) in entry.code.iter().zip(&entry.point) {
            let node = node as usize;
            // Propagate hidden -> output
            let f = weights.dot_row(node, hidden);
            if self.track_loss {
                loss += neg_log_sigmoid(if bit == 0 { f } else { -f });
            }
            if f <= -MAX_EXP || f >= MAX_EXP {
                continue;
            }
            // 'g' is the gradient (d/df loss) multiplied by the learning rate
            let g = (1.0 - bit as real - self.sigmoid.get(f)) * alpha;
            // Propagate errors output -> hidden
            weights.accumulate_row(node, g, error);
            // Learn weights hidden -> output
            weights.add_scaled_to_row(node, g, hidden);
        }
        loss
    }
}
