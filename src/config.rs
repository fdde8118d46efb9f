use serde::{Deserialize, Serialize};

use crate::{real, Error, Result};

/// Which way round the window is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// Predict each context word from the center word.
    SkipGram,
    /// Predict the center word from the average (or sum) of its context.
    Cbow,
}

/// Training options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding vector length.
    pub dimensionality: usize,

    /// Maximum distance between the center word and a context word.
    pub window: usize,

    /// Words that appear fewer than this many times are discarded.
    pub min_count: u64,

    /// Threshold for down-sampling frequent words. Words that make up more
    /// than this fraction of the corpus are randomly discarded; 0 disables.
    /// Useful range is (0, 1e-5).
    pub sample_threshold: real,

    /// Number of negative examples per target. 0 selects hierarchical
    /// softmax.
    pub negative_samples: usize,

    /// Number of worker threads (and corpus partitions).
    pub workers: usize,

    /// Number of passes over the corpus.
    pub epochs: usize,

    /// Starting learning rate. Defaults to 0.025 for skip-gram and 0.05 for
    /// CBOW.
    pub initial_learning_rate: Option<real>,

    /// The learning rate decays linearly to this value.
    pub min_learning_rate: real,

    pub architecture: Architecture,

    /// CBOW only: average the context vectors (otherwise sum them).
    pub cbow_mean: bool,

    /// Seed for weight initialization and the per-worker generators.
    pub seed: u64,

    /// Prune the vocabulary during the scan whenever it grows beyond this
    /// many entries.
    pub max_vocab_size: Option<usize>,

    /// Longer records are split into chunks of this many tokens.
    pub max_sentence_length: usize,

    /// Track the training loss (slows the inner loop slightly).
    pub compute_loss: bool,

    /// Stop all workers once this many words have been processed in total.
    pub word_budget: Option<u64>,

    /// Also train one vector per corpus record (PV-DBOW).
    pub document_vectors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dimensionality: 100,
            window: 5,
            min_count: 5,
            sample_threshold: 1e-3,
            negative_samples: 5,
            workers: 3,
            epochs: 5,
            initial_learning_rate: None,
            min_learning_rate: 0.0001,
            architecture: Architecture::SkipGram,
            cbow_mean: true,
            seed: 1,
            max_vocab_size: None,
            max_sentence_length: 10_000,
            compute_loss: false,
            word_budget: None,
            document_vectors: false,
        }
    }
}

impl Config {
    pub fn starting_alpha(&self) -> real {
        self.initial_learning_rate
            .unwrap_or(match self.architecture {
                Architecture::SkipGram => 0.025,
                Architecture::Cbow => 0.05,
            })
    }

    pub fn uses_hierarchical_softmax(&self) -> bool {
        self.negative_samples == 0
    }

    /// Check every option's range. Called before any allocation.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(Error::InvalidConfiguration(msg))
        }

        if self.dimensionality == 0 {
            return invalid("dimensionality must be positive".to_string());
        }
        if self.window == 0 {
            return invalid("window must be at least 1".to_string());
        }
        if !self.sample_threshold.is_finite() || self.sample_threshold < 0.0 {
            return invalid(format!(
                "sample_threshold must be a non-negative number, got {}",
                self.sample_threshold
            ));
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1".to_string());
        }
        if self.epochs == 0 {
            return invalid("epochs must be at least 1".to_string());
        }
        let alpha = self.starting_alpha();
        if !alpha.is_finite() || alpha <= 0.0 {
            return invalid(format!(
                "initial_learning_rate must be positive, got {alpha}"
            ));
        }
        if !self.min_learning_rate.is_finite()
            || self.min_learning_rate < 0.0
            || self.min_learning_rate > alpha
        {
            return invalid(format!(
                "min_learning_rate must be in 0..={alpha}, got {}",
                self.min_learning_rate
            ));
        }
        if self.max_sentence_length == 0 {
            return invalid("max_sentence_length must be at least 1".to_string());
        }
        if self.max_vocab_size == Some(0) {
            return invalid("max_vocab_size must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn starting_alpha_depends_on_architecture() {
        let mut config = Config::default();
        assert_eq!(config.starting_alpha(), 0.025);
        config.architecture = Architecture::Cbow;
        assert_eq!(config.starting_alpha(), 0.05);
        config.initial_learning_rate = Some(0.1);
        assert_eq!(config.starting_alpha(), 0.1);
    }

    #[test]
    fn out_of_range_options_are_rejected() {
        let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c: &mut Config| c.dimensionality = 0),
            Box::new(|c: &mut Config| c.window = 0),
            Box::new(|c: &mut Config| c.sample_threshold = -1.0),
            Box::new(|c: &mut Config| c.sample_threshold = real::NAN),
            Box::new(|c: &mut Config| c.workers = 0),
            Box::new(|c: &mut Config| c.epochs = 0),
            Box::new(|c: &mut Config| c.initial_learning_rate = Some(0.0)),
            Box::new(|c: &mut Config| c.min_learning_rate = 1.0),
            Box::new(|c: &mut Config| c.max_sentence_length = 0),
            Box::new(|c: &mut Config| c.max_vocab_size = Some(0)),
        ];
        for (i, modify) in cases.iter().enumerate() {
            let mut config = Config::default();
            modify(&mut config);
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfiguration(_))),
                "case {i} should have been rejected"
            );
        }
    }
}
