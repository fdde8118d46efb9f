//! Coordinates a training run: one pool of worker threads per epoch, all
//! sharing one `ParameterStore`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::corpus::CorpusFile;
use crate::output::{HierarchicalSoftmax, NegativeSampling, OutputLayer};
use crate::params::{Matrix, ParameterStore};
use crate::schedule::LearningRate;
use crate::vocab::{Vocabulary, VocabularyBuilder};
use crate::worker::{self, Shared, WorkerReport};
use crate::{real, Config, Error, Result};

/// A flag polled by every worker between records. Once raised, workers
/// finish the record in hand and exit.
///
/// A flag raised before a run starts stops that run at once. The trainer
/// lowers it when a run ends.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Periodic progress report from one worker.
#[derive(Clone, Debug)]
pub struct Progress {
    pub epoch: usize,
    pub partition: usize,
    /// Words processed by all workers so far in this run.
    pub words_done: u64,
    /// Words expected over the whole run (all epochs).
    pub total_words: u64,
    /// The reporting worker's current learning rate.
    pub alpha: real,
    pub words_per_sec: f64,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        self.words_done as f64 / self.total_words.max(1) as f64
    }
}

/// Statistics for a finished run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainingStats {
    /// In-vocabulary words read, over all epochs.
    pub words: u64,
    /// Words trained on after subsampling.
    pub effective_words: u64,
    pub sentences: u64,
    pub epochs_completed: usize,
    pub elapsed: Duration,
    /// Lowest learning rate any worker reached.
    pub final_learning_rate: real,
    /// Summed loss, if `compute_loss` was set.
    pub loss: Option<f64>,
    /// Records with a document vector (0 unless document vectors are trained).
    pub documents: u64,
    /// True if the stop signal or the word budget ended the run early.
    pub stopped_early: bool,
}

/// The result of training: vocabulary, weights and run statistics.
pub struct TrainedModel {
    vocab: Vocabulary,
    params: ParameterStore,
    stats: TrainingStats,
}

impl TrainedModel {
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    pub fn dim(&self) -> usize {
        self.params.dim()
    }

    /// The word vectors, one row per vocabulary index.
    pub fn embeddings(&self) -> &Matrix {
        &self.params.input
    }

    /// Output-layer weights (negative sampling rows or Huffman inner nodes).
    pub fn output_weights(&self) -> &Matrix {
        &self.params.output
    }

    pub fn vector(&self, word: &str) -> Option<Vec<real>> {
        let i = self.vocab.index_of(word)?;
        Some(self.params.input.row_vec(i as usize))
    }

    /// Document vectors, one row per corpus record (line).
    pub fn documents(&self) -> &Matrix {
        &self.params.documents
    }

    pub fn document_vector(&self, record: usize) -> Option<Vec<real>> {
        (record < self.params.documents.rows()).then(|| self.params.documents.row_vec(record))
    }

    pub fn into_parts(self) -> (Vocabulary, ParameterStore, TrainingStats) {
        (self.vocab, self.params, self.stats)
    }
}

/// Per-run inputs shared by every epoch.
struct Epochs<'a> {
    vocab: &'a Vocabulary,
    corpus: &'a CorpusFile,
    doc_starts: &'a [u64],
    on_progress: &'a (dyn Fn(&Progress) + Sync),
}

pub struct Trainer {
    config: Config,
    stop: StopSignal,
}

impl Trainer {
    /// Fails with `InvalidConfiguration` before allocating anything.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Trainer {
            config,
            stop: StopSignal::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A handle that aborts a run in progress. The signal is cleared when a
    /// run ends.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Build the vocabulary from any sequence of sentences.
    pub fn build_vocab<S>(&self, sentences: S) -> Result<Vocabulary>
    where
        S: IntoIterator,
        S::Item: IntoIterator,
        <S::Item as IntoIterator>::Item: AsRef<str>,
    {
        let mut builder = VocabularyBuilder::new().with_max_size(self.config.max_vocab_size);
        builder.scan(sentences);
        builder.build(self.config.min_count, self.config.sample_threshold)
    }

    /// Build the vocabulary in one streaming pass over a corpus file.
    pub fn build_vocab_from_corpus(&self, corpus: &CorpusFile) -> Result<Vocabulary> {
        let mut builder = VocabularyBuilder::new().with_max_size(self.config.max_vocab_size);
        for sentence in corpus.sentences(self.config.max_sentence_length)? {
            let sentence = sentence.map_err(|source| Error::Corpus {
                path: corpus.path().to_path_buf(),
                source,
            })?;
            builder.add_sentence(sentence);
        }
        builder.build(self.config.min_count, self.config.sample_threshold)
    }

    pub fn train(&self, vocab: Vocabulary, corpus: &CorpusFile) -> Result<TrainedModel> {
        self.train_with_progress(vocab, corpus, |p| {
            debug!(
                "alpha: {:.6}  progress: {:.2}%  words/sec: {:.2}k",
                p.alpha,
                p.fraction() * 100.0,
                p.words_per_sec / 1000.0
            )
        })
    }

    /// Train, calling `on_progress` from the worker threads every 10,000
    /// words or so.
    pub fn train_with_progress<F>(
        &self,
        vocab: Vocabulary,
        corpus: &CorpusFile,
        on_progress: F,
    ) -> Result<TrainedModel>
    where
        F: Fn(&Progress) + Sync,
    {
        let result = self.run(vocab, corpus, &on_progress);
        self.stop.clear();
        result
    }

    fn run(
        &self,
        vocab: Vocabulary,
        corpus: &CorpusFile,
        on_progress: &(dyn Fn(&Progress) + Sync),
    ) -> Result<TrainedModel> {
        let config = &self.config;
        let dim = config.dimensionality;
        info!(
            "training {:?} with {} on {} ({} bytes), {} words, {} workers, {} epochs",
            config.architecture,
            if config.uses_hierarchical_softmax() {
                "hierarchical softmax".to_string()
            } else {
                format!("{} negative samples", config.negative_samples)
            },
            corpus.path().display(),
            corpus.size(),
            vocab.len(),
            config.workers,
            config.epochs
        );

        let (doc_starts, documents) = if config.document_vectors {
            let (starts, total) = corpus.record_starts(&corpus.partitions(config.workers))?;
            info!("training vectors for {total} documents");
            (starts, total)
        } else {
            (vec![], 0)
        };
        let epochs = Epochs {
            vocab: &vocab,
            corpus,
            doc_starts: &doc_starts,
            on_progress,
        };

        let (params, mut stats) = if config.uses_hierarchical_softmax() {
            let params = ParameterStore::new(
                vocab.len(),
                HierarchicalSoftmax::output_rows(&vocab),
                documents as usize,
                dim,
                config.seed,
            )?;
            let layer = HierarchicalSoftmax::new(&vocab, config.compute_loss);
            let stats = self.run_epochs(&layer, &params, &epochs)?;
            (params, stats)
        } else {
            let params = ParameterStore::new(
                vocab.len(),
                NegativeSampling::output_rows(&vocab),
                documents as usize,
                dim,
                config.seed,
            )?;
            let layer = NegativeSampling::new(&vocab, config.negative_samples, config.compute_loss);
            let stats = self.run_epochs(&layer, &params, &epochs)?;
            (params, stats)
        };
        stats.documents = documents;

        Ok(TrainedModel {
            vocab,
            params,
            stats,
        })
    }

    fn run_epochs<L: OutputLayer>(
        &self,
        layer: &L,
        params: &ParameterStore,
        epochs: &Epochs<'_>,
    ) -> Result<TrainingStats> {
        let config = &self.config;
        let corpus = epochs.corpus;
        let words_done = AtomicU64::new(0);
        let shared = Shared {
            config,
            vocab: epochs.vocab,
            corpus,
            params,
            layer,
            schedule: LearningRate::new(
                config.starting_alpha(),
                config.min_learning_rate,
                config.epochs,
            ),
            doc_starts: epochs.doc_starts,
            words_done: &words_done,
            stop: &self.stop,
            on_progress: epochs.on_progress,
            start: Instant::now(),
        };

        let mut stats = TrainingStats {
            final_learning_rate: config.starting_alpha(),
            ..TrainingStats::default()
        };
        let mut loss = 0.0;
        for epoch in 0..config.epochs {
            // Recomputed each epoch; depends only on the file size.
            let partitions = corpus.partitions(config.workers);
            if partitions.len() < config.workers {
                warn!(
                    "corpus has only {} bytes; using {} workers instead of {}",
                    corpus.size(),
                    partitions.len(),
                    config.workers
                );
            }
            debug!("epoch {epoch} partitions: {partitions:?}");

            let epoch_start = Instant::now();
            let results: Vec<Result<WorkerReport>> = thread::scope(|s| {
                let shared = &shared;
                let threads = partitions
                    .iter()
                    .map(|&p| {
                        s.spawn(move || {
                            let result = worker::run(shared, p, epoch);
                            if result.is_err() {
                                shared.stop.raise();
                            }
                            result
                        })
                    })
                    .collect::<Vec<_>>();
                threads
                    .into_iter()
                    .map(|t| t.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            });

            let mut epoch_words = 0;
            let mut complete = true;
            for result in results {
                let report = result?;
                complete &= report.finished;
                epoch_words += report.words;
                stats.words += report.words;
                stats.effective_words += report.effective_words;
                stats.sentences += report.sentences;
                stats.final_learning_rate = stats.final_learning_rate.min(report.alpha);
                loss += report.loss;
            }

            let secs = epoch_start.elapsed().as_secs_f64();
            if !complete {
                warn!("training stopped during epoch {}", epoch + 1);
                stats.stopped_early = true;
                break;
            }
            stats.epochs_completed += 1;
            info!(
                "epoch {}/{}: {} words in {:.1}s ({:.0} words/s), alpha {:.6}",
                epoch + 1,
                config.epochs,
                epoch_words,
                secs,
                epoch_words as f64 / secs.max(1e-3),
                stats.final_learning_rate
            );
            if self.stop.is_raised() {
                if epoch + 1 < config.epochs {
                    warn!("training stopped after epoch {}", epoch + 1);
                    stats.stopped_early = true;
                }
                break;
            }
        }

        stats.elapsed = shared.start.elapsed();
        if config.compute_loss {
            stats.loss = Some(loss);
        }
        info!(
            "trained on {} words ({} effective) in {:.1}s",
            stats.words,
            stats.effective_words,
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;
    use crate::Architecture;

    fn corpus(lines: &[&str], repeat: usize) -> (tempfile::NamedTempFile, CorpusFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for _ in 0..repeat {
            for line in lines {
                writeln!(file, "{line}").unwrap();
            }
        }
        file.flush().unwrap();
        let corpus = CorpusFile::open(file.path()).unwrap();
        (file, corpus)
    }

    fn small_config() -> Config {
        Config {
            dimensionality: 16,
            window: 2,
            min_count: 1,
            sample_threshold: 0.0,
            workers: 2,
            epochs: 2,
            ..Config::default()
        }
    }

    #[test]
    fn invalid_configuration_fails_before_training() {
        let config = Config {
            dimensionality: 0,
            ..Config::default()
        };
        assert!(matches!(
            Trainer::new(config),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn counts_every_word_of_every_epoch() {
        let (_file, corpus) = corpus(&["a b c d", "e f a b"], 50);
        let trainer = Trainer::new(small_config()).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        assert_eq!(vocab.retained_words(), 400);
        let model = trainer.train(vocab, &corpus).unwrap();
        let stats = model.stats();
        assert_eq!(stats.words, 800);
        assert_eq!(stats.effective_words, 800);
        assert_eq!(stats.sentences, 200);
        assert_eq!(stats.epochs_completed, 2);
        assert!(!stats.stopped_early);
        assert!(stats.loss.is_none());
        assert!(stats.final_learning_rate < 0.025);
        assert!(stats.final_learning_rate >= 0.0001);
    }

    #[test]
    fn all_strategy_and_architecture_combinations_train() {
        let (_file, corpus) = corpus(&["the cat sat on the mat", "the dog ate the bone"], 100);
        for architecture in [Architecture::SkipGram, Architecture::Cbow] {
            for negative_samples in [0, 3] {
                for cbow_mean in [true, false] {
                    let config = Config {
                        architecture,
                        negative_samples,
                        cbow_mean,
                        compute_loss: true,
                        ..small_config()
                    };
                    let trainer = Trainer::new(config).unwrap();
                    let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
                    let model = trainer.train(vocab, &corpus).unwrap();
                    let expected_rows = if negative_samples == 0 {
                        model.vocab().inner_nodes()
                    } else {
                        model.vocab().len()
                    };
                    assert_eq!(model.output_weights().rows(), expected_rows);
                    let values = model.embeddings().to_vec();
                    assert!(values.iter().all(|x| x.is_finite()));
                    let loss = model.stats().loss.unwrap();
                    assert!(loss.is_finite() && loss > 0.0);
                    assert!(model.output_weights().to_vec().iter().any(|&x| x != 0.0));
                }
            }
        }
    }

    #[test]
    fn progress_is_reported_and_monotone() {
        let (_file, corpus) = corpus(&["a b c d e f g h i j"], 5_000);
        let config = Config {
            workers: 1,
            ..small_config()
        };
        let trainer = Trainer::new(config).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        let reports = Mutex::new(vec![]);
        trainer
            .train_with_progress(vocab, &corpus, |p| {
                reports.lock().unwrap().push((p.words_done, p.alpha))
            })
            .unwrap();
        let reports = reports.into_inner().unwrap();
        assert!(reports.len() >= 10);
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 >= w[1].1));
        assert_eq!(reports.last().unwrap().0, 100_000);
    }

    #[test]
    fn word_budget_stops_early() {
        let (_file, corpus) = corpus(&["a b c d e f g h i j"], 5_000);
        let config = Config {
            word_budget: Some(20_000),
            epochs: 3,
            ..small_config()
        };
        let trainer = Trainer::new(config).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        let model = trainer.train(vocab, &corpus).unwrap();
        let stats = model.stats();
        assert!(stats.stopped_early);
        assert_eq!(stats.epochs_completed, 0);
        assert!(stats.words < 50_000, "read {} words", stats.words);
    }

    #[test]
    fn small_word_budget_stops_within_a_record() {
        let (_file, corpus) = corpus(&["a b c d e f g h i j"], 900);
        let config = Config {
            workers: 1,
            epochs: 3,
            word_budget: Some(100),
            ..small_config()
        };
        let trainer = Trainer::new(config).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        let model = trainer.train(vocab, &corpus).unwrap();
        let stats = model.stats();
        assert_eq!(stats.words, 100);
        assert_eq!(stats.sentences, 10);
        assert_eq!(stats.epochs_completed, 0);
        assert!(stats.stopped_early);
    }

    #[test]
    fn budget_reached_at_epoch_end_counts_the_epoch() {
        let (_file, corpus) = corpus(&["a b c d e f g h i j"], 900);
        let config = Config {
            workers: 1,
            epochs: 3,
            word_budget: Some(9_000),
            ..small_config()
        };
        let trainer = Trainer::new(config).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        let model = trainer.train(vocab, &corpus).unwrap();
        let stats = model.stats();
        assert_eq!(stats.words, 9_000);
        assert_eq!(stats.epochs_completed, 1);
        assert!(stats.stopped_early);
    }

    #[test]
    fn budget_covering_the_whole_run_is_not_an_early_stop() {
        let (_file, corpus) = corpus(&["a b c d e f g h i j"], 100);
        let config = Config {
            word_budget: Some(2_000),
            ..small_config()
        };
        let trainer = Trainer::new(config).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        let stats = trainer.train(vocab, &corpus).unwrap().stats().clone();
        assert_eq!(stats.words, 2_000);
        assert_eq!(stats.epochs_completed, 2);
        assert!(!stats.stopped_early);
    }

    #[test]
    fn stop_raised_before_training_is_honoured_then_cleared() {
        let (_file, corpus) = corpus(&["x y z"], 10);
        let trainer = Trainer::new(small_config()).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();

        trainer.stop_signal().raise();
        let model = trainer.train(vocab.clone(), &corpus).unwrap();
        assert!(model.stats().stopped_early);
        assert_eq!(model.stats().words, 0);
        assert_eq!(model.stats().epochs_completed, 0);
        assert!(!trainer.stop_signal().is_raised());

        let model = trainer.train(vocab, &corpus).unwrap();
        assert!(!model.stats().stopped_early);
        assert_eq!(model.stats().words, 60);
    }

    #[test]
    fn stop_raised_mid_run_ends_every_worker() {
        let (_file, corpus) = corpus(&["a b c d e f g h i j"], 5_000);
        let config = Config {
            workers: 3,
            epochs: 3,
            ..small_config()
        };
        let trainer = Trainer::new(config).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        let stop = trainer.stop_signal();
        let model = trainer
            .train_with_progress(vocab, &corpus, |p| {
                if p.words_done >= 30_000 {
                    stop.raise();
                }
            })
            .unwrap();
        let stats = model.stats();
        assert!(stats.stopped_early);
        assert!(stats.epochs_completed < 3);
        assert!(stats.words < 150_000, "read {} words", stats.words);
        assert!(model.embeddings().to_vec().iter().all(|x| x.is_finite()));
        assert!(!stop.is_raised());
    }

    #[test]
    fn document_rows_match_corpus_lines() {
        let (_file, corpus) = corpus(&["a b c", "", "c d e f"], 40);
        for negative_samples in [0, 5] {
            let config = Config {
                document_vectors: true,
                negative_samples,
                workers: 3,
                ..small_config()
            };
            let trainer = Trainer::new(config).unwrap();
            let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
            let model = trainer.train(vocab, &corpus).unwrap();
            assert_eq!(model.stats().documents, 120);
            assert_eq!(model.documents().rows(), 120);
            assert!(model.document_vector(119).is_some());
            assert!(model.document_vector(120).is_none());

            // Empty records have no words, so their vectors never move.
            let initial = ParameterStore::new(model.vocab().len(), 1, 120, 16, 1).unwrap();
            assert_eq!(model.document_vector(1), Some(initial.documents.row_vec(1)));
            assert_ne!(model.document_vector(0), Some(initial.documents.row_vec(0)));
        }
    }

    #[test]
    fn documents_are_off_by_default() {
        let (_file, corpus) = corpus(&["a b c"], 10);
        let trainer = Trainer::new(small_config()).unwrap();
        let vocab = trainer.build_vocab_from_corpus(&corpus).unwrap();
        let model = trainer.train(vocab, &corpus).unwrap();
        assert_eq!(model.documents().rows(), 0);
        assert_eq!(model.stats().documents, 0);
    }
}
