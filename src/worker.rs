//! The per-thread training loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::debug;

use crate::corpus::{tokenize, CorpusFile, Partition, PartitionReader};
use crate::output::OutputLayer;
use crate::params::ParameterStore;
use crate::schedule::LearningRate;
use crate::trainer::{Progress, StopSignal};
use crate::vocab::Vocabulary;
use crate::{real, Architecture, Config, Error, Result, Rng};

/// Words between updates of the shared progress counter and the learning
/// rate.
const REPORT_INTERVAL: u64 = 10_000;

/// Everything a worker reads but does not own. Frozen before any worker
/// starts.
pub(crate) struct Shared<'a, L> {
    pub config: &'a Config,
    pub vocab: &'a Vocabulary,
    pub corpus: &'a CorpusFile,
    pub params: &'a ParameterStore,
    pub layer: &'a L,
    pub schedule: LearningRate,
    /// First record number of each partition; empty unless document vectors
    /// are trained.
    pub doc_starts: &'a [u64],
    /// Words processed by all workers over the whole run.
    pub words_done: &'a AtomicU64,
    pub stop: &'a StopSignal,
    pub on_progress: &'a (dyn Fn(&Progress) + Sync),
    pub start: Instant,
}

/// What a worker reports when its partition is done.
#[derive(Clone, Debug, Default)]
pub(crate) struct WorkerReport {
    /// In-vocabulary words read.
    pub words: u64,
    /// Words left after subsampling.
    pub effective_words: u64,
    pub sentences: u64,
    pub alpha: real,
    pub loss: f64,
    /// Every record of the partition was read.
    pub finished: bool,
}

struct Worker<'a, L> {
    shared: &'a Shared<'a, L>,
    partition: Partition,
    epoch: usize,
    rng: Rng,
    alpha: real,
    /// This worker's share of one epoch's words.
    expected_words: u64,
    /// Words counted but not yet added to `shared.words_done`.
    unreported: u64,
    report: WorkerReport,
    /// Hidden layer: the center vector, or the combined context.
    hidden: Vec<real>,
    /// Error accumulated for the input side.
    error: Vec<real>,
    /// The current sentence, as vocabulary indices, after subsampling.
    sen: Vec<usize>,
    /// Document row of the current record.
    doc: Option<usize>,
}

/// Train on one partition for one epoch.
pub(crate) fn run<L: OutputLayer>(
    shared: &Shared<'_, L>,
    partition: Partition,
    epoch: usize,
) -> Result<WorkerReport> {
    let config = shared.config;
    let corpus_size = shared.corpus.size().max(1);
    let expected_words = (shared.vocab.retained_words() as u128 * partition.len() as u128
        / corpus_size as u128) as u64;
    let seed = config
        .seed
        .wrapping_add((partition.index + epoch * config.workers) as u64);

    let mut worker = Worker {
        shared,
        partition,
        epoch,
        rng: Rng(seed),
        alpha: shared.schedule.at(epoch, 0, expected_words),
        expected_words,
        unreported: 0,
        report: WorkerReport::default(),
        hidden: vec![0.0; config.dimensionality],
        error: vec![0.0; config.dimensionality],
        sen: Vec::with_capacity(config.max_sentence_length.min(10_000)),
        doc: None,
    };

    let reader = shared.corpus.reader(partition)?;
    worker.report.finished = worker.stream(reader).map_err(|source| Error::CorpusRead {
        partition: partition.index,
        source,
    })?;
    worker.flush();
    worker.report.alpha = worker.alpha;
    debug!(
        "partition {} done: {} words, {} sentences, alpha {}",
        partition.index, worker.report.words, worker.report.sentences, worker.alpha
    );
    Ok(worker.report)
}

impl<L: OutputLayer> Worker<'_, L> {
    /// Train on every record of the partition, or until the stop signal is
    /// raised. Returns whether the partition was exhausted.
    fn stream(&mut self, mut reader: PartitionReader) -> std::io::Result<bool> {
        let vocab = self.shared.vocab;
        let max_len = self.shared.config.max_sentence_length;
        let mut next_doc = self
            .shared
            .doc_starts
            .get(self.partition.index)
            .map(|&start| start as usize);
        let mut record = Vec::new();

        loop {
            if reader.is_exhausted() {
                return Ok(true);
            }
            if self.shared.stop.is_raised() {
                return Ok(false);
            }
            if !reader.next_record(&mut record)? {
                return Ok(true);
            }
            self.report.sentences += 1;
            self.doc = next_doc;
            next_doc = next_doc.map(|d| d + 1);

            let text = String::from_utf8_lossy(&record);
            self.sen.clear();
            for token in tokenize(&text) {
                // Unknown words are skipped.
                let Some(word) = vocab.index_of(token) else {
                    continue;
                };
                let word = word as usize;
                self.count_word();

                // The subsampling randomly discards frequent words while keeping the ranking same
                let keep = vocab.entry(word).keep_probability;
                if keep < 1.0 && keep < self.rng.rand_real() {
                    continue;
                }
                self.sen.push(word);
                if self.sen.len() >= max_len {
                    self.train_sentence();
                    self.sen.clear();
                }
            }
            self.train_sentence();
            self.check_budget();
        }
    }

    /// Raise the stop signal once the run's word budget is used up.
    fn check_budget(&self) {
        let shared = self.shared;
        if let Some(budget) = shared.config.word_budget {
            let published = shared.words_done.load(Ordering::Relaxed);
            if published + self.unreported >= budget {
                shared.stop.raise();
            }
        }
    }

    fn count_word(&mut self) {
        self.report.words += 1;
        self.unreported += 1;
        if self.unreported >= REPORT_INTERVAL {
            self.flush();
        }
    }

    /// Publish progress and recompute the learning rate.
    fn flush(&mut self) {
        let shared = self.shared;
        let n = self.unreported;
        self.unreported = 0;
        let words_done = shared.words_done.fetch_add(n, Ordering::Relaxed) + n;

        self.alpha = shared
            .schedule
            .at(self.epoch, self.report.words, self.expected_words);

        (shared.on_progress)(&Progress {
            epoch: self.epoch,
            partition: self.partition.index,
            words_done,
            total_words: shared.vocab.retained_words() * shared.config.epochs as u64,
            alpha: self.alpha,
            words_per_sec: words_done as f64 / shared.start.elapsed().as_secs_f64().max(1e-3),
        });
    }

    fn train_sentence(&mut self) {
        if self.sen.is_empty() {
            return;
        }
        self.report.effective_words += self.sen.len() as u64;
        match self.shared.config.architecture {
            Architecture::SkipGram => self.train_skip_gram(),
            Architecture::Cbow => self.train_cbow(),
        }
        if let Some(doc) = self.doc {
            self.train_document(doc);
        }
    }

    /// Context window around `pos`, shrunk to a random radius in
    /// `1..=window`.
    fn window(&mut self, pos: usize) -> std::ops::Range<usize> {
        let window = self.shared.config.window;
        let radius = window - self.rng.below(window);
        pos.saturating_sub(radius)..(pos + radius + 1).min(self.sen.len())
    }

    fn train_skip_gram(&mut self) {
        let params = self.shared.params;
        let layer = self.shared.layer;
        for pos in 0..self.sen.len() {
            let center = self.sen[pos];
            for c in self.window(pos) {
                if c == pos {
                    continue;
                }
                let context = self.sen[c];
                params.input.read_row(center, &mut self.hidden);
                self.error.fill(0.0);
                self.report.loss += layer.update(
                    &params.output,
                    &self.hidden,
                    context,
                    self.alpha,
                    &mut self.rng,
                    &mut self.error,
                ) as f64;
                // Learn weights input -> hidden
                params.input.add_to_row(center, &self.error);
            }
        }
    }

    /// PV-DBOW: the document vector predicts each of the record's words.
    fn train_document(&mut self, doc: usize) {
        let params = self.shared.params;
        let layer = self.shared.layer;
        for pos in 0..self.sen.len() {
            params.documents.read_row(doc, &mut self.hidden);
            self.error.fill(0.0);
            self.report.loss += layer.update(
                &params.output,
                &self.hidden,
                self.sen[pos],
                self.alpha,
                &mut self.rng,
                &mut self.error,
            ) as f64;
            params.documents.add_to_row(doc, &self.error);
        }
    }

    fn train_cbow(&mut self) {
        let params = self.shared.params;
        let layer = self.shared.layer;
        let cbow_mean = self.shared.config.cbow_mean;
        for pos in 0..self.sen.len() {
            let center = self.sen[pos];
            let window = self.window(pos);

            // in -> hidden
            self.hidden.fill(0.0);
            let mut count = 0;
            for c in window.clone() {
                if c != pos {
                    params.input.accumulate_row(self.sen[c], 1.0, &mut self.hidden);
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }
            let inv_count = 1.0 / count as real;
            if cbow_mean {
                self.hidden.iter_mut().for_each(|h| *h *= inv_count);
            }

            self.error.fill(0.0);
            self.report.loss += layer.update(
                &params.output,
                &self.hidden,
                center,
                self.alpha,
                &mut self.rng,
                &mut self.error,
            ) as f64;
            if !cbow_mean {
                // divide the error over the summed context vectors
                self.error.iter_mut().for_each(|e| *e *= inv_count);
            }

            // hidden -> in
            for c in window {
                if c != pos {
                    params.input.add_to_row(self.sen[c], &self.error);
                }
            }
        }
    }
}
