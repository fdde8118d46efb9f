//! Vocabulary construction: counting, pruning, sorting, subsampling rates.

use std::cmp::Reverse;
use std::collections::HashMap;

use log::{debug, info};

use crate::huffman::HuffmanTree;
use crate::{real, Error, Result};

/// One word of a frozen vocabulary.
#[derive(Clone, Debug)]
pub struct VocabEntry {
    pub word: String,
    pub count: u64,

    /// Probability that one occurrence of this word survives subsampling.
    pub keep_probability: real,

    /// Huffman code, root first. `code[d]` is the branch taken at inner node
    /// `point[d]`.
    pub code: Vec<u8>,
    pub point: Vec<u32>,
}

/// Counts tokens over one pass of a corpus.
#[derive(Debug, Default)]
pub struct VocabularyBuilder {
    /// Counting entries in first-seen order.
    words: Vec<(String, u64)>,
    index: HashMap<String, usize>,
    max_size: Option<usize>,
    min_reduce: u64,
    raw_words: u64,
    sentences: u64,
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        VocabularyBuilder {
            min_reduce: 1,
            ..Default::default()
        }
    }

    /// Keep at most `max_size` distinct words while scanning, by repeatedly
    /// discarding the rarest ones.
    pub fn with_max_size(mut self, max_size: Option<usize>) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn add_word(&mut self, word: &str) {
        self.raw_words += 1;
        if let Some(&i) = self.index.get(word) {
            self.words[i].1 += 1;
        } else {
            self.index.insert(word.to_string(), self.words.len());
            self.words.push((word.to_string(), 1));
            if let Some(max_size) = self.max_size {
                if self.words.len() > max_size {
                    self.reduce();
                }
            }
        }
    }

    pub fn add_sentence<I>(&mut self, sentence: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.sentences += 1;
        for word in sentence {
            self.add_word(word.as_ref());
        }
    }

    pub fn scan<S>(&mut self, sentences: S)
    where
        S: IntoIterator,
        S::Item: IntoIterator,
        <S::Item as IntoIterator>::Item: AsRef<str>,
    {
        for sentence in sentences {
            self.add_sentence(sentence);
            if self.sentences % 100_000 == 0 {
                debug!(
                    "scanned {} sentences, {} words, {} unique",
                    self.sentences,
                    self.raw_words,
                    self.words.len()
                );
            }
        }
    }

    /// Reduces the vocabulary by removing infrequent tokens
    fn reduce(&mut self) {
        let min_reduce = self.min_reduce;
        self.words.retain(|(_, count)| *count > min_reduce);
        self.index.clear();
        for (i, (word, _)) in self.words.iter().enumerate() {
            self.index.insert(word.clone(), i);
        }
        debug!(
            "pruned vocabulary to {} words with count > {min_reduce}",
            self.words.len()
        );
        self.min_reduce += 1;
    }

    pub fn raw_words(&self) -> u64 {
        self.raw_words
    }

    /// Apply `min_count`, sort by frequency and freeze.
    pub fn build(self, min_count: u64, sample_threshold: real) -> Result<Vocabulary> {
        let raw_words = self.raw_words;
        let sentences = self.sentences;
        let vocab = Vocabulary::from_counts(self.words, min_count, sample_threshold)?;
        info!(
            "vocabulary: {} words kept, {} of {} tokens retained, {} sentences",
            vocab.len(),
            vocab.retained_words,
            raw_words,
            sentences
        );
        Ok(Vocabulary {
            raw_words,
            sentences,
            ..vocab
        })
    }
}

/// A frozen vocabulary. Indices run from 0 (most frequent) to `len() - 1`.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    entries: Vec<VocabEntry>,
    index: HashMap<String, u32>,
    /// Sum of counts of the words kept.
    retained_words: u64,
    raw_words: u64,
    sentences: u64,
    /// Number of inner nodes in the Huffman tree.
    inner_nodes: usize,
}

impl Vocabulary {
    /// Build a vocabulary from `(word, count)` pairs given in first-seen
    /// order. Ties in count keep that order.
    pub fn from_counts<I>(counts: I, min_count: u64, sample_threshold: real) -> Result<Self>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut words: Vec<(String, u64)> = counts
            .into_iter()
            .filter(|&(_, count)| count > 0 && count >= min_count)
            .collect();
        if words.is_empty() {
            return Err(Error::EmptyVocabulary);
        }
        // Stable, so ties stay in first-seen order.
        words.sort_by_key(|&(_, count)| Reverse(count));

        let retained_words: u64 = words.iter().map(|(_, count)| count).sum();
        let threshold_count = sample_threshold as f64 * retained_words as f64;

        let mut index = HashMap::with_capacity(words.len());
        let mut entries = Vec::with_capacity(words.len());
        for (i, (word, count)) in words.into_iter().enumerate() {
            index.insert(word.clone(), i as u32);
            entries.push(VocabEntry {
                word,
                count,
                keep_probability: keep_probability(count, threshold_count),
                code: Vec::new(),
                point: Vec::new(),
            });
        }

        let tree = HuffmanTree::new(entries.iter().map(|e| e.count));
        for (i, entry) in entries.iter_mut().enumerate() {
            let (code, point) = tree.path(i);
            entry.code = code;
            entry.point = point;
        }

        Ok(Vocabulary {
            inner_nodes: tree.inner_nodes(),
            entries,
            index,
            retained_words,
            raw_words: retained_words,
            sentences: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns position of a word in the vocabulary; if the word is not found, returns None.
    pub fn index_of(&self, word: &str) -> Option<u32> {
        self.index.get(word).copied()
    }

    pub fn word(&self, index: usize) -> &str {
        &self.entries[index].word
    }

    pub fn entry(&self, index: usize) -> &VocabEntry {
        &self.entries[index]
    }

    pub fn entries(&self) -> &[VocabEntry] {
        &self.entries
    }

    pub fn retained_words(&self) -> u64 {
        self.retained_words
    }

    /// Total tokens scanned, including those that were later pruned.
    pub fn raw_words(&self) -> u64 {
        self.raw_words
    }

    pub fn sentences(&self) -> u64 {
        self.sentences
    }

    pub fn inner_nodes(&self) -> usize {
        self.inner_nodes
    }
}

/// Probability of keeping one occurrence of a word seen `count` times, where
/// `threshold_count` is the subsampling threshold times the corpus size.
fn keep_probability(count: u64, threshold_count: f64) -> real {
    if threshold_count <= 0.0 {
        return 1.0;
    }
    let f = count as f64;
    let p = ((f / threshold_count).sqrt() + 1.0) * threshold_count / f;
    p.min(1.0) as real
}
