//! Streaming access to a line-delimited corpus file.
//!
//! Each line is one record (sentence); tokens are separated by ASCII
//! whitespace. For parallel training the file is cut into byte ranges, and
//! every worker opens its own handle and seeks to its range.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A contiguous byte range of the corpus assigned to one worker for one
/// epoch.
///
/// The boundaries are soft: a record belongs to the partition that contains
/// its first byte, and is read in full even when it runs past `end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub start: u64,
    pub end: u64,
    pub index: usize,
}

impl Partition {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `file_size` bytes into up to `workers` near-equal ranges.
///
/// Deterministic in its arguments. A file with fewer bytes than workers gets
/// one partition per byte; an empty file gets none.
pub fn partition(file_size: u64, workers: usize) -> Vec<Partition> {
    let n = (workers as u64).min(file_size);
    (0..n)
        .map(|i| Partition {
            start: file_size * i / n,
            end: file_size * (i + 1) / n,
            index: i as usize,
        })
        .collect()
}

/// Split a record into tokens.
pub fn tokenize(record: &str) -> impl Iterator<Item = &str> {
    record.split_ascii_whitespace()
}

#[derive(Clone, Debug)]
pub struct CorpusFile {
    path: PathBuf,
    size: u64,
}

impl CorpusFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)
            .map_err(|source| Error::Corpus {
                path: path.clone(),
                source,
            })?
            .len();
        Ok(CorpusFile { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes, as of `open`.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn partitions(&self, workers: usize) -> Vec<Partition> {
        partition(self.size, workers)
    }

    /// Stream the whole file as sentences, for building the vocabulary.
    pub fn sentences(&self, max_sentence_length: usize) -> Result<LineSentences> {
        let file = File::open(&self.path).map_err(|source| Error::Corpus {
            path: self.path.clone(),
            source,
        })?;
        Ok(LineSentences::new(BufReader::new(file), max_sentence_length))
    }

    /// Number the records of the file by line and find, for each partition,
    /// the number of its first record. Also returns the total record count.
    ///
    /// Ownership follows `PartitionReader`: a record belongs to the partition
    /// holding its first byte.
    pub fn record_starts(&self, partitions: &[Partition]) -> Result<(Vec<u64>, u64)> {
        let corpus_err = |source| Error::Corpus {
            path: self.path.clone(),
            source,
        };
        let mut reader = BufReader::new(File::open(&self.path).map_err(corpus_err)?);
        let mut owned = vec![0u64; partitions.len()];
        let mut offset = 0;
        let mut p = 0;
        let mut line = vec![];
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).map_err(corpus_err)?;
            if n == 0 {
                break;
            }
            while p < partitions.len() && offset >= partitions[p].end {
                p += 1;
            }
            if p == partitions.len() {
                // The file grew after it was opened.
                break;
            }
            owned[p] += 1;
            offset += n as u64;
        }

        let mut starts = Vec::with_capacity(owned.len());
        let mut total = 0;
        for n in owned {
            starts.push(total);
            total += n;
        }
        Ok((starts, total))
    }

    /// Open an independent reader positioned at the first record of
    /// `partition`.
    pub fn reader(&self, partition: Partition) -> Result<PartitionReader> {
        PartitionReader::open(&self.path, partition).map_err(|source| Error::CorpusRead {
            partition: partition.index,
            source,
        })
    }
}

/// Reads the records that start inside one partition.
pub struct PartitionReader {
    file: BufReader<File>,
    /// Byte offset of the next unread byte.
    position: u64,
    end: u64,
}

impl PartitionReader {
    fn open(path: &Path, partition: Partition) -> io::Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let mut position = partition.start;
        if partition.start > 0 {
            // Skip the tail of the record that started in an earlier
            // partition. If byte `start - 1` is a newline, nothing is skipped.
            file.seek(SeekFrom::Start(partition.start - 1))?;
            let mut skipped = vec![];
            let n = file.read_until(b'\n', &mut skipped)?;
            position = partition.start - 1 + n as u64;
        }
        Ok(PartitionReader {
            file,
            position,
            end: partition.end,
        })
    }

    /// Read the next record into `buf` (without its line terminator).
    /// Returns `false` once the partition is exhausted.
    pub fn next_record(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        buf.clear();
        if self.is_exhausted() {
            return Ok(false);
        }
        let n = self.file.read_until(b'\n', buf)?;
        if n == 0 {
            return Ok(false);
        }
        self.position += n as u64;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(true)
    }

    /// True once every record starting inside the partition has been read.
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.end
    }
}

/// Iterator over the sentences of a line-delimited text stream.
///
/// Lines longer than `max_sentence_length` tokens are split into chunks.
/// Empty lines produce no sentence.
pub struct LineSentences<R = BufReader<File>> {
    reader: R,
    max_sentence_length: usize,
    line: Vec<u8>,
    pending: std::vec::IntoIter<Vec<String>>,
}

impl<R: BufRead> LineSentences<R> {
    pub fn new(reader: R, max_sentence_length: usize) -> Self {
        LineSentences {
            reader,
            max_sentence_length: max_sentence_length.max(1),
            line: vec![],
            pending: Vec::new().into_iter(),
        }
    }
}

impl<R: BufRead> Iterator for LineSentences<R> {
    type Item = io::Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sentence) = self.pending.next() {
                return Some(Ok(sentence));
            }
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(err)),
            }
            let text = String::from_utf8_lossy(&self.line);
            let words: Vec<String> = tokenize(&text).map(str::to_string).collect();
            self.pending = words
                .chunks(self.max_sentence_length)
                .map(<[String]>::to_vec)
                .collect::<Vec<_>>()
                .into_iter();
        }
    }
}
