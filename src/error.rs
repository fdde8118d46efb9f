use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while building a vocabulary or training.
#[derive(Error, Debug)]
pub enum Error {
    /// Every token was pruned by `min_count` (or the corpus was empty).
    #[error("vocabulary is empty after pruning")]
    EmptyVocabulary,

    /// An option is out of range. Raised before anything is allocated.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The corpus file could not be opened, sized or scanned.
    #[error("error reading corpus file {path:?}")]
    Corpus {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O failure while a worker was streaming its partition.
    #[error("error reading corpus partition {partition}")]
    CorpusRead {
        partition: usize,
        #[source]
        source: io::Error,
    },

    #[error("parameter matrix allocation failed: {0}")]
    Allocation(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
