use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use corpus2vec::params::Matrix;
use corpus2vec::{real, Architecture, Config, CorpusFile, Trainer, Vocabulary};

#[derive(Parser)]
#[command(about = "Train word vectors on a line-delimited text corpus", long_about = None)]
struct Options {
    /// Use text data from FILE to train the model
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Use FILE to save the resulting word vectors
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Set size of word vectors
    #[arg(long = "size", default_value_t = 100)]
    dimensionality: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; default
    /// is 1e-3, useful range is (0, 1e-5)
    #[arg(long, default_value_t = 1e-3)]
    sample: real,

    /// Number of negative examples; common values are 3 - 10 (0 = use hierarchical softmax)
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Use N threads
    #[arg(long = "threads", value_name = "N", default_value_t = 12)]
    num_threads: usize,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Set the starting learning rate; default is 0.025 for skip-gram and 0.05 for CBOW
    #[arg(long)]
    alpha: Option<real>,

    /// The learning rate decays linearly to this value
    #[arg(long, default_value_t = 0.0001)]
    min_alpha: real,

    /// Use the continuous bag of words model (otherwise, use skip-gram model)
    #[arg(long)]
    cbow: bool,

    /// CBOW: sum the context vectors instead of averaging them
    #[arg(long)]
    cbow_sum: bool,

    /// Random seed
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Prune the vocabulary while scanning whenever it exceeds N words
    #[arg(long = "max-vocab-size", value_name = "N")]
    max_vocab_size: Option<usize>,

    /// Track and report the training loss
    #[arg(long)]
    compute_loss: bool,

    /// Save the resulting vectors in binary mode
    #[arg(long)]
    binary: bool,

    /// The vocabulary will be saved to FILE
    #[arg(long = "save-vocab", value_name = "FILE")]
    save_vocab_file: Option<PathBuf>,

    /// The vocabulary will be read from FILE, not constructed from the training data
    #[arg(long = "read-vocab", value_name = "FILE")]
    read_vocab_file: Option<PathBuf>,

    /// Also train one vector per line of the training file and save them to FILE
    #[arg(long = "doc-output", value_name = "FILE")]
    doc_output_file: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, action = ArgAction::Count)]
    quiet: u8,
}

impl Options {
    fn config(&self) -> Config {
        Config {
            dimensionality: self.dimensionality,
            window: self.window,
            min_count: self.min_count,
            sample_threshold: self.sample,
            negative_samples: self.negative,
            workers: self.num_threads,
            epochs: self.iter,
            initial_learning_rate: self.alpha,
            min_learning_rate: self.min_alpha,
            architecture: if self.cbow {
                Architecture::Cbow
            } else {
                Architecture::SkipGram
            },
            cbow_mean: !self.cbow_sum,
            seed: self.seed,
            max_vocab_size: self.max_vocab_size,
            compute_loss: self.compute_loss,
            document_vectors: self.doc_output_file.is_some(),
            ..Config::default()
        }
    }

    fn log_level(&self) -> &'static str {
        match self.verbose as i32 - self.quiet as i32 {
            i32::MIN..=-2 => "error",
            -1 => "warn",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn read_vocab(vocab_file: &Path, config: &Config) -> Result<Vocabulary> {
    let fin = BufReader::new(File::open(vocab_file).context("error opening vocabulary file")?);
    let mut counts = vec![];
    for (line_num, line) in fin.lines().enumerate() {
        let line = line.context("error reading vocabulary file")?;
        let fields = line.split_whitespace().collect::<Vec<&str>>();
        anyhow::ensure!(
            fields.len() == 2,
            "vocabulary file syntax error on line {}",
            line_num + 1
        );
        let count = fields[1].parse::<u64>().with_context(|| {
            format!(
                "error reading vocabulary file: unrecognized frequency number format on line {}",
                line_num + 1
            )
        })?;
        counts.push((fields[0].to_string(), count));
    }
    Ok(Vocabulary::from_counts(
        counts,
        config.min_count,
        config.sample_threshold,
    )?)
}

fn save_vocab(vocab: &Vocabulary, vocab_file: &Path) -> Result<()> {
    let mut fo =
        BufWriter::new(File::create(vocab_file).context("error creating vocab file for write")?);
    for entry in vocab.entries() {
        writeln!(fo, "{} {}", entry.word, entry.count).context("error writing vocab file")?;
    }
    fo.flush().context("error writing vocab file")?;
    Ok(())
}

/// Write one labelled vector per row of `vectors`, in word2vec format.
fn save_vectors<'a>(
    vectors: &Matrix,
    labels: impl ExactSizeIterator<Item = Cow<'a, str>>,
    output_file: &Path,
    binary: bool,
) -> Result<()> {
    let mut fo =
        BufWriter::new(File::create(output_file).context("error creating output file")?);
    writeln!(fo, "{} {}", labels.len(), vectors.cols()).context("error writing output file")?;
    for (a, label) in labels.enumerate() {
        write!(fo, "{label} ").context("error writing output file")?;
        let word_vec = vectors.row_vec(a);
        if binary {
            fo.write_all(bytemuck::cast_slice::<real, u8>(&word_vec))
                .context("error writing output file")?;
        } else {
            for f in word_vec {
                write!(fo, "{f} ").context("error writing output file")?;
            }
        }
        writeln!(fo).context("error writing output file")?;
    }
    fo.flush().context("error writing output file")?;
    Ok(())
}

fn run(options: &Options) -> Result<()> {
    let trainer = Trainer::new(options.config())?;
    let corpus = CorpusFile::open(&options.train_file)?;

    info!("Starting training using file {}", options.train_file.display());
    let vocab = match &options.read_vocab_file {
        Some(f) => read_vocab(f, trainer.config())?,
        None => trainer.build_vocab_from_corpus(&corpus)?,
    };
    info!("Vocab size: {}", vocab.len());
    info!("Words in train file: {}", vocab.retained_words());
    if let Some(f) = &options.save_vocab_file {
        save_vocab(&vocab, f)?;
    }

    let total = vocab.retained_words() * options.iter as u64;
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40} {percent:>3}% [{elapsed_precise}<{eta_precise}] {msg}",
        )
        .context("bad progress template")?,
    );
    let model = trainer.train_with_progress(vocab, &corpus, |p| {
        bar.set_position(p.words_done.min(total));
        bar.set_message(format!(
            "Alpha: {:.6}  Words/sec: {:.2}k",
            p.alpha,
            p.words_per_sec / 1000.0
        ));
    })?;
    bar.finish_and_clear();

    let stats = model.stats();
    if stats.documents > 0 {
        info!("{} document vectors", stats.documents);
    }
    info!(
        "{} words ({} after subsampling) in {:.1}s, final alpha {:.6}",
        stats.words,
        stats.effective_words,
        stats.elapsed.as_secs_f64(),
        stats.final_learning_rate
    );
    if let Some(loss) = stats.loss {
        info!("training loss: {loss:.3}");
    }

    let words = model.vocab().entries().iter().map(|e| Cow::from(e.word.as_str()));
    save_vectors(model.embeddings(), words, &options.output_file, options.binary)?;
    if let Some(f) = &options.doc_output_file {
        let docs = (0..model.documents().rows()).map(|i| Cow::from(format!("doc{i}")));
        save_vectors(model.documents(), docs, f, options.binary)?;
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(options.log_level())).init();

    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
