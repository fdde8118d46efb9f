//! The shared weight matrices.
//!
//! Every worker thread reads and writes these concurrently with no locking.
//! Elements are stored as `AtomicU32` bit patterns and accessed with
//! `Relaxed` ordering; an "add" is a plain load followed by a plain store, so
//! concurrent adds to the same element can lose updates. Training tolerates
//! that noise (this is the Hogwild! scheme), and nothing here tries to
//! detect or prevent it.

use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;

use crate::{real, Error, Result, Rng};

const ALIGNMENT: usize = 128;

#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    #[inline]
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// A dense row-major matrix that can be updated through a shared reference.
pub struct Matrix {
    rows: usize,
    cols: usize,
    /// `data[k * cols..(k+1) * cols]` is row `k`.
    data: AlignedBox<[Real]>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        // The allocator rejects zero-sized layouts; keep at least one element.
        let data = AlignedBox::slice_from_default(ALIGNMENT, (rows * cols).max(1))
            .map_err(|err| Error::Allocation(format!("{rows}x{cols}: {err:?}")))?;
        Ok(Matrix { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[Real] {
        &self.data[i * self.cols..][..self.cols]
    }

    /// Copy row `i` into `out`.
    #[inline]
    pub fn read_row(&self, i: usize, out: &mut [real]) {
        for (o, x) in out.iter_mut().zip(self.row(i)) {
            *o = x.get();
        }
    }

    pub fn row_vec(&self, i: usize) -> Vec<real> {
        self.row(i).iter().map(Real::get).collect()
    }

    #[inline]
    pub fn dot_row(&self, i: usize, v: &[real]) -> real {
        self.row(i).iter().zip(v).map(|(x, &y)| x.get() * y).sum()
    }

    /// `row[i] += v`
    #[inline]
    pub fn add_to_row(&self, i: usize, v: &[real]) {
        for (x, &y) in self.row(i).iter().zip(v) {
            x.add(y);
        }
    }

    /// `row[i] += g * v`
    #[inline]
    pub fn add_scaled_to_row(&self, i: usize, g: real, v: &[real]) {
        for (x, &y) in self.row(i).iter().zip(v) {
            x.add(g * y);
        }
    }

    /// `out += g * row[i]`
    #[inline]
    pub fn accumulate_row(&self, i: usize, g: real, out: &mut [real]) {
        for (o, x) in out.iter_mut().zip(self.row(i)) {
            *o += g * x.get();
        }
    }

    /// Snapshot of the whole matrix, row-major.
    pub fn to_vec(&self) -> Vec<real> {
        self.data[..self.rows * self.cols].iter().map(Real::get).collect()
    }
}

/// Input (word) vectors plus the output-layer weights.
pub struct ParameterStore {
    /// The learned word vectors, one row per vocabulary index.
    pub input: Matrix,
    /// Negative sampling: one row per vocabulary index. Hierarchical softmax:
    /// one row per inner node of the Huffman tree.
    pub output: Matrix,
    /// Document vectors, one row per corpus record. Empty unless document
    /// vectors are trained.
    pub documents: Matrix,
}

impl ParameterStore {
    /// Allocate the matrices. Input and document weights are uniform in
    /// `[-0.5 / dim, 0.5 / dim)`; output weights start at zero.
    pub fn new(
        vocab_size: usize,
        output_rows: usize,
        documents: usize,
        dim: usize,
        seed: u64,
    ) -> Result<Self> {
        let input = Matrix::zeros(vocab_size, dim)?;
        let output = Matrix::zeros(output_rows, dim)?;
        let documents = Matrix::zeros(documents, dim)?;

        let mut rng = Rng(seed);
        for m in [&input, &documents] {
            for x in &m.data[..m.rows * dim] {
                x.set((rng.rand_real() - 0.5) / dim as real);
            }
        }
        Ok(ParameterStore {
            input,
            output,
            documents,
        })
    }

    pub fn dim(&self) -> usize {
        self.input.cols()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn initial_weights_are_small_and_seeded() {
        let dim = 20;
        let a = ParameterStore::new(50, 49, 0, dim, 7).unwrap();
        let b = ParameterStore::new(50, 49, 0, dim, 7).unwrap();
        let limit = 0.5 / dim as real;
        let values = a.input.to_vec();
        assert_eq!(values.len(), 50 * dim);
        assert!(values.iter().all(|&x| (-limit..limit).contains(&x)));
        assert!(values.iter().any(|&x| x != 0.0));
        assert_eq!(values, b.input.to_vec());
        assert!(a.output.to_vec().iter().all(|&x| x == 0.0));
        assert_eq!(a.output.rows(), 49);
        assert_eq!(a.documents.rows(), 0);
    }

    #[test]
    fn document_rows_do_not_disturb_word_rows() {
        let words_only = ParameterStore::new(10, 10, 0, 8, 3).unwrap();
        let with_docs = ParameterStore::new(10, 10, 25, 8, 3).unwrap();
        assert_eq!(words_only.input.to_vec(), with_docs.input.to_vec());
        let docs = with_docs.documents.to_vec();
        assert_eq!(docs.len(), 25 * 8);
        assert!(docs.iter().all(|&x| x.abs() < 0.5 / 8.0));
        assert_ne!(with_docs.documents.row_vec(0), with_docs.documents.row_vec(1));
    }

    #[test]
    fn row_operations() {
        let m = Matrix::zeros(3, 4).unwrap();
        m.add_to_row(1, &[1.0, 2.0, 3.0, 4.0]);
        m.add_scaled_to_row(1, 0.5, &[2.0, 2.0, 2.0, 2.0]);
        assert_eq!(m.row_vec(1), [2.0, 3.0, 4.0, 5.0]);
        assert_eq!(m.row_vec(0), [0.0; 4]);
        assert_eq!(m.dot_row(1, &[1.0, 0.0, 0.0, 1.0]), 7.0);

        let mut out = [1.0; 4];
        m.accumulate_row(1, 2.0, &mut out);
        assert_eq!(out, [5.0, 7.0, 9.0, 11.0]);

        let mut row = [0.0; 4];
        m.read_row(1, &mut row);
        assert_eq!(row, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn empty_matrix_is_allowed() {
        let m = Matrix::zeros(0, 8).unwrap();
        assert_eq!(m.rows(), 0);
        assert!(m.to_vec().is_empty());
    }

    #[test]
    fn concurrent_updates_land_on_disjoint_rows() {
        let m = Matrix::zeros(8, 16).unwrap();
        thread::scope(|s| {
            for t in 0..8 {
                let m = &m;
                s.spawn(move || {
                    for _ in 0..1000 {
                        m.add_to_row(t, &[1.0; 16]);
                    }
                });
            }
        });
        for t in 0..8 {
            assert!(m.row_vec(t).iter().all(|&x| x == 1000.0));
        }
    }
}
