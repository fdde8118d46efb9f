//! Huffman tree over the vocabulary, for hierarchical softmax.
//!
//! Nodes live in flat arrays. Nodes `0..n` are the leaves (vocabulary
//! indices); `n..2n-1` are inner nodes, created in order of increasing
//! weight, so the root is the last one.

/// Larger than any real count, for inner nodes not yet built.
const UNBUILT: u64 = 1_000_000_000_000_000;

pub struct HuffmanTree {
    leaves: usize,
    /// `parent[i]` is the node that has `i` as a child.
    parent: Vec<usize>,
    /// Which child a node is of its parent (0 or 1).
    binary: Vec<u8>,
}

impl HuffmanTree {
    /// Build the tree. `counts` must be sorted in non-increasing order, which
    /// lets the two-queue construction run in linear time.
    pub fn new(counts: impl IntoIterator<Item = u64>) -> Self {
        let mut count: Vec<u64> = counts.into_iter().collect();
        let n = count.len();
        debug_assert!(count.windows(2).all(|w| w[0] >= w[1]));

        let nodes = (2 * n).saturating_sub(1);
        count.resize(nodes.max(n) + 1, UNBUILT);
        let mut parent = vec![0usize; nodes];
        let mut binary = vec![0u8; nodes];

        // `pos1` walks the leaves from rarest to most frequent, `pos2` walks
        // the inner nodes in creation order.
        let mut pos1 = n;
        let mut pos2 = n;
        for a in 0..n.saturating_sub(1) {
            let mut smallest = || {
                if pos1 > 0 && count[pos1 - 1] < count[pos2] {
                    pos1 -= 1;
                    pos1
                } else {
                    pos2 += 1;
                    pos2 - 1
                }
            };
            let min1 = smallest();
            let min2 = smallest();

            count[n + a] = count[min1] + count[min2];
            parent[min1] = n + a;
            parent[min2] = n + a;
            binary[min2] = 1;
        }

        HuffmanTree {
            leaves: n,
            parent,
            binary,
        }
    }

    pub fn inner_nodes(&self) -> usize {
        self.leaves.saturating_sub(1)
    }

    /// Code and inner-node path for leaf `leaf`, both ordered root first.
    ///
    /// Inner nodes are numbered from 0, so `point` values index the
    /// hierarchical-softmax weight matrix directly; the root is
    /// `inner_nodes() - 1`. A single-word vocabulary has an empty path.
    pub fn path(&self, leaf: usize) -> (Vec<u8>, Vec<u32>) {
        assert!(leaf < self.leaves);
        let root = 2 * self.leaves - 2;
        let mut code = vec![];
        let mut point = vec![];
        let mut node = leaf;
        while node != root {
            code.push(self.binary[node]);
            node = self.parent[node];
            point.push((node - self.leaves) as u32);
        }
        code.reverse();
        point.reverse();
        (code, point)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn codes(counts: &[u64]) -> Vec<(Vec<u8>, Vec<u32>)> {
        let tree = HuffmanTree::new(counts.iter().copied());
        (0..counts.len()).map(|i| tree.path(i)).collect()
    }

    #[test]
    fn single_word_has_empty_path() {
        let tree = HuffmanTree::new([42]);
        assert_eq!(tree.inner_nodes(), 0);
        assert_eq!(tree.path(0), (vec![], vec![]));
    }

    #[test]
    fn two_words_split_at_the_root() {
        let paths = codes(&[10, 3]);
        assert_eq!(paths[0].1, [0]);
        assert_eq!(paths[1].1, [0]);
        assert_ne!(paths[0].0, paths[1].0);
    }

    #[test]
    fn small_tree_matches_hand_computed_codes() {
        // 3+2 -> inner node 0 (weight 5), then 5+5 -> inner node 1, the root.
        let paths = codes(&[5, 3, 2]);
        assert_eq!(paths[0], (vec![1], vec![1]));
        assert_eq!(paths[1], (vec![0, 1], vec![1, 0]));
        assert_eq!(paths[2], (vec![0, 0], vec![1, 0]));
    }

    #[test]
    fn codes_are_unique_and_prefix_free() {
        let counts: Vec<u64> = (0..500u64).map(|i| 100_000 / (i + 1)).collect();
        let paths = codes(&counts);
        let unique: HashSet<&Vec<u8>> = paths.iter().map(|(code, _)| code).collect();
        assert_eq!(unique.len(), counts.len());

        // A full binary tree satisfies Kraft's equality exactly.
        let kraft: f64 = paths.iter().map(|(c, _)| 0.5f64.powi(c.len() as i32)).sum();
        assert!((kraft - 1.0).abs() < 1e-9, "kraft sum {kraft}");

        for (i, (a, _)) in paths.iter().enumerate() {
            for (j, (b, _)) in paths.iter().enumerate() {
                if i != j {
                    assert!(!b.starts_with(a), "code {i} is a prefix of code {j}");
                }
            }
        }
    }

    #[test]
    fn every_path_starts_at_the_root() {
        let counts: Vec<u64> = (0..64u64).map(|i| 1000 - i * 10).collect();
        let tree = HuffmanTree::new(counts.iter().copied());
        let root = (tree.inner_nodes() - 1) as u32;
        for i in 0..counts.len() {
            let (code, point) = tree.path(i);
            assert_eq!(code.len(), point.len());
            assert_eq!(point[0], root);
            assert!(point.iter().all(|&p| (p as usize) < tree.inner_nodes()));
        }
    }

    #[test]
    fn zipfian_depths_are_logarithmic() {
        let v = 10_000u64;
        let counts: Vec<u64> = (0..v).map(|i| 10_000_000 / (i + 1)).collect();
        let tree = HuffmanTree::new(counts.iter().copied());
        let lengths: Vec<usize> = (0..v as usize).map(|i| tree.path(i).0.len()).collect();
        let min = *lengths.iter().min().unwrap();
        let max = *lengths.iter().max().unwrap();
        let log_v = (v as f64).log2().ceil() as usize;
        assert!(min >= 1);
        assert!(max - min <= 2 * log_v, "depths {min}..={max} for V={v}");
        // Frequent words get short codes.
        assert!(lengths[0] <= lengths[v as usize - 1]);
    }
}
