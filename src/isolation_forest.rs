//! Isolation forest outlier scoring.
//!
//! Scores follow the usual convention: `score_samples` is the negated
//! anomaly score, so lower values are more anomalous, and `predict` returns
//! -1 for outliers and 1 for inliers.
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::utils::percentile;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
pub struct IsolationForest {
    pub n_estimators: usize,
    /// Upper bound on the per-tree subsample size
    pub max_samples: usize,
    /// Expected outlier fraction, sets the decision threshold
    pub contamination: f64,
    pub seed: u64,
}

impl IsolationForest {
    pub fn new(contamination: f64, seed: u64) -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination,
            seed,
        }
    }

    pub fn fit(&self, data: &[Vec<f64>]) -> Result<FittedForest> {
        let n_features = check_matrix(data)?;
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            anyhow::bail!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            );
        }

        let n = data.len();
        let sample_size = self.max_samples.min(n).max(1);
        let max_depth = (sample_size as f64).log2().ceil().max(0.0) as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees = (0..self.n_estimators)
            .map(|_| {
                let indices = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                let mut tree = IsolationTree { nodes: Vec::new() };
                tree.grow(data, indices, 0, max_depth, n_features, &mut rng);
                tree
            })
            .collect();

        let mut forest = FittedForest {
            trees,
            sample_size,
            n_features,
            offset: 0.0,
        };
        let training_scores = forest.score_samples(data)?;
        forest.offset = percentile(&training_scores, 100.0 * self.contamination);
        Ok(forest)
    }

    /// Fit, then return (`score_samples`, `predict`) for the training data
    pub fn fit_predict(&self, data: &[Vec<f64>]) -> Result<(Vec<f64>, Vec<i8>)> {
        let forest = self.fit(data)?;
        let scores = forest.score_samples(data)?;
        let labels = scores
            .iter()
            .map(|&s| if s < forest.offset { -1 } else { 1 })
            .collect();
        Ok((scores, labels))
    }
}

fn check_matrix(data: &[Vec<f64>]) -> Result<usize> {
    let first = data
        .first()
        .ok_or_else(|| anyhow::anyhow!("cannot fit an isolation forest on zero samples"))?;
    let n_features = first.len();
    if n_features == 0 {
        anyhow::bail!("samples have no features");
    }
    if let Some(bad) = data.iter().position(|row| row.len() != n_features) {
        anyhow::bail!(
            "sample {} has {} features, expected {}",
            bad,
            data[bad].len(),
            n_features
        );
    }
    Ok(n_features)
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// Grow a subtree over `indices`, returning its node id
    fn grow(
        &mut self,
        data: &[Vec<f64>],
        indices: Vec<usize>,
        depth: usize,
        max_depth: usize,
        n_features: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            size: indices.len(),
        });
        if depth >= max_depth || indices.len() <= 1 {
            return id;
        }

        // Visit features in random order until one is not constant here
        let mut order: Vec<usize> = (0..n_features).collect();
        for i in (1..order.len()).rev() {
            order.swap(i, rng.gen_range(0..=i));
        }
        let split = order.into_iter().find_map(|feature| {
            let (lo, hi) = indices
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(data[i][feature]), hi.max(data[i][feature]))
                });
            (hi > lo).then_some((feature, lo, hi))
        });
        let Some((feature, lo, hi)) = split else {
            return id;
        };

        let mut threshold = rng.gen_range(lo..hi);
        if threshold <= lo {
            threshold = (lo + hi) / 2.0;
        }
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| data[i][feature] < threshold);

        let left = self.grow(data, left_idx, depth + 1, max_depth, n_features, rng);
        let right = self.grow(data, right_idx, depth + 1, max_depth, n_features, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[feature] < threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(size),
            }
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
pub struct FittedForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    offset: f64,
}

impl FittedForest {
    /// Threshold below which a sample is an outlier
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn score_samples(&self, data: &[Vec<f64>]) -> Result<Vec<f64>> {
        if let Some(bad) = data.iter().position(|row| row.len() != self.n_features) {
            anyhow::bail!(
                "sample {} has {} features, model was fit with {}",
                bad,
                data[bad].len(),
                self.n_features
            );
        }
        let norm = average_path_length(self.sample_size).max(f64::MIN_POSITIVE);
        Ok(data
            .iter()
            .map(|row| {
                let mean_depth = self
                    .trees
                    .iter()
                    .map(|tree| tree.path_length(row))
                    .sum::<f64>()
                    / self.trees.len().max(1) as f64;
                -(2f64.powf(-mean_depth / norm))
            })
            .collect())
    }

    pub fn predict(&self, data: &[Vec<f64>]) -> Result<Vec<i8>> {
        Ok(self
            .score_samples(data)?
            .into_iter()
            .map(|s| if s < self.offset { -1 } else { 1 })
            .collect())
    }
}

/// Replace NaN and infinities by zero before scoring
pub fn sanitize_features(rows: &mut [Vec<f64>]) {
    for v in rows.iter_mut().flat_map(|row| row.iter_mut()) {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn cluster_with_outliers() -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(9);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut rows: Vec<Vec<f64>> = (0..200)
            .map(|_| (0..3).map(|_| normal.sample(&mut rng)).collect())
            .collect();
        rows.push(vec![12.0, -11.0, 10.0]);
        rows.push(vec![-9.0, 14.0, -12.0]);
        rows
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.2448).abs() < 1e-3, "{}", c256);
    }

    #[test]
    fn test_outliers_score_lowest() {
        let data = cluster_with_outliers();
        let (scores, labels) = IsolationForest::new(0.05, 42).fit_predict(&data).unwrap();
        let n = data.len();

        let max_inlier = scores[..n - 2].iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(scores[n - 1] < max_inlier);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
        assert!(order[..2].contains(&(n - 1)));
        assert!(order[..2].contains(&(n - 2)));

        assert_eq!(labels[n - 1], -1);
        assert_eq!(labels[n - 2], -1);
        let outliers = labels.iter().filter(|&&l| l == -1).count();
        // About 5% of 202 samples
        assert!((8..=13).contains(&outliers), "{}", outliers);
        assert!(scores.iter().all(|s| (-1.0..0.0).contains(s)));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let data = cluster_with_outliers();
        let a = IsolationForest::new(0.1, 7).fit(&data).unwrap();
        let b = IsolationForest::new(0.1, 7).fit(&data).unwrap();
        assert_eq!(a.score_samples(&data).unwrap(), b.score_samples(&data).unwrap());
        assert_eq!(a.offset(), b.offset());
        assert_eq!(a.predict(&data).unwrap().len(), data.len());
    }

    #[test]
    fn test_constant_data_does_not_split() {
        let data = vec![vec![1.0, 2.0]; 20];
        let (scores, _) = IsolationForest::new(0.1, 1).fit_predict(&data).unwrap();
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(IsolationForest::new(0.1, 1).fit(&[]).is_err());
        assert!(IsolationForest::new(0.1, 1)
            .fit(&[vec![1.0, 2.0], vec![1.0]])
            .is_err());
        assert!(IsolationForest::new(0.0, 1).fit(&[vec![1.0]]).is_err());

        let forest = IsolationForest::new(0.1, 1)
            .fit(&[vec![1.0, 2.0], vec![3.0, 4.0]])
            .unwrap();
        assert!(forest.score_samples(&[vec![1.0]]).is_err());
    }

    #[test]
    fn test_sanitize_features() {
        let mut rows = vec![vec![f64::NAN, 1.0], vec![f64::INFINITY, f64::NEG_INFINITY]];
        sanitize_features(&mut rows);
        assert_eq!(rows, vec![vec![0.0, 1.0], vec![0.0, 0.0]]);
    }
}
