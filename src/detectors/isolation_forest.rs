//! Isolation forest detector.
//!
//! Anomalies need fewer random axis-aligned cuts to isolate, so a short
//! average path length from root to leaf means an anomalous point.

use crate::config::IsolationForestConfig;
use crate::detectors::{
    check_contamination, percentile, require_finite, require_rows, AnomalyDetector,
    DetectorKind, DetectorOutput, Label,
};
use crate::error::DetectorError;
use crate::features::FeatureMatrix;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use tracing::debug;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Seeded isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
}

impl IsolationForest {
    pub fn new(n_estimators: usize, max_samples: usize, contamination: f64, seed: u64) -> Self {
        Self {
            n_estimators,
            max_samples,
            contamination,
            seed,
        }
    }

    pub fn from_config(config: &IsolationForestConfig) -> Self {
        Self::new(
            config.n_estimators,
            config.max_samples,
            config.contamination,
            config.seed,
        )
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::from_config(&IsolationForestConfig::default())
    }
}

impl AnomalyDetector for IsolationForest {
    fn kind(&self) -> DetectorKind {
        DetectorKind::IsolationForest
    }

    fn fit_score(&self, matrix: &FeatureMatrix) -> Result<DetectorOutput, DetectorError> {
        require_rows(matrix, 2)?;
        require_finite(matrix)?;
        check_contamination(self.contamination)?;
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(DetectorError::InvalidParameter(
                "n_estimators and max_samples must be positive".to_string(),
            ));
        }

        let n = matrix.n_rows();
        let sample_size = self.max_samples.min(n).max(2);
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees: Vec<IsolationTree> = (0..self.n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::grow(matrix, sample, height_limit, &mut rng)
            })
            .collect();

        let normalizer = average_path_length(sample_size);
        let score_samples: Vec<f64> = (0..n)
            .map(|row| {
                let mean_depth = trees
                    .iter()
                    .map(|tree| tree.path_length(matrix, row))
                    .sum::<f64>()
                    / trees.len() as f64;
                -(2f64).powf(-mean_depth / normalizer)
            })
            .collect();

        // decision < 0 marks the expected contamination fraction as outliers
        let offset = percentile(&score_samples, 100.0 * self.contamination);
        let mut scores = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        for sample_score in score_samples {
            let decision = sample_score - offset;
            scores.push(-decision);
            labels.push(if decision < 0.0 {
                Label::Outlier
            } else {
                Label::Inlier
            });
        }

        let output = DetectorOutput::new(scores, labels)?;
        debug!(
            trees = trees.len(),
            sample_size = sample_size,
            offset = offset,
            outliers = output.outlier_count(),
            "Isolation forest fitted"
        );
        Ok(output)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One random partitioning tree stored as a flat arena
#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(matrix: &FeatureMatrix, sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(matrix, sample, 0, height_limit, rng);
        tree
    }

    fn grow_node(
        &mut self,
        matrix: &FeatureMatrix,
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        let values = matrix.values();
        // Only features that still vary inside this node can split it
        let candidates: Vec<(usize, f64, f64)> = (0..matrix.n_cols())
            .filter_map(|feature| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = values[[r, feature]];
                    (lo.min(v), hi.max(v))
                });
                (lo < hi).then_some((feature, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| values[[r, feature]] <= threshold);

        let left = self.grow_node(matrix, left_rows, depth + 1, height_limit, rng);
        let right = self.grow_node(matrix, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Edges from the root to the row's leaf, plus the expected remaining
    /// depth of an unbuilt subtree of the leaf's size
    fn path_length(&self, matrix: &FeatureMatrix, row: usize) -> f64 {
        let values = matrix.values();
        let mut node = 0;
        let mut depth = 0usize;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if values[[row, *feature]] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful binary search tree lookup over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
