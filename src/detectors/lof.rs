//! Local outlier factor detector.
//!
//! Compares each point's local reachability density with that of its
//! nearest neighbours. A factor well above 1 marks a point sitting in a
//! sparser region than its neighbours. Scores only the rows it was fitted on.

use crate::config::LofConfig;
use crate::detectors::{
    check_contamination, percentile, require_finite, require_rows, squared_distance,
    AnomalyDetector, DetectorKind, DetectorOutput, Label,
};
use crate::error::DetectorError;
use crate::features::FeatureMatrix;
use tracing::debug;

/// Guards the density against zero reachability between duplicates
const DENSITY_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct LocalOutlierFactor {
    n_neighbors: usize,
    contamination: f64,
}

impl LocalOutlierFactor {
    pub fn new(n_neighbors: usize, contamination: f64) -> Self {
        Self {
            n_neighbors,
            contamination,
        }
    }

    pub fn from_config(config: &LofConfig) -> Self {
        Self::new(config.n_neighbors, config.contamination)
    }
}

impl Default for LocalOutlierFactor {
    fn default() -> Self {
        Self::from_config(&LofConfig::default())
    }
}

impl AnomalyDetector for LocalOutlierFactor {
    fn kind(&self) -> DetectorKind {
        DetectorKind::LocalOutlierFactor
    }

    fn fit_score(&self, matrix: &FeatureMatrix) -> Result<DetectorOutput, DetectorError> {
        require_rows(matrix, 2)?;
        require_finite(matrix)?;
        check_contamination(self.contamination)?;
        if self.n_neighbors == 0 {
            return Err(DetectorError::InvalidParameter(
                "n_neighbors must be at least 1".to_string(),
            ));
        }

        let n = matrix.n_rows();
        let k = self.n_neighbors.min(n - 1);
        let neighbors = nearest_neighbors(matrix, k);

        // k-distance: distance to the farthest of the k neighbours
        let k_distance: Vec<f64> = neighbors
            .iter()
            .map(|list| list.last().map(|&(_, d)| d).unwrap_or(0.0))
            .collect();

        let density: Vec<f64> = neighbors
            .iter()
            .map(|list| {
                let reach_sum: f64 = list.iter().map(|&(j, d)| k_distance[j].max(d)).sum();
                1.0 / (reach_sum / list.len() as f64 + DENSITY_EPSILON)
            })
            .collect();

        let factors: Vec<f64> = neighbors
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter().map(|&(j, _)| density[j] / density[i]).sum::<f64>() / list.len() as f64
            })
            .collect();

        // Native convention is the negative factor; outliers fall below the
        // contamination percentile of it
        let negative: Vec<f64> = factors.iter().map(|f| -f).collect();
        let offset = percentile(&negative, 100.0 * self.contamination);
        let labels = negative
            .iter()
            .map(|&v| if v < offset { Label::Outlier } else { Label::Inlier })
            .collect();

        let output = DetectorOutput::new(factors, labels)?;
        debug!(
            neighbors = k,
            offset = offset,
            outliers = output.outlier_count(),
            "Local outlier factor fitted"
        );
        Ok(output)
    }
}

/// For every row, its `k` nearest other rows as `(index, distance)` sorted by
/// distance, ties broken by index.
///
/// Distances are computed one row at a time and only the `k` nearest are
/// kept, so memory grows with `n * k` rather than `n * n`.
fn nearest_neighbors(matrix: &FeatureMatrix, k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = matrix.n_rows();
    let by_distance =
        |x: &(usize, f64), y: &(usize, f64)| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0));
    let mut candidates: Vec<(usize, f64)> = Vec::with_capacity(n.saturating_sub(1));

    (0..n)
        .map(|a| {
            candidates.clear();
            candidates.extend(
                (0..n)
                    .filter(|&b| b != a)
                    .map(|b| (b, squared_distance(matrix, a, b).sqrt())),
            );
            if k < candidates.len() {
                candidates.select_nth_unstable_by(k, by_distance);
                candidates.truncate(k);
            }
            candidates.sort_by(by_distance);
            candidates.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn matrix(rows: &[[f64; 2]]) -> FeatureMatrix {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        FeatureMatrix::new(
            vec!["x".to_string(), "y".to_string()],
            Array2::from_shape_vec((rows.len(), 2), flat).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_isolated_point_has_highest_factor() {
        let mut rows: Vec<[f64; 2]> = (0..30)
            .map(|i| [(i % 6) as f64 * 0.1, (i / 6) as f64 * 0.1])
            .collect();
        rows.push([5.0, 5.0]);
        let data = matrix(&rows);

        let output = LocalOutlierFactor::default().fit_score(&data).unwrap();
        let last = data.n_rows() - 1;
        assert!(output.scores[last] > 2.0);
        assert!(output.scores[..last].iter().all(|&s| s < output.scores[last]));
        assert_eq!(output.labels[last], Label::Outlier);
    }

    #[test]
    fn test_uniform_grid_factors_near_one() {
        let rows: Vec<[f64; 2]> = (0..25)
            .map(|i| [(i % 5) as f64, (i / 5) as f64])
            .collect();
        let output = LocalOutlierFactor::new(4, 0.05).fit_score(&matrix(&rows)).unwrap();
        assert!(output.scores.iter().all(|&s| s > 0.5 && s < 2.0));
    }

    #[test]
    fn test_identical_rows_have_unit_factor() {
        let data = matrix(&[[3.0, 3.0]; 6]);
        let output = LocalOutlierFactor::default().fit_score(&data).unwrap();
        assert!(output.scores.iter().all(|&s| s == 1.0));
        assert_eq!(output.outlier_count(), 0);
    }

    #[test]
    fn test_neighbors_capped_by_batch_size() {
        let data = matrix(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        let neighbors = nearest_neighbors(&data, 2);
        assert!(neighbors.iter().all(|list| list.len() == 2));
        assert!(LocalOutlierFactor::default().fit_score(&data).is_ok());
    }

    #[test]
    fn test_neighbors_match_full_sort() {
        // duplicates and equal distances exercise the index tie-break
        let data = matrix(&[
            [0.0, 0.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [1.0, 0.0],
            [-1.0, 0.0],
            [3.0, 4.0],
            [0.5, 0.5],
            [2.0, 2.0],
        ]);
        let n = data.n_rows();

        for k in 1..n {
            let expected: Vec<Vec<(usize, f64)>> = (0..n)
                .map(|a| {
                    let mut others: Vec<(usize, f64)> = (0..n)
                        .filter(|&b| b != a)
                        .map(|b| (b, squared_distance(&data, a, b).sqrt()))
                        .collect();
                    others.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
                    others.truncate(k);
                    others
                })
                .collect();
            assert_eq!(nearest_neighbors(&data, k), expected, "k = {}", k);
        }
    }

    #[test]
    fn test_single_row_is_rejected() {
        let data = matrix(&[[0.0, 0.0]]);
        assert!(matches!(
            LocalOutlierFactor::default().fit_score(&data),
            Err(DetectorError::InsufficientSamples { .. })
        ));
    }
}
