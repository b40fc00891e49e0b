//! One-class SVM detector with an RBF kernel.
//!
//! Solves the ν-formulation dual
//!
//! ```text
//! min  ½ αᵀKα   s.t.  0 ≤ αᵢ ≤ 1,  Σαᵢ = ν·n
//! ```
//!
//! with sequential minimal optimization over maximal violating pairs. The
//! decision value is `Σ αᵢ K(xᵢ, x) − ρ`; points with a non-positive decision
//! fall outside the learned boundary.

use crate::config::{Gamma, OneClassSvmConfig};
use crate::detectors::{
    require_finite, require_rows, squared_distance, AnomalyDetector, DetectorKind,
    DetectorOutput, Label,
};
use crate::error::DetectorError;
use crate::features::FeatureMatrix;
use tracing::{debug, warn};

/// Smallest curvature used for a pair update
const TAU: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct OneClassSvm {
    nu: f64,
    gamma: Gamma,
    tolerance: f64,
    max_iter: usize,
}

impl OneClassSvm {
    pub fn new(nu: f64, gamma: Gamma) -> Self {
        let defaults = OneClassSvmConfig::default();
        Self {
            nu,
            gamma,
            tolerance: defaults.tolerance,
            max_iter: defaults.max_iter,
        }
    }

    pub fn from_config(config: &OneClassSvmConfig) -> Self {
        Self {
            nu: config.nu,
            gamma: config.gamma,
            tolerance: config.tolerance,
            max_iter: config.max_iter,
        }
    }

    /// Resolve the kernel width for this matrix
    fn resolve_gamma(&self, matrix: &FeatureMatrix) -> f64 {
        match self.gamma {
            Gamma::Value(gamma) => gamma,
            Gamma::Scale => {
                let values = matrix.values();
                let count = values.len() as f64;
                let mean = values.sum() / count;
                let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count;
                if variance > 0.0 {
                    1.0 / (matrix.n_cols() as f64 * variance)
                } else {
                    1.0
                }
            }
        }
    }
}

impl Default for OneClassSvm {
    fn default() -> Self {
        Self::from_config(&OneClassSvmConfig::default())
    }
}

impl AnomalyDetector for OneClassSvm {
    fn kind(&self) -> DetectorKind {
        DetectorKind::OneClassSvm
    }

    fn fit_score(&self, matrix: &FeatureMatrix) -> Result<DetectorOutput, DetectorError> {
        require_rows(matrix, 1)?;
        require_finite(matrix)?;
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(DetectorError::InvalidParameter(format!(
                "nu must be in (0, 1], got {}",
                self.nu
            )));
        }
        if matrix.n_cols() == 0 {
            return Err(DetectorError::InvalidParameter(
                "feature matrix has no columns".to_string(),
            ));
        }

        let gamma = self.resolve_gamma(matrix);
        if !(gamma > 0.0 && gamma.is_finite()) {
            return Err(DetectorError::InvalidParameter(format!(
                "gamma must be positive and finite, got {}",
                gamma
            )));
        }

        let kernel = RbfKernel { matrix, gamma };
        let solution = self.solve(&kernel);

        let support: Vec<(usize, f64)> = solution
            .alpha
            .iter()
            .enumerate()
            .filter(|(_, &a)| a > 0.0)
            .map(|(i, &a)| (i, a))
            .collect();

        let mut scores = Vec::with_capacity(matrix.n_rows());
        let mut labels = Vec::with_capacity(matrix.n_rows());
        for row in 0..matrix.n_rows() {
            let decision = support
                .iter()
                .map(|&(i, a)| a * kernel.eval(i, row))
                .sum::<f64>()
                - solution.rho;
            scores.push(-decision);
            labels.push(if decision > 0.0 {
                Label::Inlier
            } else {
                Label::Outlier
            });
        }

        let output = DetectorOutput::new(scores, labels)?;
        debug!(
            gamma = gamma,
            rho = solution.rho,
            support_vectors = support.len(),
            iterations = solution.iterations,
            outliers = output.outlier_count(),
            "One-class SVM fitted"
        );
        Ok(output)
    }
}

struct RbfKernel<'a> {
    matrix: &'a FeatureMatrix,
    gamma: f64,
}

impl RbfKernel<'_> {
    fn eval(&self, a: usize, b: usize) -> f64 {
        if a == b {
            return 1.0;
        }
        (-self.gamma * squared_distance(self.matrix, a, b)).exp()
    }

    fn column(&self, a: usize) -> Vec<f64> {
        (0..self.matrix.n_rows()).map(|b| self.eval(a, b)).collect()
    }
}

struct Solution {
    alpha: Vec<f64>,
    rho: f64,
    iterations: usize,
}

impl OneClassSvm {
    fn solve(&self, kernel: &RbfKernel<'_>) -> Solution {
        let n = kernel.matrix.n_rows();

        // Feasible start: the first ⌊ν·n⌋ multipliers at the bound, the
        // fractional remainder on the next one
        let total = self.nu * n as f64;
        let mut alpha = vec![0.0; n];
        let full = (total.floor() as usize).min(n);
        for a in alpha.iter_mut().take(full) {
            *a = 1.0;
        }
        if full < n {
            alpha[full] = total - full as f64;
        }

        // Gradient of ½αᵀKα is Kα
        let mut gradient = vec![0.0; n];
        for (i, &a) in alpha.iter().enumerate() {
            if a > 0.0 {
                for (g, k) in gradient.iter_mut().zip(kernel.column(i)) {
                    *g += a * k;
                }
            }
        }

        let mut iterations = 0;
        while iterations < self.max_iter {
            let Some((i, j)) = self.select_pair(&alpha, &gradient) else {
                break;
            };
            iterations += 1;

            let column_i = kernel.column(i);
            let column_j = kernel.column(j);
            let curvature = (column_i[i] + column_j[j] - 2.0 * column_i[j]).max(TAU);

            // Shift mass from j to i along the equality constraint
            let step = ((gradient[j] - gradient[i]) / curvature)
                .min(1.0 - alpha[i])
                .min(alpha[j]);
            if step <= 0.0 {
                break;
            }
            alpha[i] = (alpha[i] + step).min(1.0);
            alpha[j] = (alpha[j] - step).max(0.0);
            for (t, g) in gradient.iter_mut().enumerate() {
                *g += step * (column_i[t] - column_j[t]);
            }
        }

        if iterations >= self.max_iter {
            warn!(
                max_iter = self.max_iter,
                "One-class SVM reached the iteration cap before converging"
            );
        }

        let rho = compute_rho(&alpha, &gradient);
        Solution {
            alpha,
            rho,
            iterations,
        }
    }

    /// Maximal violating pair: `i` can grow and has the smallest gradient,
    /// `j` can shrink and has the largest. None once the gap is within tolerance.
    fn select_pair(&self, alpha: &[f64], gradient: &[f64]) -> Option<(usize, usize)> {
        let mut up: Option<(usize, f64)> = None;
        let mut low: Option<(usize, f64)> = None;

        for (t, (&a, &g)) in alpha.iter().zip(gradient).enumerate() {
            if a < 1.0 && up.map_or(true, |(_, best)| g < best) {
                up = Some((t, g));
            }
            if a > 0.0 && low.map_or(true, |(_, best)| g > best) {
                low = Some((t, g));
            }
        }

        match (up, low) {
            (Some((i, gi)), Some((j, gj))) if i != j && gj - gi > self.tolerance => Some((i, j)),
            _ => None,
        }
    }
}

/// Offset from the free multipliers, or the midpoint of the bound gradients
/// when every multiplier sits at a bound
fn compute_rho(alpha: &[f64], gradient: &[f64]) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_sum = 0.0;
    let mut free_count = 0usize;

    for (&a, &g) in alpha.iter().zip(gradient) {
        if a >= 1.0 {
            lower = lower.max(g);
        } else if a <= 0.0 {
            upper = upper.min(g);
        } else {
            free_sum += g;
            free_count += 1;
        }
    }

    if free_count > 0 {
        free_sum / free_count as f64
    } else if upper.is_finite() && lower.is_finite() {
        (upper + lower) / 2.0
    } else if upper.is_finite() {
        upper
    } else {
        lower
    }
}
