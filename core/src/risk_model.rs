//! Risk models: anything that can be fitted on observed defaults and
//! asked for a probability of default.
//!
//! RULE: a failed fit() must leave the model exactly as it was. The driver
//! relies on this to keep allocating with the prior round's parameters.

use crate::{
    config::RiskModelSpec,
    error::{SimError, SimResult},
};

/// The contract every risk model must fulfill.
pub trait RiskModel: Send {
    /// Unique stable name for logs and snapshots.
    fn name(&self) -> &'static str;

    /// Train on labelled rows only. `labels[i]` is `true` for a default.
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> SimResult<()>;

    /// One probability in [0, 1] per row.
    fn predict_default_probability(&self, features: &[Vec<f64>]) -> SimResult<Vec<f64>>;

    fn is_fitted(&self) -> bool;

    /// Fitted parameters for snapshots, if the model has any.
    fn coefficients(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Build the model a scenario asks for.
pub fn build_model(spec: &RiskModelSpec) -> Box<dyn RiskModel> {
    match spec {
        RiskModelSpec::LogisticRegression { inverse_regularization } => {
            Box::new(LogisticRegression::new(*inverse_regularization))
        }
    }
}

/// Reject training sets a probability model cannot learn from: no rows,
/// or only one class present.
pub fn check_trainable(features: &[Vec<f64>], labels: &[bool]) -> SimResult<()> {
    if features.len() != labels.len() {
        return Err(SimError::FeatureShape {
            expected: features.len(),
            actual: labels.len(),
        });
    }
    let defaults = labels.iter().filter(|&&d| d).count();
    let classes = usize::from(defaults > 0) + usize::from(defaults < labels.len());
    if classes < 2 {
        return Err(SimError::InsufficientTrainingData {
            rows: labels.len(),
            classes,
        });
    }
    Ok(())
}

fn feature_width(features: &[Vec<f64>]) -> SimResult<usize> {
    let width = features.first().map_or(0, Vec::len);
    if let Some(bad) = features.iter().find(|row| row.len() != width) {
        return Err(SimError::FeatureShape {
            expected: width,
            actual: bad.len(),
        });
    }
    Ok(width)
}

const MAX_NEWTON_ITERATIONS: usize = 100;
const NEWTON_TOLERANCE: f64 = 1e-10;

/// L2-penalised logistic regression fitted by Newton–Raphson.
///
/// Minimises `0.5·‖w‖² + C·Σ logloss`, leaving the intercept unpenalised.
/// Deterministic: no random initialisation, no data shuffling.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    inverse_regularization: f64,
    /// Feature weights followed by the intercept.
    params: Option<Vec<f64>>,
}

impl LogisticRegression {
    pub fn new(inverse_regularization: f64) -> Self {
        Self {
            inverse_regularization,
            params: None,
        }
    }

    fn linear(params: &[f64], row: &[f64]) -> f64 {
        let (weights, intercept) = params.split_at(params.len() - 1);
        weights.iter().zip(row).map(|(w, x)| w * x).sum::<f64>() + intercept[0]
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RiskModel for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic_regression"
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> SimResult<()> {
        check_trainable(features, labels)?;
        let width = feature_width(features)?;
        let dim = width + 1;
        let c = self.inverse_regularization;

        let mut params = vec![0.0; dim];
        for iteration in 0..MAX_NEWTON_ITERATIONS {
            let mut gradient = vec![0.0; dim];
            let mut hessian = vec![vec![0.0; dim]; dim];
            for j in 0..width {
                gradient[j] = params[j];
                hessian[j][j] = 1.0;
            }

            for (row, &label) in features.iter().zip(labels) {
                let p = sigmoid(Self::linear(&params, row));
                let residual = p - f64::from(u8::from(label));
                let curvature = (p * (1.0 - p)).max(1e-12);
                for j in 0..dim {
                    let xj = if j < width { row[j] } else { 1.0 };
                    gradient[j] += c * residual * xj;
                    for k in 0..=j {
                        let xk = if k < width { row[k] } else { 1.0 };
                        hessian[j][k] += c * curvature * xj * xk;
                    }
                }
            }
            for j in 0..dim {
                for k in 0..j {
                    hessian[k][j] = hessian[j][k];
                }
            }

            let step = solve_linear_system(hessian, gradient).ok_or_else(|| {
                SimError::Other(anyhow::anyhow!("singular Hessian at Newton iteration {iteration}"))
            })?;
            let mut largest = 0.0f64;
            for (p, s) in params.iter_mut().zip(&step) {
                *p -= s;
                largest = largest.max(s.abs());
            }
            if largest < NEWTON_TOLERANCE {
                break;
            }
        }

        if params.iter().any(|p| !p.is_finite()) {
            return Err(SimError::Other(anyhow::anyhow!(
                "logistic regression diverged: {params:?}"
            )));
        }
        self.params = Some(params);
        Ok(())
    }

    fn predict_default_probability(&self, features: &[Vec<f64>]) -> SimResult<Vec<f64>> {
        let params = self.params.as_ref().ok_or(SimError::UnfittedModel)?;
        let width = params.len() - 1;
        features
            .iter()
            .map(|row| {
                if row.len() != width {
                    return Err(SimError::FeatureShape {
                        expected: width,
                        actual: row.len(),
                    });
                }
                Ok(sigmoid(Self::linear(params, row)))
            })
            .collect()
    }

    fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    fn coefficients(&self) -> Option<Vec<f64>> {
        self.params.clone()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Gaussian elimination with partial pivoting. None if singular.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-14 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}
