//! L2-regularised logistic regression over standardised features.
//!
//! Fitted with full-batch gradient descent and a decaying learning rate.
//! Feature importance is the normalised magnitude of the standardised
//! coefficients.
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::Classifier;

const EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub max_iters: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        LogisticParams {
            max_iters: 400,
            learning_rate: 0.5,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub params: LogisticParams,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

pub(crate) fn clamp_prob(p: f64) -> f64 {
    p.clamp(EPS, 1.0 - EPS)
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

impl LogisticModel {
    pub fn new(params: LogisticParams) -> Self {
        LogisticModel {
            params,
            means: Vec::new(),
            scales: Vec::new(),
            weights: Vec::new(),
            bias: 0.0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    fn is_fitted(&self) -> bool {
        !self.weights.is_empty()
    }

    fn linear(&self, x: &[f64]) -> f64 {
        x.iter()
            .zip(&self.means)
            .zip(&self.scales)
            .zip(&self.weights)
            .map(|(((v, m), s), w)| (v - m) / s * w)
            .sum::<f64>()
            + self.bias
    }

    fn check_input(&self, x: &[f64]) -> Result<()> {
        if !self.is_fitted() {
            bail!("model has not been fitted");
        }
        if x.len() != self.dimension() {
            bail!(
                "feature length mismatch: got {}, expected {}",
                x.len(),
                self.dimension()
            );
        }
        if x.iter().any(|v| !v.is_finite()) {
            bail!("non-finite feature value");
        }
        Ok(())
    }
}

impl Classifier for LogisticModel {
    fn fit(&mut self, x: &[Vec<f64>], y: &[bool]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            bail!("fit needs a non-empty design matrix with one label per row");
        }
        let dim = x[0].len();
        if dim == 0 || x.iter().any(|row| row.len() != dim) {
            bail!("design matrix rows must share a non-zero width");
        }

        let n = x.len() as f64;
        let mut means = vec![0.0; dim];
        for row in x {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut scales = vec![0.0; dim];
        for row in x {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        // Constant columns keep scale 1 so they standardise to zero
        for s in scales.iter_mut() {
            *s = if *s > 0.0 { s.sqrt() } else { 1.0 };
        }

        let z: Vec<Vec<f64>> = x
            .iter()
            .map(|row| {
                row.iter()
                    .zip(means.iter().zip(&scales))
                    .map(|(v, (m, s))| (v - m) / s)
                    .collect()
            })
            .collect();
        let targets: Vec<f64> = y.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

        let mut w = vec![0.0f64; dim];
        let mut b = 0.0f64;
        for i in 0..self.params.max_iters.max(1) {
            let lr = self.params.learning_rate / (1.0 + 0.01 * i as f64);
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for (row, t) in z.iter().zip(&targets) {
                let p = sigmoid(row.iter().zip(&w).map(|(zj, wj)| zj * wj).sum::<f64>() + b);
                let err = p - t;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (wj, gj) in w.iter_mut().zip(&grad_w) {
                *wj -= lr * (gj / n + self.params.l2 * *wj);
            }
            b -= lr * grad_b / n;
            if !b.is_finite() || w.iter().any(|v| !v.is_finite()) {
                bail!("gradient descent diverged at iteration {i}");
            }
        }

        self.means = means;
        self.scales = scales;
        self.weights = w;
        self.bias = b;
        Ok(())
    }

    fn predict_probability(&self, x: &[f64]) -> Result<f64> {
        self.check_input(x)?;
        Ok(sigmoid(self.linear(x)).clamp(0.0, 1.0))
    }

    fn predict(&self, x: &[f64]) -> Result<bool> {
        Ok(self.predict_probability(x)? >= 0.5)
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if !self.is_fitted() {
            return None;
        }
        let total: f64 = self.weights.iter().map(|w| w.abs()).sum();
        if total <= 0.0 {
            return Some(vec![0.0; self.weights.len()]);
        }
        Some(self.weights.iter().map(|w| w.abs() / total).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Label is 1 when the first feature is large; second feature is noise
    fn separable() -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..200 {
            let signal = i as f64 * 50.0;
            let noise = ((i * 37) % 11) as f64;
            x.push(vec![signal, noise]);
            y.push(signal > 5000.0);
        }
        (x, y)
    }

    #[test]
    fn fit_learns_separable_signal() {
        let (x, y) = separable();
        let mut model = LogisticModel::new(LogisticParams::default());
        model.fit(&x, &y).unwrap();

        assert!(model.predict_probability(&[9000.0, 3.0]).unwrap() > 0.9);
        assert!(model.predict_probability(&[500.0, 3.0]).unwrap() < 0.1);
        assert!(model.predict(&[9000.0, 3.0]).unwrap());
        assert!(!model.predict(&[500.0, 3.0]).unwrap());
    }

    #[test]
    fn importances_rank_signal_over_noise_and_sum_to_one() {
        let (x, y) = separable();
        let mut model = LogisticModel::new(LogisticParams::default());
        model.fit(&x, &y).unwrap();
        let imp = model.feature_importances().unwrap();
        assert!(imp[0] > imp[1]);
        assert_relative_eq!(imp.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn constant_column_does_not_break_fit() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 1.0]).collect();
        let y: Vec<bool> = (0..20).map(|i| i >= 10).collect();
        let mut model = LogisticModel::new(LogisticParams::default());
        model.fit(&x, &y).unwrap();
        let p = model.predict_probability(&[15.0, 1.0]).unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn unfitted_or_misshaped_input_is_an_error() {
        let model = LogisticModel::new(LogisticParams::default());
        assert!(model.predict_probability(&[1.0]).is_err());
        assert!(model.feature_importances().is_none());

        let (x, y) = separable();
        let mut model = LogisticModel::new(LogisticParams::default());
        model.fit(&x, &y).unwrap();
        assert!(model.predict_probability(&[1.0]).is_err());
        assert!(model.predict_probability(&[f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn ragged_design_matrix_is_rejected() {
        let mut model = LogisticModel::new(LogisticParams::default());
        let x = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(model.fit(&x, &[true, false]).is_err());
        assert!(model.fit(&[], &[]).is_err());
    }

    #[test]
    fn sigmoid_properties() {
        assert_relative_eq!(sigmoid(0.0), 0.5, epsilon = 1e-12);
        assert!(sigmoid(40.0) <= 1.0);
        assert!(sigmoid(-40.0) >= 0.0);
    }
}
