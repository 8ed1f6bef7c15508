use crate::error::{Error, Result};
use crate::train::class_weights::ClassWeights;

/// Softmax cross-entropy over raw class scores, weighted per class.
///
/// Reduction is the weighted mean:
///   L = Σ_i w[y_i] · (−log softmax(z_i)[y_i]) / Σ_i w[y_i]
pub struct WeightedCrossEntropy {
    weights: ClassWeights,
}

/// Loss value and its gradient for one batch.
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: f64,
    /// ∂L/∂z per sample, same shape as the scores.
    pub score_grads: Vec<Vec<f64>>,
}

/// `ln Σ exp(z)`, shifted by the max score so it never overflows.
fn log_sum_exp(scores: &[f64]) -> f64 {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    max + scores.iter().map(|&z| (z - max).exp()).sum::<f64>().ln()
}

/// Numerically stable softmax: shifts by the max score before `exp`.
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl WeightedCrossEntropy {
    pub fn new(weights: ClassWeights) -> WeightedCrossEntropy {
        WeightedCrossEntropy { weights }
    }

    pub fn weights(&self) -> &ClassWeights {
        &self.weights
    }

    /// Loss and per-sample gradient of a batch.
    ///
    /// With `p = softmax(z_i)` and `W = Σ_j w[y_j]`, the gradient is
    ///   ∂L/∂z_i = w[y_i] · (p − onehot(y_i)) / W
    pub fn compute(&self, scores: &[Vec<f64>], labels: &[usize]) -> Result<LossOutput> {
        if scores.len() != labels.len() {
            return Err(Error::ShapeMismatch { predictions: scores.len(), labels: labels.len() });
        }
        let classes = self.weights.len();
        let mut sample_weights = Vec::with_capacity(labels.len());
        for (row, &label) in scores.iter().zip(labels) {
            if row.len() != classes {
                return Err(Error::InvalidInput(format!(
                    "scores have {} classes, loss is weighted for {}",
                    row.len(),
                    classes
                )));
            }
            match self.weights.get(label) {
                Some(w) => sample_weights.push(w),
                None => {
                    return Err(Error::InvalidInput(format!(
                        "label {} is outside the {} known classes",
                        label, classes
                    )))
                }
            }
        }

        let total_weight: f64 = sample_weights.iter().sum();
        if labels.is_empty() || total_weight <= 0.0 {
            return Ok(LossOutput { loss: 0.0, score_grads: vec![vec![0.0; classes]; scores.len()] });
        }

        let mut loss = 0.0;
        let mut score_grads = Vec::with_capacity(scores.len());
        for ((row, &label), &w) in scores.iter().zip(labels).zip(&sample_weights) {
            let p = softmax(row);
            loss += w * (log_sum_exp(row) - row[label]);
            let scale = w / total_weight;
            score_grads.push(
                p.iter().enumerate()
                    .map(|(c, &pc)| scale * (pc - if c == label { 1.0 } else { 0.0 }))
                    .collect(),
            );
        }

        Ok(LossOutput { loss: loss / total_weight, score_grads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform() -> WeightedCrossEntropy {
        WeightedCrossEntropy::new(ClassWeights::uniform(2).unwrap())
    }

    #[test]
    fn equal_scores_cost_ln2() {
        let out = uniform().compute(&[vec![0.0, 0.0]], &[1]).unwrap();
        assert_relative_eq!(out.loss, std::f64::consts::LN_2, epsilon = 1e-12);
        assert_relative_eq!(out.score_grads[0][0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(out.score_grads[0][1], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let loss = WeightedCrossEntropy::new(ClassWeights::compute(&[1, 3]).unwrap());
        let scores = vec![vec![0.3, -0.2], vec![1.1, 0.4], vec![-0.5, 0.9]];
        let labels = [0, 1, 1];
        let out = loss.compute(&scores, &labels).unwrap();

        let h = 1e-6;
        for i in 0..scores.len() {
            for c in 0..2 {
                let mut plus = scores.clone();
                plus[i][c] += h;
                let mut minus = scores.clone();
                minus[i][c] -= h;
                let numeric = (loss.compute(&plus, &labels).unwrap().loss
                    - loss.compute(&minus, &labels).unwrap().loss) / (2.0 * h);
                assert_relative_eq!(out.score_grads[i][c], numeric, epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn rare_class_errors_cost_more() {
        let loss = WeightedCrossEntropy::new(ClassWeights::compute(&[10, 90]).unwrap());
        let scores = vec![vec![0.0, 2.0], vec![2.0, 0.0]];
        let out = loss.compute(&scores, &[0, 1]).unwrap();
        // Both samples are equally wrong; the rare class dominates the gradient.
        assert!(out.score_grads[0][0].abs() > out.score_grads[1][1].abs());
    }

    #[test]
    fn unknown_label_is_invalid_input() {
        assert!(matches!(uniform().compute(&[vec![0.0, 0.0]], &[2]), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn huge_scores_stay_finite() {
        let out = uniform().compute(&[vec![1000.0, -1000.0]], &[1]).unwrap();
        assert_relative_eq!(out.loss, 2000.0, epsilon = 1e-9);
        assert!(out.score_grads[0].iter().all(|g| g.is_finite()));
    }
}
