use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::labels::ClassLabelSpace;

/// Index of the largest score. The first index wins a tie; NaN never wins.
pub fn argmax(scores: &[f64]) -> usize {
    let mut best = 0;
    for (i, &s) in scores.iter().enumerate() {
        if s > scores[best] || scores[best].is_nan() {
            best = i;
        }
    }
    best
}

/// Precision, recall, F1 and support of one class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Averages {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// A position where the prediction differs from the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch<'a> {
    pub index: usize,
    pub actual: &'a str,
    pub predicted: &'a str,
}

/// Metrics of one set of predictions. Borrows its inputs so mismatches can
/// be walked on demand.
#[derive(Debug, Clone)]
pub struct Evaluation<'a> {
    pub accuracy: f64,
    /// `confusion_matrix[actual][predicted]`.
    pub confusion_matrix: Vec<Vec<usize>>,
    pub per_class: Vec<ClassReport>,
    pub macro_avg: Averages,
    /// Averaged with each class weighted by its support.
    pub weighted_avg: Averages,
    classes: &'a ClassLabelSpace,
    predictions: &'a [usize],
    labels: &'a [usize],
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Scores `predictions` against `labels`.
///
/// Fails with `ShapeMismatch` when the lengths differ and with
/// `InvalidInput` when an id is outside `classes`.
pub fn evaluate<'a>(
    predictions: &'a [usize],
    labels: &'a [usize],
    classes: &'a ClassLabelSpace,
) -> Result<Evaluation<'a>> {
    if predictions.len() != labels.len() {
        return Err(Error::ShapeMismatch { predictions: predictions.len(), labels: labels.len() });
    }
    let n = classes.len();
    let mut confusion = vec![vec![0usize; n]; n];
    for (&p, &y) in predictions.iter().zip(labels) {
        if p >= n || y >= n {
            return Err(Error::InvalidInput(format!(
                "class id {} is outside the {} known classes",
                p.max(y),
                n
            )));
        }
        confusion[y][p] += 1;
    }

    let correct: usize = (0..n).map(|c| confusion[c][c]).sum();
    let total = labels.len();

    let per_class: Vec<ClassReport> = classes.names().iter().enumerate().map(|(c, name)| {
        let tp = confusion[c][c];
        let support: usize = confusion[c].iter().sum();
        let predicted: usize = confusion.iter().map(|row| row[c]).sum();
        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 { 2.0 * precision * recall / (precision + recall) } else { 0.0 };
        ClassReport { name: name.clone(), precision, recall, f1, support }
    }).collect();

    let macro_avg = Averages {
        precision: per_class.iter().map(|r| r.precision).sum::<f64>() / n as f64,
        recall: per_class.iter().map(|r| r.recall).sum::<f64>() / n as f64,
        f1: per_class.iter().map(|r| r.f1).sum::<f64>() / n as f64,
    };
    let weighted = |f: fn(&ClassReport) -> f64| {
        if total == 0 {
            0.0
        } else {
            per_class.iter().map(|r| f(r) * r.support as f64).sum::<f64>() / total as f64
        }
    };
    let weighted_avg = Averages {
        precision: weighted(|r| r.precision),
        recall: weighted(|r| r.recall),
        f1: weighted(|r| r.f1),
    };

    Ok(Evaluation {
        accuracy: ratio(correct, total),
        confusion_matrix: confusion,
        per_class,
        macro_avg,
        weighted_avg,
        classes,
        predictions,
        labels,
    })
}

impl<'a> Evaluation<'a> {
    pub fn total(&self) -> usize {
        self.labels.len()
    }

    /// Every misclassified position, in input order. Computed lazily from
    /// the borrowed inputs.
    pub fn mismatches(&self) -> impl Iterator<Item = Mismatch<'a>> + 'a {
        let classes = self.classes;
        let predictions: &'a [usize] = self.predictions;
        let labels: &'a [usize] = self.labels;
        predictions.iter().zip(labels).enumerate()
            .filter(|(_, (p, y))| p != y)
            .map(move |(index, (&p, &y))| Mismatch {
                index,
                actual: classes.name(y).unwrap_or("?"),
                predicted: classes.name(p).unwrap_or("?"),
            })
    }
}

impl fmt::Display for Evaluation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.classes.names();
        let width = names.iter().map(String::len).max().unwrap_or(0).max(12);

        writeln!(f, "Confusion matrix (rows: actual, columns: predicted)")?;
        write!(f, "{:>width$}", "", width = width)?;
        for name in names {
            write!(f, " {:>8}", name)?;
        }
        writeln!(f)?;
        for (name, row) in names.iter().zip(&self.confusion_matrix) {
            write!(f, "{:>width$}", name, width = width)?;
            for count in row {
                write!(f, " {:>8}", count)?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "{:>width$} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support", width = width)?;
        for r in &self.per_class {
            writeln!(f, "{:>width$} {:>9.3} {:>9.3} {:>9.3} {:>9}", r.name, r.precision, r.recall, r.f1, r.support, width = width)?;
        }
        writeln!(f)?;
        writeln!(f, "{:>width$} {:>9} {:>9} {:>9.3} {:>9}", "accuracy", "", "", self.accuracy, self.total(), width = width)?;
        for (label, avg) in [("macro avg", self.macro_avg), ("weighted avg", self.weighted_avg)] {
            writeln!(f, "{:>width$} {:>9.3} {:>9.3} {:>9.3} {:>9}", label, avg.precision, avg.recall, avg.f1, self.total(), width = width)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ai_real() -> ClassLabelSpace {
        ClassLabelSpace::new(["ai", "real"]).unwrap()
    }

    #[test]
    fn accuracy_and_single_mismatch() {
        let classes = ai_real();
        let predictions = [0, 1, 1, 0];
        let labels = [0, 1, 0, 0];
        let eval = evaluate(&predictions, &labels, &classes).unwrap();
        assert_relative_eq!(eval.accuracy, 0.75);
        let mismatches: Vec<_> = eval.mismatches().collect();
        assert_eq!(mismatches, vec![Mismatch { index: 2, actual: "ai", predicted: "real" }]);
        assert_eq!(eval.confusion_matrix, vec![vec![2, 1], vec![0, 1]]);
    }

    #[test]
    fn per_class_report() {
        let classes = ai_real();
        let eval = evaluate(&[0, 1, 1, 0], &[0, 1, 0, 0], &classes).unwrap();
        let ai = &eval.per_class[0];
        assert_relative_eq!(ai.precision, 1.0);
        assert_relative_eq!(ai.recall, 2.0 / 3.0);
        assert_eq!(ai.support, 3);
        let real = &eval.per_class[1];
        assert_relative_eq!(real.precision, 0.5);
        assert_relative_eq!(real.recall, 1.0);
        assert_relative_eq!(eval.macro_avg.recall, (2.0 / 3.0 + 1.0) / 2.0);
    }

    #[test]
    fn length_mismatch_fails() {
        let classes = ai_real();
        assert!(matches!(
            evaluate(&[0, 1], &[0], &classes),
            Err(Error::ShapeMismatch { predictions: 2, labels: 1 })
        ));
    }

    #[test]
    fn unknown_class_fails() {
        let classes = ai_real();
        assert!(matches!(evaluate(&[2], &[0], &classes), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn empty_input_has_zero_accuracy() {
        let classes = ai_real();
        let eval = evaluate(&[], &[], &classes).unwrap();
        assert_eq!(eval.accuracy, 0.0);
        assert_eq!(eval.mismatches().count(), 0);
    }

    #[test]
    fn argmax_prefers_first_on_tie() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.9, 0.3]), 1);
        assert_eq!(argmax(&[f64::NAN, 0.2]), 1);
    }

    #[test]
    fn report_mentions_every_class() {
        let classes = ai_real();
        let eval = evaluate(&[0, 1], &[0, 1], &classes).unwrap();
        let text = eval.to_string();
        assert!(text.contains("ai") && text.contains("real") && text.contains("weighted avg"));
    }
}
