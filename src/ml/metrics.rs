use serde::{Deserialize, Serialize};

use crate::types::Signal;

/// `matrix[actual][predicted]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub matrix: [[usize; Signal::COUNT]; Signal::COUNT],
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[Signal], predicted: &[Signal]) -> Self {
        let mut matrix = [[0usize; Signal::COUNT]; Signal::COUNT];
        for (a, p) in actual.iter().zip(predicted) {
            matrix[a.index()][p.index()] += 1;
        }
        Self { matrix }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..Signal::COUNT).map(|i| self.matrix[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    fn predicted(&self, class: usize) -> usize {
        self.matrix.iter().map(|row| row[class]).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: Signal,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-class precision/recall/F1 with macro and support-weighted averages.
/// Undefined ratios (no predictions or no support) count as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub per_class: Vec<ClassMetrics>,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn from_predictions(actual: &[Signal], predicted: &[Signal]) -> Self {
        let confusion = ConfusionMatrix::from_predictions(actual, predicted);

        let per_class: Vec<ClassMetrics> = Signal::ALL
            .iter()
            .map(|class| {
                let i = class.index();
                let tp = confusion.matrix[i][i];
                let precision = ratio(tp, confusion.predicted(i));
                let recall = ratio(tp, confusion.support(i));
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    class: *class,
                    precision,
                    recall,
                    f1,
                    support: confusion.support(i),
                }
            })
            .collect();

        let n = per_class.len() as f64;
        let macro_avg = AveragedMetrics {
            precision: per_class.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: per_class.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: per_class.iter().map(|c| c.f1).sum::<f64>() / n,
        };

        let total = confusion.total().max(1) as f64;
        let weighted = |f: fn(&ClassMetrics) -> f64| -> f64 {
            per_class.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total
        };
        let weighted_avg = AveragedMetrics {
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
        };

        Self {
            accuracy: confusion.accuracy(),
            per_class,
            macro_avg,
            weighted_avg,
            confusion,
        }
    }

    pub fn class(&self, signal: Signal) -> Option<&ClassMetrics> {
        self.per_class.iter().find(|c| c.class == signal)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Signal::{Buy, Hold, Sell};

    #[test]
    fn test_report_matches_hand_computation() {
        let actual = [Buy, Buy, Hold, Hold, Sell, Sell];
        let predicted = [Buy, Hold, Hold, Hold, Sell, Buy];
        let report = ClassificationReport::from_predictions(&actual, &predicted);

        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-12);

        let buy = report.class(Buy).unwrap();
        assert_eq!(buy.support, 2);
        assert!((buy.precision - 0.5).abs() < 1e-12);
        assert!((buy.recall - 0.5).abs() < 1e-12);

        let hold = report.class(Hold).unwrap();
        assert!((hold.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((hold.recall - 1.0).abs() < 1e-12);
        assert!((hold.f1 - 0.8).abs() < 1e-12);

        assert_eq!(report.confusion.matrix[Buy.index()][Hold.index()], 1);
        assert_eq!(report.confusion.total(), 6);
    }

    #[test]
    fn test_missing_class_scores_zero() {
        let report = ClassificationReport::from_predictions(&[Hold, Hold], &[Hold, Hold]);
        let sell = report.class(Sell).unwrap();
        assert_eq!(sell.support, 0);
        assert_eq!(sell.f1, 0.0);
        assert_eq!(report.weighted_avg.f1, 1.0);
        assert!((report.macro_avg.f1 - 1.0 / 3.0).abs() < 1e-12);
    }
}
