use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::gbdt::{BoostingParams, GradientBoostedTrees};
use crate::model::ClassifierSummary;

/// Per-feature standardization: zero mean, unit variance over the training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            bail!("cannot fit a scaler on an empty dataset");
        };
        let width = first.len();
        if rows.iter().any(|row| row.len() != width) {
            bail!("ragged feature rows; expected {width} columns");
        }

        let count = rows.len() as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (total, value) in mean.iter_mut().zip(row) {
                *total += value;
            }
        }
        for value in &mut mean {
            *value /= count;
        }

        let mut scale = vec![0.0; width];
        for row in rows {
            for ((total, value), center) in scale.iter_mut().zip(row).zip(&mean) {
                *total += (value - center) * (value - center);
            }
        }
        for value in &mut scale {
            let std = (*value / count).sqrt();
            // constant columns pass through centred but unscaled
            *value = if std > f64::EPSILON { std } else { 1.0 };
        }

        Ok(Self { mean, scale })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.width() {
            bail!(
                "feature vector has {} values, scaler expects {}",
                features.len(),
                self.width()
            );
        }

        Ok(features
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((value, center), scale)| (value - center) / scale)
            .collect())
    }
}

/// Inverse class frequency weights: `n_samples / (n_classes * class_count)`.
pub fn balanced_sample_weights(labels: &[bool]) -> Vec<f64> {
    let positives = labels.iter().filter(|label| **label).count();
    let negatives = labels.len() - positives;
    let classes = usize::from(positives > 0) + usize::from(negatives > 0);
    if classes == 0 {
        return Vec::new();
    }

    let total = labels.len() as f64;
    let positive_weight = total / (classes as f64 * positives.max(1) as f64);
    let negative_weight = total / (classes as f64 * negatives.max(1) as f64);
    labels
        .iter()
        .map(|label| {
            if *label {
                positive_weight
            } else {
                negative_weight
            }
        })
        .collect()
}

/// A scaler and booster persisted and loaded together.
///
/// `model` is `None` when the training set held a single class; such a bundle never yields a
/// positive-class probability and the stage that owns it does nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierBundle {
    pub task: String,
    pub feature_names: Vec<String>,
    pub scaler: StandardScaler,
    pub model: Option<GradientBoostedTrees>,
}

impl ClassifierBundle {
    pub fn train(
        task: &str,
        feature_names: &[&str],
        rows: &[Vec<f64>],
        labels: &[bool],
        params: BoostingParams,
    ) -> Result<(Self, ClassifierSummary)> {
        if rows.len() != labels.len() {
            bail!(
                "{task}: {} feature rows but {} labels",
                rows.len(),
                labels.len()
            );
        }

        let scaler = StandardScaler::fit(rows)?;
        if scaler.width() != feature_names.len() {
            bail!(
                "{task}: rows have {} features, expected {}",
                scaler.width(),
                feature_names.len()
            );
        }
        let scaled = rows
            .iter()
            .map(|row| scaler.transform(row))
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let positives = labels.iter().filter(|label| **label).count();
        let model = if positives == 0 || positives == labels.len() {
            None
        } else {
            let weights = balanced_sample_weights(labels);
            Some(GradientBoostedTrees::fit(&scaled, labels, &weights, params)?)
        };

        let bundle = Self {
            task: task.to_string(),
            feature_names: feature_names.iter().map(|name| name.to_string()).collect(),
            scaler,
            model,
        };

        let mut correct = 0usize;
        for (row, label) in rows.iter().zip(labels) {
            let predicted = match bundle.positive_probability(row)? {
                Some(probability) => probability > 0.5,
                None => positives > 0,
            };
            if predicted == *label {
                correct += 1;
            }
        }

        let summary = ClassifierSummary {
            samples: rows.len(),
            positives,
            training_accuracy: correct as f64 / rows.len() as f64,
        };
        Ok((bundle, summary))
    }

    pub fn validate(&self) -> Result<()> {
        if self.scaler.width() != self.feature_names.len()
            || self.scaler.scale.len() != self.scaler.width()
        {
            bail!("{}: scaler does not match feature names", self.task);
        }
        if let Some(model) = &self.model {
            if model.n_features != self.scaler.width() {
                bail!(
                    "{}: model expects {} features, scaler provides {}",
                    self.task,
                    model.n_features,
                    self.scaler.width()
                );
            }
            model.validate()?;
        }
        Ok(())
    }

    /// Scales raw features and scores them; `None` for single-class bundles.
    pub fn positive_probability(&self, features: &[f64]) -> Result<Option<f64>> {
        let scaled = self.scaler.transform(features)?;
        match &self.model {
            Some(model) => Ok(Some(model.predict_proba(&scaled)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaler_standardizes_and_keeps_constant_columns_finite() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&rows).expect("fit");
        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);
        assert_eq!(scaler.transform(&[3.0, 5.0]).expect("transform"), vec![1.0, 0.0]);
        assert!(scaler.transform(&[3.0]).is_err());
    }

    #[test]
    fn balanced_weights_equalize_class_mass() {
        let labels = [true, false, false, false];
        let weights = balanced_sample_weights(&labels);
        assert_eq!(weights, vec![2.0, 4.0 / 6.0, 4.0 / 6.0, 4.0 / 6.0]);

        let positive_mass: f64 = weights[..1].iter().sum();
        let negative_mass: f64 = weights[1..].iter().sum();
        assert!((positive_mass - negative_mass).abs() < 1e-9);
    }

    #[test]
    fn single_class_bundle_never_scores() {
        let rows = vec![vec![1.0, 2.0], vec![2.0, 3.0]];
        let (bundle, summary) = ClassifierBundle::train(
            "remove",
            &["a", "b"],
            &rows,
            &[false, false],
            BoostingParams::default(),
        )
        .expect("single-class training should still produce a bundle");

        assert!(bundle.model.is_none());
        assert_eq!(summary.positives, 0);
        assert_eq!(summary.training_accuracy, 1.0);
        assert_eq!(bundle.positive_probability(&[1.0, 2.0]).expect("score"), None);
    }

    #[test]
    fn trained_bundle_learns_rare_positive_class() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for value in 0..30 {
            rows.push(vec![value as f64, 1.0]);
            labels.push(value >= 27);
        }

        let (bundle, summary) = ClassifierBundle::train(
            "others",
            &["value", "bias"],
            &rows,
            &labels,
            BoostingParams::default(),
        )
        .expect("training should succeed");
        bundle.validate().expect("bundle should validate");

        assert_eq!(summary.samples, 30);
        assert_eq!(summary.positives, 3);
        assert_eq!(summary.training_accuracy, 1.0);
        let high = bundle
            .positive_probability(&[29.0, 1.0])
            .expect("score")
            .expect("two-class bundle yields a probability");
        assert!(high > 0.5);
    }
}
