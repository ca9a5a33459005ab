//! Gradient-boosted regression trees for binary classification (binomial deviance).
//!
//! Trees are stored as flat node arrays: node `0` is the root and every internal node points
//! at children with larger ids, so a loaded model can be checked for cycles in one pass.
//! Traversal sends `value <= threshold` to the left child.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

const MIN_DENOMINATOR: f64 = 1e-150;
const MIN_SPLIT_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub feature: Option<usize>,
    pub threshold: f64,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub leaf: Option<f64>,
}

impl Node {
    pub fn internal(id: usize, feature: usize, threshold: f64, left: usize, right: usize) -> Self {
        Self {
            id,
            feature: Some(feature),
            threshold,
            left: Some(left),
            right: Some(right),
            leaf: None,
        }
    }

    pub fn leaf(id: usize, value: f64) -> Self {
        Self {
            id,
            feature: None,
            threshold: 0.0,
            left: None,
            right: None,
            leaf: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("tree has no nodes");
        }

        for (position, node) in self.nodes.iter().enumerate() {
            if node.id != position {
                bail!("node at position {position} carries id {}", node.id);
            }
            if node.leaf.is_some() {
                continue;
            }

            let (Some(feature), Some(left), Some(right)) = (node.feature, node.left, node.right)
            else {
                bail!("internal node {position} is missing its split");
            };
            if feature >= n_features {
                bail!("node {position} splits on feature {feature} of {n_features}");
            }
            if left <= position || right <= position {
                bail!("node {position} points backwards");
            }
            if left >= self.nodes.len() || right >= self.nodes.len() {
                bail!("node {position} points past the end of the tree");
            }
        }

        Ok(())
    }

    /// Assumes `validate` passed and `features` has the model's width.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut index = 0usize;
        loop {
            let node = &self.nodes[index];
            if let Some(value) = node.leaf {
                return value;
            }

            let feature = node.feature.unwrap_or_default();
            index = if features[feature] <= node.threshold {
                node.left.unwrap_or_default()
            } else {
                node.right.unwrap_or_default()
            };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 3,
            learning_rate: 0.05,
            min_samples_leaf: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub params: BoostingParams,
    pub n_features: usize,
    pub init_score: f64,
    pub trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    pub fn fit(
        rows: &[Vec<f64>],
        labels: &[bool],
        weights: &[f64],
        params: BoostingParams,
    ) -> Result<Self> {
        if rows.is_empty() {
            bail!("cannot fit boosted trees on an empty dataset");
        }
        if rows.len() != labels.len() || rows.len() != weights.len() {
            bail!(
                "dataset shape mismatch: {} rows, {} labels, {} weights",
                rows.len(),
                labels.len(),
                weights.len()
            );
        }

        let n_features = rows[0].len();
        if rows.iter().any(|row| row.len() != n_features) {
            bail!("ragged feature rows; expected {n_features} columns");
        }

        let total_weight = weights.iter().sum::<f64>();
        let positive_weight = labels
            .iter()
            .zip(weights)
            .filter(|(label, _)| **label)
            .map(|(_, weight)| *weight)
            .sum::<f64>();
        if total_weight <= 0.0 || positive_weight <= 0.0 || positive_weight >= total_weight {
            bail!("boosted trees need both classes with positive weight");
        }

        let prior = positive_weight / total_weight;
        let init_score = (prior / (1.0 - prior)).ln();
        let targets = labels
            .iter()
            .map(|label| if *label { 1.0 } else { 0.0 })
            .collect::<Vec<f64>>();

        let mut raw = vec![init_score; rows.len()];
        let mut trees = Vec::<Tree>::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let probabilities = raw.iter().map(|value| sigmoid(*value)).collect::<Vec<f64>>();
            let residuals = targets
                .iter()
                .zip(&probabilities)
                .map(|(target, probability)| target - probability)
                .collect::<Vec<f64>>();

            let mut grower = TreeGrower {
                rows,
                residuals: &residuals,
                probabilities: &probabilities,
                weights,
                params: &params,
                nodes: Vec::new(),
            };
            grower.grow((0..rows.len()).collect(), 0);
            let tree = Tree::new(grower.nodes);

            for (value, row) in raw.iter_mut().zip(rows) {
                *value += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            params,
            n_features,
            init_score,
            trees,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.init_score.is_finite() {
            bail!("boosted model has a non-finite initial score");
        }
        for (position, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|err| err.context(format!("tree {position} is malformed")))?;
        }
        Ok(())
    }

    pub fn decision_function(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.n_features {
            bail!(
                "feature vector has {} values, model expects {}",
                features.len(),
                self.n_features
            );
        }

        let boosted = self
            .trees
            .iter()
            .map(|tree| tree.predict(features))
            .sum::<f64>();
        Ok(self.init_score + self.params.learning_rate * boosted)
    }

    /// Probability of the positive class.
    pub fn predict_proba(&self, features: &[f64]) -> Result<f64> {
        Ok(sigmoid(self.decision_function(features)?))
    }
}

pub fn sigmoid(value: f64) -> f64 {
    1.0 / (1.0 + (-value).exp())
}

struct TreeGrower<'a> {
    rows: &'a [Vec<f64>],
    residuals: &'a [f64],
    probabilities: &'a [f64],
    weights: &'a [f64],
    params: &'a BoostingParams,
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeGrower<'_> {
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::leaf(id, 0.0));

        let split = if depth < self.params.max_depth
            && indices.len() >= 2 * self.params.min_samples_leaf.max(1)
        {
            self.best_split(&indices)
        } else {
            None
        };

        let Some(split) = split else {
            self.nodes[id] = Node::leaf(id, self.newton_step(&indices));
            return id;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|index| self.rows[*index][split.feature] <= split.threshold);
        let left_id = self.grow(left, depth + 1);
        let right_id = self.grow(right, depth + 1);
        self.nodes[id] = Node::internal(id, split.feature, split.threshold, left_id, right_id);
        id
    }

    /// Weighted squared-error split search over midpoints between distinct values.
    fn best_split(&self, indices: &[usize]) -> Option<Split> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let n_features = self.rows[indices[0]].len();

        let total_weight = indices.iter().map(|i| self.weights[*i]).sum::<f64>();
        let total_sum = indices
            .iter()
            .map(|i| self.weights[*i] * self.residuals[*i])
            .sum::<f64>();
        if total_weight <= 0.0 {
            return None;
        }
        let parent_score = total_sum * total_sum / total_weight;

        let mut best: Option<Split> = None;
        let mut sorted = indices.to_vec();

        for feature in 0..n_features {
            sorted.sort_by(|left, right| {
                self.rows[*left][feature].total_cmp(&self.rows[*right][feature])
            });

            let mut left_weight = 0.0;
            let mut left_sum = 0.0;
            for position in 0..sorted.len() - 1 {
                let index = sorted[position];
                left_weight += self.weights[index];
                left_sum += self.weights[index] * self.residuals[index];

                let left_count = position + 1;
                let right_count = sorted.len() - left_count;
                if left_count < min_leaf || right_count < min_leaf {
                    continue;
                }

                let current = self.rows[index][feature];
                let next = self.rows[sorted[position + 1]][feature];
                if current == next {
                    continue;
                }

                let right_weight = total_weight - left_weight;
                if left_weight <= 0.0 || right_weight <= 0.0 {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let gain = left_sum * left_sum / left_weight + right_sum * right_sum / right_weight
                    - parent_score;

                if gain > MIN_SPLIT_GAIN && best.as_ref().is_none_or(|value| gain > value.gain) {
                    best = Some(Split {
                        feature,
                        threshold: current + (next - current) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }

    fn newton_step(&self, indices: &[usize]) -> f64 {
        let numerator = indices
            .iter()
            .map(|i| self.weights[*i] * self.residuals[*i])
            .sum::<f64>();
        let denominator = indices
            .iter()
            .map(|i| {
                let probability = self.probabilities[*i];
                self.weights[*i] * probability * (1.0 - probability)
            })
            .sum::<f64>();

        if denominator.abs() < MIN_DENOMINATOR {
            0.0
        } else {
            numerator / denominator
        }
    }
}
