use std::collections::HashSet;

use super::rules::corrected_group_has_catch_all;
use crate::engine::features::{group_features, node_features};
use crate::engine::outline::Outline;
use crate::model::TrainingRecord;

#[derive(Debug, Clone, Default)]
pub(crate) struct LabeledDataset {
    pub(crate) rows: Vec<Vec<f64>>,
    pub(crate) labels: Vec<bool>,
}

impl LabeledDataset {
    fn push(&mut self, row: &[f64], label: bool) {
        self.rows.push(row.to_vec());
        self.labels.push(label);
    }

    pub(crate) fn positives(&self) -> usize {
        self.labels.iter().filter(|label| **label).count()
    }
}

/// One row per generated group; positive when review added a catch-all to it.
pub(crate) fn build_others_dataset(records: &[TrainingRecord]) -> LabeledDataset {
    let mut dataset = LabeledDataset::default();

    for record in records {
        let ai = Outline::parse(&record.ai_segments);
        let corrected = Outline::parse(&record.corrected_segments);

        for (index, group) in ai.groups() {
            let label = !ai.has_catch_all_child(index)
                && corrected_group_has_catch_all(&corrected, &group.name);
            dataset.push(&group_features(&ai, index), label);
        }
    }

    dataset
}

/// One row per generated numbered segment; positive when review dropped its name.
pub(crate) fn build_removal_dataset(records: &[TrainingRecord]) -> LabeledDataset {
    let mut dataset = LabeledDataset::default();

    for record in records {
        let ai = Outline::parse(&record.ai_segments);
        let corrected_names = Outline::parse(&record.corrected_segments)
            .segments()
            .iter()
            .map(|segment| segment.name.clone())
            .collect::<HashSet<String>>();

        for (index, segment) in ai.segments().iter().enumerate() {
            if segment.level == 0 {
                continue;
            }
            let removed = !corrected_names.contains(&segment.name);
            dataset.push(&node_features(&ai, index), removed);
        }
    }

    dataset
}
