use std::collections::{BTreeMap, HashSet};

use crate::engine::outline::Outline;
use crate::model::{
    AddOthersRule, ConsolidateSiblingsRule, RemoveDeepSpecificRule, RemovedSegment, RulesManifest,
    TrainingRecord,
};

/// Whether the first corrected group named like `group_name` ended up with a catch-all.
pub(crate) fn corrected_group_has_catch_all(corrected: &Outline, group_name: &str) -> bool {
    let wanted = group_name.to_lowercase();
    corrected
        .segments()
        .iter()
        .position(|segment| segment.level > 0 && segment.name.to_lowercase() == wanted)
        .map(|index| corrected.has_catch_all_child(index))
        .unwrap_or(false)
}

pub(crate) fn extract_rules(records: &[TrainingRecord]) -> RulesManifest {
    let mut opportunities = 0usize;
    let mut applied = 0usize;

    for record in records {
        let ai = Outline::parse(&record.ai_segments);
        let corrected = Outline::parse(&record.corrected_segments);

        for (index, group) in ai.groups() {
            if group.children.len() < 2 {
                continue;
            }
            opportunities += 1;

            if !ai.has_catch_all_child(index) && corrected_group_has_catch_all(&corrected, &group.name)
            {
                applied += 1;
            }
        }
    }

    let mut removed_names = Vec::<RemovedSegment>::new();
    for record in records.iter().filter(|record| record.is_corrected) {
        let corrected_names = Outline::parse(&record.corrected_segments)
            .segments()
            .iter()
            .map(|segment| segment.name.clone())
            .collect::<HashSet<String>>();

        let mut seen = HashSet::<String>::new();
        for segment in Outline::parse(&record.ai_segments).segments() {
            if !seen.insert(segment.name.clone()) || corrected_names.contains(&segment.name) {
                continue;
            }
            removed_names.push(RemovedSegment {
                name: segment.name.clone(),
                level: segment.level,
                market: record.market_name.clone(),
            });
        }
    }

    let mut level_distribution = BTreeMap::<usize, usize>::new();
    for removed in &removed_names {
        *level_distribution.entry(removed.level).or_insert(0) += 1;
    }

    RulesManifest {
        add_others: AddOthersRule {
            description: "Add \"Others\" to parent groups with 2+ children and no catch-all"
                .to_string(),
            min_children: 2,
            confidence: if opportunities > 0 {
                applied as f64 / opportunities as f64
            } else {
                0.0
            },
            total_opportunities: opportunities,
            times_applied: applied,
        },
        remove_deep_specific: RemoveDeepSpecificRule {
            description: "Remove level 3+ sub-segments that are overly specific".to_string(),
            removed_names,
            level_distribution,
            confidence: 0.0,
        },
        consolidate_siblings: ConsolidateSiblingsRule {
            description: "Merge similar sub-segments into broader categories".to_string(),
            patterns: Vec::new(),
        },
    }
}
