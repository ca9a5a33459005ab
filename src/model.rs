use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::engine::outline::strip_numbering;

/// One historical submission: the generated outline and what a reviewer accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub market_name: String,
    pub ai_segments: Vec<String>,
    pub corrected_segments: Vec<String>,
    pub is_corrected: bool,
}

impl TrainingRecord {
    pub fn new(
        market_name: impl Into<String>,
        ai_segments: Vec<String>,
        corrected_segments: Vec<String>,
    ) -> Self {
        let is_corrected = name_set(&ai_segments) != name_set(&corrected_segments);
        Self {
            market_name: market_name.into(),
            ai_segments,
            corrected_segments,
            is_corrected,
        }
    }
}

fn name_set(lines: &[String]) -> HashSet<String> {
    lines.iter().map(|line| strip_numbering(line)).collect()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CorrectionKind {
    #[serde(rename = "remove")]
    Remove,
    #[serde(rename = "add_others")]
    AddOthersClassifier,
    #[serde(rename = "add_others_rule")]
    AddOthersRule,
}

impl CorrectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::AddOthersClassifier => "add_others",
            Self::AddOthersRule => "add_others_rule",
        }
    }

    pub fn is_addition(self) -> bool {
        matches!(self, Self::AddOthersClassifier | Self::AddOthersRule)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    #[serde(rename = "type")]
    pub kind: CorrectionKind,
    pub segment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMarket {
    pub market: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub corrected_segments: Vec<String>,
    pub changes: Vec<Correction>,
    pub similar_markets: Vec<SimilarMarket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOthersRule {
    pub description: String,
    pub min_children: usize,
    pub confidence: f64,
    pub total_opportunities: usize,
    pub times_applied: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedSegment {
    pub name: String,
    pub level: usize,
    pub market: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDeepSpecificRule {
    pub description: String,
    pub removed_names: Vec<RemovedSegment>,
    pub level_distribution: BTreeMap<usize, usize>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidateSiblingsRule {
    pub description: String,
    pub patterns: Vec<String>,
}

/// Aggregate statistics mined from the corpus. Informational, never executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesManifest {
    pub add_others: AddOthersRule,
    pub remove_deep_specific: RemoveDeepSpecificRule,
    pub consolidate_siblings: ConsolidateSiblingsRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSummary {
    pub samples: usize,
    pub positives: usize,
    pub training_accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub manifest_version: u32,
    pub run_id: String,
    pub created_at: String,
    pub total_submissions: usize,
    pub corrected_submissions: usize,
    pub market_count: usize,
    pub others_classifier: ClassifierSummary,
    pub remove_classifier: ClassifierSummary,
    pub embedder_name: String,
    pub embedding_dim: usize,
    pub embedding_backend: String,
    #[serde(default)]
    pub artifact_checksums: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationCounts {
    pub records_total: usize,
    pub corrected_records: usize,
    pub others_expected: usize,
    pub others_matched: usize,
    pub others_proposed: usize,
    pub removals_proposed: usize,
    pub removals_confirmed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub market: String,
    pub others_expected: Vec<String>,
    pub others_proposed: Vec<String>,
    pub removals_proposed: Vec<String>,
    pub removals_confirmed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub confidence_threshold: f64,
    pub embedder_name: String,
    pub counts: EvaluationCounts,
    pub others_recall: Option<f64>,
    pub removal_precision: Option<f64>,
    pub records: Vec<EvaluationRecord>,
}
