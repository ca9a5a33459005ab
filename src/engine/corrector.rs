//! The correction pipeline run for every generated outline.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use super::artifacts::ModelArtifacts;
use super::classifier::ClassifierBundle;
use super::features::{group_features, node_features};
use super::naming::pick_catch_all_name;
use super::outline::{Outline, format_line, next_sibling_numbering, renumber, strip_numbering};
use super::similarity::SimilarityHit;
use crate::model::{Correction, CorrectionKind, CorrectionResult, SimilarMarket};
use crate::semantic::{TextEmbedder, embedder_for};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
/// Removals always need at least this much confidence.
pub const REMOVAL_THRESHOLD_FLOOR: f64 = 0.75;
pub const RULE_CONFIDENCE: f64 = 0.7;
pub const RULE_MIN_CHILDREN: usize = 2;
pub const RULE_MAX_PARENT_LEVEL: usize = 2;
pub const REMOVAL_MIN_LEVEL: usize = 3;
pub const REMOVAL_MIN_REMAINING_SIBLINGS: usize = 2;
pub const PRECEDENT_MIN_SCORE: f64 = 0.5;
const SIMILAR_CANDIDATES: usize = 5;
const SIMILAR_REPORTED: usize = 3;

static SHARED: OnceCell<SegmentCorrector> = OnceCell::new();

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CorrectionStage {
    SimilarityLookup,
    RemovalPass,
    PatternTransfer,
    ClassifierCatchAll,
    RuleCatchAll,
    Renumber,
}

impl CorrectionStage {
    pub const PIPELINE: [Self; 6] = [
        Self::SimilarityLookup,
        Self::RemovalPass,
        Self::PatternTransfer,
        Self::ClassifierCatchAll,
        Self::RuleCatchAll,
        Self::Renumber,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimilarityLookup => "similarity-lookup",
            Self::RemovalPass => "removal-pass",
            Self::PatternTransfer => "pattern-transfer",
            Self::ClassifierCatchAll => "classifier-catch-all",
            Self::RuleCatchAll => "rule-catch-all",
            Self::Renumber => "renumber",
        }
    }
}

pub struct SegmentCorrector {
    artifacts: ModelArtifacts,
    embedder: Box<dyn TextEmbedder>,
    source_dir: Option<PathBuf>,
}

impl SegmentCorrector {
    pub fn from_artifacts(artifacts: ModelArtifacts) -> Result<Self> {
        let embedder = embedder_for(&artifacts.index.model)?;
        Ok(Self {
            artifacts,
            embedder,
            source_dir: None,
        })
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let artifacts = ModelArtifacts::load(dir)?;
        info!(
            path = %dir.display(),
            run_id = %artifacts.metadata.run_id,
            markets = artifacts.index.len(),
            embedder = %artifacts.index.model.model_id,
            "loaded correction model"
        );

        if artifacts.index.is_empty() {
            warn!("market index is empty; no similar markets will be reported");
        }

        let mut corrector = Self::from_artifacts(artifacts)?;
        corrector.source_dir = Some(dir.to_path_buf());
        Ok(corrector)
    }

    /// Process-wide corrector, loaded from `dir` on first use and immutable afterwards.
    pub fn shared(dir: &Path) -> Result<&'static Self> {
        let corrector = SHARED.get_or_try_init(|| Self::load(dir))?;
        if corrector.source_dir.as_deref() != Some(dir) {
            bail!(
                "correction model already loaded from {}; cannot switch to {}",
                corrector
                    .source_dir
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default(),
                dir.display()
            );
        }
        Ok(corrector)
    }

    pub fn artifacts(&self) -> &ModelArtifacts {
        &self.artifacts
    }

    pub fn correct<S: AsRef<str>>(
        &self,
        market_name: &str,
        ai_segments: &[S],
        confidence_threshold: f64,
    ) -> Result<CorrectionResult> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            bail!("confidence threshold must be within [0, 1], got {confidence_threshold}");
        }

        let mut segments = ai_segments
            .iter()
            .map(|line| line.as_ref().to_string())
            .collect::<Vec<String>>();
        let mut changes = Vec::<Correction>::new();
        let mut similar = Vec::<SimilarityHit<'_>>::new();

        for stage in CorrectionStage::PIPELINE {
            let logged_before = changes.len();
            segments = match stage {
                CorrectionStage::SimilarityLookup => {
                    similar = self.artifacts.index.query(
                        self.embedder.as_ref(),
                        market_name,
                        &segments,
                        SIMILAR_CANDIDATES,
                    )?;
                    segments
                }
                CorrectionStage::RemovalPass => apply_removal_classifier(
                    &self.artifacts.remove,
                    segments,
                    confidence_threshold,
                    &mut changes,
                )?,
                CorrectionStage::PatternTransfer => apply_pattern_transfer(segments, &similar),
                CorrectionStage::ClassifierCatchAll => apply_others_classifier(
                    &self.artifacts.others,
                    segments,
                    confidence_threshold,
                    &mut changes,
                )?,
                CorrectionStage::RuleCatchAll => apply_others_rule(segments, &mut changes),
                CorrectionStage::Renumber => renumber(&segments),
            };

            debug!(
                stage = stage.as_str(),
                corrections = changes.len() - logged_before,
                segments = segments.len(),
                "correction stage finished"
            );
        }

        Ok(CorrectionResult {
            corrected_segments: segments,
            changes,
            similar_markets: similar
                .iter()
                .take(SIMILAR_REPORTED)
                .map(|hit| SimilarMarket {
                    market: hit.record.market_name.clone(),
                    similarity: round3(hit.score),
                })
                .collect(),
        })
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Drops deep, specific leaves the removal model is confident about.
pub fn apply_removal_classifier(
    bundle: &ClassifierBundle,
    segments: Vec<String>,
    threshold: f64,
    changes: &mut Vec<Correction>,
) -> Result<Vec<String>> {
    if bundle.model.is_none() {
        debug!("removal model was trained on a single class; skipping removals");
        return Ok(segments);
    }

    let threshold = threshold.max(REMOVAL_THRESHOLD_FLOOR);
    let outline = Outline::parse(&segments);
    let mut removed = vec![false; outline.len()];
    let mut removed_under = HashMap::<usize, usize>::new();

    for (index, segment) in outline.segments().iter().enumerate() {
        if segment.level < REMOVAL_MIN_LEVEL || segment.is_catch_all() || !segment.is_leaf() {
            continue;
        }
        let Some(parent) = segment.parent else {
            continue;
        };

        let Some(probability) = bundle.positive_probability(&node_features(&outline, index))?
        else {
            continue;
        };
        if probability < threshold {
            continue;
        }

        let already_removed = removed_under.get(&parent).copied().unwrap_or(0);
        let remaining = outline
            .sibling_count(index)
            .saturating_sub(already_removed + 1);
        if remaining < REMOVAL_MIN_REMAINING_SIBLINGS {
            continue;
        }

        removed[index] = true;
        *removed_under.entry(parent).or_insert(0) += 1;
        changes.push(Correction {
            kind: CorrectionKind::Remove,
            segment: segment.line.clone(),
            parent: Some(outline.segments()[parent].line.clone()),
            confidence: round3(probability),
            reason: format!(
                "Classifier predicted removal (confidence: {})",
                percent(probability)
            ),
        });
    }

    Ok(segments
        .into_iter()
        .zip(removed)
        .filter(|(_, removed)| !removed)
        .map(|(line, _)| line)
        .collect())
}

/// Reserved: identifies the closest corrected precedent and reports its diff, changes nothing.
pub fn apply_pattern_transfer(segments: Vec<String>, similar: &[SimilarityHit<'_>]) -> Vec<String> {
    let Some(precedent) = similar
        .iter()
        .find(|hit| hit.record.is_corrected && hit.score > PRECEDENT_MIN_SCORE)
    else {
        return segments;
    };

    let ai_names = precedent
        .record
        .ai_segments
        .iter()
        .map(|line| strip_numbering(line))
        .collect::<HashSet<String>>();
    let corrected_names = precedent
        .record
        .corrected_segments
        .iter()
        .map(|line| strip_numbering(line))
        .collect::<HashSet<String>>();

    debug!(
        market = %precedent.record.market_name,
        position = precedent.position,
        score = precedent.score,
        removed = ai_names.difference(&corrected_names).count(),
        added = corrected_names.difference(&ai_names).count(),
        "precedent market available"
    );

    segments
}

struct Insertion {
    after: usize,
    parent_level: usize,
    line: String,
}

fn catch_all_insertion(outline: &Outline, group_index: usize) -> Option<(Insertion, &'static str)> {
    let group = &outline.segments()[group_index];
    let last_child = *group.children.last()?;
    let label = pick_catch_all_name(&group.name);
    let numbering = next_sibling_numbering(&outline.segments()[last_child].numbering);

    Some((
        Insertion {
            after: outline.subtree_end(last_child),
            parent_level: group.level,
            line: format_line(&numbering, label),
        },
        label,
    ))
}

fn insert_segments(mut segments: Vec<String>, mut insertions: Vec<Insertion>) -> Vec<String> {
    // Later positions first; at a shared position the shallower group goes in first so the
    // deeper group's catch-all ends up directly after its siblings.
    insertions.sort_by(|left, right| {
        right
            .after
            .cmp(&left.after)
            .then(left.parent_level.cmp(&right.parent_level))
    });
    for insertion in insertions {
        segments.insert(insertion.after + 1, insertion.line);
    }
    segments
}

/// Adds catch-all children to groups the catch-all model flags.
pub fn apply_others_classifier(
    bundle: &ClassifierBundle,
    segments: Vec<String>,
    threshold: f64,
    changes: &mut Vec<Correction>,
) -> Result<Vec<String>> {
    if bundle.model.is_none() {
        debug!("catch-all model was trained on a single class; skipping classifier pass");
        return Ok(segments);
    }

    let outline = Outline::parse(&segments);
    let mut insertions = Vec::<Insertion>::new();

    for (index, group) in outline.groups() {
        if outline.has_catch_all_child(index) {
            continue;
        }

        let Some(probability) = bundle.positive_probability(&group_features(&outline, index))?
        else {
            continue;
        };
        if probability < threshold {
            continue;
        }

        let Some((insertion, label)) = catch_all_insertion(&outline, index) else {
            continue;
        };
        changes.push(Correction {
            kind: CorrectionKind::AddOthersClassifier,
            segment: insertion.line.clone(),
            parent: Some(group.line.clone()),
            confidence: round3(probability),
            reason: format!(
                "Classifier predicted \"{label}\" needed under \"{}\" (confidence: {})",
                group.name,
                percent(probability)
            ),
        });
        insertions.push(insertion);
    }

    Ok(insert_segments(segments, insertions))
}

/// Baseline: shallow groups with several children always end with a catch-all.
pub fn apply_others_rule(segments: Vec<String>, changes: &mut Vec<Correction>) -> Vec<String> {
    let outline = Outline::parse(&segments);
    if outline.is_empty() {
        return segments;
    }
    let handled = changes
        .iter()
        .filter(|change| change.kind == CorrectionKind::AddOthersClassifier)
        .filter_map(|change| change.parent.clone())
        .collect::<HashSet<String>>();
    let mut insertions = Vec::<Insertion>::new();

    for (index, group) in outline.groups() {
        if group.children.len() < RULE_MIN_CHILDREN
            || group.level > RULE_MAX_PARENT_LEVEL
            || outline.has_catch_all_child(index)
            || handled.contains(&group.line)
        {
            continue;
        }

        let Some((insertion, _)) = catch_all_insertion(&outline, index) else {
            continue;
        };
        changes.push(Correction {
            kind: CorrectionKind::AddOthersRule,
            segment: insertion.line.clone(),
            parent: Some(group.line.clone()),
            confidence: RULE_CONFIDENCE,
            reason: format!(
                "Rule: Group \"{}\" has {} children but no \"Others\"",
                group.name,
                group.children.len()
            ),
        });
        insertions.push(insertion);
    }

    insert_segments(segments, insertions)
}

#[cfg(test)]
mod tests;
