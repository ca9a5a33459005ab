use std::collections::{BTreeMap, HashMap};

use super::*;
use crate::commands::train::extract_rules;
use crate::engine::classifier::StandardScaler;
use crate::engine::gbdt::{BoostingParams, GradientBoostedTrees};
use crate::engine::similarity::SimilarityIndex;
use crate::model::{ClassifierSummary, TrainingMetadata, TrainingRecord};
use crate::semantic::{LocalHashEmbedder, resolve_model_config};

const SCENARIO_A: [&str; 6] = [
    "1. Battery Type",
    "1.1. Lithium-Ion",
    "1.2. Solid-State",
    "2. Vehicle Type",
    "2.1. Battery Electric Vehicle",
    "2.2. Plug-in Hybrid",
];

const DEEP_OUTLINE: [&str; 9] = [
    "1. Type",
    "1.1. Hardware",
    "1.1.1. Sensors",
    "1.1.2. Controllers",
    "1.1.3. Actuators",
    "1.1.4. Other Hardware",
    "1.2. Software",
    "1.2.1. Firmware",
    "1.2.2. Analytics",
];

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

/// Bundle whose booster has no trees, so every input scores `probability`.
fn constant_bundle(task: &str, probability: Option<f64>) -> ClassifierBundle {
    ClassifierBundle {
        task: task.to_string(),
        feature_names: (0..8).map(|index| format!("f{index}")).collect(),
        scaler: StandardScaler {
            mean: vec![0.0; 8],
            scale: vec![1.0; 8],
        },
        model: probability.map(|probability| GradientBoostedTrees {
            params: BoostingParams::default(),
            n_features: 8,
            init_score: (probability / (1.0 - probability)).ln(),
            trees: Vec::new(),
        }),
    }
}

fn summary() -> ClassifierSummary {
    ClassifierSummary {
        samples: 0,
        positives: 0,
        training_accuracy: 0.0,
    }
}

fn corpus() -> Vec<TrainingRecord> {
    vec![
        TrainingRecord::new(
            "Electric Vehicle Charging Market",
            owned(&["1. Charger Type", "1.1. AC Charger", "1.2. DC Fast Charger"]),
            owned(&[
                "1. Charger Type",
                "1.1. AC Charger",
                "1.2. DC Fast Charger",
                "1.3. Others",
            ]),
        ),
        TrainingRecord::new(
            "Cold Chain Market",
            owned(&["1. Type", "1.1. Frozen", "1.2. Chilled"]),
            owned(&["1. Type", "1.1. Frozen", "1.2. Chilled"]),
        ),
        TrainingRecord::new(
            "Smart Glass Market",
            owned(&["1. Technology", "1.1. Electrochromic", "1.2. SPD"]),
            owned(&["1. Technology", "1.1. Electrochromic", "1.2. SPD"]),
        ),
    ]
}

fn corrector(others: Option<f64>, remove: Option<f64>) -> SegmentCorrector {
    let records = corpus();
    let embedder = LocalHashEmbedder::new(resolve_model_config(""));
    let index = SimilarityIndex::build(&records, &embedder, 2);

    let artifacts = ModelArtifacts {
        rules: extract_rules(&records),
        others: constant_bundle("others", others),
        remove: constant_bundle("remove", remove),
        metadata: TrainingMetadata {
            manifest_version: 1,
            run_id: "train-test".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            total_submissions: records.len(),
            corrected_submissions: 1,
            market_count: index.len(),
            others_classifier: summary(),
            remove_classifier: summary(),
            embedder_name: index.model.model_id.clone(),
            embedding_dim: index.model.dimensions,
            embedding_backend: index.model.backend.clone(),
            artifact_checksums: BTreeMap::new(),
        },
        index,
    };
    SegmentCorrector::from_artifacts(artifacts).expect("corrector")
}

/// Every group at level <= 2 with two or more children must end with a catch-all.
fn assert_catch_all_complete(lines: &[String]) {
    let outline = Outline::parse(lines);
    for (index, group) in outline.groups() {
        if group.level <= RULE_MAX_PARENT_LEVEL && group.children.len() >= RULE_MIN_CHILDREN {
            assert!(
                outline.has_catch_all_child(index),
                "group {:?} lacks a catch-all in {lines:?}",
                group.line
            );
        }
    }
}

fn assert_removals_safe(input: &[&str], result: &CorrectionResult) {
    let outline = Outline::parse(input);
    let mut removed_under = HashMap::<usize, usize>::new();

    for change in result.changes.iter().filter(|change| change.kind == CorrectionKind::Remove) {
        let index = outline
            .segments()
            .iter()
            .position(|segment| segment.line == change.segment)
            .expect("removed line comes from the input");
        let segment = &outline.segments()[index];
        assert!(segment.level >= REMOVAL_MIN_LEVEL, "{} is too shallow", segment.line);
        assert!(segment.is_leaf(), "{} has children", segment.line);
        assert!(!segment.is_catch_all(), "{} is a catch-all", segment.line);
        assert!(change.confidence >= REMOVAL_THRESHOLD_FLOOR);

        let parent = segment.parent.expect("removed nodes have a parent");
        *removed_under.entry(parent).or_insert(0) += 1;
    }

    for (parent, removed) in removed_under {
        let remaining = outline.children(parent).count() - removed;
        assert!(remaining >= REMOVAL_MIN_REMAINING_SIBLINGS);
    }
}

#[test]
fn scenario_a_rule_adds_others_to_both_groups() {
    let result = corrector(Some(0.01), Some(0.01))
        .correct("Electric Vehicle Battery Market", &SCENARIO_A, 0.5)
        .expect("correct");

    assert_eq!(
        result.corrected_segments,
        owned(&[
            "1. Battery Type",
            "1.1. Lithium-Ion",
            "1.2. Solid-State",
            "1.3. Others",
            "2. Vehicle Type",
            "2.1. Battery Electric Vehicle",
            "2.2. Plug-in Hybrid",
            "2.3. Others",
        ])
    );
    assert_eq!(result.changes.len(), 2);
    assert!(result.changes.iter().all(|change| {
        change.kind == CorrectionKind::AddOthersRule && change.confidence == RULE_CONFIDENCE
    }));
    assert_eq!(
        result.changes[0].reason,
        "Rule: Group \"Battery Type\" has 2 children but no \"Others\""
    );
}

#[test]
fn classifier_catch_all_preempts_rule() {
    let result = corrector(Some(0.9), None)
        .correct("Electric Vehicle Battery Market", &SCENARIO_A, 0.5)
        .expect("correct");

    assert_eq!(result.corrected_segments[3], "1.3. Others");
    assert_eq!(result.corrected_segments[7], "2.3. Others");
    assert_eq!(result.changes.len(), 2);
    assert!(
        result
            .changes
            .iter()
            .all(|change| change.kind == CorrectionKind::AddOthersClassifier)
    );
    assert_eq!(result.changes[0].parent.as_deref(), Some("1. Battery Type"));
    assert_eq!(result.changes[0].confidence, 0.9);
    assert_eq!(
        result.changes[0].reason,
        "Classifier predicted \"Others\" needed under \"Battery Type\" (confidence: 90.0%)"
    );
}

#[test]
fn single_child_group_only_gets_classifier_catch_all() {
    let input = ["1. Region", "1.1. North America"];

    let declined = corrector(Some(0.2), None)
        .correct("Cold Chain Market", &input, 0.5)
        .expect("correct");
    assert_eq!(declined.corrected_segments, owned(&input));
    assert!(declined.changes.is_empty());

    let accepted = corrector(Some(0.8), None)
        .correct("Cold Chain Market", &input, 0.5)
        .expect("correct");
    assert_eq!(
        accepted.corrected_segments,
        owned(&["1. Region", "1.1. North America", "1.2. Others"])
    );
    assert_eq!(accepted.changes[0].kind, CorrectionKind::AddOthersClassifier);
}

#[test]
fn level_two_leaves_survive_confident_removal() {
    let result = corrector(None, Some(0.99))
        .correct("Electric Vehicle Battery Market", &SCENARIO_A, 0.0)
        .expect("correct");

    assert!(
        result
            .changes
            .iter()
            .all(|change| change.kind != CorrectionKind::Remove)
    );
    for line in SCENARIO_A {
        assert!(result.corrected_segments.contains(&line.to_string()));
    }
}

#[test]
fn removal_keeps_two_siblings_and_skips_catch_alls() {
    let input = [
        "1. Type",
        "1.1. Hardware",
        "1.1.1. Sensors",
        "1.1.2. Controllers",
        "1.1.3. Actuators",
        "1.1.4. Other Hardware",
    ];
    let result = corrector(None, Some(0.99))
        .correct("Industrial IoT Market", &input, 0.5)
        .expect("correct");

    let removed = result
        .changes
        .iter()
        .filter(|change| change.kind == CorrectionKind::Remove)
        .map(|change| change.segment.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(removed, vec!["1.1.1. Sensors", "1.1.2. Controllers"]);
    assert_eq!(
        result.corrected_segments,
        owned(&[
            "1. Type",
            "1.1. Hardware",
            "1.1.1. Actuators",
            "1.1.2. Other Hardware",
        ])
    );
    assert_eq!(result.changes[0].parent.as_deref(), Some("1.1. Hardware"));
    assert_eq!(
        result.changes[0].reason,
        "Classifier predicted removal (confidence: 99.0%)"
    );
    assert_removals_safe(&input, &result);
}

#[test]
fn removal_threshold_never_drops_below_floor() {
    let result = corrector(None, Some(0.7))
        .correct("Industrial IoT Market", &DEEP_OUTLINE, 0.1)
        .expect("correct");

    assert!(
        result
            .changes
            .iter()
            .all(|change| change.kind != CorrectionKind::Remove)
    );
}

#[test]
fn removals_stay_safe_across_thresholds() {
    let inputs: [&[&str]; 3] = [
        &DEEP_OUTLINE,
        &SCENARIO_A,
        &[
            "1. Application",
            "1.1. Industrial",
            "1.1.1. Mining",
            "1.1.2. Oil and Gas",
            "1.1.2.1. Upstream",
            "1.1.2.2. Downstream",
            "1.1.2.3. Midstream",
        ],
    ];

    for input in inputs {
        for threshold in [0.0, 0.5, 0.8, 1.0] {
            let result = corrector(Some(0.6), Some(0.95))
                .correct("Industrial IoT Market", input, threshold)
                .expect("correct");
            assert_removals_safe(input, &result);
            assert_catch_all_complete(&result.corrected_segments);
        }
    }
}

#[test]
fn children_under_unseen_prefixes_still_get_catch_alls() {
    let result = corrector(None, None)
        .correct("Cold Chain Market", &["1. Type", "2.1. Frozen", "2.2. Chilled"], 0.5)
        .expect("correct");

    assert_eq!(
        result.corrected_segments,
        owned(&["1. Type", "1.1. Frozen", "1.2. Chilled", "1.3. Others"])
    );
    assert_eq!(result.changes.len(), 1);
    assert_eq!(result.changes[0].kind, CorrectionKind::AddOthersRule);
    assert_eq!(result.changes[0].parent.as_deref(), Some("1. Type"));
    assert_catch_all_complete(&result.corrected_segments);

    let mixed = [
        "1. Application",
        "1.1. Retail",
        "3.1. Online",
        "3.2. Offline",
    ];
    for threshold in [0.0, 0.5, 1.0] {
        let result = corrector(Some(0.6), Some(0.95))
            .correct("Cold Chain Market", &mixed, threshold)
            .expect("correct");
        assert_catch_all_complete(&result.corrected_segments);
    }
    let result = corrector(None, None)
        .correct("Cold Chain Market", &mixed, 0.5)
        .expect("correct");
    assert_eq!(
        result.corrected_segments,
        owned(&[
            "1. Application",
            "1.1. Retail",
            "1.2. Online",
            "1.3. Offline",
            "1.4. Other Applications",
        ])
    );
}

#[test]
fn nested_catch_alls_land_after_their_own_siblings() {
    let input = [
        "1. Component",
        "1.1. Hardware",
        "1.1.1. Sensors",
        "1.1.2. Controllers",
    ];
    let result = corrector(Some(0.9), None)
        .correct("Industrial IoT Market", &input, 0.5)
        .expect("correct");

    assert_eq!(
        result.corrected_segments,
        owned(&[
            "1. Component",
            "1.1. Hardware",
            "1.1.1. Sensors",
            "1.1.2. Controllers",
            "1.1.3. Others",
            "1.2. Others",
        ])
    );
    assert_catch_all_complete(&result.corrected_segments);
}

#[test]
fn unnumbered_headers_pass_through() {
    let input = ["Executive Summary", "1. Type", "1.1. Frozen", "1.2. Chilled"];
    let result = corrector(None, None)
        .correct("Cold Chain Market", &input, 0.5)
        .expect("correct");

    assert_eq!(
        result.corrected_segments,
        owned(&[
            "Executive Summary",
            "1. Type",
            "1.1. Frozen",
            "1.2. Chilled",
            "1.3. Others",
        ])
    );
}

#[test]
fn similar_markets_are_deterministic_and_capped() {
    let corrector = corrector(None, None);
    let first = corrector
        .correct("Cold Chain Market", &["1. Type", "1.1. Frozen"], 0.5)
        .expect("correct");
    let second = corrector
        .correct("Cold Chain Market", &["1. Type", "1.1. Frozen"], 0.5)
        .expect("correct");

    assert_eq!(first, second);
    assert_eq!(first.similar_markets.len(), 3);
    assert_eq!(first.similar_markets[0].market, "Cold Chain Market");
    let scores = first
        .similar_markets
        .iter()
        .map(|market| market.similarity)
        .collect::<Vec<f64>>();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn empty_outline_yields_empty_result() {
    let result = corrector(Some(0.9), Some(0.9))
        .correct::<&str>("Cold Chain Market", &[], 0.5)
        .expect("correct");

    assert!(result.corrected_segments.is_empty());
    assert!(result.changes.is_empty());
}

#[test]
fn threshold_outside_unit_interval_is_rejected() {
    let corrector = corrector(None, None);
    assert!(corrector.correct("Cold Chain Market", &SCENARIO_A, 1.5).is_err());
    assert!(corrector.correct("Cold Chain Market", &SCENARIO_A, -0.1).is_err());
}

#[test]
fn mismatched_feature_width_is_an_error() {
    let mut corrector = corrector(Some(0.9), None);
    corrector.artifacts.others.scaler.mean.pop();
    corrector.artifacts.others.scaler.scale.pop();

    assert!(
        corrector
            .correct("Electric Vehicle Battery Market", &SCENARIO_A, 0.5)
            .is_err()
    );
}

#[test]
fn shared_corrector_reports_missing_artifacts() {
    let dir = std::env::temp_dir().join(format!("segcorrect-missing-{}", std::process::id()));
    let err = match SegmentCorrector::shared(&dir) {
        Ok(_) => panic!("loading from an empty path should fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("run `segcorrect train` first"));
}

#[test]
fn pipeline_runs_removal_before_catch_alls() {
    let position = |stage: CorrectionStage| {
        CorrectionStage::PIPELINE
            .iter()
            .position(|candidate| *candidate == stage)
            .expect("stage listed")
    };
    assert!(position(CorrectionStage::RemovalPass) < position(CorrectionStage::ClassifierCatchAll));
    assert!(position(CorrectionStage::ClassifierCatchAll) < position(CorrectionStage::RuleCatchAll));
    assert_eq!(CorrectionStage::PIPELINE.last(), Some(&CorrectionStage::Renumber));
}
