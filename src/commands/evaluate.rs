use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{EvaluateArgs, resolve_artifact_dir, resolve_db_path};
use crate::commands::train::{
    corrected_group_has_catch_all, load_training_records, open_corpus_connection,
};
use crate::engine::corrector::SegmentCorrector;
use crate::engine::outline::{Outline, strip_numbering};
use crate::model::{
    CorrectionKind, EvaluationCounts, EvaluationRecord, EvaluationReport, TrainingRecord,
};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

const EVALUATION_MANIFEST_VERSION: u32 = 1;

pub fn run(args: EvaluateArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let artifact_dir = resolve_artifact_dir(&args.cache_root, args.artifact_dir.as_ref());
    let run_id = format!("evaluate-{}", utc_compact_string(Utc::now()));
    let report_path = match args.report_path.clone() {
        Some(path) => path,
        None => {
            let manifest_dir = args.cache_root.join("manifests");
            ensure_directory(&manifest_dir)?;
            manifest_dir.join(format!("{run_id}.json"))
        }
    };

    let connection = open_corpus_connection(&db_path)?;
    let records = load_training_records(&connection)?;
    let corrector = SegmentCorrector::shared(&artifact_dir)?;

    let report = evaluate_records(corrector, &records, args.confidence, run_id)?;
    if report.counts.corrected_records == 0 {
        warn!("no corrected submissions to replay; report holds no metrics");
    }
    write_json_pretty(&report_path, &report)?;

    info!(
        path = %report_path.display(),
        records = report.counts.records_total,
        replayed = report.counts.corrected_records,
        others_expected = report.counts.others_expected,
        others_matched = report.counts.others_matched,
        removals_proposed = report.counts.removals_proposed,
        removals_confirmed = report.counts.removals_confirmed,
        others_recall = report.others_recall.unwrap_or_default(),
        removal_precision = report.removal_precision.unwrap_or_default(),
        "evaluation complete"
    );

    Ok(())
}

/// Replays every reviewed-and-changed submission and scores the proposals against the review.
pub(crate) fn evaluate_records(
    corrector: &SegmentCorrector,
    records: &[TrainingRecord],
    confidence_threshold: f64,
    run_id: String,
) -> Result<EvaluationReport> {
    let mut counts = EvaluationCounts {
        records_total: records.len(),
        corrected_records: 0,
        others_expected: 0,
        others_matched: 0,
        others_proposed: 0,
        removals_proposed: 0,
        removals_confirmed: 0,
    };
    let mut evaluated = Vec::<EvaluationRecord>::new();

    for record in records.iter().filter(|record| record.is_corrected) {
        let result =
            corrector.correct(&record.market_name, &record.ai_segments, confidence_threshold)?;

        let others_expected = expected_catch_all_groups(record);
        let others_proposed = result
            .changes
            .iter()
            .filter(|change| change.kind.is_addition())
            .filter_map(|change| change.parent.as_deref())
            .map(strip_numbering)
            .collect::<Vec<String>>();
        let removals_proposed = result
            .changes
            .iter()
            .filter(|change| change.kind == CorrectionKind::Remove)
            .map(|change| strip_numbering(&change.segment))
            .collect::<Vec<String>>();

        let corrected_names = record
            .corrected_segments
            .iter()
            .map(|line| strip_numbering(line))
            .collect::<HashSet<String>>();
        let removals_confirmed = removals_proposed
            .iter()
            .filter(|name| !corrected_names.contains(*name))
            .count();
        let others_matched = others_expected
            .iter()
            .filter(|name| others_proposed.contains(*name))
            .count();

        counts.corrected_records += 1;
        counts.others_expected += others_expected.len();
        counts.others_matched += others_matched;
        counts.others_proposed += others_proposed.len();
        counts.removals_proposed += removals_proposed.len();
        counts.removals_confirmed += removals_confirmed;

        evaluated.push(EvaluationRecord {
            market: record.market_name.clone(),
            others_expected,
            others_proposed,
            removals_proposed,
            removals_confirmed,
        });
    }

    Ok(EvaluationReport {
        manifest_version: EVALUATION_MANIFEST_VERSION,
        run_id,
        generated_at: now_utc_string(),
        confidence_threshold,
        embedder_name: corrector.artifacts().metadata.embedder_name.clone(),
        others_recall: ratio(counts.others_matched, counts.others_expected),
        removal_precision: ratio(counts.removals_confirmed, counts.removals_proposed),
        counts,
        records: evaluated,
    })
}

/// Generated groups without a catch-all that gained one during review.
fn expected_catch_all_groups(record: &TrainingRecord) -> Vec<String> {
    let ai = Outline::parse(&record.ai_segments);
    let corrected = Outline::parse(&record.corrected_segments);

    ai.groups()
        .filter(|(index, group)| {
            !ai.has_catch_all_child(*index) && corrected_group_has_catch_all(&corrected, &group.name)
        })
        .map(|(_, group)| group.name.clone())
        .collect()
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::train::train_artifacts;
    use crate::engine::gbdt::BoostingParams;
    use crate::semantic::{DEFAULT_MODEL_ID, resolve_model_config};

    fn lines(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn records() -> Vec<TrainingRecord> {
        vec![
            TrainingRecord::new(
                "Electric Vehicle Charging Market",
                lines(&["1. Charger Type", "1.1. AC", "1.2. DC", "2. Region", "2.1. Europe"]),
                lines(&[
                    "1. Charger Type",
                    "1.1. AC",
                    "1.2. DC",
                    "1.3. Others",
                    "2. Region",
                    "2.1. Europe",
                ]),
            ),
            TrainingRecord::new(
                "Cold Chain Market",
                lines(&["1. Type", "1.1. Frozen", "1.2. Chilled", "1.3. Others"]),
                lines(&["1. Type", "1.1. Frozen", "1.2. Chilled", "1.3. Others"]),
            ),
            TrainingRecord::new(
                "Smart Glass Market",
                lines(&["1. Technology", "1.1. Electrochromic", "1.2. SPD"]),
                lines(&[
                    "1. Technology",
                    "1.1. Electrochromic",
                    "1.2. SPD",
                    "1.3. Other Technologies",
                ]),
            ),
        ]
    }

    #[test]
    fn expected_groups_are_those_review_completed() {
        let records = records();
        assert_eq!(expected_catch_all_groups(&records[0]), vec!["Charger Type"]);
        assert!(expected_catch_all_groups(&records[1]).is_empty());
    }

    #[test]
    fn replay_scores_only_corrected_records() {
        let records = records();
        let params = BoostingParams {
            n_estimators: 10,
            ..BoostingParams::default()
        };
        let artifacts =
            train_artifacts(&records, &resolve_model_config(""), 8, params).expect("train");
        let corrector = SegmentCorrector::from_artifacts(artifacts).expect("corrector");

        let report = evaluate_records(&corrector, &records, 0.5, "evaluate-test".to_string())
            .expect("evaluate");

        assert_eq!(report.counts.records_total, 3);
        assert_eq!(report.counts.corrected_records, 2);
        assert_eq!(report.counts.others_expected, 2);
        assert_eq!(report.counts.others_matched, 2);
        assert_eq!(report.others_recall, Some(1.0));
        assert!(report.counts.removals_confirmed <= report.counts.removals_proposed);
        assert_eq!(report.records[1].market, "Smart Glass Market");
        assert_eq!(report.embedder_name, DEFAULT_MODEL_ID);
    }

    #[test]
    fn ratio_is_undefined_without_denominator() {
        assert_eq!(ratio(0, 0), None);
        assert_eq!(ratio(1, 4), Some(0.25));
    }
}
