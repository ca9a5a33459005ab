use std::time::Instant;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use super::{build_others_dataset, build_removal_dataset, extract_rules};
use super::{load_training_records, open_corpus_connection};
use crate::cli::{TrainArgs, resolve_artifact_dir, resolve_db_path};
use crate::engine::artifacts::ModelArtifacts;
use crate::engine::classifier::ClassifierBundle;
use crate::engine::features::{GROUP_FEATURE_NAMES, NODE_FEATURE_NAMES};
use crate::engine::gbdt::BoostingParams;
use crate::engine::similarity::SimilarityIndex;
use crate::model::{TrainingMetadata, TrainingRecord};
use crate::semantic::{SemanticModelConfig, embedder_for, resolve_model_config};
use crate::util::{now_utc_string, utc_compact_string};

const METADATA_MANIFEST_VERSION: u32 = 1;

pub fn run(args: TrainArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let artifact_dir = resolve_artifact_dir(&args.cache_root, args.artifact_dir.as_ref());
    let model = resolve_model_config(&args.model_id);
    let started = Instant::now();

    let connection = open_corpus_connection(&db_path)?;
    let records = load_training_records(&connection)?;
    info!(
        path = %db_path.display(),
        submissions = records.len(),
        corrected = records.iter().filter(|record| record.is_corrected).count(),
        "loaded training submissions"
    );

    let mut artifacts = train_artifacts(&records, &model, args.batch_size, BoostingParams::default())?;
    artifacts.save(&artifact_dir)?;

    info!(
        path = %artifact_dir.display(),
        run_id = %artifacts.metadata.run_id,
        markets = artifacts.metadata.market_count,
        others_samples = artifacts.metadata.others_classifier.samples,
        others_positives = artifacts.metadata.others_classifier.positives,
        remove_samples = artifacts.metadata.remove_classifier.samples,
        remove_positives = artifacts.metadata.remove_classifier.positives,
        add_others_confidence = artifacts.rules.add_others.confidence,
        duration_ms = started.elapsed().as_millis() as u64,
        "training complete"
    );

    Ok(())
}

/// Builds every artifact from the reviewed corpus without touching disk.
pub(crate) fn train_artifacts(
    records: &[TrainingRecord],
    model: &SemanticModelConfig,
    batch_size: usize,
    params: BoostingParams,
) -> Result<ModelArtifacts> {
    if records.is_empty() {
        bail!("no training submissions found in rd_submissions");
    }

    let rules = extract_rules(records);
    info!(
        opportunities = rules.add_others.total_opportunities,
        applied = rules.add_others.times_applied,
        removed_names = rules.remove_deep_specific.removed_names.len(),
        "extracted correction rules"
    );

    let others_data = build_others_dataset(records);
    if others_data.rows.is_empty() {
        bail!("no segment groups found in the generated outlines");
    }
    info!(
        samples = others_data.rows.len(),
        positives = others_data.positives(),
        "built catch-all dataset"
    );
    let (others, others_summary) = ClassifierBundle::train(
        "others",
        &GROUP_FEATURE_NAMES,
        &others_data.rows,
        &others_data.labels,
        params,
    )?;
    if others.model.is_none() {
        warn!("catch-all dataset holds a single class; classifier pass will be skipped");
    }

    let removal_data = build_removal_dataset(records);
    if removal_data.rows.is_empty() {
        bail!("no numbered segments found in the generated outlines");
    }
    info!(
        samples = removal_data.rows.len(),
        positives = removal_data.positives(),
        "built removal dataset"
    );
    let (remove, remove_summary) = ClassifierBundle::train(
        "remove",
        &NODE_FEATURE_NAMES,
        &removal_data.rows,
        &removal_data.labels,
        params,
    )?;
    if remove.model.is_none() {
        warn!("removal dataset holds a single class; removal pass will be skipped");
    }

    let embedder = embedder_for(model)?;
    let index = SimilarityIndex::build(records, embedder.as_ref(), batch_size);
    info!(
        markets = index.len(),
        model_id = %model.model_id,
        dimensions = model.dimensions,
        "built market similarity index"
    );

    let metadata = TrainingMetadata {
        manifest_version: METADATA_MANIFEST_VERSION,
        run_id: format!("train-{}", utc_compact_string(Utc::now())),
        created_at: now_utc_string(),
        total_submissions: records.len(),
        corrected_submissions: records.iter().filter(|record| record.is_corrected).count(),
        market_count: index.len(),
        others_classifier: others_summary,
        remove_classifier: remove_summary,
        embedder_name: model.model_id.clone(),
        embedding_dim: model.dimensions,
        embedding_backend: model.backend.clone(),
        artifact_checksums: Default::default(),
    };

    Ok(ModelArtifacts {
        rules,
        others,
        remove,
        index,
        metadata,
    })
}
