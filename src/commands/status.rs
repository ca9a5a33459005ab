use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::{StatusArgs, resolve_artifact_dir, resolve_db_path};
use crate::commands::train::{load_training_records, open_corpus_connection};
use crate::engine::artifacts::{METADATA_FILENAME, stale_artifacts};
use crate::model::TrainingMetadata;
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let artifact_dir = resolve_artifact_dir(&args.cache_root, args.artifact_dir.as_ref());
    let metadata_path = artifact_dir.join(METADATA_FILENAME);

    info!(cache_root = %args.cache_root.display(), "status requested");

    if metadata_path.exists() {
        let metadata: TrainingMetadata = read_json(&metadata_path)?;

        info!(
            run_id = %metadata.run_id,
            created_at = %metadata.created_at,
            submissions = metadata.total_submissions,
            corrected = metadata.corrected_submissions,
            markets = metadata.market_count,
            others_samples = metadata.others_classifier.samples,
            others_positives = metadata.others_classifier.positives,
            others_accuracy = metadata.others_classifier.training_accuracy,
            remove_samples = metadata.remove_classifier.samples,
            remove_positives = metadata.remove_classifier.positives,
            remove_accuracy = metadata.remove_classifier.training_accuracy,
            embedder = %metadata.embedder_name,
            embedding_dim = metadata.embedding_dim,
            backend = %metadata.embedding_backend,
            "loaded training metadata"
        );

        match stale_artifacts(&artifact_dir, &metadata) {
            Ok(stale) if stale.is_empty() => {
                info!(path = %artifact_dir.display(), "artifact checksums match")
            }
            Ok(stale) => warn!(
                path = %artifact_dir.display(),
                stale = %stale.join(","),
                "artifacts changed since training; retrain with `segcorrect train`"
            ),
            Err(err) => warn!(error = %err, "artifact set is incomplete"),
        }
    } else {
        warn!(path = %metadata_path.display(), "training metadata missing");
    }

    if db_path.exists() {
        let connection = open_corpus_connection(&db_path)?;
        let submissions = query_count(&connection, "SELECT COUNT(*) FROM rd_submissions")
            .context("rd_submissions table is not readable")?;
        let corrected = load_training_records(&connection)?
            .iter()
            .filter(|record| record.is_corrected)
            .count();

        info!(
            path = %db_path.display(),
            submissions,
            corrected,
            "database status"
        );
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    Ok(())
}

fn query_count(conn: &Connection, sql: &str) -> Result<i64> {
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
