use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};

use super::classifier::ClassifierBundle;
use super::similarity::SimilarityIndex;
use crate::model::{RulesManifest, TrainingMetadata};
use crate::util::{ensure_directory, read_json, sha256_file, write_json_pretty};

pub const RULES_FILENAME: &str = "rules.json";
pub const OTHERS_CLASSIFIER_FILENAME: &str = "clf_others.json";
pub const REMOVE_CLASSIFIER_FILENAME: &str = "clf_remove.json";
pub const MARKET_INDEX_FILENAME: &str = "market_index.json";
pub const MARKET_EMBEDDINGS_FILENAME: &str = "market_embeddings.bin";
pub const METADATA_FILENAME: &str = "meta.json";

/// Files covered by the checksums in `meta.json`, in write order.
pub const CHECKSUMMED_FILES: [&str; 5] = [
    RULES_FILENAME,
    OTHERS_CLASSIFIER_FILENAME,
    REMOVE_CLASSIFIER_FILENAME,
    MARKET_INDEX_FILENAME,
    MARKET_EMBEDDINGS_FILENAME,
];

/// Everything one training run produces; read-only once loaded.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub rules: RulesManifest,
    pub others: ClassifierBundle,
    pub remove: ClassifierBundle,
    pub index: SimilarityIndex,
    pub metadata: TrainingMetadata,
}

impl ModelArtifacts {
    /// Writes every artifact, then `meta.json` with checksums of the others.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        ensure_directory(dir)?;

        write_json_pretty(&dir.join(RULES_FILENAME), &self.rules)?;
        write_json_pretty(&dir.join(OTHERS_CLASSIFIER_FILENAME), &self.others)?;
        write_json_pretty(&dir.join(REMOVE_CLASSIFIER_FILENAME), &self.remove)?;
        self.index.save(
            &dir.join(MARKET_INDEX_FILENAME),
            &dir.join(MARKET_EMBEDDINGS_FILENAME),
        )?;

        self.metadata.artifact_checksums = checksum_artifacts(dir)?;
        write_json_pretty(&dir.join(METADATA_FILENAME), &self.metadata)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!(
                "model artifacts not found at {}; run `segcorrect train` first",
                dir.display()
            );
        }
        for filename in CHECKSUMMED_FILES.iter().chain([&METADATA_FILENAME]) {
            let path = dir.join(filename);
            if !path.is_file() {
                bail!(
                    "model artifact {} is missing; run `segcorrect train` first",
                    path.display()
                );
            }
        }

        let rules: RulesManifest = read_json(&dir.join(RULES_FILENAME))?;
        let others: ClassifierBundle = read_json(&dir.join(OTHERS_CLASSIFIER_FILENAME))?;
        let remove: ClassifierBundle = read_json(&dir.join(REMOVE_CLASSIFIER_FILENAME))?;
        let index = SimilarityIndex::load(
            &dir.join(MARKET_INDEX_FILENAME),
            &dir.join(MARKET_EMBEDDINGS_FILENAME),
        )?;
        let metadata: TrainingMetadata = read_json(&dir.join(METADATA_FILENAME))?;

        others
            .validate()
            .with_context(|| format!("invalid {OTHERS_CLASSIFIER_FILENAME}"))?;
        remove
            .validate()
            .with_context(|| format!("invalid {REMOVE_CLASSIFIER_FILENAME}"))?;

        Ok(Self {
            rules,
            others,
            remove,
            index,
            metadata,
        })
    }
}

pub fn checksum_artifacts(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut checksums = BTreeMap::new();
    for filename in CHECKSUMMED_FILES {
        checksums.insert(filename.to_string(), sha256_file(&dir.join(filename))?);
    }
    Ok(checksums)
}

/// Names of artifacts whose on-disk hash no longer matches `meta.json`.
pub fn stale_artifacts(dir: &Path, metadata: &TrainingMetadata) -> Result<Vec<String>> {
    let current = checksum_artifacts(dir)?;
    Ok(current
        .into_iter()
        .filter(|(filename, hash)| metadata.artifact_checksums.get(filename) != Some(hash))
        .map(|(filename, _)| filename)
        .collect())
}
