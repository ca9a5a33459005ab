use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::outline::Outline;
use crate::model::TrainingRecord;
use crate::semantic::{
    EMBEDDING_VALUE_BYTES, SemanticModelConfig, TextEmbedder, decode_embedding_blob, dot_product,
    encode_embedding_blob, normalize_vector,
};
use crate::util::{read_json, write_bytes, write_json_pretty};

/// Embedding rows kept parallel to the market records they were built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityIndex {
    pub model: SemanticModelConfig,
    pub markets: Vec<TrainingRecord>,
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SimilarityHit<'a> {
    pub position: usize,
    pub score: f64,
    pub record: &'a TrainingRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarketIndexManifest {
    manifest_version: u32,
    model: SemanticModelConfig,
    market_count: usize,
    markets: Vec<TrainingRecord>,
}

/// `"{market}: {level-1 names joined by ', '}"`
pub fn market_surrogate_text<S: AsRef<str>>(market_name: &str, segments: &[S]) -> String {
    let outline = Outline::parse(segments);
    let top_level = outline
        .segments()
        .iter()
        .filter(|segment| segment.level == 1)
        .map(|segment| segment.name.as_str())
        .collect::<Vec<&str>>();
    format!("{market_name}: {}", top_level.join(", "))
}

impl SimilarityIndex {
    pub fn build(
        records: &[TrainingRecord],
        embedder: &dyn TextEmbedder,
        batch_size: usize,
    ) -> Self {
        let texts = records
            .iter()
            .map(|record| market_surrogate_text(&record.market_name, &record.ai_segments))
            .collect::<Vec<String>>();

        let mut embeddings = Vec::<Vec<f32>>::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            for mut vector in embedder.embed_batch(batch) {
                normalize_vector(&mut vector);
                embeddings.push(vector);
            }
        }

        Self {
            model: embedder.config().clone(),
            markets: records.to_vec(),
            embeddings,
        }
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Top `k` markets by cosine similarity; equal scores keep insertion order.
    pub fn query<S: AsRef<str>>(
        &self,
        embedder: &dyn TextEmbedder,
        market_name: &str,
        segments: &[S],
        k: usize,
    ) -> Result<Vec<SimilarityHit<'_>>> {
        if embedder.config().dimensions != self.model.dimensions {
            bail!(
                "embedder '{}' produces {} dimensions but the index was built with {}",
                embedder.config().model_id,
                embedder.config().dimensions,
                self.model.dimensions
            );
        }

        let mut query = embedder.embed(&market_surrogate_text(market_name, segments));
        normalize_vector(&mut query);

        let mut scored = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(position, row)| (position, dot_product(row, &query)))
            .collect::<Vec<(usize, f64)>>();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| SimilarityHit {
                position,
                score,
                record: &self.markets[position],
            })
            .collect())
    }

    pub fn save(&self, manifest_path: &Path, embeddings_path: &Path) -> Result<()> {
        let manifest = MarketIndexManifest {
            manifest_version: 1,
            model: self.model.clone(),
            market_count: self.markets.len(),
            markets: self.markets.clone(),
        };
        write_json_pretty(manifest_path, &manifest)?;

        let blob = self
            .embeddings
            .iter()
            .flat_map(|row| encode_embedding_blob(row))
            .collect::<Vec<u8>>();
        write_bytes(embeddings_path, &blob)
    }

    pub fn load(manifest_path: &Path, embeddings_path: &Path) -> Result<Self> {
        let manifest: MarketIndexManifest = read_json(manifest_path)?;
        if manifest.market_count != manifest.markets.len() {
            bail!(
                "{} declares {} markets but lists {}",
                manifest_path.display(),
                manifest.market_count,
                manifest.markets.len()
            );
        }

        let blob = fs::read(embeddings_path)
            .with_context(|| format!("failed to read {}", embeddings_path.display()))?;
        let row_bytes = manifest.model.dimensions * EMBEDDING_VALUE_BYTES;
        if row_bytes == 0 || blob.len() != row_bytes * manifest.markets.len() {
            bail!(
                "{} holds {} bytes, expected {} rows of {} dimensions",
                embeddings_path.display(),
                blob.len(),
                manifest.markets.len(),
                manifest.model.dimensions
            );
        }

        let embeddings = blob
            .chunks_exact(row_bytes)
            .map(|chunk| decode_embedding_blob(chunk, manifest.model.dimensions))
            .collect::<Option<Vec<Vec<f32>>>>()
            .with_context(|| format!("malformed embedding rows in {}", embeddings_path.display()))?;

        Ok(Self {
            model: manifest.model,
            markets: manifest.markets,
            embeddings,
        })
    }
}
