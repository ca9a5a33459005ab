use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_MODEL_ID: &str = "miniLM-L6-v2-local-v1";
/// Upstream sentence encoder the local backend stands in for.
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-hash-v1";

/// Bytes per stored embedding component.
pub const EMBEDDING_VALUE_BYTES: usize = std::mem::size_of::<f32>();

const MARKET_WORD_WEIGHT: f32 = 1.0;
const DIMENSION_PHRASE_WEIGHT: f32 = 2.0;
const DIMENSION_WORD_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

pub fn resolve_model_config(model_id: &str) -> SemanticModelConfig {
    let model_id = match model_id.trim() {
        "" => DEFAULT_MODEL_ID,
        other => other,
    };
    let model_name = if model_id == DEFAULT_MODEL_ID {
        DEFAULT_MODEL_NAME
    } else {
        model_id
    };

    SemanticModelConfig {
        model_id: model_id.to_string(),
        model_name: model_name.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

/// Sentence encoder producing unit-length vectors of a fixed dimension.
pub trait TextEmbedder: Send + Sync {
    fn config(&self) -> &SemanticModelConfig;

    fn embed(&self, text: &str) -> Vec<f32>;

    /// Encodes a batch. Output for one text never depends on its batch neighbours.
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Feature-hashing encoder for market surrogate texts (`"{market}: {dimension}, ..."`).
///
/// Whole dimension names carry the most weight, so markets segmented along the same
/// dimensions land close together even when their names share no words.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    config: SemanticModelConfig,
}

impl LocalHashEmbedder {
    pub fn new(config: SemanticModelConfig) -> Self {
        Self { config }
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket % vector.len()] += sign * weight;
    }
}

impl TextEmbedder for LocalHashEmbedder {
    fn config(&self) -> &SemanticModelConfig {
        &self.config
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0_f32; self.config.dimensions];
        if vector.is_empty() {
            return vector;
        }

        for (feature, weight) in surrogate_features(text) {
            self.accumulate(&mut vector, &feature, weight);
        }
        normalize_vector(&mut vector);
        vector
    }
}

pub fn embedder_for(config: &SemanticModelConfig) -> Result<Box<dyn TextEmbedder>> {
    match config.backend.as_str() {
        DEFAULT_BACKEND => Ok(Box::new(LocalHashEmbedder::new(config.clone()))),
        other => bail!(
            "unsupported embedding backend '{other}' for model '{}'",
            config.model_id
        ),
    }
}

pub fn dot_product(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() {
        return 0.0;
    }

    left.iter()
        .zip(right)
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum()
}

pub fn normalize_vector(values: &mut [f32]) {
    let norm = dot_product(values, values).sqrt() as f32;
    if norm > 0.0 {
        values.iter_mut().for_each(|value| *value /= norm);
    }
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim * EMBEDDING_VALUE_BYTES {
        return None;
    }

    let values = blob
        .chunks_exact(EMBEDDING_VALUE_BYTES)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect();
    Some(values)
}

// The generic "market" suffix is dropped from market names.
fn surrogate_features(text: &str) -> Vec<(String, f32)> {
    let (market, dimensions) = text.split_once(':').unwrap_or((text, ""));
    let mut features = Vec::<(String, f32)>::new();

    for word in folded_words(market).filter(|word| word != "market") {
        features.push((format!("m:{word}"), MARKET_WORD_WEIGHT));
    }

    for dimension in dimensions.split(',') {
        let words = folded_words(dimension).collect::<Vec<String>>();
        if words.is_empty() {
            continue;
        }
        features.push((format!("d:{}", words.join("_")), DIMENSION_PHRASE_WEIGHT));
        for word in words {
            features.push((format!("w:{word}"), DIMENSION_WORD_WEIGHT));
        }
    }

    features
}

fn folded_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> LocalHashEmbedder {
        LocalHashEmbedder::new(resolve_model_config(""))
    }

    #[test]
    fn local_embedding_is_unit_length_and_deterministic() {
        let embedder = embedder();
        let first = embedder.embed("Electric Vehicle Battery Market: Battery Type, Vehicle Type");
        let second = embedder.embed("Electric Vehicle Battery Market: Battery Type, Vehicle Type");

        assert_eq!(first, second);
        assert_eq!(first.len(), DEFAULT_EMBEDDING_DIM);
        let norm = dot_product(&first, &first);
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn empty_payload_embeds_to_zero_vector() {
        let mut config = resolve_model_config("");
        config.dimensions = 16;
        let vector = LocalHashEmbedder::new(config).embed("   ");
        assert_eq!(vector.len(), 16);
        assert!(vector.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn market_suffix_does_not_change_the_embedding() {
        let embedder = embedder();
        assert_eq!(
            embedder.embed("Cold Chain Market: Type, Application"),
            embedder.embed("cold chain: Type, Application")
        );
    }

    #[test]
    fn shared_dimensions_outrank_shared_market_words() {
        let embedder = embedder();
        let query = embedder.embed("Electric Bus Market: Battery Type, Region");
        let same_dimensions = embedder.embed("Forklift Market: Battery Type, Region");
        let same_name = embedder.embed("Electric Bus Market: Technology");

        assert!(dot_product(&query, &same_dimensions) > dot_product(&query, &same_name));
    }

    #[test]
    fn embedding_blob_rejects_wrong_length() {
        let blob = encode_embedding_blob(&[0.5, -0.25, 1.0]);
        assert_eq!(blob.len(), 3 * EMBEDDING_VALUE_BYTES);
        assert_eq!(decode_embedding_blob(&blob, 3), Some(vec![0.5, -0.25, 1.0]));
        assert!(decode_embedding_blob(&blob, 4).is_none());
        assert!(decode_embedding_blob(&[], 0).is_none());
    }

    #[test]
    fn default_model_is_the_local_stand_in() {
        let config = resolve_model_config("  ");
        assert_eq!(config.model_id, "miniLM-L6-v2-local-v1");
        assert_eq!(config.backend, DEFAULT_BACKEND);
        assert_ne!(config.model_id, config.model_name);

        let custom = resolve_model_config("domain-tuned-v2");
        assert_eq!(custom.model_id, "domain-tuned-v2");
        assert_eq!(custom.model_name, "domain-tuned-v2");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = resolve_model_config("");
        config.backend = "remote-api".to_string();
        let error = embedder_for(&config).err().expect("backend should be rejected");
        assert!(error.to_string().contains("unsupported embedding backend"));
    }
}
