//! Text encoder abstraction and the process-wide encoder cache.
//!
//! Defines the [`TextEncoder`] trait and concrete implementations:
//! - **[`HashEncoder`]** — deterministic local feature-hashing encoder; no
//!   model files, no network. Useful for tests and air-gapped setups.
//! - **[`OpenAiEncoder`]** — calls the OpenAI embeddings API with batching,
//!   retry, and backoff.
//! - **fastembed** (behind the `local-encoder-fastembed` feature) — runs
//!   sentence-transformer models in process; the model download happens on
//!   first load.
//!
//! Loaded encoders are owned by an [`EncoderCache`] keyed by model id.
//! Loading a not-yet-cached model happens at most once per model even under
//! concurrent callers; once loaded, concurrent `encode` calls are safe.
//!
//! # Retry Strategy
//!
//! The OpenAI encoder uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::EncoderConfig;
use crate::error::EngineError;
use crate::text::tokenize;

/// A loaded text encoder for one model id.
///
/// Implementations must be safe to call concurrently; the cache hands out
/// shared references to a single instance per model.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    /// The model identifier this encoder was loaded for.
    fn model_id(&self) -> &str;
    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Map a batch of texts to vectors, one per input, in input order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Process-wide encoder cache keyed by model id.
///
/// Each model id owns a once-cell: the first caller loads, everyone else
/// waits on the same cell, so a model is never loaded twice concurrently.
/// Entries live until [`EncoderCache::clear`].
pub struct EncoderCache {
    config: EncoderConfig,
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn TextEncoder>>>>>,
}

impl EncoderCache {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Get the encoder for `model_id`, loading it on first use.
    ///
    /// A load failure is not cached; the next caller retries.
    pub async fn get_or_load(&self, model_id: &str) -> Result<Arc<dyn TextEncoder>, EngineError> {
        let cell = {
            let mut cells = self.cells.lock().expect("encoder cache poisoned");
            cells
                .entry(model_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let config = self.config.clone();
        let model = model_id.to_string();
        let encoder = cell
            .get_or_try_init(|| async { create_encoder(&config, &model).await })
            .await?;

        Ok(encoder.clone())
    }

    /// Drop all loaded encoders.
    pub fn clear(&self) {
        self.cells.lock().expect("encoder cache poisoned").clear();
    }
}

/// Instantiate an encoder for `model_id` based on configuration.
async fn create_encoder(
    config: &EncoderConfig,
    model_id: &str,
) -> Result<Arc<dyn TextEncoder>, EngineError> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEncoder::new(
            model_id,
            config.dims.unwrap_or(256),
        ))),
        "openai" => {
            let encoder = OpenAiEncoder::new(config, model_id)
                .map_err(|e| EngineError::EncoderNotReady(model_id.to_string(), e.to_string()))?;
            Ok(Arc::new(encoder))
        }
        #[cfg(feature = "local-encoder-fastembed")]
        "local" => {
            let encoder = local_fastembed::FastembedEncoder::load(model_id, config.batch_size)
                .await
                .map_err(|e| EngineError::EncoderNotReady(model_id.to_string(), e.to_string()))?;
            Ok(Arc::new(encoder))
        }
        #[cfg(not(feature = "local-encoder-fastembed"))]
        "local" => Err(EngineError::EncoderNotReady(
            model_id.to_string(),
            "local provider requires --features local-encoder-fastembed".to_string(),
        )),
        "disabled" => Err(EngineError::EncoderNotReady(
            model_id.to_string(),
            "encoder provider is disabled".to_string(),
        )),
        other => Err(EngineError::EncoderNotReady(
            model_id.to_string(),
            format!("unknown encoder provider: {}", other),
        )),
    }
}

// ============ Hash Encoder ============

/// Deterministic feature-hashing encoder.
///
/// Each term and each character trigram of a term is hashed into one of
/// `dims` signed buckets; the accumulated vector is L2-normalized. Texts
/// sharing word stems land on overlapping buckets, so `"apple"` scores
/// close to `"apples"` and far from unrelated words.
pub struct HashEncoder {
    model_id: String,
    dims: usize,
}

impl HashEncoder {
    pub fn new(model_id: &str, dims: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dims: dims.max(8),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = Sha256::new();
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();
        let h = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((h % self.dims as u64) as usize, sign)
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];

        for term in tokenize(text) {
            let (idx, sign) = self.bucket(&term);
            vec[idx] += sign;

            let chars: Vec<char> = term.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let gram: String = window.iter().collect();
                    let (idx, sign) = self.bucket(&gram);
                    vec[idx] += sign;
                }
            }
        }

        l2_normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl TextEncoder for HashEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

// ============ OpenAI Encoder ============

/// Encoder using the OpenAI embeddings API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiEncoder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiEncoder {
    pub fn new(config: &EncoderConfig, model_id: &str) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("encoder.dims required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: model_id.to_string(),
            dims,
            api_key,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextEncoder for OpenAiEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Parse the OpenAI embeddings API response JSON.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ fastembed Encoder ============

#[cfg(feature = "local-encoder-fastembed")]
mod local_fastembed {
    use super::*;

    /// In-process encoder backed by fastembed. The underlying model is not
    /// thread-safe for encoding, so calls are serialized through a mutex
    /// and run on the blocking pool.
    pub struct FastembedEncoder {
        model_id: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    impl FastembedEncoder {
        pub async fn load(model_id: &str, batch_size: usize) -> Result<Self> {
            let (fastembed_model, dims) = map_model(model_id)?;
            let model = tokio::task::spawn_blocking(move || {
                fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local encoder: {}", e))
            })
            .await??;

            Ok(Self {
                model_id: model_id.to_string(),
                dims,
                batch_size,
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl TextEncoder for FastembedEncoder {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let model = self.model.clone();
            let texts = texts.to_vec();
            let batch_size = self.batch_size;
            tokio::task::spawn_blocking(move || {
                let mut model = model.lock().expect("fastembed model poisoned");
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
            })
            .await?
        }
    }

    fn map_model(model_id: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        match model_id {
            "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
            "all-minilm-l12-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML12V2, 384)),
            "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
            other => bail!(
                "Unknown local model '{}'. Supported: all-minilm-l6-v2, all-minilm-l12-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                other
            ),
        }
    }
}

/// Known model presets per provider, for `scout models`.
pub fn available_models(provider: &str) -> Vec<(&'static str, usize)> {
    match provider {
        "hash" => vec![("hash-256", 256)],
        "openai" => vec![
            ("text-embedding-3-small", 1536),
            ("text-embedding-3-large", 3072),
        ],
        "local" => vec![
            ("all-minilm-l6-v2", 384),
            ("all-minilm-l12-v2", 384),
            ("bge-small-en-v1.5", 384),
            ("bge-base-en-v1.5", 768),
        ],
        _ => Vec::new(),
    }
}

// ============ Vector utilities ============

/// Scale a vector to unit length in place. Zero vectors are left as-is.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Inner product. For L2-normalized inputs this is the cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_config() -> EncoderConfig {
        EncoderConfig {
            provider: "hash".to_string(),
            dims: Some(256),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hash_encoder_deterministic() {
        let enc = HashEncoder::new("hash-256", 256);
        let a = enc.encode(&["customer total".to_string()]).await.unwrap();
        let b = enc.encode(&["customer total".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_encoder_stem_overlap() {
        let enc = HashEncoder::new("hash-256", 256);
        let vecs = enc
            .encode(&[
                "apples".to_string(),
                "apple".to_string(),
                "bananas".to_string(),
            ])
            .await
            .unwrap();

        let apple_sim = dot(&vecs[0], &vecs[1]);
        let banana_sim = dot(&vecs[1], &vecs[2]);
        assert!(
            apple_sim > banana_sim,
            "expected apple~apples ({}) above apple~bananas ({})",
            apple_sim,
            banana_sim
        );
    }

    #[tokio::test]
    async fn test_hash_encoder_unit_norm() {
        let enc = HashEncoder::new("hash-256", 64);
        let vecs = enc.encode(&["orders shipped".to_string()]).await.unwrap();
        let norm: f32 = vecs[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_cache_loads_once_and_clears() {
        let cache = EncoderCache::new(hash_config());
        let a = cache.get_or_load("hash-256").await.unwrap();
        let b = cache.get_or_load("hash-256").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        cache.clear();
        let c = cache.get_or_load("hash-256").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_cache_disabled_provider() {
        let cache = EncoderCache::new(EncoderConfig::default());
        let err = match cache.get_or_load("any").await {
            Ok(_) => panic!("expected get_or_load to fail for disabled provider"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::EncoderNotReady(_, _)));
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0f32; 4]);
    }
}
