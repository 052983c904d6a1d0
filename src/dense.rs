//! Dense vector index over schema-element embeddings.
//!
//! Stores L2-normalized vectors row-aligned with a metadata array of
//! [`SchemaElement`]s; search is an exhaustive inner-product scan (cosine
//! similarity for normalized inputs).
//!
//! # Persistence
//!
//! Vectors go to `storage_path` as a small binary file:
//!
//! ```text
//! magic:    b"SSV1"
//! dims:     u32 LE
//! count:    u64 LE
//! model_id: u16 LE length + UTF-8 bytes
//! vectors:  count × dims × f32 LE
//! ```
//!
//! The metadata array is a sibling JSON file (`<storage_path>.meta.json`).
//! The two are written atomically (temp file + rename) and cross-checked on
//! load: a count mismatch means the pair desynchronized and the index is
//! refused.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::encoder::{dot, l2_normalize};
use crate::error::EngineError;
use crate::models::SchemaElement;

const MAGIC: &[u8; 4] = b"SSV1";

pub struct DenseIndex {
    model_id: String,
    dims: usize,
    vectors: Vec<Vec<f32>>,
    elements: Vec<SchemaElement>,
}

impl DenseIndex {
    /// Build from freshly encoded embeddings. Vectors are L2-normalized
    /// here so search can use a plain inner product.
    pub fn from_embeddings(
        model_id: &str,
        mut vectors: Vec<Vec<f32>>,
        elements: Vec<SchemaElement>,
    ) -> Result<Self, EngineError> {
        if vectors.len() != elements.len() {
            return Err(EngineError::Persistence(format!(
                "vector count {} does not match metadata count {}",
                vectors.len(),
                elements.len()
            )));
        }

        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        for vec in &mut vectors {
            if vec.len() != dims {
                return Err(EngineError::Persistence(
                    "inconsistent embedding dimensions".to_string(),
                ));
            }
            l2_normalize(vec);
        }

        Ok(Self {
            model_id: model_id.to_string(),
            dims,
            vectors,
            elements,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top-`top_k` elements by cosine similarity against `query`.
    ///
    /// Scores are clamped to [0.0, 1.0]; ties keep insertion order. An
    /// empty query, dimension mismatch, or `top_k == 0` yields no results.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(SchemaElement, f64)> {
        if top_k == 0 || query.len() != self.dims || self.vectors.is_empty() {
            return Vec::new();
        }

        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, vec)| {
                let score = dot(&normalized, vec).clamp(0.0, 1.0) as f64;
                (i, score)
            })
            .collect();

        // Stable sort keeps insertion order for equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| (self.elements[i].clone(), score))
            .collect()
    }

    /// Persist vectors to `path` and metadata to the sibling meta file.
    /// Both writes go through a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        let result = self.write_vectors(&tmp);
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
            return result;
        }
        std::fs::rename(&tmp, path)?;

        let meta = meta_path(path);
        let meta_tmp = meta.with_extension("tmp");
        let json = serde_json::to_vec(&self.elements)?;
        if let Err(e) = std::fs::write(&meta_tmp, &json) {
            let _ = std::fs::remove_file(&meta_tmp);
            return Err(e.into());
        }
        std::fs::rename(&meta_tmp, &meta)?;

        Ok(())
    }

    fn write_vectors(&self, path: &Path) -> Result<(), EngineError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&(self.dims as u32).to_le_bytes())?;
        writer.write_all(&(self.vectors.len() as u64).to_le_bytes())?;
        let model_bytes = self.model_id.as_bytes();
        writer.write_all(&(model_bytes.len() as u16).to_le_bytes())?;
        writer.write_all(model_bytes)?;

        for vec in &self.vectors {
            for &v in vec {
                writer.write_all(&v.to_le_bytes())?;
            }
        }

        writer.flush()?;
        Ok(())
    }

    /// Load a persisted index, cross-checking vector count against the
    /// metadata array.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(EngineError::Persistence(format!(
                "{} is not a dense index file",
                path.display()
            )));
        }

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let dims = u32::from_le_bytes(buf4) as usize;

        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let count = u64::from_le_bytes(buf8) as usize;

        let mut buf2 = [0u8; 2];
        reader.read_exact(&mut buf2)?;
        let model_len = u16::from_le_bytes(buf2) as usize;
        let mut model_bytes = vec![0u8; model_len];
        reader.read_exact(&mut model_bytes)?;
        let model_id = String::from_utf8(model_bytes)
            .map_err(|_| EngineError::Persistence("invalid model id in index header".into()))?;

        let mut vectors = Vec::with_capacity(count);
        let mut row = vec![0u8; dims * 4];
        for _ in 0..count {
            reader.read_exact(&mut row)?;
            let vec: Vec<f32> = row
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            vectors.push(vec);
        }

        let meta = meta_path(path);
        let json = std::fs::read(&meta)?;
        let elements: Vec<SchemaElement> = serde_json::from_slice(&json)?;

        if elements.len() != vectors.len() {
            return Err(EngineError::Persistence(format!(
                "index {} has {} vectors but {} metadata entries",
                path.display(),
                vectors.len(),
                elements.len()
            )));
        }

        Ok(Self {
            model_id,
            dims,
            vectors,
            elements,
        })
    }
}

/// Sibling metadata file for a given vectors file.
pub fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".meta.json");
    path.with_file_name(name)
}
