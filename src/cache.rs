//! In-memory cache of loaded index structures.
//!
//! Indexes load lazily from their storage path on the first search after
//! process start; once loaded, concurrent searches share the same
//! read-only instance. A rebuild invalidates the stale entry so the next
//! search picks up the new files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use crate::dense::DenseIndex;
use crate::error::EngineError;
use crate::models::{IndexDescriptor, IndexKind, IndexState};
use crate::sparse::SparseIndex;

pub enum LoadedIndex {
    Dense(DenseIndex),
    Sparse(SparseIndex),
}

#[derive(Default)]
pub struct IndexCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<LoadedIndex>>>>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or fetch the cached copy of) the index behind a descriptor.
    ///
    /// Only `ready` descriptors are loadable. A load failure is not
    /// cached; the next caller retries.
    pub async fn get_or_load(
        &self,
        descriptor: &IndexDescriptor,
    ) -> Result<Arc<LoadedIndex>, EngineError> {
        if descriptor.state != IndexState::Ready {
            return Err(EngineError::Persistence(format!(
                "index {} is not ready (state: {})",
                descriptor.id,
                descriptor.state.as_str()
            )));
        }

        let path = descriptor
            .storage_path
            .as_ref()
            .ok_or_else(|| {
                EngineError::Persistence(format!("index {} has no storage path", descriptor.id))
            })
            .map(PathBuf::from)?;

        let cell = {
            let mut cells = self.cells.lock().expect("index cache poisoned");
            cells
                .entry(descriptor.id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let kind = descriptor.kind;
        let loaded = cell
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || -> Result<Arc<LoadedIndex>, EngineError> {
                    let index = match kind {
                        IndexKind::Dense => LoadedIndex::Dense(DenseIndex::load(&path)?),
                        IndexKind::Sparse => LoadedIndex::Sparse(SparseIndex::load(&path)?),
                    };
                    Ok(Arc::new(index))
                })
                .await
                .map_err(|e| EngineError::Persistence(e.to_string()))?
            })
            .await?;

        Ok(loaded.clone())
    }

    /// Drop the cached copy for one descriptor (called after a rebuild).
    pub fn invalidate(&self, id: &str) {
        self.cells.lock().expect("index cache poisoned").remove(id);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.cells.lock().expect("index cache poisoned").clear();
    }
}
