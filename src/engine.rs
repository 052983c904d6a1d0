//! Process-level engine: owns the caches and the build worker pool, and
//! exposes the caller surface used by the CLI (and by embedders of the
//! library): index lifecycle operations plus fused and single-strategy
//! search.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::builder::{CreateIndexRequest, IndexManager};
use crate::cache::IndexCache;
use crate::config::Config;
use crate::encoder::EncoderCache;
use crate::error::EngineError;
use crate::index_store;
use crate::models::{Candidate, EntityHint, FusedResult, IndexDescriptor, Strategy};
use crate::search::{self, SearchContext};

pub struct Engine {
    config: Arc<Config>,
    pool: SqlitePool,
    encoders: Arc<EncoderCache>,
    indexes: Arc<IndexCache>,
    manager: IndexManager,
}

impl Engine {
    /// Wire up caches and spawn the build workers. Must be called from
    /// within a tokio runtime.
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let config = Arc::new(config);
        let encoders = Arc::new(EncoderCache::new(config.encoder.clone()));
        let indexes = Arc::new(IndexCache::new());
        let manager = IndexManager::spawn(
            pool.clone(),
            config.clone(),
            encoders.clone(),
            indexes.clone(),
        );

        Self {
            config,
            pool,
            encoders,
            indexes,
            manager,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn encoders(&self) -> &EncoderCache {
        &self.encoders
    }

    /// Validate and register a new index; the build runs in the background
    /// and completion is visible via [`Engine::get_index_status`].
    pub async fn create_index(
        &self,
        req: CreateIndexRequest,
    ) -> Result<IndexDescriptor, EngineError> {
        self.manager.create(req).await
    }

    /// Queue a rebuild of an existing index, reusing its stored targets.
    pub async fn rebuild_index(&self, id: &str) -> Result<IndexDescriptor, EngineError> {
        self.manager.rebuild(id).await
    }

    pub async fn get_index_status(&self, id: &str) -> Result<Option<IndexDescriptor>, EngineError> {
        Ok(index_store::get(&self.pool, id).await?)
    }

    pub async fn list_indexes(
        &self,
        project_id: &str,
    ) -> Result<Vec<IndexDescriptor>, EngineError> {
        Ok(index_store::list_for_project(&self.pool, project_id).await?)
    }

    /// Fused multi-strategy entity search.
    pub async fn search_entities(
        &self,
        project_id: &str,
        text: &str,
        hint: EntityHint,
    ) -> Result<Vec<FusedResult>, EngineError> {
        search::search_entities(self.context(), project_id, text, hint).await
    }

    /// Raw candidates from one strategy.
    pub async fn search_by_strategy(
        &self,
        project_id: &str,
        text: &str,
        strategy: Strategy,
    ) -> Result<Vec<Candidate>, EngineError> {
        search::search_by_strategy(self.context(), project_id, text, strategy).await
    }

    fn context(&self) -> SearchContext<'_> {
        SearchContext {
            pool: &self.pool,
            config: &self.config,
            encoders: &self.encoders,
            indexes: &self.indexes,
        }
    }
}
