//! Index lifecycle management: validation, background builds, rebuilds.
//!
//! Builds are long-running (encoding a whole schema corpus can take
//! seconds to minutes), so they never run on the caller. [`IndexManager`]
//! owns a bounded job queue drained by a fixed pool of workers; a job is
//! accepted only after the descriptor's check-and-set transition into
//! `building` succeeds, which makes a concurrent rebuild for the same
//! descriptor fail fast with a conflict instead of queueing silently.
//! Completion is reported through the descriptor's persisted state.

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use sqlx::SqlitePool;

use crate::cache::IndexCache;
use crate::config::Config;
use crate::dense::DenseIndex;
use crate::encoder::EncoderCache;
use crate::error::EngineError;
use crate::index_store;
use crate::metadata;
use crate::models::{
    IndexDescriptor, IndexKind, IndexState, SchemaElement, SparseSettings, TargetType,
};
use crate::sparse::SparseIndex;

/// Inputs for a new index.
#[derive(Debug, Clone)]
pub struct CreateIndexRequest {
    pub project_id: String,
    pub kind: IndexKind,
    pub target_type: TargetType,
    /// Table ids (for `tables`/`columns`) or glossary ids (for
    /// `dictionary`). Empty means all elements of the target type.
    pub target_ids: Vec<String>,
    /// Encoder model id; required when `kind` is dense.
    pub model_id: Option<String>,
}

pub(crate) struct BuildContext {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub encoders: Arc<EncoderCache>,
    pub indexes: Arc<IndexCache>,
}

/// Accepts build jobs and runs them on a fixed worker pool.
pub struct IndexManager {
    ctx: Arc<BuildContext>,
    tx: mpsc::Sender<String>,
}

impl IndexManager {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn spawn(
        pool: SqlitePool,
        config: Arc<Config>,
        encoders: Arc<EncoderCache>,
        indexes: Arc<IndexCache>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<String>(config.build.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let ctx = Arc::new(BuildContext {
            pool,
            config: config.clone(),
            encoders,
            indexes,
        });

        for _ in 0..config.build.workers.max(1) {
            let rx = rx.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(id) => run_build(&ctx, &id).await,
                        None => break,
                    }
                }
            });
        }

        Self { ctx, tx }
    }

    /// Validate and register a new index, then queue its first build.
    ///
    /// Returns the descriptor already transitioned into `building`.
    pub async fn create(&self, req: CreateIndexRequest) -> Result<IndexDescriptor, EngineError> {
        if req.kind == IndexKind::Dense {
            let model = req.model_id.as_deref().ok_or_else(|| {
                EngineError::Validation("dense index requires a model_id".to_string())
            })?;
            // Surfaces EncoderNotReady before any state is created
            self.ctx.encoders.get_or_load(model).await?;
        }

        if !req.target_ids.is_empty() {
            let missing = match req.target_type {
                TargetType::Tables | TargetType::Columns => {
                    metadata::missing_table_ids(&self.ctx.pool, &req.project_id, &req.target_ids)
                        .await?
                }
                TargetType::Dictionary => {
                    metadata::missing_glossary_ids(&self.ctx.pool, &req.project_id, &req.target_ids)
                        .await?
                }
            };
            if !missing.is_empty() {
                return Err(EngineError::Validation(format!(
                    "unknown target ids: {}",
                    missing.join(", ")
                )));
            }
        }

        let now = chrono::Utc::now().timestamp();
        let descriptor = IndexDescriptor {
            id: Uuid::new_v4().to_string(),
            project_id: req.project_id,
            kind: req.kind,
            target_type: req.target_type,
            target_ids: req.target_ids,
            model_id: if req.kind == IndexKind::Dense {
                req.model_id
            } else {
                None
            },
            sparse_settings: (req.kind == IndexKind::Sparse).then(|| SparseSettings {
                max_features: self.ctx.config.build.sparse_max_features,
                ngram_max: self.ctx.config.build.sparse_ngram_max,
            }),
            vector_count: 0,
            state: IndexState::Pending,
            build_progress: 0.0,
            error: None,
            storage_path: None,
            created_at: now,
            updated_at: now,
        };
        index_store::insert(&self.ctx.pool, &descriptor).await?;

        self.submit(&descriptor.id).await?;
        self.refreshed(&descriptor.id).await
    }

    /// Queue a rebuild reusing the stored target configuration.
    ///
    /// Fails with [`EngineError::Conflict`] while a build is in flight.
    pub async fn rebuild(&self, id: &str) -> Result<IndexDescriptor, EngineError> {
        let descriptor = index_store::get(&self.ctx.pool, id)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown index id: {}", id)))?;

        if descriptor.kind == IndexKind::Dense {
            let model = descriptor.model_id.as_deref().ok_or_else(|| {
                EngineError::Validation(format!("index {} has no model id", id))
            })?;
            self.ctx.encoders.get_or_load(model).await?;
        }

        self.submit(id).await?;
        self.refreshed(id).await
    }

    async fn submit(&self, id: &str) -> Result<(), EngineError> {
        if !index_store::try_begin_build(&self.ctx.pool, id).await? {
            return Err(EngineError::Conflict(id.to_string()));
        }

        self.tx
            .send(id.to_string())
            .await
            .map_err(|_| EngineError::Other(anyhow::anyhow!("build queue is closed")))?;

        Ok(())
    }

    async fn refreshed(&self, id: &str) -> Result<IndexDescriptor, EngineError> {
        index_store::get(&self.ctx.pool, id)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown index id: {}", id)))
    }
}

/// Worker body: run one build and record the outcome on the descriptor.
async fn run_build(ctx: &BuildContext, id: &str) {
    if let Err(e) = build_index(ctx, id).await {
        eprintln!("Warning: index build {} failed: {}", id, e);
        if let Err(record) = index_store::mark_error(&ctx.pool, id, &e.to_string()).await {
            eprintln!("Warning: could not record build error for {}: {}", id, record);
        }
    }
}

async fn build_index(ctx: &BuildContext, id: &str) -> Result<(), EngineError> {
    let descriptor = index_store::get(&ctx.pool, id)
        .await?
        .ok_or_else(|| EngineError::Validation(format!("unknown index id: {}", id)))?;

    let sources = collect_texts(&ctx.pool, &descriptor).await?;
    if sources.is_empty() {
        return Err(EngineError::NoSourceTexts);
    }
    index_store::set_progress(&ctx.pool, id, 25.0).await?;

    let (texts, elements): (Vec<String>, Vec<SchemaElement>) = sources.into_iter().unzip();
    let count = texts.len() as i64;

    let storage_path = match descriptor.kind {
        IndexKind::Dense => ctx
            .config
            .storage
            .index_dir
            .join(format!("dense_{}.vec", id)),
        IndexKind::Sparse => ctx
            .config
            .storage
            .index_dir
            .join(format!("sparse_{}.idx.json", id)),
    };

    match descriptor.kind {
        IndexKind::Dense => {
            let model = descriptor
                .model_id
                .as_deref()
                .ok_or_else(|| EngineError::Validation(format!("index {} has no model id", id)))?;
            let encoder = ctx.encoders.get_or_load(model).await?;

            let vectors = encoder.encode(&texts).await.map_err(EngineError::Other)?;
            index_store::set_progress(&ctx.pool, id, 70.0).await?;

            let index = DenseIndex::from_embeddings(model, vectors, elements)?;
            let path = storage_path.clone();
            tokio::task::spawn_blocking(move || index.save(&path))
                .await
                .map_err(|e| EngineError::Persistence(e.to_string()))??;
        }
        IndexKind::Sparse => {
            // Settings captured at create time win over the current config
            let settings = descriptor.sparse_settings.clone().unwrap_or(SparseSettings {
                max_features: ctx.config.build.sparse_max_features,
                ngram_max: ctx.config.build.sparse_ngram_max,
            });
            let index = SparseIndex::fit(&texts, elements, settings.max_features, settings.ngram_max)?;
            index_store::set_progress(&ctx.pool, id, 70.0).await?;

            let path = storage_path.clone();
            tokio::task::spawn_blocking(move || index.save(&path))
                .await
                .map_err(|e| EngineError::Persistence(e.to_string()))??;
        }
    }

    index_store::mark_ready(&ctx.pool, id, count, &storage_path.to_string_lossy()).await?;
    // Drop any cached copy of the previous build
    ctx.indexes.invalidate(id);

    Ok(())
}

/// Collect one source text per targeted schema element, paired with the
/// element it describes. Order here is the row/vector order of the index.
pub(crate) async fn collect_texts(
    pool: &SqlitePool,
    descriptor: &IndexDescriptor,
) -> Result<Vec<(String, SchemaElement)>, EngineError> {
    let mut sources = Vec::new();

    match descriptor.target_type {
        TargetType::Tables => {
            let tables =
                metadata::list_tables_by_ids(pool, &descriptor.project_id, &descriptor.target_ids)
                    .await?;
            for table in tables {
                let mut text = table.name.clone();
                if let Some(desc) = &table.description {
                    text.push(' ');
                    text.push_str(desc);
                }
                for column in &table.columns {
                    text.push(' ');
                    text.push_str(&column.name);
                }

                sources.push((
                    text,
                    SchemaElement::Table {
                        id: table.id,
                        name: table.name,
                        description: table.description,
                    },
                ));
            }
        }
        TargetType::Columns => {
            let tables =
                metadata::list_tables_by_ids(pool, &descriptor.project_id, &descriptor.target_ids)
                    .await?;
            for table in tables {
                for column in &table.columns {
                    let mut text = format!("{}.{}", table.name, column.name);
                    if let Some(data_type) = &column.data_type {
                        text.push(' ');
                        text.push_str(data_type);
                    }
                    for sample in &column.sample_values {
                        text.push(' ');
                        text.push_str(sample);
                    }

                    sources.push((
                        text,
                        SchemaElement::Column {
                            table_id: table.id.clone(),
                            table_name: table.name.clone(),
                            column_name: column.name.clone(),
                            data_type: column.data_type.clone(),
                        },
                    ));
                }
            }
        }
        TargetType::Dictionary => {
            let entries = metadata::list_glossary_terms_by_ids(
                pool,
                &descriptor.project_id,
                &descriptor.target_ids,
            )
            .await?;
            for entry in entries {
                let mut text = entry.term.clone();
                if let Some(definition) = &entry.definition {
                    text.push(' ');
                    text.push_str(definition);
                }
                for alias in &entry.aliases {
                    text.push(' ');
                    text.push_str(alias);
                }

                sources.push((
                    text,
                    SchemaElement::GlossaryTerm {
                        id: entry.id,
                        term: entry.term,
                        definition: entry.definition,
                        aliases: entry.aliases,
                    },
                ));
            }
        }
    }

    Ok(sources)
}
