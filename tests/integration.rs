//! End-to-end tests: manifest import → index builds → fused search.
//!
//! Everything runs against a temp directory with the deterministic hash
//! encoder, so no network or model downloads are involved.

use std::path::PathBuf;
use std::time::Duration;

use schema_scout::builder::CreateIndexRequest;
use schema_scout::config::{BuildConfig, Config, DbConfig, EncoderConfig, SearchConfig, StorageConfig};
use schema_scout::db;
use schema_scout::engine::Engine;
use schema_scout::error::EngineError;
use schema_scout::ingest;
use schema_scout::migrate;
use schema_scout::models::{
    EntityHint, IndexDescriptor, IndexKind, IndexState, SchemaElement, Strategy, TargetType,
};
use tempfile::TempDir;

const MODEL: &str = "hash-256";

fn test_config(dir: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: dir.path().join("scout.db"),
        },
        storage: StorageConfig {
            index_dir: dir.path().join("indexes"),
        },
        encoder: EncoderConfig {
            provider: "hash".to_string(),
            dims: Some(256),
            ..Default::default()
        },
        search: SearchConfig::default(),
        build: BuildConfig::default(),
    }
}

async fn setup(dir: &TempDir) -> Engine {
    let config = test_config(dir);
    let pool = db::connect(&config).await.expect("connect");
    migrate::run_migrations(&pool).await.expect("migrate");
    Engine::new(config, pool)
}

fn shop_manifest() -> ingest::ProjectManifest {
    serde_json::from_value(serde_json::json!({
        "project_id": "shop",
        "tables": [
            {
                "name": "orders",
                "description": "Orders placed by customers",
                "columns": [
                    {"name": "order_id", "type": "INTEGER"},
                    {"name": "customer_id", "type": "INTEGER"},
                    {"name": "total", "type": "REAL", "sample_values": ["19.99", "42.50"]}
                ]
            },
            {
                "name": "customers",
                "columns": [
                    {"name": "id", "type": "INTEGER"},
                    {"name": "name", "type": "TEXT"}
                ]
            }
        ],
        "glossary": [
            {"term": "revenue", "definition": "Sum of order totals", "aliases": ["sales"]}
        ]
    }))
    .expect("manifest json")
}

fn fruit_manifest() -> ingest::ProjectManifest {
    serde_json::from_value(serde_json::json!({
        "project_id": "fruit",
        "glossary": [
            {"term": "apples", "definition": "apples"},
            {"term": "bananas", "definition": "bananas"}
        ]
    }))
    .expect("manifest json")
}

async fn wait_terminal(engine: &Engine, id: &str) -> IndexDescriptor {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let descriptor = engine
            .get_index_status(id)
            .await
            .expect("status query")
            .expect("descriptor exists");
        if matches!(descriptor.state, IndexState::Ready | IndexState::Error) {
            return descriptor;
        }
    }
    panic!("index {} did not reach a terminal state", id);
}

async fn build_index(
    engine: &Engine,
    project: &str,
    kind: IndexKind,
    target: TargetType,
    model: Option<&str>,
) -> IndexDescriptor {
    let descriptor = engine
        .create_index(CreateIndexRequest {
            project_id: project.to_string(),
            kind,
            target_type: target,
            target_ids: Vec::new(),
            model_id: model.map(String::from),
        })
        .await
        .expect("create index");

    let finished = wait_terminal(engine, &descriptor.id).await;
    assert_eq!(
        finished.state,
        IndexState::Ready,
        "build failed: {:?}",
        finished.error
    );
    finished
}

#[tokio::test]
async fn test_dense_build_reaches_ready_with_consistent_counts() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &shop_manifest())
        .await
        .unwrap();

    let descriptor = build_index(
        &engine,
        "shop",
        IndexKind::Dense,
        TargetType::Columns,
        Some(MODEL),
    )
    .await;

    // orders has 3 columns, customers has 2
    assert_eq!(descriptor.vector_count, 5);
    assert_eq!(descriptor.build_progress, 100.0);
    let path = descriptor.storage_path.expect("storage path set");
    assert!(PathBuf::from(path).exists());
}

#[tokio::test]
async fn test_semantic_roundtrip_ranks_close_term_first() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &fruit_manifest())
        .await
        .unwrap();

    build_index(
        &engine,
        "fruit",
        IndexKind::Dense,
        TargetType::Dictionary,
        Some(MODEL),
    )
    .await;

    let candidates = engine
        .search_by_strategy("fruit", "apple", Strategy::Semantic)
        .await
        .unwrap();

    let apples_rank = candidates
        .iter()
        .position(|c| matches!(&c.element, SchemaElement::GlossaryTerm { term, .. } if term == "apples"))
        .expect("apples found");
    let bananas_rank = candidates
        .iter()
        .position(|c| matches!(&c.element, SchemaElement::GlossaryTerm { term, .. } if term == "bananas"));

    if let Some(bananas_rank) = bananas_rank {
        assert!(
            apples_rank < bananas_rank,
            "apples ({}) should rank above bananas ({})",
            apples_rank,
            bananas_rank
        );
    }
}

#[tokio::test]
async fn test_fused_search_end_to_end() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &shop_manifest())
        .await
        .unwrap();

    build_index(
        &engine,
        "shop",
        IndexKind::Dense,
        TargetType::Tables,
        Some(MODEL),
    )
    .await;
    build_index(
        &engine,
        "shop",
        IndexKind::Dense,
        TargetType::Columns,
        Some(MODEL),
    )
    .await;
    build_index(&engine, "shop", IndexKind::Sparse, TargetType::Columns, None).await;

    let results = engine
        .search_entities("shop", "customer total", EntityHint::Unknown)
        .await
        .unwrap();

    assert!(!results.is_empty());
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
        assert!(result.confidence > 0.0);
        assert!(result.confidence <= 1.0);
    }

    let relevant = results.iter().any(|r| match &r.element {
        SchemaElement::Table { name, .. } => name == "orders" || name == "customers",
        SchemaElement::Column {
            table_name,
            column_name,
            ..
        } => {
            (table_name == "customers" && column_name == "name")
                || (table_name == "orders" && column_name == "total")
                || column_name == "customer_id"
        }
        _ => false,
    });
    assert!(relevant, "expected an orders/customers hit: {:?}", results);
}

#[tokio::test]
async fn test_fused_results_deduplicate_across_strategies() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &shop_manifest())
        .await
        .unwrap();

    build_index(&engine, "shop", IndexKind::Sparse, TargetType::Tables, None).await;

    let results = engine
        .search_entities("shop", "orders", EntityHint::Table)
        .await
        .unwrap();

    let orders: Vec<_> = results
        .iter()
        .filter(|r| matches!(&r.element, SchemaElement::Table { name, .. } if name == "orders"))
        .collect();
    assert_eq!(orders.len(), 1, "orders must appear exactly once");
    assert!(
        orders[0].strategies.len() >= 2,
        "orders should be found by several strategies: {:?}",
        orders[0].strategies
    );
}

#[tokio::test]
async fn test_build_fails_without_source_texts() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    // No metadata imported at all

    let descriptor = engine
        .create_index(CreateIndexRequest {
            project_id: "empty".to_string(),
            kind: IndexKind::Sparse,
            target_type: TargetType::Dictionary,
            target_ids: Vec::new(),
            model_id: None,
        })
        .await
        .unwrap();

    let finished = wait_terminal(&engine, &descriptor.id).await;
    assert_eq!(finished.state, IndexState::Error);
    assert!(finished.error.is_some());
    assert!(finished.storage_path.is_none());

    // An errored index contributes nothing, without failing the search
    let candidates = engine
        .search_by_strategy("empty", "anything", Strategy::Keyword)
        .await
        .unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_create_dense_without_model_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;

    let err = engine
        .create_index(CreateIndexRequest {
            project_id: "shop".to_string(),
            kind: IndexKind::Dense,
            target_type: TargetType::Tables,
            target_ids: Vec::new(),
            model_id: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_create_with_unknown_target_ids_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &shop_manifest())
        .await
        .unwrap();

    let err = engine
        .create_index(CreateIndexRequest {
            project_id: "shop".to_string(),
            kind: IndexKind::Sparse,
            target_type: TargetType::Tables,
            target_ids: vec!["no-such-table".to_string()],
            model_id: None,
        })
        .await
        .unwrap_err();

    match err {
        EngineError::Validation(message) => assert!(message.contains("no-such-table")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rebuild_while_building_conflicts_and_keeps_targets() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &shop_manifest())
        .await
        .unwrap();

    let built = build_index(&engine, "shop", IndexKind::Sparse, TargetType::Tables, None).await;

    // Pin the descriptor in `building` as if a worker held it
    let began = schema_scout::index_store::try_begin_build(engine.pool(), &built.id)
        .await
        .unwrap();
    assert!(began);

    let err = engine.rebuild_index(&built.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let descriptor = engine
        .get_index_status(&built.id)
        .await
        .unwrap()
        .expect("descriptor exists");
    assert_eq!(descriptor.target_ids, built.target_ids);
    assert_eq!(descriptor.model_id, built.model_id);
    assert_eq!(descriptor.state, IndexState::Building);
}

#[tokio::test]
async fn test_rebuild_after_ready_succeeds() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &shop_manifest())
        .await
        .unwrap();

    let built = build_index(&engine, "shop", IndexKind::Sparse, TargetType::Tables, None).await;

    engine.rebuild_index(&built.id).await.unwrap();
    let rebuilt = wait_terminal(&engine, &built.id).await;

    assert_eq!(rebuilt.state, IndexState::Ready);
    assert_eq!(rebuilt.vector_count, built.vector_count);
    assert_eq!(rebuilt.id, built.id);
    assert!(built.sparse_settings.is_some());
    assert_eq!(rebuilt.sparse_settings, built.sparse_settings);
}

#[tokio::test]
async fn test_building_index_contributes_no_candidates() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;
    ingest::import_manifest(engine.pool(), &fruit_manifest())
        .await
        .unwrap();

    let built = build_index(
        &engine,
        "fruit",
        IndexKind::Dense,
        TargetType::Dictionary,
        Some(MODEL),
    )
    .await;

    // While pinned in `building`, the semantic strategy must skip it
    schema_scout::index_store::try_begin_build(engine.pool(), &built.id)
        .await
        .unwrap();

    let candidates = engine
        .search_by_strategy("fruit", "apple", Strategy::Semantic)
        .await
        .unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_status_of_unknown_index() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;

    let status = engine.get_index_status("nope").await.unwrap();
    assert!(status.is_none());
}

#[tokio::test]
async fn test_empty_query_is_rejected_fused_and_single() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;

    let err = engine
        .search_entities("shop", "", EntityHint::Unknown)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .search_by_strategy("shop", "  ", Strategy::Exact)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_search_unknown_project_is_empty_not_error() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir).await;

    let results = engine
        .search_entities("ghost", "anything", EntityHint::Unknown)
        .await
        .unwrap();
    assert!(results.is_empty());
}
