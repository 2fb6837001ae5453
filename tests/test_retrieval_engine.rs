use evidra::embedding::{BatchItem, EmbeddingError, EmbeddingService, HashingEmbedder};
use evidra::memory::{Metadata, MetadataFilter};
use evidra::retrieval::{
    CancellationToken, ContextStyle, InsertOptions, RetrievalEngine, SearchError, SearchOptions,
    SearchStage,
};
use evidra::Config;
use std::sync::Arc;
use std::time::Duration;

fn engine() -> RetrievalEngine {
    evidra::telemetry::init_logging();
    RetrievalEngine::new(Config::default(), Arc::new(HashingEmbedder::default()))
        .expect("Failed to create engine")
}

async fn insert(engine: &RetrievalEngine, id: &str, text: &str, role: &str, turn: u32) {
    engine
        .insert(
            text,
            Metadata::new().with_role(role).with_turn(turn),
            Some(id.to_string()),
            InsertOptions::default(),
        )
        .await
        .expect("Failed to insert");
}

async fn debate_store() -> RetrievalEngine {
    let engine = engine();
    insert(&engine, "d1", "Nuclear has lowest CO2 per TWh", "proponent", 1).await;
    insert(&engine, "d2", "Nuclear waste lasts millennia", "opponent", 2).await;
    insert(&engine, "d3", "Solar panels require rare earth mining", "opponent", 3).await;
    insert(&engine, "d4", "Wind capacity factors average thirty five percent", "researcher", 4).await;
    insert(&engine, "d5", "Reactor construction costs exceed budgets by billions", "opponent", 5).await;
    insert(&engine, "d6", "Modern reactors recycle spent fuel safely", "proponent", 6).await;
    engine
}

fn summary(results: &[evidra::RetrievalCandidate]) -> Vec<(String, f64, u32)> {
    results
        .iter()
        .map(|c| (c.id.clone(), c.final_score, c.rank))
        .collect()
}

#[tokio::test]
async fn test_opponent_waste_scenario() {
    let engine = engine();
    insert(&engine, "doc1", "Nuclear has lowest CO2 per TWh", "proponent", 1).await;
    insert(&engine, "doc2", "Nuclear waste lasts millennia", "opponent", 2).await;

    let results = engine
        .search(
            "What did the opponent say about waste?",
            SearchOptions::default().with_top_k(1),
        )
        .await
        .expect("Search failed");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "doc2");
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].text, "Nuclear waste lasts millennia");
}

#[tokio::test]
async fn test_insert_twice_delete_once_restores_state() {
    let engine = engine();
    insert(&engine, "base", "Grid storage smooths renewable output", "expert", 1).await;

    let before_stats = engine.get_stats().await;
    let before = engine
        .search("renewable grid storage", SearchOptions::default())
        .await
        .expect("Search failed");

    insert(&engine, "dup", "Nuclear waste lasts millennia", "opponent", 2).await;
    insert(&engine, "dup", "Nuclear waste lasts millennia", "opponent", 2).await;
    assert_eq!(engine.get_stats().await.total_memories, 2);

    assert!(engine.delete("dup").await);

    let after_stats = engine.get_stats().await;
    assert_eq!(after_stats, before_stats);
    assert_eq!(after_stats.tombstones, 0);

    let after = engine
        .search("renewable grid storage", SearchOptions::default())
        .await
        .expect("Search failed");
    assert_eq!(summary(&after), summary(&before));

    let leaked = engine
        .search("nuclear waste millennia", SearchOptions::default())
        .await
        .expect("Search failed");
    assert!(leaked.iter().all(|c| c.id != "dup"));
}

#[tokio::test]
async fn test_rank_consistency() {
    let engine = debate_store().await;

    for query in [
        "nuclear",
        "reactor costs",
        "What did the opponent say about waste?",
        "solar mining wind capacity and rare earth supply chains for renewable energy",
    ] {
        for top_k in [1, 3, 10] {
            let results = engine
                .search(query, SearchOptions::default().with_top_k(top_k))
                .await
                .expect("Search failed");

            assert!(!results.is_empty(), "no results for '{}'", query);
            assert!(results.len() <= top_k);
            for (i, c) in results.iter().enumerate() {
                assert_eq!(c.rank, i as u32 + 1);
            }
            for pair in results.windows(2) {
                assert!(pair[0].final_score >= pair[1].final_score);
            }
        }
    }
}

#[tokio::test]
async fn test_fusion_bounds_with_lexical_signal() {
    let engine = debate_store().await;

    for query in ["nuclear waste", "reactor construction budgets", "solar mining", "fuel"] {
        let results = engine
            .search(query, SearchOptions::default().with_top_k(6))
            .await
            .expect("Search failed");

        assert!(
            results.iter().any(|c| c.lexical_score.is_some()),
            "expected a lexical match for '{}'",
            query
        );
        for c in &results {
            assert!(
                (0.0..=1.0).contains(&c.final_score),
                "{} scored {} for '{}'",
                c.id,
                c.final_score,
                query
            );
        }
    }
}

#[tokio::test]
async fn test_identical_sequences_are_deterministic() {
    let first = debate_store().await;
    let second = debate_store().await;

    for query in ["nuclear waste", "What is a reactor", "costs of wind and solar"] {
        let a = first
            .search(query, SearchOptions::default())
            .await
            .expect("Search failed");
        let b = second
            .search(query, SearchOptions::default())
            .await
            .expect("Search failed");
        assert_eq!(summary(&a), summary(&b));
    }
}

#[tokio::test]
async fn test_semantic_query_uses_vector_only() {
    let engine = debate_store().await;

    let results = engine
        .search("What is the cost of reactors", SearchOptions::default())
        .await
        .expect("Search failed");

    assert!(!results.is_empty());
    for c in &results {
        assert!(c.vector_score.is_some());
        assert!(c.lexical_score.is_none());
    }
}

#[tokio::test]
async fn test_metadata_filter() {
    let engine = debate_store().await;

    let mut filter = MetadataFilter::new();
    filter.insert("role".to_string(), serde_json::json!("opponent"));

    let results = engine
        .search(
            "nuclear reactors and their costs",
            SearchOptions::default().with_top_k(6).with_filter(filter),
        )
        .await
        .expect("Search failed");

    assert!(!results.is_empty());
    for c in &results {
        assert_eq!(c.metadata.role.as_deref(), Some("opponent"));
    }

    let mut turn_filter = MetadataFilter::new();
    turn_filter.insert("turn".to_string(), serde_json::json!(4));
    let results = engine
        .search(
            "wind",
            SearchOptions::default().with_filter(turn_filter),
        )
        .await
        .expect("Search failed");
    let ids: Vec<&str> = results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["d4"]);
}

#[tokio::test]
async fn test_long_text_chunked_and_deleted_with_parent() {
    let engine = engine();

    let sentences = [
        "Thorium reactors breed fissile uranium from fertile thorium.",
        "Molten salt designs run at atmospheric pressure.",
        "Passive cooling removes decay heat without pumps.",
        "Fuel can be reprocessed online in some designs.",
        "Waste from the thorium cycle decays faster than spent uranium fuel.",
        "Proliferation risk is debated because of uranium-233.",
        "Several prototypes operated in the nineteen sixties.",
        "Corrosion of structural alloys remains an engineering challenge.",
        "Licensing frameworks were written for light water reactors.",
        "Supply chains for enriched lithium-7 are limited.",
        "Costs depend heavily on serial factory production.",
        "Public acceptance varies widely between countries.",
    ];
    let text = sentences.join(" ");
    assert!(text.chars().count() > 500);

    let id = engine
        .insert(
            &text,
            Metadata::new().with_role("researcher").with_domain("energy"),
            Some("long".to_string()),
            InsertOptions::default(),
        )
        .await
        .expect("Failed to insert");
    assert_eq!(id, "long");

    let stats = engine.get_stats().await;
    assert!(stats.total_memories >= 2);

    let results = engine
        .search("thorium waste decay", SearchOptions::default().with_top_k(10))
        .await
        .expect("Search failed");
    assert!(!results.is_empty());
    for c in &results {
        assert!(c.id.starts_with("long_chunk_"));
        assert!(c.metadata.is_chunk);
        assert_eq!(c.metadata.parent_id.as_deref(), Some("long"));
        assert_eq!(c.metadata.domain.as_deref(), Some("energy"));
        let total = c.metadata.total_chunks.expect("chunk without total");
        assert_eq!(total as usize, stats.total_memories);
        assert!(c.metadata.chunk_index.expect("chunk without index") < total);
    }

    assert!(engine.delete("long").await);
    let stats = engine.get_stats().await;
    assert_eq!(stats.total_memories, 0);
    assert_eq!(stats.lexical_document_count, 0);
}

#[tokio::test]
async fn test_chunking_can_be_disabled() {
    let engine = engine();
    let text = "Energy policy. ".repeat(60);

    engine
        .insert(&text, Metadata::new(), Some("whole".into()), InsertOptions::without_chunking())
        .await
        .expect("Failed to insert");

    assert_eq!(engine.get_stats().await.total_memories, 1);
}

#[tokio::test]
async fn test_insert_batch() {
    let engine = engine();
    let items = vec![
        BatchItem::new("Nuclear waste lasts millennia", Metadata::new().with_role("opponent"))
            .with_id("b1"),
        BatchItem::new("   ", Metadata::new()),
        BatchItem::new("Solar output varies by season", Metadata::new()),
    ];

    let result = engine.insert_batch(items).await;
    assert_eq!(result.processed, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.degraded, 0);
    assert_eq!(result.ids.len(), 2);
    assert_eq!(result.ids[0], "b1");

    assert_eq!(engine.get_stats().await.total_memories, 2);
}

#[tokio::test]
async fn test_clear_all() {
    let engine = debate_store().await;
    engine.clear_all().await;

    let stats = engine.get_stats().await;
    assert_eq!(stats.total_memories, 0);
    assert_eq!(stats.lexical_document_count, 0);
    assert_eq!(stats.tombstones, 0);

    let results = engine
        .search("nuclear", SearchOptions::default())
        .await
        .expect("Search failed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_stats() {
    let engine = debate_store().await;
    let stats = engine.get_stats().await;

    assert_eq!(stats.backend, "hnsw+bm25");
    assert_eq!(stats.embedding_model, "hashing");
    assert_eq!(stats.dimension, 384);
    assert_eq!(stats.total_memories, 6);
    assert_eq!(stats.lexical_document_count, 6);
    assert!(stats.hybrid_enabled);
    assert_eq!(stats.hybrid_vector_weight, 0.7);
    assert!(!stats.rerank_enabled);

    let json = serde_json::to_value(&stats).expect("Failed to serialize stats");
    assert_eq!(json["total_memories"], 6);
}

#[tokio::test]
async fn test_relevant_context() {
    let engine = engine();
    insert(&engine, "doc1", "Nuclear has lowest CO2 per TWh", "proponent", 1).await;
    insert(&engine, "doc2", "Nuclear waste lasts millennia", "opponent", 2).await;

    let context = engine
        .get_relevant_context("What did the opponent say about waste?", 1, ContextStyle::Compact)
        .await;
    assert_eq!(context, "[1] Nuclear waste lasts millennia");

    let cited = engine
        .get_relevant_context("What did the opponent say about waste?", 2, ContextStyle::Citation)
        .await;
    assert!(cited.contains("[1] doc2 (role: opponent, turn: 2)"));
}

#[tokio::test]
async fn test_cancelled_search() {
    let engine = debate_store().await;
    let token = CancellationToken::new();
    token.cancel();

    let result = engine
        .search_with_cancel("nuclear", SearchOptions::default(), &token)
        .await;
    assert!(matches!(
        result,
        Err(SearchError::Cancelled {
            stage: SearchStage::Preprocess
        })
    ));
}

/// Fast document embeddings, slow query embeddings
struct SlowQueryEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl EmbeddingService for SlowQueryEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.inner.embed_text(text)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        std::thread::sleep(self.delay);
        self.inner.embed_query(query)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "slow-query"
    }
}

#[tokio::test]
async fn test_cancel_during_query_embedding_stops_at_threshold() {
    let service = SlowQueryEmbedder {
        inner: HashingEmbedder::default(),
        delay: Duration::from_millis(200),
    };
    let engine = RetrievalEngine::new(Config::default(), Arc::new(service))
        .expect("Failed to create engine");
    insert(&engine, "d2", "Nuclear waste lasts millennia", "opponent", 2).await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let result = engine
        .search_with_cancel("nuclear waste", SearchOptions::default(), &token)
        .await;
    assert!(matches!(
        result,
        Err(SearchError::Cancelled {
            stage: SearchStage::Threshold
        })
    ));
}

#[tokio::test]
async fn test_threshold_drops_weak_candidates() {
    let engine = debate_store().await;

    let open = engine
        .search("nuclear waste", SearchOptions::default().with_top_k(6).with_threshold(0.0))
        .await
        .expect("Search failed");
    assert_eq!(open.len(), 6);

    // two query tokens raise the cutoff to 0.6
    let strict = engine
        .search("nuclear waste", SearchOptions::default().with_top_k(6).with_threshold(0.5))
        .await
        .expect("Search failed");
    let ids: Vec<&str> = strict.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["d2"]);
    assert!(strict[0].fused_score >= 0.6);
    assert_eq!(strict[0].rank, 1);
    assert!(open.iter().skip(1).all(|c| c.fused_score < 0.6));
}

#[tokio::test]
async fn test_threshold_removing_everything_keeps_fused_order() {
    let engine = debate_store().await;

    let unfiltered = engine
        .search("nuclear waste", SearchOptions::default().with_top_k(3).with_threshold(0.0))
        .await
        .expect("Search failed");
    let over_filtered = engine
        .search("nuclear waste", SearchOptions::default().with_top_k(3).with_threshold(0.99))
        .await
        .expect("Search failed");

    assert_eq!(over_filtered.len(), 3);
    assert!(over_filtered.iter().all(|c| c.fused_score < 0.85));
    assert_eq!(summary(&over_filtered), summary(&unfiltered));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_and_searches() {
    let engine = Arc::new(engine());
    let mut handles = Vec::new();

    for i in 0..8 {
        let writer = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            writer
                .insert(
                    &format!("Evidence item {} about reactor safety", i),
                    Metadata::new().with_turn(i + 1),
                    Some(format!("item{}", i)),
                    InsertOptions::default(),
                )
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }));

        let reader = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            reader
                .search("reactor safety", SearchOptions::default())
                .await
                .map(|results| assert!(results.len() <= 4))
                .map_err(|e| e.to_string())
        }));
    }

    for handle in handles {
        handle.await.expect("task panicked").expect("operation failed");
    }

    let stats = engine.get_stats().await;
    assert_eq!(stats.total_memories, 8);
    assert_eq!(stats.lexical_document_count, 8);
}

#[tokio::test]
async fn test_search_many_keeps_order() {
    let engine = Arc::new(debate_store().await);
    let queries = vec![
        "nuclear waste".to_string(),
        "wind capacity".to_string(),
        "solar mining".to_string(),
    ];

    let batched = engine
        .search_many(queries.clone(), SearchOptions::default())
        .await;
    assert_eq!(batched.len(), 3);

    for (query, result) in queries.iter().zip(batched) {
        let single = engine
            .search(query, SearchOptions::default())
            .await
            .expect("Search failed");
        let batched = result.expect("Batched search failed");
        assert_eq!(summary(&batched), summary(&single));
    }
}

/// Embedding service that never answers within the configured timeout
struct StalledEmbedder;

impl EmbeddingService for StalledEmbedder {
    fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(vec![1.0; 8])
    }

    fn dimension(&self) -> usize {
        8
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

#[tokio::test]
async fn test_embedding_timeout_degrades_to_zero_vector() {
    let mut config = Config::default();
    config.embedding.dimension = 8;
    config.embedding.timeout_ms = 20;

    let engine =
        RetrievalEngine::new(config, Arc::new(StalledEmbedder)).expect("Failed to create engine");

    insert(&engine, "slow", "Nuclear waste lasts millennia", "opponent", 2).await;
    assert_eq!(engine.get_stats().await.total_memories, 1);

    let results = engine
        .search("nuclear waste", SearchOptions::default())
        .await
        .expect("Search failed");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "slow");
}

#[cfg(feature = "fastembed")]
#[tokio::test]
#[ignore] // Requires model download
async fn test_opponent_waste_scenario_with_local_model() {
    use evidra::embedding::FastEmbedService;

    let service = FastEmbedService::new("bge-small-en-v1.5").expect("Failed to load model");
    let mut config = Config::default();
    config.embedding.model = "bge-small-en-v1.5".to_string();

    let engine = RetrievalEngine::new(config, Arc::new(service)).expect("Failed to create engine");
    insert(&engine, "doc1", "Nuclear has lowest CO2 per TWh", "proponent", 1).await;
    insert(&engine, "doc2", "Nuclear waste lasts millennia", "opponent", 2).await;

    let results = engine
        .search(
            "What did the opponent say about waste?",
            SearchOptions::default().with_top_k(1),
        )
        .await
        .expect("Search failed");
    assert_eq!(results[0].id, "doc2");
}
