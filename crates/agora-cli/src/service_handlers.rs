//! Handler functions for commands that talk to the vector store.
//!
//! These implement `status`, `collections`, `index`, `delete` and `search`
//! on top of a [`RetrievalService`].

use std::path::Path;

use agora_core::{Error, Result};
use agora_retrieval::{
    Entity, EntityKind, EntityRef, HybridSearchOptions, MultiStageOptions, RetrievalService,
    SearchHit, ServiceStatus,
};
use log::warn;

use crate::cli::SearchArgs;

/// Entities indexed per `reindex_all` call.
const INDEX_BATCH: usize = 256;

// ============================================================================
// Status and collections
// ============================================================================

/// Print store readiness and provider state.
pub async fn handle_status(service: &RetrievalService, json: bool) -> Result<()> {
    let status = service.status().await;
    if json {
        let out = serde_json::to_string_pretty(&status)
            .map_err(|e| Error::serialization(e.to_string()))?;
        println!("{out}");
    } else {
        print!("{}", format_status(&status));
    }
    Ok(())
}

fn format_status(status: &ServiceStatus) -> String {
    let mut out = format!(
        "Store:     {} ({})\n",
        status.store,
        if status.ready { "ready" } else { "unavailable" }
    );
    out.push_str("Providers:\n");
    for p in &status.providers {
        out.push_str(&format!(
            "  {:<12} {:<11} requests={} failures={}",
            p.name,
            if p.available { "available" } else { "backing-off" },
            p.requests_in_window,
            p.consecutive_failures
        ));
        if !p.backoff_remaining.is_zero() {
            out.push_str(&format!(" backoff={:?}", p.backoff_remaining));
        }
        out.push('\n');
    }
    out
}

/// Create any missing collections.
pub async fn handle_ensure(service: &RetrievalService) -> Result<()> {
    service.ensure_collections().await?;
    for spec in service.collection_specs() {
        println!("  {}", spec.name);
    }
    println!("{} collection(s) ready.", service.collection_specs().len());
    Ok(())
}

/// Drop and recreate every collection, only when confirmed.
pub async fn handle_reset(service: &RetrievalService, confirmed: bool) -> Result<()> {
    if !confirmed {
        return Err(Error::bad_request(
            "collections reset deletes every indexed point; pass --yes to confirm",
        ));
    }
    service.force_reset().await?;
    println!(
        "Reset {} collection(s). Re-index to restore search.",
        service.collection_specs().len()
    );
    Ok(())
}

// ============================================================================
// Indexing
// ============================================================================

/// Entities parsed from a JSONL export.
#[derive(Debug, Default)]
pub struct ParsedExport {
    /// Entities in file order.
    pub entities: Vec<Entity>,
    /// 1-based line numbers that did not parse.
    pub skipped: Vec<usize>,
}

/// Parse JSONL text, skipping blank lines and logging bad ones.
pub fn parse_jsonl(content: &str) -> ParsedExport {
    let mut parsed = ParsedExport::default();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Entity>(line) {
            Ok(entity) => parsed.entities.push(entity),
            Err(e) => {
                warn!("Skipping line {}: {e}", i + 1);
                parsed.skipped.push(i + 1);
            }
        }
    }
    parsed
}

/// Backfill the index from a JSONL file.
pub async fn handle_index(service: &RetrievalService, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file).await?;
    let parsed = parse_jsonl(&content);

    println!(
        "Indexing {} entities from {}",
        parsed.entities.len(),
        file.display()
    );

    service.ensure_collections().await?;
    let mut indexed = 0;
    let mut failed: Vec<EntityRef> = Vec::new();
    for batch in parsed.entities.chunks(INDEX_BATCH) {
        let report = service.reindex_all(batch).await;
        indexed += report.indexed;
        failed.extend(report.failed);
    }

    println!("  Indexed: {indexed}");
    if !parsed.skipped.is_empty() {
        println!("  Skipped: {} unparseable line(s)", parsed.skipped.len());
    }
    if !failed.is_empty() {
        println!("  Failed:  {}", failed.len());
        for entity in &failed {
            println!("    - {entity}");
        }
    }
    Ok(())
}

/// Remove one entity.
pub async fn handle_delete(service: &RetrievalService, kind: EntityKind, id: i64) -> Result<()> {
    let entity = EntityRef::new(kind, id);
    service.delete_entity(entity).await?;
    println!("Deleted {entity}");
    Ok(())
}

// ============================================================================
// Search
// ============================================================================

/// Run a hybrid or multi-stage search and print the hits.
pub async fn handle_search(
    service: &RetrievalService,
    args: SearchArgs,
    candidate_limit: usize,
) -> Result<()> {
    let hits = if args.multi_stage {
        let opts = MultiStageOptions::new(args.limit, candidate_limit.max(args.limit))
            .with_scope(args.scope);
        service.multi_stage_search(&args.query, &opts).await?
    } else {
        service
            .hybrid_search(&args.query, &args.scope, &hybrid_options(&args))
            .await?
    };

    if args.json {
        let out = serde_json::to_string_pretty(&hits)
            .map_err(|e| Error::serialization(e.to_string()))?;
        println!("{out}");
    } else if hits.is_empty() {
        println!("No results.");
    } else {
        for hit in &hits {
            println!("{}", format_hit(hit));
        }
    }
    Ok(())
}

fn hybrid_options(args: &SearchArgs) -> HybridSearchOptions {
    let opts = HybridSearchOptions::new(args.limit).with_fusion(args.fusion);
    if args.dense_only {
        opts.dense_only()
    } else if args.sparse_only {
        opts.sparse_only()
    } else {
        opts
    }
}

fn format_hit(hit: &SearchHit) -> String {
    format!(
        "{:>3}. [{:.4}] {:<14} {} ({})",
        hit.rank,
        hit.score,
        hit.entity.to_string(),
        hit.payload.title(),
        hit.match_type
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use agora_retrieval::{AgoraConfig, FusionMethod, MemoryContentSource, SearchScope, StoreBackend};

    use super::*;

    const POSTS: &str = r#"
{"type":"post","id":1,"title":"Quantum basics","content":"Qubits and superposition.","author":{"id":7,"username":"ada"},"category":null,"tags":["physics"],"created_at":"2026-03-01T12:00:00Z","updated_at":null,"vote_score":3,"comment_count":1,"bookmark_count":0}

not json at all
{"type":"post","id":2,"title":"Sourdough","content":"Feed the starter.","author":{"id":8,"username":"bo"},"category":null,"tags":[],"created_at":"2026-03-02T12:00:00Z","updated_at":null,"vote_score":0,"comment_count":0,"bookmark_count":0}
"#;

    async fn memory_service() -> RetrievalService {
        let mut config = AgoraConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.store.dense_dimension = 64;
        let service =
            RetrievalService::from_config(&config, Arc::new(MemoryContentSource::new())).unwrap();
        service.ensure_collections().await.unwrap();
        service
    }

    fn search_args(query: &str) -> SearchArgs {
        SearchArgs {
            query: query.to_string(),
            scope: SearchScope::default(),
            limit: 5,
            fusion: FusionMethod::Rrf,
            dense_only: false,
            sparse_only: false,
            multi_stage: false,
            json: false,
        }
    }

    #[test]
    fn test_parse_jsonl_skips_bad_lines() {
        let parsed = parse_jsonl(POSTS);
        assert_eq!(parsed.entities.len(), 2);
        assert_eq!(parsed.entities[0].entity_ref(), EntityRef::post(1));
        assert_eq!(parsed.skipped, vec![4]);
    }

    #[test]
    fn test_hybrid_options_modes() {
        let mut args = search_args("q");
        let opts = hybrid_options(&args);
        assert!(opts.enable_dense && opts.enable_sparse);

        args.dense_only = true;
        let opts = hybrid_options(&args);
        assert!(opts.enable_dense && !opts.enable_sparse);

        args.dense_only = false;
        args.sparse_only = true;
        let opts = hybrid_options(&args);
        assert!(!opts.enable_dense && opts.enable_sparse);
    }

    #[tokio::test]
    async fn test_index_file_then_search() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("posts.jsonl");
        std::fs::write(&path, POSTS).unwrap();

        let service = memory_service().await;
        handle_index(&service, &path).await.unwrap();

        let hits = service
            .hybrid_search(
                "quantum",
                &SearchScope::default(),
                &hybrid_options(&search_args("quantum")),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(1));
        assert!(format_hit(&hits[0]).contains("post:1"));

        handle_search(&service, search_args("quantum"), 100).await.unwrap();
        let mut multi = search_args("quantum");
        multi.multi_stage = true;
        handle_search(&service, multi, 100).await.unwrap();
    }

    #[tokio::test]
    async fn test_index_missing_file_is_io_error() {
        let service = memory_service().await;
        let result = handle_index(&service, Path::new("/nonexistent/posts.jsonl")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_reset_requires_confirmation() {
        let service = memory_service().await;
        assert!(matches!(
            handle_reset(&service, false).await,
            Err(Error::BadRequest(_))
        ));
        assert!(handle_reset(&service, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_format() {
        let service = memory_service().await;
        let text = format_status(&service.status().await);
        assert!(text.contains("memory (ready)"));
        assert!(text.contains("local"));
        assert!(handle_status(&service, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_entity() {
        let service = memory_service().await;
        assert!(handle_delete(&service, EntityKind::Post, 9).await.is_ok());
    }
}
