//! kag application binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Restore the graph snapshot from the data directory, if one exists
//! 3. Apply one extraction batch (entities, then relationships)
//! 4. Embed the touched nodes and edges into the vector store
//! 5. Save the snapshot and report the graph summary
//!
//! The vector store is in-memory only: embeddings live for one run and are
//! not written to the data directory. Only the graph snapshot is persisted.

mod cli;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::Parser;

use kag_core::config::KagConfig;
use kag_core::types::{Entity, ExtractionBatch, Relationship};
use kag_graph::{load_snapshot, save_snapshot, BatchBuilder, GraphStore};
use kag_vector::{EmbeddingPipeline, EmbeddingReport, InMemoryVectorStore, VectorStore};

use cli::CliArgs;

fn read_batch(path: &Path) -> Result<ExtractionBatch, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let batch: ExtractionBatch = serde_json::from_str(&content)?;
    Ok(batch)
}

fn open_graph(snapshot_path: &Path, config: &KagConfig) -> Result<GraphStore, Box<dyn std::error::Error>> {
    if snapshot_path.exists() {
        let store = load_snapshot(snapshot_path, &config.graph)?;
        tracing::info!(path = %snapshot_path.display(), summary = %store.summary(), "Graph snapshot restored");
        Ok(store)
    } else {
        tracing::info!(path = %snapshot_path.display(), "No snapshot found, starting with an empty graph");
        Ok(GraphStore::from_config(&config.graph))
    }
}

/// Embed one batch's touched elements into a fresh in-memory collection.
///
/// Returns `None` when embedding or the vector store is disabled.
async fn embed_touched(
    config: &KagConfig,
    entities: &[Entity],
    relationships: &[Relationship],
    lookup: &HashMap<String, Entity>,
) -> Option<(EmbeddingReport, Arc<InMemoryVectorStore>)> {
    let vectors = Arc::new(InMemoryVectorStore::new(
        config.vector_store.collection_name.clone(),
    ));
    let pipeline = EmbeddingPipeline::from_config(config, Arc::clone(&vectors));
    if !pipeline.is_available() {
        tracing::info!("Embedding or vector store disabled in configuration; skipping");
        return None;
    }

    let report = pipeline
        .store_embeddings(entities, relationships, Some(lookup))
        .await;
    tracing::info!(
        entities = report.entities_processed,
        relationships = report.relationships_processed,
        collection = %vectors.collection_name(),
        collection_size = vectors.collection_size(),
        "Embeddings stored in memory; vectors are not persisted"
    );
    Some((report, vectors))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = KagConfig::load_or_default(&config_file);

    // Tracing: RUST_LOG wins, then --log-level, then the config file.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting kag v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Graph.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    let snapshot_path = data_dir.join(&config.graph.snapshot_file);
    let graph = Arc::new(Mutex::new(open_graph(&snapshot_path, &config)?));

    // Batch.
    let batch = read_batch(&args.input)?;
    tracing::info!(
        input = %args.input.display(),
        entities = batch.entities.len(),
        relationships = batch.relationships.len(),
        "Extraction batch loaded"
    );

    let mut builder = BatchBuilder::new(Arc::clone(&graph));
    let outcome = builder.build_or_update(batch.entities, batch.relationships);

    let (touched_entities, touched_relationships, lookup) = {
        let store = graph
            .lock()
            .map_err(|e| format!("Graph lock poisoned: {}", e))?;
        let entities: Vec<Entity> = outcome
            .added_nodes
            .iter()
            .filter_map(|id| store.node(id).map(|n| n.to_entity()))
            .collect();
        let relationships: Vec<Relationship> = outcome
            .added_edges
            .iter()
            .filter_map(|id| store.edge(id).map(|e| e.to_relationship()))
            .collect();
        let lookup = store.entity_lookup();
        (entities, relationships, lookup)
    };

    // Embeddings.
    embed_touched(&config, &touched_entities, &touched_relationships, &lookup).await;

    // Snapshot.
    let store = graph
        .lock()
        .map_err(|e| format!("Graph lock poisoned: {}", e))?;
    save_snapshot(&store, &snapshot_path)?;
    tracing::info!(path = %snapshot_path.display(), "Graph snapshot saved");
    tracing::info!("{}", store.summary());

    Ok(())
}
