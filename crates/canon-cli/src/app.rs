//! Engine wiring and command execution.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use canon_core::types::EntityCandidate;
use canon_core::{CanonConfig, CanonEngine, OperationContext};
use canon_embeddings::EmbedderFactory;
use canon_graph_stores::GraphStoreFactory;
use canon_llm::OracleFactory;

use crate::cli::Command;
use crate::input::read_batches;

/// Where the configuration comes from, kept so it can be reloaded.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    pub file: Option<PathBuf>,
    pub db: Option<PathBuf>,
}

impl ConfigSource {
    /// Read the file (or the defaults), then the environment, then the
    /// command-line overrides.
    pub fn load(&self) -> Result<CanonConfig> {
        let mut config = match &self.file {
            Some(path) => CanonConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => CanonConfig::default(),
        };
        config.apply_env();
        if let Some(db) = &self.db {
            config.store.path = db.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Open the stores and providers a configuration selects.
pub fn build_engine(config: CanonConfig) -> Result<CanonEngine> {
    let stores = GraphStoreFactory::open(&config.store)?;
    let embedder = EmbedderFactory::create(&config.embedder)?;
    let oracle = OracleFactory::create(&config.oracle)?;
    info!(
        embedder = embedder.model_name(),
        oracle = oracle.name(),
        "Engine ready"
    );

    let engine = CanonEngine::builder(config)
        .stores(stores.graph)
        .vector_index(stores.vectors)
        .embedder(embedder)
        .oracle(oracle)
        .build()?;
    Ok(engine)
}

/// Run one command and return its JSON result.
pub async fn execute(engine: &CanonEngine, ctx: &OperationContext, command: Command) -> Result<Value> {
    let output = match command {
        Command::Ingest { files } => ingest(engine, ctx, &files).await?,
        Command::Resolve {
            name,
            entity_type,
            description,
        } => {
            let candidate = EntityCandidate::new(name, entity_type, description);
            serde_json::to_value(engine.resolve_entity_with(ctx, &candidate).await?)?
        }
        Command::Merge { alias, canonical } => {
            ctx.check()?;
            serde_json::to_value(engine.merge(alias, canonical).await?)?
        }
        Command::Neighbors {
            id,
            depth,
            predicates,
            max_entities,
        } => {
            let predicates = (!predicates.is_empty()).then_some(predicates);
            let query = engine.neighbor_query(id, depth, predicates, max_entities);
            serde_json::to_value(engine.get_neighbors_with(ctx, &query).await?)?
        }
        Command::Common {
            ids,
            page,
            page_size,
        } => serde_json::to_value(
            engine
                .get_common_documents_with(ctx, &ids, page, page_size)
                .await?,
        )?,
        Command::Repair => serde_json::to_value(engine.repair_with(ctx).await?)?,
        Command::Heal { entity_type } => serde_json::to_value(
            engine
                .heal_duplicates_with(ctx, entity_type.as_deref())
                .await?,
        )?,
    };
    Ok(output)
}

async fn ingest(engine: &CanonEngine, ctx: &OperationContext, files: &[PathBuf]) -> Result<Value> {
    let mut reports = Vec::new();
    for file in files {
        for (index, batch) in read_batches(file)?.into_iter().enumerate() {
            ctx.check()?;
            let report = engine.ingest_with(ctx, batch).await?;
            if report.is_partial() {
                warn!(
                    file = %file.display(),
                    batch = index,
                    skipped = report.skipped.len(),
                    failures = report.failures.len(),
                    "Batch partially ingested"
                );
            }
            reports.push(json!({
                "file": file.display().to_string(),
                "batch": index,
                "report": report,
            }));
        }
    }
    Ok(Value::Array(reports))
}
