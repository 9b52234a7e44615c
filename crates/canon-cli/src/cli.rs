//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use canon_core::types::EntityId;

#[derive(Debug, Parser)]
#[command(name = "canon", version, about = "Canonical entity resolution and graph queries")]
pub struct Cli {
    /// Configuration file (.toml, .json or .yaml). Environment variables
    /// are applied on top.
    #[arg(long, short, global = true, env = "CANON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `store.path`.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest extraction batches from JSON or JSON Lines files.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Resolve one mention to its canonical entity.
    Resolve {
        name: String,
        #[arg(long = "type", short = 't')]
        entity_type: String,
        #[arg(long, short, default_value = "")]
        description: String,
    },

    /// Merge an entity into another.
    Merge { alias: EntityId, canonical: EntityId },

    /// Neighborhood of an entity.
    Neighbors {
        id: EntityId,
        #[arg(long)]
        depth: Option<u8>,
        /// Only follow these predicates. Repeatable.
        #[arg(long = "predicate", short = 'p')]
        predicates: Vec<String>,
        #[arg(long)]
        max_entities: Option<usize>,
    },

    /// Documents every listed entity appears in.
    Common {
        #[arg(required = true)]
        ids: Vec<EntityId>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Flatten canonical chains and drop dangling redirects.
    Repair,

    /// Merge canonical entities whose normalized names collide.
    Heal {
        #[arg(long = "type", short = 't')]
        entity_type: Option<String>,
    },
}
