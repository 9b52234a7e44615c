//! The `canon` command-line tool.
//!
//! Wires the SQLite graph store, the configured embedder and the
//! disambiguation oracle into a [`canon_core::CanonEngine`] and exposes
//! ingestion, queries and maintenance as subcommands. Results are printed as
//! JSON on stdout; logs go to stderr.
//!
//! # Configuration
//!
//! `--config` names a TOML, JSON or YAML file. On top of it:
//!
//! - `CANON_*` variables (see [`canon_core::CanonConfig::apply_env`])
//! - `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` for the providers
//! - `--db` for the database path
//!
//! A `.env` file in the working directory is read first. Sending SIGHUP
//! reloads the configuration between batches.

pub mod app;
pub mod cli;
pub mod input;
pub mod signals;

pub use app::{build_engine, execute, ConfigSource};
pub use cli::{Cli, Command};
