//! canon - entity resolution and graph queries from the command line.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use canon_cli::signals::{cancel_on_interrupt, reload_on_hangup};
use canon_cli::{build_engine, execute, Cli, ConfigSource};
use canon_core::OperationContext;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let source = ConfigSource {
        file: cli.config.clone(),
        db: cli.db.clone(),
    };

    let engine = Arc::new(build_engine(source.load()?)?);
    let ctx = OperationContext::new();
    let interrupt = cancel_on_interrupt(ctx.token().clone());
    let hangup = reload_on_hangup(engine.clone(), source);

    let result = execute(&engine, &ctx, cli.command).await;
    interrupt.abort();
    hangup.abort();

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
