// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Result;
use clap::Parser;
use photo_match::config::Settings;
use photo_match::context::EngineContext;
use std::path::PathBuf;

/// Ingest a folder of event photos into the event's face index.
#[derive(Debug, Parser)]
#[command(name = "ingest", version)]
struct Args {
    /// Event slug, e.g. christ-sports-2025
    #[arg(long, env = "EVENT_SLUG")]
    event: String,

    /// Root folder containing all event images
    folder: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photo_match=info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let ctx = EngineContext::from_settings(settings).await?;

    let report = ctx.ingest_pipeline().run(&args.event, &args.folder).await?;

    println!("Event:              {}", report.event_slug);
    println!("Images found:       {}", report.files_found);
    println!("Ingested:           {}", report.ingested);
    println!("Skipped duplicates: {}", report.skipped_duplicates);
    println!("Face vectors:       {}", report.faces_indexed);
    println!("Fallback vectors:   {}", report.fallback_indexed);
    println!("Without vectors:    {}", report.without_vectors);
    if report.index_updated {
        println!("Index updated and uploaded.");
    } else {
        println!("No new embeddings to index.");
    }
    if !report.failures.is_empty() {
        println!("Failures:           {}", report.failures.len());
        for failure in &report.failures {
            println!("  {}: {}", failure.path.display(), failure.reason);
        }
    }
    Ok(())
}
