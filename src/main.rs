// src/main.rs
//! Harvest trace replay
//!
//! Replays a recorded DevTools trace through a capture session and writes
//! the resulting HTTP archive.

use anyhow::{Context, Result};
use clap::Parser;
use harvest_engine::capture::{ExportFormat, Exporter, HarCreator, Trace};
use harvest_engine::observability::{init_metrics, init_tracing};
use harvest_engine::utils::config::EngineConfig;
use harvest_engine::CaptureSession;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "harvest", version, about = "Assemble a HAR file from a DevTools network trace")]
struct Args {
    /// Trace file (JSON lines of DevTools protocol messages)
    input: PathBuf,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file (defaults to ./harvest.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the bare entry list instead of a HAR document
    #[arg(long)]
    entries_only: bool,

    /// Compact JSON output
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load_from(args.config.as_deref())?;
    init_tracing(&config.logging)?;
    let metrics = init_metrics()?;

    info!("Starting Harvest v{}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration loaded: {:?}", config);

    let text = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;
    let trace = Trace::parse(&text);
    if trace.skipped > 0 {
        warn!("{} trace lines could not be decoded", trace.skipped);
    }
    info!(
        "Replaying {} events ({} recorded bodies)",
        trace.events.len(),
        trace.bodies.len()
    );

    let session = CaptureSession::with_enrichment(Arc::new(trace.bodies), config.capture.clone());
    session.start()?;
    for event in trace.events {
        session.ingest(event);
    }
    session.wait_for_enrichment().await;
    session.stop();

    let stats = session.stats();
    info!(
        "Captured {} requests ({} finished, {} failed, {} bytes)",
        stats.request_count, stats.finished, stats.failed, stats.total_encoded_bytes
    );

    let browser = (!config.export.browser_name.is_empty()).then(|| {
        HarCreator::new(
            config.export.browser_name.clone(),
            config.export.browser_version.clone(),
        )
    });
    let document = session.export_document(
        HarCreator::new(
            config.export.creator_name.clone(),
            config.export.creator_version.clone(),
        ),
        browser,
    );

    let format = if args.entries_only {
        ExportFormat::Json
    } else {
        ExportFormat::Har
    };
    let mut exporter = Exporter::new(format);
    if args.compact {
        exporter = exporter.compact();
    }

    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            exporter.export_to(&document, &mut writer)?;
            writer.flush()?;
            info!("Wrote {} entries to {}", document.log.entries.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            exporter.export_to(&document, &mut lock)?;
            writeln!(lock)?;
        }
    }

    debug!("Metrics:\n{}", metrics.render());
    Ok(())
}
