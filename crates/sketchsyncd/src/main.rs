//! Sketchsync Daemon (sketchsyncd)
//!
//! Hosts the document authority: views connect over TCP or WebSocket, open a
//! document from the storage root and edit it together.
//!
//! # Usage
//!
//! ```bash
//! # Serve documents from the current directory (TCP 7380, WebSocket 7381)
//! sketchsyncd
//!
//! # Serve a directory with custom ports
//! sketchsyncd --root /srv/sketches --tcp-port 8000 --ws-port 8001
//!
//! # With Prometheus metrics
//! sketchsyncd --metrics-port 9380
//!
//! # With configuration file
//! sketchsyncd --config /etc/sketchsync/sketchsyncd.toml
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use sketchsync_core::Authority;
use sketchsync_render::RasterRenderer;
use sketchsync_storage::FsStorage;
use sketchsync_transport::{Metrics, MetricsServer, TcpServer, WebSocketServer};

use crate::config::{Args, FileConfig, Settings};

/// How often authority gauges are refreshed
const STATS_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&args, file)?;

    // Initialize logging
    let level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner();

    let storage = FsStorage::open(&settings.root)
        .await
        .with_context(|| format!("Failed to open document root {}", settings.root.display()))?;
    info!(root = %settings.root.display(), "Serving documents");

    let renderer = RasterRenderer::new(settings.render.clone());
    let authority = Arc::new(Authority::with_config(
        Arc::new(storage),
        Arc::new(renderer),
        settings.authority.clone(),
    ));

    let metrics = match settings.metrics_addr {
        Some(_) => Some(Arc::new(Metrics::new().context("Failed to create metrics")?)),
        None => None,
    };

    info!(
        tcp = ?settings.tcp_addr,
        ws = ?settings.ws_addr,
        metrics = ?settings.metrics_addr,
        rate_limit = settings.session.rate_limit.messages_per_second,
        max_frame_size = settings.session.frames.max_frame_size,
        "Starting sketchsync daemon"
    );

    let mut handles = Vec::new();

    if let Some(addr) = settings.tcp_addr {
        let mut tcp_server = TcpServer::new(authority.clone(), addr).with_config(settings.session.clone());
        if let Some(metrics) = &metrics {
            tcp_server = tcp_server.with_metrics(metrics.clone());
        }
        handles.push(tokio::spawn(async move {
            if let Err(e) = tcp_server.run().await {
                error!(error = %e, "TCP server error");
            }
        }));
    }

    if let Some(addr) = settings.ws_addr {
        let mut ws_server = WebSocketServer::new(authority.clone(), addr).with_config(settings.session.clone());
        if let Some(metrics) = &metrics {
            ws_server = ws_server.with_metrics(metrics.clone());
        }
        handles.push(tokio::spawn(async move {
            if let Err(e) = ws_server.run().await {
                error!(error = %e, "WebSocket server error");
            }
        }));
    }

    if handles.is_empty() {
        anyhow::bail!("At least one transport must be enabled");
    }

    if let (Some(addr), Some(metrics)) = (settings.metrics_addr, &metrics) {
        let server = MetricsServer::new(metrics.clone(), addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Metrics server error");
            }
        }));
    }

    // Periodic authority stats
    let stats_authority = authority.clone();
    let stats_metrics = metrics.clone();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        loop {
            interval.tick().await;
            let stats = stats_authority.stats();
            if let Some(metrics) = &stats_metrics {
                metrics.set_authority_stats(stats.document_count, stats.view_count);
            }
            if stats.document_count > 0 {
                info!(documents = stats.document_count, views = stats.view_count, "Authority stats");
            }
        }
    }));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for meta in authority.list() {
        if meta.dirty {
            info!(doc_id = %meta.id, revision = meta.revision, "Discarding unsaved edits");
        }
    }
    for handle in handles {
        handle.abort();
    }

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  sketchsync
  Collaborative sketch document host
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
