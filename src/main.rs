use anyhow::{Context, Result};
use tracing::info;

mod config;
mod diagnostics;
mod initializer;
mod memory;
mod playback;
mod remote;
mod samples;
mod service;

use config::{AppConfig, ServiceMode};
use diagnostics::DiagnosticSink;
use memory::MemoryAssetService;
use remote::HttpAssetService;
use service::AssetService;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    info!("starting iot_scene_replay");

    let config = AppConfig::load_default()?;
    let sink = DiagnosticSink::new();
    let service = build_service(&config, sink.clone());

    let outcome = run(service.as_ref(), &config).await;

    // Best-effort cleanup of the collaborator connection on every exit path.
    if let Err(e) = service.shutdown().await {
        tracing::warn!("shutdown failed: {e:#}");
    }

    if let Err(e) = outcome {
        eprintln!("replay failed: {e:#}");
        dump_diagnostics(&sink);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(service: &dyn AssetService, config: &AppConfig) -> Result<()> {
    service
        .check_connection()
        .await
        .context("asset server unreachable; aborting before setup")?;

    let dest = initializer::initialize(service, &config.replay).await?;
    let csv_path = samples::topic_data_path(&config.replay.content_dir, &config.replay.topic);
    playback::play(service, &dest, &csv_path).await
}

fn build_service(config: &AppConfig, sink: DiagnosticSink) -> Box<dyn AssetService> {
    match config.connection.mode {
        ServiceMode::Memory => {
            info!("using in-process document store");
            Box::new(MemoryAssetService::new(sink))
        }
        ServiceMode::Http => {
            info!(
                "using asset server http://{}/{}",
                config.connection.host, config.connection.base_path
            );
            Box::new(HttpAssetService::new(
                &config.connection.host,
                &config.connection.base_path,
                sink,
            ))
        }
    }
}

fn dump_diagnostics(sink: &DiagnosticSink) {
    let records = sink.drain();
    if records.is_empty() {
        return;
    }
    eprintln!("---- collaborator diagnostics ----");
    for rec in records {
        eprintln!("[{}] {}: {}", rec.severity, rec.component, rec.message);
    }
    eprintln!("----");
}
