//! CLI entry point: discovers video files in an input directory, wires them
//! into the pipeline engine, prints pipeline events to stderr, and drives
//! two-phase shutdown from Ctrl-C.

mod cli;
mod frame_source;
mod shutdown;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dashcam_core::{NoopSink, Sink};
use dashcam_engine::{
    start_engine, Detector, EngineConfig, HttpSink, NullDetector, NullOcr, Ocr, PipelineEvent,
};
use tokio::sync::mpsc;

use crate::cli::Cli;
use crate::frame_source::ChunkedFileFrameSource;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

fn discover_sources(
    input_dir: &Path,
) -> anyhow::Result<Vec<Box<dyn dashcam_engine::FrameSource>>> {
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("failed to open input directory {}", input_dir.display()))?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut sources: Vec<Box<dyn dashcam_engine::FrameSource>> = Vec::with_capacity(paths.len());
    for path in paths {
        let source = ChunkedFileFrameSource::open(&path)
            .with_context(|| format!("failed to open video file {}", path.display()))?;
        sources.push(Box::new(source));
    }
    Ok(sources)
}

fn build_sink(cli: &Cli) -> Arc<dyn Sink> {
    match &cli.sink_url {
        Some(url) => Arc::new(HttpSink::new(url.clone())),
        None => Arc::new(NoopSink),
    }
}

fn log_event(event: &PipelineEvent) {
    eprintln!("[event] {event:?}");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = run().await {
        eprintln!("dashcam-pipeline: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let sources = discover_sources(&cli.input_dir)?;
    if sources.is_empty() {
        eprintln!(
            "dashcam-pipeline: no video files found in {}",
            cli.input_dir.display()
        );
    }

    let detector: Arc<dyn Detector> = Arc::new(NullDetector);
    let ocr: Arc<dyn Ocr> = Arc::new(NullOcr);
    let sink = build_sink(&cli);

    let config = EngineConfig {
        sources,
        num_video_readers: cli.num_video_readers,
        num_gpu_workers: cli.num_gpu_workers,
        num_cpu_workers: cli.num_cpu_workers,
        queue_soft_limit: cli.queue_soft_limit,
        queue_hard_limit: cli.queue_hard_limit,
        max_gpu_backlog: cli.max_gpu_backlog,
        max_cpu_backlog: cli.max_cpu_backlog,
        idle_poll: EngineConfig::DEFAULT_IDLE_POLL,
        monitor_interval: cli.monitor_interval,
        drain_timeout: cli.drain_timeout,
        detector,
        ocr,
        sink,
    };

    let engine = start_engine(config);

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            log_event(&event);
        }
    });

    let shutdown_ctl = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
    spawn_ctrl_c_handler(shutdown_ctl, shutdown_tx);

    let relay_engine = engine.clone();
    let relay = tokio::spawn(async move {
        while let Some(event) = shutdown_rx.recv().await {
            match event {
                ShutdownEvent::Graceful => relay_engine.request_stop(),
                ShutdownEvent::Immediate => relay_engine.request_terminate(),
            }
        }
    });

    let result = engine.wait().await;
    relay.abort();
    result
}
