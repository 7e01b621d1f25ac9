mod config;
mod graph;
mod macros;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, PipelineSettings};
use graph::PlayerGraph;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pipeplay")]
#[command(about = "Drive a synthetic element pipeline through its lifecycle", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "PIPEPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Number of frames the source emits before end of stream
    #[arg(short, long)]
    frames: Option<u64>,

    /// Replay the stream from the start after end of stream
    #[arg(short, long = "loop")]
    loop_playback: bool,

    /// Enable per-element diagnostic logging
    #[arg(long)]
    log_elements: bool,

    /// Number of passthrough stages between source and sink
    #[arg(short, long)]
    passthrough: Option<usize>,

    /// Print the final pipeline status as JSON
    #[arg(long)]
    status: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(frames) = self.frames {
            config.pipeline.frame_count = frames;
        }
        if let Some(stages) = self.passthrough {
            config.pipeline.passthrough_stages = stages;
        }
        if self.loop_playback {
            config.pipeline.loop_playback = true;
        }
        if self.log_elements {
            config.general.element_logging = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load_from_path(&config_path)?;
    cli.apply(&mut config);
    config.validate().context("Invalid command line options")?;

    let mut filter = config.general.log_level.clone();
    if config.general.element_logging {
        filter.push_str(",engine::element=debug");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_micros()
        .init();

    log::info!("Starting pipeplay v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration: {}", config_path.display());
    log::info!(
        "  - Frames: {} x {} bytes",
        config.pipeline.frame_count,
        config.pipeline.frame_size
    );
    log::info!("  - Passthrough stages: {}", config.pipeline.passthrough_stages);
    log::info!("  - Link capacity: {}", config.pipeline.link_capacity);
    if config.pipeline.loop_playback {
        match config.pipeline.loop_count {
            0 => log::info!("  - Loop: forever"),
            n => log::info!("  - Loop: {} times", n),
        }
    }

    let graph = Arc::new(PlayerGraph::build(
        &config.pipeline,
        config.general.element_logging,
    )?);

    let outcome = match graph.start() {
        Ok(()) => run(&graph, &config.pipeline).await,
        Err(e) => Err(e),
    };

    // Terminate joins worker threads; keep it off the async workers
    let shutdown_graph = Arc::clone(&graph);
    let status = tokio::task::spawn_blocking(move || shutdown_graph.shutdown())
        .await
        .context("Shutdown task panicked")??;

    log::info!(
        "Received {} frames, all elements stopped: {}",
        graph.frames_received(),
        status.all_stopped()
    );

    if cli.status {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    outcome
}

/// Poll for end of stream and element failures until done or interrupted.
async fn run(graph: &Arc<PlayerGraph>, settings: &PipelineSettings) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(settings.poll_interval_ms));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut replays = 0u64;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Received interrupt, shutting down...");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let status = graph.status()?;
        if let Some(failed) = status.failures().next() {
            let reason = failed
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            anyhow::bail!("Element {} failed: {}", failed.name, reason);
        }

        if !graph.is_end_of_stream() {
            continue;
        }

        log::info!("End of stream after {} frames", graph.frames_received());

        let replay = settings.loop_playback
            && (settings.loop_count == 0 || replays < settings.loop_count);
        if !replay {
            return Ok(());
        }

        replays += 1;
        log::info!("Replaying stream ({})", replays);
        let restart_graph = Arc::clone(graph);
        tokio::task::spawn_blocking(move || restart_graph.restart())
            .await
            .context("Restart task panicked")??;
    }
}
