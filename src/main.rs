//! GhostTap CLI
//!
//! Command-line interface for testing and using GhostTap.

use clap::{Parser, Subcommand, ValueEnum};
use ghosttap::{capture, BackendKind, GhostTapConfig, Recorder};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Capture backend for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// PipeWire if available
    Auto,
    /// PipeWire sink monitor
    Pipewire,
    /// Synthetic 440 Hz tone
    Tone,
}

impl From<Backend> for BackendKind {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Auto => BackendKind::Auto,
            Backend::Pipewire => BackendKind::PipeWire,
            Backend::Tone => BackendKind::Tone,
        }
    }
}

#[derive(Parser)]
#[command(name = "ghosttap")]
#[command(about = "System audio playback capture - consent, capture, forward")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show capture backends and defaults
    Info,

    /// Capture system audio until Ctrl+C
    Stream {
        /// Sample rate in Hz
        #[arg(short, long)]
        sample_rate: Option<u32>,

        /// Chunk size in bytes
        #[arg(short, long)]
        buffer_size: Option<usize>,

        /// Capture backend
        #[arg(short = 'B', long, value_enum)]
        backend: Option<Backend>,

        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip the portal consent dialog
        #[arg(long)]
        no_portal: bool,

        /// Write raw PCM to stdout
        #[arg(long)]
        raw: bool,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout may carry PCM
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ghosttap=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Stream {
            sample_rate,
            buffer_size,
            backend,
            config,
            no_portal,
            raw,
            duration,
        } => {
            let mut file_config = match config {
                Some(path) => GhostTapConfig::from_file(&path)?,
                None => GhostTapConfig::default(),
            };
            if let Some(backend) = backend {
                file_config.backend = backend.into();
            }
            if no_portal {
                file_config.use_portal = false;
            }
            cmd_stream(file_config, sample_rate, buffer_size, raw, duration).await
        }
        Commands::Config => cmd_config(),
    }
}

fn cmd_info() -> anyhow::Result<()> {
    println!("GhostTap {}", ghosttap::VERSION);
    println!("============\n");

    println!("=== Backends ===");
    println!(
        "PipeWire: {} (daemon {})",
        if cfg!(feature = "pipewire") { "built" } else { "not built" },
        if capture::is_pipewire_running() { "running" } else { "not found" }
    );
    println!("Tone: always available");
    println!(
        "Playback capture: {}",
        if ghosttap::is_capture_available() { "Yes" } else { "No" }
    );

    println!("\n=== Consent ===");
    println!(
        "Portal: {}",
        if cfg!(feature = "portal") { "built" } else { "not built (implicit consent)" }
    );

    let defaults = ghosttap::CaptureConfig::default();
    println!("\n=== Defaults ===");
    println!("Sample rate: {} Hz", defaults.sample_rate_hz);
    println!("Chunk size: {} bytes ({:?})", defaults.buffer_size_bytes, defaults.chunk_duration());
    println!("Format: {} x{}", defaults.format, defaults.channels);

    Ok(())
}

async fn cmd_stream(
    config: GhostTapConfig,
    sample_rate: Option<u32>,
    buffer_size: Option<usize>,
    raw: bool,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    let recorder = Recorder::from_config(&config);

    if raw {
        recorder.on_audio_chunk(|chunk| {
            let mut out = std::io::stdout().lock();
            if let Err(e) = out.write_all(chunk.bytes()).and_then(|_| out.flush()) {
                tracing::debug!("stdout closed: {}", e);
            }
        });
    } else {
        recorder.on_audio_chunk(|_| {});
    }

    recorder.try_start_streaming(sample_rate, buffer_size).await?;
    eprintln!(
        "Streaming from {} backend. Press Ctrl+C to stop.",
        recorder.backend_name()
    );

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                if !recorder.is_streaming() {
                    tracing::warn!("Capture session ended");
                    break;
                }
                if !raw {
                    let stats = recorder.stats();
                    tracing::info!(
                        "{} chunks, {} bytes captured",
                        stats.chunks_delivered,
                        stats.bytes_captured
                    );
                }
            }
        }
    }

    eprintln!("\nStopping...");
    recorder.stop_streaming();

    let stats = recorder.stats();
    eprintln!("\nStatistics:");
    eprintln!("  Chunks delivered: {}", stats.chunks_delivered);
    eprintln!("  Chunks dropped: {}", stats.chunks_dropped);
    eprintln!("  Bytes captured: {}", stats.bytes_captured);

    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    print!("{}", GhostTapConfig::default().to_toml_string()?);
    Ok(())
}
