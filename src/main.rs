//! Copy-paste streaming CLI.
//!
//! Starts one synthetic source per stream, prints the offer payload to
//! stdout, reads the pasted answer from stdin, and keeps streaming until
//! the connection ends or Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use framecast::config::TurnServer;
use framecast::video::format::{PixelFormat, Resolution};
use framecast::video::hub::FrameHub;
use framecast::video::source::{FrameSink, FrameSource, TestPatternSource};
use framecast::webrtc::StreamSession;
use framecast::SessionConfig;

#[derive(Parser, Debug)]
#[command(name = "framecast", version, about = "Paced live-frame streaming with copy-paste signaling")]
struct Args {
    /// Logical stream names, one outbound track each
    #[arg(default_values_t = vec!["screen".to_string()])]
    streams: Vec<String>,

    /// Output frame rate per track
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Output resolution as WIDTHxHEIGHT
    #[arg(long, default_value = "640x480", value_parser = parse_resolution)]
    resolution: Resolution,

    /// Pixel format delivered by the sources
    #[arg(long, default_value = "rgb24")]
    pixel_format: PixelFormat,

    /// Rate of the built-in test pattern sources
    #[arg(long, default_value_t = 30)]
    source_fps: u32,

    /// STUN server URL, repeatable. Pass --no-stun to disable.
    #[arg(long = "stun", default_values_t = vec!["stun:stun.l.google.com:19302".to_string()])]
    stun_servers: Vec<String>,

    /// Skip STUN entirely (host candidates only)
    #[arg(long)]
    no_stun: bool,

    /// TURN server URL (requires --turn-user and --turn-pass)
    #[arg(long)]
    turn_url: Option<String>,

    #[arg(long, requires = "turn_url")]
    turn_user: Option<String>,

    #[arg(long, requires = "turn_url")]
    turn_pass: Option<String>,

    /// Deadline for connection establishment after the answer (seconds)
    #[arg(long, default_value_t = 50)]
    connect_timeout: u64,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_resolution(s: &str) -> std::result::Result<Resolution, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got '{}'", s))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("Bad width '{}'", w))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("Bad height '{}'", h))?;
    let resolution = Resolution::new(width, height);
    if !resolution.is_valid() {
        return Err(format!("Invalid resolution {}", resolution));
    }
    Ok(resolution)
}

fn build_config(args: &Args) -> SessionConfig {
    let mut config = SessionConfig {
        target_fps: args.fps,
        output_resolution: args.resolution,
        pixel_format: args.pixel_format,
        connect_timeout_ms: args.connect_timeout * 1_000,
        ..SessionConfig::default()
    };
    config.stun_servers = if args.no_stun {
        vec![]
    } else {
        args.stun_servers.clone()
    };
    if let (Some(url), Some(user), Some(pass)) =
        (&args.turn_url, &args.turn_user, &args.turn_pass)
    {
        config.turn_servers = vec![TurnServer::new(url.clone(), user.clone(), pass.clone())];
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    framecast::init().context("Transport setup failed")?;

    let config = build_config(&args);
    config.validate().context("Invalid configuration")?;

    let hub = Arc::new(FrameHub::new(config.output_resolution, config.pixel_format));
    let session = Arc::new(
        StreamSession::new(config, Arc::clone(&hub), args.streams.clone())
            .context("Failed to create session")?,
    );

    // One synthetic source per stream; a real deployment attaches its own
    // capture sources here instead.
    let mut sources = Vec::new();
    for stream in &args.streams {
        hub.register(stream);
        let mut source =
            TestPatternSource::new(args.resolution, args.pixel_format, args.source_fps)
                .context("Failed to create source")?;
        source
            .subscribe(FrameSink::into_hub(Arc::clone(&hub), stream))
            .context("Failed to start source")?;
        sources.push(source);
    }

    let offer = session.start().await.context("Failed to start session")?;
    println!("\n--- OFFER (send this to the remote peer) ---");
    println!("{}", offer);
    println!("--- END OFFER ---\n");
    println!("Paste the answer payload and press Enter:");

    let mut answer = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    stdin
        .read_line(&mut answer)
        .await
        .context("Failed to read answer from stdin")?;

    if let Err(e) = session.apply_answer(&answer).await {
        error!("Failed to establish connection: {}", e);
        shutdown(&session, &mut sources).await;
        return Err(e.into());
    }

    info!("Streaming {} track(s). Press Ctrl-C to stop.", args.streams.len());

    let mut state = session.state_watch();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
        result = state.wait_for(|s| s.is_terminal()) => {
            match result {
                Ok(s) => warn!("Session ended: {}", *s),
                Err(_) => warn!("Session state observer lost"),
            }
        }
    }

    shutdown(&session, &mut sources).await;
    Ok(())
}

async fn shutdown(session: &StreamSession, sources: &mut [TestPatternSource]) {
    for source in sources.iter_mut() {
        source.unsubscribe();
    }
    session.stop().await;
    info!("Shutdown complete");
}
