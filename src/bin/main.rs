use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use inference_bridge::bridge::protocol::{Payload, Request};
use inference_bridge::config::{self, load_settings};
use inference_bridge::{
    InferenceBridge, InferenceClient, LatentInfo, LocalTransport, OutputSlot, OwnerId, Resumption,
};
use tokio::time::Instant;

/// Longest wait for the backend to connect, or to answer the last frames.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive an inference bridge against an in-process echo model
#[derive(Parser)]
#[command(name = "inference-bridge")]
#[command(version)]
#[command(about = "Correlate inference requests with backend results")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a frame loop that issues one latent call per frame
    Run {
        /// Number of frames to run
        #[arg(long, default_value_t = 10)]
        frames: u32,

        /// Frame length in milliseconds
        #[arg(long, default_value_t = 16)]
        frame_ms: u64,

        /// Project directory containing inference-bridge.toml
        #[arg(long)]
        config: Option<PathBuf>,

        /// Force a disconnect at this frame
        #[arg(long)]
        disconnect_at: Option<u32>,
    },
    /// Print the user config file location
    ConfigPath,
}

fn echo_model(request: &Request) -> Result<Payload, String> {
    match &request.payload {
        Payload::Structured(text) => Ok(Payload::Structured(format!("echo:{text}"))),
        Payload::Raw(values) => Ok(Payload::Raw(values.iter().map(|v| v * 2.0).collect())),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ConfigPath => match config::user_config_path() {
            Some(path) => println!("{}", path.display()),
            None => {
                eprintln!("Error: Could not determine the user config directory.");
                std::process::exit(1);
            }
        },
        Commands::Run {
            frames,
            frame_ms,
            config,
            disconnect_at,
        } => {
            if let Err(e) = run(frames, frame_ms, config, disconnect_at).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run(
    frames: u32,
    frame_ms: u64,
    config: Option<PathBuf>,
    disconnect_at: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = load_settings(config.as_deref(), None);
    for event in &outcome.events {
        event.log();
    }

    let mut bridge = InferenceBridge::new(outcome.settings, |sink| {
        LocalTransport::spawn("echo", echo_model, sink)
    })?;

    let resumed = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&resumed);
    let mut scheduler = move |resumption: Resumption| {
        log::debug!(
            target: "inference_bridge::cli",
            "Resumed {:?} ({:?})",
            resumption.call_site,
            resumption.state
        );
        if let Ok(mut count) = counter.lock() {
            *count += 1;
        }
    };

    let mut interval = tokio::time::interval(Duration::from_millis(frame_ms.max(1)));
    let mut outputs = Vec::new();

    let settle_deadline = Instant::now() + SETTLE_TIMEOUT;
    while !bridge.is_connected() && Instant::now() < settle_deadline {
        interval.tick().await;
        bridge.tick(&mut scheduler);
    }
    if !bridge.is_connected() {
        log::warn!(
            target: "inference_bridge::cli",
            "Backend did not connect within {:?}",
            SETTLE_TIMEOUT
        );
    }

    for frame in 0..frames {
        interval.tick().await;
        bridge.tick(&mut scheduler);

        if disconnect_at == Some(frame) {
            bridge.set_disconnected();
        }

        let slot = OutputSlot::new();
        bridge.send_input_latent(
            format!("frame {frame}"),
            None,
            LatentInfo::new(OwnerId(0), frame),
            slot.clone(),
        )?;
        outputs.push(slot);
    }

    // Keep stepping frames for results still in flight
    let settle_deadline = Instant::now() + SETTLE_TIMEOUT;
    while bridge.pending_count() > 0 && Instant::now() < settle_deadline {
        interval.tick().await;
        bridge.tick(&mut scheduler);
    }

    let completed = outputs
        .iter()
        .filter(|slot| matches!(slot.get(), Some(Ok(_))))
        .count();
    let snapshot = bridge.shutdown(&mut scheduler);

    let resumed = resumed.lock().map(|count| *count).unwrap_or_default();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "frames": frames,
            "completed": completed,
            "resumed": resumed,
            "diagnostics": snapshot,
        }))?
    );
    Ok(())
}
